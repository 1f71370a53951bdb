//! Translation between live instances and the record shapes the store
//! protocol consumes: dirty-field serialization for writes, delta
//! selections for loads, and selection-scoped merging for reads.

use crate::{
    document::{check_scalar, Document, FieldValue, Presence},
    error::Error,
    model::FieldKind,
    record::{FieldChange, PatchValue, Record, RecordPatch, RecordValue},
    selection::FieldSelection,
    session::SessionInner,
    store::DeleteTarget,
};
use indexmap::IndexMap;
use std::{collections::HashSet, sync::Arc};

///
/// Write path
///

/// Serialize a document's pending changes into one store patch. Embedded
/// instances ride along whenever they have anything to write; referenced
/// instances are serialized only when the holding field itself was
/// reassigned, degenerating to a bare stub when they have nothing to
/// write.
pub(crate) fn save_patch(doc: &Document) -> Result<RecordPatch, Error> {
    let mut visited = HashSet::new();
    let mut participants = Vec::new();
    build_patch(doc, &mut visited, &mut participants)
}

/// The nested instances the patch for `doc` would write, in the order
/// their records are written. Hook chains run once per participant.
pub(crate) fn save_participants(doc: &Document) -> Result<Vec<Document>, Error> {
    let mut visited = HashSet::new();
    let mut participants = Vec::new();
    build_patch(doc, &mut visited, &mut participants)?;
    Ok(participants)
}

fn build_patch(
    doc: &Document,
    visited: &mut HashSet<usize>,
    participants: &mut Vec<Document>,
) -> Result<RecordPatch, Error> {
    visited.insert(doc.addr());
    let schema = doc.schema_arc();
    let mut patch = RecordPatch::new(doc.stub(), doc.is_new());

    for field in schema.fields() {
        let name = field.name();
        let kind = field.kind();
        let (presence, dirty) = doc.slot_snapshot(name);

        match presence {
            Presence::Unknown => {}
            Presence::Absent => {
                if dirty {
                    patch.push(name.to_string(), FieldChange::Unset);
                }
            }
            Presence::Present(value) => {
                if kind.is_entity() {
                    let mut nested = Vec::new();
                    let (patch_value, writes) =
                        entity_patch_value(name, &value, visited, &mut nested)?;
                    if dirty || (!kind.is_reference() && writes) {
                        participants.append(&mut nested);
                        patch.push(name.to_string(), FieldChange::Set(patch_value));
                    }
                } else if dirty {
                    patch.push(name.to_string(), FieldChange::Set(scalar_patch_value(name, &value)?));
                }
            }
        }
    }

    Ok(patch)
}

fn entity_patch_value(
    field: &str,
    value: &FieldValue,
    visited: &mut HashSet<usize>,
    participants: &mut Vec<Document>,
) -> Result<(PatchValue, bool), Error> {
    match value {
        FieldValue::Entity(child) => {
            // A revisited instance is already being written at another
            // level of this patch; a bare stub breaks the cycle.
            if visited.contains(&child.addr()) {
                let stub_only = RecordPatch::new(child.stub(), false);
                return Ok((stub_only.into(), false));
            }

            let child_patch = build_patch(child, visited, participants)?;
            let writes = child_patch.writes();
            if writes {
                participants.push(child.clone());
            }

            Ok((child_patch.into(), writes))
        }
        FieldValue::Many(items) => {
            let mut any_writes = false;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let (patch_value, writes) =
                    entity_patch_value(field, item, visited, participants)?;
                any_writes |= writes;
                out.push(patch_value);
            }
            Ok((PatchValue::Many(out), any_writes))
        }
        FieldValue::Scalar(_) => Err(Error::type_mismatch(field, "model value", "scalar")),
    }
}

fn scalar_patch_value(field: &str, value: &FieldValue) -> Result<PatchValue, Error> {
    match value {
        FieldValue::Scalar(scalar) => Ok(PatchValue::Scalar(scalar.clone())),
        FieldValue::Many(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(scalar_patch_value(field, item)?);
            }
            Ok(PatchValue::Many(out))
        }
        FieldValue::Entity(_) => Err(Error::type_mismatch(field, "scalar", "model value")),
    }
}

///
/// Delete path
///

/// The loaded embedded instances reachable from `doc`, flattened.
/// References are never included; they have independent lifetimes.
pub(crate) fn embedded_instances(doc: &Document) -> Vec<Document> {
    let mut visited = HashSet::from([doc.addr()]);
    let mut out = Vec::new();
    collect_embedded(doc, &mut visited, &mut out);
    out
}

fn collect_embedded(doc: &Document, visited: &mut HashSet<usize>, out: &mut Vec<Document>) {
    for field in doc.schema_arc().fields() {
        let kind = field.kind();
        if !kind.is_entity() || kind.is_reference() {
            continue;
        }
        let (presence, _) = doc.slot_snapshot(field.name());
        let Presence::Present(value) = presence else {
            continue;
        };
        collect_embedded_values(&value, visited, out);
    }
}

fn collect_embedded_values(
    value: &FieldValue,
    visited: &mut HashSet<usize>,
    out: &mut Vec<Document>,
) {
    match value {
        FieldValue::Entity(child) => {
            if visited.insert(child.addr()) {
                out.push(child.clone());
                collect_embedded(child, visited, out);
            }
        }
        FieldValue::Many(items) => {
            for item in items {
                collect_embedded_values(item, visited, out);
            }
        }
        FieldValue::Scalar(_) => {}
    }
}

/// The cascade tree a delete passes to the store: one target per loaded
/// embedded instance, nesting each instance's own embedded values.
pub(crate) fn delete_targets(doc: &Document) -> Vec<DeleteTarget> {
    let mut visited = HashSet::from([doc.addr()]);
    targets_for(doc, &mut visited)
}

fn targets_for(doc: &Document, visited: &mut HashSet<usize>) -> Vec<DeleteTarget> {
    let mut out = Vec::new();

    for field in doc.schema_arc().fields() {
        let kind = field.kind();
        if !kind.is_entity() || kind.is_reference() {
            continue;
        }
        let (presence, _) = doc.slot_snapshot(field.name());
        let Presence::Present(value) = presence else {
            continue;
        };
        push_targets(&value, visited, &mut out);
    }

    out
}

fn push_targets(value: &FieldValue, visited: &mut HashSet<usize>, out: &mut Vec<DeleteTarget>) {
    match value {
        FieldValue::Entity(child) => {
            if visited.insert(child.addr()) {
                out.push(DeleteTarget::with_children(
                    child.stub(),
                    targets_for(child, visited),
                ));
            }
        }
        FieldValue::Many(items) => {
            for item in items {
                push_targets(item, visited, out);
            }
        }
        FieldValue::Scalar(_) => {}
    }
}

///
/// Load path
///

/// What a load actually needs to fetch: the requested selection minus
/// everything already known, recursing through loaded embedded and
/// referenced instances. `None` means the store roundtrip can be
/// skipped entirely.
pub(crate) fn load_delta(
    doc: &Document,
    requested: &FieldSelection,
) -> Result<Option<FieldSelection>, Error> {
    let mut visited = HashSet::new();
    delta_for(doc, requested, &mut visited)
}

fn delta_for(
    doc: &Document,
    requested: &FieldSelection,
    visited: &mut HashSet<usize>,
) -> Result<Option<FieldSelection>, Error> {
    if !visited.insert(doc.addr()) {
        return Ok(None);
    }

    let mut map = IndexMap::new();
    for field in doc.schema_arc().fields() {
        let name = field.name();
        let kind = field.kind();
        let Some(sub) = requested.narrow(name) else {
            continue;
        };
        let (presence, _) = doc.slot_snapshot(name);

        match presence {
            Presence::Unknown => {
                map.insert(name.to_string(), sub.clone());
            }
            Presence::Absent => {}
            Presence::Present(value) => {
                if !kind.is_entity() {
                    continue;
                }
                match value {
                    FieldValue::Entity(child) => {
                        if let Some(child_delta) = delta_for(&child, sub, visited)? {
                            map.insert(name.to_string(), child_delta);
                        }
                    }
                    FieldValue::Many(items) => {
                        let Some(element_sel) = sub.element() else {
                            return Err(Error::type_mismatch(
                                name,
                                "whole-array or per-element selection",
                                "field selection",
                            ));
                        };
                        let mut incomplete = false;
                        for item in &items {
                            if let FieldValue::Entity(child) = item {
                                if delta_for(child, element_sel, visited)?.is_some() {
                                    incomplete = true;
                                }
                            }
                        }
                        // Selections cannot address single elements, so
                        // any incomplete element re-requests them all.
                        if incomplete {
                            map.insert(
                                name.to_string(),
                                FieldSelection::each(element_sel.clone()),
                            );
                        }
                    }
                    FieldValue::Scalar(_) => {}
                }
            }
        }
    }

    Ok(if map.is_empty() {
        None
    } else {
        Some(FieldSelection::Fields(map))
    })
}

///
/// Read path
///

/// Merge a fetched record into a live instance. Fields the selection
/// targeted overwrite (and come in clean); targeted-but-missing fields
/// become absent; untargeted fields keep whatever state they had.
/// Nested records resolve through the session's identity map, so a
/// reference already held elsewhere lands on the same instance.
///
/// Returns the instances this merge materialized for the first time in
/// the session, root-before-children: the set `after_load` fires for.
pub(crate) fn merge(
    session: &Arc<SessionInner>,
    doc: &Document,
    record: &Record,
    selection: &FieldSelection,
) -> Result<Vec<Document>, Error> {
    let mut fresh = Vec::new();
    merge_into(session, doc, record, selection, &mut fresh)?;
    Ok(fresh)
}

fn merge_into(
    session: &Arc<SessionInner>,
    doc: &Document,
    record: &Record,
    selection: &FieldSelection,
    fresh: &mut Vec<Document>,
) -> Result<(), Error> {
    let schema = doc.schema_arc();

    for field in schema.fields() {
        let name = field.name();
        let Some(sub) = selection.narrow(name) else {
            continue;
        };

        match record.get(name) {
            None => doc.force_slot(name, Presence::Absent, false),
            Some(value) => {
                let converted =
                    convert_record_value(session, name, field.kind(), value, sub, fresh)?;
                doc.force_slot(name, Presence::Present(converted), false);
            }
        }
    }

    Ok(())
}

fn convert_record_value(
    session: &Arc<SessionInner>,
    field: &str,
    kind: &FieldKind,
    value: &RecordValue,
    selection: &FieldSelection,
    fresh: &mut Vec<Document>,
) -> Result<FieldValue, Error> {
    if let RecordValue::Many(items) = value {
        if !kind.is_many() {
            return Err(Error::type_mismatch(field, kind.kind_name(), "array"));
        }
        let element_kind = kind.element();
        let Some(element_sel) = selection.element() else {
            return Err(Error::type_mismatch(
                field,
                "whole-array or per-element selection",
                "field selection",
            ));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(convert_record_value(
                session,
                field,
                element_kind,
                item,
                element_sel,
                fresh,
            )?);
        }
        return Ok(FieldValue::Many(out));
    }
    if kind.is_many() {
        return Err(Error::type_mismatch(field, "array", value.kind_name()));
    }

    if let Some(target) = kind.target() {
        return match value {
            RecordValue::Doc(nested) => {
                if nested.type_name() != target {
                    return Err(Error::type_mismatch(field, "matching model", "other model"));
                }
                let child = resolve_instance(session, nested, fresh)?;
                merge_into(session, &child, nested, selection, fresh)?;
                Ok(FieldValue::Entity(child))
            }
            RecordValue::Inline(_) => Err(Error::invalid_value(
                field,
                "anonymous embedded value cannot merge into an identified model",
            )),
            _ => Err(Error::type_mismatch(field, kind.kind_name(), value.kind_name())),
        };
    }

    match value {
        RecordValue::Scalar(scalar) => {
            check_scalar(field, kind, scalar)?;
            Ok(FieldValue::Scalar(scalar.clone()))
        }
        _ => Err(Error::type_mismatch(field, kind.kind_name(), value.kind_name())),
    }
}

fn resolve_instance(
    session: &Arc<SessionInner>,
    record: &Record,
    fresh: &mut Vec<Document>,
) -> Result<Document, Error> {
    if let Some(existing) = session.lookup(record.type_name(), record.id()) {
        return Ok(existing);
    }

    let schema = session.registry().try_get(record.type_name())?;
    let doc = Document::materialize(session, schema, record.stub().clone());
    fresh.push(doc.clone());

    Ok(doc)
}
