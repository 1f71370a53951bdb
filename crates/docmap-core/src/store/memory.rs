use crate::{
    error::{Error, IdentityError},
    record::{FieldChange, PatchValue, Record, RecordPatch, RecordStub, RecordValue},
    selection::FieldSelection,
    store::{DeleteOutcome, DeleteTarget, FindQuery, Store},
    value::Value,
};
use async_trait::async_trait;
use derive_more::{Deref, DerefMut};
use indexmap::IndexMap;
use tokio::sync::RwLock;
use tracing::trace;

///
/// MemoryStore
///
/// Reference backend: `type → (id → record)` over insertion-ordered
/// maps. Identified nested values are normalized on write (the child
/// becomes its own record and the owner keeps a stub) and re-inlined on
/// read to whatever depth the selection asks for. This is the
/// conformance target any other backend must match observably.
///

pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
        }
    }

    /// Whether a record currently exists.
    pub async fn contains(&self, stub: &RecordStub) -> bool {
        self.collections
            .read()
            .await
            .get(stub.type_name())
            .is_some_and(|collection| collection.contains_key(stub.id()))
    }

    /// Number of records in one collection.
    pub async fn collection_len(&self, type_name: &str) -> usize {
        self.collections
            .read()
            .await
            .get(type_name)
            .map_or(0, |collection| collection.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        stub: &RecordStub,
        selection: &FieldSelection,
    ) -> Result<Option<Record>, Error> {
        trace!(target: "docmap::store", %stub, "get");
        let collections = self.collections.read().await;
        resolve_record(&collections, stub, selection)
    }

    async fn set(&self, patch: RecordPatch) -> Result<(), Error> {
        trace!(target: "docmap::store", stub = %patch.stub(), is_new = patch.is_new(), "set");
        let mut collections = self.collections.write().await;
        set_record(&mut collections, patch)
    }

    async fn delete(
        &self,
        stub: &RecordStub,
        cascades: &[DeleteTarget],
    ) -> Result<DeleteOutcome, Error> {
        trace!(target: "docmap::store", %stub, cascades = cascades.len(), "delete");
        let mut collections = self.collections.write().await;

        // Cascades run first, children before owners, whether or not the
        // root record exists.
        let mut cascaded = Vec::new();
        for target in cascades {
            delete_target(&mut collections, target, &mut cascaded);
        }

        let removed = remove_record(&mut collections, stub);

        Ok(DeleteOutcome { removed, cascaded })
    }

    async fn find(&self, type_name: &str, query: &FindQuery) -> Result<Vec<Record>, Error> {
        if type_name.is_empty() {
            return Err(IdentityError::EmptyType.into());
        }
        trace!(target: "docmap::store", type_name, "find");

        let collections = self.collections.read().await;
        let Some(collection) = collections.get(type_name) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let mut remaining_skip = query.skip_count();

        for (id, stored) in collection.iter() {
            if !matches_filter(stored, query) {
                continue;
            }
            if remaining_skip > 0 {
                remaining_skip -= 1;
                continue;
            }
            if query.limit_count().is_some_and(|limit| out.len() >= limit) {
                break;
            }

            let stub = RecordStub::try_new(type_name, id.as_str())?;
            let record = resolve_record(&collections, &stub, query.record_selection())?
                .expect("matched record must resolve");
            out.push(record);
        }

        Ok(out)
    }
}

///
/// Collections
///

#[derive(Default, Deref, DerefMut)]
struct Collections(IndexMap<String, Collection>);

#[derive(Default, Deref, DerefMut)]
struct Collection(IndexMap<String, StoredRecord>);

#[derive(Default, Deref, DerefMut)]
struct StoredRecord(IndexMap<String, StoredValue>);

///
/// StoredValue
///
/// Normalized persisted shape of one field: identified values are always
/// stubs here, never inlined records.
///

#[derive(Clone, Debug, PartialEq)]
enum StoredValue {
    Scalar(Value),
    Many(Vec<StoredValue>),
    Inline(crate::record::InlineValue),
    Stub(RecordStub),
}

///
/// Read path
///

fn resolve_record(
    collections: &Collections,
    stub: &RecordStub,
    selection: &FieldSelection,
) -> Result<Option<Record>, Error> {
    let Some(stored) = collections
        .get(stub.type_name())
        .and_then(|collection| collection.get(stub.id()))
    else {
        return Ok(None);
    };

    let mut record = Record::new(stub.clone());
    if selection.is_identity_only() {
        return Ok(Some(record));
    }

    for (name, value) in stored.iter() {
        let Some(field_selection) = selection.narrow(name) else {
            continue;
        };
        if let Some(resolved) = resolve_value(collections, name, value, field_selection)? {
            record.insert(name.clone(), resolved);
        }
    }

    Ok(Some(record))
}

fn resolve_value(
    collections: &Collections,
    field: &str,
    stored: &StoredValue,
    selection: &FieldSelection,
) -> Result<Option<RecordValue>, Error> {
    match stored {
        StoredValue::Many(items) => {
            let Some(element_selection) = selection.element() else {
                return Err(Error::type_mismatch(
                    field,
                    "whole-array or per-element selection",
                    "field selection",
                ));
            };

            let mut out = Vec::with_capacity(items.len());
            for item in items {
                // An element whose target record is gone yields nothing.
                if let Some(resolved) = resolve_value(collections, field, item, element_selection)? {
                    out.push(resolved);
                }
            }

            Ok(Some(RecordValue::Many(out)))
        }
        StoredValue::Scalar(value) => {
            if !selection.is_all() {
                return Err(Error::type_mismatch(
                    field,
                    "whole-value selection",
                    "partial selection",
                ));
            }
            Ok(Some(RecordValue::Scalar(value.clone())))
        }
        StoredValue::Inline(inline) => {
            if !selection.is_all() {
                return Err(Error::invalid_value(
                    field,
                    "cannot partially return a nested value without identity",
                ));
            }
            Ok(Some(RecordValue::Inline(inline.clone())))
        }
        StoredValue::Stub(stub) => {
            if matches!(selection, FieldSelection::Each(_)) {
                return Err(Error::type_mismatch(
                    field,
                    "record selection",
                    "per-element selection",
                ));
            }
            Ok(resolve_record(collections, stub, selection)?.map(RecordValue::from))
        }
    }
}

///
/// Write path
///

fn set_record(collections: &mut Collections, patch: RecordPatch) -> Result<(), Error> {
    let (stub, is_new, changes) = patch.into_parts();

    {
        let collection = collections
            .entry(stub.type_name().to_string())
            .or_default();
        let exists = collection.contains_key(stub.id());

        if exists && is_new {
            return Err(Error::AlreadyExists {
                type_name: stub.type_name().to_string(),
                id: stub.id().to_string(),
            });
        }
        if !exists {
            if !is_new {
                return Err(Error::NotFound {
                    type_name: stub.type_name().to_string(),
                    id: stub.id().to_string(),
                });
            }
            collection.insert(stub.id().to_string(), StoredRecord::default());
        }
    }

    // Reduce every change first, cascading nested writes as they are
    // encountered, then apply the reduced values to the owner record.
    let mut applied = Vec::with_capacity(changes.len());
    for (name, change) in changes {
        let reduced = match change {
            FieldChange::Unset => None,
            FieldChange::Set(value) => Some(reduce_value(collections, value)?),
        };
        applied.push((name, reduced));
    }

    let record = collections
        .get_mut(stub.type_name())
        .and_then(|collection| collection.get_mut(stub.id()))
        .expect("record ensured above must exist");

    for (name, reduced) in applied {
        match reduced {
            Some(value) => {
                record.insert(name, value);
            }
            None => {
                record.shift_remove(&name);
            }
        }
    }

    Ok(())
}

fn reduce_value(collections: &mut Collections, value: PatchValue) -> Result<StoredValue, Error> {
    match value {
        PatchValue::Scalar(scalar) => Ok(StoredValue::Scalar(scalar)),
        PatchValue::Inline(inline) => Ok(StoredValue::Inline(inline)),
        PatchValue::Many(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(reduce_value(collections, item)?);
            }
            Ok(StoredValue::Many(out))
        }
        PatchValue::Doc(sub) => {
            let stub = sub.stub().clone();
            // A bare stub stores as a stub with no redundant write; a
            // payload with content cascades through the same entry point.
            if sub.writes() {
                set_record(collections, *sub)?;
            }
            Ok(StoredValue::Stub(stub))
        }
    }
}

///
/// Delete path
///

fn delete_target(
    collections: &mut Collections,
    target: &DeleteTarget,
    cascaded: &mut Vec<RecordStub>,
) {
    for child in target.children() {
        delete_target(collections, child, cascaded);
    }
    if let Some(stub) = remove_record(collections, target.stub()) {
        cascaded.push(stub);
    }
}

fn remove_record(collections: &mut Collections, stub: &RecordStub) -> Option<RecordStub> {
    collections
        .get_mut(stub.type_name())?
        .shift_remove(stub.id())
        .map(|_| stub.clone())
}

fn matches_filter(record: &StoredRecord, query: &FindQuery) -> bool {
    query.filters().all(|(field, expected)| {
        matches!(record.get(field), Some(StoredValue::Scalar(actual)) if actual == expected)
    })
}

///
/// TESTS
///
