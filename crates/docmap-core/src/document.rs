use crate::{
    codec,
    error::{Error, SchemaError},
    hooks::LifecycleEvent,
    model::{FieldKind, ModelSchema},
    record::{Record, RecordStub, RecordValue},
    selection::FieldSelection,
    session::SessionInner,
    store::Store,
    value::Value,
};
use indexmap::IndexMap;
use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, RwLock, Weak},
};
use tracing::debug;
use ulid::Ulid;

///
/// Status
///
/// Lifecycle state of one instance. `New` has never been written;
/// `Saved` has been written (or was materialized from storage) at least
/// once; `Deleted` is terminal.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    New,
    Saved,
    Deleted,
}

///
/// Presence
///
/// Per-field knowledge state. `Unknown` means never fetched; `Absent`
/// means fetched and confirmed not set (or explicitly cleared). A later
/// partial fetch that does not target a field never reverts it to
/// `Unknown`.
///

#[derive(Clone, Debug)]
pub enum Presence {
    Unknown,
    Absent,
    Present(FieldValue),
}

impl Presence {
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    #[must_use]
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    #[must_use]
    pub const fn value(&self) -> Option<&FieldValue> {
        match self {
            Self::Present(value) => Some(value),
            _ => None,
        }
    }
}

///
/// FieldValue
///
/// A live field value: a scalar, an array, or another live instance.
///

#[derive(Clone, Debug)]
pub enum FieldValue {
    Scalar(Value),
    Many(Vec<FieldValue>),
    Entity(Document),
}

impl FieldValue {
    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_entity(&self) -> Option<&Document> {
        match self {
            Self::Entity(doc) => Some(doc),
            _ => None,
        }
    }
}

///
/// Attrs
///
/// Construction-time attribute set. The reserved `id` key supplies the
/// instance identity; every other key must name a schema field. Nested
/// `Attrs` construct a fresh instance of the field's target model.
///

#[derive(Clone, Debug, Default)]
pub struct Attrs(IndexMap<String, AttrValue>);

impl Attrs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one attribute. Builder-style; later sets win.
    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub(crate) fn take_id(&mut self) -> Result<Option<String>, Error> {
        match self.0.shift_remove("id") {
            None => Ok(None),
            Some(AttrValue::Value(Value::Text(id))) => Ok(Some(id)),
            Some(_) => Err(Error::invalid_value("id", "id must be text")),
        }
    }

    pub(crate) fn into_iter(self) -> impl Iterator<Item = (String, AttrValue)> {
        self.0.into_iter()
    }
}

///
/// AttrValue
///

#[derive(Clone, Debug)]
pub enum AttrValue {
    Value(Value),
    Entity(Document),
    Nested(Attrs),
    Many(Vec<AttrValue>),
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Value(value.into())
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        Self::Value(value.into())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Value(value.into())
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Value(value.into())
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Value(value.into())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Value(value.into())
    }
}

impl From<Document> for AttrValue {
    fn from(doc: Document) -> Self {
        Self::Entity(doc)
    }
}

impl From<Attrs> for AttrValue {
    fn from(attrs: Attrs) -> Self {
        Self::Nested(attrs)
    }
}

impl From<Vec<AttrValue>> for AttrValue {
    fn from(items: Vec<AttrValue>) -> Self {
        Self::Many(items)
    }
}

impl From<Vec<Attrs>> for AttrValue {
    fn from(items: Vec<Attrs>) -> Self {
        Self::Many(items.into_iter().map(Self::Nested).collect())
    }
}

impl From<Vec<Document>> for AttrValue {
    fn from(items: Vec<Document>) -> Self {
        Self::Many(items.into_iter().map(Self::Entity).collect())
    }
}

///
/// Document
///
/// A live instance. The handle is a cheap clone sharing one underlying
/// instance. The identity map guarantees at most one instance per
/// `(type, id)` within a session, so handle equality is instance
/// identity.
///

#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    session: Weak<SessionInner>,
    schema: Arc<ModelSchema>,
    stub: RecordStub,
    state: RwLock<DocumentState>,
}

pub(crate) struct DocumentState {
    pub(crate) status: Status,
    pub(crate) slots: IndexMap<String, FieldSlot>,
}

#[derive(Clone)]
pub(crate) struct FieldSlot {
    pub(crate) presence: Presence,
    pub(crate) dirty: bool,
}

impl Document {
    // ======================================================================
    // Construction
    // ======================================================================

    fn bare(
        session: &Arc<SessionInner>,
        schema: Arc<ModelSchema>,
        stub: RecordStub,
        status: Status,
    ) -> Self {
        let slots = schema
            .fields()
            .map(|field| {
                (
                    field.name().to_string(),
                    FieldSlot {
                        presence: Presence::Unknown,
                        dirty: false,
                    },
                )
            })
            .collect();

        Self {
            inner: Arc::new(DocumentInner {
                session: Arc::downgrade(session),
                schema,
                stub,
                state: RwLock::new(DocumentState { status, slots }),
            }),
        }
    }

    /// Construct a brand-new instance from attributes and register it.
    pub(crate) fn construct(
        session: &Arc<SessionInner>,
        schema: Arc<ModelSchema>,
        mut attrs: Attrs,
    ) -> Result<Self, Error> {
        let id = match attrs.take_id()? {
            Some(id) => id,
            None => Ulid::new().to_string(),
        };
        let stub = RecordStub::try_new(schema.name(), id)?;

        let doc = Self::bare(session, schema, stub, Status::New);
        session.register_new(&doc)?;

        if let Err(err) = doc.apply_attrs(attrs) {
            session.unregister(&doc);
            return Err(err);
        }

        Ok(doc)
    }

    /// Materialize an instance for an identity found in storage and
    /// register it. All fields start unknown; a merge fills them in.
    pub(crate) fn materialize(
        session: &Arc<SessionInner>,
        schema: Arc<ModelSchema>,
        stub: RecordStub,
    ) -> Self {
        let doc = Self::bare(session, schema, stub, Status::Saved);
        session.register(&doc);
        doc
    }

    fn apply_attrs(&self, attrs: Attrs) -> Result<(), Error> {
        for (name, value) in attrs.into_iter() {
            self.apply_attr(&name, value)?;
        }
        Ok(())
    }

    // ======================================================================
    // Identity & status
    // ======================================================================

    #[must_use]
    pub fn id(&self) -> &str {
        self.inner.stub.id()
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.inner.stub.type_name()
    }

    #[must_use]
    pub fn stub(&self) -> RecordStub {
        self.inner.stub.clone()
    }

    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        &self.inner.schema
    }

    pub(crate) fn schema_arc(&self) -> Arc<ModelSchema> {
        self.inner.schema.clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.with_state(|state| state.status)
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.status() == Status::New
    }

    /// Instance identity: whether two handles share one underlying
    /// instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    // ======================================================================
    // Field access
    // ======================================================================

    /// Knowledge state of one field.
    pub fn presence(&self, field: &str) -> Result<Presence, Error> {
        self.inner.schema.try_field(field)?;
        Ok(self.with_state(|state| {
            state
                .slots
                .get(field)
                .expect("slot must exist for schema field")
                .presence
                .clone()
        }))
    }

    /// Current value of one field; `None` when unknown or absent.
    pub fn get(&self, field: &str) -> Result<Option<FieldValue>, Error> {
        Ok(match self.presence(field)? {
            Presence::Present(value) => Some(value),
            Presence::Unknown | Presence::Absent => None,
        })
    }

    pub fn text(&self, field: &str) -> Result<Option<String>, Error> {
        Ok(self.get(field)?.and_then(|v| {
            v.as_scalar().and_then(Value::as_text).map(str::to_string)
        }))
    }

    pub fn int(&self, field: &str) -> Result<Option<i64>, Error> {
        Ok(self
            .get(field)?
            .and_then(|v| v.as_scalar().and_then(Value::as_int)))
    }

    pub fn float(&self, field: &str) -> Result<Option<f64>, Error> {
        Ok(self
            .get(field)?
            .and_then(|v| v.as_scalar().and_then(Value::as_float)))
    }

    pub fn bool(&self, field: &str) -> Result<Option<bool>, Error> {
        Ok(self
            .get(field)?
            .and_then(|v| v.as_scalar().and_then(Value::as_bool)))
    }

    /// The live instance held by an entity-valued field.
    pub fn entity(&self, field: &str) -> Result<Option<Document>, Error> {
        Ok(self.get(field)?.and_then(|v| v.as_entity().cloned()))
    }

    /// The live instances held by an array field. Empty when the field
    /// is unknown or absent.
    pub fn entities(&self, field: &str) -> Result<Vec<Document>, Error> {
        Ok(match self.get(field)? {
            Some(FieldValue::Many(items)) => items
                .iter()
                .filter_map(|v| v.as_entity().cloned())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Assign one field. Entity-valued fields accept an existing
    /// instance or nested attributes (which construct a fresh instance
    /// of the target model, with a fresh id).
    pub fn set(&self, field: &str, value: impl Into<AttrValue>) -> Result<(), Error> {
        self.apply_attr(field, value.into())
    }

    /// Clear one field. Only optional fields may be cleared.
    pub fn unset(&self, field: &str) -> Result<(), Error> {
        self.ensure_live()?;
        let model = self.inner.schema.try_field(field)?;
        if !model.is_optional() {
            return Err(Error::invalid_value(field, "field is not optional"));
        }

        self.force_slot(field, Presence::Absent, true);
        Ok(())
    }

    fn apply_attr(&self, field: &str, value: AttrValue) -> Result<(), Error> {
        self.ensure_live()?;
        let kind = self.inner.schema.try_field(field)?.kind().clone();
        let converted = self.convert_attr(field, &kind, value)?;
        self.force_slot(field, Presence::Present(converted), true);
        Ok(())
    }

    fn convert_attr(
        &self,
        field: &str,
        kind: &FieldKind,
        value: AttrValue,
    ) -> Result<FieldValue, Error> {
        if let FieldKind::Many(element) = kind {
            let AttrValue::Many(items) = value else {
                return Err(Error::type_mismatch(field, "array", attr_kind_name(&value)));
            };
            let converted = items
                .into_iter()
                .map(|item| self.convert_attr(field, element, item))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(FieldValue::Many(converted));
        }
        if matches!(value, AttrValue::Many(_)) {
            return Err(Error::type_mismatch(field, kind.kind_name(), "array"));
        }

        if let Some(target) = kind.target() {
            return match value {
                AttrValue::Entity(doc) => {
                    if doc.model_name() == target {
                        Ok(FieldValue::Entity(doc))
                    } else {
                        Err(Error::type_mismatch(field, kind.kind_name(), "other model"))
                    }
                }
                AttrValue::Nested(attrs) => {
                    let session = self.session()?;
                    let schema = session.registry().try_get(target)?;
                    let doc = Self::construct(&session, schema, attrs)?;
                    Ok(FieldValue::Entity(doc))
                }
                AttrValue::Value(_) => {
                    Err(Error::type_mismatch(field, kind.kind_name(), "scalar"))
                }
                AttrValue::Many(_) => unreachable!("handled above"),
            };
        }

        match value {
            AttrValue::Value(scalar) => {
                check_scalar(field, kind, &scalar)?;
                Ok(FieldValue::Scalar(scalar))
            }
            AttrValue::Entity(_) | AttrValue::Nested(_) => {
                Err(Error::type_mismatch(field, kind.kind_name(), "model value"))
            }
            AttrValue::Many(_) => unreachable!("handled above"),
        }
    }

    /// Snapshot the present fields as a record: embedded instances
    /// recurse, references flatten to their stubs.
    #[must_use]
    pub fn to_record(&self) -> Record {
        let mut visited = HashSet::new();
        self.to_record_guarded(&mut visited)
    }

    fn to_record_guarded(&self, visited: &mut HashSet<usize>) -> Record {
        visited.insert(self.addr());
        let mut record = Record::new(self.stub());

        for field in self.inner.schema.fields() {
            let (presence, _) = self.slot_snapshot(field.name());
            let Presence::Present(value) = presence else {
                continue;
            };
            let is_reference = field.kind().is_reference();
            record.insert(
                field.name().to_string(),
                field_value_to_record(&value, is_reference, visited),
            );
        }

        record
    }

    // ======================================================================
    // Lifecycle
    // ======================================================================

    /// Persist the dirty field set (for a new instance, every set
    /// field), cascading embedded instances through one store call.
    pub async fn save(&self) -> Result<(), Error> {
        self.ensure_document_kind()?;
        self.ensure_live()?;
        let session = self.session()?;
        debug!(target: "docmap", stub = %self.inner.stub, is_new = self.is_new(), "save");

        session
            .dispatch_hooks(LifecycleEvent::BeforeSave, self)
            .await?;
        let participants = codec::save_participants(self)?;
        for doc in &participants {
            session
                .dispatch_hooks(LifecycleEvent::BeforeSave, doc)
                .await?;
        }

        let patch = codec::save_patch(self)?;
        session.store().set(patch).await?;

        self.commit_saved();
        for doc in &participants {
            doc.commit_saved();
        }

        session
            .dispatch_hooks(LifecycleEvent::AfterSave, self)
            .await?;
        for doc in &participants {
            session
                .dispatch_hooks(LifecycleEvent::AfterSave, doc)
                .await?;
        }

        Ok(())
    }

    /// Widen the loaded field set: fetch whatever the selection targets
    /// that is not yet known, and merge it in. Known fields are left
    /// untouched.
    pub async fn load(&self) -> Result<(), Error> {
        self.load_with(&FieldSelection::All).await
    }

    pub async fn load_with(&self, selection: &FieldSelection) -> Result<(), Error> {
        self.ensure_document_kind()?;
        self.ensure_live()?;
        let session = self.session()?;

        let Some(delta) = codec::load_delta(self, selection)? else {
            return Ok(());
        };
        debug!(target: "docmap", stub = %self.inner.stub, "load");

        let record = session
            .store()
            .get(&self.inner.stub, &delta)
            .await?
            .ok_or_else(|| self.not_found())?;

        let fresh = codec::merge(&session, self, &record, &delta)?;
        session.fire_after_load(&fresh).await?;

        Ok(())
    }

    /// Unconditionally re-fetch the full field set, overwriting cached
    /// values. Picks up changes made through other sessions.
    pub async fn reload(&self) -> Result<(), Error> {
        self.ensure_document_kind()?;
        self.ensure_live()?;
        let session = self.session()?;
        debug!(target: "docmap", stub = %self.inner.stub, "reload");

        let record = session
            .store()
            .get(&self.inner.stub, &FieldSelection::All)
            .await?
            .ok_or_else(|| self.not_found())?;

        let fresh = codec::merge(&session, self, &record, &FieldSelection::All)?;
        session.fire_after_load(&fresh).await?;

        Ok(())
    }

    /// Remove the record, cascading loaded embedded instances through
    /// the same store call. Referenced documents are left untouched.
    pub async fn delete(&self) -> Result<(), Error> {
        self.ensure_document_kind()?;
        self.ensure_live()?;
        let session = self.session()?;
        debug!(target: "docmap", stub = %self.inner.stub, "delete");

        let embedded = codec::embedded_instances(self);
        session
            .dispatch_hooks(LifecycleEvent::BeforeDelete, self)
            .await?;
        for doc in &embedded {
            session
                .dispatch_hooks(LifecycleEvent::BeforeDelete, doc)
                .await?;
        }

        let targets = codec::delete_targets(self);
        session.store().delete(&self.inner.stub, &targets).await?;

        self.mark_deleted();
        session.unregister(self);
        for doc in &embedded {
            doc.mark_deleted();
            session.unregister(doc);
        }

        session
            .dispatch_hooks(LifecycleEvent::AfterDelete, self)
            .await?;
        for doc in &embedded {
            session
                .dispatch_hooks(LifecycleEvent::AfterDelete, doc)
                .await?;
        }

        Ok(())
    }

    // ======================================================================
    // Internals
    // ======================================================================

    pub(crate) fn session(&self) -> Result<Arc<SessionInner>, Error> {
        self.inner.session.upgrade().ok_or(Error::SessionClosed)
    }

    fn ensure_document_kind(&self) -> Result<(), Error> {
        if self.inner.schema.kind().is_document() {
            Ok(())
        } else {
            Err(SchemaError::NotADocument {
                name: self.model_name().to_string(),
            }
            .into())
        }
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.status() == Status::Deleted {
            Err(Error::AlreadyDeleted {
                type_name: self.model_name().to_string(),
                id: self.id().to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn not_found(&self) -> Error {
        Error::NotFound {
            type_name: self.model_name().to_string(),
            id: self.id().to_string(),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&DocumentState) -> R) -> R {
        let state = self
            .inner
            .state
            .read()
            .expect("document state lock poisoned");
        f(&state)
    }

    fn with_state_mut<R>(&self, f: impl FnOnce(&mut DocumentState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .write()
            .expect("document state lock poisoned");
        f(&mut state)
    }

    pub(crate) fn slot_snapshot(&self, field: &str) -> (Presence, bool) {
        self.with_state(|state| {
            let slot = state
                .slots
                .get(field)
                .expect("slot must exist for schema field");
            (slot.presence.clone(), slot.dirty)
        })
    }

    pub(crate) fn force_slot(&self, field: &str, presence: Presence, dirty: bool) {
        self.with_state_mut(|state| {
            let slot = state
                .slots
                .get_mut(field)
                .expect("slot must exist for schema field");
            slot.presence = presence;
            slot.dirty = dirty;
        });
    }

    pub(crate) fn commit_saved(&self) {
        self.with_state_mut(|state| {
            state.status = Status::Saved;
            for slot in state.slots.values_mut() {
                slot.dirty = false;
            }
        });
    }

    pub(crate) fn mark_deleted(&self) {
        self.with_state_mut(|state| {
            state.status = Status::Deleted;
        });
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl Eq for Document {}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("stub", &self.inner.stub)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn attr_kind_name(value: &AttrValue) -> &'static str {
    match value {
        AttrValue::Value(_) => "scalar",
        AttrValue::Entity(_) | AttrValue::Nested(_) => "model value",
        AttrValue::Many(_) => "array",
    }
}

pub(crate) fn check_scalar(field: &str, kind: &FieldKind, value: &Value) -> Result<(), Error> {
    let matches = matches!(
        (kind, value),
        (FieldKind::Bool, Value::Bool(_))
            | (FieldKind::Int, Value::Int(_))
            | (FieldKind::Float, Value::Float(_))
            | (FieldKind::Text, Value::Text(_))
    );

    if matches {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            field,
            kind.kind_name(),
            value.kind_name(),
        ))
    }
}

fn field_value_to_record(
    value: &FieldValue,
    is_reference: bool,
    visited: &mut HashSet<usize>,
) -> RecordValue {
    match value {
        FieldValue::Scalar(scalar) => RecordValue::Scalar(scalar.clone()),
        FieldValue::Many(items) => RecordValue::Many(
            items
                .iter()
                .map(|item| field_value_to_record(item, is_reference, visited))
                .collect(),
        ),
        FieldValue::Entity(doc) => {
            if is_reference || visited.contains(&doc.addr()) {
                RecordValue::from(Record::new(doc.stub()))
            } else {
                RecordValue::from(doc.to_record_guarded(visited))
            }
        }
    }
}
