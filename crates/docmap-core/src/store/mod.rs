pub mod memory;

pub use memory::MemoryStore;

use crate::{
    error::Error,
    record::{Record, RecordPatch, RecordStub},
    selection::FieldSelection,
    value::Value,
};
use async_trait::async_trait;
use indexmap::IndexMap;

///
/// Store
///
/// The contract a persistence backend implements. Every operation is
/// keyed by a validated `(type, id)` identity and may suspend; a
/// backend must honor field selections recursively, cascade identified
/// nested writes, and treat a single record's `set` as all-or-nothing
/// from the caller's perspective. No retry is performed at this layer;
/// a network-backed implementation owns its own retry policy.
///

#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one record, shaped by `selection`. `None` means the record
    /// does not exist; absence of a field from the result means the
    /// field was not fetched or is not set.
    async fn get(
        &self,
        stub: &RecordStub,
        selection: &FieldSelection,
    ) -> Result<Option<Record>, Error>;

    /// Apply one record's field changes. `is_new` on an existing id is
    /// `AlreadyExists`; an update against a missing id is `NotFound`.
    /// Nested identified values cascade before the owner stores their
    /// stubs.
    async fn set(&self, patch: RecordPatch) -> Result<(), Error>;

    /// Remove one record, first cascading through `cascades` whether or
    /// not the root exists. A missing root is a no-op that still
    /// reports the cascaded removals.
    async fn delete(
        &self,
        stub: &RecordStub,
        cascades: &[DeleteTarget],
    ) -> Result<DeleteOutcome, Error>;

    /// Enumerate a collection: exact-match conjunction over stored
    /// scalar field values, then skip/limit, in insertion order, each
    /// result shaped by the query's selection.
    async fn find(&self, type_name: &str, query: &FindQuery) -> Result<Vec<Record>, Error>;
}

///
/// FindQuery
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindQuery {
    filter: IndexMap<String, Value>,
    skip: Option<usize>,
    limit: Option<usize>,
    selection: Option<FieldSelection>,
}

impl FindQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    #[must_use]
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn selection(mut self, selection: FieldSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.filter.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub const fn skip_count(&self) -> usize {
        match self.skip {
            Some(n) => n,
            None => 0,
        }
    }

    #[must_use]
    pub const fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    /// The selection each matched record is resolved with (everything by
    /// default).
    #[must_use]
    pub fn record_selection(&self) -> &FieldSelection {
        self.selection.as_ref().unwrap_or(&crate::selection::ALL)
    }
}

///
/// DeleteTarget
///
/// One node of the cascade tree passed alongside a delete: the record to
/// remove plus the identified values embedded in it, removed depth-first
/// through the same protocol.
///

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteTarget {
    stub: RecordStub,
    children: Vec<DeleteTarget>,
}

impl DeleteTarget {
    #[must_use]
    pub const fn new(stub: RecordStub) -> Self {
        Self {
            stub,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_children(stub: RecordStub, children: Vec<Self>) -> Self {
        Self { stub, children }
    }

    #[must_use]
    pub const fn stub(&self) -> &RecordStub {
        &self.stub
    }

    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }
}

///
/// DeleteOutcome
///
/// What a delete removed. `removed` is `None` when the root record did
/// not exist (the operation is still a success, and `cascaded` still
/// lists the stubs removed on the way).
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteOutcome {
    pub removed: Option<RecordStub>,
    pub cascaded: Vec<RecordStub>,
}

impl DeleteOutcome {
    /// Whether the operation removed anything at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_none() && self.cascaded.is_empty()
    }
}
