use crate::{error::IdentityError, value::Value};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::fmt::{self, Display};

/// Reserved wire key carrying a record's type.
pub const TYPE_KEY: &str = "_type";

/// Reserved wire key carrying a record's id.
pub const ID_KEY: &str = "_id";

///
/// RecordStub
///
/// A validated `(type, id)` pair. The only way to obtain one is through
/// `try_new`, so every stub in circulation satisfies the non-empty
/// identity contract.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RecordStub {
    type_name: String,
    id: String,
}

impl RecordStub {
    /// Validate and construct a record identity.
    pub fn try_new(
        type_name: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<Self, IdentityError> {
        let type_name = type_name.into();
        let id = id.into();

        if type_name.is_empty() {
            return Err(IdentityError::EmptyType);
        }
        if id.is_empty() {
            return Err(IdentityError::EmptyId);
        }

        Ok(Self { type_name, id })
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Clone the identity into the `(type, id)` key shape used by
    /// identity maps.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.type_name.clone(), self.id.clone())
    }
}

impl Display for RecordStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.type_name, self.id)
    }
}

///
/// Record
///
/// The read shape a store returns: an identity plus the fields the
/// selection targeted. A record with no fields is the `{_type, _id}`
/// stub form. Field order is preserved.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    stub: RecordStub,
    fields: IndexMap<String, RecordValue>,
}

impl Record {
    #[must_use]
    pub fn new(stub: RecordStub) -> Self {
        Self {
            stub,
            fields: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn stub(&self) -> &RecordStub {
        &self.stub
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.stub.type_name()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.stub.id()
    }

    /// Whether this record carries identity only.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: RecordValue) {
        self.fields.insert(field.into(), value);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&RecordValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &RecordValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

///
/// RecordValue
///
/// One field position in a read record. Nested identified values appear
/// as `Doc` (inlined to whatever depth the selection reached); anonymous
/// embedded data appears as `Inline`.
///

#[derive(Clone, Debug, PartialEq)]
pub enum RecordValue {
    Scalar(Value),
    Many(Vec<RecordValue>),
    Inline(InlineValue),
    Doc(Box<Record>),
}

impl RecordValue {
    /// Stable label for diagnostics and mismatch errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Many(_) => "array",
            Self::Inline(_) => "inline value",
            Self::Doc(_) => "record",
        }
    }

    #[must_use]
    pub const fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_doc(&self) -> Option<&Record> {
        match self {
            Self::Doc(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Value> for RecordValue {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<Record> for RecordValue {
    fn from(r: Record) -> Self {
        Self::Doc(Box::new(r))
    }
}

///
/// InlineValue
///
/// Anonymous embedded data: an optional type tag plus fields, with no id
/// of its own. Stored and returned whole; selections cannot recurse into
/// it.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InlineValue {
    pub type_tag: Option<String>,
    pub fields: IndexMap<String, RecordValue>,
}

///
/// RecordPatch
///
/// The write shape a store consumes: an identity, whether the record is
/// being created, and an ordered set of field changes. Nested `Doc`
/// patches cascade per the store protocol before the owner stores their
/// stubs.
///

#[derive(Clone, Debug, PartialEq)]
pub struct RecordPatch {
    stub: RecordStub,
    is_new: bool,
    changes: IndexMap<String, FieldChange>,
}

impl RecordPatch {
    #[must_use]
    pub fn new(stub: RecordStub, is_new: bool) -> Self {
        Self {
            stub,
            is_new,
            changes: IndexMap::new(),
        }
    }

    #[must_use]
    pub const fn stub(&self) -> &RecordStub {
        &self.stub
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn push(&mut self, field: impl Into<String>, change: FieldChange) {
        self.changes.insert(field.into(), change);
    }

    /// Builder form of `push`.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, change: FieldChange) -> Self {
        self.push(field, change);
        self
    }

    pub fn changes(&self) -> impl Iterator<Item = (&str, &FieldChange)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Whether applying this patch writes anything to the target record
    /// (as opposed to its stub merely being referenced by an owner).
    #[must_use]
    pub fn writes(&self) -> bool {
        self.is_new || self.has_changes()
    }

    /// Decompose into identity, newness, and the ordered change set.
    #[must_use]
    pub fn into_parts(self) -> (RecordStub, bool, IndexMap<String, FieldChange>) {
        (self.stub, self.is_new, self.changes)
    }
}

///
/// FieldChange
///
/// A single field mutation. `Unset` removes the field from the stored
/// record; assigning no value is how a field is cleared.
///

#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    Set(PatchValue),
    Unset,
}

impl FieldChange {
    #[must_use]
    pub fn set(value: impl Into<PatchValue>) -> Self {
        Self::Set(value.into())
    }
}

///
/// PatchValue
///
/// One field position in a write patch. Mirrors `RecordValue`, with
/// nested writes expressed as full `RecordPatch` nodes.
///

#[derive(Clone, Debug, PartialEq)]
pub enum PatchValue {
    Scalar(Value),
    Many(Vec<PatchValue>),
    Inline(InlineValue),
    Doc(Box<RecordPatch>),
}

impl From<Value> for PatchValue {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<RecordPatch> for PatchValue {
    fn from(p: RecordPatch) -> Self {
        Self::Doc(Box::new(p))
    }
}

///
/// Wire serialization
///
/// Records serialize to the flat `{_type, _id, ...fields}` object, with
/// nested records inlined the same way at any depth.
///

impl Serialize for RecordStub {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(TYPE_KEY, self.type_name())?;
        map.serialize_entry(ID_KEY, self.id())?;
        map.end()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2 + self.fields.len()))?;
        map.serialize_entry(TYPE_KEY, self.type_name())?;
        map.serialize_entry(ID_KEY, self.id())?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for RecordValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Scalar(v) => v.serialize_wire(serializer),
            Self::Many(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Inline(inline) => inline.serialize(serializer),
            Self::Doc(record) => record.serialize(serializer),
        }
    }
}

impl Serialize for InlineValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.type_tag.is_some());
        let mut map = serializer.serialize_map(Some(extra + self.fields.len()))?;
        if let Some(tag) = &self.type_tag {
            map.serialize_entry(TYPE_KEY, tag)?;
        }
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Value {
    // Scalars serialize untagged on the wire; the derived form stays
    // available for typed interchange.
    fn serialize_wire<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stub(type_name: &str, id: &str) -> RecordStub {
        RecordStub::try_new(type_name, id).unwrap()
    }

    #[test]
    fn stub_rejects_empty_components() {
        assert!(matches!(
            RecordStub::try_new("", "m1"),
            Err(IdentityError::EmptyType)
        ));
        assert!(matches!(
            RecordStub::try_new("Movie", ""),
            Err(IdentityError::EmptyId)
        ));
    }

    #[test]
    fn empty_record_is_stub_form() {
        let record = Record::new(stub("Movie", "m1"));
        assert!(record.is_stub());
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"_type": "Movie", "_id": "m1"})
        );
    }

    #[test]
    fn record_serializes_flat_with_nested_docs() {
        let mut trailer = Record::new(stub("Trailer", "t1"));
        trailer.insert("url", RecordValue::Scalar(Value::from("https://example.org")));

        let mut movie = Record::new(stub("Movie", "m1"));
        movie.insert("title", RecordValue::Scalar(Value::from("Inception")));
        movie.insert("year", RecordValue::Scalar(Value::from(2010)));
        movie.insert("trailer", RecordValue::from(trailer));

        assert_eq!(
            serde_json::to_value(&movie).unwrap(),
            json!({
                "_type": "Movie",
                "_id": "m1",
                "title": "Inception",
                "year": 2010,
                "trailer": {"_type": "Trailer", "_id": "t1", "url": "https://example.org"},
            })
        );
    }

    #[test]
    fn arrays_serialize_as_sequences() {
        let mut movie = Record::new(stub("Movie", "m1"));
        movie.insert(
            "actors",
            RecordValue::Many(vec![
                RecordValue::from(Record::new(stub("Actor", "a1"))),
                RecordValue::from(Record::new(stub("Actor", "a2"))),
            ]),
        );

        assert_eq!(
            serde_json::to_value(&movie).unwrap(),
            json!({
                "_type": "Movie",
                "_id": "m1",
                "actors": [
                    {"_type": "Actor", "_id": "a1"},
                    {"_type": "Actor", "_id": "a2"},
                ],
            })
        );
    }

    #[test]
    fn patch_writes_predicate() {
        let empty = RecordPatch::new(stub("Movie", "m1"), false);
        assert!(!empty.writes());

        let fresh = RecordPatch::new(stub("Movie", "m1"), true);
        assert!(fresh.writes());

        let changed = RecordPatch::new(stub("Movie", "m1"), false)
            .with("title", FieldChange::set(Value::from("Inception")));
        assert!(changed.writes());
    }
}
