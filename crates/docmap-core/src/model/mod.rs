//! Runtime model definitions.
//!
//! Models here are runtime values, not derived types: the declaration
//! syntax that produces them is an external concern, so schemas are built
//! through `ModelSchema`'s fluent constructors and resolved against a
//! [`Registry`](registry::Registry) by name. Name resolution is lazy:
//! a field may target a model registered later, which is what lets model
//! graphs be cyclic.

pub mod registry;

use crate::error::SchemaError;
use indexmap::IndexMap;

/// Field names a schema may not declare: the wire identity keys plus the
/// construction-time `id` attribute.
pub const RESERVED_FIELDS: &[&str] = &["_type", "_id", "id"];

///
/// ModelKind
///
/// How instances of a model are persisted. `Document` models own a
/// collection and are independently addressable; `Subdocument` and
/// `Value` models live embedded in an owning document and cascade with
/// it. `Value` models are plain value objects with no part in the
/// lifecycle hook machinery.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModelKind {
    Document,
    Subdocument,
    Value,
}

impl ModelKind {
    #[must_use]
    pub const fn is_document(self) -> bool {
        matches!(self, Self::Document)
    }
}

///
/// FieldKind
///
/// Runtime type shape of one field. Entity-valued kinds carry the target
/// model's name; `Many` wraps the element kind for array fields.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Bool,
    Int,
    Float,
    Text,
    Embedded(String),
    Reference(String),
    Many(Box<FieldKind>),
}

impl FieldKind {
    #[must_use]
    pub fn embedded(target: impl Into<String>) -> Self {
        Self::Embedded(target.into())
    }

    #[must_use]
    pub fn reference(target: impl Into<String>) -> Self {
        Self::Reference(target.into())
    }

    /// Wrap this kind as an array of itself.
    #[must_use]
    pub fn many(self) -> Self {
        Self::Many(Box::new(self))
    }

    #[must_use]
    pub const fn is_many(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    /// The element kind for arrays; the kind itself otherwise.
    #[must_use]
    pub fn element(&self) -> &Self {
        match self {
            Self::Many(inner) => inner,
            other => other,
        }
    }

    /// Target model name for entity-valued kinds (through one array
    /// level).
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self.element() {
            Self::Embedded(name) | Self::Reference(name) => Some(name),
            _ => None,
        }
    }

    /// Whether the element kind holds another entity (embedded or
    /// referenced).
    #[must_use]
    pub fn is_entity(&self) -> bool {
        self.target().is_some()
    }

    /// Whether the element kind is a reference to an independently
    /// addressable document.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.element(), Self::Reference(_))
    }

    /// Stable label for diagnostics and mismatch errors.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Embedded(_) => "embedded model",
            Self::Reference(_) => "referenced model",
            Self::Many(_) => "array",
        }
    }
}

///
/// FieldModel
///
/// One declared field: name, runtime kind, and whether the field may be
/// cleared after being set.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldModel {
    name: String,
    kind: FieldKind,
    optional: bool,
}

impl FieldModel {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> &FieldKind {
        &self.kind
    }

    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.optional
    }
}

///
/// ModelSchema
///
/// A named, ordered field list plus the model's persistence kind.
/// Constructed through the fluent builder; field-name invariants are
/// checked at `build` time.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModelSchema {
    name: String,
    kind: ModelKind,
    fields: IndexMap<String, FieldModel>,
}

impl ModelSchema {
    /// Start a document model (own collection, independently addressable).
    #[must_use]
    pub fn document(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name.into(), ModelKind::Document)
    }

    /// Start a subdocument model (embedded persistence, owner-cascaded).
    #[must_use]
    pub fn subdocument(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name.into(), ModelKind::Subdocument)
    }

    /// Start a plain value model.
    #[must_use]
    pub fn value(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name.into(), ModelKind::Value)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        self.kind
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.get(name)
    }

    pub fn try_field(&self, name: &str) -> Result<&FieldModel, SchemaError> {
        self.fields.get(name).ok_or_else(|| SchemaError::UnknownField {
            model: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldModel> {
        self.fields.values()
    }

    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

///
/// ModelBuilder
///

#[derive(Debug)]
pub struct ModelBuilder {
    name: String,
    kind: ModelKind,
    fields: Vec<FieldModel>,
}

impl ModelBuilder {
    const fn new(name: String, kind: ModelKind) -> Self {
        Self {
            name,
            kind,
            fields: Vec::new(),
        }
    }

    /// Declare a required field.
    #[must_use]
    pub fn field(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, false)
    }

    /// Declare an optional field (may be cleared after being set).
    #[must_use]
    pub fn optional(self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.push(name.into(), kind, true)
    }

    fn push(mut self, name: String, kind: FieldKind, optional: bool) -> Self {
        self.fields.push(FieldModel {
            name,
            kind,
            optional,
        });
        self
    }

    /// Validate field-name invariants and produce the schema.
    pub fn build(self) -> Result<ModelSchema, SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyModelName);
        }

        let mut fields = IndexMap::with_capacity(self.fields.len());
        for field in self.fields {
            if field.name.is_empty() {
                return Err(SchemaError::EmptyFieldName {
                    model: self.name.clone(),
                });
            }
            if RESERVED_FIELDS.contains(&field.name.as_str()) {
                return Err(SchemaError::ReservedField {
                    field: field.name.clone(),
                });
            }
            if let FieldKind::Many(inner) = &field.kind {
                if inner.is_many() {
                    return Err(SchemaError::NestedArray {
                        model: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
            if fields.contains_key(&field.name) {
                return Err(SchemaError::DuplicateField {
                    model: self.name.clone(),
                    field: field.name,
                });
            }
            fields.insert(field.name.clone(), field);
        }

        Ok(ModelSchema {
            name: self.name,
            kind: self.kind,
            fields,
        })
    }
}

///
/// TESTS
///
