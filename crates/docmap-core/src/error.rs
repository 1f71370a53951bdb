use thiserror::Error as ThisError;

///
/// IdentityError
///
/// Violations of the record-identity contract: both components of a
/// `(type, id)` pair must be non-empty.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum IdentityError {
    #[error("record type cannot be empty")]
    EmptyType,

    #[error("record id cannot be empty")]
    EmptyId,
}

///
/// SchemaError
///
/// Schema construction and resolution failures. Raised when a model is
/// built with an invalid field set, or when a name bound lazily at
/// declaration time fails to resolve against the registry.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SchemaError {
    #[error("model '{name}' is already registered")]
    DuplicateModel { name: String },

    #[error("model '{model}' declares field '{field}' more than once")]
    DuplicateField { model: String, field: String },

    #[error("field name '{field}' is reserved")]
    ReservedField { field: String },

    #[error("model name cannot be empty")]
    EmptyModelName,

    #[error("field name cannot be empty (model: '{model}')")]
    EmptyFieldName { model: String },

    #[error("field '{field}' on model '{model}' nests an array inside an array")]
    NestedArray { model: String, field: String },

    #[error("unknown model: '{name}'")]
    UnknownModel { name: String },

    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },

    #[error("field '{field}' on model '{model}' references '{target}', which is not a document model")]
    ReferenceTargetNotDocument {
        model: String,
        field: String,
        target: String,
    },

    #[error("field '{field}' on model '{model}' embeds '{target}', which is a document model")]
    EmbeddedTargetIsDocument {
        model: String,
        field: String,
        target: String,
    },

    #[error("model '{name}' is not a document model")]
    NotADocument { name: String },
}

///
/// Error
///
/// Crate-level error surface. Fine-grained module errors convert in via
/// `From`; the remaining variants are the operational contract failures a
/// caller is expected to match on.
///

#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum Error {
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("invalid value (field: '{field}'): {message}")]
    InvalidValue { field: String, message: String },

    #[error("type mismatch (field: '{field}', expected: {expected}, found: {found})")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("record not found (collection: '{type_name}', id: '{id}')")]
    NotFound { type_name: String, id: String },

    #[error("record already exists (collection: '{type_name}', id: '{id}')")]
    AlreadyExists { type_name: String, id: String },

    #[error("instance already deleted (collection: '{type_name}', id: '{id}')")]
    AlreadyDeleted { type_name: String, id: String },

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("session has been dropped")]
    SessionClosed,
}

impl Error {
    /// Construct an `InvalidValue` error for a named field.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Construct a `TypeMismatch` error for a named field.
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: &'static str,
        found: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            found,
        }
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

///
/// TESTS
///
