//! Public facade for the docmap runtime.
//!
//! Re-exports the core surface and provides the `prelude` most
//! applications import wholesale.

pub use docmap_core::{document, error, hooks, model, record, selection, session, store, value};

pub use docmap_core::prelude;

pub use docmap_core::{
    document::{Attrs, AttrValue, Document, FieldValue, Presence, Status},
    error::Error,
    hooks::DocumentHook,
    model::{registry::Registry, FieldKind, ModelKind, ModelSchema},
    record::{Record, RecordStub},
    selection::FieldSelection,
    session::{Collection, Session},
    store::{MemoryStore, Store},
    value::Value,
};
