//! Core runtime for docmap: model schemas, live identity-mapped document
//! instances, field selections, the store protocol, and the reference
//! in-memory backend.
//!
//! Application code binds a [`model::registry::Registry`] of schemas and a
//! [`store::Store`] into a root [`session::Session`], forks it per
//! logical scope, and works with [`document::Document`] instances through
//! [`session::Collection`] handles. Within one session an identity is
//! never represented by more than one live instance; partial fetches
//! merge into that instance without clobbering what is already known.

mod codec;

pub mod document;
pub mod error;
pub mod hooks;
pub mod model;
pub mod record;
pub mod selection;
pub mod session;
pub mod store;
pub mod value;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, stores, or wire shapes are re-exported here.
///

pub mod prelude {
    pub use crate::{
        document::{Attrs, AttrValue, Document, FieldValue, Presence, Status},
        model::{registry::Registry, FieldKind, ModelKind, ModelSchema},
        selection::FieldSelection,
        session::{Collection, Session},
        value::Value,
    };
}
