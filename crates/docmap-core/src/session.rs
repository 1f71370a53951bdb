use crate::{
    codec,
    document::{Attrs, Document},
    error::{Error, SchemaError},
    hooks::LifecycleEvent,
    model::{registry::Registry, ModelSchema},
    record::RecordStub,
    selection::FieldSelection,
    store::{FindQuery, Store},
    value::Value,
};
use derive_more::{Deref, DerefMut};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};
use tracing::debug;

///
/// Session
///
/// An isolated scope binding the shared model registry and store to a
/// private identity map. Forks share durable state but no cached
/// instances, so each fork sees the same records as fresh instances.
/// This is the cache-isolation model for independent request-handling
/// contexts.
///

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build the root session. The registry is validated here; every
    /// lazily bound field target must resolve.
    pub fn root(registry: Registry, store: Arc<dyn Store>) -> Result<Self, Error> {
        registry.validate()?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                registry: Arc::new(registry),
                store,
                identity: RwLock::new(IdentityMap::default()),
            }),
        })
    }

    /// Create a child scope: same registry and store, empty identity
    /// map.
    #[must_use]
    pub fn fork(&self) -> Self {
        debug!(target: "docmap", "fork session");

        Self {
            inner: Arc::new(SessionInner {
                registry: self.inner.registry.clone(),
                store: self.inner.store.clone(),
                identity: RwLock::new(IdentityMap::default()),
            }),
        }
    }

    /// Handle for one document model's collection. Only document models
    /// are independently addressable.
    pub fn collection(&self, model: &str) -> Result<Collection, Error> {
        let schema = self.inner.registry.try_get(model)?;
        if !schema.kind().is_document() {
            return Err(SchemaError::NotADocument {
                name: model.to_string(),
            }
            .into());
        }

        Ok(Collection {
            session: self.clone(),
            schema,
        })
    }

    /// The live instance cached for an identity, if any. Pure map
    /// lookup: nothing is fetched or allocated.
    #[must_use]
    pub fn cached(&self, model: &str, id: &str) -> Option<Document> {
        self.inner.lookup(model, id)
    }

    /// Number of live instances currently cached in this session.
    #[must_use]
    pub fn cached_instances(&self) -> usize {
        self.inner.identity_len()
    }
}

///
/// SessionInner
///

pub(crate) struct SessionInner {
    registry: Arc<Registry>,
    store: Arc<dyn Store>,
    identity: RwLock<IdentityMap>,
}

#[derive(Default, Deref, DerefMut)]
struct IdentityMap(HashMap<(String, String), Document>);

impl SessionInner {
    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    fn identity_len(&self) -> usize {
        self.identity
            .read()
            .expect("identity map lock poisoned")
            .len()
    }

    pub(crate) fn lookup(&self, type_name: &str, id: &str) -> Option<Document> {
        self.identity
            .read()
            .expect("identity map lock poisoned")
            .get(&(type_name.to_string(), id.to_string()))
            .cloned()
    }

    /// Register an instance materialized from storage. Registration is
    /// synchronous with respect to the fetch that follows it, so
    /// concurrent lookups of the same identity share one instance.
    pub(crate) fn register(&self, doc: &Document) {
        self.identity
            .write()
            .expect("identity map lock poisoned")
            .insert(doc.stub().key(), doc.clone());
    }

    /// Register a freshly constructed instance; the identity must not be
    /// live already.
    pub(crate) fn register_new(&self, doc: &Document) -> Result<(), Error> {
        let mut identity = self.identity.write().expect("identity map lock poisoned");
        let key = doc.stub().key();

        if identity.contains_key(&key) {
            return Err(Error::AlreadyExists {
                type_name: doc.model_name().to_string(),
                id: doc.id().to_string(),
            });
        }
        identity.insert(key, doc.clone());

        Ok(())
    }

    pub(crate) fn unregister(&self, doc: &Document) {
        self.identity
            .write()
            .expect("identity map lock poisoned")
            .remove(&doc.stub().key());
    }

    pub(crate) async fn dispatch_hooks(
        &self,
        event: LifecycleEvent,
        doc: &Document,
    ) -> Result<(), Error> {
        match self.registry.hooks_for(doc.model_name()) {
            Some(chain) => chain.dispatch(event, doc).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn fire_after_load(&self, docs: &[Document]) -> Result<(), Error> {
        for doc in docs {
            self.dispatch_hooks(LifecycleEvent::AfterLoad, doc).await?;
        }
        Ok(())
    }
}

///
/// Collection
///
/// Scoped handle for one document model: construction, identity-mapped
/// fetches, and enumeration.
///

#[derive(Clone)]
pub struct Collection {
    session: Session,
    schema: Arc<ModelSchema>,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("model", &self.schema.name())
            .finish_non_exhaustive()
    }
}

impl Collection {
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    /// Construct and register a new instance. The reserved `id`
    /// attribute supplies the identity; omitted, one is generated.
    pub fn create(&self, attrs: Attrs) -> Result<Document, Error> {
        Document::construct(&self.session.inner, self.schema.clone(), attrs)
    }

    /// Fetch by id, failing with `NotFound` when missing.
    pub async fn get(&self, id: &str) -> Result<Document, Error> {
        self.fetch(id, &FieldSelection::All).await
    }

    /// Fetch a partial field set by id.
    pub async fn get_with(&self, id: &str, selection: &FieldSelection) -> Result<Document, Error> {
        self.fetch(id, selection).await
    }

    /// Fetch by id, resolving a missing record to `None`.
    pub async fn try_get(&self, id: &str) -> Result<Option<Document>, Error> {
        self.try_fetch(id, &FieldSelection::All).await
    }

    pub async fn try_get_with(
        &self,
        id: &str,
        selection: &FieldSelection,
    ) -> Result<Option<Document>, Error> {
        self.try_fetch(id, selection).await
    }

    /// Start a fluent enumeration of this collection.
    #[must_use]
    pub fn find(&self) -> FindBuilder<'_> {
        FindBuilder {
            collection: self,
            query: FindQuery::new(),
        }
    }

    async fn try_fetch(
        &self,
        id: &str,
        selection: &FieldSelection,
    ) -> Result<Option<Document>, Error> {
        match self.fetch(id, selection).await {
            Ok(doc) => Ok(Some(doc)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn fetch(&self, id: &str, selection: &FieldSelection) -> Result<Document, Error> {
        let inner = &self.session.inner;
        let stub = RecordStub::try_new(self.schema.name(), id)?;

        // An already-cached instance widens its loaded field set; only
        // newly targeted fields are fetched and merged.
        if let Some(doc) = inner.lookup(stub.type_name(), stub.id()) {
            doc.load_with(selection).await?;
            return Ok(doc);
        }

        // Register before the fetch suspends, so a concurrent lookup of
        // the same identity lands on this instance instead of racing a
        // second one into the map.
        let doc = Document::materialize(inner, self.schema.clone(), stub.clone());

        match inner.store().get(&stub, selection).await {
            Ok(Some(record)) => {
                let nested = match codec::merge(inner, &doc, &record, selection) {
                    Ok(nested) => nested,
                    Err(err) => {
                        inner.unregister(&doc);
                        return Err(err);
                    }
                };

                let mut fresh = Vec::with_capacity(1 + nested.len());
                fresh.push(doc.clone());
                fresh.extend(nested);
                inner.fire_after_load(&fresh).await?;

                Ok(doc)
            }
            Ok(None) => {
                inner.unregister(&doc);
                Err(Error::NotFound {
                    type_name: self.schema.name().to_string(),
                    id: id.to_string(),
                })
            }
            Err(err) => {
                inner.unregister(&doc);
                Err(err)
            }
        }
    }
}

///
/// FindBuilder
///

#[must_use]
pub struct FindBuilder<'a> {
    collection: &'a Collection,
    query: FindQuery,
}

impl FindBuilder<'_> {
    /// Require `field` to equal `value` (exact-match conjunction).
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query = self.query.filter_eq(field, value);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.query = self.query.skip(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    /// Shape each result with a field selection.
    pub fn fields(mut self, selection: FieldSelection) -> Self {
        self.query = self.query.selection(selection);
        self
    }

    /// Run the enumeration, resolving each matched record through the
    /// identity map exactly as `get` does.
    pub async fn fetch(self) -> Result<Vec<Document>, Error> {
        let inner = &self.collection.session.inner;
        debug!(target: "docmap", model = self.collection.schema.name(), "find");

        let records = inner
            .store()
            .find(self.collection.schema.name(), &self.query)
            .await?;
        let selection = self.query.record_selection().clone();

        let mut docs = Vec::with_capacity(records.len());
        let mut fresh = Vec::new();

        for record in &records {
            let doc = match inner.lookup(record.type_name(), record.id()) {
                Some(existing) => existing,
                None => {
                    let doc = Document::materialize(
                        inner,
                        self.collection.schema.clone(),
                        record.stub().clone(),
                    );
                    fresh.push(doc.clone());
                    doc
                }
            };

            fresh.extend(codec::merge(inner, &doc, record, &selection)?);
            docs.push(doc);
        }

        inner.fire_after_load(&fresh).await?;

        Ok(docs)
    }
}
