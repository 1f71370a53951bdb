use crate::{document::Document, error::Error};
use async_trait::async_trait;
use std::sync::Arc;

///
/// LifecycleEvent
///
/// The five points at which a document's hook chain is dispatched.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleEvent {
    AfterLoad,
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

///
/// DocumentHook
///
/// One composable slice of lifecycle behavior. Hooks are registered per
/// model on the registry and dispatched in registration order, after the
/// base operation's own bookkeeping: explicit composition, not
/// inheritance. Every method defaults to a no-op so implementors override
/// only the events they care about.
///
/// A hook error aborts the operation it gates: a failing `before_save`
/// prevents the write.
///

#[async_trait]
pub trait DocumentHook: Send + Sync {
    async fn after_load(&self, doc: &Document) -> Result<(), Error> {
        let _ = doc;
        Ok(())
    }

    async fn before_save(&self, doc: &Document) -> Result<(), Error> {
        let _ = doc;
        Ok(())
    }

    async fn after_save(&self, doc: &Document) -> Result<(), Error> {
        let _ = doc;
        Ok(())
    }

    async fn before_delete(&self, doc: &Document) -> Result<(), Error> {
        let _ = doc;
        Ok(())
    }

    async fn after_delete(&self, doc: &Document) -> Result<(), Error> {
        let _ = doc;
        Ok(())
    }
}

///
/// HookChain
///
/// Ordered pipeline of hooks for one model. Dispatch runs every hook
/// exactly once per event, first-registered first, and stops at the
/// first error.
///

#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn DocumentHook>>,
}

impl HookChain {
    #[must_use]
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook to the end of the chain.
    pub fn add(&mut self, hook: Arc<dyn DocumentHook>) {
        self.hooks.push(hook);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) async fn dispatch(
        &self,
        event: LifecycleEvent,
        doc: &Document,
    ) -> Result<(), Error> {
        for hook in &self.hooks {
            match event {
                LifecycleEvent::AfterLoad => hook.after_load(doc).await?,
                LifecycleEvent::BeforeSave => hook.before_save(doc).await?,
                LifecycleEvent::AfterSave => hook.after_save(doc).await?,
                LifecycleEvent::BeforeDelete => hook.before_delete(doc).await?,
                LifecycleEvent::AfterDelete => hook.after_delete(doc).await?,
            }
        }

        Ok(())
    }
}
