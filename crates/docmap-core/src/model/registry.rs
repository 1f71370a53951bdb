use crate::{
    error::SchemaError,
    hooks::{DocumentHook, HookChain},
    model::{FieldKind, ModelSchema},
};
use indexmap::IndexMap;
use std::{collections::HashMap, sync::Arc};

///
/// Registry
///
/// The set of model schemas a session family shares, plus each model's
/// hook chain. Field targets are stored by name and resolved lazily, so
/// mutually referencing models register in any order; `validate` is run
/// once at root-session construction to surface dangling or mis-kinded
/// targets.
///

#[derive(Default)]
pub struct Registry {
    models: IndexMap<String, Arc<ModelSchema>>,
    hooks: HashMap<String, HookChain>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one model schema.
    pub fn register(&mut self, schema: ModelSchema) -> Result<(), SchemaError> {
        if self.models.contains_key(schema.name()) {
            return Err(SchemaError::DuplicateModel {
                name: schema.name().to_string(),
            });
        }

        self.models
            .insert(schema.name().to_string(), Arc::new(schema));

        Ok(())
    }

    /// Append a hook to the named model's chain. Hooks compose in
    /// registration order.
    pub fn hook(
        &mut self,
        model: &str,
        hook: Arc<dyn DocumentHook>,
    ) -> Result<(), SchemaError> {
        if !self.models.contains_key(model) {
            return Err(SchemaError::UnknownModel {
                name: model.to_string(),
            });
        }

        self.hooks.entry(model.to_string()).or_default().add(hook);

        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<ModelSchema>> {
        self.models.get(name)
    }

    pub fn try_get(&self, name: &str) -> Result<Arc<ModelSchema>, SchemaError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownModel {
                name: name.to_string(),
            })
    }

    #[must_use]
    pub(crate) fn hooks_for(&self, model: &str) -> Option<&HookChain> {
        self.hooks.get(model)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.models.values()
    }

    /// Check every lazily bound field target: the model must exist, a
    /// reference must point at a document model, and an embedded target
    /// must not be one.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for schema in self.models.values() {
            for field in schema.fields() {
                let (target, is_reference) = match field.kind().element() {
                    FieldKind::Embedded(name) => (name, false),
                    FieldKind::Reference(name) => (name, true),
                    _ => continue,
                };

                let Some(bound) = self.models.get(target) else {
                    return Err(SchemaError::UnknownModel {
                        name: target.clone(),
                    });
                };

                if is_reference && !bound.kind().is_document() {
                    return Err(SchemaError::ReferenceTargetNotDocument {
                        model: schema.name().to_string(),
                        field: field.name().to_string(),
                        target: target.clone(),
                    });
                }
                if !is_reference && bound.kind().is_document() {
                    return Err(SchemaError::EmbeddedTargetIsDocument {
                        model: schema.name().to_string(),
                        field: field.name().to_string(),
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

///
/// TESTS
///
