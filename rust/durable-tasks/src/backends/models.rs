//! Lookup of domain objects by model type.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::LoadedModel;
use crate::error::{TaskError, TaskResult};
use crate::task::ModelRef;

type Finder = Arc<dyn Fn(&str) -> Option<LoadedModel> + Send + Sync>;

/// Finders that load application models by id, one per model type.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    finders: HashMap<String, Finder>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the finder for `model_type`, replacing any previous one.
    pub fn register<M, F>(&mut self, model_type: impl Into<String>, finder: F)
    where
        M: Any + Send + Sync,
        F: Fn(&str) -> Option<M> + Send + Sync + 'static,
    {
        let finder: Finder = Arc::new(move |id| finder(id).map(|m| Arc::new(m) as LoadedModel));
        self.finders.insert(model_type.into(), finder);
    }

    /// Load the model behind `reference`.
    ///
    /// # Errors
    ///
    /// `Configuration` when no finder is registered for the type,
    /// `ModelNotFound` when the finder returns nothing.
    pub fn find(&self, reference: &ModelRef) -> TaskResult<LoadedModel> {
        let finder = self.finders.get(&reference.model_type).ok_or_else(|| {
            TaskError::Configuration(format!(
                "no finder registered for model type {}",
                reference.model_type
            ))
        })?;
        finder(&reference.id).ok_or_else(|| TaskError::ModelNotFound {
            model_type: reference.model_type.clone(),
            id: reference.id.clone(),
        })
    }

    #[must_use]
    pub fn contains(&self, model_type: &str) -> bool {
        self.finders.contains_key(model_type)
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("model_types", &self.finders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct User {
        id: String,
    }

    #[test]
    fn test_find_registered_model() {
        let mut registry = ModelRegistry::new();
        registry.register("User", |id: &str| {
            (id == "1").then(|| User { id: id.to_string() })
        });

        let loaded = registry.find(&ModelRef::new("1", "User")).unwrap();
        let user = loaded.downcast::<User>().unwrap();
        assert_eq!(user.id, "1");
        assert!(registry.contains("User"));
    }

    #[test]
    fn test_missing_model() {
        let mut registry = ModelRegistry::new();
        registry.register("User", |_: &str| None::<User>);

        let err = registry.find(&ModelRef::new("9", "User")).unwrap_err();
        assert!(matches!(err, TaskError::ModelNotFound { .. }));

        let err = registry.find(&ModelRef::new("1", "Post")).unwrap_err();
        assert!(matches!(err, TaskError::Configuration(_)));
    }
}
