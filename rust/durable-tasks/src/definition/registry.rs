//! Registry of task definitions, keyed by type name.

use std::collections::HashMap;
use std::sync::Arc;

use super::TaskDefinition;
use crate::error::{TaskError, TaskResult};

/// All task types known to an engine.
///
/// Filled once at startup and then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct TaskRegistry {
    definitions: HashMap<String, Arc<TaskDefinition>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Configuration` if the type name is already taken.
    pub fn register(&mut self, definition: TaskDefinition) -> TaskResult<()> {
        let name = definition.name().to_string();
        if self.definitions.contains_key(&name) {
            return Err(TaskError::Configuration(format!(
                "task type {name} registered twice"
            )));
        }
        tracing::debug!(task_type = %name, "Registered task type");
        self.definitions.insert(name, Arc::new(definition));
        Ok(())
    }

    /// Register a definition, builder style.
    pub fn with(mut self, definition: TaskDefinition) -> TaskResult<Self> {
        self.register(definition)?;
        Ok(self)
    }

    /// Look up a definition by type name.
    pub fn get(&self, name: &str) -> TaskResult<&Arc<TaskDefinition>> {
        self.definitions
            .get(name)
            .ok_or_else(|| TaskError::UnknownTaskType(name.to_string()))
    }

    /// Whether a definition named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Every registered definition, in no particular order.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<TaskDefinition>> {
        self.definitions.values()
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("definitions", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str) -> TaskDefinition {
        TaskDefinition::builder(name).result("start").build().unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let registry = TaskRegistry::new().with(definition("Greeter")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("Greeter"));
        assert_eq!(registry.get("Greeter").unwrap().name(), "Greeter");
    }

    #[test]
    fn test_unknown_type() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("Missing"),
            Err(TaskError::UnknownTaskType(name)) if name == "Missing"
        ));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = TaskRegistry::new();
        registry.register(definition("Greeter")).unwrap();
        let err = registry.register(definition("Greeter")).unwrap_err();
        assert!(matches!(err, TaskError::Configuration(_)));
    }
}
