//! Shared setup for integration tests.

use std::sync::Arc;

use durable_tasks::prelude::*;

/// Engine over a shared in-memory store with the inline executor.
pub fn setup(definitions: Vec<TaskDefinition>) -> (Engine, Arc<InMemoryStorage>) {
    durable_tasks::logging::init_tracing();

    let mut registry = TaskRegistry::new();
    for definition in definitions {
        registry.register(definition).unwrap();
    }
    let storage = Arc::new(InMemoryStorage::new());
    let engine = Engine::new(registry, Arc::clone(&storage), InlineExecutor);
    (engine, storage)
}
