//! In-memory storage backend.

use std::any::Any;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{LoadedModel, ModelRegistry, TaskStorage};
use crate::error::TaskResult;
use crate::task::{ModelRef, TaskInstance};

/// In-memory task storage for tests and single-process use.
///
/// Snapshots are kept as serialised JSON, so every `find` goes through the
/// same round trip a persistent backend would. One mutex guards the table.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tasks: Mutex<HashMap<String, String>>,
    models: RwLock<ModelRegistry>,
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to load models of `model_type`.
    pub fn register_model<M, F>(&self, model_type: impl Into<String>, finder: F)
    where
        M: Any + Send + Sync,
        F: Fn(&str) -> Option<M> + Send + Sync + 'static,
    {
        self.models.write().register(model_type, finder);
    }

    /// Number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Every stored task matching `predicate`.
    fn select(&self, predicate: impl Fn(&TaskInstance) -> bool) -> TaskResult<Vec<TaskInstance>> {
        let tasks = self.tasks.lock();
        let mut selected = Vec::new();
        for snapshot in tasks.values() {
            let task: TaskInstance = serde_json::from_str(snapshot)?;
            if predicate(&task) {
                selected.push(task);
            }
        }
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(selected)
    }
}

fn type_matches(task: &TaskInstance, task_type: Option<&str>) -> bool {
    task_type.map_or(true, |t| task.task_type == t)
}

impl TaskStorage for InMemoryStorage {
    fn save(&self, task: &mut TaskInstance) -> TaskResult<()> {
        let id = task
            .id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        task.updated_at = Utc::now();
        let snapshot = serde_json::to_string(task)?;
        self.tasks.lock().insert(id, snapshot);
        Ok(())
    }

    fn find(&self, id: &str) -> TaskResult<Option<TaskInstance>> {
        let tasks = self.tasks.lock();
        tasks
            .get(id)
            .map(|snapshot| serde_json::from_str::<TaskInstance>(snapshot))
            .transpose()
            .map_err(Into::into)
    }

    fn sleeping_tasks(&self, task_type: Option<&str>) -> TaskResult<Vec<TaskInstance>> {
        let now = Utc::now();
        self.select(|task| {
            task.is_waiting()
                && task.wake_at.is_some_and(|at| at <= now)
                && type_matches(task, task_type)
        })
    }

    fn sub_tasks_of(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        let Some(parent_id) = task.id.as_deref() else {
            return Ok(Vec::new());
        };
        self.select(|child| child.parent_task_id.as_deref() == Some(parent_id))
    }

    fn delete_old(&self, task_type: Option<&str>, before: DateTime<Utc>) -> TaskResult<usize> {
        let mut tasks = self.tasks.lock();
        let mut expired = Vec::new();
        for (id, snapshot) in tasks.iter() {
            let task: TaskInstance = serde_json::from_str(snapshot)?;
            if task.delete_at.is_some_and(|at| at <= before) && type_matches(&task, task_type) {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            tasks.remove(id);
        }
        Ok(expired.len())
    }

    fn deserialise_model(&self, reference: &ModelRef) -> TaskResult<LoadedModel> {
        self.models.read().find(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Attributes;

    #[test]
    fn test_save_assigns_id() {
        let storage = InMemoryStorage::new();
        let mut task = TaskInstance::new("Greeter", "start", Attributes::new());
        assert!(task.id.is_none());

        storage.save(&mut task).unwrap();
        let id = task.id.clone().unwrap();
        assert_eq!(storage.len(), 1);

        storage.save(&mut task).unwrap();
        assert_eq!(task.id.as_deref(), Some(id.as_str()));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_find_returns_snapshot() {
        let storage = InMemoryStorage::new();
        let mut task = TaskInstance::new("Greeter", "start", Attributes::new());
        storage.save(&mut task).unwrap();

        let found = storage.find(task.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(found, task);
        assert!(storage.find("missing").unwrap().is_none());
    }

    #[test]
    fn test_float_attributes_survive_exactly() {
        let storage = InMemoryStorage::new();
        let mut task = TaskInstance::new("Checkout", "start", Attributes::new());
        for (name, price) in [("a", 985.690_694_632_869_5), ("b", 0.1 + 0.2), ("c", 1e-300)] {
            task.attributes
                .insert(name.to_string(), serde_json::Value::from(price).into());
        }
        storage.save(&mut task).unwrap();

        let found = storage.find(task.id.as_deref().unwrap()).unwrap().unwrap();
        assert_eq!(found, task);
        assert_eq!(found.attribute("a"), Some(serde_json::json!(985.690_694_632_869_5)));
    }

    #[test]
    fn test_delete_old_filters_by_type() {
        let storage = InMemoryStorage::new();
        let past = Utc::now() - chrono::Duration::seconds(10);

        for task_type in ["A", "A", "B"] {
            let mut task = TaskInstance::new(task_type, "start", Attributes::new());
            task.delete_at = Some(past);
            storage.save(&mut task).unwrap();
        }
        let mut fresh = TaskInstance::new("A", "start", Attributes::new());
        fresh.delete_at = Some(Utc::now() + chrono::Duration::days(1));
        storage.save(&mut fresh).unwrap();

        assert_eq!(storage.delete_old(Some("A"), Utc::now()).unwrap(), 2);
        assert_eq!(storage.delete_old(None, Utc::now()).unwrap(), 1);
        assert_eq!(storage.len(), 1);
    }
}
