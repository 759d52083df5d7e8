//! Storage backends for task persistence.
//!
//! Backends implement the [`TaskStorage`] trait. The engine checkpoints every
//! step through it, so a backend must persist a full snapshot on each `save`
//! and hand back an identical instance from `find`.

pub mod memory;
pub mod models;

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::TaskResult;
use crate::task::{Model, ModelRef, TaskInstance};

pub use memory::InMemoryStorage;
pub use models::ModelRegistry;

/// A domain object loaded from a [`ModelRef`].
pub type LoadedModel = Arc<dyn Any + Send + Sync>;

/// Storage contract for task instances.
///
/// Implementations provide:
/// - Snapshot persistence with id assignment
/// - Queries for sleeping tasks and sub-tasks
/// - Deletion of expired tasks
/// - Conversion between domain objects and portable references
///
/// Storage does not lock instances; serial execution per instance is the
/// executor's concern.
///
/// Backend failures are reported as
/// [`TaskError::storage`](crate::error::TaskError::storage). A failed
/// checkpoint is returned to the caller as it is.
pub trait TaskStorage: Send + Sync + std::fmt::Debug {
    /// Persist a snapshot of `task`.
    ///
    /// Assigns an id if the task has none and sets `updated_at` to now.
    fn save(&self, task: &mut TaskInstance) -> TaskResult<()>;

    /// Load a task by id.
    fn find(&self, id: &str) -> TaskResult<Option<TaskInstance>>;

    /// Waiting tasks whose `wake_at` has passed, optionally of one type.
    fn sleeping_tasks(&self, task_type: Option<&str>) -> TaskResult<Vec<TaskInstance>>;

    /// Tasks whose parent is `task`.
    fn sub_tasks_of(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>>;

    /// Delete tasks with `delete_at <= before`, optionally of one type.
    ///
    /// Returns the number of tasks deleted.
    fn delete_old(&self, task_type: Option<&str>, before: DateTime<Utc>) -> TaskResult<usize>;

    /// Convert a domain object into a portable reference.
    fn serialise_model(&self, model: &dyn Model) -> ModelRef {
        ModelRef::of(model)
    }

    /// Load the domain object behind a reference.
    fn deserialise_model(&self, reference: &ModelRef) -> TaskResult<LoadedModel>;
}

impl<T: TaskStorage + ?Sized> TaskStorage for Arc<T> {
    fn save(&self, task: &mut TaskInstance) -> TaskResult<()> {
        (**self).save(task)
    }

    fn find(&self, id: &str) -> TaskResult<Option<TaskInstance>> {
        (**self).find(id)
    }

    fn sleeping_tasks(&self, task_type: Option<&str>) -> TaskResult<Vec<TaskInstance>> {
        (**self).sleeping_tasks(task_type)
    }

    fn sub_tasks_of(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        (**self).sub_tasks_of(task)
    }

    fn delete_old(&self, task_type: Option<&str>, before: DateTime<Utc>) -> TaskResult<usize> {
        (**self).delete_old(task_type, before)
    }

    fn serialise_model(&self, model: &dyn Model) -> ModelRef {
        (**self).serialise_model(model)
    }

    fn deserialise_model(&self, reference: &ModelRef) -> TaskResult<LoadedModel> {
        (**self).deserialise_model(reference)
    }
}
