//! The task engine.
//!
//! [`Engine`] ties a [`TaskRegistry`] to one storage backend and one executor
//! and exposes the task lifecycle: construction, synchronous calls, deferred
//! starts, wake-ups, interactions, sub-task queries and the maintenance sweeps.
//!
//! The engine is cheap to clone and never locks task instances.

mod step;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;

use crate::backends::{InMemoryStorage, TaskStorage};
use crate::config::EngineConfig;
use crate::definition::{TaskDefinition, TaskRegistry};
use crate::error::{TaskError, TaskResult};
use crate::executor::{InlineExecutor, TaskExecutor};
use crate::logging::OpTimer;
use crate::task::{AttributeValue, Attributes, DataCarrier, TaskInstance, TaskStatus};

/// Whether a run may suspend in a wait state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Top-level runs; waits suspend the task.
    Background,
    /// Sub-tasks run inside a parent's handler; waits fail.
    Foreground,
}

/// Drives task instances through their state machines.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<TaskRegistry>,
    storage: Arc<dyn TaskStorage>,
    executor: Arc<dyn TaskExecutor>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the default configuration.
    pub fn new(
        registry: impl Into<Arc<TaskRegistry>>,
        storage: impl TaskStorage + 'static,
        executor: impl TaskExecutor + 'static,
    ) -> Self {
        Self {
            registry: registry.into(),
            storage: Arc::new(storage),
            executor: Arc::new(executor),
            config: EngineConfig::default(),
        }
    }

    /// In-memory storage with the inline executor.
    pub fn in_memory(registry: impl Into<Arc<TaskRegistry>>) -> Self {
        Self::new(registry, InMemoryStorage::new(), InlineExecutor)
    }

    /// Replace the engine configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registered task definitions.
    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The storage backend every checkpoint goes through.
    #[must_use]
    pub fn storage(&self) -> &dyn TaskStorage {
        &*self.storage
    }

    /// The executor used for wakes and deferred starts.
    #[must_use]
    pub fn executor(&self) -> &dyn TaskExecutor {
        &*self.executor
    }

    /// Engine-wide timing defaults.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Definition of a registered task type.
    pub fn definition(&self, task_type: &str) -> TaskResult<&TaskDefinition> {
        self.registry.get(task_type).map(AsRef::as_ref)
    }

    /// Load a task by id.
    pub fn find(&self, id: &str) -> TaskResult<Option<TaskInstance>> {
        self.storage.find(id)
    }

    /// Construct an unsaved, active instance at the initial state.
    ///
    /// Defaults are applied and attributes are validated against the
    /// definition's schema. `attributes` must be a JSON object or null.
    ///
    /// # Errors
    ///
    /// `UnknownTaskType`, `UnknownAttribute`, `MissingInputs` for absent
    /// required attributes, `Validation` for type mismatches and blank
    /// required strings.
    pub fn build(&self, task_type: &str, attributes: Value) -> TaskResult<TaskInstance> {
        let definition = self.definition(task_type)?;
        let attributes = prepare_attributes(definition, attributes)?;

        let mut task = TaskInstance::new(definition.name(), definition.initial_state(), attributes);
        task.timeout_at = Some(task.created_at + definition.execution_timeout(&self.config));
        task.delete_at = Some(task.created_at + definition.deletion_delay(&self.config));
        Ok(task)
    }

    /// Build a task and run it until it completes, fails or suspends.
    ///
    /// Use [`Engine::build`] and [`Engine::execute`] instead to keep hold of
    /// the instance when it fails.
    pub fn call(&self, task_type: &str, attributes: Value) -> TaskResult<TaskInstance> {
        let mut task = self.build(task_type, attributes)?;
        tracing::info!(task_type, "Calling task");
        self.executor.call(self, &mut task)?;
        Ok(task)
    }

    /// Run the execution loop on an active task. Anything else is left alone.
    pub fn execute(&self, task: &mut TaskInstance) -> TaskResult<()> {
        if !task.is_active() {
            tracing::debug!(task_id = %task.log_id(), status = %task.status, "Task not active, nothing to run");
            return Ok(());
        }
        self.run(task, RunMode::Background)
    }

    /// Resume a task: divert to the timeout path if its timeout has passed,
    /// otherwise reactivate it and run the loop.
    ///
    /// Completed and failed tasks are left untouched.
    pub fn resume(&self, task: &mut TaskInstance) -> TaskResult<()> {
        if task.is_terminal() {
            tracing::debug!(task_id = %task.log_id(), status = %task.status, "Task already finished");
            return Ok(());
        }
        if task.is_timed_out(Utc::now()) {
            return self.time_out(task);
        }

        tracing::info!(
            task_id = %task.log_id(),
            task_type = %task.task_type,
            state = %task.current_state,
            "Waking task"
        );
        task.status = TaskStatus::Active;
        task.wake_at = None;
        self.run(task, RunMode::Background)
    }

    /// Wake a task through the executor.
    pub fn wake(&self, task: &mut TaskInstance) -> TaskResult<()> {
        if task.is_terminal() {
            return Ok(());
        }
        self.executor.wake(self, task)
    }

    /// Persist a waiting task due now and hand it to the executor.
    pub fn start(&self, task_type: &str, attributes: Value) -> TaskResult<TaskInstance> {
        self.later(task_type, attributes, Duration::zero())
    }

    /// Persist a waiting task due after `delay` and hand it to the executor.
    pub fn later(&self, task_type: &str, attributes: Value, delay: Duration) -> TaskResult<TaskInstance> {
        self.schedule(None, task_type, attributes, delay)
    }

    fn schedule(
        &self,
        parent_id: Option<&str>,
        task_type: &str,
        attributes: Value,
        delay: Duration,
    ) -> TaskResult<TaskInstance> {
        let mut task = self.build(task_type, attributes)?;
        task.parent_task_id = parent_id.map(ToString::to_string);
        task.suspend_until(Utc::now() + delay);
        self.storage.save(&mut task)?;

        tracing::info!(
            task_id = %task.log_id(),
            task_type,
            parent_task_id = ?task.parent_task_id,
            "Task scheduled"
        );
        self.executor.later(self, &mut task)?;
        Ok(task)
    }

    /// Run a sub-task synchronously inside a parent's handler.
    pub(crate) fn call_sub_task(
        &self,
        parent_id: Option<&str>,
        task_type: &str,
        attributes: Value,
    ) -> TaskResult<TaskInstance> {
        let mut child = self.build(task_type, attributes)?;
        child.parent_task_id = parent_id.map(ToString::to_string);
        tracing::debug!(task_type, parent_task_id = ?parent_id, "Calling sub-task");

        self.run(&mut child, RunMode::Foreground)
            .map_err(|source| TaskError::SubTaskFailed {
                task_type: task_type.to_string(),
                source: Box::new(source),
            })?;
        Ok(child)
    }

    /// Schedule a sub-task without waiting for it.
    pub(crate) fn start_sub_task(
        &self,
        parent_id: Option<&str>,
        task_type: &str,
        attributes: Value,
    ) -> TaskResult<TaskInstance> {
        self.schedule(parent_id, task_type, attributes, Duration::zero())
    }

    /// Invoke a named interaction on a task.
    ///
    /// The interaction's state guard is checked first; on success its body
    /// runs, the task is saved, and a waiting task is woken.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the interaction does not exist, the task is
    /// finished, or the current state is not legal for it. Attributes are
    /// left unchanged on any error.
    pub fn interact(&self, task: &mut TaskInstance, name: &str, args: Value) -> TaskResult<()> {
        let definition = self.definition(&task.task_type)?;
        let handler = definition.interaction(name).ok_or_else(|| {
            TaskError::invalid_state(format!("{} has no interaction named {name}", task.task_type))
        })?;
        if task.is_terminal() {
            return Err(TaskError::invalid_state(format!(
                "Cannot call {name} on a {} task",
                task.status
            )));
        }

        let mut carrier = DataCarrier::new(self, definition, task, RunMode::Background);
        handler.invoke(name, &mut carrier, &args)?;
        let (attributes, outcome) = carrier.into_parts();
        if let Some(outcome) = outcome {
            self.apply_outcome(definition, task, outcome)?;
        }
        task.attributes = attributes;
        self.storage.save(task)?;

        tracing::info!(
            task_id = %task.log_id(),
            interaction = name,
            state = %task.current_state,
            "Interaction applied"
        );

        if task.is_waiting() {
            self.wake(task)?;
        }
        Ok(())
    }

    /// All sub-tasks of `task`.
    pub fn sub_tasks(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        self.storage.sub_tasks_of(task)
    }

    /// Sub-tasks of `task` that are running.
    pub fn active_sub_tasks(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        self.sub_tasks_with(task, TaskStatus::Active)
    }

    /// Sub-tasks of `task` that are suspended.
    pub fn waiting_sub_tasks(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        self.sub_tasks_with(task, TaskStatus::Waiting)
    }

    /// Sub-tasks of `task` that completed.
    pub fn completed_sub_tasks(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        self.sub_tasks_with(task, TaskStatus::Completed)
    }

    /// Sub-tasks of `task` that failed.
    pub fn failed_sub_tasks(&self, task: &TaskInstance) -> TaskResult<Vec<TaskInstance>> {
        self.sub_tasks_with(task, TaskStatus::Failed)
    }

    fn sub_tasks_with(&self, task: &TaskInstance, status: TaskStatus) -> TaskResult<Vec<TaskInstance>> {
        let mut tasks = self.sub_tasks(task)?;
        tasks.retain(|t| t.status == status);
        Ok(tasks)
    }

    /// Wake every due task, optionally of one type.
    ///
    /// A task that fails to wake is logged and skipped. Returns how many were
    /// woken without error.
    pub fn wake_sleeping(&self, task_type: Option<&str>) -> TaskResult<usize> {
        let timer = OpTimer::new("sweep", "wake_sleeping");
        let mut woken = 0;
        for mut task in self.storage.sleeping_tasks(task_type)? {
            match self.wake(&mut task) {
                Ok(()) => woken += 1,
                Err(err) => tracing::warn!(
                    task_id = %task.log_id(),
                    task_type = %task.task_type,
                    error = %err,
                    "Failed to wake task"
                ),
            }
        }
        timer.finish_with_count(woken);
        Ok(woken)
    }

    /// Delete every task whose retention period has passed.
    pub fn delete_expired(&self, task_type: Option<&str>) -> TaskResult<usize> {
        let timer = OpTimer::new("sweep", "delete_expired");
        let result = self.storage.delete_old(task_type, Utc::now());
        timer.finish_with_result(result.as_ref());
        result
    }

    /// Run the single handler for `state` on a fresh, unsaved instance.
    ///
    /// Nothing is persisted and the loop does not continue past the handler,
    /// which makes this suitable for unit testing one state at a time.
    pub fn run_handler(&self, task_type: &str, state: &str, attributes: Value) -> TaskResult<TaskInstance> {
        let definition = self.definition(task_type)?;
        if !definition.has_state(state) {
            return Err(TaskError::invalid_state(format!("{task_type} has no state {state}")));
        }
        let mut task = self.build(task_type, attributes)?;
        task.current_state = state.to_string();
        self.step(definition, &mut task, RunMode::Background)?;
        Ok(task)
    }
}

/// Apply defaults and validate construction attributes against the schema.
fn prepare_attributes(definition: &TaskDefinition, supplied: Value) -> TaskResult<Attributes> {
    let mut supplied = match supplied {
        Value::Null => serde_json::Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(TaskError::Validation(format!(
                "task attributes must be an object, got {other}"
            )))
        }
    };

    if let Some(unknown) = supplied.keys().find(|key| definition.attribute(key).is_none()) {
        return Err(TaskError::UnknownAttribute {
            task_type: definition.name().to_string(),
            name: unknown.clone(),
        });
    }

    let mut attributes = Attributes::new();
    let mut missing = Vec::new();
    for spec in definition.attributes() {
        let value = supplied
            .remove(&spec.name)
            .filter(|v| !v.is_null())
            .or_else(|| spec.default.clone());

        let Some(value) = value else {
            if spec.required {
                missing.push(spec.name.clone());
            }
            continue;
        };

        let value = AttributeValue::from(value);
        spec.check(&value)?;
        if spec.required && matches!(&value, AttributeValue::Scalar(Value::String(s)) if s.trim().is_empty()) {
            return Err(TaskError::Validation(format!("{} is required", spec.name)));
        }
        attributes.insert(spec.name.clone(), value);
    }

    if missing.is_empty() {
        Ok(attributes)
    } else {
        Err(TaskError::MissingInputs { names: missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AttributeSpec;
    use serde_json::json;

    fn engine() -> Engine {
        let definition = TaskDefinition::builder("Profile")
            .attribute(AttributeSpec::string("name").required())
            .attribute(AttributeSpec::integer("age").with_default(30))
            .attribute(AttributeSpec::json("tags"))
            .result("start")
            .build()
            .unwrap();
        Engine::in_memory(TaskRegistry::new().with(definition).unwrap())
    }

    #[test]
    fn test_build_applies_defaults() {
        let task = engine().build("Profile", json!({"name": "Ada"})).unwrap();
        assert!(task.is_active());
        assert!(task.is_in("start"));
        assert_eq!(task.attribute("age"), Some(json!(30)));
        assert_eq!(task.attribute("tags"), None);
        assert!(task.timeout_at.unwrap() > task.created_at);
        assert!(task.delete_at.unwrap() > task.timeout_at.unwrap());
    }

    #[test]
    fn test_build_reports_missing_inputs() {
        let err = engine().build("Profile", json!({})).unwrap_err();
        assert!(matches!(err, TaskError::MissingInputs { ref names } if names == &["name"]));
    }

    #[test]
    fn test_build_rejects_blank_required_string() {
        let err = engine().build("Profile", json!({"name": "  "})).unwrap_err();
        assert_eq!(err.to_string(), "name is required");
    }

    #[test]
    fn test_build_rejects_unknown_attribute() {
        let err = engine()
            .build("Profile", json!({"name": "Ada", "shoe_size": 9}))
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownAttribute { ref name, .. } if name == "shoe_size"));
    }

    #[test]
    fn test_build_rejects_wrong_kind() {
        let err = engine()
            .build("Profile", json!({"name": "Ada", "age": "old"}))
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[test]
    fn test_build_rejects_unknown_type() {
        let err = engine().build("Nope", Value::Null).unwrap_err();
        assert!(matches!(err, TaskError::UnknownTaskType(_)));
    }

    #[test]
    fn test_definition_timing_overrides_config() {
        let definition = TaskDefinition::builder("Quick")
            .timeout(Duration::seconds(5))
            .result("start")
            .build()
            .unwrap();
        let engine = Engine::in_memory(TaskRegistry::new().with(definition).unwrap());
        let task = engine.build("Quick", Value::Null).unwrap();
        assert_eq!(task.timeout_at.unwrap() - task.created_at, Duration::seconds(5));
        assert_eq!(
            task.delete_at.unwrap() - task.created_at,
            Duration::seconds(7_776_000)
        );
    }
}
