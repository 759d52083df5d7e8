//! The per-invocation view over a task's attributes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::attributes::{AttributeSpec, AttributeValue, Attributes, Model, ModelRef, Results};
use super::TaskInstance;
use crate::definition::TaskDefinition;
use crate::engine::{Engine, RunMode};
use crate::error::{TaskError, TaskResult};

/// What a handler asked the loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    GoTo(String),
    Complete(Results),
}

/// Mutable view over one task instance, passed into handler bodies.
///
/// A carrier is materialised from the instance before a handler runs and its
/// attributes are flushed back afterwards. It never saves the instance itself;
/// only [`DataCarrier::call`] and [`DataCarrier::start`] reach storage, and
/// they do so for the sub-task.
pub struct DataCarrier<'a> {
    engine: &'a Engine,
    definition: &'a TaskDefinition,
    task_id: Option<String>,
    current_state: String,
    attributes: Attributes,
    outcome: Option<Outcome>,
    mode: RunMode,
}

impl<'a> DataCarrier<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        definition: &'a TaskDefinition,
        task: &TaskInstance,
        mode: RunMode,
    ) -> Self {
        Self {
            engine,
            definition,
            task_id: task.id.clone(),
            current_state: task.current_state.clone(),
            attributes: task.attributes.clone(),
            outcome: None,
            mode,
        }
    }

    pub(crate) fn into_parts(self) -> (Attributes, Option<Outcome>) {
        (self.attributes, self.outcome)
    }

    pub(crate) fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }

    fn spec(&self, name: &str) -> TaskResult<&'a AttributeSpec> {
        self.definition
            .attribute(name)
            .ok_or_else(|| TaskError::UnknownAttribute {
                task_type: self.definition.name().to_string(),
                name: name.to_string(),
            })
    }

    /// Stored value, or the declared default when unset.
    fn resolved(&self, name: &str) -> TaskResult<Option<Value>> {
        let spec = self.spec(name)?;
        match self.attributes.get(name) {
            Some(value) if !value.is_null() => Ok(Some(value.to_json())),
            _ => Ok(spec.default.clone()),
        }
    }

    /// Read an attribute.
    ///
    /// # Errors
    ///
    /// `UnknownAttribute` for undeclared names, `MissingInputs` when the
    /// attribute is unset and has no default.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> TaskResult<T> {
        match self.resolved(name)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(TaskError::MissingInputs {
                names: vec![name.to_string()],
            }),
        }
    }

    /// Read an attribute that may be unset.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> TaskResult<Option<T>> {
        self.resolved(name)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(TaskError::from)
    }

    /// Set and non-blank.
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        match self.attributes.get(name) {
            None | Some(AttributeValue::Scalar(Value::Null)) => false,
            Some(AttributeValue::Scalar(Value::String(s))) => !s.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Stored value of an attribute, without defaults.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Write an attribute, type checked against its declaration.
    pub fn set(&mut self, name: &str, value: impl Serialize) -> TaskResult<()> {
        let value = AttributeValue::from_serialize(value)?;
        self.store(name, value)
    }

    fn store(&mut self, name: &str, value: AttributeValue) -> TaskResult<()> {
        self.spec(name)?.check(&value)?;
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Reference a domain object from an attribute.
    pub fn set_model(&mut self, name: &str, model: &dyn Model) -> TaskResult<()> {
        let reference = self.engine.storage().serialise_model(model);
        self.store(name, AttributeValue::Model(reference))
    }

    /// Reference a list of domain objects from an attribute.
    pub fn set_models(&mut self, name: &str, models: &[&dyn Model]) -> TaskResult<()> {
        let storage = self.engine.storage();
        let references: Vec<ModelRef> = models.iter().map(|m| storage.serialise_model(*m)).collect();
        let value = if references.is_empty() {
            AttributeValue::Scalar(Value::Array(Vec::new()))
        } else {
            AttributeValue::Models(references)
        };
        self.store(name, value)
    }

    /// Stored reference behind a model attribute, without loading it.
    #[must_use]
    pub fn model_ref(&self, name: &str) -> Option<&ModelRef> {
        match self.attributes.get(name) {
            Some(AttributeValue::Model(reference)) => Some(reference),
            _ => None,
        }
    }

    /// Load the domain object referenced by an attribute through the storage backend.
    pub fn model<M: Any + Send + Sync>(&self, name: &str) -> TaskResult<Option<Arc<M>>> {
        self.spec(name)?;
        match self.model_ref(name) {
            Some(reference) => self.load_model(reference).map(Some),
            None => Ok(None),
        }
    }

    /// Load every domain object referenced by a list attribute.
    pub fn models<M: Any + Send + Sync>(&self, name: &str) -> TaskResult<Vec<Arc<M>>> {
        self.spec(name)?;
        match self.attributes.get(name) {
            Some(AttributeValue::Models(references)) => references
                .iter()
                .map(|reference| self.load_model(reference))
                .collect(),
            Some(AttributeValue::Model(reference)) => Ok(vec![self.load_model(reference)?]),
            _ => Ok(Vec::new()),
        }
    }

    fn load_model<M: Any + Send + Sync>(&self, reference: &ModelRef) -> TaskResult<Arc<M>> {
        let loaded = self.engine.storage().deserialise_model(reference)?;
        match loaded.downcast::<M>() {
            Ok(model) => Ok(model),
            Err(_) => Err(TaskError::Validation(format!(
                "{reference} is not a {}",
                std::any::type_name::<M>()
            ))),
        }
    }

    /// Fail with `MissingInputs` naming every absent attribute.
    pub fn require_inputs(&self, names: &[&str]) -> TaskResult<()> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| !self.is_present(name))
            .map(|name| (*name).to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TaskError::MissingInputs { names: missing })
        }
    }

    /// Move to `state` once the handler returns.
    pub fn go_to(&mut self, state: impl Into<String>) {
        self.outcome = Some(Outcome::GoTo(state.into()));
    }

    /// Build a business failure for the handler to return.
    ///
    /// ```rust,ignore
    /// return Err(carrier.fail_with("card declined"));
    /// ```
    #[must_use]
    pub fn fail_with(&self, message: impl Into<String>) -> TaskError {
        TaskError::Failure {
            message: message.into(),
            task_id: self.task_id.clone(),
        }
    }

    /// Finish the task with `results` once the handler returns.
    pub fn complete(&mut self, results: Results) {
        self.outcome = Some(Outcome::Complete(results));
    }

    /// Run a sub-task to completion before continuing.
    ///
    /// The sub-task runs in the foreground, so it cannot wait. Any failure is
    /// returned as `SubTaskFailed`.
    pub fn call(&self, task_type: &str, attributes: Value) -> TaskResult<TaskInstance> {
        self.engine
            .call_sub_task(self.task_id.as_deref(), task_type, attributes)
    }

    /// Schedule a sub-task in the background and return without waiting for it.
    pub fn start(&self, task_type: &str, attributes: Value) -> TaskResult<TaskInstance> {
        self.engine
            .start_sub_task(self.task_id.as_deref(), task_type, attributes)
    }

    /// Id of the running task, once saved.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Type name of the running task.
    #[must_use]
    pub fn task_type(&self) -> &str {
        self.definition.name()
    }

    /// State the handler was invoked for.
    #[must_use]
    pub fn current_state(&self) -> &str {
        &self.current_state
    }

    /// Whether this run may suspend in a wait state.
    #[must_use]
    pub fn can_suspend(&self) -> bool {
        self.mode == RunMode::Background
    }

    /// The engine running this task.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        self.engine
    }
}

impl fmt::Debug for DataCarrier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCarrier")
            .field("task_type", &self.definition.name())
            .field("task_id", &self.task_id)
            .field("current_state", &self.current_state)
            .field("attributes", &self.attributes)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
