//! Builder for task definitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Duration;

use super::{TaskDefinition, DEFAULT_INITIAL_STATE};
use crate::error::{TaskError, TaskResult};
use crate::handlers::{
    ActionHandler, Callback, DecisionHandler, Handler, InteractionHandler, ResultHandler,
    StateHandler, WaitHandler,
};
use crate::task::{AttributeSpec, AttributeValue, DataCarrier, Results};

/// Describes a task type, one declaration at a time.
///
/// ```rust,ignore
/// let greeter = TaskDefinition::builder("Greeter")
///     .attribute(AttributeSpec::string("name").required())
///     .attribute(AttributeSpec::string("salutation").with_default("Hello"))
///     .attribute(AttributeSpec::string("greeting"))
///     .action("start", |c| {
///         let greeting = format!("{} {}!", c.get::<String>("salutation")?, c.get::<String>("name")?);
///         c.set("greeting", greeting)
///     })
///     .go_to("done")
///     .result("done")
///     .build()?;
/// ```
///
/// Mistakes are collected as they are made and reported together by
/// [`TaskDefinitionBuilder::build`].
pub struct TaskDefinitionBuilder {
    name: String,
    initial_state: Option<String>,
    attributes: Vec<AttributeSpec>,
    states: Vec<(String, StateHandler)>,
    interactions: Vec<(String, InteractionHandler)>,
    background_delay: Option<Duration>,
    execution_timeout: Option<Duration>,
    deletion_delay: Option<Duration>,
    on_timeout: Option<Callback>,
    last_action: Option<usize>,
    errors: Vec<String>,
}

impl TaskDefinitionBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_state: None,
            attributes: Vec::new(),
            states: Vec::new(),
            interactions: Vec::new(),
            background_delay: None,
            execution_timeout: None,
            deletion_delay: None,
            on_timeout: None,
            last_action: None,
            errors: Vec::new(),
        }
    }

    /// Declare an attribute.
    #[must_use]
    pub fn attribute(mut self, spec: AttributeSpec) -> Self {
        self.attributes.push(spec);
        self
    }

    /// Set the initial state. Defaults to `"start"`.
    #[must_use]
    pub fn starts_with(mut self, state: impl Into<String>) -> Self {
        self.initial_state = Some(state.into());
        self
    }

    /// Bind an action to `state`.
    #[must_use]
    pub fn action<F>(self, state: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.handler(state, ActionHandler::new(f))
    }

    /// Set the successor of the most recently declared action.
    #[must_use]
    pub fn go_to(mut self, state: impl Into<String>) -> Self {
        let state = state.into();
        match self.last_action.map(|i| &mut self.states[i].1) {
            Some(StateHandler::Action(action)) => action.set_next(state),
            _ => self
                .errors
                .push(format!("go_to({state}) declared before any action")),
        }
        self
    }

    /// Bind any state handler to `state`.
    #[must_use]
    pub fn handler(mut self, state: impl Into<String>, handler: impl Into<StateHandler>) -> Self {
        let state = state.into();
        let handler = handler.into();
        if self.states.iter().any(|(name, _)| *name == state) {
            self.errors.push(format!("state {state} declared twice"));
            return self;
        }
        if matches!(handler, StateHandler::Action(_)) {
            self.last_action = Some(self.states.len());
        }
        self.states.push((state, handler));
        self
    }

    /// Add a decision state.
    #[must_use]
    pub fn decision(self, state: impl Into<String>, decision: DecisionHandler) -> Self {
        self.handler(state, decision)
    }

    /// Add a wait state.
    #[must_use]
    pub fn wait_until(self, state: impl Into<String>, wait: WaitHandler) -> Self {
        self.handler(state, wait)
    }

    /// Terminal state with empty results.
    #[must_use]
    pub fn result(self, state: impl Into<String>) -> Self {
        self.handler(state, ResultHandler::new())
    }

    /// Terminal state whose results are filled by `f`.
    #[must_use]
    pub fn result_with<F>(self, state: impl Into<String>, f: F) -> Self
    where
        F: Fn(&DataCarrier<'_>, &mut Results) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.handler(state, ResultHandler::with(f))
    }

    /// Bind an interaction by name.
    #[must_use]
    pub fn interaction(mut self, name: impl Into<String>, handler: InteractionHandler) -> Self {
        let name = name.into();
        if self.interactions.iter().any(|(n, _)| *n == name) {
            self.errors.push(format!("interaction {name} declared twice"));
        } else {
            self.interactions.push((name, handler));
        }
        self
    }

    /// Delay before a suspended task is woken again.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.background_delay = Some(delay);
        self
    }

    /// Execution timeout, measured from creation.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Retention period, measured from creation.
    #[must_use]
    pub fn delete_after(mut self, delay: Duration) -> Self {
        self.deletion_delay = Some(delay);
        self
    }

    /// Run `f` instead of failing when a task is woken after its timeout.
    #[must_use]
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(f));
        self
    }

    /// Validate and freeze the definition.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Configuration` listing every problem found.
    pub fn build(self) -> TaskResult<TaskDefinition> {
        let mut errors = self.errors;
        let initial_state = self
            .initial_state
            .unwrap_or_else(|| DEFAULT_INITIAL_STATE.to_string());

        if self.name.trim().is_empty() {
            errors.push("task type name is empty".to_string());
        }

        let state_names: HashSet<&str> = self.states.iter().map(|(n, _)| n.as_str()).collect();
        if !state_names.contains(initial_state.as_str()) {
            errors.push(format!("initial state {initial_state} has no handler"));
        }

        for (state, handler) in &self.states {
            for target in handler.declared_targets() {
                if !state_names.contains(target) {
                    errors.push(format!("state {state} leads to undeclared state {target}"));
                }
            }
            let empty = match handler {
                StateHandler::Decision(d) => !d.has_conditions(),
                StateHandler::Wait(w) => !w.has_conditions(),
                _ => false,
            };
            if empty {
                errors.push(format!("state {state} has no conditions"));
            }
        }

        for (name, interaction) in &self.interactions {
            for state in interaction.legal_states() {
                if !state_names.contains(state.as_str()) {
                    errors.push(format!("interaction {name} is legal in undeclared state {state}"));
                }
            }
        }

        let mut seen = HashSet::new();
        for spec in &self.attributes {
            if !seen.insert(spec.name.as_str()) {
                errors.push(format!("attribute {} declared twice", spec.name));
            }
            if let Some(default) = &spec.default {
                if spec.check(&AttributeValue::from(default.clone())).is_err() {
                    errors.push(format!("default of {} must be {}", spec.name, spec.kind));
                }
            }
        }

        for (label, duration) in [
            ("delay", self.background_delay),
            ("timeout", self.execution_timeout),
            ("delete_after", self.deletion_delay),
        ] {
            if duration.is_some_and(|d| d <= Duration::zero()) {
                errors.push(format!("{label} must be positive"));
            }
        }

        if !errors.is_empty() {
            return Err(TaskError::Configuration(format!(
                "{}: {}",
                self.name,
                errors.join("; ")
            )));
        }

        let state_index = self
            .states
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();

        Ok(TaskDefinition {
            name: self.name,
            initial_state,
            attributes: self.attributes,
            states: self.states,
            state_index,
            interactions: self.interactions.into_iter().collect::<HashMap<_, _>>(),
            background_delay: self.background_delay,
            execution_timeout: self.execution_timeout,
            deletion_delay: self.deletion_delay,
            on_timeout: self.on_timeout,
        })
    }
}

impl std::fmt::Debug for TaskDefinitionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinitionBuilder")
            .field("name", &self.name)
            .field("states", &self.states.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}
