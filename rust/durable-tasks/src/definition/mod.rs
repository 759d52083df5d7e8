//! Task definitions.
//!
//! A [`TaskDefinition`] is the immutable description of one task type: its
//! attribute schema, the handler bound to each state, its interactions and
//! timing. Definitions are produced by [`TaskDefinitionBuilder`] and collected
//! in a [`TaskRegistry`] before any task runs.

pub mod builder;
pub mod registry;

use std::collections::HashMap;
use std::fmt;

use chrono::Duration;

use crate::config::EngineConfig;
use crate::handlers::{Callback, InteractionHandler, StateHandler};
use crate::task::AttributeSpec;

pub use builder::TaskDefinitionBuilder;
pub use registry::TaskRegistry;

/// State a definition starts in unless told otherwise.
pub const DEFAULT_INITIAL_STATE: &str = "start";

/// Immutable configuration of a task type.
pub struct TaskDefinition {
    name: String,
    initial_state: String,
    attributes: Vec<AttributeSpec>,
    states: Vec<(String, StateHandler)>,
    state_index: HashMap<String, usize>,
    interactions: HashMap<String, InteractionHandler>,
    background_delay: Option<Duration>,
    execution_timeout: Option<Duration>,
    deletion_delay: Option<Duration>,
    on_timeout: Option<Callback>,
}

impl TaskDefinition {
    /// Start describing a task type.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> TaskDefinitionBuilder {
        TaskDefinitionBuilder::new(name)
    }

    /// Task type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// State a new instance starts in.
    #[must_use]
    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    /// States in declaration order.
    pub fn states(&self) -> impl Iterator<Item = (&str, &StateHandler)> {
        self.states.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    /// Whether `state` has a handler.
    #[must_use]
    pub fn has_state(&self, state: &str) -> bool {
        self.state_index.contains_key(state)
    }

    /// Handler registered for `state`.
    #[must_use]
    pub fn handler_for(&self, state: &str) -> Option<&StateHandler> {
        self.state_index.get(state).map(|&i| &self.states[i].1)
    }

    /// Interaction registered under `name`.
    #[must_use]
    pub fn interaction(&self, name: &str) -> Option<&InteractionHandler> {
        self.interactions.get(name)
    }

    /// Every interaction with its name.
    pub fn interactions(&self) -> impl Iterator<Item = (&str, &InteractionHandler)> {
        self.interactions.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    /// Declared attribute schema, in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    /// Schema entry for one attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|spec| spec.name == name)
    }

    /// Delay before a suspended task is woken again.
    #[must_use]
    pub fn background_delay(&self, config: &EngineConfig) -> Duration {
        self.background_delay
            .unwrap_or_else(|| config.background_delay())
    }

    /// Time a task may run before it is diverted to the timeout path.
    #[must_use]
    pub fn execution_timeout(&self, config: &EngineConfig) -> Duration {
        self.execution_timeout
            .unwrap_or_else(|| config.execution_timeout())
    }

    /// Time after creation at which a task becomes eligible for deletion.
    #[must_use]
    pub fn deletion_delay(&self, config: &EngineConfig) -> Duration {
        self.deletion_delay
            .unwrap_or_else(|| config.deletion_delay())
    }

    /// Callback run instead of failing when the task times out.
    #[must_use]
    pub fn on_timeout(&self) -> Option<&Callback> {
        self.on_timeout.as_ref()
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("initial_state", &self.initial_state)
            .field("states", &self.states.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("interactions", &self.interactions.keys().collect::<Vec<_>>())
            .field("background_delay", &self.background_delay)
            .field("execution_timeout", &self.execution_timeout)
            .field("deletion_delay", &self.deletion_delay)
            .field("on_timeout", &self.on_timeout.is_some())
            .finish_non_exhaustive()
    }
}
