//! Interaction handler: externally triggered operations.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{TaskError, TaskResult};
use crate::task::DataCarrier;

/// Interaction body: receives the carrier and the caller's arguments.
pub type InteractionCallback =
    Arc<dyn Fn(&mut DataCarrier<'_>, &Value) -> TaskResult<()> + Send + Sync>;

/// An operation invoked from outside the execution loop, optionally restricted
/// to a set of legal states.
#[derive(Clone)]
pub struct InteractionHandler {
    callback: InteractionCallback,
    legal_states: Vec<String>,
}

impl InteractionHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut DataCarrier<'_>, &Value) -> TaskResult<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(f),
            legal_states: Vec::new(),
        }
    }

    /// Only allow the interaction while the task is in one of `states`.
    #[must_use]
    pub fn when<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legal_states = states.into_iter().map(Into::into).collect();
        self
    }

    /// States the interaction may run in. Empty means any.
    #[must_use]
    pub fn legal_states(&self) -> &[String] {
        &self.legal_states
    }

    /// An empty set means every state is legal.
    #[must_use]
    pub fn is_legal_in(&self, state: &str) -> bool {
        self.legal_states.is_empty() || self.legal_states.iter().any(|s| s == state)
    }

    /// Check the state guard, then run the body.
    pub(crate) fn invoke(
        &self,
        name: &str,
        carrier: &mut DataCarrier<'_>,
        args: &Value,
    ) -> TaskResult<()> {
        if !self.is_legal_in(carrier.current_state()) {
            return Err(TaskError::invalid_state(format!(
                "Cannot call {name} when in state {}",
                carrier.current_state()
            )));
        }
        (self.callback)(carrier, args)
    }
}

impl fmt::Debug for InteractionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractionHandler")
            .field("legal_states", &self.legal_states)
            .finish_non_exhaustive()
    }
}
