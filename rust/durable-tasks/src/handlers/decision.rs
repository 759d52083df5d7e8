//! Decision handler: branch on conditions.

use std::sync::Arc;

use super::{Conditions, Handler, Target};
use crate::error::{TaskError, TaskResult};
use crate::task::DataCarrier;

/// Evaluates conditions in declaration order and follows the first match.
///
/// ```rust,ignore
/// // single condition
/// DecisionHandler::new()
///     .condition(|c| c.get::<bool>("arriving"))
///     .if_true("say_hello")
///     .if_false("say_goodbye");
///
/// // ordered branches
/// DecisionHandler::new()
///     .when(|c| Ok(c.get::<i64>("age")? >= 18), "adult")
///     .when(|_| Ok(true), "minor");
/// ```
///
/// Fails with [`TaskError::NoDecision`] when nothing matches.
#[derive(Debug, Clone, Default)]
pub struct DecisionHandler {
    conditions: Conditions,
}

impl DecisionHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the single condition tested before any ordered branch.
    #[must_use]
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataCarrier<'_>) -> TaskResult<bool> + Send + Sync + 'static,
    {
        self.conditions.set_test(Arc::new(f));
        self
    }

    /// Target when the single condition holds.
    #[must_use]
    pub fn if_true(mut self, target: impl Into<Target>) -> Self {
        self.conditions.set_if_true(target.into());
        self
    }

    /// Target when the single condition does not hold.
    #[must_use]
    pub fn if_false(mut self, target: impl Into<Target>) -> Self {
        self.conditions.set_if_false(target.into());
        self
    }

    /// Add an ordered `(condition, target)` branch.
    #[must_use]
    pub fn when<F>(mut self, f: F, target: impl Into<Target>) -> Self
    where
        F: Fn(&DataCarrier<'_>) -> TaskResult<bool> + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(f), target.into());
        self
    }

    pub(crate) fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }
}

impl Handler for DecisionHandler {
    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        match self.conditions.evaluate(carrier)? {
            Some(target) => target.apply(carrier),
            None => Err(TaskError::NoDecision {
                handler: carrier.current_state().to_string(),
            }),
        }
    }

    fn declared_targets(&self) -> Vec<&str> {
        self.conditions.targets()
    }
}
