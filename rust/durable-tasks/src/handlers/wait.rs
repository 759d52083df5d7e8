//! Wait handler: suspend until a condition holds.

use std::sync::Arc;

use super::{Conditions, Handler, Target};
use crate::error::{TaskError, TaskResult};
use crate::task::DataCarrier;

/// Evaluates its conditions like a decision, but when nothing matches the
/// task stays in the current state and is suspended until the next wake.
///
/// Only background runs may suspend. A wait reached by a sub-task running
/// synchronously inside its parent fails with
/// [`TaskError::CannotWaitInForeground`].
#[derive(Debug, Clone, Default)]
pub struct WaitHandler {
    conditions: Conditions,
}

impl WaitHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leave for `target` once `f` returns true.
    #[must_use]
    pub fn when<F>(mut self, f: F, target: impl Into<Target>) -> Self
    where
        F: Fn(&DataCarrier<'_>) -> TaskResult<bool> + Send + Sync + 'static,
    {
        self.conditions.push(Arc::new(f), target.into());
        self
    }

    /// Set a single condition tested before any other branch.
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

    pub(crate) fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }
}

impl Handler for WaitHandler {
    fn immediate(&self) -> bool {
        false
    }

    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        if !carrier.can_suspend() {
            return Err(TaskError::CannotWaitInForeground {
                task_type: carrier.task_type().to_string(),
            });
        }
        match self.conditions.evaluate(carrier)? {
            Some(target) => target.apply(carrier),
            None => Ok(()),
        }
    }

    fn declared_targets(&self) -> Vec<&str> {
        self.conditions.targets()
    }
}
