//! Action handler: run a callback, then move to the declared successor.

use std::fmt;
use std::sync::Arc;

use super::{Callback, Handler};
use crate::error::TaskResult;
use crate::task::DataCarrier;

/// Runs a callback against the carrier.
///
/// If the callback neither changed state nor completed the task, the static
/// successor (if any) is applied. An in-callback `go_to` always wins.
#[derive(Clone)]
pub struct ActionHandler {
    callback: Callback,
    next: Option<String>,
}

impl ActionHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(f),
            next: None,
        }
    }

    /// Declare the successor state.
    #[must_use]
    pub fn then(mut self, state: impl Into<String>) -> Self {
        self.next = Some(state.into());
        self
    }

    pub(crate) fn set_next(&mut self, state: String) {
        self.next = Some(state);
    }

    /// Static successor, if one was declared.
    #[must_use]
    pub fn next_state(&self) -> Option<&str> {
        self.next.as_deref()
    }
}

impl Handler for ActionHandler {
    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        (self.callback)(carrier)?;
        if !carrier.has_outcome() {
            if let Some(next) = &self.next {
                carrier.go_to(next.as_str());
            }
        }
        Ok(())
    }

    fn declared_targets(&self) -> Vec<&str> {
        self.next.as_deref().into_iter().collect()
    }
}

impl fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandler")
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}
