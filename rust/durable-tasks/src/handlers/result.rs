//! Result handler: terminal state.

use std::fmt;
use std::sync::Arc;

use super::Handler;
use crate::error::TaskResult;
use crate::task::{DataCarrier, Results};

/// Fills the results map from the carrier.
pub type ResultCallback = Arc<dyn Fn(&DataCarrier<'_>, &mut Results) -> TaskResult<()> + Send + Sync>;

/// Completes the task, optionally building results first.
#[derive(Clone, Default)]
pub struct ResultHandler {
    callback: Option<ResultCallback>,
}

impl ResultHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<F>(f: F) -> Self
    where
        F: Fn(&DataCarrier<'_>, &mut Results) -> TaskResult<()> + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(f)),
        }
    }
}

impl Handler for ResultHandler {
    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        let mut results = Results::new();
        if let Some(callback) = &self.callback {
            callback(carrier, &mut results)?;
        }
        carrier.complete(results);
        Ok(())
    }

    fn declared_targets(&self) -> Vec<&str> {
        Vec::new()
    }
}

impl fmt::Debug for ResultHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandler")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
