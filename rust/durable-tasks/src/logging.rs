//! Tracing setup and operation timing.

use std::env;
use std::time::Instant;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "durable_tasks=info";

/// Install a global tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `durable_tasks=info`) and
/// `LOG_FORMAT=json` switches to JSON output. Calling this more than once is
/// harmless; only the first subscriber is installed.
pub fn init_tracing() -> bool {
    let subscriber = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );

    let installed = if env::var("LOG_FORMAT").unwrap_or_default() == "json" {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::debug!("Tracing initialized");
    }
    installed
}

/// Logs how long an engine operation took.
///
/// ```rust,ignore
/// let timer = OpTimer::new("sweep", "wake_sleeping");
/// let woken = wake_everything()?;
/// timer.finish_with_count(woken);
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::debug!(component, operation, "Operation started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    /// Log completion together with the number of items processed.
    pub fn finish_with_count(self, count: usize) {
        tracing::info!(
            component = self.component,
            operation = self.operation,
            duration_ms = self.start.elapsed().as_millis(),
            count,
            "Operation completed"
        );
    }

    /// Log success or failure of the operation.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.start.elapsed().as_millis();
        match result {
            Ok(_) => tracing::info!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                "Operation completed"
            ),
            Err(e) => tracing::error!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                error = %e,
                "Operation failed"
            ),
        }
    }
}
