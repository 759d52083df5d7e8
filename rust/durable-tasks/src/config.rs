//! Engine configuration.
//!
//! Values come from, in increasing priority:
//! 1. built-in defaults
//! 2. `config/durable-tasks.{toml,yaml,json}` if present
//! 3. `DURABLE_TASKS__*` environment variables (a `.env` file is honoured)
//!
//! ```rust,ignore
//! // DURABLE_TASKS__BACKGROUND_DELAY_SECS=5
//! let config = EngineConfig::load()?;
//! assert_eq!(config.background_delay_secs, 5);
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

const DEFAULT_BACKGROUND_DELAY_SECS: u64 = 60;
const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 86_400;
const DEFAULT_DELETION_DELAY_SECS: u64 = 7_776_000;

/// Upper bound for any configured duration (100 years).
const MAX_SECS: u64 = 3_153_600_000;

/// Engine-wide defaults for task definitions that do not set their own timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds a suspended task sleeps before it is woken again.
    #[serde(default = "default_background_delay")]
    pub background_delay_secs: u64,
    /// Seconds after creation before a task is diverted to the timeout path.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    /// Seconds after creation before a task may be deleted.
    #[serde(default = "default_deletion_delay")]
    pub deletion_delay_secs: u64,
}

fn default_background_delay() -> u64 {
    DEFAULT_BACKGROUND_DELAY_SECS
}

fn default_execution_timeout() -> u64 {
    DEFAULT_EXECUTION_TIMEOUT_SECS
}

fn default_deletion_delay() -> u64 {
    DEFAULT_DELETION_DELAY_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            background_delay_secs: DEFAULT_BACKGROUND_DELAY_SECS,
            execution_timeout_secs: DEFAULT_EXECUTION_TIMEOUT_SECS,
            deletion_delay_secs: DEFAULT_DELETION_DELAY_SECS,
        }
    }
}

impl EngineConfig {
    /// Load from `.env`, the optional config file and the environment, then validate.
    pub fn load() -> TaskResult<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let builder = Self::defaults()?.add_source(
            config::File::with_name("config/durable-tasks").required(false),
        );
        Self::finish(builder)
    }

    /// Load from an explicit config file and the environment, then validate.
    pub fn load_from(path: impl AsRef<Path>) -> TaskResult<Self> {
        let builder = Self::defaults()?.add_source(config::File::from(path.as_ref()));
        Self::finish(builder)
    }

    fn defaults() -> TaskResult<config::ConfigBuilder<config::builder::DefaultState>> {
        config::Config::builder()
            .set_default("background_delay_secs", DEFAULT_BACKGROUND_DELAY_SECS)
            .and_then(|b| b.set_default("execution_timeout_secs", DEFAULT_EXECUTION_TIMEOUT_SECS))
            .and_then(|b| b.set_default("deletion_delay_secs", DEFAULT_DELETION_DELAY_SECS))
            .map_err(config_error)
    }

    fn finish(builder: config::ConfigBuilder<config::builder::DefaultState>) -> TaskResult<Self> {
        let loaded: Self = builder
            .add_source(
                config::Environment::with_prefix("DURABLE_TASKS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(config_error)?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check that every duration is positive and within range.
    pub fn validate(&self) -> TaskResult<()> {
        for (name, secs) in [
            ("background_delay_secs", self.background_delay_secs),
            ("execution_timeout_secs", self.execution_timeout_secs),
            ("deletion_delay_secs", self.deletion_delay_secs),
        ] {
            if secs == 0 {
                return Err(TaskError::Configuration(format!("{name} must be positive")));
            }
            if secs > MAX_SECS {
                return Err(TaskError::Configuration(format!(
                    "{name} must be at most {MAX_SECS}"
                )));
            }
        }
        Ok(())
    }

    /// Delay before a suspended task is woken again.
    #[must_use]
    pub fn background_delay(&self) -> Duration {
        seconds(self.background_delay_secs)
    }

    /// Time a task may run before it times out.
    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        seconds(self.execution_timeout_secs)
    }

    /// Time after creation before a task may be deleted.
    #[must_use]
    pub fn deletion_delay(&self) -> Duration {
        seconds(self.deletion_delay_secs)
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs.min(MAX_SECS)).unwrap_or(i64::MAX))
}

#[allow(clippy::needless_pass_by_value, reason = "used as a map_err adapter")]
fn config_error(err: config::ConfigError) -> TaskError {
    TaskError::Configuration(err.to_string())
}
