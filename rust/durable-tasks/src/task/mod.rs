//! Task instances and their persisted snapshot form.

pub mod attributes;
pub mod carrier;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

pub use attributes::{AttributeKind, AttributeSpec, AttributeValue, Attributes, Model, ModelRef, Results};
pub use carrier::DataCarrier;

/// Lifecycle status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Handlers are being run.
    Active,
    /// Suspended until `wake_at`.
    Waiting,
    /// Reached a result state.
    Completed,
    /// A handler raised an error.
    Failed,
}

impl TaskStatus {
    /// Completed and failed instances never run again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "waiting" => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(TaskError::Validation(format!("unknown task status: {other}"))),
        }
    }
}

/// One persisted execution of a task type's state machine.
///
/// The serialised form of this struct is the snapshot every storage backend
/// must round-trip exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    /// Assigned by the storage backend on first save.
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: TaskStatus,
    pub current_state: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub parent_task_id: Option<String>,
    pub exception_class: Option<String>,
    pub exception_message: Option<String>,
    pub exception_backtrace: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub wake_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub delete_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub results: Results,
}

impl TaskInstance {
    /// Create an active, unsaved instance positioned at `state`.
    #[must_use]
    pub fn new(task_type: impl Into<String>, state: impl Into<String>, attributes: Attributes) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            task_type: task_type.into(),
            status: TaskStatus::Active,
            current_state: state.into(),
            attributes,
            parent_task_id: None,
            exception_class: None,
            exception_message: None,
            exception_backtrace: None,
            created_at: now,
            updated_at: now,
            wake_at: None,
            timeout_at: None,
            delete_at: None,
            results: Results::new(),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.status == TaskStatus::Waiting
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the instance is currently in `state`.
    #[must_use]
    pub fn is_in(&self, state: &str) -> bool {
        self.current_state == state
    }

    /// Whether the instance is suspended in `state`.
    #[must_use]
    pub fn is_waiting_until(&self, state: &str) -> bool {
        self.is_waiting() && self.is_in(state)
    }

    /// Whether the execution timeout has elapsed at `now`.
    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.is_some_and(|at| at < now)
    }

    /// Raw JSON value of an attribute, if set.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<serde_json::Value> {
        self.attributes
            .get(name)
            .filter(|value| !value.is_null())
            .map(AttributeValue::to_json)
    }

    /// Record a failure on the instance.
    pub fn record_failure(&mut self, err: &TaskError) {
        self.status = TaskStatus::Failed;
        self.exception_class = Some(err.exception_class().to_string());
        self.exception_message = Some(err.to_string());
        self.exception_backtrace = Some(err.backtrace());
    }

    /// Suspend until `wake_at`.
    pub fn suspend_until(&mut self, wake_at: DateTime<Utc>) {
        self.status = TaskStatus::Waiting;
        self.wake_at = Some(wake_at);
    }

    /// Mark the instance completed with the given results.
    pub fn complete(&mut self, results: Results) {
        self.status = TaskStatus::Completed;
        self.wake_at = None;
        self.results = results;
    }

    /// Short identifier for log fields.
    pub(crate) fn log_id(&self) -> &str {
        self.id.as_deref().unwrap_or("unsaved")
    }
}
