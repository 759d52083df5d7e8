//! Error types for task execution.
//!
//! Every failure the engine can observe is a [`TaskError`]. When one escapes a
//! handler, the execution loop records it on the instance using
//! [`TaskError::exception_class`], the display message and
//! [`TaskError::backtrace`] before handing it back to the caller.

use thiserror::Error;

/// Core error type for the task engine.
#[derive(Error, Debug)]
pub enum TaskError {
    /// Business-level failure raised by a handler through `fail_with`.
    #[error("{message}")]
    Failure {
        message: String,
        task_id: Option<String>,
    },

    /// The execution timeout elapsed and the task type has no timeout callback.
    #[error("Timeout expired")]
    Timeout { task_id: Option<String> },

    /// No condition of a multi-branch decision matched.
    #[error("No conditions matched in {handler}")]
    NoDecision { handler: String },

    /// Operation not permitted in the instance's current state, or the state is unknown.
    #[error("{message}")]
    InvalidState { message: String },

    /// A wait state was reached by an instance that is running in the foreground.
    #[error("{task_type} cannot wait in the foreground")]
    CannotWaitInForeground { task_type: String },

    /// Attribute validation failed.
    #[error("{0}")]
    Validation(String),

    /// Required inputs are absent.
    #[error("Missing inputs: {}", names.join(", "))]
    MissingInputs { names: Vec<String> },

    #[error("Unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("{task_type} has no attribute named {name}")]
    UnknownAttribute { task_type: String, name: String },

    /// Task definition or engine configuration is malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A sub-task run through `call` did not complete.
    #[error("Sub-task {task_type} failed: {source}")]
    SubTaskFailed {
        task_type: String,
        #[source]
        source: Box<TaskError>,
    },

    #[error("Model {model_type} with id {id} could not be found")]
    ModelNotFound { model_type: String, id: String },

    /// The storage adapter failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything raised by application code inside a handler.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for engine operations.
pub type TaskResult<T> = Result<T, TaskError>;

impl TaskError {
    /// Create an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a storage error from any displayable backend error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Name recorded as the instance's `exceptionClass`.
    pub fn exception_class(&self) -> &'static str {
        match self {
            Self::Failure { .. } => "Failure",
            Self::Timeout { .. } => "Timeout",
            Self::NoDecision { .. } => "NoDecision",
            Self::InvalidState { .. } => "InvalidState",
            Self::CannotWaitInForeground { .. } => "CannotWaitInForeground",
            Self::Validation(_) => "ValidationError",
            Self::MissingInputs { .. } => "MissingInputs",
            Self::UnknownTaskType(_) => "UnknownTaskType",
            Self::UnknownAttribute { .. } => "UnknownAttribute",
            Self::Configuration(_) => "ConfigurationError",
            Self::SubTaskFailed { .. } => "SubTaskFailed",
            Self::ModelNotFound { .. } => "ModelNotFound",
            Self::Storage(_) => "StorageError",
            Self::Serialization(_) => "SerializationError",
            Self::Other(_) => "Error",
        }
    }

    /// The chain of causes, outermost first, one per line.
    pub fn backtrace(&self) -> String {
        if let Self::Other(err) = self {
            return err
                .chain()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
        }

        let mut lines = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            lines.push(cause.to_string());
            source = cause.source();
        }
        lines.join("\n")
    }

    /// True for errors that mean the task itself failed rather than the engine.
    pub fn is_task_failure(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Configuration(_))
    }
}
