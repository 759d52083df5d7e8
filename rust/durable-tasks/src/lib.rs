//! Durable state-machine tasks.
//!
//! This crate provides:
//! - A builder for task definitions (states, handlers, interactions, timing)
//! - An execution loop that checkpoints every state transition
//! - Suspension and wake-up of waiting tasks, with execution timeouts
//! - Synchronous and background sub-tasks
//! - Storage and executor adapter traits, with in-memory, inline and tokio
//!   implementations
//!
//! # Architecture
//!
//! A task type is described once with [`TaskDefinition::builder`] and
//! registered in a [`TaskRegistry`]. The [`Engine`] creates task instances
//! against those definitions and runs them:
//! - each state is bound to one handler: an action, a decision, a wait or a result
//! - handlers read and write attributes through a [`DataCarrier`]
//! - after every step the instance is saved through the [`TaskStorage`] backend
//! - a wait with no matching condition suspends the instance until a
//!   [`TaskExecutor`] wakes it
//!
//! Suspension never keeps a call stack alive. Everything needed to resume
//! lives in the persisted instance.
//!
//! # Usage
//!
//! ```rust,ignore
//! use durable_tasks::prelude::*;
//! use serde_json::json;
//!
//! let greeter = TaskDefinition::builder("Greeter")
//!     .attribute(AttributeSpec::string("name").required())
//!     .attribute(AttributeSpec::string("greeting"))
//!     .action("start", |c| {
//!         let name: String = c.get("name")?;
//!         c.set("greeting", format!("Hello {name}!"))
//!     })
//!     .go_to("done")
//!     .result("done")
//!     .build()?;
//!
//! let engine = Engine::in_memory(TaskRegistry::new().with(greeter)?);
//! let task = engine.call("Greeter", json!({ "name": "World" }))?;
//! assert!(task.is_completed());
//! ```

pub mod backends;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod task;

// Re-exports
pub use backends::{InMemoryStorage, TaskStorage};
pub use config::EngineConfig;
pub use definition::{TaskDefinition, TaskRegistry};
pub use engine::{Engine, RunMode};
pub use error::{TaskError, TaskResult};
pub use executor::{BackgroundExecutor, InlineExecutor, TaskExecutor};
pub use task::{DataCarrier, TaskInstance, TaskStatus};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::backends::{InMemoryStorage, TaskStorage};
    pub use crate::config::EngineConfig;
    pub use crate::definition::{TaskDefinition, TaskRegistry};
    pub use crate::engine::Engine;
    pub use crate::error::{TaskError, TaskResult};
    pub use crate::executor::{BackgroundExecutor, InlineExecutor, TaskExecutor};
    pub use crate::handlers::{
        ActionHandler, DecisionHandler, InteractionHandler, ResultHandler, Target, WaitHandler,
    };
    pub use crate::task::{
        AttributeSpec, AttributeValue, DataCarrier, Model, ModelRef, Results, TaskInstance,
        TaskStatus,
    };
}
