//! Executor adapters.
//!
//! An executor decides *when* and *where* the execution loop runs. The engine
//! hands instances to it for synchronous runs (`call`), for deferred runs
//! (`later`) and to resume suspended instances (`wake`).
//!
//! Executors are responsible for running at most one execution loop per task
//! instance at a time; the engine itself does not lock instances.

pub mod background;

use crate::engine::Engine;
use crate::error::TaskResult;
use crate::task::TaskInstance;

pub use background::BackgroundExecutor;

/// Scheduling contract used by the engine.
pub trait TaskExecutor: Send + Sync + std::fmt::Debug {
    /// Run the execution loop now, until the task completes, fails or suspends.
    fn call(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()>;

    /// Arrange for the task to run later. Must return without running it.
    fn later(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()>;

    /// Resume a suspended task (timeout check, then the loop).
    fn wake(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()>;
}

/// Runs everything on the caller's thread.
///
/// `later` only runs tasks that are already active, so a task created with
/// `start` stays waiting until something wakes it. Callers must not share one
/// instance between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn call(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        engine.execute(task)
    }

    fn later(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        self.call(engine, task)
    }

    fn wake(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        engine.resume(task)
    }
}
