//! Tokio-backed executor.
//!
//! Each scheduled task gets one job on the runtime. The job sleeps until the
//! task's `wake_at`, reloads it from storage and resumes it on the blocking
//! pool, repeating while the task keeps suspending. A job exists for at most
//! one task id at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;

use super::TaskExecutor;
use crate::engine::Engine;
use crate::error::{TaskError, TaskResult};
use crate::task::{TaskInstance, TaskStatus};

type Jobs = Arc<Mutex<HashMap<String, Arc<Notify>>>>;

/// Runs deferred and woken tasks as tokio jobs.
///
/// `call` still runs synchronously on the caller's thread. `later` and `wake`
/// return immediately; the caller's copy of the instance is not updated, reload
/// it from storage to observe progress. Errors inside a job have no caller to
/// return to and are logged.
///
/// Only resumes go through the job. `Engine::interact` runs and saves on the
/// caller's thread, so an interaction that lands while a job is mid-resume can
/// be overwritten by that job's next checkpoint. Callers that need both should
/// interact on tasks that are waiting.
#[derive(Debug, Clone)]
pub struct BackgroundExecutor {
    handle: Handle,
    jobs: Jobs,
}

impl BackgroundExecutor {
    /// Create an executor that spawns onto `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            jobs: Arc::default(),
        }
    }

    /// Create an executor on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Configuration` outside a runtime.
    pub fn current() -> TaskResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| TaskError::Configuration(e.to_string()))
    }

    /// Number of tasks with a live job.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.jobs.lock().len()
    }

    fn schedule(&self, engine: &Engine, id: String, wake_now: bool) {
        let notify = {
            let mut jobs = self.jobs.lock();
            if let Some(existing) = jobs.get(&id) {
                if wake_now {
                    existing.notify_one();
                }
                tracing::debug!(task_id = %id, wake_now, "Job already in flight");
                return;
            }
            let notify = Arc::new(Notify::new());
            jobs.insert(id.clone(), Arc::clone(&notify));
            notify
        };
        if wake_now {
            notify.notify_one();
        }

        let job = Job {
            engine: engine.clone(),
            id,
            notify,
            jobs: Arc::clone(&self.jobs),
        };
        self.handle.spawn(job.run());
    }
}

impl TaskExecutor for BackgroundExecutor {
    fn call(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        engine.execute(task)
    }

    fn later(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        let id = task
            .id
            .clone()
            .ok_or_else(|| TaskError::invalid_state("a task must be saved before it is scheduled"))?;
        self.schedule(engine, id, false);
        Ok(())
    }

    fn wake(&self, engine: &Engine, task: &mut TaskInstance) -> TaskResult<()> {
        match task.id.clone() {
            Some(id) => {
                self.schedule(engine, id, true);
                Ok(())
            }
            None => engine.resume(task),
        }
    }
}

/// One task's background job.
struct Job {
    engine: Engine,
    id: String,
    notify: Arc<Notify>,
    jobs: Jobs,
}

impl Job {
    async fn run(self) {
        let _guard = JobGuard {
            jobs: Arc::clone(&self.jobs),
            id: self.id.clone(),
        };

        loop {
            let task = match self.engine.storage().find(&self.id) {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::debug!(task_id = %self.id, "Scheduled task no longer exists");
                    break;
                }
                Err(err) => {
                    tracing::error!(task_id = %self.id, error = %err, "Failed to load scheduled task");
                    break;
                }
            };

            match task.status {
                TaskStatus::Waiting => {
                    let delay = task
                        .wake_at
                        .map(|at| (at - Utc::now()).to_std().unwrap_or_default())
                        .unwrap_or_default();
                    // a pending wake is consumed before the timer is considered
                    tokio::select! {
                        biased;
                        () = self.notify.notified() => {}
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                TaskStatus::Active => {}
                TaskStatus::Completed | TaskStatus::Failed => break,
            }

            let engine = self.engine.clone();
            let id = self.id.clone();
            let resumed = tokio::task::spawn_blocking(move || resume_by_id(&engine, &id)).await;

            match resumed {
                Ok(Ok(Some(task))) if task.is_waiting() => {
                    if !task.wake_at.is_some_and(|at| at > Utc::now()) {
                        tracing::warn!(
                            task_id = %self.id,
                            wake_at = ?task.wake_at,
                            "Resume left task due immediately, leaving it to the sweep"
                        );
                        break;
                    }
                }
                Ok(Ok(_)) => break,
                // task failures are already recorded on the instance
                Ok(Err(err)) if err.is_task_failure() => {
                    tracing::warn!(
                        task_id = %self.id,
                        error_class = err.exception_class(),
                        error = %err,
                        "Background task failed"
                    );
                    break;
                }
                Ok(Err(err)) => {
                    tracing::error!(
                        task_id = %self.id,
                        error_class = err.exception_class(),
                        error = %err,
                        "Background resume failed"
                    );
                    break;
                }
                Err(err) => {
                    tracing::error!(task_id = %self.id, error = %err, "Background job panicked");
                    break;
                }
            }
        }
    }
}

fn resume_by_id(engine: &Engine, id: &str) -> TaskResult<Option<TaskInstance>> {
    let Some(mut task) = engine.storage().find(id)? else {
        return Ok(None);
    };
    engine.resume(&mut task)?;
    Ok(Some(task))
}

/// Removes the job's entry when it ends, however it ends.
struct JobGuard {
    jobs: Jobs,
    id: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.lock().remove(&self.id);
    }
}
