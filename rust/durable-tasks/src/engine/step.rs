//! The execution loop.
//!
//! Each iteration resolves the handler for the current state, runs it against
//! a fresh carrier, applies the outcome and checkpoints the instance. The loop
//! stops when the task is no longer active or an iteration left it in the same
//! state. Any error is recorded on the instance, checkpointed, and returned.

use chrono::Utc;

use super::{Engine, RunMode};
use crate::definition::TaskDefinition;
use crate::error::{TaskError, TaskResult};
use crate::handlers::Handler;
use crate::task::carrier::Outcome;
use crate::task::{DataCarrier, TaskInstance, TaskStatus};

impl Engine {
    pub(crate) fn run(&self, task: &mut TaskInstance, mode: RunMode) -> TaskResult<()> {
        let definition = self.definition(&task.task_type)?;
        // sub-tasks started by a handler need the parent's id
        if task.id.is_none() {
            self.storage.save(task)?;
        }
        let mut previous: Option<String> = None;

        while task.is_active() && previous.as_deref() != Some(task.current_state.as_str()) {
            previous = Some(task.current_state.clone());

            if let Err(err) = self.step(definition, task, mode) {
                return Err(self.fail(task, err));
            }

            self.storage.save(task)?;
            tracing::debug!(
                task_id = %task.log_id(),
                state = %task.current_state,
                status = %task.status,
                "Checkpoint saved"
            );
        }

        if task.is_completed() {
            tracing::info!(task_id = %task.log_id(), task_type = %task.task_type, "Task completed");
        }
        Ok(())
    }

    /// Run the handler for the current state once and apply its outcome.
    pub(crate) fn step(
        &self,
        definition: &TaskDefinition,
        task: &mut TaskInstance,
        mode: RunMode,
    ) -> TaskResult<()> {
        let handler = definition.handler_for(&task.current_state).ok_or_else(|| {
            TaskError::invalid_state(format!("No handler for state: {}", task.current_state))
        })?;
        tracing::debug!(
            task_id = %task.log_id(),
            state = %task.current_state,
            kind = ?handler.kind(),
            "Running handler"
        );

        let mut carrier = DataCarrier::new(self, definition, task, mode);
        handler.handle(&mut carrier)?;
        let (attributes, outcome) = carrier.into_parts();
        task.attributes = attributes;

        match outcome {
            Some(outcome) => self.apply_outcome(definition, task, outcome)?,
            None if !handler.immediate() => {
                let wake_at = Utc::now() + definition.background_delay(&self.config);
                task.suspend_until(wake_at);
                tracing::info!(
                    task_id = %task.log_id(),
                    state = %task.current_state,
                    wake_at = %wake_at,
                    "Task suspended"
                );
            }
            None => {}
        }
        Ok(())
    }

    pub(crate) fn apply_outcome(
        &self,
        definition: &TaskDefinition,
        task: &mut TaskInstance,
        outcome: Outcome,
    ) -> TaskResult<()> {
        match outcome {
            Outcome::GoTo(state) => {
                if !definition.has_state(&state) {
                    return Err(TaskError::invalid_state(format!("No handler for state: {state}")));
                }
                tracing::debug!(
                    task_id = %task.log_id(),
                    from = %task.current_state,
                    to = %state,
                    "Transition"
                );
                task.current_state = state;
            }
            Outcome::Complete(results) => task.complete(results),
        }
        Ok(())
    }

    /// Record `err` on the task and persist it. Returns `err` for propagation.
    pub(crate) fn fail(&self, task: &mut TaskInstance, err: TaskError) -> TaskError {
        task.record_failure(&err);
        tracing::warn!(
            task_id = %task.log_id(),
            task_type = %task.task_type,
            state = %task.current_state,
            error_class = err.exception_class(),
            error = %err,
            "Task failed"
        );
        if let Err(save_err) = self.storage.save(task) {
            tracing::error!(
                task_id = %task.log_id(),
                error = %save_err,
                "Failed to persist task failure"
            );
        }
        err
    }

    /// The timeout path: run the definition's timeout callback, or fail.
    pub(crate) fn time_out(&self, task: &mut TaskInstance) -> TaskResult<()> {
        let definition = self.definition(&task.task_type)?;
        tracing::warn!(
            task_id = %task.log_id(),
            task_type = %task.task_type,
            timeout_at = ?task.timeout_at,
            "Task timed out"
        );

        let Some(callback) = definition.on_timeout() else {
            let err = TaskError::Timeout {
                task_id: task.id.clone(),
            };
            return Err(self.fail(task, err));
        };

        let mut carrier = DataCarrier::new(self, definition, task, RunMode::Background);
        if let Err(err) = callback(&mut carrier) {
            return Err(self.fail(task, err));
        }
        let (attributes, outcome) = carrier.into_parts();
        task.attributes = attributes;

        match outcome {
            Some(outcome) => {
                if let Err(err) = self.apply_outcome(definition, task, outcome) {
                    return Err(self.fail(task, err));
                }
                if !task.is_terminal() {
                    task.status = TaskStatus::Active;
                    task.wake_at = None;
                }
                self.storage.save(task)?;
                self.execute(task)
            }
            None => {
                // still timed out, so the next wake runs the callback again
                let wake_at = Utc::now() + definition.background_delay(&self.config);
                task.suspend_until(wake_at);
                tracing::info!(
                    task_id = %task.log_id(),
                    wake_at = %wake_at,
                    "Timeout callback left task waiting"
                );
                self.storage.save(task)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use crate::definition::{TaskDefinition, TaskRegistry};
    use crate::engine::Engine;
    use crate::error::TaskError;
    use crate::handlers::{ActionHandler, WaitHandler};
    use crate::task::AttributeSpec;

    fn engine_with(definition: TaskDefinition) -> Engine {
        Engine::in_memory(TaskRegistry::new().with(definition).unwrap())
    }

    #[test]
    fn test_self_transition_stops_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let engine = engine_with(
            TaskDefinition::builder("Looper")
                .action("start", move |c| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    c.go_to("start");
                    Ok(())
                })
                .build()
                .unwrap(),
        );

        let task = engine.call("Looper", json!({})).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(task.is_active());
        assert!(task.is_in("start"));
    }

    #[test]
    fn test_go_to_unknown_state_fails_task() {
        let engine = engine_with(
            TaskDefinition::builder("Lost")
                .action("start", |c| {
                    c.go_to("nowhere");
                    Ok(())
                })
                .build()
                .unwrap(),
        );

        let mut task = engine.build("Lost", json!({})).unwrap();
        let err = engine.execute(&mut task).unwrap_err();
        assert!(matches!(err, TaskError::InvalidState { .. }));
        assert!(task.is_failed());
        assert_eq!(task.exception_class.as_deref(), Some("InvalidState"));
        assert_eq!(
            task.exception_message.as_deref(),
            Some("No handler for state: nowhere")
        );
        assert!(engine.find(task.id.as_deref().unwrap()).unwrap().unwrap().is_failed());
    }

    #[test]
    fn test_callback_go_to_overrides_static_successor() {
        let engine = engine_with(
            TaskDefinition::builder("Router")
                .handler(
                    "start",
                    ActionHandler::new(|c| {
                        c.go_to("special");
                        Ok(())
                    })
                    .then("normal"),
                )
                .result("normal")
                .result("special")
                .build()
                .unwrap(),
        );

        let task = engine.call("Router", json!({})).unwrap();
        assert!(task.is_completed());
        assert!(task.is_in("special"));
    }

    #[test]
    fn test_failed_handler_keeps_previous_attributes() {
        let engine = engine_with(
            TaskDefinition::builder("Partial")
                .attribute(AttributeSpec::integer("count").with_default(0))
                .action("start", |c| {
                    c.set("count", 5)?;
                    Err(c.fail_with("stop here"))
                })
                .build()
                .unwrap(),
        );

        let mut task = engine.build("Partial", json!({})).unwrap();
        let err = engine.execute(&mut task).unwrap_err();
        assert!(matches!(err, TaskError::Failure { .. }));
        assert_eq!(task.attribute("count"), Some(json!(0)));
        assert_eq!(task.exception_class.as_deref(), Some("Failure"));
    }

    #[test]
    fn test_action_into_matching_wait_continues() {
        let engine = engine_with(
            TaskDefinition::builder("Pass")
                .attribute(AttributeSpec::boolean("ready").with_default(true))
                .action("start", |_| Ok(()))
                .go_to("waiting")
                .wait_until("waiting", WaitHandler::new().when(|c| c.get::<bool>("ready"), "done"))
                .result("done")
                .build()
                .unwrap(),
        );

        let task = engine.call("Pass", json!({})).unwrap();
        assert!(task.is_completed());
    }

    #[test]
    fn test_run_handler_runs_one_state() {
        let engine = engine_with(
            TaskDefinition::builder("Steps")
                .attribute(AttributeSpec::string("log").with_default(""))
                .action("start", |c| {
                    let log: String = c.get("log")?;
                    c.set("log", format!("{log}a"))
                })
                .go_to("second")
                .action("second", |c| {
                    let log: String = c.get("log")?;
                    c.set("log", format!("{log}b"))
                })
                .go_to("done")
                .result("done")
                .build()
                .unwrap(),
        );

        let task = engine.run_handler("Steps", "second", json!({})).unwrap();
        assert_eq!(task.attribute("log"), Some(json!("b")));
        assert!(task.is_in("done"));
        assert!(task.is_active());
        assert!(task.id.is_none());

        let err = engine.run_handler("Steps", "third", json!({})).unwrap_err();
        assert!(matches!(err, TaskError::InvalidState { .. }));
    }
}
