//! Executor contract and maintenance sweeps with the inline executor.
//!
//! Covers deferred starts, wake-ups, `wake_sleeping`, `delete_expired` and
//! every shape of timeout callback.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use durable_tasks::prelude::*;
use serde_json::json;

fn counter() -> TaskDefinition {
    TaskDefinition::builder("Counter")
        .attribute(AttributeSpec::integer("count").with_default(0))
        .action("start", |c| {
            let count: i64 = c.get("count")?;
            c.set("count", count + 1)
        })
        .go_to("done")
        .result("done")
        .build()
        .unwrap()
}

fn gate() -> TaskDefinition {
    TaskDefinition::builder("Gate")
        .attribute(AttributeSpec::boolean("open").with_default(false))
        .wait_until("start", WaitHandler::new().when(|c| c.get::<bool>("open"), "done"))
        .result("done")
        .build()
        .unwrap()
}

fn expiring<F>(name: &str, on_timeout: F) -> TaskDefinition
where
    F: Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync + 'static,
{
    TaskDefinition::builder(name)
        .attribute(AttributeSpec::string("note"))
        .wait_until("start", WaitHandler::new().when(|_| Ok(false), "done"))
        .result("done")
        .result("expired")
        .on_timeout(on_timeout)
        .build()
        .unwrap()
}

/// Push a stored task's deadlines into the past.
fn expire(storage: &InMemoryStorage, task: &mut TaskInstance) {
    task.timeout_at = Some(Utc::now() - Duration::seconds(1));
    storage.save(task).unwrap();
}

#[test]
fn test_start_defers_until_woken() {
    let (engine, storage) = common::setup(vec![counter()]);

    let task = engine.start("Counter", json!({ "count": 41 })).unwrap();
    assert!(task.is_waiting_until("start"));
    assert!(task.wake_at.unwrap() <= Utc::now());

    let stored = storage.find(task.id.as_deref().unwrap()).unwrap().unwrap();
    assert!(stored.is_waiting());

    assert_eq!(engine.wake_sleeping(None).unwrap(), 1);
    let stored = storage.find(task.id.as_deref().unwrap()).unwrap().unwrap();
    assert!(stored.is_completed());
    assert_eq!(stored.attribute("count"), Some(json!(42)));
    assert!(stored.wake_at.is_none());
}

#[test]
fn test_later_is_not_due_yet() {
    let (engine, _) = common::setup(vec![counter()]);

    let task = engine
        .later("Counter", json!({}), Duration::minutes(5))
        .unwrap();
    assert!(task.wake_at.unwrap() > Utc::now() + Duration::minutes(4));

    assert_eq!(engine.wake_sleeping(None).unwrap(), 0);
}

#[test]
fn test_wake_resumes_waiting_task() {
    let (engine, _) = common::setup(vec![gate()]);

    let mut task = engine.call("Gate", json!({})).unwrap();
    assert!(task.is_waiting_until("start"));

    // still closed, so it suspends again
    engine.wake(&mut task).unwrap();
    assert!(task.is_waiting_until("start"));

    task.attributes
        .insert("open".to_string(), AttributeValue::from(json!(true)));
    engine.wake(&mut task).unwrap();
    assert!(task.is_completed());
    assert!(task.is_in("done"));
}

#[test]
fn test_wake_sleeping_filters_by_type() {
    let (engine, storage) = common::setup(vec![counter(), gate()]);

    engine.start("Counter", json!({})).unwrap();
    engine.start("Counter", json!({})).unwrap();
    let mut gated = engine.call("Gate", json!({})).unwrap();
    gated.wake_at = Some(Utc::now() - Duration::seconds(1));
    storage.save(&mut gated).unwrap();

    assert_eq!(engine.wake_sleeping(Some("Counter")).unwrap(), 2);
    assert_eq!(storage.sleeping_tasks(None).unwrap().len(), 1);

    // the gate stays closed and goes back to sleep for the background delay
    assert_eq!(engine.wake_sleeping(None).unwrap(), 1);
    assert!(storage.sleeping_tasks(None).unwrap().is_empty());
}

#[test]
fn test_wake_sleeping_skips_failures() {
    let (engine, storage) = common::setup(vec![counter(), gate()]);

    let mut gated = engine.call("Gate", json!({})).unwrap();
    gated.wake_at = Some(Utc::now() - Duration::seconds(1));
    expire(&storage, &mut gated);
    engine.start("Counter", json!({})).unwrap();

    assert_eq!(engine.wake_sleeping(None).unwrap(), 1);
    let gated = storage.find(gated.id.as_deref().unwrap()).unwrap().unwrap();
    assert!(gated.is_failed());
    assert_eq!(gated.exception_class.as_deref(), Some("Timeout"));
}

#[test]
fn test_delete_expired() {
    let (engine, storage) = common::setup(vec![counter(), gate()]);

    let mut old = engine.call("Counter", json!({})).unwrap();
    old.delete_at = Some(Utc::now() - Duration::seconds(1));
    storage.save(&mut old).unwrap();
    let mut old_gate = engine.call("Gate", json!({})).unwrap();
    old_gate.delete_at = Some(Utc::now() - Duration::seconds(1));
    storage.save(&mut old_gate).unwrap();
    let fresh = engine.call("Counter", json!({})).unwrap();

    assert_eq!(engine.delete_expired(Some("Counter")).unwrap(), 1);
    assert_eq!(engine.delete_expired(None).unwrap(), 1);
    assert_eq!(engine.delete_expired(None).unwrap(), 0);
    assert_eq!(storage.len(), 1);
    assert!(engine.find(fresh.id.as_deref().unwrap()).unwrap().is_some());
}

#[test]
fn test_timeout_callback_go_to() {
    let definition = expiring("GoTo", |c| {
        c.set("note", "gave up")?;
        c.go_to("expired");
        Ok(())
    });
    let (engine, storage) = common::setup(vec![definition]);

    let mut task = engine.call("GoTo", json!({})).unwrap();
    expire(&storage, &mut task);
    engine.wake(&mut task).unwrap();

    assert!(task.is_completed());
    assert!(task.is_in("expired"));
    assert_eq!(task.attribute("note"), Some(json!("gave up")));
    assert_eq!(storage.find(task.id.as_deref().unwrap()).unwrap().unwrap(), task);
}

#[test]
fn test_timeout_callback_complete() {
    let definition = expiring("Complete", |c| {
        let mut results = Results::new();
        results.insert("timed_out".to_string(), json!(true));
        c.complete(results);
        Ok(())
    });
    let (engine, storage) = common::setup(vec![definition]);

    let mut task = engine.call("Complete", json!({})).unwrap();
    expire(&storage, &mut task);
    engine.wake(&mut task).unwrap();

    assert!(task.is_completed());
    assert!(task.is_in("start"));
    assert_eq!(task.results.get("timed_out"), Some(&json!(true)));
}

#[test]
fn test_timeout_callback_error() {
    let definition = expiring("Raise", |c| Err(c.fail_with("too slow")));
    let (engine, storage) = common::setup(vec![definition]);

    let mut task = engine.call("Raise", json!({})).unwrap();
    expire(&storage, &mut task);
    let err = engine.wake(&mut task).unwrap_err();

    assert!(matches!(err, TaskError::Failure { .. }));
    assert!(task.is_failed());
    assert_eq!(task.exception_message.as_deref(), Some("too slow"));
    assert!(storage.find(task.id.as_deref().unwrap()).unwrap().unwrap().is_failed());
}

#[test]
fn test_timeout_callback_without_outcome() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let definition = expiring("Noop", move |c| {
        seen.fetch_add(1, Ordering::SeqCst);
        c.set("note", "noticed")
    });
    let (engine, storage) = common::setup(vec![definition]);

    let mut task = engine.call("Noop", json!({})).unwrap();
    expire(&storage, &mut task);
    engine.wake(&mut task).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(task.is_waiting_until("start"));
    let stored = storage.find(task.id.as_deref().unwrap()).unwrap().unwrap();
    assert_eq!(stored.attribute("note"), Some(json!("noticed")));

    // rescheduled, so the sweep does not pick it up again straight away
    assert!(stored.wake_at.unwrap() > Utc::now());
    assert_eq!(engine.wake_sleeping(None).unwrap(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
