//! State handlers.
//!
//! Each state of a task definition is bound to exactly one [`StateHandler`].
//! The execution loop looks the handler up by the instance's current state and
//! runs it against a [`DataCarrier`]; the handler records its outcome (a state
//! change or completion) on the carrier.
//!
//! Interactions are not states. They are bound by name and invoked from
//! outside the loop, see [`InteractionHandler`].

pub mod action;
pub mod decision;
pub mod interaction;
pub mod result;
pub mod wait;

use std::fmt;
use std::sync::Arc;

use crate::error::TaskResult;
use crate::task::DataCarrier;

pub use action::ActionHandler;
pub use decision::DecisionHandler;
pub use interaction::InteractionHandler;
pub use result::ResultHandler;
pub use wait::WaitHandler;

/// Callback run against the carrier.
pub type Callback = Arc<dyn Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync>;

/// Boolean test evaluated by decisions and waits.
pub type Condition = Arc<dyn Fn(&DataCarrier<'_>) -> TaskResult<bool> + Send + Sync>;

/// Common contract of every state handler.
pub trait Handler: Send + Sync + fmt::Debug {
    /// `false` when reaching this state may suspend execution.
    fn immediate(&self) -> bool {
        true
    }

    /// Run the handler for the carrier's current state.
    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()>;

    /// States this handler can transition to by name.
    fn declared_targets(&self) -> Vec<&str>;
}

/// Where a matched condition sends the task.
#[derive(Clone)]
pub enum Target {
    /// Go to the named state.
    State(String),
    /// Run a callback, which is expected to call `go_to`, `complete` or fail.
    Callback(Callback),
}

impl Target {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&mut DataCarrier<'_>) -> TaskResult<()> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    fn apply(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        match self {
            Self::State(state) => {
                carrier.go_to(state.as_str());
                Ok(())
            }
            Self::Callback(f) => f(carrier),
        }
    }

    fn state_name(&self) -> Option<&str> {
        match self {
            Self::State(state) => Some(state),
            Self::Callback(_) => None,
        }
    }
}

impl From<&str> for Target {
    fn from(state: &str) -> Self {
        Self::State(state.to_string())
    }
}

impl From<String> for Target {
    fn from(state: String) -> Self {
        Self::State(state)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(state) => f.debug_tuple("State").field(state).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Condition set shared by decisions and waits.
///
/// Supports a single condition with `if_true`/`if_false` targets, an ordered
/// list of `(condition, target)` branches, or both (the single condition is
/// tested first).
#[derive(Clone, Default)]
pub(crate) struct Conditions {
    test: Option<Condition>,
    if_true: Option<Target>,
    if_false: Option<Target>,
    branches: Vec<(Condition, Target)>,
}

impl Conditions {
    pub(crate) fn set_test(&mut self, condition: Condition) {
        self.test = Some(condition);
    }

    pub(crate) fn set_if_true(&mut self, target: Target) {
        self.if_true = Some(target);
    }

    pub(crate) fn set_if_false(&mut self, target: Target) {
        self.if_false = Some(target);
    }

    pub(crate) fn push(&mut self, condition: Condition, target: Target) {
        self.branches.push((condition, target));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.test.is_none() && self.branches.is_empty()
    }

    /// First matching target in declaration order, or `None`.
    pub(crate) fn evaluate(&self, carrier: &DataCarrier<'_>) -> TaskResult<Option<&Target>> {
        if let Some(test) = &self.test {
            let target = if test(carrier)? {
                self.if_true.as_ref()
            } else {
                self.if_false.as_ref()
            };
            if target.is_some() {
                return Ok(target);
            }
        }
        for (condition, target) in &self.branches {
            if condition(carrier)? {
                return Ok(Some(target));
            }
        }
        Ok(None)
    }

    pub(crate) fn targets(&self) -> Vec<&str> {
        self.if_true
            .iter()
            .chain(self.if_false.iter())
            .chain(self.branches.iter().map(|(_, target)| target))
            .filter_map(Target::state_name)
            .collect()
    }
}

impl fmt::Debug for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("test", &self.test.is_some())
            .field("if_true", &self.if_true)
            .field("if_false", &self.if_false)
            .field("branches", &self.branches.iter().map(|(_, t)| t).collect::<Vec<_>>())
            .finish()
    }
}

/// Kind of a state handler, for diagram exporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Action,
    Decision,
    Wait,
    Result,
}

/// The handler bound to one state.
#[derive(Debug, Clone)]
pub enum StateHandler {
    Action(ActionHandler),
    Decision(DecisionHandler),
    Wait(WaitHandler),
    Result(ResultHandler),
}

impl StateHandler {
    /// Which kind of handler this is.
    #[must_use]
    pub fn kind(&self) -> HandlerKind {
        match self {
            Self::Action(_) => HandlerKind::Action,
            Self::Decision(_) => HandlerKind::Decision,
            Self::Wait(_) => HandlerKind::Wait,
            Self::Result(_) => HandlerKind::Result,
        }
    }

    fn inner(&self) -> &dyn Handler {
        match self {
            Self::Action(h) => h,
            Self::Decision(h) => h,
            Self::Wait(h) => h,
            Self::Result(h) => h,
        }
    }
}

impl Handler for StateHandler {
    fn immediate(&self) -> bool {
        self.inner().immediate()
    }

    fn handle(&self, carrier: &mut DataCarrier<'_>) -> TaskResult<()> {
        self.inner().handle(carrier)
    }

    fn declared_targets(&self) -> Vec<&str> {
        self.inner().declared_targets()
    }
}

impl From<ActionHandler> for StateHandler {
    fn from(handler: ActionHandler) -> Self {
        Self::Action(handler)
    }
}

impl From<DecisionHandler> for StateHandler {
    fn from(handler: DecisionHandler) -> Self {
        Self::Decision(handler)
    }
}

impl From<WaitHandler> for StateHandler {
    fn from(handler: WaitHandler) -> Self {
        Self::Wait(handler)
    }
}

impl From<ResultHandler> for StateHandler {
    fn from(handler: ResultHandler) -> Self {
        Self::Result(handler)
    }
}
