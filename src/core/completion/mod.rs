//! Completion services decide how a node's actor steps execute: inline, or as
//! concurrent clones whose results are delivered in submission or completion order.

pub mod ordered;
pub mod synchronous;
pub mod unordered;

pub use ordered::OrderedActorCompletionService;
pub use synchronous::SynchronousActorCompletionService;
pub use unordered::UnorderedActorCompletionService;

use crate::core::actor::Actor;
use crate::core::error::{Result, WorkflowError};
use crate::core::{NodeValue, Variables};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// States of a completion service.
///
/// The synchronous service moves between `Idle` and `Blocked`; the concurrent
/// services between `Idle`, `Active` and `ShuttingDown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Idle,
    Blocked,
    Active,
    ShuttingDown,
    ShutDown,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "STOPPED",
            ServiceState::Idle => "IDLE",
            ServiceState::Blocked => "BLOCKED",
            ServiceState::Active => "ACTIVE",
            ServiceState::ShuttingDown => "SHUTTING_DOWN",
            ServiceState::ShutDown => "SHUT_DOWN",
        };
        f.write_str(name)
    }
}

/// One output as it stood when a step finished.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// `Null` when the step produced nothing on this output.
    pub value: NodeValue,
    pub enabled: bool,
}

/// The result of one actor step: the node variables it was submitted with, a
/// snapshot of the actor's outputs, and the error it raised, if any.
#[derive(Debug)]
pub struct ActorRun {
    id: Uuid,
    actor: String,
    variables: Variables,
    outputs: BTreeMap<String, StepOutput>,
    error: Option<WorkflowError>,
}

impl ActorRun {
    pub(crate) fn capture(id: Uuid, actor: &Actor, variables: Variables, result: Result<()>) -> Self {
        let outputs = actor
            .output_names()
            .map(|label| {
                let output = StepOutput {
                    value: actor.output_value(label).cloned().unwrap_or(NodeValue::Null),
                    enabled: actor.output_enabled(label),
                };
                (label.clone(), output)
            })
            .collect();
        Self {
            id,
            actor: actor.name().to_string(),
            variables,
            outputs,
            error: result.err(),
        }
    }

    pub(crate) fn failed(id: Uuid, actor: String, variables: Variables, error: WorkflowError) -> Self {
        Self {
            id,
            actor,
            variables,
            outputs: BTreeMap::new(),
            error: Some(error),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn actor_name(&self) -> &str {
        &self.actor
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn outputs(&self) -> &BTreeMap<String, StepOutput> {
        &self.outputs
    }

    pub fn output(&self, label: &str) -> Option<&StepOutput> {
        self.outputs.get(label)
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<WorkflowError> {
        self.error.take()
    }

    pub fn into_variables(self) -> Variables {
        self.variables
    }
}

/// What `take` hands back: a finished step, or the marker that the service was
/// shut down and every submitted step has been taken.
#[derive(Debug)]
pub enum Completion {
    Run(ActorRun),
    EndOfRunners,
}

impl Completion {
    pub fn is_end_of_runners(&self) -> bool {
        matches!(self, Completion::EndOfRunners)
    }

    pub fn into_run(self) -> Option<ActorRun> {
        match self {
            Completion::Run(run) => Some(run),
            Completion::EndOfRunners => None,
        }
    }
}

/// Executes actor steps on behalf of a node.
#[async_trait]
pub trait ActorCompletionService: Send + Sync {
    fn state(&self) -> ServiceState;

    /// Prepares the service for a run. Only legal when stopped.
    fn start(&mut self) -> Result<()>;

    /// Submits a step of `actor` with the node variables to return alongside it.
    ///
    /// The synchronous service steps `actor` in place; the concurrent services
    /// step a clone and may wait for capacity.
    async fn submit(&mut self, actor: &mut Actor, variables: Variables) -> Result<()>;

    /// Waits for the next completion.
    async fn take(&mut self) -> Result<Completion>;

    /// Accepts no further submissions. Once all outstanding steps are taken,
    /// `take` yields [`Completion::EndOfRunners`] and the service stops.
    async fn shutdown(&mut self) -> Result<()>;

    /// Abandons outstanding work and returns to `Stopped`.
    fn reset(&mut self);
}

/// Picks the service for a node: concurrent when more than one step may run at
/// once, synchronous otherwise.
pub fn completion_service_for(
    max_concurrency: usize,
    ordered: bool,
) -> Box<dyn ActorCompletionService> {
    if max_concurrency > 1 {
        if ordered {
            Box::new(OrderedActorCompletionService::new(max_concurrency + 1))
        } else {
            Box::new(UnorderedActorCompletionService::new(max_concurrency + 1))
        }
    } else {
        Box::new(SynchronousActorCompletionService::new())
    }
}

pub(crate) fn illegal_service_call(operation: &str, state: ServiceState) -> WorkflowError {
    WorkflowError::contract(format!(
        "Illegal call to {} on completion service in state {}",
        operation, state
    ))
}

/// State bookkeeping shared by the concurrent services.
#[derive(Debug)]
pub(crate) struct ConcurrentLifecycle {
    state: ServiceState,
    active: usize,
}

impl ConcurrentLifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            active: 0,
        }
    }

    pub(crate) fn state(&self) -> ServiceState {
        self.state
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        if self.state != ServiceState::Stopped {
            return Err(illegal_service_call("start", self.state));
        }
        self.state = ServiceState::Idle;
        self.active = 0;
        Ok(())
    }

    pub(crate) fn before_submit(&mut self) -> Result<()> {
        match self.state {
            ServiceState::Idle | ServiceState::Active => {
                self.state = ServiceState::Active;
                self.active += 1;
                Ok(())
            }
            state => Err(illegal_service_call("submit", state)),
        }
    }

    pub(crate) fn before_take(&self) -> Result<()> {
        match self.state {
            ServiceState::Stopped | ServiceState::Idle => Err(illegal_service_call("take", self.state)),
            _ => Ok(()),
        }
    }

    pub(crate) fn after_take(&mut self, completion: &Completion) -> Result<()> {
        match (completion, self.state) {
            (Completion::EndOfRunners, ServiceState::ShutDown) => {
                if self.active != 0 {
                    return Err(WorkflowError::contract(format!(
                        "End of runners received with {} steps outstanding",
                        self.active
                    )));
                }
                self.state = ServiceState::Stopped;
                Ok(())
            }
            (Completion::EndOfRunners, state) => Err(WorkflowError::contract(format!(
                "End of runners received while completion service {}",
                state
            ))),
            (Completion::Run(_), _) => {
                self.active = self.active.checked_sub(1).ok_or_else(|| {
                    WorkflowError::contract("Completed step taken with none outstanding")
                })?;
                if self.active == 0 {
                    match self.state {
                        ServiceState::Active => self.state = ServiceState::Idle,
                        ServiceState::ShuttingDown => self.state = ServiceState::ShutDown,
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }

    /// Moves toward shutdown. Returns true when the end signal must be sent.
    pub(crate) fn begin_shutdown(&mut self) -> bool {
        match self.state {
            ServiceState::Idle => {
                self.state = ServiceState::ShutDown;
                true
            }
            ServiceState::Active => {
                self.state = ServiceState::ShuttingDown;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.state = ServiceState::Stopped;
        self.active = 0;
    }
}

/// A step executing on a worker task.
pub(crate) struct RunningStep {
    id: Uuid,
    actor: String,
    variables: Variables,
    handle: JoinHandle<ActorRun>,
}

impl RunningStep {
    /// Steps `actor` on a worker: a blocking thread for synchronous logic, a
    /// spawned task for asynchronous logic.
    pub(crate) fn spawn(mut actor: Actor, variables: Variables) -> Self {
        let id = Uuid::new_v4();
        let name = actor.name().to_string();
        let submitted = variables.clone();
        let handle = if actor.is_async() {
            tokio::spawn(async move {
                let result = actor.step().await;
                ActorRun::capture(id, &actor, variables, result)
            })
        } else {
            tokio::task::spawn_blocking(move || {
                let result = actor.step_blocking();
                ActorRun::capture(id, &actor, variables, result)
            })
        };
        Self {
            id,
            actor: name,
            variables: submitted,
            handle,
        }
    }

    /// Waits for the step. A panicking step is reported as the step's error.
    pub(crate) async fn join(self) -> ActorRun {
        match self.handle.await {
            Ok(run) => run,
            Err(e) => {
                log::error!("Step {} of actor {} did not complete: {}", self.id, self.actor, e);
                let error = WorkflowError::Actor {
                    actor: self.actor.clone(),
                    source: format!("step did not complete: {}", e).into(),
                };
                ActorRun::failed(self.id, self.actor, self.variables, error)
            }
        }
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_service_by_concurrency() {
        assert_eq!(completion_service_for(1, true).state(), ServiceState::Stopped);
        let mut lifecycle = ConcurrentLifecycle::new();
        assert!(lifecycle.before_submit().is_err());
        lifecycle.start().unwrap();
        assert!(lifecycle.start().is_err());
        assert!(lifecycle.before_take().is_err());
    }

    #[test]
    fn test_concurrent_lifecycle_accounting() {
        let mut lifecycle = ConcurrentLifecycle::new();
        lifecycle.start().unwrap();
        lifecycle.before_submit().unwrap();
        lifecycle.before_submit().unwrap();
        assert_eq!(lifecycle.state(), ServiceState::Active);
        assert!(lifecycle.begin_shutdown());
        assert_eq!(lifecycle.state(), ServiceState::ShuttingDown);
        assert!(lifecycle.before_submit().is_err());

        let run = || {
            Completion::Run(ActorRun::failed(
                Uuid::new_v4(),
                "a".into(),
                Variables::new(),
                WorkflowError::contract("x"),
            ))
        };
        lifecycle.after_take(&run()).unwrap();
        assert_eq!(lifecycle.state(), ServiceState::ShuttingDown);
        lifecycle.after_take(&run()).unwrap();
        assert_eq!(lifecycle.state(), ServiceState::ShutDown);
        lifecycle.after_take(&Completion::EndOfRunners).unwrap();
        assert_eq!(lifecycle.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_end_of_runners_is_not_counted_as_work() {
        let mut lifecycle = ConcurrentLifecycle::new();
        lifecycle.start().unwrap();
        lifecycle.before_submit().unwrap();
        assert!(lifecycle.after_take(&Completion::EndOfRunners).is_err());
    }
}
