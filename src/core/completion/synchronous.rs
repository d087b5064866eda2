use crate::core::actor::Actor;
use crate::core::completion::{
    ActorCompletionService, ActorRun, Completion, ServiceState, illegal_service_call,
};
use crate::core::error::{Result, WorkflowError};
use crate::core::Variables;
use async_trait::async_trait;
use uuid::Uuid;

/// Steps the node's own actor inline, one step at a time.
///
/// A submitted step must be taken before the next submit.
pub struct SynchronousActorCompletionService {
    state: ServiceState,
    completed: Option<ActorRun>,
}

impl SynchronousActorCompletionService {
    pub fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            completed: None,
        }
    }
}

impl Default for SynchronousActorCompletionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActorCompletionService for SynchronousActorCompletionService {
    fn state(&self) -> ServiceState {
        self.state
    }

    fn start(&mut self) -> Result<()> {
        if self.state != ServiceState::Stopped {
            return Err(illegal_service_call("start", self.state));
        }
        self.completed = None;
        self.state = ServiceState::Idle;
        Ok(())
    }

    async fn submit(&mut self, actor: &mut Actor, variables: Variables) -> Result<()> {
        match self.state {
            ServiceState::Stopped | ServiceState::ShutDown | ServiceState::Blocked => {
                return Err(illegal_service_call("submit", self.state));
            }
            _ => {}
        }
        let result = actor.step().await;
        self.completed = Some(ActorRun::capture(Uuid::new_v4(), actor, variables, result));
        self.state = ServiceState::Blocked;
        Ok(())
    }

    async fn take(&mut self) -> Result<Completion> {
        match self.state {
            ServiceState::Blocked => {
                self.state = ServiceState::Idle;
                self.completed.take().map(Completion::Run).ok_or_else(|| {
                    WorkflowError::contract("Blocked completion service holds no completed step")
                })
            }
            ServiceState::ShutDown => {
                self.state = ServiceState::Stopped;
                Ok(Completion::EndOfRunners)
            }
            state => Err(illegal_service_call("take", state)),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if matches!(self.state, ServiceState::Blocked | ServiceState::Idle) {
            self.state = ServiceState::ShutDown;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.completed = None;
        self.state = ServiceState::Stopped;
    }
}
