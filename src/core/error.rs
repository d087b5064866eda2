use crate::core::actor::state::ActorState;
use thiserror::Error;

/// Error type returned by actor bodies.
///
/// Any error an actor step produces travels through this box, including errors
/// raised by nested workflows.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the workflow kernel.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A lifecycle method was called on an actor outside its permitted states.
    #[error("Illegal call to {operation} on actor '{actor}' in state {state}")]
    IllegalActorState {
        actor: String,
        operation: &'static str,
        state: ActorState,
    },

    /// A programming contract of a node, director or completion service was broken.
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Null value received on non-nullable input '{label}' of actor '{actor}'")]
    NullInput { actor: String, label: String },

    #[error("Null value produced on non-nullable output '{label}' of actor '{actor}'")]
    NullOutput { actor: String, label: String },

    /// A node is wired in a way its actor cannot satisfy.
    #[error("Node declaration error: {0}")]
    NodeDeclaration(String),

    /// An actor's own signature is malformed or misused.
    #[error("Actor declaration error: {0}")]
    ActorDeclaration(String),

    /// The workflow graph as a whole is structurally invalid.
    #[error("Illegal workflow specification: {0}")]
    IllegalWorkflowSpec(String),

    /// An actor step failed. Carries the identity of the actor that raised it.
    #[error("Actor '{actor}' threw exception: {source}")]
    Actor {
        actor: String,
        #[source]
        source: BoxError,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A blocking wait was abandoned before its result arrived.
    #[error("Wait interrupted: {0}")]
    Cancelled(String),
}

impl WorkflowError {
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        WorkflowError::Contract(message.into())
    }

    /// Returns true when this error wraps an exception thrown by an actor step.
    pub fn is_actor_exception(&self) -> bool {
        matches!(self, WorkflowError::Actor { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_exception_message_names_actor() {
        let source: BoxError = "division by zero".into();
        let err = WorkflowError::Actor {
            actor: "divider".to_string(),
            source,
        };
        assert!(err.is_actor_exception());
        assert_eq!(
            err.to_string(),
            "Actor 'divider' threw exception: division by zero"
        );
    }

    #[test]
    fn test_illegal_state_message() {
        let err = WorkflowError::IllegalActorState {
            actor: "counter".to_string(),
            operation: "step",
            state: ActorState::Configured,
        };
        assert_eq!(
            err.to_string(),
            "Illegal call to step on actor 'counter' in state CONFIGURED"
        );
        assert!(!err.is_actor_exception());
    }
}
