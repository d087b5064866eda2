use crate::core::error::{Result, WorkflowError};
use std::fmt;

/// Lifecycle states of an actor.
///
/// ```text
/// CONSTRUCTED -> PROPERTIES_SET -> ELABORATED -> CONFIGURED -> INITIALIZED
///     INITIALIZED -> STEPPED -> STEPPED ... -> WRAPPED_UP -> INITIALIZED | DISPOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    Constructed,
    PropertiesSet,
    Elaborated,
    Configured,
    Initialized,
    Stepped,
    WrappedUp,
    Disposed,
}

impl ActorState {
    /// Fails with [`WorkflowError::IllegalActorState`] unless `self` is one of `allowed`.
    pub(crate) fn require(
        self,
        actor: &str,
        operation: &'static str,
        allowed: &[ActorState],
    ) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(WorkflowError::IllegalActorState {
                actor: actor.to_string(),
                operation,
                state: self,
            })
        }
    }

    /// Fails unless `self` is none of `disallowed`.
    pub(crate) fn disallow(
        self,
        actor: &str,
        operation: &'static str,
        disallowed: &[ActorState],
    ) -> Result<()> {
        if disallowed.contains(&self) {
            Err(WorkflowError::IllegalActorState {
                actor: actor.to_string(),
                operation,
                state: self,
            })
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorState::Constructed => "CONSTRUCTED",
            ActorState::PropertiesSet => "PROPERTIES_SET",
            ActorState::Elaborated => "ELABORATED",
            ActorState::Configured => "CONFIGURED",
            ActorState::Initialized => "INITIALIZED",
            ActorState::Stepped => "STEPPED",
            ActorState::WrappedUp => "WRAPPED_UP",
            ActorState::Disposed => "DISPOSED",
        };
        f.write_str(name)
    }
}
