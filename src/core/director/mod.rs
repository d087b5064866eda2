//! Directors: the scheduling policies that drive a workflow's nodes until
//! nothing more can happen.

pub mod concurrent;
pub mod data_driven;
pub mod publish_subscribe;

pub use concurrent::ConcurrentDataDrivenDirector;
pub use data_driven::DataDrivenDirector;
pub use publish_subscribe::PublishSubscribeDirector;

use crate::core::error::{Result, WorkflowError};
use crate::core::node::WorkflowNode;
use crate::core::workflow::graph::WorkflowGraph;
use crate::core::wrapup::WrapupResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Lifecycle states of a director.
///
/// ```text
/// CONSTRUCTED -> PROPERTIES_SET -> (MODIFIED) -> ELABORATED -> CONFIGURED
///     -> INITIALIZED -> RUNNING -> RAN -> WRAPPED_UP -> RUNNING ... -> DISPOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectorState {
    Constructed,
    PropertiesSet,
    Modified,
    Elaborated,
    Configured,
    Initialized,
    Running,
    Ran,
    WrappedUp,
    Disposed,
}

impl DirectorState {
    pub(crate) fn require(self, operation: &str, allowed: &[DirectorState]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(WorkflowError::contract(format!(
                "Illegal call to {} on director in state {}",
                operation, self
            )))
        }
    }
}

impl fmt::Display for DirectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DirectorState::Constructed => "CONSTRUCTED",
            DirectorState::PropertiesSet => "PROPERTIES_SET",
            DirectorState::Modified => "MODIFIED",
            DirectorState::Elaborated => "ELABORATED",
            DirectorState::Configured => "CONFIGURED",
            DirectorState::Initialized => "INITIALIZED",
            DirectorState::Running => "RUNNING",
            DirectorState::Ran => "RAN",
            DirectorState::WrappedUp => "WRAPPED_UP",
            DirectorState::Disposed => "DISPOSED",
        };
        f.write_str(name)
    }
}

/// Lifecycle bookkeeping shared by every director.
#[derive(Debug, Clone)]
pub struct DirectorCore {
    pub(crate) state: DirectorState,
    pub(crate) nodes_step_once: bool,
}

impl Default for DirectorCore {
    fn default() -> Self {
        Self {
            state: DirectorState::Constructed,
            nodes_step_once: false,
        }
    }
}

impl DirectorCore {
    pub(crate) fn transition(
        &mut self,
        operation: &str,
        allowed: &[DirectorState],
        next: DirectorState,
    ) -> Result<()> {
        self.state.require(operation, allowed)?;
        self.state = next;
        Ok(())
    }
}

/// The scheduling policy of a workflow.
///
/// A director may rewrite the graph while the workflow elaborates, then
/// repeatedly triggers nodes and moves packets between them on every run until
/// the workflow is quiescent.
#[async_trait]
pub trait Director: Send + Sync {
    fn core(&self) -> &DirectorCore;
    fn core_mut(&mut self) -> &mut DirectorCore;

    fn state(&self) -> DirectorState {
        self.core().state
    }

    /// Forces every node of the workflow to step exactly once.
    fn nodes_step_once(&self) -> bool {
        self.core().nodes_step_once
    }

    fn after_properties_set(&mut self) -> Result<()> {
        self.core_mut().transition(
            "after_properties_set",
            &[DirectorState::Constructed],
            DirectorState::PropertiesSet,
        )
    }

    /// One rewriting pass over the graph. Returns true when nodes were added or
    /// rewired, in which case the workflow analyzes the graph again and calls
    /// `elaborate` once more.
    fn elaborate(
        &mut self,
        nodes: &mut Vec<Box<dyn WorkflowNode>>,
        graph: &WorkflowGraph,
    ) -> Result<bool>;

    fn configure(&mut self) -> Result<()> {
        self.core_mut().transition(
            "configure",
            &[DirectorState::Elaborated],
            DirectorState::Configured,
        )
    }

    fn initialize(&mut self) -> Result<()> {
        self.core_mut().transition(
            "initialize",
            &[DirectorState::Configured, DirectorState::WrappedUp],
            DirectorState::Initialized,
        )
    }

    /// Drives the nodes of one workflow run to quiescence.
    async fn run(&mut self, nodes: &mut [Box<dyn WorkflowNode>]) -> Result<()>;

    /// Reports data the director still holds after a run.
    fn wrapup(&mut self, nodes: &[Box<dyn WorkflowNode>]) -> Result<WrapupResult>;

    fn dispose(&mut self) -> Result<()> {
        self.core_mut().transition(
            "dispose",
            &[
                DirectorState::Configured,
                DirectorState::Initialized,
                DirectorState::WrappedUp,
            ],
            DirectorState::Disposed,
        )
    }

    /// A fresh director with the same properties, in the constructed state.
    fn clone_box(&self) -> Box<dyn Director>;
}

pub(crate) fn node_index(nodes: &[Box<dyn WorkflowNode>]) -> HashMap<String, usize> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.name().to_string(), i))
        .collect()
}

pub(crate) fn begin_run(core: &mut DirectorCore) -> Result<()> {
    core.transition(
        "run",
        &[DirectorState::Initialized, DirectorState::WrappedUp],
        DirectorState::Running,
    )
}

pub(crate) fn begin_wrapup(core: &mut DirectorCore) -> Result<()> {
    core.transition(
        "wrapup",
        &[DirectorState::Initialized, DirectorState::Ran],
        DirectorState::WrappedUp,
    )
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_director_state_contract_message() {
        let mut core = DirectorCore::default();
        let err = core
            .transition("run", &[DirectorState::Initialized], DirectorState::Running)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Contract violation: Illegal call to run on director in state CONSTRUCTED"
        );
        core.transition(
            "after_properties_set",
            &[DirectorState::Constructed],
            DirectorState::PropertiesSet,
        )
        .unwrap();
        assert_eq!(core.state, DirectorState::PropertiesSet);
    }
}
