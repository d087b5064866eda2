use crate::core::director::{
    Director, DirectorCore, DirectorState, begin_run, begin_wrapup, node_index,
};
use crate::core::error::Result;
use crate::core::node::{BufferNode, WorkflowNode};
use crate::core::workflow::graph::{NodeInput, NodeOutput, WorkflowGraph, insert_node_before_inflow};
use crate::core::wrapup::WrapupResult;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

/// Sweeps over the nodes, triggering each in turn and handing its outputs to
/// the inflows subscribed to them, until a full sweep changes nothing.
///
/// A buffer node is placed in front of every inflow, so an output is only held
/// back while a buffer has already seen end-of-stream.
#[derive(Default)]
pub struct DataDrivenDirector {
    core: DirectorCore,
    subscriptions: BTreeMap<NodeOutput, Vec<NodeInput>>,
}

impl DataDrivenDirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes_step_once(mut self, step_once: bool) -> Self {
        self.core.nodes_step_once = step_once;
        self
    }

    fn subscribers_ready(
        &self,
        nodes: &[Box<dyn WorkflowNode>],
        index: &HashMap<String, usize>,
        subscribers: &[NodeInput],
    ) -> Result<bool> {
        for input in subscribers {
            if let Some(&i) = index.get(&input.node) {
                if !nodes[i].ready_for_input_packet(&input.label)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Moves every pending output of node `n` whose subscribers can all take it.
    fn publish_outputs(
        &self,
        nodes: &mut [Box<dyn WorkflowNode>],
        index: &HashMap<String, usize>,
        n: usize,
    ) -> Result<bool> {
        let name = nodes[n].name().to_string();
        let mut published = false;
        for label in nodes[n].core().outflow_labels() {
            if !nodes[n].core().outflow(&label)?.packet_ready() {
                continue;
            }
            let subscribers = self
                .subscriptions
                .get(&NodeOutput::new(&name, &label))
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if !self.subscribers_ready(nodes, index, subscribers)? {
                continue;
            }
            let packet = nodes[n].output_packet(&label)?;
            for input in subscribers {
                if let Some(&i) = index.get(&input.node) {
                    nodes[i].set_input_packet(&input.label, packet.clone())?;
                }
            }
            published = true;
        }
        Ok(published)
    }
}

#[async_trait]
impl Director for DataDrivenDirector {
    fn core(&self) -> &DirectorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DirectorCore {
        &mut self.core
    }

    fn elaborate(
        &mut self,
        nodes: &mut Vec<Box<dyn WorkflowNode>>,
        graph: &WorkflowGraph,
    ) -> Result<bool> {
        self.core.state.require(
            "elaborate",
            &[DirectorState::PropertiesSet, DirectorState::Modified],
        )?;
        if self.core.state == DirectorState::PropertiesSet {
            for input in graph.sources().keys() {
                insert_node_before_inflow(nodes, input)?;
            }
            self.core.state = DirectorState::Modified;
            return Ok(true);
        }
        self.subscriptions = graph.subscriptions();
        self.core.state = DirectorState::Elaborated;
        Ok(false)
    }

    async fn run(&mut self, nodes: &mut [Box<dyn WorkflowNode>]) -> Result<()> {
        begin_run(&mut self.core)?;
        let index = node_index(nodes);
        loop {
            let mut running = false;
            for n in 0..nodes.len() {
                if nodes[n].trigger().await? {
                    running = true;
                }
                if nodes[n].outputs_ready() && self.publish_outputs(nodes, &index, n)? {
                    running = true;
                }
            }
            if !running {
                break;
            }
        }
        self.core.state = DirectorState::Ran;
        Ok(())
    }

    fn wrapup(&mut self, nodes: &[Box<dyn WorkflowNode>]) -> Result<WrapupResult> {
        begin_wrapup(&mut self.core)?;
        let mut result = WrapupResult::new();
        for buffer in nodes.iter().filter_map(|n| n.downcast_ref::<BufferNode>()) {
            result.add(buffer.queue_record());
        }
        Ok(result)
    }

    fn clone_box(&self) -> Box<dyn Director> {
        Box::new(DataDrivenDirector::new().with_nodes_step_once(self.core.nodes_step_once))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::WorkflowContext;
    use crate::core::director::test_support::{doubling_pipeline, initialize_all, portal_value};
    use serde_json::json;

    #[tokio::test]
    async fn test_buffers_inserted_then_pipeline_runs_to_completion() {
        let context = WorkflowContext::shared_default();
        let mut director = DataDrivenDirector::new();
        let mut nodes = doubling_pipeline(&mut director, &context, 3).unwrap();
        assert_eq!(
            nodes.iter().filter(|n| n.is::<BufferNode>()).count(),
            2,
            "one buffer per inflow"
        );
        assert_eq!(director.state(), DirectorState::Initialized);

        initialize_all(&mut nodes).unwrap();
        director.run(&mut nodes).await.unwrap();
        assert_eq!(director.state(), DirectorState::Ran);
        assert_eq!(portal_value(&nodes, "doubled").unwrap(), json!(6));

        let doubler = nodes.iter().find(|n| n.name() == "Doubler").unwrap();
        assert_eq!(doubler.step_count(), 3);
        assert!(director.wrapup(&nodes).unwrap().is_empty());
        assert_eq!(director.state(), DirectorState::WrappedUp);
    }

    #[tokio::test]
    async fn test_run_requires_initialize() {
        let mut director = DataDrivenDirector::new();
        let mut nodes: Vec<Box<dyn WorkflowNode>> = Vec::new();
        assert!(director.run(&mut nodes).await.is_err());
        director.after_properties_set().unwrap();
        assert!(director.after_properties_set().is_err());
    }
}
