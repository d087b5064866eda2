use crate::core::data::packet::Packet;
use crate::core::director::{
    Director, DirectorCore, DirectorState, begin_run, begin_wrapup,
};
use crate::core::error::Result;
use crate::core::node::WorkflowNode;
use crate::core::workflow::graph::{NodeInput, NodeOutput, WorkflowGraph};
use crate::core::wrapup::{BufferKind, UnusedDataRecord, WrapupResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};

/// A data-driven director that keeps several steps of a node in flight.
///
/// Starting a step and collecting its result are separate moves: a node is
/// started again as long as it has fewer than its maximum number of concurrent
/// steps outstanding and its inputs are staged, and results are only collected
/// once no node can make progress otherwise. Packets wait in one queue per
/// inflow, so the graph is left as declared.
#[derive(Default)]
pub struct ConcurrentDataDrivenDirector {
    core: DirectorCore,
    subscriptions: BTreeMap<NodeOutput, Vec<NodeInput>>,
    queues: BTreeMap<NodeInput, VecDeque<Packet>>,
    in_flight: Vec<usize>,
}

impl ConcurrentDataDrivenDirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes_step_once(mut self, step_once: bool) -> Self {
        self.core.nodes_step_once = step_once;
        self
    }

    /// Moves every pending output of `node` into its subscribers' queues.
    fn drain_outputs(&mut self, node: &mut dyn WorkflowNode) -> Result<bool> {
        let name = node.name().to_string();
        let mut drained = false;
        for label in node.core().outflow_labels() {
            if !node.core().outflow(&label)?.packet_ready() {
                continue;
            }
            let packet = node.output_packet(&label)?;
            drained = true;
            let Some(subscribers) = self.subscriptions.get(&NodeOutput::new(&name, &label)) else {
                continue;
            };
            for input in subscribers {
                self.queues
                    .entry(input.clone())
                    .or_default()
                    .push_back(packet.clone());
            }
        }
        Ok(drained)
    }

    /// Hands queued packets to `node` for as long as its inflows take them.
    fn feed(&mut self, node: &mut dyn WorkflowNode) -> Result<bool> {
        let mut fed = false;
        for label in node.core().inflow_labels() {
            let input = NodeInput::new(node.name(), &label);
            let Some(queue) = self.queues.get_mut(&input) else {
                continue;
            };
            while !queue.is_empty() && node.ready_for_input_packet(&label)? {
                if let Some(packet) = queue.pop_front() {
                    node.set_input_packet(&label, packet)?;
                    fed = true;
                }
            }
        }
        Ok(fed)
    }

    fn capacity(node: &dyn WorkflowNode) -> usize {
        if node.core().steps_once() {
            1
        } else {
            node.max_concurrent_steps().max(1)
        }
    }

    /// Collects one outstanding step, oldest node first.
    async fn finish_one(&mut self, nodes: &mut [Box<dyn WorkflowNode>]) -> Result<bool> {
        let Some(n) = self.in_flight.iter().position(|&count| count > 0) else {
            return Ok(false);
        };
        self.drain_outputs(nodes[n].as_mut())?;
        nodes[n].finish_trigger().await?;
        self.in_flight[n] -= 1;
        self.drain_outputs(nodes[n].as_mut())?;
        Ok(true)
    }
}

#[async_trait]
impl Director for ConcurrentDataDrivenDirector {
    fn core(&self) -> &DirectorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DirectorCore {
        &mut self.core
    }

    fn elaborate(
        &mut self,
        _nodes: &mut Vec<Box<dyn WorkflowNode>>,
        graph: &WorkflowGraph,
    ) -> Result<bool> {
        self.core
            .state
            .require("elaborate", &[DirectorState::PropertiesSet])?;
        self.subscriptions = graph.subscriptions();
        self.core.state = DirectorState::Elaborated;
        Ok(false)
    }

    async fn run(&mut self, nodes: &mut [Box<dyn WorkflowNode>]) -> Result<()> {
        begin_run(&mut self.core)?;
        self.queues.clear();
        self.in_flight = vec![0; nodes.len()];

        loop {
            let mut progress = false;
            for n in 0..nodes.len() {
                let node = nodes[n].as_mut();
                progress |= self.drain_outputs(node)?;
                progress |= self.feed(node)?;

                if !node.defers_completion() {
                    if !node.outputs_ready() && node.trigger().await? {
                        progress = true;
                    }
                    continue;
                }
                while self.in_flight[n] < Self::capacity(node) && node.start_trigger().await? {
                    self.in_flight[n] += 1;
                    progress = true;
                }
            }
            if !progress && !self.finish_one(nodes).await? {
                break;
            }
        }

        log::debug!("Concurrent run over {} nodes finished", nodes.len());
        self.core.state = DirectorState::Ran;
        Ok(())
    }

    fn wrapup(&mut self, _nodes: &[Box<dyn WorkflowNode>]) -> Result<WrapupResult> {
        begin_wrapup(&mut self.core)?;
        let mut result = WrapupResult::new();
        for (input, queue) in &self.queues {
            result.add(UnusedDataRecord::new(
                &input.node,
                &input.label,
                BufferKind::Queue,
                queue.iter().cloned(),
            ));
        }
        self.queues.clear();
        Ok(result)
    }

    fn clone_box(&self) -> Box<dyn Director> {
        Box::new(
            ConcurrentDataDrivenDirector::new().with_nodes_step_once(self.core.nodes_step_once),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::WorkflowContext;
    use crate::core::director::test_support::{
        doubling_pipeline, initialize_all, portal_value, wrapup_all,
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_sequential_nodes_run_to_completion() {
        let context = WorkflowContext::shared_default();
        let mut director = ConcurrentDataDrivenDirector::new();
        let mut nodes = doubling_pipeline(&mut director, &context, 5).unwrap();

        initialize_all(&mut nodes).unwrap();
        director.run(&mut nodes).await.unwrap();
        assert_eq!(portal_value(&nodes, "doubled").unwrap(), json!(10));
        assert!(director.in_flight.iter().all(|&count| count == 0));
        assert!(director.wrapup(&nodes).unwrap().is_empty());
        assert!(wrapup_all(&mut nodes).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nodes_step_once_limits_each_node_to_one_step() {
        let context = WorkflowContext::shared_default();
        let mut director = ConcurrentDataDrivenDirector::new().with_nodes_step_once(true);
        let mut nodes = doubling_pipeline(&mut director, &context, 5).unwrap();

        initialize_all(&mut nodes).unwrap();
        director.run(&mut nodes).await.unwrap();
        assert_eq!(portal_value(&nodes, "doubled").unwrap(), json!(2));
        let counter = nodes.iter().find(|n| n.name() == "Counter").unwrap();
        assert_eq!(counter.step_count(), 1);
    }
}
