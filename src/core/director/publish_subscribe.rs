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

type Subscription = (NodeOutput, NodeInput);

/// Publishes every output into one queue per subscribed inflow and feeds
/// queued packets to nodes as they become ready. The graph is left as declared.
#[derive(Default)]
pub struct PublishSubscribeDirector {
    core: DirectorCore,
    subscriptions: BTreeMap<NodeOutput, Vec<NodeInput>>,
    queues: BTreeMap<Subscription, VecDeque<Packet>>,
}

impl PublishSubscribeDirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes_step_once(mut self, step_once: bool) -> Self {
        self.core.nodes_step_once = step_once;
        self
    }

    /// Packets queued for `input` and not yet delivered.
    pub fn queued_for(&self, input: &NodeInput) -> usize {
        self.queues
            .iter()
            .filter(|((_, subscriber), _)| subscriber == input)
            .map(|(_, queue)| queue.len())
            .sum()
    }

    fn publish_outputs(&mut self, node: &mut dyn WorkflowNode) -> Result<()> {
        let name = node.name().to_string();
        for label in node.core().outflow_labels() {
            if !node.core().outflow(&label)?.packet_ready() {
                continue;
            }
            let packet = node.output_packet(&label)?;
            let output = NodeOutput::new(&name, &label);
            let Some(subscribers) = self.subscriptions.get(&output) else {
                continue;
            };
            for input in subscribers {
                self.queues
                    .entry((output.clone(), input.clone()))
                    .or_default()
                    .push_back(packet.clone());
            }
        }
        Ok(())
    }

    /// Delivers at most one queued packet to each ready inflow of `node`.
    fn flush_packets_to_node(&mut self, node: &mut dyn WorkflowNode) -> Result<bool> {
        let mut flushed = false;
        for ((_, input), queue) in self.queues.iter_mut() {
            if input.node != node.name() || queue.is_empty() {
                continue;
            }
            if !node.ready_for_input_packet(&input.label)? {
                continue;
            }
            if let Some(packet) = queue.pop_front() {
                node.set_input_packet(&input.label, packet)?;
                flushed = true;
            }
        }
        Ok(flushed)
    }
}

#[async_trait]
impl Director for PublishSubscribeDirector {
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
        loop {
            let mut running = false;
            for node in nodes.iter_mut() {
                if node.trigger().await? {
                    self.publish_outputs(node.as_mut())?;
                    running = true;
                } else if self.flush_packets_to_node(node.as_mut())? {
                    running = true;
                }
            }
            if !running {
                break;
            }
        }
        log::debug!("Publish-subscribe run over {} nodes finished", nodes.len());
        self.core.state = DirectorState::Ran;
        Ok(())
    }

    fn wrapup(&mut self, _nodes: &[Box<dyn WorkflowNode>]) -> Result<WrapupResult> {
        begin_wrapup(&mut self.core)?;
        let mut result = WrapupResult::new();
        for ((_, input), queue) in &self.queues {
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
        Box::new(PublishSubscribeDirector::new().with_nodes_step_once(self.core.nodes_step_once))
    }
}
