use crate::core::data::packet::Packet;
use crate::core::error::Result;
use crate::core::node::{NodeCore, WorkflowNode};
use crate::core::wrapup::{BufferKind, UnusedDataRecord, WrapupResult};
use async_trait::async_trait;
use std::collections::VecDeque;

const INPUT: &str = "input";
const OUTPUT: &str = "output";

/// A hidden node queueing every packet headed for one inflow of another node,
/// so publishers never wait on slow receivers.
pub struct BufferNode {
    core: NodeCore,
    buffered_node: String,
    buffered_label: String,
    queue: VecDeque<Packet>,
}

impl BufferNode {
    pub(crate) fn new(node: &str, label: &str) -> Self {
        let mut core = NodeCore::new(format!("BufferNode-for-{}-{}", node, label));
        core.hidden = true;
        Self {
            core,
            buffered_node: node.to_string(),
            buffered_label: label.to_string(),
            queue: VecDeque::new(),
        }
    }

    /// Wires the buffer between the publishers of `inflow_expression` and the
    /// buffered inflow, which will read `outflow_expression`.
    pub(crate) fn attach(&mut self, inflow_expression: &str, outflow_expression: &str) -> Result<()> {
        self.core.register_inflow(INPUT, inflow_expression, false)?;
        self.core.register_outflow(OUTPUT, outflow_expression, false)
    }

    pub fn buffered_node(&self) -> &str {
        &self.buffered_node
    }

    pub fn buffered_label(&self) -> &str {
        &self.buffered_label
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    /// The data packets still queued, reported against the buffered inflow.
    pub fn queue_record(&self) -> UnusedDataRecord {
        UnusedDataRecord::new(
            &self.buffered_node,
            &self.buffered_label,
            BufferKind::Queue,
            self.queue.iter().cloned(),
        )
    }
}

#[async_trait]
impl WorkflowNode for BufferNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    // Ports are wired by `attach`.
    fn elaborate(&mut self) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.queue.clear();
        Ok(())
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool> {
        Ok(!self.core.inflow(label)?.eos_received())
    }

    fn load_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.core.load_input_packet(label, packet.clone())?;
        self.core.inflow_mut(label)?.clear();
        self.queue.push_back(packet);
        Ok(())
    }

    fn load_control_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.load_input_packet(label, packet)
    }

    fn handle_end_of_stream(&mut self, _label: &str) -> Result<()> {
        self.queue.push_back(Packet::EndOfStream);
        Ok(())
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.queue.is_empty() || self.core.outflow(OUTPUT)?.packet_ready() {
            return Ok(false);
        }
        let step_id = self.core.record_step_started();
        if let Some(packet) = self.queue.pop_front() {
            self.core.send_packet(OUTPUT, packet)?;
        }
        self.core.record_step_completed(Some(step_id));
        Ok(true)
    }

    /// A packet still waiting on the output belongs to the buffered inflow,
    /// like the rest of the queue.
    fn wrapup(&mut self) -> Result<WrapupResult> {
        let mut result = WrapupResult::new();
        for record in self.core.wrapup_records().records() {
            result.add(UnusedDataRecord::new(
                &self.buffered_node,
                &self.buffered_label,
                BufferKind::Queue,
                record.packets().iter().cloned(),
            ));
        }
        Ok(result)
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::WorkflowContext;
    use serde_json::json;

    fn buffer() -> BufferNode {
        let mut node = BufferNode::new("B", "x");
        node.core_mut()
            .set_context_if_absent(&WorkflowContext::shared_default());
        node.attach("/x", "BufferNode-for-B-x/x").unwrap();
        node.configure().unwrap();
        node.initialize().unwrap();
        node
    }

    #[tokio::test]
    async fn test_buffer_forwards_in_order_including_end_of_stream() {
        let mut node = buffer();
        assert_eq!(node.name(), "BufferNode-for-B-x");
        assert!(node.core().is_hidden());
        node.set_input_packet(INPUT, Packet::from_value(json!(1))).unwrap();
        node.set_input_packet(INPUT, Packet::from_value(json!(2))).unwrap();
        node.set_input_packet(INPUT, Packet::EndOfStream).unwrap();
        assert!(!node.ready_for_input_packet(INPUT).unwrap());
        assert_eq!(node.queue_size(), 3);

        let mut forwarded = Vec::new();
        while node.trigger().await.unwrap() {
            assert!(!node.trigger().await.unwrap());
            forwarded.push(node.output_packet(OUTPUT).unwrap());
        }
        assert_eq!(forwarded.len(), 3);
        assert_eq!(forwarded[0].value(""), Some(&json!(1)));
        assert_eq!(forwarded[1].value(""), Some(&json!(2)));
        assert!(forwarded[2].is_end_of_stream());
    }

    #[test]
    fn test_queue_record_skips_end_of_stream_and_initialize_empties_queue() {
        let mut node = buffer();
        node.set_input_packet(INPUT, Packet::from_value(json!(1))).unwrap();
        node.set_input_packet(INPUT, Packet::EndOfStream).unwrap();
        let record = node.queue_record();
        assert_eq!(record.node(), "B");
        assert_eq!(record.label(), "x");
        assert_eq!(record.packets().len(), 1);
        node.wrapup().unwrap();
        node.initialize().unwrap();
        assert_eq!(node.queue_size(), 0);
        assert!(node.ready_for_input_packet(INPUT).unwrap());
    }

    #[tokio::test]
    async fn test_packet_left_on_output_reported_against_buffered_inflow() {
        let mut node = buffer();
        node.set_input_packet(INPUT, Packet::from_value(json!(1))).unwrap();
        node.set_input_packet(INPUT, Packet::from_value(json!(2))).unwrap();
        assert!(node.trigger().await.unwrap());
        assert_eq!(node.queue_size(), 1);

        let wrapup = node.wrapup().unwrap();
        assert_eq!(wrapup.len(), 1);
        let record = &wrapup.records()[0];
        assert_eq!(record.node(), "B");
        assert_eq!(record.label(), "x");
        assert_eq!(record.kind(), BufferKind::Queue);
        assert_eq!(record.packets()[0].value(""), Some(&json!(1)));
        assert_eq!(node.queue_record().packets().len(), 1);
    }
}
