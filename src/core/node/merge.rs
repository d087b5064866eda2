use crate::core::data::packet::Packet;
use crate::core::error::Result;
use crate::core::node::{NodeCore, WorkflowNode};
use crate::core::NodeValue;
use async_trait::async_trait;

/// Forwards whatever arrives on any of its inflows to all of its outflows, in
/// arrival order. Ends its stream once every inflow has ended.
pub struct NonDeterministicMerge {
    core: NodeCore,
    pending: Option<NodeValue>,
}

impl NonDeterministicMerge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: NodeCore::new(name),
            pending: None,
        }
    }

    pub fn inflow(mut self, label: &str, expression: &str) -> Self {
        self.core.declare_inflow(label, expression, false);
        self
    }

    pub fn outflow(mut self, label: &str, expression: &str) -> Self {
        self.core.declare_outflow(label, Some(expression));
        self
    }
}

#[async_trait]
impl WorkflowNode for NonDeterministicMerge {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.pending = None;
        Ok(())
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool> {
        Ok(self.pending.is_none() && !self.core.inflow(label)?.eos_received())
    }

    fn input_is_optional(&self, _label: &str) -> bool {
        true
    }

    fn load_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.core.load_input_packet(label, packet)?;
        self.pending = self.core.variables.get(label).cloned();
        self.core.inflow_mut(label)?.clear();
        Ok(())
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.core.is_finished()? || self.core.outputs_ready() {
            return Ok(false);
        }
        if let Some(value) = self.pending.take() {
            let step_id = self.core.record_step_started();
            let variables = self.core.variables.clone();
            for label in self.core.outflow_labels() {
                self.core
                    .create_and_send_packet(&label, value.clone(), &variables)?;
            }
            self.core.record_step_completed(Some(step_id));
            return Ok(true);
        }
        if self.core.check_done_stepping()? {
            self.core.send_end_of_stream_packets()?;
            self.core.flag_finished();
            return Ok(true);
        }
        Ok(false)
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        let mut merge = NonDeterministicMerge::new(self.core.name.clone());
        merge.core.inflow_declarations = self.core.inflow_declarations.clone();
        merge.core.outflow_declarations = self.core.outflow_declarations.clone();
        if let Some(context) = self.core.context_opt() {
            merge.core.set_context_if_absent(context);
        }
        Some(Box::new(merge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::WorkflowContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_merge_forwards_each_arrival_and_ends_after_all_inputs() {
        let mut merge = NonDeterministicMerge::new("M")
            .inflow("a", "/a")
            .inflow("b", "/b")
            .outflow("out", "/merged");
        merge
            .core_mut()
            .set_context_if_absent(&WorkflowContext::shared_default());
        merge.elaborate().unwrap();
        merge.configure().unwrap();
        merge.initialize().unwrap();

        merge.set_input_packet("b", Packet::from_value(json!("b1"))).unwrap();
        assert!(!merge.ready_for_input_packet("a").unwrap());
        assert!(merge.trigger().await.unwrap());
        assert_eq!(merge.output_packet("out").unwrap().value("/merged"), Some(&json!("b1")));

        merge.set_input_packet("a", Packet::EndOfStream).unwrap();
        assert!(!merge.core().check_done_stepping().unwrap());
        merge.set_input_packet("b", Packet::from_value(json!("b2"))).unwrap();
        assert!(merge.trigger().await.unwrap());
        merge.output_packet("out").unwrap();

        merge.set_input_packet("b", Packet::EndOfStream).unwrap();
        assert!(merge.trigger().await.unwrap());
        assert!(merge.output_packet("out").unwrap().is_end_of_stream());
        assert!(!merge.trigger().await.unwrap());
    }
}
