//! The nodes through which a workflow exchanges values with its caller.

use crate::core::data::packet::Packet;
use crate::core::error::{Result, WorkflowError};
use crate::core::node::{NodeCore, WorkflowNode};
use crate::core::NodeValue;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Publishes the workflow's input values once per run.
pub struct InPortal {
    core: NodeCore,
    values: BTreeMap<String, NodeValue>,
}

impl InPortal {
    pub fn new(name: impl Into<String>) -> Self {
        let mut core = NodeCore::new(name);
        core.steps_once = true;
        Self {
            core,
            values: BTreeMap::new(),
        }
    }

    /// Publishes input `label` at `expression`.
    pub fn outflow(mut self, label: &str, expression: &str) -> Self {
        self.core.declare_outflow(label, Some(expression));
        self
    }

    pub fn set_input_value(&mut self, label: &str, value: NodeValue) -> Result<()> {
        self.core.outflow(label)?;
        self.values.insert(label.to_string(), value);
        Ok(())
    }
}

#[async_trait]
impl WorkflowNode for InPortal {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.values.clear();
        Ok(())
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool> {
        Err(WorkflowError::contract(format!(
            "Portal {} has no inflow '{}'",
            self.core.name, label
        )))
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.core.is_finished()? || self.core.outputs_ready() {
            return Ok(false);
        }
        if self.core.check_done_stepping()? {
            self.core.send_end_of_stream_packets()?;
            self.core.flag_finished();
            return Ok(true);
        }
        let step_id = self.core.record_step_started();
        let variables = self.core.variables.clone();
        let values = std::mem::take(&mut self.values);
        for (label, value) in values {
            self.core.create_and_send_packet(&label, value, &variables)?;
        }
        self.core.flag_done_stepping();
        self.core.record_step_completed(Some(step_id));
        Ok(true)
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        let mut portal = InPortal::new(self.core.name.clone());
        portal.core.outflow_declarations = self.core.outflow_declarations.clone();
        if let Some(context) = self.core.context_opt() {
            portal.core.set_context_if_absent(context);
        }
        Some(Box::new(portal))
    }
}

/// Captures the last data packet that arrives on each inflow, to become the
/// workflow's output values.
pub struct OutPortal {
    core: NodeCore,
    captured: BTreeMap<String, Packet>,
}

impl OutPortal {
    pub fn new(name: impl Into<String>) -> Self {
        let mut core = NodeCore::new(name);
        core.steps_once = true;
        Self {
            core,
            captured: BTreeMap::new(),
        }
    }

    /// Collects output `label` from `expression`.
    pub fn inflow(mut self, label: &str, expression: &str) -> Self {
        self.core.declare_inflow(label, expression, false);
        self
    }

    /// The value received on `label`, or null if nothing arrived.
    pub fn output_value(&self, label: &str) -> Result<NodeValue> {
        let Some(packet) = self.captured.get(label) else {
            return Ok(NodeValue::Null);
        };
        let binding = self.core.inflow(label)?.packet_binding();
        match packet.as_data() {
            Some(data) => data
                .resource(binding)
                .map(|r| r.data().clone())
                .ok_or_else(|| {
                    WorkflowError::IllegalWorkflowSpec(
                        "Cannot publish collections of resources to workflow outputs."
                            .to_string(),
                    )
                }),
            None => Ok(NodeValue::Null),
        }
    }
}

#[async_trait]
impl WorkflowNode for OutPortal {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.captured.clear();
        Ok(())
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool> {
        Ok(!self.core.inflow(label)?.eos_received())
    }

    fn set_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        if packet.is_end_of_stream() {
            self.core.note_eos_received(label)?;
            if self.core.all_eos_received() {
                self.core.flag_done_stepping();
            }
            return Ok(());
        }
        self.core.inflow(label)?;
        self.core
            .recorder()
            .record_packet_received(&self.core.name, label, &packet);
        self.captured.insert(label.to_string(), packet);
        Ok(())
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.core.check_done_stepping()? && !self.core.is_finished()? {
            self.core.flag_finished();
            return Ok(true);
        }
        Ok(false)
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        let mut portal = OutPortal::new(self.core.name.clone());
        portal.core.inflow_declarations = self.core.inflow_declarations.clone();
        if let Some(context) = self.core.context_opt() {
            portal.core.set_context_if_absent(context);
        }
        Some(Box::new(portal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::WorkflowContext;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_portal_publishes_once_then_ends() {
        let mut portal = InPortal::new("in").outflow("a", "/a");
        portal
            .core_mut()
            .set_context_if_absent(&WorkflowContext::shared_default());
        portal.elaborate().unwrap();
        portal.configure().unwrap();
        portal.initialize().unwrap();
        assert!(portal.set_input_value("missing", json!(1)).is_err());
        portal.set_input_value("a", json!(5)).unwrap();

        assert!(portal.trigger().await.unwrap());
        assert!(!portal.trigger().await.unwrap());
        let packet = portal.output_packet("a").unwrap();
        assert_eq!(packet.uris(), vec!["/a"]);
        assert_eq!(packet.value("/a"), Some(&json!(5)));
        assert!(portal.trigger().await.unwrap());
        assert!(portal.output_packet("a").unwrap().is_end_of_stream());
        assert!(!portal.trigger().await.unwrap());
        assert!(portal.ready_for_input_packet("a").is_err());
    }

    #[tokio::test]
    async fn test_out_portal_keeps_last_packet() {
        let mut portal = OutPortal::new("out").inflow("c", "/c");
        portal
            .core_mut()
            .set_context_if_absent(&WorkflowContext::shared_default());
        portal.elaborate().unwrap();
        portal.initialize().unwrap();
        assert_eq!(portal.output_value("c").unwrap(), NodeValue::Null);

        portal.set_input_packet("c", Packet::from_value(json!(1))).unwrap();
        portal.set_input_packet("c", Packet::from_value(json!(2))).unwrap();
        assert!(portal.ready_for_input_packet("c").unwrap());
        portal.set_input_packet("c", Packet::EndOfStream).unwrap();
        assert!(!portal.ready_for_input_packet("c").unwrap());

        assert_eq!(portal.output_value("c").unwrap(), json!(2));
        assert!(portal.trigger().await.unwrap());
        assert!(!portal.trigger().await.unwrap());
    }
}
