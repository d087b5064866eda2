use crate::core::Variables;
use crate::core::NodeValue;
use crate::core::data::packet::Packet;
use crate::core::data::protocol::Protocol;
use crate::core::data::uri_template::UriTemplate;
use crate::core::error::{Result, WorkflowError};
use std::sync::Arc;

/// A node's input port.
///
/// Holds at most one staged packet at a time.
#[derive(Debug, Clone)]
pub struct Inflow {
    node: String,
    label: String,
    template: UriTemplate,
    packet_binding: String,
    protocol: Arc<dyn Protocol>,
    receive_once: bool,
    packet: Option<Packet>,
    eos_received: bool,
    event_count: u64,
}

impl Inflow {
    pub fn new(
        node: &str,
        label: &str,
        template: UriTemplate,
        packet_binding: String,
        protocol: Arc<dyn Protocol>,
        receive_once: bool,
    ) -> Result<Self> {
        protocol.validate_inflow_template(&template, node)?;
        Ok(Self {
            node: node.to_string(),
            label: label.to_string(),
            template,
            packet_binding,
            protocol,
            receive_once,
            packet: None,
            eos_received: false,
            event_count: 0,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// The full template expression this inflow is bound to.
    pub fn binding(&self) -> &str {
        self.template.expression()
    }

    /// The key under which this inflow is matched against outflows.
    pub fn dataflow_binding(&self) -> &str {
        self.template.reduced_path()
    }

    /// The resource key this inflow reads from received packets. Survives
    /// rebinding of the inflow to an inserted buffer.
    pub fn packet_binding(&self) -> &str {
        &self.packet_binding
    }

    pub fn template(&self) -> &UriTemplate {
        &self.template
    }

    pub fn path(&self) -> &str {
        self.template.path()
    }

    pub fn variable_names(&self) -> &[String] {
        self.template.variable_names()
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    pub fn receive_once(&self) -> bool {
        self.receive_once
    }

    pub fn initialize(&mut self) {
        self.packet = None;
        self.eos_received = false;
        self.event_count = 0;
    }

    pub fn set_input_packet(&mut self, packet: Packet) {
        self.event_count += 1;
        self.packet = Some(packet);
    }

    pub fn input_packet(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    pub fn has_input_packet(&self) -> bool {
        self.packet.is_some()
    }

    pub fn clear(&mut self) {
        self.packet = None;
    }

    pub fn set_eos_received(&mut self) {
        self.eos_received = true;
    }

    pub fn eos_received(&self) -> bool {
        self.eos_received
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

/// A node's output port.
///
/// A single slot: a sent packet must be taken before the next one can be sent.
#[derive(Debug, Clone)]
pub struct Outflow {
    node: String,
    label: String,
    template: UriTemplate,
    is_default_uri: bool,
    protocol: Arc<dyn Protocol>,
    has_receivers: bool,
    use_path_suffix: bool,
    packet: Option<Packet>,
    eos_sent: bool,
    token_count: u64,
    event_count: u64,
}

impl Outflow {
    pub fn new(
        node: &str,
        label: &str,
        template: UriTemplate,
        protocol: Arc<dyn Protocol>,
        is_default_uri: bool,
    ) -> Self {
        Self {
            node: node.to_string(),
            label: label.to_string(),
            template,
            is_default_uri,
            protocol,
            has_receivers: true,
            use_path_suffix: false,
            packet: None,
            eos_sent: false,
            token_count: 0,
            event_count: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn binding(&self) -> &str {
        self.template.expression()
    }

    pub fn dataflow_binding(&self) -> &str {
        self.template.reduced_path()
    }

    pub fn template(&self) -> &UriTemplate {
        &self.template
    }

    pub fn protocol(&self) -> &Arc<dyn Protocol> {
        &self.protocol
    }

    /// True when the URI was derived from the node name rather than declared.
    pub fn is_default_uri(&self) -> bool {
        self.is_default_uri
    }

    pub fn has_receivers(&self) -> bool {
        self.has_receivers
    }

    pub fn set_has_receivers(&mut self, has_receivers: bool) {
        self.has_receivers = has_receivers;
    }

    /// Rejects templates that could publish two packets at the same URI.
    pub fn configure(&self, steps_once: bool) -> Result<()> {
        if !steps_once && self.template.variable_count() == 0 && !self.protocol.supports_suffixes()
        {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "URI template for outflow {} on node {} must include at least one variable.",
                self.label, self.node
            )));
        }
        Ok(())
    }

    pub fn initialize(&mut self, steps_once: bool) {
        self.packet = None;
        self.eos_sent = false;
        self.use_path_suffix = self.template.variable_count() == 0 && !steps_once;
        self.token_count = 0;
        self.event_count = 0;
    }

    pub fn packet_ready(&self) -> bool {
        self.packet.is_some()
    }

    /// Publishes `value` at this outflow's expanded URI.
    ///
    /// Returns the packet that was sent, if the protocol created one.
    pub fn create_and_send_packet(
        &mut self,
        value: NodeValue,
        variables: &Variables,
        prefix: &str,
    ) -> Result<Option<Packet>> {
        let suffix = if self.use_path_suffix {
            self.token_count += 1;
            format!("/{}", self.token_count)
        } else {
            String::new()
        };
        let (uri, values) = self.template.expand(variables, prefix, &suffix)?;
        let packet = self.protocol.create_packet(value, uri, &self.template, values)?;
        if let Some(packet) = &packet {
            self.send_packet(packet.clone())?;
        }
        Ok(packet)
    }

    /// Places `packet` in the slot.
    ///
    /// Packets sent on an outflow nobody reads are dropped.
    pub fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.event_count += 1;
        if packet.is_end_of_stream() {
            self.eos_sent = true;
        }
        if !self.has_receivers {
            return Ok(());
        }
        if self.packet.is_some() {
            return Err(WorkflowError::contract(format!(
                "Outflow '{}' on node {} already holds an unsent packet",
                self.label, self.node
            )));
        }
        self.packet = Some(packet);
        Ok(())
    }

    /// True once end-of-stream has been sent during the current run.
    pub fn eos_sent(&self) -> bool {
        self.eos_sent
    }

    pub fn peek(&self) -> Option<&Packet> {
        self.packet.as_ref()
    }

    /// Takes the pending packet out of the slot.
    pub fn get(&mut self) -> Result<Packet> {
        self.packet.take().ok_or_else(|| {
            WorkflowError::contract(format!(
                "Request for packet on empty outflow '{}' on node {}",
                self.label, self.node
            ))
        })
    }

    pub fn clear(&mut self) {
        self.packet = None;
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::protocol::{DataProtocol, ProtocolRegistry};
    use serde_json::json;

    fn outflow(expression: &str) -> Outflow {
        let template = UriTemplate::parse(expression).unwrap();
        let protocol = ProtocolRegistry::default()
            .protocol_for_scheme(template.scheme())
            .unwrap();
        Outflow::new("A", "out", template, protocol, false)
    }

    #[test]
    fn test_outflow_single_slot() {
        let mut out = outflow("/product");
        out.initialize(false);
        out.send_packet(Packet::from_value(json!(1))).unwrap();
        assert!(out.packet_ready());
        assert!(out.send_packet(Packet::from_value(json!(2))).is_err());
        let taken = out.get().unwrap();
        assert_eq!(taken.value(""), Some(&json!(1)));
        assert!(out.get().is_err());
    }

    #[test]
    fn test_outflow_path_suffix_numbers_packets() {
        let mut out = outflow("/product");
        out.initialize(false);
        let first = out
            .create_and_send_packet(json!(15), &Variables::new(), "")
            .unwrap()
            .unwrap();
        out.get().unwrap();
        let second = out
            .create_and_send_packet(json!(40), &Variables::new(), "/run1")
            .unwrap()
            .unwrap();
        assert_eq!(first.uris(), vec!["/product/1"]);
        assert_eq!(second.uris(), vec!["/run1/product/2"]);
    }

    #[test]
    fn test_outflow_without_suffix_when_stepping_once() {
        let mut out = outflow("/greeting");
        out.initialize(true);
        let packet = out
            .create_and_send_packet(json!("hi"), &Variables::new(), "")
            .unwrap()
            .unwrap();
        assert_eq!(packet.uris(), vec!["/greeting"]);
    }

    #[test]
    fn test_outflow_without_receivers_drops_packets() {
        let mut out = outflow("/ignored");
        out.initialize(false);
        out.set_has_receivers(false);
        out.send_packet(Packet::from_value(json!(1))).unwrap();
        out.send_packet(Packet::from_value(json!(2))).unwrap();
        assert!(!out.packet_ready());
        assert_eq!(out.event_count(), 2);
    }

    #[test]
    fn test_outflow_remembers_end_of_stream_until_initialized() {
        let mut out = outflow("/done");
        out.initialize(false);
        out.send_packet(Packet::EndOfStream).unwrap();
        assert!(out.eos_sent());
        assert!(out.get().unwrap().is_end_of_stream());
        assert!(out.eos_sent());
        out.initialize(false);
        assert!(!out.eos_sent());
    }

    #[derive(Debug)]
    struct NoSuffixProtocol;

    impl Protocol for NoSuffixProtocol {
        fn scheme(&self) -> &str {
            "nosuffix"
        }
        fn create_packet(
            &self,
            data: NodeValue,
            uri: String,
            template: &UriTemplate,
            values: Vec<NodeValue>,
        ) -> Result<Option<Packet>> {
            DataProtocol.create_packet(data, uri, template, values)
        }
    }

    #[test]
    fn test_outflow_configure_requires_variable_without_suffixes() {
        let template = UriTemplate::parse("nosuffix:/fixed").unwrap();
        let out = Outflow::new("A", "out", template, Arc::new(NoSuffixProtocol), false);
        assert!(out.configure(true).is_ok());
        assert!(out.configure(false).is_err());
    }

    #[test]
    fn test_inflow_staging() {
        let template = UriTemplate::parse("/x/{n}").unwrap();
        let mut inflow = Inflow::new(
            "B",
            "x",
            template,
            "/x/{}".to_string(),
            Arc::new(DataProtocol),
            false,
        )
        .unwrap();
        assert_eq!(inflow.dataflow_binding(), "/x/{}");
        assert_eq!(inflow.variable_names(), &["n".to_string()]);
        inflow.set_input_packet(Packet::from_value(json!(3)));
        assert!(inflow.has_input_packet());
        inflow.clear();
        assert!(!inflow.has_input_packet());
        inflow.set_eos_received();
        assert!(inflow.eos_received());
        inflow.initialize();
        assert!(!inflow.eos_received());
        assert_eq!(inflow.event_count(), 0);
    }
}
