//! Workflow nodes: the graph vertices that own ports and decide when to step.

pub mod actor_node;
pub mod buffer;
pub mod merge;
pub mod portal;
pub mod source;

pub use actor_node::{ActorWorkflowNode, NodeBuilder};
pub use buffer::BufferNode;
pub use merge::NonDeterministicMerge;
pub use portal::{InPortal, OutPortal};
pub use source::SourceNode;

use crate::core::context::WorkflowContext;
use crate::core::data::packet::Packet;
use crate::core::data::ports::{Inflow, Outflow};
use crate::core::data::uri_template::UriTemplate;
use crate::core::error::{Result, WorkflowError};
use crate::core::telemetry::{NoopTraceRecorder, TraceRecorder};
use crate::core::wrapup::{BufferKind, UnusedDataRecord, WrapupResult};
use crate::core::{AsAny, NodeValue, Variables};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whether a node will step again during the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneStepping {
    Uninitialized,
    False,
    True,
}

/// Whether a node has emitted its last packet for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFinished {
    Uninitialized,
    False,
    True,
}

#[derive(Debug, Clone)]
pub(crate) struct InflowDeclaration {
    pub(crate) expression: String,
    pub(crate) receive_once: bool,
}

/// State shared by every kind of node: declared and constructed ports, bound
/// variables and the stepping flags.
pub struct NodeCore {
    pub(crate) name: String,
    pub(crate) hidden: bool,
    pub(crate) steps_once: bool,
    pub(crate) uri_prefix: String,
    pub(crate) inflow_declarations: BTreeMap<String, InflowDeclaration>,
    /// `None` publishes at the default URI derived from the node name.
    pub(crate) outflow_declarations: BTreeMap<String, Option<String>>,
    pub(crate) inflows: BTreeMap<String, Inflow>,
    pub(crate) outflows: BTreeMap<String, Outflow>,
    pub(crate) variables: Variables,
    done_stepping: DoneStepping,
    finished: NodeFinished,
    received_eos_count: usize,
    all_eos_sent: bool,
    context: Option<Arc<WorkflowContext>>,
    recorder: Arc<dyn TraceRecorder>,
}

impl NodeCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hidden: false,
            steps_once: false,
            uri_prefix: String::new(),
            inflow_declarations: BTreeMap::new(),
            outflow_declarations: BTreeMap::new(),
            inflows: BTreeMap::new(),
            outflows: BTreeMap::new(),
            variables: Variables::new(),
            done_stepping: DoneStepping::Uninitialized,
            finished: NodeFinished::Uninitialized,
            received_eos_count: 0,
            all_eos_sent: false,
            context: None,
            recorder: Arc::new(NoopTraceRecorder::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hidden nodes are inserted by the workflow itself.
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn steps_once(&self) -> bool {
        self.steps_once
    }

    pub fn uri_prefix(&self) -> &str {
        &self.uri_prefix
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn all_eos_sent(&self) -> bool {
        self.all_eos_sent
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub(crate) fn set_context_if_absent(&mut self, context: &Arc<WorkflowContext>) {
        if self.context.is_none() {
            self.recorder = Arc::clone(context.recorder());
            self.context = Some(Arc::clone(context));
        }
    }

    pub fn context(&self) -> Result<&Arc<WorkflowContext>> {
        self.context.as_ref().ok_or_else(|| {
            WorkflowError::IllegalWorkflowSpec(format!(
                "Must provide a workflow context to node {}",
                self.name
            ))
        })
    }

    pub(crate) fn context_opt(&self) -> Option<&Arc<WorkflowContext>> {
        self.context.as_ref()
    }

    pub fn recorder(&self) -> &Arc<dyn TraceRecorder> {
        &self.recorder
    }

    pub(crate) fn declare_inflow(&mut self, label: &str, expression: &str, receive_once: bool) {
        if self.inflow_declarations.contains_key(label) {
            log::warn!("Inflow '{}' on node {} was already declared, overwriting.", label, self.name);
        }
        self.inflow_declarations.insert(
            label.to_string(),
            InflowDeclaration {
                expression: expression.to_string(),
                receive_once,
            },
        );
    }

    pub(crate) fn declare_outflow(&mut self, label: &str, expression: Option<&str>) {
        if self.outflow_declarations.contains_key(label) {
            log::warn!("Outflow '{}' on node {} was already declared, overwriting.", label, self.name);
        }
        self.outflow_declarations
            .insert(label.to_string(), expression.map(str::to_string));
    }

    pub fn inflow(&self, label: &str) -> Result<&Inflow> {
        self.inflows.get(label).ok_or_else(|| {
            WorkflowError::contract(format!("Node {} has no inflow '{}'", self.name, label))
        })
    }

    pub fn inflow_mut(&mut self, label: &str) -> Result<&mut Inflow> {
        let name = &self.name;
        self.inflows.get_mut(label).ok_or_else(|| {
            WorkflowError::contract(format!("Node {} has no inflow '{}'", name, label))
        })
    }

    pub fn outflow(&self, label: &str) -> Result<&Outflow> {
        self.outflows.get(label).ok_or_else(|| {
            WorkflowError::contract(format!("Node {} has no outflow '{}'", self.name, label))
        })
    }

    pub fn outflow_mut(&mut self, label: &str) -> Result<&mut Outflow> {
        let name = &self.name;
        self.outflows.get_mut(label).ok_or_else(|| {
            WorkflowError::contract(format!("Node {} has no outflow '{}'", name, label))
        })
    }

    pub fn inflows(&self) -> impl Iterator<Item = &Inflow> {
        self.inflows.values()
    }

    pub fn outflows(&self) -> impl Iterator<Item = &Outflow> {
        self.outflows.values()
    }

    pub(crate) fn outflows_mut(&mut self) -> impl Iterator<Item = &mut Outflow> {
        self.outflows.values_mut()
    }

    pub fn inflow_labels(&self) -> Vec<String> {
        self.inflows.keys().cloned().collect()
    }

    pub fn outflow_labels(&self) -> Vec<String> {
        self.outflows.keys().cloned().collect()
    }

    /// Constructs an inflow that reads resources published under the binding's
    /// own reduced path.
    pub(crate) fn register_inflow(
        &mut self,
        label: &str,
        expression: &str,
        receive_once: bool,
    ) -> Result<()> {
        let template = UriTemplate::parse(expression)?;
        let packet_binding = template.reduced_path().to_string();
        self.register_inflow_with_binding(label, expression, &packet_binding, receive_once)
    }

    pub(crate) fn register_inflow_with_binding(
        &mut self,
        label: &str,
        expression: &str,
        packet_binding: &str,
        receive_once: bool,
    ) -> Result<()> {
        let template = UriTemplate::parse(expression)?;
        let protocol = self.context()?.protocol_for_scheme(template.scheme())?;
        let inflow = Inflow::new(
            &self.name,
            label,
            template,
            packet_binding.to_string(),
            protocol,
            receive_once,
        )?;
        self.inflows.insert(label.to_string(), inflow);
        Ok(())
    }

    pub(crate) fn register_outflow(
        &mut self,
        label: &str,
        expression: &str,
        is_default_uri: bool,
    ) -> Result<()> {
        let template = UriTemplate::parse(expression)?;
        let protocol = self.context()?.protocol_for_scheme(template.scheme())?;
        let outflow = Outflow::new(&self.name, label, template, protocol, is_default_uri);
        self.outflows.insert(label.to_string(), outflow);
        Ok(())
    }

    /// Builds inflows from their declarations.
    ///
    /// A node whose inflows all receive once could never be triggered again and
    /// is rejected.
    pub(crate) fn construct_inflows(&mut self) -> Result<()> {
        self.inflows.clear();
        let declarations: Vec<(String, InflowDeclaration)> = self
            .inflow_declarations
            .iter()
            .map(|(l, d)| (l.clone(), d.clone()))
            .collect();
        for (label, declaration) in &declarations {
            self.register_inflow(label, &declaration.expression, declaration.receive_once)?;
        }
        if !declarations.is_empty() && declarations.iter().all(|(_, d)| d.receive_once) {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "At least one inflow must not receive once on node {}",
                self.name
            )));
        }
        Ok(())
    }

    pub(crate) fn construct_outflows(&mut self) -> Result<()> {
        self.outflows.clear();
        let declarations: Vec<(String, Option<String>)> = self
            .outflow_declarations
            .iter()
            .map(|(l, e)| (l.clone(), e.clone()))
            .collect();
        for (label, expression) in declarations {
            match expression {
                Some(expression) => self.register_outflow(&label, &expression, false)?,
                None => {
                    let expression = format!("{}.{}", self.name, label);
                    self.register_outflow(&label, &expression, true)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn configure_outflows(&self) -> Result<()> {
        for outflow in self.outflows.values() {
            outflow.configure(self.steps_once)?;
        }
        Ok(())
    }

    /// Resets ports, variables and stepping flags for a new run.
    pub(crate) fn initialize_ports(&mut self) {
        self.done_stepping = DoneStepping::False;
        self.finished = NodeFinished::False;
        self.received_eos_count = 0;
        self.all_eos_sent = false;
        self.variables.clear();
        for inflow in self.inflows.values_mut() {
            inflow.initialize();
        }
        let steps_once = self.steps_once;
        for outflow in self.outflows.values_mut() {
            outflow.initialize(steps_once);
        }
    }

    pub(crate) fn flag_done_stepping(&mut self) {
        self.done_stepping = DoneStepping::True;
    }

    pub(crate) fn flag_finished(&mut self) {
        self.finished = NodeFinished::True;
    }

    fn uninitialized(&self) -> WorkflowError {
        WorkflowError::contract(format!("Node {} was not initialized properly.", self.name))
    }

    pub fn check_done_stepping(&self) -> Result<bool> {
        match self.done_stepping {
            DoneStepping::Uninitialized => Err(self.uninitialized()),
            DoneStepping::False => Ok(false),
            DoneStepping::True => Ok(true),
        }
    }

    pub fn is_finished(&self) -> Result<bool> {
        match self.finished {
            NodeFinished::Uninitialized => Err(self.uninitialized()),
            NodeFinished::False => Ok(false),
            NodeFinished::True => Ok(true),
        }
    }

    pub(crate) fn note_eos_received(&mut self, label: &str) -> Result<()> {
        self.inflow_mut(label)?.set_eos_received();
        self.received_eos_count += 1;
        Ok(())
    }

    pub fn all_eos_received(&self) -> bool {
        self.received_eos_count == self.inflows.len()
    }

    /// Sends end-of-stream on every outflow that has not sent it yet.
    pub(crate) fn send_end_of_stream_packets(&mut self) -> Result<()> {
        for outflow in self.outflows.values_mut() {
            if !outflow.eos_sent() {
                outflow.send_packet(Packet::EndOfStream)?;
                self.recorder
                    .record_packet_sent(&self.name, outflow.label(), &Packet::EndOfStream);
            }
        }
        self.all_eos_sent = true;
        Ok(())
    }

    pub(crate) fn send_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.outflow_mut(label)?.send_packet(packet.clone())?;
        self.recorder.record_packet_sent(&self.name, label, &packet);
        Ok(())
    }

    /// Publishes `value` on an outflow under the node's current URI prefix.
    pub(crate) fn create_and_send_packet(
        &mut self,
        label: &str,
        value: NodeValue,
        variables: &Variables,
    ) -> Result<()> {
        let prefix = self.uri_prefix.clone();
        let sent = self
            .outflow_mut(label)?
            .create_and_send_packet(value, variables, &prefix)?;
        if let Some(packet) = sent {
            self.recorder.record_packet_sent(&self.name, label, &packet);
        }
        Ok(())
    }

    pub fn outputs_ready(&self) -> bool {
        self.outflows.values().any(Outflow::packet_ready)
    }

    pub(crate) fn take_output_packet(&mut self, label: &str) -> Result<Packet> {
        self.outflow_mut(label)?.get()
    }

    /// Stages a data packet on an inflow and binds the inflow's label to the
    /// data of the resource it reads.
    pub(crate) fn load_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        let inflow = self.inflow_mut(label)?;
        let value = packet
            .value(inflow.packet_binding())
            .cloned()
            .unwrap_or(NodeValue::Null);
        inflow.set_input_packet(packet.clone());
        self.variables.insert(label.to_string(), value);
        self.recorder.record_packet_received(&self.name, label, &packet);
        Ok(())
    }

    pub(crate) fn load_control_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.inflow_mut(label)?.set_input_packet(packet.clone());
        self.recorder.record_packet_received(&self.name, label, &packet);
        Ok(())
    }

    /// Clears staged packets, optionally sparing inflows that receive once.
    pub(crate) fn clear_inflows(&mut self, include_receive_once: bool) {
        for inflow in self.inflows.values_mut() {
            if include_receive_once || !inflow.receive_once() {
                inflow.clear();
            }
        }
    }

    /// Packets staged on inflows that are consumed anew each step.
    pub(crate) fn unconsumed_inflow_records(&self) -> WrapupResult {
        let mut result = WrapupResult::new();
        for inflow in self.inflows.values().filter(|i| !i.receive_once()) {
            if let Some(packet) = inflow.input_packet() {
                result.add(UnusedDataRecord::new(
                    &self.name,
                    inflow.label(),
                    BufferKind::Inflow,
                    vec![packet.clone()],
                ));
            }
        }
        result
    }

    /// Reports packets nobody took from the outflows and resets the stepping
    /// flags, so stepping before the next initialize is caught.
    pub(crate) fn wrapup_records(&mut self) -> WrapupResult {
        let mut result = WrapupResult::new();
        for outflow in self.outflows.values_mut() {
            if let Some(packet) = outflow.peek() {
                result.add(UnusedDataRecord::new(
                    &self.name,
                    outflow.label(),
                    BufferKind::Outflow,
                    vec![packet.clone()],
                ));
            }
            outflow.clear();
        }
        self.done_stepping = DoneStepping::Uninitialized;
        self.finished = NodeFinished::Uninitialized;
        result
    }

    pub(crate) fn record_step_started(&self) -> u64 {
        self.recorder.record_step_started(&self.name)
    }

    pub(crate) fn record_step_completed(&self, step_id: Option<u64>) {
        self.recorder.record_step_completed(&self.name, step_id);
    }
}

/// A vertex of the workflow graph.
///
/// Directors only ever talk to nodes through this trait: they hand packets to
/// inflows that are ready for them, trigger nodes, and collect whatever the
/// outflows hold afterwards.
#[async_trait]
pub trait WorkflowNode: AsAny + Send + Sync {
    fn core(&self) -> &NodeCore;
    fn core_mut(&mut self) -> &mut NodeCore;

    fn name(&self) -> &str {
        &self.core().name
    }

    fn after_properties_set(&mut self) -> Result<()> {
        self.core().context().map(|_| ())
    }

    /// Constructs the declared ports.
    fn elaborate(&mut self) -> Result<()> {
        let core = self.core_mut();
        core.construct_inflows()?;
        core.construct_outflows()
    }

    fn configure(&mut self) -> Result<()> {
        self.core().configure_outflows()
    }

    fn initialize(&mut self) -> Result<()> {
        self.core_mut().initialize_ports();
        Ok(())
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool>;

    /// Optional inputs do not end a node's stepping when their stream ends.
    fn input_is_optional(&self, _label: &str) -> bool {
        false
    }

    /// Delivers a packet to an inflow.
    ///
    /// End-of-stream marks the inflow; once every inflow has ended, or a
    /// required inflow that is read every step has ended, the node is done
    /// stepping. Data packets bind the inflow's template variables from the
    /// packet metadata before the packet itself is loaded.
    fn set_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        let inflow = self.core().inflow(label)?;
        let receive_once = inflow.receive_once();
        let is_control = inflow.protocol().is_control();
        let variable_names = inflow.variable_names().to_vec();

        match &packet {
            Packet::EndOfStream => {
                let optional = self.input_is_optional(label);
                let core = self.core_mut();
                core.note_eos_received(label)?;
                if core.all_eos_received() || (!receive_once && !optional) {
                    core.flag_done_stepping();
                }
                if !receive_once {
                    core.variables.remove(label);
                    self.handle_end_of_stream(label)?;
                }
                Ok(())
            }
            Packet::Data(data) => {
                let metadata = data.metadata_values().to_vec();
                for (name, value) in variable_names.iter().zip(metadata) {
                    self.load_variable_value(name, &value)?;
                    self.core_mut().variables.insert(name.clone(), value);
                }
                if is_control {
                    self.load_control_packet(label, packet)
                } else {
                    self.load_input_packet(label, packet)
                }
            }
        }
    }

    fn handle_end_of_stream(&mut self, _label: &str) -> Result<()> {
        Ok(())
    }

    fn load_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.core_mut().load_input_packet(label, packet)
    }

    fn load_control_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.core_mut().load_control_packet(label, packet)
    }

    /// Called for each template variable bound from a received packet.
    fn load_variable_value(&mut self, _name: &str, _value: &NodeValue) -> Result<()> {
        Ok(())
    }

    /// Steps the node if it can. Returns true when the node made progress.
    async fn trigger(&mut self) -> Result<bool>;

    /// First half of a trigger for nodes whose steps complete asynchronously.
    async fn start_trigger(&mut self) -> Result<bool> {
        self.trigger().await
    }

    /// Second half of a trigger: waits for one step and publishes its outputs.
    async fn finish_trigger(&mut self) -> Result<()> {
        Ok(())
    }

    /// True when `start_trigger` only submits work and `finish_trigger` must be
    /// called to collect it.
    fn defers_completion(&self) -> bool {
        false
    }

    fn outputs_ready(&self) -> bool {
        self.core().outputs_ready()
    }

    /// Takes the packet pending on an outflow.
    fn output_packet(&mut self, label: &str) -> Result<Packet> {
        self.core_mut().take_output_packet(label)
    }

    fn wrapup(&mut self) -> Result<WrapupResult> {
        Ok(self.core_mut().wrapup_records())
    }

    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }

    fn step_count(&self) -> u64 {
        0
    }

    fn max_concurrent_steps(&self) -> usize {
        1
    }

    /// A fresh, unelaborated copy of the node as declared. Nodes the workflow
    /// synthesizes itself return `None`.
    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>>;

    fn set_steps_once(&mut self, steps_once: bool) {
        self.core_mut().steps_once = steps_once;
    }

    fn set_uri_prefix(&mut self, prefix: &str) {
        self.core_mut().uri_prefix = prefix.to_string();
    }
}

impl dyn WorkflowNode {
    pub fn downcast_ref<T: WorkflowNode + 'static>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: WorkflowNode + 'static>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: WorkflowNode + 'static>(&self) -> bool {
        self.as_any().is::<T>()
    }
}
