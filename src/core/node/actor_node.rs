use crate::core::actor::state::ActorState;
use crate::core::actor::{Actor, NodeBinding};
use crate::core::completion::{
    ActorCompletionService, Completion, ServiceState, StepOutput, completion_service_for,
};
use crate::core::config::ExceptionPolicy;
use crate::core::data::packet::Packet;
use crate::core::data::sequences::Sequences;
use crate::core::error::{Result, WorkflowError};
use crate::core::node::{NodeCore, WorkflowNode};
use crate::core::workflow::Workflow;
use crate::core::wrapup::WrapupResult;
use crate::core::{NodeValue, Variables};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

/// A node that steps an actor.
///
/// Each trigger stages one packet per inflow (plus the next element of every
/// sequence) on the actor, submits a step to the node's completion service and
/// publishes the step's enabled outputs on the outflows of the same name.
pub struct ActorWorkflowNode {
    core: NodeCore,
    actor: Option<Actor>,
    sequences: Sequences,
    constants: BTreeMap<String, NodeValue>,
    initial_values: BTreeMap<String, NodeValue>,
    nested_uri_prefix: Option<String>,
    validate_inflow_names: bool,
    max_concurrency: Option<usize>,
    ordered: Option<bool>,
    exception_policy: Option<ExceptionPolicy>,
    exception_outflow: Option<String>,
    end_flow_on_null: bool,
    end_flow_on_no_output: bool,
    concurrency: usize,
    data_outflows: Vec<String>,
    service: Box<dyn ActorCompletionService>,
    step_count: u64,
    shutdown_requested: bool,
}

impl ActorWorkflowNode {
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(name)
    }

    fn new(name: impl Into<String>) -> Self {
        Self {
            core: NodeCore::new(name),
            actor: None,
            sequences: Sequences::new(),
            constants: BTreeMap::new(),
            initial_values: BTreeMap::new(),
            nested_uri_prefix: None,
            validate_inflow_names: true,
            max_concurrency: None,
            ordered: None,
            exception_policy: None,
            exception_outflow: None,
            end_flow_on_null: false,
            end_flow_on_no_output: false,
            concurrency: 1,
            data_outflows: Vec::new(),
            service: completion_service_for(1, true),
            step_count: 0,
            shutdown_requested: false,
        }
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.actor.as_ref()
    }

    pub fn actor_mut(&mut self) -> Option<&mut Actor> {
        self.actor.as_mut()
    }

    fn require_actor(&self) -> Result<&Actor> {
        self.actor.as_ref().ok_or_else(|| self.missing_actor())
    }

    fn require_actor_mut(&mut self) -> Result<&mut Actor> {
        let name = &self.core.name;
        self.actor.as_mut().ok_or_else(|| {
            WorkflowError::NodeDeclaration(format!("must set actor property on node {}", name))
        })
    }

    fn missing_actor(&self) -> WorkflowError {
        WorkflowError::NodeDeclaration(format!(
            "must set actor property on node {}",
            self.core.name
        ))
    }

    fn exception_policy(&self) -> ExceptionPolicy {
        self.exception_policy
            .or_else(|| {
                self.core
                    .context_opt()
                    .map(|c| c.config().exception_policy)
            })
            .unwrap_or_default()
    }

    /// Labels whose values reach the actor: data inflows, sequences and constants.
    fn data_input_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .core
            .inflows
            .values()
            .filter(|i| !i.protocol().is_control())
            .map(|i| i.label().to_string())
            .collect();
        names.extend(self.sequences.names().cloned());
        names.extend(self.constants.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn control_inflow_names(&self) -> Vec<String> {
        self.core
            .inflows
            .values()
            .filter(|i| i.protocol().is_control())
            .map(|i| i.label().to_string())
            .collect()
    }

    fn assert_actor_data_inputs(&mut self, names: &[String]) -> Result<()> {
        let validate = self.validate_inflow_names;
        let actor = self.require_actor_mut()?;
        if validate && actor.input_names().next().is_some() {
            if let Some(name) = names.iter().find(|n| !actor.has_input(n)) {
                return Err(WorkflowError::NodeDeclaration(format!(
                    "Actor {} does not accept input variable '{}'.",
                    actor.name(),
                    name
                )));
            }
        } else {
            for name in names {
                if !actor.has_input(name) {
                    actor.add_implicit_input(name)?;
                }
            }
        }
        Ok(())
    }

    fn assert_control_inflows(&self, names: &[String]) -> Result<()> {
        let actor = self.require_actor()?;
        if let Some(label) = names.iter().find(|l| actor.has_input(l)) {
            return Err(WorkflowError::NodeDeclaration(format!(
                "Control protocol may not be used on {} inflow '{}', because actor {} has an input with the same name.",
                self.core.name,
                label,
                actor.name()
            )));
        }
        Ok(())
    }

    fn assert_actor_outputs(&mut self) -> Result<()> {
        let node_name = self.core.name.clone();
        let outflows = self.data_outflows.clone();
        let actor = self.require_actor_mut()?;
        if actor.output_names().next().is_some() {
            if let Some(label) = outflows.iter().find(|l| !actor.has_output(l)) {
                return Err(WorkflowError::NodeDeclaration(format!(
                    "Actor {} does not produce output variable '{}' named by node {}.",
                    actor.name(),
                    label,
                    node_name
                )));
            }
        } else {
            for label in &outflows {
                actor.add_implicit_output(label)?;
            }
        }
        Ok(())
    }

    /// Stages a value on an inflow and on the actor input of the same name.
    fn stage_value(&mut self, label: &str, value: NodeValue) -> Result<()> {
        if let Some(inflow) = self.core.inflows.get_mut(label) {
            inflow.set_input_packet(Packet::from_value(value.clone()));
        }
        self.require_actor_mut()?.set_input_value(label, value.clone())?;
        self.core.variables.insert(label.to_string(), value);
        Ok(())
    }

    fn all_inputs_staged(&self) -> Result<bool> {
        for inflow in self.core.inflows.values() {
            if !inflow.has_input_packet() && self.ready_for_input_packet(inflow.label())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Applies the next element of every sequence. Returns false once any
    /// sequence has run out.
    fn apply_sequence_values(&mut self) -> Result<bool> {
        if self.sequences.is_empty() {
            return Ok(true);
        }
        let bundle = self.sequences.next_bundle();
        if bundle.values().any(Option::is_none) {
            return Ok(false);
        }
        for (label, value) in bundle {
            if let Some(value) = value {
                self.stage_value(&label, value)?;
            }
        }
        Ok(true)
    }

    async fn request_shutdown(&mut self) -> Result<()> {
        self.shutdown_requested = true;
        self.service.shutdown().await
    }

    /// Publishes a caught step error on the exception outflow, in place of the
    /// step's outputs.
    fn send_exception_packet(
        &mut self,
        label: &str,
        error: &WorkflowError,
        variables: &Variables,
    ) -> Result<()> {
        log::warn!("Node {} caught step error: {}", self.core.name, error);
        let value = match error {
            WorkflowError::Actor { actor, source } => {
                json!({ "actor": actor, "message": source.to_string() })
            }
            other => json!({ "actor": self.require_actor()?.name(), "message": other.to_string() }),
        };
        self.core.create_and_send_packet(label, value, variables)
    }

    fn end_flow_on(&mut self, label: &str) -> Result<()> {
        self.core.flag_done_stepping();
        self.core.send_packet(label, Packet::EndOfStream)
    }

    fn send_output_packets(
        &mut self,
        outputs: &BTreeMap<String, StepOutput>,
        variables: &Variables,
    ) -> Result<()> {
        for label in self.data_outflows.clone() {
            let Some(output) = outputs.get(&label) else {
                continue;
            };
            if output.enabled {
                if output.value.is_null() && self.end_flow_on_null {
                    return self.end_flow_on(&label);
                }
                self.core
                    .create_and_send_packet(&label, output.value.clone(), variables)?;
            } else if self.end_flow_on_no_output {
                return self.end_flow_on(&label);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowNode for ActorWorkflowNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn after_properties_set(&mut self) -> Result<()> {
        let context = self.core.context()?.clone();
        let actor = self.require_actor_mut()?;
        if actor.state() == ActorState::Constructed {
            actor.set_context_if_absent(&context);
            actor.after_properties_set()?;
        }
        Ok(())
    }

    fn elaborate(&mut self) -> Result<()> {
        self.core.construct_inflows()?;
        self.core.construct_outflows()?;
        let exception_outflow = self.exception_outflow.clone();
        self.data_outflows = self
            .core
            .outflow_labels()
            .into_iter()
            .filter(|l| Some(l) != exception_outflow.as_ref())
            .collect();
        let node_name = self.core.name.clone();
        self.sequences.configure(&node_name)?;

        let nested_prefix = self.nested_uri_prefix.clone();
        let actor = self.require_actor_mut()?;
        if let Some(prefix) = nested_prefix {
            match actor.logic_as_mut::<Workflow>() {
                Some(workflow) => workflow.set_uri_prefix(&prefix)?,
                None => {
                    return Err(WorkflowError::IllegalWorkflowSpec(
                        "A URI prefix may only be applied to nodes invoking subworkflows."
                            .to_string(),
                    ));
                }
            }
        }

        let data_names = self.data_input_names();
        self.assert_actor_data_inputs(&data_names)?;
        let control_names = self.control_inflow_names();
        self.assert_control_inflows(&control_names)?;
        self.assert_actor_outputs()?;

        let stateful = self.require_actor()?.is_stateful();
        if !stateful && self.core.inflows.is_empty() && self.sequences.max_length() <= 1 {
            self.core.steps_once = true;
        }

        let binding = NodeBinding {
            node_name,
            steps_once: self.core.steps_once,
            uri_prefix: self.core.uri_prefix.clone(),
        };
        let actor = self.require_actor_mut()?;
        actor.bind_to_node(binding);
        actor.elaborate()
    }

    fn configure(&mut self) -> Result<()> {
        self.core.configure_outflows()?;
        let context = self.core.context()?.clone();
        self.concurrency = self
            .max_concurrency
            .unwrap_or(context.config().max_concurrency);
        let ordered = self.ordered.unwrap_or(context.config().ordered);

        let node_name = self.core.name.clone();
        let concurrency = self.concurrency;
        let actor = self.require_actor_mut()?;
        actor.configure()?;
        if concurrency > 1 && !actor.is_cloneable() {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "Uncloneable actor {} cannot be used within concurrent node {}",
                actor.name(),
                node_name
            )));
        }
        self.service = completion_service_for(concurrency, ordered);
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.sequences.initialize();
        self.shutdown_requested = false;

        let initial_values: Vec<(String, NodeValue)> = self
            .initial_values
            .iter()
            .map(|(l, v)| (l.clone(), v.clone()))
            .collect();
        let constants: Vec<(String, NodeValue)> = self
            .constants
            .iter()
            .map(|(l, v)| (l.clone(), v.clone()))
            .collect();
        for (label, value) in initial_values.into_iter().chain(constants) {
            self.stage_value(&label, value)?;
        }

        if self.service.state() != ServiceState::Stopped {
            self.service.reset();
        }
        self.service.start()?;
        self.step_count = 0;

        let prefix = self.core.uri_prefix.clone();
        let actor = self.require_actor_mut()?;
        actor.set_step_count(0);
        actor.set_node_uri_prefix(&prefix);
        actor.initialize()
    }

    fn ready_for_input_packet(&self, label: &str) -> Result<bool> {
        self.require_actor()?.ready_for_input(label)
    }

    fn input_is_optional(&self, label: &str) -> bool {
        self.actor
            .as_ref()
            .is_some_and(|a| a.has_optional_input(label))
    }

    fn handle_end_of_stream(&mut self, label: &str) -> Result<()> {
        let actor = self.require_actor_mut()?;
        if actor.has_optional_input(label) {
            actor.clear_input_value(label);
            self.core.variables.remove(label);
        }
        Ok(())
    }

    fn load_input_packet(&mut self, label: &str, packet: Packet) -> Result<()> {
        self.core.load_input_packet(label, packet.clone())?;
        let binding = self.core.inflow(label)?.packet_binding().to_string();
        let value = match packet.as_data() {
            Some(data) => match data.resource(&binding) {
                Some(resource) => {
                    let protocol = self.core.context()?.protocol_for_scheme(data.scheme())?;
                    let actor_name = self.require_actor()?.name().to_string();
                    protocol.load_resource_payload(resource, &actor_name, label)?
                }
                None => NodeValue::Null,
            },
            None => NodeValue::Null,
        };
        self.require_actor_mut()?.set_input_value(label, value)
    }

    fn load_variable_value(&mut self, name: &str, value: &NodeValue) -> Result<()> {
        self.require_actor_mut()?.set_input_value(name, value.clone())
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.core.outputs_ready() {
            return Ok(false);
        }
        if !self.start_trigger().await? {
            return Ok(false);
        }
        self.finish_trigger().await?;
        Ok(true)
    }

    async fn start_trigger(&mut self) -> Result<bool> {
        if self.core.is_finished()? || self.shutdown_requested {
            return Ok(false);
        }
        if self.core.check_done_stepping()? {
            self.request_shutdown().await?;
            return Ok(true);
        }
        if !self.all_inputs_staged()? {
            return Ok(false);
        }
        if !self.apply_sequence_values()? {
            self.request_shutdown().await?;
            return Ok(true);
        }

        self.core.clear_inflows(false);
        self.step_count += 1;
        let step_count = self.step_count;
        let step_id = self.core.record_step_started();

        let actor = self.require_actor_mut()?;
        actor.set_step_count(step_count);
        let run_count = actor.run_count();
        actor.reset_input_enables()?;

        let variables = &mut self.core.variables;
        variables.insert("STEP".to_string(), NodeValue::from(step_count));
        variables.insert("RUN".to_string(), NodeValue::from(run_count));
        variables.insert("STEP_ID".to_string(), NodeValue::from(step_id));
        let variables = variables.clone();

        let actor = self.actor.as_mut().ok_or_else(|| {
            WorkflowError::NodeDeclaration(format!(
                "must set actor property on node {}",
                self.core.name
            ))
        })?;
        self.service.submit(actor, variables).await?;
        Ok(true)
    }

    async fn finish_trigger(&mut self) -> Result<()> {
        if self.core.is_finished()? {
            return Ok(());
        }
        let mut run = match self.service.take().await? {
            Completion::EndOfRunners => {
                self.core.send_end_of_stream_packets()?;
                self.core.flag_finished();
                return Ok(());
            }
            Completion::Run(run) => run,
        };

        let error = run.take_error();
        if let (Some(error), Some(label)) = (&error, self.exception_outflow.clone()) {
            if self.core.steps_once {
                self.core.flag_done_stepping();
            }
            let step_id = run.variables().get("STEP_ID").and_then(NodeValue::as_u64);
            let variables = run.into_variables();
            self.send_exception_packet(&label, error, &variables)?;
            self.core.record_step_completed(step_id);
            return Ok(());
        }
        if let Some(error) = error {
            match self.exception_policy() {
                ExceptionPolicy::Exit => {
                    log::error!("Node {} terminating workflow: {}", self.core.name, error);
                    std::process::exit(1);
                }
                ExceptionPolicy::EndFlow => {
                    log::warn!("Node {} ending its flow after error: {}", self.core.name, error);
                    self.request_shutdown().await?;
                    self.core.send_end_of_stream_packets()?;
                    self.core.flag_finished();
                    return Ok(());
                }
                ExceptionPolicy::Rethrow => return Err(error),
            }
        }

        if self.core.steps_once {
            self.core.flag_done_stepping();
        }

        let step_id = run.variables().get("STEP_ID").and_then(NodeValue::as_u64);
        let outputs = run.outputs().clone();
        let mut variables = run.into_variables();
        for (label, output) in &outputs {
            if output.value.is_null() {
                variables.remove(label);
            } else {
                variables.insert(label.clone(), output.value.clone());
            }
        }
        self.send_output_packets(&outputs, &variables)?;
        self.core.record_step_completed(step_id);
        Ok(())
    }

    fn defers_completion(&self) -> bool {
        true
    }

    fn wrapup(&mut self) -> Result<WrapupResult> {
        let mut result = self.core.unconsumed_inflow_records();
        result.extend(self.core.wrapup_records());
        if self.service.state() != ServiceState::Stopped {
            self.service.reset();
        }
        self.require_actor_mut()?.wrapup()?;
        Ok(result)
    }

    fn dispose(&mut self) -> Result<()> {
        self.service.reset();
        let actor = self.require_actor_mut()?;
        match actor.state() {
            ActorState::Initialized | ActorState::Stepped => {
                actor.wrapup()?;
                actor.dispose()
            }
            ActorState::WrappedUp => actor.dispose(),
            _ => Ok(()),
        }
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn max_concurrent_steps(&self) -> usize {
        self.concurrency
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        let mut node = ActorWorkflowNode::new(self.core.name.clone());
        node.core.hidden = self.core.hidden;
        node.core.steps_once = self.core.steps_once;
        node.core.inflow_declarations = self.core.inflow_declarations.clone();
        node.core.outflow_declarations = self.core.outflow_declarations.clone();
        if let Some(context) = self.core.context_opt() {
            node.core.set_context_if_absent(context);
        }
        node.actor = self.actor.as_ref().map(Actor::clone_declaration);
        node.sequences = self.sequences.clone();
        node.constants = self.constants.clone();
        node.initial_values = self.initial_values.clone();
        node.nested_uri_prefix = self.nested_uri_prefix.clone();
        node.validate_inflow_names = self.validate_inflow_names;
        node.max_concurrency = self.max_concurrency;
        node.ordered = self.ordered;
        node.exception_policy = self.exception_policy;
        node.exception_outflow = self.exception_outflow.clone();
        node.end_flow_on_null = self.end_flow_on_null;
        node.end_flow_on_no_output = self.end_flow_on_no_output;
        Some(Box::new(node))
    }
}

/// Declares an [`ActorWorkflowNode`].
///
/// ```rust,no_run
/// use cinnabar::prelude::*;
///
/// # fn multiplier() -> Actor { unimplemented!() }
/// let node = NodeBuilder::new("A")
///     .actor(multiplier())
///     .constant("a", json!(5))
///     .sequence("b", vec![json!(3), json!(8), json!(2)])
///     .outflow("c", "/product")
///     .build();
/// ```
pub struct NodeBuilder {
    node: ActorWorkflowNode,
}

impl NodeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node: ActorWorkflowNode::new(name),
        }
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.node.actor = Some(actor);
        self
    }

    /// Reads a packet from `expression` before every step.
    pub fn inflow(mut self, label: &str, expression: &str) -> Self {
        self.node.core.declare_inflow(label, expression, false);
        self
    }

    /// Reads a single packet whose value is reused by every later step.
    pub fn receive_once_inflow(mut self, label: &str, expression: &str) -> Self {
        self.node.core.declare_inflow(label, expression, true);
        self
    }

    pub fn outflow(mut self, label: &str, expression: &str) -> Self {
        self.node.core.declare_outflow(label, Some(expression));
        self
    }

    /// Publishes `label` at `<node>.<label>`.
    pub fn default_outflow(mut self, label: &str) -> Self {
        self.node.core.declare_outflow(label, None);
        self
    }

    pub fn constant(mut self, label: impl Into<String>, value: NodeValue) -> Self {
        self.node.constants.insert(label.into(), value);
        self
    }

    /// A value staged once at initialization that later packets replace.
    pub fn initial_value(mut self, label: impl Into<String>, value: NodeValue) -> Self {
        self.node.initial_values.insert(label.into(), value);
        self
    }

    pub fn sequence(mut self, label: impl Into<String>, values: Vec<NodeValue>) -> Self {
        self.node.sequences.insert(label, values);
        self
    }

    pub fn repeat_values(mut self, repeat: bool) -> Self {
        self.node.sequences.set_repeat_values(repeat);
        self
    }

    /// # Panics
    ///
    /// Panics if `max` is zero.
    pub fn max_concurrency(mut self, max: usize) -> Self {
        assert!(max > 0, "max_concurrency must be at least 1");
        self.node.max_concurrency = Some(max);
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.node.ordered = Some(ordered);
        self
    }

    pub fn steps_once(mut self, steps_once: bool) -> Self {
        self.node.core.steps_once = steps_once;
        self
    }

    pub fn exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.node.exception_policy = Some(policy);
        self
    }

    /// Publishes the error of every failed step at `expression` and keeps the
    /// node stepping. Takes precedence over the exception policy.
    pub fn exception_outflow(mut self, label: &str, expression: &str) -> Self {
        self.node.core.declare_outflow(label, Some(expression));
        self.node.exception_outflow = Some(label.to_string());
        self
    }

    /// Ends the node's flow on an outflow the first time its output is null.
    pub fn end_flow_on_null(mut self, end: bool) -> Self {
        self.node.end_flow_on_null = end;
        self
    }

    /// Ends the node's flow on an outflow the first time its output is disabled.
    pub fn end_flow_on_no_output(mut self, end: bool) -> Self {
        self.node.end_flow_on_no_output = end;
        self
    }

    /// Runs a nested workflow under this URI prefix template.
    pub fn uri_prefix(mut self, template: impl Into<String>) -> Self {
        self.node.nested_uri_prefix = Some(template.into());
        self
    }

    pub fn validate_inflow_names(mut self, validate: bool) -> Self {
        self.node.validate_inflow_names = validate;
        self
    }

    pub fn context(mut self, context: std::sync::Arc<crate::core::context::WorkflowContext>) -> Self {
        self.node.core.set_context_if_absent(&context);
        self
    }

    pub fn build(self) -> ActorWorkflowNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actor::logic::FnActor;
    use crate::core::actor::signature::{InputSignature, OutputSignature};
    use crate::core::context::WorkflowContext;
    use serde_json::json;

    fn doubler() -> Actor {
        Actor::new(FnActor::new(|ctx| {
            let x: i64 = ctx.input_as("x")?;
            ctx.set_output("y", json!(x * 2))?;
            Ok(())
        }))
        .with_input("x", InputSignature::new())
        .with_output("y", OutputSignature::new())
    }

    fn prepared(builder: NodeBuilder) -> Result<ActorWorkflowNode> {
        let mut node = builder.context(WorkflowContext::shared_default()).build();
        node.after_properties_set()?;
        node.elaborate()?;
        node.configure()?;
        Ok(node)
    }

    #[test]
    fn test_missing_actor_rejected() {
        let err = prepared(NodeBuilder::new("A").outflow("y", "/y"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("must set actor property"));
    }

    #[test]
    fn test_unknown_inflow_rejected_when_actor_declares_inputs() {
        let err = prepared(
            NodeBuilder::new("A")
                .actor(doubler().with_name("doubler"))
                .inflow("z", "/z")
                .outflow("y", "/y"),
        )
        .err()
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Node declaration error: Actor doubler does not accept input variable 'z'."
        );
    }

    #[test]
    fn test_unknown_outflow_rejected() {
        let err = prepared(
            NodeBuilder::new("A")
                .actor(doubler().with_name("doubler"))
                .inflow("x", "/x")
                .outflow("w", "/w"),
        )
        .err()
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Node declaration error: Actor doubler does not produce output variable 'w' named by node A."
        );
    }

    #[test]
    fn test_control_inflow_may_not_shadow_actor_input() {
        let err = prepared(
            NodeBuilder::new("A")
                .actor(doubler().with_name("doubler"))
                .inflow("x", "control:/x")
                .outflow("y", "/y"),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("Control protocol may not be used on A inflow 'x'"));
    }

    #[test]
    fn test_undeclared_actor_ports_become_implicit() {
        let node = prepared(
            NodeBuilder::new("A")
                .actor(Actor::new(FnActor::new(|_| Ok(()))))
                .inflow("x", "/x")
                .constant("k", json!(1))
                .outflow("y", "/y"),
        )
        .unwrap();
        let actor = node.actor().unwrap();
        assert!(actor.has_input("x"));
        assert!(actor.has_input("k"));
        assert!(actor.has_output("y"));
    }

    #[test]
    fn test_node_without_inflows_steps_once() {
        let node = prepared(
            NodeBuilder::new("A")
                .actor(doubler())
                .constant("x", json!(1))
                .outflow("y", "/y"),
        )
        .unwrap();
        assert!(node.core().steps_once());
        let stepping = prepared(
            NodeBuilder::new("B")
                .actor(doubler())
                .sequence("x", vec![json!(1), json!(2)])
                .outflow("y", "/y"),
        )
        .unwrap();
        assert!(!stepping.core().steps_once());
    }

    #[test]
    fn test_uncloneable_actor_in_concurrent_node_rejected() {
        let err = prepared(
            NodeBuilder::new("A")
                .actor(doubler().with_name("doubler").cloneable(false))
                .inflow("x", "/x")
                .outflow("y", "/y")
                .max_concurrency(3),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WorkflowError::IllegalWorkflowSpec(_)));
    }

    #[test]
    fn test_prefix_only_for_subworkflows() {
        let err = prepared(
            NodeBuilder::new("A")
                .actor(doubler())
                .inflow("x", "/x")
                .outflow("y", "/y")
                .uri_prefix("/run{RUN}"),
        )
        .err()
        .unwrap();
        assert_eq!(
            err.to_string(),
            "Illegal workflow specification: A URI prefix may only be applied to nodes invoking subworkflows."
        );
    }

    #[tokio::test]
    async fn test_sequence_drives_steps_then_end_of_stream() {
        let mut node = prepared(
            NodeBuilder::new("A")
                .actor(doubler())
                .sequence("x", vec![json!(1), json!(2)])
                .outflow("y", "/y"),
        )
        .unwrap();
        node.initialize().unwrap();

        let mut values = Vec::new();
        let mut saw_end = false;
        for _ in 0..5 {
            node.trigger().await.unwrap();
            if node.outputs_ready() {
                let packet = node.output_packet("y").unwrap();
                match packet.value("/y") {
                    Some(value) => values.push(value.clone()),
                    None => saw_end = packet.is_end_of_stream(),
                }
            }
        }
        assert_eq!(values, vec![json!(2), json!(4)]);
        assert!(saw_end);
        assert_eq!(node.step_count(), 2);
        assert!(node.core().is_finished().unwrap());
    }

    #[tokio::test]
    async fn test_end_flow_on_null_output() {
        let mut node = prepared(
            NodeBuilder::new("A")
                .actor(
                    Actor::new(FnActor::new(|ctx| {
                        let x: i64 = ctx.input_as("x")?;
                        let y = if x > 1 { NodeValue::Null } else { json!(x) };
                        ctx.set_output("y", y)?;
                        Ok(())
                    }))
                    .with_input("x", InputSignature::new())
                    .with_output("y", OutputSignature::new().nullable()),
                )
                .sequence("x", vec![json!(1), json!(2), json!(3)])
                .outflow("y", "/y")
                .end_flow_on_null(true),
        )
        .unwrap();
        node.initialize().unwrap();

        let mut packets = Vec::new();
        for _ in 0..5 {
            node.trigger().await.unwrap();
            if node.outputs_ready() {
                packets.push(node.output_packet("y").unwrap());
            }
        }
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].value("/y"), Some(&json!(1)));
        assert!(packets[1].is_end_of_stream());
        assert_eq!(node.step_count(), 2);
    }

    #[tokio::test]
    async fn test_end_flow_policy_stops_node_on_error() {
        let mut node = prepared(
            NodeBuilder::new("A")
                .actor(
                    Actor::new(FnActor::new(|_| Err("nope".into())))
                        .with_input("x", InputSignature::new())
                        .with_output("y", OutputSignature::new()),
                )
                .sequence("x", vec![json!(1), json!(2)])
                .outflow("y", "/y")
                .exception_policy(ExceptionPolicy::EndFlow),
        )
        .unwrap();
        node.initialize().unwrap();
        assert!(node.trigger().await.unwrap());
        assert!(node.output_packet("y").unwrap().is_end_of_stream());
        assert!(node.core().is_finished().unwrap());
        assert!(!node.trigger().await.unwrap());
    }

    #[tokio::test]
    async fn test_rethrow_policy_surfaces_actor_error() {
        let mut node = prepared(
            NodeBuilder::new("A")
                .actor(
                    Actor::new(FnActor::new(|_| Err("nope".into())))
                        .with_name("failing")
                        .with_input("x", InputSignature::new())
                        .with_output("y", OutputSignature::new()),
                )
                .sequence("x", vec![json!(1)])
                .outflow("y", "/y"),
        )
        .unwrap();
        node.initialize().unwrap();
        let err = node.trigger().await.unwrap_err();
        assert!(matches!(err, WorkflowError::Actor { ref actor, .. } if actor == "failing"));
    }
}
