//! Workflows: graphs of nodes run by a director, themselves usable as actors.

pub mod builder;
pub mod graph;

pub use builder::WorkflowBuilder;
pub use graph::{NodeInput, NodeOutput, WorkflowGraph};

use crate::core::actor::logic::{AsyncActorLogic, StepContext};
use crate::core::actor::{ActorCore, NodeBinding};
use crate::core::context::WorkflowContext;
use crate::core::data::uri_template::UriTemplate;
use crate::core::director::{Director, DirectorState};
use crate::core::error::{BoxError, Result, WorkflowError};
use crate::core::node::{ActorWorkflowNode, InPortal, OutPortal, WorkflowNode};
use crate::core::validation::ValidationResult;
use crate::core::wrapup::WrapupResult;
use crate::core::{NodeValue, Variables};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub(crate) const IMPLICIT_INPORTAL: &str = "WorkflowInportal";
pub(crate) const IMPLICIT_OUTPORTAL: &str = "WorkflowOutportal";

/// A graph of nodes driven by a director.
///
/// A workflow is the body of an asynchronous [`Actor`](crate::Actor): each
/// step of the actor is one complete run of the graph. The workflow's inputs
/// enter through an in-portal node and its outputs are whatever last reached
/// the out-portal node, so a workflow can be placed on a node of another
/// workflow like any other actor.
pub struct Workflow {
    name: String,
    nodes: Vec<Box<dyn WorkflowNode>>,
    director: Option<Box<dyn Director>>,
    graph: WorkflowGraph,
    uri_prefix: Option<UriTemplate>,
    input_flows: BTreeMap<String, String>,
    output_flows: BTreeMap<String, String>,
    input_portals: BTreeMap<String, usize>,
    output_portals: BTreeMap<String, usize>,
    context: Option<Arc<WorkflowContext>>,
    next_node_number: usize,
    next_source_number: usize,
    prepared: bool,
    steps_since_initialize: u64,
    last_wrapup: WrapupResult,
}

impl Workflow {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            director: None,
            graph: WorkflowGraph::new(),
            uri_prefix: None,
            input_flows: BTreeMap::new(),
            output_flows: BTreeMap::new(),
            input_portals: BTreeMap::new(),
            output_portals: BTreeMap::new(),
            context: None,
            next_node_number: 0,
            next_source_number: 0,
            prepared: false,
            steps_since_initialize: 0,
            last_wrapup: WrapupResult::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn add_node(&mut self, node: Box<dyn WorkflowNode>) {
        self.nodes.push(node);
    }

    pub(crate) fn set_director(&mut self, director: Box<dyn Director>) {
        self.director = Some(director);
    }

    pub(crate) fn add_input_flow(&mut self, label: &str, expression: &str) {
        self.input_flows
            .insert(label.to_string(), expression.to_string());
    }

    pub(crate) fn add_output_flow(&mut self, label: &str, expression: &str) {
        self.output_flows
            .insert(label.to_string(), expression.to_string());
    }

    pub(crate) fn set_context(&mut self, context: Arc<WorkflowContext>) {
        self.context = Some(context);
    }

    /// Sets the template every run's URIs are prefixed with. Variables may name
    /// workflow inputs, `RUN` or `STEP`.
    pub fn set_uri_prefix(&mut self, prefix: &str) -> Result<()> {
        let template = UriTemplate::parse(prefix)?;
        if !template.scheme().is_empty() {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "No scheme may be specified for nested uri prefixes: {}",
                prefix
            )));
        }
        self.uri_prefix = Some(template);
        Ok(())
    }

    pub fn uri_prefix(&self) -> Option<&UriTemplate> {
        self.uri_prefix.as_ref()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &(dyn WorkflowNode + 'static)> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    pub fn node(&self, name: &str) -> Option<&(dyn WorkflowNode + 'static)> {
        self.nodes().find(|n| n.name() == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut (dyn WorkflowNode + 'static)> {
        self.nodes
            .iter_mut()
            .find(|n| n.name() == name)
            .map(|n| n.as_mut())
    }

    pub fn director(&self) -> Option<&dyn Director> {
        self.director.as_deref()
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Unused data reported by the most recent run.
    pub fn last_wrapup(&self) -> &WrapupResult {
        &self.last_wrapup
    }

    fn director_mut(&mut self) -> Result<&mut Box<dyn Director>> {
        let name = &self.name;
        self.director.as_mut().ok_or_else(|| {
            WorkflowError::IllegalWorkflowSpec(format!(
                "No director specified for workflow {}",
                name
            ))
        })
    }

    /// Resolves every node's ports and rewrites the graph until it is stable.
    fn elaborate_graph(
        &mut self,
        context: &Arc<WorkflowContext>,
        binding: Option<&NodeBinding>,
    ) -> Result<()> {
        self.director_mut()?;
        if let Some(binding) = binding {
            let variables = self
                .uri_prefix
                .as_ref()
                .map_or(0, UriTemplate::variable_count);
            if !binding.steps_once && variables == 0 {
                return Err(WorkflowError::IllegalWorkflowSpec(format!(
                    "Nested workflows '{}' requires a URI prefix with at least one variable unless they step only once.",
                    binding.node_name
                )));
            }
        }
        self.context.get_or_insert_with(|| context.clone());

        if !self.input_flows.is_empty() {
            let mut portal = InPortal::new(IMPLICIT_INPORTAL);
            for (label, expression) in &self.input_flows {
                portal = portal.outflow(label, expression);
            }
            self.nodes.push(Box::new(portal));
        }
        if !self.output_flows.is_empty() {
            let mut portal = OutPortal::new(IMPLICIT_OUTPORTAL);
            for (label, expression) in &self.output_flows {
                portal = portal.inflow(label, expression);
            }
            self.nodes.push(Box::new(portal));
        }

        let director = self.director_mut()?;
        if director.state() == DirectorState::Constructed {
            director.after_properties_set()?;
        }
        let steps_once = director.nodes_step_once();

        let mut names = HashSet::new();
        for node in self.nodes.iter_mut() {
            if node.name().is_empty() {
                self.next_node_number += 1;
                node.core_mut()
                    .set_name(format!("anonymous_node_{}", self.next_node_number));
            }
            if !names.insert(node.name().to_string()) {
                log::warn!(
                    "Workflow {} has more than one node named {}",
                    self.name,
                    node.name()
                );
            }
            let node_name = node.name().to_string();
            if let Some(actor) = node
                .downcast_mut::<ActorWorkflowNode>()
                .and_then(ActorWorkflowNode::actor_mut)
            {
                if actor.name().is_empty() {
                    actor.set_name(format!("{}_actor", node_name))?;
                }
            }
            if steps_once {
                node.set_steps_once(true);
            }
            node.core_mut().set_context_if_absent(context);
            node.after_properties_set()?;
            node.elaborate()?;
        }

        loop {
            if self
                .graph
                .analyze(&mut self.nodes, context, &mut self.next_source_number)?
            {
                continue;
            }
            let director = self
                .director
                .as_mut()
                .ok_or_else(|| WorkflowError::contract("director removed during elaboration"))?;
            if !director.elaborate(&mut self.nodes, &self.graph)? {
                break;
            }
        }

        self.register_portals();
        Ok(())
    }

    fn register_portals(&mut self) {
        self.input_portals.clear();
        self.output_portals.clear();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is::<InPortal>() {
                for label in node.core().outflow_labels() {
                    self.input_portals.insert(label, i);
                }
            } else if node.is::<OutPortal>() {
                for label in node.core().inflow_labels() {
                    self.output_portals.insert(label, i);
                }
            }
        }
    }

    fn configure_graph(&mut self) -> Result<()> {
        for node in self.nodes.iter_mut() {
            node.configure()?;
        }
        self.director_mut()?.configure()
    }

    fn initialize_graph(&mut self) -> Result<()> {
        self.steps_since_initialize = 0;
        self.director_mut()?.initialize()
    }

    /// Elaborates, configures and initializes a workflow cloned from a running
    /// one, so the clone can step straight away.
    fn prepare(
        &mut self,
        context: Option<&Arc<WorkflowContext>>,
        binding: Option<&NodeBinding>,
    ) -> Result<()> {
        let context = context
            .cloned()
            .or_else(|| self.context.clone())
            .unwrap_or_else(WorkflowContext::shared_default);
        self.elaborate_graph(&context, binding)?;
        self.configure_graph()?;
        self.initialize_graph()?;
        self.prepared = true;
        Ok(())
    }

    /// Computes the URI prefix applied to every node during this run.
    fn run_prefix(&self, ctx: &StepContext<'_>, step: u64) -> Result<String> {
        let expanded = match &self.uri_prefix {
            None => String::new(),
            Some(template) => {
                let mut variables: Variables = ctx.inputs().clone();
                variables.insert("RUN".to_string(), NodeValue::from(ctx.run_count()));
                variables.insert("STEP".to_string(), NodeValue::from(step));
                template.expand(&variables, "", "")?.0
            }
        };
        Ok(match ctx.node() {
            None => expanded,
            Some(binding) if expanded.is_empty() => {
                format!("{}/{}", binding.uri_prefix, binding.node_name)
            }
            Some(binding) => format!("{}{}", binding.uri_prefix, expanded),
        })
    }

    async fn run(&mut self, ctx: &mut StepContext<'_>) -> Result<()> {
        if !self.prepared {
            let context = ctx.context().cloned();
            let binding = ctx.node().cloned();
            self.prepare(context.as_ref(), binding.as_ref())?;
        }
        let top_level = ctx.node().is_none();
        self.steps_since_initialize += 1;
        let step = if top_level {
            self.steps_since_initialize
        } else {
            ctx.step_count()
        };
        if top_level && self.steps_since_initialize > 1 && self.uri_prefix.is_none() {
            return Err(WorkflowError::IllegalWorkflowSpec(
                "May not rerun a workflow without reinitializing unless a run prefix is provided."
                    .to_string(),
            ));
        }

        let context = self
            .context
            .clone()
            .unwrap_or_else(WorkflowContext::shared_default);
        let recorder = context.recorder();
        if top_level {
            recorder.record_workflow_run_started(&self.name);
        }

        let prefix = self.run_prefix(ctx, step)?;
        log::debug!(
            "Workflow {} run {} using URI prefix '{}'",
            self.name,
            ctx.run_count(),
            prefix
        );
        for node in self.nodes.iter_mut() {
            node.set_uri_prefix(&prefix);
            node.initialize()?;
        }

        for (label, &i) in &self.input_portals {
            let Some(value) = ctx.input(label).cloned() else {
                continue;
            };
            if top_level {
                recorder.record_workflow_input(&self.name, label, &value);
            }
            if let Some(portal) = self.nodes[i].downcast_mut::<InPortal>() {
                portal.set_input_value(label, value)?;
            }
        }

        let director = self
            .director
            .as_mut()
            .ok_or_else(|| WorkflowError::contract("workflow ran without a director"))?;
        director.run(&mut self.nodes).await?;
        if top_level {
            recorder.record_workflow_run_completed(&self.name);
        }

        let mut wrapup = director.wrapup(&self.nodes)?;
        for node in self.nodes.iter_mut() {
            wrapup.extend(node.wrapup()?);
        }
        if !wrapup.is_empty() && context.config().warn_on_unused_data {
            log::warn!(
                "Run {} of workflow '{}' wrapped up with unused data packets:\n{}",
                ctx.run_count(),
                self.name,
                wrapup
            );
        }
        self.last_wrapup = wrapup;

        for (label, &i) in &self.output_portals {
            let value = match self.nodes[i].downcast_ref::<OutPortal>() {
                Some(portal) => portal.output_value(label)?,
                None => NodeValue::Null,
            };
            if top_level {
                recorder.record_workflow_output(&self.name, label, &value);
            }
            ctx.set_output(label, value)?;
        }
        Ok(())
    }

    /// Checks an elaborated workflow for dead ends and unrunnable nodes.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        for node in &self.nodes {
            let core = node.core();
            let is_portal = node.is::<InPortal>() || node.is::<OutPortal>();
            if self.graph.sinks().iter().any(|s| s == core.name()) && !is_portal {
                result.add_warning(format!(
                    "Node {} has no outflows, so nothing it computes leaves it",
                    core.name()
                ));
            }
            for outflow in core.outflows() {
                if !outflow.has_receivers() {
                    result.add_warning(format!(
                        "Outflow '{}' on node {} has no receivers",
                        outflow.label(),
                        core.name()
                    ));
                }
            }
            if let Some(actor) = node
                .downcast_ref::<ActorWorkflowNode>()
                .and_then(ActorWorkflowNode::actor)
            {
                if node.max_concurrent_steps() > 1 && !actor.is_cloneable() {
                    result.add_error(format!(
                        "Uncloneable actor {} cannot be used within concurrent node {}",
                        actor.name(),
                        core.name()
                    ));
                }
            }
        }
        result
    }

    fn clone_declaration(&self) -> Workflow {
        let mut workflow = Workflow::new(self.name.clone());
        workflow.nodes = self
            .nodes
            .iter()
            .filter(|n| !matches!(n.name(), IMPLICIT_INPORTAL | IMPLICIT_OUTPORTAL))
            .filter_map(|n| n.clone_declaration())
            .collect();
        workflow.director = self.director.as_ref().map(|d| d.clone_box());
        workflow.uri_prefix = self.uri_prefix.clone();
        workflow.input_flows = self.input_flows.clone();
        workflow.output_flows = self.output_flows.clone();
        workflow.context = self.context.clone();
        workflow
    }
}

#[async_trait]
impl AsyncActorLogic for Workflow {
    async fn step(&mut self, ctx: &mut StepContext<'_>) -> std::result::Result<(), BoxError> {
        self.run(ctx).await?;
        Ok(())
    }

    fn elaborate(&mut self, core: &mut ActorCore) -> Result<()> {
        self.name = core.name().to_string();
        let context = core
            .context()
            .cloned()
            .or_else(|| self.context.clone())
            .ok_or_else(|| {
                WorkflowError::IllegalWorkflowSpec(format!(
                    "Must provide a workflow context to workflow {}",
                    self.name
                ))
            })?;
        let binding = core.node().cloned();
        self.elaborate_graph(&context, binding.as_ref())
    }

    fn configure(&mut self, _core: &mut ActorCore) -> Result<()> {
        self.configure_graph()
    }

    fn initialize(&mut self, _core: &mut ActorCore) -> Result<()> {
        self.initialize_graph()?;
        self.prepared = true;
        Ok(())
    }

    fn dispose(&mut self, _core: &mut ActorCore) -> Result<()> {
        for node in self.nodes.iter_mut() {
            node.dispose()?;
        }
        if let Some(director) = self.director.as_mut() {
            director.dispose()?;
        }
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn AsyncActorLogic> {
        Box::new(self.clone_declaration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actor::Actor;
    use crate::core::actor::logic::FnActor;
    use crate::core::actor::signature::{InputSignature, OutputSignature};
    use crate::core::director::{DataDrivenDirector, PublishSubscribeDirector};
    use crate::core::node::NodeBuilder;
    use serde_json::json;

    fn adder() -> Actor {
        Actor::new(FnActor::new(|ctx| {
            let a: i64 = ctx.input_as("a")?;
            let b: i64 = ctx.input_as("b")?;
            ctx.set_output("sum", json!(a + b))?;
            Ok(())
        }))
        .with_input("a", InputSignature::new())
        .with_input("b", InputSignature::new())
        .with_output("sum", OutputSignature::new())
    }

    fn adding_workflow() -> WorkflowBuilder {
        WorkflowBuilder::new("Adding")
            .director(DataDrivenDirector::new())
            .input_flow("a", "/in/a")
            .input_flow("b", "/in/b")
            .node(
                NodeBuilder::new("Add")
                    .actor(adder())
                    .inflow("a", "/in/a")
                    .inflow("b", "/in/b")
                    .outflow("sum", "/sum")
                    .build(),
            )
            .output_flow("sum", "/sum")
    }

    #[tokio::test]
    async fn test_workflow_runs_as_actor() {
        let mut actor = adding_workflow().build().unwrap();
        let inputs = Variables::from([("a".to_string(), json!(2)), ("b".to_string(), json!(3))]);
        let outputs = actor.run(inputs).await.unwrap();
        assert_eq!(outputs["sum"], json!(5));

        let workflow = actor.logic_as::<Workflow>().unwrap();
        assert!(workflow.last_wrapup().is_empty());
        assert_eq!(workflow.node("Add").unwrap().step_count(), 1);
        let add = workflow
            .node("Add")
            .and_then(|n| n.downcast_ref::<ActorWorkflowNode>())
            .unwrap();
        assert_eq!(add.actor().unwrap().name(), "Add_actor");
    }

    #[tokio::test]
    async fn test_missing_director_rejected() {
        let mut actor = Workflow::builder("NoDirector")
            .node(NodeBuilder::new("A").actor(adder()).build())
            .build()
            .unwrap();
        let err = actor.run(Variables::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Illegal workflow specification: No director specified for workflow NoDirector"
        );
    }

    #[test]
    fn test_prefix_may_not_carry_scheme() {
        let mut workflow = Workflow::new("W");
        assert!(workflow.set_uri_prefix("/run{RUN}").is_ok());
        let err = workflow.set_uri_prefix("file:/run{RUN}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Illegal workflow specification: No scheme may be specified for nested uri prefixes: file:/run{RUN}"
        );
    }

    #[tokio::test]
    async fn test_rerun_without_prefix_rejected() {
        let mut actor = adding_workflow()
            .director(PublishSubscribeDirector::new())
            .build()
            .unwrap();
        actor.set_context_if_absent(&WorkflowContext::shared_default());
        actor.after_properties_set().unwrap();
        actor.elaborate().unwrap();
        actor.configure().unwrap();
        actor.initialize().unwrap();
        actor.set_input_value("a", json!(1)).unwrap();
        actor.set_input_value("b", json!(1)).unwrap();
        actor.step().await.unwrap();
        assert_eq!(actor.output_value("sum"), Some(&json!(2)));

        actor.set_input_value("a", json!(1)).unwrap();
        actor.set_input_value("b", json!(2)).unwrap();
        let err = actor.step().await.unwrap_err();
        assert!(err.to_string().contains("May not rerun a workflow"));
    }

    #[tokio::test]
    async fn test_rerun_with_prefix_publishes_under_new_uris() {
        let mut actor = adding_workflow().uri_prefix("/run{RUN}").build().unwrap();
        actor.set_context_if_absent(&WorkflowContext::shared_default());
        actor.after_properties_set().unwrap();
        actor.elaborate().unwrap();
        actor.configure().unwrap();
        actor.initialize().unwrap();
        for (a, b) in [(1, 2), (10, 20)] {
            actor.set_input_value("a", json!(a)).unwrap();
            actor.set_input_value("b", json!(b)).unwrap();
            actor.step().await.unwrap();
            assert_eq!(actor.output_value("sum"), Some(&json!(a + b)));
        }
    }

    #[test]
    fn test_validate_reports_dead_ends() {
        let mut workflow = Workflow::new("W");
        workflow.set_director(Box::new(DataDrivenDirector::new()));
        let producer = Actor::new(FnActor::new(|ctx| {
            ctx.set_output("x", json!(1))?;
            Ok(())
        }))
        .with_output("x", OutputSignature::new());
        workflow.add_node(Box::new(
            NodeBuilder::new("P").actor(producer).outflow("x", "/x").build(),
        ));
        workflow
            .elaborate_graph(&WorkflowContext::shared_default(), None)
            .unwrap();

        let result = workflow.validate();
        assert!(result.is_safe());
        assert_eq!(
            result.warnings().collect::<Vec<_>>(),
            vec!["Outflow 'x' on node P has no receivers"]
        );
    }
}
