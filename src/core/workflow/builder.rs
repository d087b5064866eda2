use crate::core::actor::Actor;
use crate::core::actor::signature::{InputSignature, OutputSignature};
use crate::core::context::WorkflowContext;
use crate::core::director::Director;
use crate::core::error::Result;
use crate::core::node::WorkflowNode;
use crate::core::workflow::Workflow;
use std::sync::Arc;

/// Declares a workflow and wraps it in an actor.
///
/// ```rust,no_run
/// use cinnabar::prelude::*;
///
/// # fn doubler() -> Actor { unimplemented!() }
/// let workflow = WorkflowBuilder::new("Doubling")
///     .director(DataDrivenDirector::new())
///     .input_flow("n", "/input/n")
///     .node(
///         NodeBuilder::new("Double")
///             .actor(doubler())
///             .inflow("n", "/input/n")
///             .outflow("doubled", "/doubled")
///             .build(),
///     )
///     .output_flow("doubled", "/doubled")
///     .build()
///     .unwrap();
/// ```
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<Box<dyn WorkflowNode>>,
    director: Option<Box<dyn Director>>,
    input_flows: Vec<(String, String)>,
    output_flows: Vec<(String, String)>,
    uri_prefix: Option<String>,
    context: Option<Arc<WorkflowContext>>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            director: None,
            input_flows: Vec::new(),
            output_flows: Vec::new(),
            uri_prefix: None,
            context: None,
        }
    }

    pub fn node(mut self, node: impl WorkflowNode + 'static) -> Self {
        self.nodes.push(Box::new(node));
        self
    }

    pub fn director(mut self, director: impl Director + 'static) -> Self {
        self.director = Some(Box::new(director));
        self
    }

    /// Publishes workflow input `label` at `expression` at the start of every run.
    pub fn input_flow(mut self, label: impl Into<String>, expression: impl Into<String>) -> Self {
        self.input_flows.push((label.into(), expression.into()));
        self
    }

    /// Makes the last value published at `expression` the workflow output `label`.
    pub fn output_flow(mut self, label: impl Into<String>, expression: impl Into<String>) -> Self {
        self.output_flows.push((label.into(), expression.into()));
        self
    }

    pub fn uri_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.uri_prefix = Some(prefix.into());
        self
    }

    pub fn context(mut self, context: Arc<WorkflowContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<Actor> {
        let mut workflow = Workflow::new(self.name.clone());
        for node in self.nodes {
            workflow.add_node(node);
        }
        if let Some(director) = self.director {
            workflow.set_director(director);
        }
        if let Some(prefix) = &self.uri_prefix {
            workflow.set_uri_prefix(prefix)?;
        }
        if let Some(context) = &self.context {
            workflow.set_context(context.clone());
        }
        for (label, expression) in &self.input_flows {
            workflow.add_input_flow(label, expression);
        }
        for (label, expression) in &self.output_flows {
            workflow.add_output_flow(label, expression);
        }

        let mut actor = Actor::new_async(workflow).with_name(self.name);
        for (label, _) in &self.input_flows {
            actor = actor.with_input(label.as_str(), InputSignature::new().nullable());
        }
        for (label, _) in &self.output_flows {
            actor = actor.with_output(label.as_str(), OutputSignature::new().nullable());
        }
        if let Some(context) = self.context {
            actor = actor.with_context(context);
        }
        Ok(actor)
    }
}
