use crate::core::context::WorkflowContext;
use crate::core::error::{Result, WorkflowError};
use crate::core::node::{BufferNode, SourceNode, WorkflowNode};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// An outflow, identified by its node and label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeOutput {
    pub node: String,
    pub label: String,
}

impl NodeOutput {
    pub fn new(node: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.label)
    }
}

/// An inflow, identified by its node and label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeInput {
    pub node: String,
    pub label: String,
}

impl NodeInput {
    pub fn new(node: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for NodeInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.label)
    }
}

/// Who publishes what, and who reads it.
///
/// Rebuilt from scratch by every [`analyze`](WorkflowGraph::analyze) pass.
#[derive(Debug, Default, Clone)]
pub struct WorkflowGraph {
    publishers: BTreeMap<String, Vec<NodeOutput>>,
    sinks: Vec<String>,
    sources: BTreeMap<NodeInput, Vec<NodeOutput>>,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes without outflows.
    pub fn sinks(&self) -> &[String] {
        &self.sinks
    }

    /// The outflows feeding each inflow.
    pub fn sources(&self) -> &BTreeMap<NodeInput, Vec<NodeOutput>> {
        &self.sources
    }

    pub fn sources_for(&self, input: &NodeInput) -> &[NodeOutput] {
        self.sources.get(input).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The inflows fed by each outflow, in inflow order.
    pub fn subscriptions(&self) -> BTreeMap<NodeOutput, Vec<NodeInput>> {
        let mut subscriptions: BTreeMap<NodeOutput, Vec<NodeInput>> = BTreeMap::new();
        for (input, outputs) in &self.sources {
            for output in outputs {
                subscriptions
                    .entry(output.clone())
                    .or_default()
                    .push(input.clone());
            }
        }
        subscriptions
    }

    /// Matches every inflow to the outflows publishing under its binding.
    ///
    /// Inflows nothing publishes to are fed by a new source node when their
    /// protocol can resolve resources outside the workflow. Returns true when
    /// such nodes were added, in which case the graph must be analyzed again.
    pub(crate) fn analyze(
        &mut self,
        nodes: &mut Vec<Box<dyn WorkflowNode>>,
        context: &Arc<WorkflowContext>,
        source_count: &mut usize,
    ) -> Result<bool> {
        self.publishers.clear();
        self.sinks.clear();
        self.sources.clear();

        for node in nodes.iter_mut() {
            let core = node.core_mut();
            if core.outflows.is_empty() {
                self.sinks.push(core.name.clone());
                continue;
            }
            let name = core.name.clone();
            for outflow in core.outflows_mut() {
                outflow.set_has_receivers(false);
                self.publishers
                    .entry(outflow.dataflow_binding().to_string())
                    .or_default()
                    .push(NodeOutput::new(&name, outflow.label()));
            }
        }
        self.assert_no_binding_extends_another()?;

        let mut modified = false;
        let mut new_nodes: Vec<Box<dyn WorkflowNode>> = Vec::new();
        let mut received: Vec<NodeOutput> = Vec::new();

        for node in nodes.iter_mut() {
            let name = node.name().to_string();
            let mut labels = HashSet::new();
            for label in node.core().inflow_labels() {
                let inflow = node.core().inflow(&label)?;
                validate_input_label(&name, &label, &mut labels)?;
                for variable in inflow.variable_names() {
                    validate_input_label(&name, variable, &mut labels)?;
                }

                let matches = self.publishers_for(&name, inflow.dataflow_binding())?;
                if !matches.is_empty() {
                    received.extend(matches.iter().cloned());
                    self.sources.insert(NodeInput::new(&name, &label), matches);
                    continue;
                }

                if !inflow.protocol().is_externally_resolvable() {
                    return Err(WorkflowError::NodeDeclaration(format!(
                        "No outflow matching inflow expression for node {}: {}",
                        name,
                        inflow.dataflow_binding()
                    )));
                }

                *source_count += 1;
                let source =
                    SourceNode::for_inflow(format!("Source{}", source_count), inflow, context)?;
                let path = source.path().to_string();
                let packet_binding = inflow.packet_binding().to_string();
                let receive_once = inflow.receive_once();
                log::debug!("Feeding inflow '{}' on node {} from {}", label, name, source.name());
                node.core_mut().register_inflow_with_binding(
                    &label,
                    &path,
                    &packet_binding,
                    receive_once,
                )?;
                new_nodes.push(Box::new(source));
                modified = true;
            }
        }

        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.name().to_string(), i))
            .collect();
        for output in received {
            if let Some(&i) = index.get(&output.node) {
                nodes[i]
                    .core_mut()
                    .outflow_mut(&output.label)?
                    .set_has_receivers(true);
            }
        }

        nodes.extend(new_nodes);
        Ok(modified)
    }

    /// Exact binding matches win; otherwise the single publisher whose binding
    /// is a parent path of `binding`.
    fn publishers_for(&self, node: &str, binding: &str) -> Result<Vec<NodeOutput>> {
        if let Some(outputs) = self.publishers.get(binding) {
            return Ok(outputs.clone());
        }
        let mut matches = self
            .publishers
            .iter()
            .filter(|(published, _)| extends(binding, published));
        let Some((_, outputs)) = matches.next() else {
            return Ok(Vec::new());
        };
        if matches.next().is_some() {
            return Err(WorkflowError::NodeDeclaration(format!(
                "More than one outflow contains inflow expression for node {}: {}",
                node, binding
            )));
        }
        Ok(outputs.clone())
    }

    fn assert_no_binding_extends_another(&self) -> Result<()> {
        for binding in self.publishers.keys() {
            if let Some(parent) = self
                .publishers
                .keys()
                .find(|other| extends(binding, other))
            {
                return Err(WorkflowError::IllegalWorkflowSpec(format!(
                    "An outflow cannot write inside a collection written by another outflow: {} is inside {}",
                    binding, parent
                )));
            }
        }
        Ok(())
    }
}

/// True when `path` lies strictly inside the collection at `parent`.
fn extends(path: &str, parent: &str) -> bool {
    path.len() > parent.len()
        && path.starts_with(parent)
        && (parent.ends_with('/') || path[parent.len()..].starts_with('/'))
}

fn validate_input_label(node: &str, label: &str, seen: &mut HashSet<String>) -> Result<()> {
    if !label.is_empty() && !seen.insert(label.to_string()) {
        return Err(WorkflowError::NodeDeclaration(format!(
            "Node {} has multiple input sources with label {}",
            node, label
        )));
    }
    Ok(())
}

/// Routes everything headed for `input` through a new buffer node.
///
/// The buffer reads the inflow's old path and republishes under its own name,
/// and the inflow is rebound to the buffer's outflow.
pub(crate) fn insert_node_before_inflow(
    nodes: &mut Vec<Box<dyn WorkflowNode>>,
    input: &NodeInput,
) -> Result<()> {
    let target = nodes
        .iter_mut()
        .find(|n| n.name() == input.node)
        .ok_or_else(|| {
            WorkflowError::contract(format!("Workflow has no node named {}", input.node))
        })?;

    let context = target.core().context()?.clone();
    let inflow = target.core().inflow(&input.label)?;
    let path = inflow.path().to_string();
    let scheme = inflow.template().scheme().to_string();
    let packet_binding = inflow.packet_binding().to_string();
    let receive_once = inflow.receive_once();

    let mut buffer = BufferNode::new(&input.node, &input.label);
    buffer.core_mut().set_context_if_absent(&context);
    let buffer_path = format!("{}{}", buffer.name(), path);
    buffer.attach(&path, &buffer_path)?;

    let expression = if scheme.is_empty() {
        buffer_path
    } else {
        format!("{}:{}", scheme, buffer_path)
    };
    target.core_mut().register_inflow_with_binding(
        &input.label,
        &expression,
        &packet_binding,
        receive_once,
    )?;
    nodes.push(Box::new(buffer));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actor::Actor;
    use crate::core::actor::logic::FnActor;
    use crate::core::actor::signature::{InputSignature, OutputSignature};
    use crate::core::node::{ActorWorkflowNode, NodeBuilder};
    use serde_json::json;

    fn pass_through(name: &str) -> Actor {
        Actor::new(FnActor::new(|ctx| {
            let value = ctx.input("in").cloned().unwrap_or_default();
            ctx.set_output("out", value)?;
            Ok(())
        }))
        .with_name(name)
        .with_input("in", InputSignature::new())
        .with_output("out", OutputSignature::new())
    }

    fn elaborated(builder: NodeBuilder, context: &Arc<WorkflowContext>) -> Box<dyn WorkflowNode> {
        let mut node: Box<dyn WorkflowNode> = Box::new(builder.context(context.clone()).build());
        node.after_properties_set().unwrap();
        node.elaborate().unwrap();
        node
    }

    fn producer(context: &Arc<WorkflowContext>, name: &str, out: &str) -> Box<dyn WorkflowNode> {
        let actor = Actor::new(FnActor::new(|ctx| {
            ctx.set_output("out", json!(1))?;
            Ok(())
        }))
        .with_name(format!("{}_actor", name))
        .with_output("out", OutputSignature::new());
        elaborated(NodeBuilder::new(name).actor(actor).outflow("out", out), context)
    }

    fn consumer(context: &Arc<WorkflowContext>, name: &str, input: &str) -> Box<dyn WorkflowNode> {
        elaborated(
            NodeBuilder::new(name)
                .actor(pass_through(&format!("{}_actor", name)))
                .inflow("in", input)
                .outflow("out", &format!("/{}", name)),
            context,
        )
    }

    #[test]
    fn test_exact_and_prefix_matches() {
        let context = WorkflowContext::shared_default();
        let mut nodes = vec![
            producer(&context, "A", "/a"),
            consumer(&context, "B", "/a"),
            consumer(&context, "C", "/a/x"),
        ];
        let mut sources = 0;
        let mut graph = WorkflowGraph::new();
        assert!(!graph.analyze(&mut nodes, &context, &mut sources).unwrap());

        let a_out = NodeOutput::new("A", "out");
        assert_eq!(graph.sources_for(&NodeInput::new("B", "in")), &[a_out.clone()]);
        assert_eq!(graph.sources_for(&NodeInput::new("C", "in")), &[a_out.clone()]);
        assert_eq!(graph.subscriptions()[&a_out].len(), 2);
        assert!(nodes[0].core().outflow("out").unwrap().has_receivers());
        assert!(!nodes[1].core().outflow("out").unwrap().has_receivers());
        assert!(graph.sinks().is_empty());
    }

    #[test]
    fn test_unmatched_inflow_is_a_declaration_error() {
        let context = WorkflowContext::shared_default();
        let mut nodes = vec![producer(&context, "A", "/a"), consumer(&context, "B", "/ab")];
        let err = WorkflowGraph::new()
            .analyze(&mut nodes, &context, &mut 0)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Node declaration error: No outflow matching inflow expression for node B: /ab"
        );
    }

    #[test]
    fn test_outflow_inside_another_outflow_rejected() {
        let context = WorkflowContext::shared_default();
        let mut nodes = vec![producer(&context, "A", "/a"), producer(&context, "B", "/a/b")];
        let err = WorkflowGraph::new()
            .analyze(&mut nodes, &context, &mut 0)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::IllegalWorkflowSpec(_)));
    }

    #[test]
    fn test_context_inflow_gets_source_node() {
        let context = WorkflowContext::builder()
            .property("factor", json!(3))
            .build();
        let mut nodes = vec![consumer(&context, "B", "context:/property/factor")];
        let mut sources = 0;
        let mut graph = WorkflowGraph::new();
        assert!(graph.analyze(&mut nodes, &context, &mut sources).unwrap());
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].name(), "Source1");
        assert!(nodes[1].core().is_hidden());
        assert_eq!(nodes[0].core().inflow("in").unwrap().binding(), "/property/factor");

        assert!(!graph.analyze(&mut nodes, &context, &mut sources).unwrap());
        assert_eq!(
            graph.sources_for(&NodeInput::new("B", "in")),
            &[NodeOutput::new("Source1", "outflow")]
        );
    }

    #[test]
    fn test_buffer_inserted_before_inflow() {
        let context = WorkflowContext::shared_default();
        let mut nodes = vec![producer(&context, "A", "/a"), consumer(&context, "B", "/a")];
        insert_node_before_inflow(&mut nodes, &NodeInput::new("B", "in")).unwrap();
        assert_eq!(nodes.len(), 3);
        assert!(nodes[2].is::<BufferNode>());
        assert_eq!(
            nodes[1].core().inflow("in").unwrap().binding(),
            "BufferNode-for-B-in/a"
        );

        let mut graph = WorkflowGraph::new();
        graph.analyze(&mut nodes, &context, &mut 0).unwrap();
        assert_eq!(
            graph.sources_for(&NodeInput::new("BufferNode-for-B-in", "input")),
            &[NodeOutput::new("A", "out")]
        );
        assert_eq!(
            graph.sources_for(&NodeInput::new("B", "in")),
            &[NodeOutput::new("BufferNode-for-B-in", "output")]
        );
        assert!(nodes[0].is::<ActorWorkflowNode>());
    }
}
