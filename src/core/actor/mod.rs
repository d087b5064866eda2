//! Actors: units of computation with declared inputs, outputs, settings and
//! persisted state, driven through a strict lifecycle.

pub mod logic;
pub mod signature;
pub mod state;
pub mod status;

use crate::core::context::WorkflowContext;
use crate::core::error::{BoxError, Result, WorkflowError};
use crate::core::{NodeValue, Variables};
use logic::{ActorLogic, AsyncActorLogic, StepContext};
use signature::{InputSignature, OutputSignature};
use state::ActorState;
use status::ActorStatus;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ActorState::*;

/// Where an actor sits in a workflow. Set by the node that steps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeBinding {
    pub node_name: String,
    pub steps_once: bool,
    /// The node's URI prefix for the current run.
    pub uri_prefix: String,
}

/// The body of an actor, either synchronous or asynchronous.
pub enum ActorBehaviour {
    Sync(Box<dyn ActorLogic>),
    Async(Box<dyn AsyncActorLogic>),
}

impl ActorBehaviour {
    fn clone_box(&self) -> Self {
        match self {
            ActorBehaviour::Sync(logic) => ActorBehaviour::Sync(logic.clone_box()),
            ActorBehaviour::Async(logic) => ActorBehaviour::Async(logic.clone_box()),
        }
    }
}

/// Everything about an actor except its behaviour.
#[derive(Clone)]
pub struct ActorCore {
    pub(crate) name: String,
    pub(crate) state: ActorState,
    pub(crate) inputs: BTreeMap<String, InputSignature>,
    pub(crate) outputs: BTreeMap<String, OutputSignature>,
    pub(crate) settings: HashMap<String, NodeValue>,
    pub(crate) state_values: HashMap<String, NodeValue>,
    pub(crate) input_values: HashMap<String, NodeValue>,
    pub(crate) output_values: HashMap<String, NodeValue>,
    pub(crate) status: ActorStatus,
    pub(crate) cloneable: bool,
    pub(crate) stateful: bool,
    pub(crate) uses_step_directory: bool,
    pub(crate) run_count: u64,
    pub(crate) node: Option<NodeBinding>,
    pub(crate) context: Option<Arc<WorkflowContext>>,
}

impl Default for ActorCore {
    fn default() -> Self {
        Self {
            name: String::new(),
            state: Constructed,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            settings: HashMap::new(),
            state_values: HashMap::new(),
            input_values: HashMap::new(),
            output_values: HashMap::new(),
            status: ActorStatus::default(),
            cloneable: true,
            stateful: false,
            uses_step_directory: false,
            run_count: 0,
            node: None,
            context: None,
        }
    }
}

impl ActorCore {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActorState {
        self.state
    }

    pub fn input_signature(&self) -> &BTreeMap<String, InputSignature> {
        &self.inputs
    }

    pub fn output_signature(&self) -> &BTreeMap<String, OutputSignature> {
        &self.outputs
    }

    pub fn node(&self) -> Option<&NodeBinding> {
        self.node.as_ref()
    }

    pub fn context(&self) -> Option<&Arc<WorkflowContext>> {
        self.context.as_ref()
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Declares an input. Only legal before elaboration.
    pub fn declare_input(&mut self, label: impl Into<String>, signature: InputSignature) -> Result<()> {
        self.state
            .require(&self.name, "declare_input", &[Constructed, PropertiesSet])?;
        self.inputs.insert(label.into(), signature);
        Ok(())
    }

    /// Declares an output. Only legal before elaboration.
    pub fn declare_output(
        &mut self,
        label: impl Into<String>,
        signature: OutputSignature,
    ) -> Result<()> {
        self.state
            .require(&self.name, "declare_output", &[Constructed, PropertiesSet])?;
        self.outputs.insert(label.into(), signature);
        Ok(())
    }

    fn reset_input_enables(&mut self) {
        for (label, signature) in &self.inputs {
            self.status.set_input_enabled(label, signature.default_enabled);
        }
    }

    fn step_context(&mut self) -> StepContext<'_> {
        StepContext {
            actor: &self.name,
            inputs: &self.input_values,
            settings: &self.settings,
            state: &mut self.state_values,
            outputs: &mut self.output_values,
            output_signature: &self.outputs,
            status: &mut self.status,
            run_count: self.run_count,
            node: self.node.as_ref(),
            context: self.context.as_ref(),
        }
    }
}

/// A unit of computation stepped by a workflow node.
///
/// Configure an actor with the `with_*` methods, then drive it through
/// `after_properties_set`, `elaborate`, `configure`, `initialize`, repeated
/// `step`s, `wrapup` and `dispose`. Every lifecycle method checks the current
/// [`ActorState`] and fails with [`WorkflowError::IllegalActorState`] when called
/// out of order.
pub struct Actor {
    pub(crate) core: ActorCore,
    pub(crate) behaviour: ActorBehaviour,
}

impl Actor {
    /// Creates an actor with synchronous logic.
    pub fn new<L: ActorLogic>(logic: L) -> Self {
        Self {
            core: ActorCore::default(),
            behaviour: ActorBehaviour::Sync(Box::new(logic)),
        }
    }

    /// Creates an actor with asynchronous logic.
    pub fn new_async<L: AsyncActorLogic>(logic: L) -> Self {
        Self {
            core: ActorCore::default(),
            behaviour: ActorBehaviour::Async(Box::new(logic)),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.core.name = name.into();
        self
    }

    /// Declares an input. Redeclaring a label replaces the earlier signature.
    pub fn with_input(mut self, label: impl Into<String>, signature: InputSignature) -> Self {
        let label = label.into();
        if self.core.inputs.contains_key(&label) {
            log::warn!("Input '{}' was already declared, overwriting.", label);
        }
        self.core.inputs.insert(label, signature);
        self
    }

    pub fn with_output(mut self, label: impl Into<String>, signature: OutputSignature) -> Self {
        let label = label.into();
        if self.core.outputs.contains_key(&label) {
            log::warn!("Output '{}' was already declared, overwriting.", label);
        }
        self.core.outputs.insert(label, signature);
        self
    }

    /// Adds an immutable setting visible to every step.
    pub fn with_setting(mut self, name: impl Into<String>, value: NodeValue) -> Self {
        self.core.settings.insert(name.into(), value);
        self
    }

    /// Seeds a persisted state value.
    pub fn with_state(mut self, name: impl Into<String>, value: NodeValue) -> Self {
        self.core.state_values.insert(name.into(), value);
        self
    }

    pub fn with_context(mut self, context: Arc<WorkflowContext>) -> Self {
        self.core.context = Some(context);
        self
    }

    /// Marks the actor as carrying state between steps.
    pub fn stateful(mut self, stateful: bool) -> Self {
        self.core.stateful = stateful;
        self
    }

    pub fn cloneable(mut self, cloneable: bool) -> Self {
        self.core.cloneable = cloneable;
        self
    }

    /// Gives every step a scratch directory reference in its status.
    pub fn uses_step_directory(mut self, uses: bool) -> Self {
        self.core.uses_step_directory = uses;
        self
    }

    pub fn set_cloneable(&mut self, cloneable: bool) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "set_cloneable", &[Constructed])?;
        self.core.cloneable = cloneable;
        Ok(())
    }

    pub fn set_uses_step_directory(&mut self, uses: bool) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "set_uses_step_directory", &[Constructed])?;
        self.core.uses_step_directory = uses;
        Ok(())
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "set_name", &[Constructed, PropertiesSet])?;
        self.core.name = name.into();
        Ok(())
    }

    pub(crate) fn set_context_if_absent(&mut self, context: &Arc<WorkflowContext>) {
        if self.core.context.is_none() {
            self.core.context = Some(Arc::clone(context));
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> ActorState {
        self.core.state
    }

    pub fn core(&self) -> &ActorCore {
        &self.core
    }

    pub fn is_async(&self) -> bool {
        matches!(self.behaviour, ActorBehaviour::Async(_))
    }

    pub fn is_stateful(&self) -> bool {
        self.core.stateful
    }

    pub fn is_cloneable(&self) -> bool {
        self.core.cloneable
    }

    pub fn has_input(&self, label: &str) -> bool {
        self.core.inputs.contains_key(label)
    }

    pub fn has_output(&self, label: &str) -> bool {
        self.core.outputs.contains_key(label)
    }

    pub fn has_optional_input(&self, label: &str) -> bool {
        self.core.inputs.get(label).is_some_and(|s| s.optional)
    }

    pub fn input_names(&self) -> impl Iterator<Item = &String> {
        self.core.inputs.keys()
    }

    pub fn output_names(&self) -> impl Iterator<Item = &String> {
        self.core.outputs.keys()
    }

    pub fn status(&self) -> &ActorStatus {
        &self.core.status
    }

    pub fn run_count(&self) -> u64 {
        self.core.run_count
    }

    pub fn set_step_count(&mut self, count: u64) {
        self.core.status.set_step_count(count);
    }

    pub(crate) fn bind_to_node(&mut self, binding: NodeBinding) {
        self.core.node = Some(binding);
    }

    pub(crate) fn set_node_uri_prefix(&mut self, prefix: &str) {
        if let Some(node) = self.core.node.as_mut() {
            node.uri_prefix = prefix.to_string();
        }
    }

    /// Downcasts the actor's logic to a concrete type.
    pub fn logic_as<T: 'static>(&self) -> Option<&T> {
        match &self.behaviour {
            ActorBehaviour::Sync(logic) => logic.as_ref().as_any().downcast_ref::<T>(),
            ActorBehaviour::Async(logic) => logic.as_ref().as_any().downcast_ref::<T>(),
        }
    }

    pub fn logic_as_mut<T: 'static>(&mut self) -> Option<&mut T> {
        match &mut self.behaviour {
            ActorBehaviour::Sync(logic) => logic.as_mut().as_any_mut().downcast_mut::<T>(),
            ActorBehaviour::Async(logic) => logic.as_mut().as_any_mut().downcast_mut::<T>(),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validates the configured properties. Requires a workflow context.
    pub fn after_properties_set(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "after_properties_set", &[Constructed])?;
        if self.core.context.is_none() {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "Must provide a workflow context to actor '{}'",
                self.core.name
            )));
        }
        if let Some(label) = self
            .core
            .inputs
            .keys()
            .find(|label| self.core.settings.contains_key(*label))
        {
            return Err(WorkflowError::ActorDeclaration(format!(
                "Actor {} declares '{}' as both an input and a setting",
                self.core.name, label
            )));
        }
        self.core.state = PropertiesSet;
        Ok(())
    }

    /// Adds an input the node needs but the actor did not declare.
    pub fn add_implicit_input(&mut self, label: &str) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "add_implicit_input", &[PropertiesSet])?;
        if self.core.inputs.contains_key(label) {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "Actor {} already has an input named '{}'",
                self.core.name, label
            )));
        }
        self.core
            .inputs
            .insert(label.to_string(), InputSignature::implicit());
        Ok(())
    }

    pub fn add_implicit_output(&mut self, label: &str) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "add_implicit_output", &[PropertiesSet])?;
        if self.core.outputs.contains_key(label) {
            return Err(WorkflowError::IllegalWorkflowSpec(format!(
                "Actor {} already has an output named '{}'",
                self.core.name, label
            )));
        }
        self.core
            .outputs
            .insert(label.to_string(), OutputSignature::implicit());
        Ok(())
    }

    pub fn elaborate(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "elaborate", &[PropertiesSet])?;
        let Actor { core, behaviour } = self;
        match behaviour {
            ActorBehaviour::Sync(logic) => logic.elaborate(core)?,
            ActorBehaviour::Async(logic) => logic.elaborate(core)?,
        }
        self.core.state = Elaborated;
        Ok(())
    }

    pub fn configure(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "configure", &[Elaborated])?;
        self.core.run_count = 0;
        let Actor { core, behaviour } = self;
        match behaviour {
            ActorBehaviour::Sync(logic) => logic.configure(core)?,
            ActorBehaviour::Async(logic) => logic.configure(core)?,
        }
        self.core.state = Configured;
        Ok(())
    }

    /// Applies input defaults to inputs nothing was staged on, then resets the
    /// input enables.
    pub fn initialize(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "initialize", &[Configured, WrappedUp])?;

        let defaults: Vec<(String, NodeValue)> = self
            .core
            .inputs
            .iter()
            .filter(|(label, _)| self.core.status.input_enabled(label))
            .filter_map(|(label, sig)| sig.default_value.clone().map(|v| (label.clone(), v)))
            .collect();
        self.core.input_values.extend(defaults);
        self.core.reset_input_enables();

        let Actor { core, behaviour } = self;
        match behaviour {
            ActorBehaviour::Sync(logic) => logic.initialize(core)?,
            ActorBehaviour::Async(logic) => logic.initialize(core)?,
        }
        self.core.state = Initialized;
        Ok(())
    }

    /// Stages a value on an input and disables the input until the next step.
    pub fn set_input_value(&mut self, label: &str, value: NodeValue) -> Result<()> {
        self.core.state.require(
            &self.core.name,
            "set_input_value",
            &[Configured, Initialized, Stepped, WrappedUp],
        )?;
        if self.core.settings.contains_key(label) {
            return Err(WorkflowError::ActorDeclaration(format!(
                "Cannot reassign value of setting '{}' on actor {}",
                label, self.core.name
            )));
        }
        if let Some(signature) = self.core.inputs.get(label) {
            if value.is_null() && !signature.nullable {
                return Err(WorkflowError::NullInput {
                    actor: self.core.name.clone(),
                    label: label.to_string(),
                });
            }
            self.core.status.disable_input(label);
        }
        self.core.input_values.insert(label.to_string(), value);
        Ok(())
    }

    /// Removes whatever value is staged on an input.
    pub fn clear_input_value(&mut self, label: &str) {
        self.core.input_values.remove(label);
    }

    pub fn input_value(&self, label: &str) -> Option<&NodeValue> {
        self.core.input_values.get(label)
    }

    /// Stages several inputs at once, as done for top-level runs.
    pub fn load_input_values(&mut self, values: Variables) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "load_input_values", &[Initialized])?;
        for (label, value) in values {
            self.set_input_value(&label, value)?;
        }
        Ok(())
    }

    pub fn load_state_values(&mut self, values: Variables) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "load_state_values", &[Initialized])?;
        self.core.state_values.extend(values);
        Ok(())
    }

    pub fn ready_for_input(&self, label: &str) -> Result<bool> {
        self.core
            .state
            .require(&self.core.name, "ready_for_input", &[Initialized, Stepped])?;
        Ok(self.core.status.input_enabled(label))
    }

    pub fn output_enabled(&self, label: &str) -> bool {
        self.core.status.output_enabled(label)
    }

    pub fn reset_input_enables(&mut self) -> Result<()> {
        self.core
            .state
            .disallow(&self.core.name, "reset_input_enables", &[Constructed, Disposed])?;
        self.core.reset_input_enables();
        Ok(())
    }

    fn begin_step(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "step", &[Initialized, Stepped])?;
        let core = &mut self.core;
        core.run_count += 1;
        core.reset_input_enables();
        for (label, signature) in &core.outputs {
            core.status.set_output_enabled(label, signature.default_enabled);
        }
        core.output_values.clear();
        core.status.set_call_type("step");
        if core.uses_step_directory {
            let directory = std::env::temp_dir()
                .join("cinnabar")
                .join(format!("{}_{}", core.name, core.run_count));
            core.status.set_step_directory(Some(directory));
        }
        Ok(())
    }

    fn finish_step(&mut self, result: std::result::Result<(), BoxError>) -> Result<()> {
        self.core.state = Stepped;
        result.map_err(|source| actor_error(&self.core.name, source))
    }

    /// Runs one step of the actor's behaviour.
    pub async fn step(&mut self) -> Result<()> {
        self.begin_step()?;
        let Actor { core, behaviour } = self;
        let result = {
            let mut ctx = core.step_context();
            match behaviour {
                ActorBehaviour::Sync(logic) => logic.step(&mut ctx),
                ActorBehaviour::Async(logic) => logic.step(&mut ctx).await,
            }
        };
        self.finish_step(result)
    }

    /// Steps a synchronous actor without an async context, for use on blocking
    /// worker threads.
    pub(crate) fn step_blocking(&mut self) -> Result<()> {
        self.begin_step()?;
        let Actor { core, behaviour } = self;
        let result = match behaviour {
            ActorBehaviour::Sync(logic) => logic.step(&mut core.step_context()),
            ActorBehaviour::Async(_) => {
                Err("asynchronous actors cannot be stepped on a blocking thread".into())
            }
        };
        self.finish_step(result)
    }

    pub fn wrapup(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "wrapup", &[Initialized, Stepped])?;
        let Actor { core, behaviour } = self;
        match behaviour {
            ActorBehaviour::Sync(logic) => logic.wrapup(core)?,
            ActorBehaviour::Async(logic) => logic.wrapup(core)?,
        }
        self.core.state = WrappedUp;
        Ok(())
    }

    pub fn dispose(&mut self) -> Result<()> {
        self.core
            .state
            .require(&self.core.name, "dispose", &[WrappedUp])?;
        let Actor { core, behaviour } = self;
        match behaviour {
            ActorBehaviour::Sync(logic) => logic.dispose(core)?,
            ActorBehaviour::Async(logic) => logic.dispose(core)?,
        }
        self.core.state = Disposed;
        Ok(())
    }

    /// The value produced on an output by the most recent step.
    pub fn output_value(&self, label: &str) -> Option<&NodeValue> {
        self.core.output_values.get(label)
    }

    pub fn state_value(&self, name: &str) -> Result<Option<&NodeValue>> {
        self.core
            .state
            .disallow(&self.core.name, "state_value", &[PropertiesSet, Disposed])?;
        Ok(self.core.state_values.get(name))
    }

    /// Output values of the last step, one entry per declared output.
    pub fn final_outputs(&self) -> Result<Variables> {
        self.core
            .state
            .require(&self.core.name, "final_outputs", &[Disposed])?;
        Ok(self
            .core
            .outputs
            .keys()
            .map(|label| {
                let value = self
                    .core
                    .output_values
                    .get(label)
                    .cloned()
                    .unwrap_or(NodeValue::Null);
                (label.clone(), value)
            })
            .collect())
    }

    pub fn final_state(&self) -> Result<Variables> {
        self.core
            .state
            .require(&self.core.name, "final_state", &[Disposed])?;
        Ok(self.core.state_values.clone())
    }

    /// Deep-copies an initialized actor, including its status and staged values.
    pub fn try_clone(&self) -> Result<Actor> {
        self.core
            .state
            .require(&self.core.name, "clone", &[Initialized])?;
        if !self.core.cloneable {
            return Err(WorkflowError::ActorDeclaration(format!(
                "Actor {} is not cloneable",
                self.core.name
            )));
        }
        Ok(Actor {
            core: self.core.clone(),
            behaviour: self.behaviour.clone_box(),
        })
    }

    /// A fresh, unconfigured copy carrying only what was declared.
    pub(crate) fn clone_declaration(&self) -> Actor {
        let core = &self.core;
        Actor {
            core: ActorCore {
                name: core.name.clone(),
                inputs: core
                    .inputs
                    .iter()
                    .filter(|(_, s)| !s.implicit)
                    .map(|(l, s)| (l.clone(), s.clone()))
                    .collect(),
                outputs: core
                    .outputs
                    .iter()
                    .filter(|(_, s)| !s.implicit)
                    .map(|(l, s)| (l.clone(), s.clone()))
                    .collect(),
                settings: core.settings.clone(),
                state_values: core.state_values.clone(),
                cloneable: core.cloneable,
                stateful: core.stateful,
                uses_step_directory: core.uses_step_directory,
                context: core.context.clone(),
                ..ActorCore::default()
            },
            behaviour: self.behaviour.clone_box(),
        }
    }

    /// Runs a standalone actor through its whole lifecycle for one step and
    /// returns its outputs.
    pub async fn run(&mut self, inputs: Variables) -> Result<Variables> {
        if self.core.context.is_none() {
            self.core.context = Some(WorkflowContext::shared_default());
        }
        if self.core.state == Constructed {
            self.after_properties_set()?;
            self.elaborate()?;
            self.configure()?;
        }
        self.initialize()?;
        self.load_input_values(inputs)?;
        self.step().await?;
        self.wrapup()?;
        self.dispose()?;
        self.final_outputs()
    }
}

/// Wraps a step failure, keeping the identity of the innermost failing actor.
fn actor_error(actor: &str, source: BoxError) -> WorkflowError {
    match source.downcast::<WorkflowError>() {
        Ok(inner) if inner.is_actor_exception() => *inner,
        Ok(inner) => WorkflowError::Actor {
            actor: actor.to_string(),
            source: inner,
        },
        Err(source) => WorkflowError::Actor {
            actor: actor.to_string(),
            source,
        },
    }
}
