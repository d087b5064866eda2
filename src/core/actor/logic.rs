use crate::core::actor::signature::OutputSignature;
use crate::core::actor::status::ActorStatus;
use crate::core::actor::{ActorCore, NodeBinding};
use crate::core::context::WorkflowContext;
use crate::core::error::{BoxError, Result, WorkflowError};
use crate::core::{AsAny, NodeValue};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// The view of an actor that its body sees during a step.
///
/// Inputs and settings are read-only; outputs, persisted state and the status
/// may be changed.
pub struct StepContext<'a> {
    pub(crate) actor: &'a str,
    pub(crate) inputs: &'a HashMap<String, NodeValue>,
    pub(crate) settings: &'a HashMap<String, NodeValue>,
    pub(crate) state: &'a mut HashMap<String, NodeValue>,
    pub(crate) outputs: &'a mut HashMap<String, NodeValue>,
    pub(crate) output_signature: &'a BTreeMap<String, OutputSignature>,
    pub(crate) status: &'a mut ActorStatus,
    pub(crate) run_count: u64,
    pub(crate) node: Option<&'a NodeBinding>,
    pub(crate) context: Option<&'a Arc<WorkflowContext>>,
}

impl<'a> StepContext<'a> {
    pub fn actor_name(&self) -> &str {
        self.actor
    }

    /// The value staged on an input, if any.
    pub fn input(&self, label: &str) -> Option<&NodeValue> {
        self.inputs.get(label)
    }

    /// All staged input values.
    pub fn inputs(&self) -> &HashMap<String, NodeValue> {
        self.inputs
    }

    /// Deserializes a staged input into `T`.
    pub fn input_as<T: DeserializeOwned>(&self, label: &str) -> Result<T> {
        let value = self.inputs.get(label).ok_or_else(|| {
            WorkflowError::ActorDeclaration(format!(
                "No value staged on input '{}' of actor {}",
                label, self.actor
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            WorkflowError::ActorDeclaration(format!(
                "Input '{}' of actor {} has unexpected type: {}",
                label, self.actor, e
            ))
        })
    }

    pub fn setting(&self, name: &str) -> Option<&NodeValue> {
        self.settings.get(name)
    }

    pub fn state(&self, name: &str) -> Option<&NodeValue> {
        self.state.get(name)
    }

    pub fn set_state(&mut self, name: impl Into<String>, value: NodeValue) {
        self.state.insert(name.into(), value);
    }

    /// Sets an output value, enforcing the output's nullability.
    pub fn set_output(&mut self, label: &str, value: NodeValue) -> Result<()> {
        let signature = self.output_signature.get(label).ok_or_else(|| {
            WorkflowError::ActorDeclaration(format!(
                "Actor {} has no output named '{}'",
                self.actor, label
            ))
        })?;
        if value.is_null() && !signature.nullable {
            return Err(WorkflowError::NullOutput {
                actor: self.actor.to_string(),
                label: label.to_string(),
            });
        }
        self.outputs.insert(label.to_string(), value);
        Ok(())
    }

    /// Suppresses an output for the current step.
    pub fn disable_output(&mut self, label: &str) {
        self.status.disable_output(label);
    }

    pub fn enable_output(&mut self, label: &str) {
        self.status.enable_output(label);
    }

    /// Keeps an input from accepting a new value before the next step, so its
    /// current value is reused.
    pub fn disable_input(&mut self, label: &str) {
        self.status.disable_input(label);
    }

    pub fn enable_input(&mut self, label: &str) {
        self.status.enable_input(label);
    }

    pub fn step_count(&self) -> u64 {
        self.status.step_count()
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn status(&self) -> &ActorStatus {
        &*self.status
    }

    /// The node this actor is stepped by, when it runs inside a workflow.
    pub fn node(&self) -> Option<&NodeBinding> {
        self.node
    }

    pub fn context(&self) -> Option<&Arc<WorkflowContext>> {
        self.context
    }
}

/// Defines the behaviour of a synchronous actor.
///
/// Lifecycle hooks default to no-ops; only [`step`](ActorLogic::step) and
/// [`clone_box`](ActorLogic::clone_box) must be provided.
pub trait ActorLogic: AsAny + Send + Sync + 'static {
    /// Computes outputs from the staged inputs.
    fn step(&mut self, ctx: &mut StepContext<'_>) -> std::result::Result<(), BoxError>;

    fn elaborate(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn wrapup(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    /// Creates a boxed clone of this logic.
    fn clone_box(&self) -> Box<dyn ActorLogic>;
}

/// Defines the behaviour of an asynchronous actor.
///
/// Same contract as [`ActorLogic`] with an async step. Nested workflows are
/// asynchronous actors.
#[async_trait]
pub trait AsyncActorLogic: AsAny + Send + Sync + 'static {
    async fn step(&mut self, ctx: &mut StepContext<'_>) -> std::result::Result<(), BoxError>;

    fn elaborate(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn wrapup(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn dispose(&mut self, _core: &mut ActorCore) -> Result<()> {
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn AsyncActorLogic>;
}

type StepFn = dyn Fn(&mut StepContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync;

/// A stateless actor body backed by a closure.
///
/// Clones share the closure.
#[derive(Clone)]
pub struct FnActor {
    f: Arc<StepFn>,
}

impl FnActor {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut StepContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl ActorLogic for FnActor {
    fn step(&mut self, ctx: &mut StepContext<'_>) -> std::result::Result<(), BoxError> {
        (self.f)(ctx)
    }

    fn clone_box(&self) -> Box<dyn ActorLogic> {
        Box::new(self.clone())
    }
}
