pub mod actor;
pub mod completion;
pub mod config;
pub mod context;
pub mod data;
pub mod director;
pub mod error;
pub mod node;
pub mod telemetry;
pub mod validation;
pub mod workflow;
pub mod wrapup;

use std::any::Any;
use std::collections::HashMap;

/// The value carried by packets and staged on actor inputs and outputs.
pub type NodeValue = serde_json::Value;

/// Named values bound while a node steps: staged inputs, template variables and
/// the reserved `STEP`, `RUN` and `STEP_ID` entries.
pub type Variables = HashMap<String, NodeValue>;

/// Lets trait objects be downcast to their concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: 'static> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
