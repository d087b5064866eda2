use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-step bookkeeping an actor body can read and adjust.
///
/// An input or output without an explicit enable flag counts as enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorStatus {
    step_count: u64,
    call_type: Option<String>,
    input_enables: HashMap<String, bool>,
    output_enables: HashMap<String, bool>,
    step_directory: Option<PathBuf>,
}

impl ActorStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn set_step_count(&mut self, count: u64) {
        self.step_count = count;
    }

    /// Zero-based index of the current step.
    pub fn step_count_index(&self) -> u64 {
        self.step_count.saturating_sub(1)
    }

    /// The lifecycle phase currently invoking the actor, e.g. `"step"`.
    pub fn call_type(&self) -> Option<&str> {
        self.call_type.as_deref()
    }

    pub fn set_call_type(&mut self, call_type: impl Into<String>) {
        self.call_type = Some(call_type.into());
    }

    pub fn step_directory(&self) -> Option<&Path> {
        self.step_directory.as_deref()
    }

    pub fn set_step_directory(&mut self, directory: Option<PathBuf>) {
        self.step_directory = directory;
    }

    pub fn input_enabled(&self, label: &str) -> bool {
        self.input_enables.get(label).copied().unwrap_or(true)
    }

    pub fn set_input_enabled(&mut self, label: &str, enabled: bool) {
        self.input_enables.insert(label.to_string(), enabled);
    }

    pub fn enable_input(&mut self, label: &str) {
        self.set_input_enabled(label, true);
    }

    pub fn disable_input(&mut self, label: &str) {
        self.set_input_enabled(label, false);
    }

    pub fn enable_inputs(&mut self) {
        self.input_enables.values_mut().for_each(|e| *e = true);
    }

    pub fn disable_inputs(&mut self) {
        self.input_enables.values_mut().for_each(|e| *e = false);
    }

    pub fn output_enabled(&self, label: &str) -> bool {
        self.output_enables.get(label).copied().unwrap_or(true)
    }

    pub fn set_output_enabled(&mut self, label: &str, enabled: bool) {
        self.output_enables.insert(label.to_string(), enabled);
    }

    pub fn enable_output(&mut self, label: &str) {
        self.set_output_enabled(label, true);
    }

    pub fn disable_output(&mut self, label: &str) {
        self.set_output_enabled(label, false);
    }

    pub fn enable_outputs(&mut self) {
        self.output_enables.values_mut().for_each(|e| *e = true);
    }
}
