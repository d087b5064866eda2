use crate::core::NodeValue;
use crate::core::error::{Result, WorkflowError};
use std::collections::BTreeMap;

/// Named value lists a node feeds to its actor, one element per step.
#[derive(Debug, Clone, Default)]
pub struct Sequences {
    sequences: BTreeMap<String, Vec<NodeValue>>,
    repeat_values: bool,
    index: usize,
    max_length: usize,
}

impl Sequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<NodeValue>) {
        self.sequences.insert(name.into(), values);
    }

    /// When set, sequences wrap around instead of running out.
    pub fn set_repeat_values(&mut self, repeat: bool) {
        self.repeat_values = repeat;
    }

    pub fn repeat_values(&self) -> bool {
        self.repeat_values
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.sequences.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Computes the longest sequence length. Repeating sequences must all have
    /// the same length.
    pub fn configure(&mut self, node: &str) -> Result<()> {
        self.max_length = self.sequences.values().map(Vec::len).max().unwrap_or(0);
        if self.repeat_values && self.sequences.values().any(|s| s.len() != self.max_length) {
            return Err(WorkflowError::NodeDeclaration(format!(
                "Sequences on node {} must all be the same length when repeating values",
                node
            )));
        }
        Ok(())
    }

    pub fn initialize(&mut self) {
        self.index = 0;
    }

    /// Returns the value of every sequence at the current position and advances.
    /// `None` marks a sequence that has run out.
    pub fn next_bundle(&mut self) -> BTreeMap<String, Option<NodeValue>> {
        let bundle = self
            .sequences
            .iter()
            .map(|(name, values)| (name.clone(), values.get(self.index).cloned()))
            .collect();

        self.index += 1;
        if self.repeat_values && self.max_length > 0 {
            self.index %= self.max_length;
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_runs_out() {
        let mut sequences = Sequences::new();
        sequences.insert("value", vec![json!(3), json!(8)]);
        sequences.configure("A").unwrap();
        sequences.initialize();
        assert_eq!(sequences.next_bundle()["value"], Some(json!(3)));
        assert_eq!(sequences.next_bundle()["value"], Some(json!(8)));
        assert_eq!(sequences.next_bundle()["value"], None);
    }

    #[test]
    fn test_repeating_sequences_wrap_around() {
        let mut sequences = Sequences::new();
        sequences.insert("x", vec![json!(1), json!(2)]);
        sequences.insert("y", vec![json!("a"), json!("b")]);
        sequences.set_repeat_values(true);
        sequences.configure("A").unwrap();
        sequences.initialize();
        let values: Vec<_> = (0..5).map(|_| sequences.next_bundle()["x"].clone()).collect();
        assert_eq!(
            values,
            vec![Some(json!(1)), Some(json!(2)), Some(json!(1)), Some(json!(2)), Some(json!(1))]
        );
    }

    #[test]
    fn test_repeating_sequences_of_different_lengths_rejected() {
        let mut sequences = Sequences::new();
        sequences.insert("x", vec![json!(1), json!(2)]);
        sequences.insert("y", vec![json!(1)]);
        sequences.set_repeat_values(true);
        assert!(sequences.configure("A").is_err());
    }

    #[test]
    fn test_initialize_restarts_sequences() {
        let mut sequences = Sequences::new();
        sequences.insert("x", vec![json!(1)]);
        sequences.configure("A").unwrap();
        sequences.initialize();
        sequences.next_bundle();
        sequences.initialize();
        assert_eq!(sequences.next_bundle()["x"], Some(json!(1)));
        assert_eq!(sequences.max_length(), 1);
    }
}
