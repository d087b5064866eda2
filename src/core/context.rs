use crate::core::NodeValue;
use crate::core::config::ExecutionConfig;
use crate::core::data::protocol::{Protocol, ProtocolRegistry};
use crate::core::error::Result;
use crate::core::telemetry::{NoopTraceRecorder, TraceRecorder};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Services shared by every node and actor of a workflow: the protocol registry,
/// the trace recorder, execution defaults and read-only properties.
pub struct WorkflowContext {
    registry: ProtocolRegistry,
    recorder: Arc<dyn TraceRecorder>,
    config: ExecutionConfig,
    properties: Arc<HashMap<String, NodeValue>>,
}

impl WorkflowContext {
    pub fn builder() -> WorkflowContextBuilder {
        WorkflowContextBuilder::default()
    }

    /// A context with default protocols, no recorder and default configuration.
    pub fn shared_default() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn protocol_for_scheme(&self, scheme: &str) -> Result<Arc<dyn Protocol>> {
        self.registry.protocol_for_scheme(scheme)
    }

    pub fn recorder(&self) -> &Arc<dyn TraceRecorder> {
        &self.recorder
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn property(&self, name: &str) -> Option<&NodeValue> {
        self.properties.get(name)
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct WorkflowContextBuilder {
    recorder: Option<Arc<dyn TraceRecorder>>,
    config: Option<ExecutionConfig>,
    properties: HashMap<String, NodeValue>,
    protocols: Vec<(String, Arc<dyn Protocol>)>,
}

impl WorkflowContextBuilder {
    pub fn recorder(mut self, recorder: Arc<dyn TraceRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(mut self, config: ExecutionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds a property readable through `context:/property/<name>`.
    pub fn property(mut self, name: impl Into<String>, value: NodeValue) -> Self {
        let name = name.into();
        if self.properties.contains_key(&name) {
            log::warn!("Context property '{}' is being overwritten.", name);
        }
        self.properties.insert(name, value);
        self
    }

    /// Registers an additional protocol, replacing any default for the same scheme.
    pub fn protocol(mut self, scheme: impl Into<String>, protocol: Arc<dyn Protocol>) -> Self {
        self.protocols.push((scheme.into(), protocol));
        self
    }

    pub fn build(self) -> Arc<WorkflowContext> {
        let properties = Arc::new(self.properties);
        let mut registry = ProtocolRegistry::with_defaults(Arc::clone(&properties));
        for (scheme, protocol) in self.protocols {
            registry.register(scheme, protocol);
        }
        Arc::new(WorkflowContext {
            registry,
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(NoopTraceRecorder::new())),
            config: self.config.unwrap_or_default(),
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::MemoryTraceRecorder;
    use serde_json::json;

    #[test]
    fn test_builder_wires_properties_into_context_protocol() {
        let context = WorkflowContext::builder()
            .property("greeting", json!("hello"))
            .build();
        assert_eq!(context.property("greeting"), Some(&json!("hello")));
        let protocol = context.protocol_for_scheme("context").unwrap();
        let mut reader = protocol.new_reader().unwrap();
        assert_eq!(
            reader.external_resource("/property/greeting").unwrap(),
            Some(json!("hello"))
        );
    }

    #[test]
    fn test_builder_uses_supplied_recorder_and_config() {
        let recorder = Arc::new(MemoryTraceRecorder::new());
        let context = WorkflowContext::builder()
            .recorder(recorder.clone())
            .config(ExecutionConfig::default().with_max_concurrency(3))
            .build();
        context.recorder().record_step_started("A");
        assert_eq!(recorder.steps_started("A"), 1);
        assert_eq!(context.config().max_concurrency, 3);
    }

    #[test]
    fn test_default_context() {
        let context = WorkflowContext::shared_default();
        assert!(context.protocol_for_scheme("").is_ok());
        assert!(context.property("missing").is_none());
    }
}
