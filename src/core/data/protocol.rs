use crate::core::NodeValue;
use crate::core::data::packet::{DataPacket, Packet, Resource};
use crate::core::data::uri_template::UriTemplate;
use crate::core::error::{Result, WorkflowError};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// How packets are created for, and payloads loaded from, URIs of one scheme.
pub trait Protocol: Debug + Send + Sync {
    fn scheme(&self) -> &str;

    /// True when inflows of this scheme may be satisfied by resources outside the
    /// workflow, via a synthesized source node.
    fn is_externally_resolvable(&self) -> bool {
        false
    }

    /// Whether outflows may disambiguate successive packets with a `/N` path suffix.
    fn supports_suffixes(&self) -> bool {
        false
    }

    /// Control packets trigger steps but never reach actor inputs.
    fn is_control(&self) -> bool {
        false
    }

    /// Creates the packet for a value published at an expanded URI.
    ///
    /// Returning `Ok(None)` means nothing is sent.
    fn create_packet(
        &self,
        data: NodeValue,
        uri: String,
        template: &UriTemplate,
        variable_values: Vec<NodeValue>,
    ) -> Result<Option<Packet>>;

    /// Extracts the value handed to an actor input from a received resource.
    fn load_resource_payload(
        &self,
        resource: &Resource,
        _actor: &str,
        _label: &str,
    ) -> Result<NodeValue> {
        Ok(resource.data().clone())
    }

    fn new_reader(&self) -> Result<Box<dyn ProtocolReader>> {
        Err(WorkflowError::Protocol(format!(
            "Protocol '{}' does not support resolution of external resources",
            self.scheme()
        )))
    }

    fn validate_inflow_template(&self, _template: &UriTemplate, _node: &str) -> Result<()> {
        Ok(())
    }
}

/// Reads external resources on behalf of a source node.
pub trait ProtocolReader: Send + Sync {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// True when the reader produces at most one resource per run.
    fn steps_once(&self) -> bool;

    /// Reads the resource at `path`. `Ok(None)` means the source is exhausted.
    fn external_resource(&mut self, path: &str) -> Result<Option<NodeValue>>;
}

fn single_resource_packet(
    scheme: &str,
    data: NodeValue,
    uri: String,
    template: &UriTemplate,
    variable_values: Vec<NodeValue>,
) -> Packet {
    let resource = Resource::new(uri, template.reduced_path(), data);
    Packet::data(DataPacket::new(
        vec![resource],
        scheme,
        template.variable_names().to_vec(),
        variable_values,
    ))
}

/// In-memory data passed by value. The default protocol.
#[derive(Debug, Default)]
pub struct DataProtocol;

impl Protocol for DataProtocol {
    fn scheme(&self) -> &str {
        "data"
    }

    fn supports_suffixes(&self) -> bool {
        true
    }

    fn create_packet(
        &self,
        data: NodeValue,
        uri: String,
        template: &UriTemplate,
        variable_values: Vec<NodeValue>,
    ) -> Result<Option<Packet>> {
        Ok(Some(single_resource_packet(
            self.scheme(),
            data,
            uri,
            template,
            variable_values,
        )))
    }
}

/// Packets that trigger steps without carrying a payload for the actor.
#[derive(Debug, Default)]
pub struct ControlProtocol;

impl Protocol for ControlProtocol {
    fn scheme(&self) -> &str {
        "control"
    }

    fn supports_suffixes(&self) -> bool {
        true
    }

    fn is_control(&self) -> bool {
        true
    }

    fn create_packet(
        &self,
        data: NodeValue,
        uri: String,
        template: &UriTemplate,
        variable_values: Vec<NodeValue>,
    ) -> Result<Option<Packet>> {
        Ok(Some(single_resource_packet(
            self.scheme(),
            data,
            uri,
            template,
            variable_values,
        )))
    }

    fn load_resource_payload(
        &self,
        resource: &Resource,
        actor: &str,
        label: &str,
    ) -> Result<NodeValue> {
        Err(WorkflowError::Protocol(format!(
            "Control packet {} cannot be loaded into input '{}' of actor {}",
            resource.uri(),
            label,
            actor
        )))
    }
}

/// Writes every published value to the log before passing it on like data.
#[derive(Debug, Default)]
pub struct LogProtocol;

impl Protocol for LogProtocol {
    fn scheme(&self) -> &str {
        "log"
    }

    fn supports_suffixes(&self) -> bool {
        true
    }

    fn create_packet(
        &self,
        data: NodeValue,
        uri: String,
        template: &UriTemplate,
        variable_values: Vec<NodeValue>,
    ) -> Result<Option<Packet>> {
        log::info!(target: "cinnabar::log_protocol", "{}: {}", uri, data);
        Ok(Some(single_resource_packet(
            self.scheme(),
            data,
            uri,
            template,
            variable_values,
        )))
    }
}

/// Read-only access to workflow context properties at `context:/property/<key>`,
/// or to all of them at `context:/`.
#[derive(Debug, Default)]
pub struct ContextProtocol {
    properties: Arc<HashMap<String, NodeValue>>,
}

impl ContextProtocol {
    pub fn new(properties: Arc<HashMap<String, NodeValue>>) -> Self {
        Self { properties }
    }
}

fn resolve_context_path(
    properties: &HashMap<String, NodeValue>,
    path: &str,
) -> Result<NodeValue> {
    if path == "/" {
        let all: serde_json::Map<String, NodeValue> = properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        return Ok(NodeValue::Object(all));
    }
    if let Some(key) = path.strip_prefix("/property/") {
        return properties.get(key).cloned().ok_or_else(|| {
            WorkflowError::Protocol(format!(
                "Undefined context property '{}' in inflow path '{}'",
                key, path
            ))
        });
    }
    Err(WorkflowError::Protocol(format!(
        "Unknown 'context' protocol path: {}",
        path
    )))
}

impl Protocol for ContextProtocol {
    fn scheme(&self) -> &str {
        "context"
    }

    fn is_externally_resolvable(&self) -> bool {
        true
    }

    fn create_packet(
        &self,
        _data: NodeValue,
        _uri: String,
        _template: &UriTemplate,
        _variable_values: Vec<NodeValue>,
    ) -> Result<Option<Packet>> {
        Err(WorkflowError::Protocol(
            "Not allowed to publish to the workflow context".to_string(),
        ))
    }

    fn new_reader(&self) -> Result<Box<dyn ProtocolReader>> {
        Ok(Box::new(ContextProtocolReader {
            properties: Arc::clone(&self.properties),
            has_read: false,
        }))
    }

    fn validate_inflow_template(&self, template: &UriTemplate, _node: &str) -> Result<()> {
        resolve_context_path(&self.properties, template.reduced_path()).map(|_| ())
    }
}

struct ContextProtocolReader {
    properties: Arc<HashMap<String, NodeValue>>,
    has_read: bool,
}

impl ProtocolReader for ContextProtocolReader {
    fn initialize(&mut self) -> Result<()> {
        self.has_read = false;
        Ok(())
    }

    fn steps_once(&self) -> bool {
        true
    }

    fn external_resource(&mut self, path: &str) -> Result<Option<NodeValue>> {
        if self.has_read {
            return Ok(None);
        }
        self.has_read = true;
        resolve_context_path(&self.properties, path).map(Some)
    }
}

/// Maps URI schemes to protocols. The empty scheme resolves to `data`.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, Arc<dyn Protocol>>,
}

impl ProtocolRegistry {
    /// A registry with the `data`, `control`, `log` and `context` protocols.
    pub fn with_defaults(properties: Arc<HashMap<String, NodeValue>>) -> Self {
        let data: Arc<dyn Protocol> = Arc::new(DataProtocol);
        let mut protocols = HashMap::new();
        protocols.insert(String::new(), Arc::clone(&data));
        protocols.insert("data".to_string(), data);
        protocols.insert("control".to_string(), Arc::new(ControlProtocol) as Arc<dyn Protocol>);
        protocols.insert("log".to_string(), Arc::new(LogProtocol) as Arc<dyn Protocol>);
        protocols.insert(
            "context".to_string(),
            Arc::new(ContextProtocol::new(properties)) as Arc<dyn Protocol>,
        );
        Self { protocols }
    }

    pub fn register(&mut self, scheme: impl Into<String>, protocol: Arc<dyn Protocol>) {
        self.protocols.insert(scheme.into(), protocol);
    }

    pub fn protocol_for_scheme(&self, scheme: &str) -> Result<Arc<dyn Protocol>> {
        self.protocols.get(scheme).cloned().ok_or_else(|| {
            WorkflowError::Protocol(format!("No protocol registered for scheme '{}'", scheme))
        })
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_defaults(Arc::new(HashMap::new()))
    }
}
