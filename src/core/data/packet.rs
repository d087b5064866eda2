use crate::core::NodeValue;
use std::sync::Arc;

/// A published value together with the URI it was published at.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    uri: String,
    key: String,
    data: NodeValue,
}

impl Resource {
    pub fn new(uri: impl Into<String>, key: impl Into<String>, data: NodeValue) -> Self {
        Self {
            uri: uri.into(),
            key: key.into(),
            data,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The reduced path of the template the resource was published through.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn data(&self) -> &NodeValue {
        &self.data
    }
}

/// The payload of a data packet: resources plus the metadata bound while
/// expanding the publishing outflow's template.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPacket {
    resources: Vec<Resource>,
    scheme: String,
    metadata_keys: Vec<String>,
    metadata_values: Vec<NodeValue>,
}

impl DataPacket {
    pub fn new(
        resources: Vec<Resource>,
        scheme: impl Into<String>,
        metadata_keys: Vec<String>,
        metadata_values: Vec<NodeValue>,
    ) -> Self {
        Self {
            resources,
            scheme: scheme.into(),
            metadata_keys,
            metadata_values,
        }
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    /// Finds the resource published under `key`, falling back to the only
    /// resource of a single-resource packet.
    pub fn resource(&self, key: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.key == key)
            .or(match self.resources.as_slice() {
                [only] => Some(only),
                _ => None,
            })
    }

    /// Scheme of the protocol that created this packet.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn metadata_keys(&self) -> &[String] {
        &self.metadata_keys
    }

    pub fn metadata_values(&self) -> &[NodeValue] {
        &self.metadata_values
    }
}

/// The unit of transfer between nodes.
///
/// Packets are immutable once created and cheap to clone; a published data
/// packet is shared by every subscriber that receives it.
#[derive(Debug, Clone)]
pub enum Packet {
    Data(Arc<DataPacket>),
    /// The end-of-stream marker. Carries no data.
    EndOfStream,
}

impl Packet {
    pub fn data(packet: DataPacket) -> Self {
        Packet::Data(Arc::new(packet))
    }

    /// Wraps a bare value in a single-resource packet with no URI, as used for
    /// constants and sequence values.
    pub fn from_value(value: NodeValue) -> Self {
        Packet::data(DataPacket::new(
            vec![Resource::new("", "", value)],
            "",
            Vec::new(),
            Vec::new(),
        ))
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Packet::EndOfStream)
    }

    pub fn as_data(&self) -> Option<&DataPacket> {
        match self {
            Packet::Data(data) => Some(data),
            Packet::EndOfStream => None,
        }
    }

    /// URIs of all resources carried by the packet.
    pub fn uris(&self) -> Vec<&str> {
        match self {
            Packet::Data(data) => data.resources.iter().map(|r| r.uri()).collect(),
            Packet::EndOfStream => Vec::new(),
        }
    }

    /// Convenience accessor for the data of the resource published under `key`.
    pub fn value(&self, key: &str) -> Option<&NodeValue> {
        self.as_data()?.resource(key).map(|r| r.data())
    }
}

/// Packets compare by identity: two data packets are equal only if they are the
/// same published packet. All end-of-stream markers are equal.
impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Packet::Data(a), Packet::Data(b)) => Arc::ptr_eq(a, b),
            (Packet::EndOfStream, Packet::EndOfStream) => true,
            _ => false,
        }
    }
}
