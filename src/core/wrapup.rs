//! Reports of data left undelivered when a workflow run wraps up.

use crate::core::data::packet::Packet;
use std::fmt;

/// Where undelivered packets were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BufferKind {
    Inflow,
    Outflow,
    Queue,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferKind::Inflow => "inflow",
            BufferKind::Outflow => "outflow",
            BufferKind::Queue => "queue",
        };
        f.write_str(name)
    }
}

/// Data packets still sitting in one port or queue of a node.
#[derive(Debug, Clone)]
pub struct UnusedDataRecord {
    node: String,
    label: String,
    kind: BufferKind,
    packets: Vec<Packet>,
}

impl UnusedDataRecord {
    /// End-of-stream markers are not data and are dropped from the record.
    pub fn new(
        node: impl Into<String>,
        label: impl Into<String>,
        kind: BufferKind,
        packets: impl IntoIterator<Item = Packet>,
    ) -> Self {
        Self {
            node: node.into(),
            label: label.into(),
            kind,
            packets: packets
                .into_iter()
                .filter(|p| !p.is_end_of_stream())
                .collect(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    fn sort_key(&self) -> (&str, &str, BufferKind) {
        (&self.node, &self.label, self.kind)
    }
}

impl fmt::Display for UnusedDataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.packets.len();
        let uris: Vec<String> = self
            .packets
            .iter()
            .flat_map(|p| p.uris().into_iter().map(|uri| format!("'{}'", uri)))
            .collect();
        write!(
            f,
            "{} {} in {} '{}' on node {} with {} {}",
            count,
            if count == 1 { "packet" } else { "packets" },
            self.kind,
            self.label,
            self.node,
            if uris.len() == 1 { "URI" } else { "URIs" },
            uris.join(", ")
        )
    }
}

/// Everything left over after a run, kept sorted by node, label and kind.
#[derive(Debug, Clone, Default)]
pub struct WrapupResult {
    records: Vec<UnusedDataRecord>,
}

impl WrapupResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record unless it holds no data packets.
    pub fn add(&mut self, record: UnusedDataRecord) {
        if record.is_empty() {
            return;
        }
        let position = self
            .records
            .partition_point(|r| r.sort_key() <= record.sort_key());
        self.records.insert(position, record);
    }

    pub fn extend(&mut self, other: WrapupResult) {
        for record in other.records {
            self.add(record);
        }
    }

    pub fn records(&self) -> &[UnusedDataRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl fmt::Display for WrapupResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", record)?;
        }
        Ok(())
    }
}
