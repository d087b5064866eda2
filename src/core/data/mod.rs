//! Packets, URI templates, protocols and the ports packets travel through.

pub mod packet;
pub mod ports;
pub mod protocol;
pub mod sequences;
pub mod uri_template;

pub use packet::{DataPacket, Packet, Resource};
pub use ports::{Inflow, Outflow};
pub use protocol::{
    ContextProtocol, ControlProtocol, DataProtocol, LogProtocol, Protocol, ProtocolReader,
    ProtocolRegistry,
};
pub use sequences::Sequences;
pub use uri_template::UriTemplate;
