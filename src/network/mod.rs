//! Network subsystem for UDP audio transport

pub mod udp;

pub use udp::{bind_inbound, bind_outbound, resolve_remote, InboundSocket, OutboundSocket};
