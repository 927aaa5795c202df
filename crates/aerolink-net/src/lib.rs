//! aerolink network library
//!
//! I/O layer of the aerolink LAN client:
//! - Broadcast discovery with listener fan-out
//! - Per-device sessions: bind handshake, state refresh, command pushes
//! - UDP endpoints with sealed-envelope send/receive
//!
//! Each [`Device`] and each [`Discovery`] is driven by one task; state
//! never crosses tasks, matching the protocol's strict request/response
//! ordering (there are no request ids on the wire).

pub mod device;
pub mod discovery;
pub mod dispatch;
pub mod interfaces;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use device::{Device, DeviceError, DeviceOptions};
pub use discovery::{Discovery, DiscoveryError, DiscoveryListener, DiscoveryOptions};
pub use dispatch::{DeviceEvent, Handler, HandlerId, ResponseKind};
pub use interfaces::{broadcast_interfaces, IpInterface};
pub use transport::{DatagramEndpoint, TransportError};
