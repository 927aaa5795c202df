//! aerolink core library
//!
//! Protocol-pure layer of the aerolink LAN client: payload ciphers, the
//! outer envelope codec, device identity, wire property keys, temperature
//! conversion, and the property cache. No sockets live here; the `net`
//! crate drives this one.
//!
//! # Modules
//!
//! - [`cipher`]: V1 (AES-ECB) and V2 (AES-GCM) payload encryption
//! - [`envelope`]: outer frame codec and typed inner packet views
//! - [`device_info`]: device identity records
//! - [`props`]: wire property keys and value enums
//! - [`temperature`]: setpoint/sensor conversion table
//! - [`state`]: property cache with dirty tracking
//! - [`error`]: error types

pub mod cipher;
pub mod device_info;
pub mod envelope;
pub mod error;
pub mod props;
pub mod state;
pub mod temperature;

pub use cipher::{Cipher, CipherKind};
pub use device_info::{DeviceInfo, DEVICE_PORT};
pub use envelope::{Command, Packet};
pub use error::{Error, Result};
pub use props::Property;
pub use state::PropertyCache;
