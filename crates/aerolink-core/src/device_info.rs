//! Device identity and network coordinates

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Default UDP port appliances listen on
pub const DEVICE_PORT: u16 = 7000;

/// Identity and address of a discovered appliance
///
/// Two records with the same identity but different addresses describe the
/// same device after a DHCP move, so equality deliberately ignores `ip` and
/// `port`. Immutable after construction.
#[derive(Clone, Debug, Eq)]
pub struct DeviceInfo {
    ip: Ipv4Addr,
    port: u16,
    mac: String,
    name: String,
    brand: Option<String>,
    model: Option<String>,
    version: Option<String>,
}

impl DeviceInfo {
    pub fn new(
        ip: Ipv4Addr,
        port: u16,
        mac: &str,
        name: Option<&str>,
        brand: Option<&str>,
        model: Option<&str>,
        version: Option<&str>,
    ) -> Self {
        let mac = canonical_mac(mac);
        let name = match name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => mac.clone(),
        };
        Self {
            ip,
            port,
            mac,
            name,
            brand: brand.map(str::to_string),
            model: model.map(str::to_string),
            version: version.map(str::to_string),
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Socket address of the device endpoint
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Canonical mac: lowercase hex, no separators
    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn brand(&self) -> Option<&str> {
        self.brand.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

impl PartialEq for DeviceInfo {
    /// Identity comparison: ip and port are excluded so an address change
    /// still compares equal
    fn eq(&self, other: &Self) -> bool {
        self.mac == other.mac
            && self.name == other.name
            && self.brand == other.brand
            && self.model == other.model
            && self.version == other.version
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device: {} @ {}:{} (mac: {})",
            self.name, self.ip, self.port, self.mac
        )
    }
}

fn canonical_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_ascii_lowercase()
}
