//! Local IPv4 interface enumeration for broadcast discovery

use std::net::Ipv4Addr;

use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig, V4IfAddr};
use tracing::debug;

/// An interface address and the broadcast address to probe through it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpInterface {
    pub ip: Ipv4Addr,
    pub broadcast: Ipv4Addr,
}

/// Enumerate interfaces eligible for a discovery scan
///
/// Every IPv4 address with a usable broadcast address yields an entry;
/// when the OS reports none, one is derived from the netmask. Addresses
/// with neither are skipped. Loopback interfaces are only included on
/// request.
pub fn broadcast_interfaces(allow_loopback: bool) -> Vec<IpInterface> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            debug!(error = %err, "interface enumeration failed");
            return Vec::new();
        }
    };

    let mut eligible = Vec::new();
    for iface in &interfaces {
        for addr in &iface.addr {
            let Addr::V4(v4) = addr else { continue };
            if v4.ip.is_loopback() && !allow_loopback {
                continue;
            }
            let Some(broadcast) = usable_broadcast(v4) else {
                continue;
            };
            let entry = IpInterface {
                ip: v4.ip,
                broadcast,
            };
            if !eligible.contains(&entry) {
                debug!(ip = %entry.ip, broadcast = %entry.broadcast, name = %iface.name, "eligible interface");
                eligible.push(entry);
            }
        }
    }
    eligible
}

fn usable_broadcast(v4: &V4IfAddr) -> Option<Ipv4Addr> {
    v4.broadcast
        .or_else(|| v4.netmask.map(|mask| derive_broadcast(v4.ip, mask)))
}

/// Subnet broadcast from address and netmask
fn derive_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}
