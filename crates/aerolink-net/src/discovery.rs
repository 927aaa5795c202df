//! Broadcast device discovery
//!
//! A scan opens one broadcast endpoint per eligible interface, probes
//! `{"t":"scan"}` at the device port, and folds every `dev` reply into an
//! ordered known-device list. Registered listeners hear about new devices
//! and address changes; a late-added listener is replayed the full set.

use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use aerolink_core::cipher::{Cipher, CipherKind};
use aerolink_core::device_info::{DeviceInfo, DEVICE_PORT};
use aerolink_core::envelope::{scan_probe, DevPack, Packet};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::interfaces::{broadcast_interfaces, IpInterface};
use crate::transport::{DatagramEndpoint, TransportError, DEFAULT_SEND_TIMEOUT};

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no eligible interfaces for scan")]
    NoInterfaces,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Observer of discovery results
pub trait DiscoveryListener: Send + Sync {
    /// A device was seen for the first time
    fn device_found(&self, device: &DeviceInfo);
    /// A known device reappeared at a new address
    fn device_update(&self, device: &DeviceInfo);
}

/// Discovery tuning knobs
#[derive(Clone, Copy, Debug)]
pub struct DiscoveryOptions {
    /// Per-send gate on scan probes
    pub io_timeout: Duration,
    /// Include loopback interfaces when enumerating
    pub allow_loopback: bool,
    /// Cipher scheme used to open scan replies
    pub cipher: CipherKind,
    /// Device port to probe; real units are fixed at 7000
    pub port: u16,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            io_timeout: DEFAULT_SEND_TIMEOUT,
            allow_loopback: false,
            cipher: CipherKind::V1,
            port: DEVICE_PORT,
        }
    }
}

#[derive(Clone, Copy)]
enum ListenerEvent {
    Found,
    Updated,
}

/// Discovery engine with listener fan-out
pub struct Discovery {
    options: DiscoveryOptions,
    devices: RwLock<Vec<DeviceInfo>>,
    listeners: RwLock<Vec<Arc<dyn DiscoveryListener>>>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new(DiscoveryOptions::default())
    }
}

impl Discovery {
    pub fn new(options: DiscoveryOptions) -> Self {
        Self {
            options,
            devices: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of every device seen so far, in arrival order
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.read().clone()
    }

    /// Register a listener and replay the known set to it
    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.listeners.write().push(listener.clone());
        let known = self.devices.read().clone();
        for device in &known {
            notify_one(&listener, ListenerEvent::Found, device);
        }
    }

    /// Unregister a listener; unknown listeners are ignored
    pub fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) {
        self.listeners
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    /// Scan every eligible local interface for `wait`
    pub async fn scan(&self, wait: Duration) -> Result<Vec<DeviceInfo>, DiscoveryError> {
        let interfaces = broadcast_interfaces(self.options.allow_loopback);
        self.scan_interfaces(wait, &interfaces).await
    }

    /// Scan an explicit set of interfaces for `wait`
    pub async fn scan_interfaces(
        &self,
        wait: Duration,
        interfaces: &[IpInterface],
    ) -> Result<Vec<DeviceInfo>, DiscoveryError> {
        if interfaces.is_empty() {
            return Err(DiscoveryError::NoInterfaces);
        }
        info!(interfaces = interfaces.len(), "starting discovery scan");

        let (tx, mut rx) = mpsc::channel(64);
        let mut receivers = JoinSet::new();
        for iface in interfaces {
            let endpoint = match self.open_scanner(iface).await {
                Ok(endpoint) => endpoint,
                Err(err) => {
                    // One unusable interface must not sink the scan
                    warn!(ip = %iface.ip, error = %err, "skipping scan interface");
                    continue;
                }
            };
            receivers.spawn(collect_responses(endpoint, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + wait;
        loop {
            match timeout_at(deadline, rx.recv()).await {
                Err(_) | Ok(None) => break,
                Ok(Some((packet, addr))) => self.handle_scan_response(&packet, addr),
            }
        }
        receivers.abort_all();

        let devices = self.devices();
        info!(devices = devices.len(), "discovery scan complete");
        Ok(devices)
    }

    async fn open_scanner(&self, iface: &IpInterface) -> Result<DatagramEndpoint, TransportError> {
        let mut endpoint = DatagramEndpoint::broadcast(iface.ip, self.options.io_timeout)?;
        endpoint.set_cipher(Cipher::generic(self.options.cipher));
        let target = SocketAddr::new(IpAddr::V4(iface.broadcast), self.options.port);
        debug!(%target, "sending scan probe");
        endpoint.send_raw(scan_probe(), target).await?;
        Ok(endpoint)
    }

    /// Fold one scan reply into the known-device list
    fn handle_scan_response(&self, packet: &Packet, addr: SocketAddr) {
        let Some(pack) = &packet.pack else {
            return;
        };
        if packet.inner_kind() != Some("dev") {
            warn!(from = %addr, kind = ?packet.inner_kind(), "unexpected scan reply kind");
            return;
        }
        let dev = match DevPack::from_value(pack) {
            Ok(dev) => dev,
            Err(err) => {
                warn!(from = %addr, error = %err, "malformed dev pack");
                return;
            }
        };
        let IpAddr::V4(ip) = addr.ip() else {
            return;
        };
        let device = DeviceInfo::new(
            ip,
            addr.port(),
            dev.device_id(),
            nonempty(&dev.name),
            nonempty(&dev.brand),
            nonempty(&dev.model),
            nonempty(&dev.ver),
        );

        let event = {
            let mut devices = self.devices.write();
            match devices.iter_mut().find(|known| **known == device) {
                Some(known) if known.ip() == device.ip() => None,
                Some(known) => {
                    info!(device = %device, previous = %known.ip(), "device address changed");
                    *known = device.clone();
                    Some(ListenerEvent::Updated)
                }
                None => {
                    info!(device = %device, "found device");
                    devices.push(device.clone());
                    Some(ListenerEvent::Found)
                }
            }
        };
        if let Some(event) = event {
            let listeners = self.listeners.read().clone();
            for listener in &listeners {
                notify_one(listener, event, &device);
            }
        }
    }
}

/// Pump one scan endpoint into the collector channel
async fn collect_responses(endpoint: DatagramEndpoint, tx: mpsc::Sender<(Packet, SocketAddr)>) {
    loop {
        match endpoint.recv().await {
            Ok(response) => {
                if tx.send(response).await.is_err() {
                    break;
                }
            }
            Err(TransportError::Io(err)) => {
                warn!(error = %err, "scan receiver closed");
                break;
            }
            Err(err) => debug!(error = %err, "discarding undecodable scan reply"),
        }
    }
}

/// One listener, one event; panics are logged, never propagated
fn notify_one(listener: &Arc<dyn DiscoveryListener>, event: ListenerEvent, device: &DeviceInfo) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match event {
        ListenerEvent::Found => listener.device_found(device),
        ListenerEvent::Updated => listener.device_update(device),
    }));
    if outcome.is_err() {
        warn!(device = %device, "discovery listener panicked");
    }
}

fn nonempty(text: &str) -> Option<&str> {
    (!text.is_empty()).then_some(text)
}
