//! In-process device emulator for loopback tests
//!
//! Speaks the device side of the protocol on 127.0.0.1: scan replies,
//! the bind handshake, status reports, and command acknowledgements,
//! with V1 sealing throughout.

use std::collections::HashMap;
use std::net::SocketAddr;

use aerolink_core::cipher::{Cipher, CipherKind};
use aerolink_core::device_info::DeviceInfo;
use aerolink_core::envelope::Packet;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Session key every emulated device issues
pub const EMULATOR_KEY: &str = "emulatorkey12345";

/// Opt-in log output for debugging emulator tests (`RUST_LOG=debug`)
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub struct Emulator {
    pub addr: SocketAddr,
    pub mac: String,
    task: Option<JoinHandle<()>>,
    _parked_socket: Option<UdpSocket>,
}

impl Emulator {
    /// Emulated device answering scan/bind/status/cmd, echoing commanded
    /// values in `val`
    pub async fn spawn(mac: &str, state: HashMap<String, Value>) -> Self {
        Self::spawn_with(mac, state, true).await
    }

    /// `echo_in_val = false` mimics firmwares that omit `val` and echo
    /// only `p`
    pub async fn spawn_with(mac: &str, state: HashMap<String, Value>, echo_in_val: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(run(socket, mac.to_string(), state, echo_in_val));
        Self {
            addr,
            mac: mac.to_string(),
            task: Some(task),
            _parked_socket: None,
        }
    }

    /// A bound socket that never answers, for timeout paths
    pub async fn unresponsive() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        Self {
            addr,
            mac: "f4911e7aca59".to_string(),
            task: None,
            _parked_socket: Some(socket),
        }
    }

    pub fn device_info(&self) -> DeviceInfo {
        let SocketAddr::V4(v4) = self.addr else {
            unreachable!("emulator binds IPv4 loopback")
        };
        DeviceInfo::new(*v4.ip(), v4.port(), &self.mac, None, None, None, None)
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn run(socket: UdpSocket, mac: String, mut state: HashMap<String, Value>, echo_in_val: bool) {
    let generic = Cipher::generic(CipherKind::V1);
    let session = Cipher::session(CipherKind::V1, EMULATOR_KEY).unwrap();
    let mut buf = [0u8; 2048];

    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            break;
        };
        let Ok(outer) = serde_json::from_slice::<Value>(&buf[..len]) else {
            continue;
        };

        match outer.get("t").and_then(Value::as_str) {
            Some("scan") => {
                let reply = sealed_reply(
                    &mac,
                    1,
                    json!({
                        "t": "dev",
                        "cid": mac,
                        "bc": "",
                        "brand": "aero",
                        "catalog": "aero",
                        "mac": mac,
                        "mid": "10001",
                        "model": "aero",
                        "name": mac[mac.len() - 8..].to_string(),
                        "series": "aero",
                        "vender": "1",
                        "ver": "V1.2.1",
                        "lock": 0,
                    }),
                );
                send(&socket, from, &reply, &generic).await;
            }
            Some("pack") => {
                let uses_generic =
                    matches!(outer.get("i"), Some(flag) if flag == &json!(1) || flag == &json!("1"));
                let cipher = if uses_generic { &generic } else { &session };
                let Ok(packet) = Packet::open(&buf[..len], cipher) else {
                    continue;
                };
                let Some(pack) = packet.pack else { continue };

                match pack.get("t").and_then(Value::as_str) {
                    Some("bind") => {
                        let reply = sealed_reply(
                            &mac,
                            1,
                            json!({"t": "bindok", "mac": mac, "key": EMULATOR_KEY, "r": 200}),
                        );
                        send(&socket, from, &reply, &generic).await;
                    }
                    Some("status") => {
                        let cols: Vec<String> = pack
                            .get("cols")
                            .and_then(Value::as_array)
                            .map(|cols| {
                                cols.iter()
                                    .filter_map(Value::as_str)
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();
                        let dat: Vec<Value> = cols
                            .iter()
                            .map(|col| state.get(col).cloned().unwrap_or(json!(0)))
                            .collect();
                        let reply = sealed_reply(
                            &mac,
                            0,
                            json!({"t": "dat", "mac": mac, "r": 200, "cols": cols, "dat": dat}),
                        );
                        send(&socket, from, &reply, &session).await;
                    }
                    Some("cmd") => {
                        let opt: Vec<String> = pack
                            .get("opt")
                            .and_then(Value::as_array)
                            .map(|keys| {
                                keys.iter()
                                    .filter_map(Value::as_str)
                                    .map(str::to_string)
                                    .collect()
                            })
                            .unwrap_or_default();
                        let p: Vec<Value> = pack
                            .get("p")
                            .and_then(Value::as_array)
                            .cloned()
                            .unwrap_or_default();
                        for (key, value) in opt.iter().zip(&p) {
                            state.insert(key.clone(), value.clone());
                        }
                        let mut ack = json!({
                            "t": "res", "mac": mac, "r": 200, "opt": opt, "p": p,
                        });
                        if echo_in_val {
                            ack["val"] = ack["p"].clone();
                        }
                        let reply = sealed_reply(&mac, 0, ack);
                        send(&socket, from, &reply, &session).await;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
}

fn sealed_reply(mac: &str, i: i64, pack: Value) -> Packet {
    Packet {
        cid: mac.to_string(),
        i,
        t: "pack".into(),
        uid: 0,
        tcid: String::new(),
        pack: Some(pack),
    }
}

async fn send(socket: &UdpSocket, to: SocketAddr, packet: &Packet, cipher: &Cipher) {
    let data = packet.seal(cipher).unwrap();
    socket.send_to(&data, to).await.unwrap();
}
