//! Outer envelope codec
//!
//! Every exchange except the scan probe travels as a fixed-shape outer
//! JSON object whose `pack` field is the base64 AES ciphertext of an inner
//! JSON payload. The `i` flag selects which key sealed the pack: `1` for
//! the well-known generic key (scan/bind), `0` for the device session key.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::cipher::Cipher;
use crate::device_info::DeviceInfo;
use crate::error::{Error, Result};

/// Outer `t` value when an encrypted payload is enclosed
pub const PACK_KIND: &str = "pack";

/// The scan probe is the one request that travels outside an envelope
const SCAN_PROBE: &[u8] = br#"{"t":"scan"}"#;

/// Request kinds issued by the client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Scan,
    Bind,
    Status,
    Cmd,
}

impl Command {
    pub const fn kind(self) -> &'static str {
        match self {
            Command::Scan => "scan",
            Command::Bind => "bind",
            Command::Status => "status",
            Command::Cmd => "cmd",
        }
    }

    /// Scan and bind are sealed under the generic key (`i == 1`)
    pub const fn uses_generic_key(self) -> bool {
        matches!(self, Command::Scan | Command::Bind)
    }
}

/// Envelope as it crosses the socket: pack still base64
#[derive(Debug, Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    cid: String,
    #[serde(default, deserialize_with = "int_or_string")]
    i: i64,
    t: String,
    #[serde(default)]
    uid: i64,
    #[serde(default)]
    tcid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

/// Envelope with its inner payload in the clear
#[derive(Clone, Debug)]
pub struct Packet {
    pub cid: String,
    pub i: i64,
    pub t: String,
    pub uid: i64,
    pub tcid: String,
    pub pack: Option<Value>,
}

impl Packet {
    /// Build a request envelope; `data` fields are merged into the inner
    /// payload after `t` and `mac`
    pub fn request(command: Command, device: &DeviceInfo, data: Option<Map<String, Value>>) -> Self {
        let pack = data.map(|fields| {
            let mut inner = Map::new();
            inner.insert("t".into(), Value::from(command.kind()));
            inner.insert("mac".into(), Value::from(device.mac()));
            inner.extend(fields);
            Value::Object(inner)
        });
        Self {
            cid: "app".into(),
            i: i64::from(command.uses_generic_key()),
            t: if pack.is_some() {
                PACK_KIND.into()
            } else {
                command.kind().into()
            },
            uid: 0,
            tcid: device.mac().into(),
            pack,
        }
    }

    pub fn bind_request(device: &DeviceInfo) -> Self {
        let mut data = Map::new();
        data.insert("uid".into(), Value::from(0));
        Self::request(Command::Bind, device, Some(data))
    }

    pub fn status_request(device: &DeviceInfo, cols: &[&str]) -> Self {
        let mut data = Map::new();
        data.insert("cols".into(), Value::from(cols.to_vec()));
        Self::request(Command::Status, device, Some(data))
    }

    /// `cmd` request from ordered key/value pairs
    pub fn command_request<'a>(
        device: &DeviceInfo,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Self {
        let mut opt = Vec::new();
        let mut p = Vec::new();
        for (key, value) in values {
            opt.push(Value::from(key));
            p.push(value);
        }
        let mut data = Map::new();
        data.insert("opt".into(), Value::Array(opt));
        data.insert("p".into(), Value::Array(p));
        Self::request(Command::Cmd, device, Some(data))
    }

    /// Inner packet kind, when a payload is present
    pub fn inner_kind(&self) -> Option<&str> {
        self.pack.as_ref()?.get("t")?.as_str()
    }

    /// Encrypt the inner payload and serialize the outer JSON
    pub fn seal(&self, cipher: &Cipher) -> Result<Vec<u8>> {
        let mut wire = WireEnvelope {
            cid: self.cid.clone(),
            i: self.i,
            t: self.t.clone(),
            uid: self.uid,
            tcid: self.tcid.clone(),
            pack: None,
            tag: None,
        };
        if let Some(inner) = &self.pack {
            let (sealed, tag) = cipher.encrypt(inner)?;
            wire.pack = Some(sealed);
            wire.tag = tag;
        }
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parse an outer envelope and decrypt its payload
    pub fn open(data: &[u8], cipher: &Cipher) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(data)?;
        let pack = match &wire.pack {
            Some(sealed) => Some(cipher.decrypt(sealed, wire.tag.as_deref())?),
            None => None,
        };
        Ok(Self {
            cid: wire.cid,
            i: wire.i,
            t: wire.t,
            uid: wire.uid,
            tcid: wire.tcid,
            pack,
        })
    }
}

/// Bare broadcast scan probe
pub fn scan_probe() -> &'static [u8] {
    SCAN_PROBE
}

/// Responders vary between integer and string sentinels for `i`
fn int_or_string<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(i64),
        Text(String),
    }
    match Flag::deserialize(deserializer)? {
        Flag::Int(value) => Ok(value),
        Flag::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Discovery reply payload (`t = "dev"`)
#[derive(Clone, Debug, Deserialize)]
pub struct DevPack {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub ver: String,
}

impl DevPack {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Device id: mac, falling back to cid on units that omit it
    pub fn device_id(&self) -> &str {
        if self.mac.is_empty() {
            &self.cid
        } else {
            &self.mac
        }
    }
}

/// Bind reply payload (`t = "bindok"`)
#[derive(Clone, Debug, Deserialize)]
pub struct BindOkPack {
    #[serde(default)]
    pub mac: String,
    pub key: String,
    #[serde(default)]
    pub r: i64,
}

impl BindOkPack {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Column-oriented status reply payload (`t = "dat"`)
#[derive(Clone, Debug, Deserialize)]
pub struct DataPack {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub r: i64,
    pub cols: Vec<String>,
    pub dat: Vec<Value>,
}

impl DataPack {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Zip columns and values, rejecting ragged replies
    pub fn into_pairs(self) -> Result<Vec<(String, Value)>> {
        if self.cols.len() != self.dat.len() {
            return Err(Error::ColumnMismatch {
                cols: self.cols.len(),
                values: self.dat.len(),
            });
        }
        Ok(self.cols.into_iter().zip(self.dat).collect())
    }
}

/// Command acknowledgement payload (`t = "res"`)
///
/// Firmware revisions disagree on whether the echoed values arrive in
/// `val` or `p`; either is accepted.
#[derive(Clone, Debug, Deserialize)]
pub struct AckPack {
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub r: i64,
    pub opt: Vec<String>,
    #[serde(default)]
    pub p: Option<Vec<Value>>,
    #[serde(default)]
    pub val: Option<Vec<Value>>,
}

impl AckPack {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn into_pairs(self) -> Result<Vec<(String, Value)>> {
        let values = self
            .val
            .or(self.p)
            .ok_or(Error::MissingField("val"))?;
        if self.opt.len() != values.len() {
            return Err(Error::ColumnMismatch {
                cols: self.opt.len(),
                values: values.len(),
            });
        }
        Ok(self.opt.into_iter().zip(values).collect())
    }
}
