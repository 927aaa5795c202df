//! Payload ciphers for the appliance protocol
//!
//! Two schemes exist in the field: V1 (AES-128-ECB with PKCS#7-style
//! padding) on older units and V2 (AES-128-GCM with a fixed nonce and
//! AAD) on newer ones. Scan and bind exchanges use a well-known generic
//! key; everything after bind uses the device-issued session key.

use aes::cipher::block_padding::{NoPadding, Pkcs7};
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

type Aes128EcbEnc = ecb::Encryptor<aes::Aes128>;
type Aes128EcbDec = ecb::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;
const GCM_TAG_LEN: usize = 16;

/// Generic key for V1 scan/bind exchanges
pub const GENERIC_KEY_V1: &[u8; 16] = b"a3K8Bx%2r8Y7#xDh";

/// Generic key for V2 scan/bind exchanges
pub const GENERIC_KEY_V2: &[u8; 16] = b"{yxAHAY_Lm6pbC/<";

/// Fixed GCM nonce shipped in V2 firmware
const GCM_NONCE: [u8; 12] = [
    0x54, 0x40, 0x78, 0x44, 0x49, 0x67, 0x5a, 0x51, 0x6c, 0x5e, 0x63, 0x13,
];

/// Fixed GCM additional authenticated data shipped in V2 firmware
const GCM_AAD: &[u8] = b"qualcomm-test";

/// Cipher scheme selector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CipherKind {
    /// AES-128-ECB, PKCS#7-style padding
    #[default]
    V1,
    /// AES-128-GCM, fixed nonce and AAD, tag carried in the envelope
    V2,
}

/// A concrete cipher instance carrying its key
#[derive(Clone)]
pub enum Cipher {
    V1(CipherV1),
    V2(CipherV2),
}

impl Cipher {
    /// Cipher for scan/bind exchanges under the well-known generic key
    pub fn generic(kind: CipherKind) -> Self {
        match kind {
            CipherKind::V1 => Cipher::V1(CipherV1::default()),
            CipherKind::V2 => Cipher::V2(CipherV2::default()),
        }
    }

    /// Cipher keyed with a device-issued session key
    pub fn session(kind: CipherKind, key: &str) -> Result<Self> {
        match kind {
            CipherKind::V1 => Ok(Cipher::V1(CipherV1::new(key.as_bytes())?)),
            CipherKind::V2 => Ok(Cipher::V2(CipherV2::new(key.as_bytes())?)),
        }
    }

    /// Which scheme this cipher implements
    pub fn kind(&self) -> CipherKind {
        match self {
            Cipher::V1(_) => CipherKind::V1,
            Cipher::V2(_) => CipherKind::V2,
        }
    }

    /// Replace the key, keeping the scheme
    pub fn set_key(&mut self, key: &str) -> Result<()> {
        *self = Self::session(self.kind(), key)?;
        Ok(())
    }

    /// Encrypt a JSON payload, returning base64 ciphertext and an optional
    /// base64 authentication tag (V2 only)
    pub fn encrypt(&self, value: &Value) -> Result<(String, Option<String>)> {
        match self {
            Cipher::V1(c) => Ok((c.encrypt(value)?, None)),
            Cipher::V2(c) => {
                let (pack, tag) = c.encrypt(value)?;
                Ok((pack, Some(tag)))
            }
        }
    }

    /// Decrypt a base64 ciphertext back into a JSON payload
    pub fn decrypt(&self, pack: &str, tag: Option<&str>) -> Result<Value> {
        match self {
            Cipher::V1(c) => c.decrypt(pack),
            Cipher::V2(c) => c.decrypt(pack, tag),
        }
    }
}

/// AES-128-ECB cipher used by V1 firmware
#[derive(Clone)]
pub struct CipherV1 {
    key: [u8; 16],
}

impl Default for CipherV1 {
    fn default() -> Self {
        Self {
            key: *GENERIC_KEY_V1,
        }
    }
}

impl CipherV1 {
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            key: check_key(key)?,
        })
    }

    pub fn encrypt(&self, value: &Value) -> Result<String> {
        let json = serde_json::to_vec(value)?;
        // PKCS#7: always pad, a full extra block when already aligned
        let padded_len = (json.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
        let mut buf = vec![0u8; padded_len];
        buf[..json.len()].copy_from_slice(&json);

        let sealed = Aes128EcbEnc::new((&self.key).into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, json.len())
            .map_err(|_| Error::Encryption("ECB pad buffer too small".into()))?;

        debug!(bytes = sealed.len(), "encrypted V1 payload");
        Ok(BASE64.encode(sealed))
    }

    pub fn decrypt(&self, pack: &str) -> Result<Value> {
        let mut buf = BASE64.decode(pack)?;
        if buf.is_empty() || buf.len() % BLOCK_SIZE != 0 {
            return Err(Error::Decryption(format!(
                "ciphertext length {} is not block aligned",
                buf.len()
            )));
        }

        // Padding is deliberately not validated: field units emit packs
        // whose plaintext trails arbitrary bytes after the closing brace.
        let plain = Aes128EcbDec::new((&self.key).into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| Error::Decryption("ECB block decrypt failed".into()))?;

        parse_plaintext(plain)
    }
}

/// AES-128-GCM cipher used by V2 firmware
#[derive(Clone)]
pub struct CipherV2 {
    key: [u8; 16],
}

impl Default for CipherV2 {
    fn default() -> Self {
        Self {
            key: *GENERIC_KEY_V2,
        }
    }
}

impl CipherV2 {
    pub fn new(key: &[u8]) -> Result<Self> {
        Ok(Self {
            key: check_key(key)?,
        })
    }

    pub fn encrypt(&self, value: &Value) -> Result<(String, String)> {
        let json = serde_json::to_vec(value)?;
        let cipher = Aes128Gcm::new((&self.key).into());
        let mut sealed = cipher
            .encrypt(
                Nonce::from_slice(&GCM_NONCE),
                Payload {
                    msg: &json,
                    aad: GCM_AAD,
                },
            )
            .map_err(|_| Error::Encryption("AEAD seal failed".into()))?;

        // aes-gcm appends the tag; the wire carries it in a separate field
        let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);
        debug!(bytes = sealed.len(), "encrypted V2 payload");
        Ok((BASE64.encode(&sealed), BASE64.encode(&tag)))
    }

    pub fn decrypt(&self, pack: &str, tag: Option<&str>) -> Result<Value> {
        let tag = tag.ok_or(Error::MissingField("tag"))?;
        let mut msg = BASE64.decode(pack)?;
        msg.extend_from_slice(&BASE64.decode(tag)?);

        let cipher = Aes128Gcm::new((&self.key).into());
        let plain = cipher
            .decrypt(
                Nonce::from_slice(&GCM_NONCE),
                Payload {
                    msg: &msg,
                    aad: GCM_AAD,
                },
            )
            .map_err(|_| Error::Decryption("AEAD tag verification failed".into()))?;

        parse_plaintext(&plain)
    }
}

fn check_key(key: &[u8]) -> Result<[u8; 16]> {
    key.try_into()
        .map_err(|_| Error::InvalidKeyLength(key.len()))
}

/// Decode plaintext as UTF-8, drop anything after the last `}`, and parse.
///
/// The truncation is load-bearing: V1 units routinely send packs whose
/// plaintext is the JSON object followed by junk instead of valid padding.
fn parse_plaintext(plain: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(plain)
        .map_err(|e| Error::Decryption(format!("plaintext is not UTF-8: {e}")))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| Error::Decryption("no JSON object in plaintext".into()))?;
    serde_json::from_str(&text[..=end])
        .map_err(|e| Error::Decryption(format!("plaintext is not JSON: {e}")))
}
