//! Error types for the aerolink protocol layer

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-layer error types
#[derive(Debug, Error)]
pub enum Error {
    /// Outer or inner JSON could not be produced or parsed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Base64 payload could not be decoded
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Payload could not be encrypted
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Payload could not be decrypted or authenticated
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Cipher keys are always 16 bytes on this protocol
    #[error("invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Envelope or inner packet is missing a required field
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Column-oriented response with mismatched lengths
    #[error("column/value count mismatch: {cols} columns, {values} values")]
    ColumnMismatch { cols: usize, values: usize },

    /// Setter given a value the device would reject
    #[error("value out of range: {0}")]
    OutOfRange(String),
}
