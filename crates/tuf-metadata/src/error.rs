//! Error type shared by every decoding and verification helper in the crate.

use thiserror::Error;

/// Errors emitted while decoding, encoding, or verifying metadata documents.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("canonical json encoding failed: {0}")]
    Canonical(String),
    #[error("invalid metadata: {0}")]
    Invalid(String),
    #[error("expected '{expected}' metadata, found '{found}'")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
    /// Key or signature material could not be decoded.
    #[error("malformed key or signature for keyid '{keyid}': {reason}")]
    Crypto { keyid: String, reason: String },
    #[error("unsupported key type '{keytype}' with scheme '{scheme}'")]
    UnsupportedKey { keytype: String, scheme: String },
    /// Fewer distinct keys than the role threshold produced valid signatures.
    #[error("'{role}' was signed by {valid}/{threshold} keys")]
    Unsigned {
        role: String,
        valid: u64,
        threshold: u64,
    },
    #[error("length mismatch (expected {expected}, got {actual})")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("hash mismatch for '{algorithm}'")]
    HashMismatch { algorithm: String },
    #[error("unsupported hash algorithm '{algorithm}'")]
    UnsupportedHashAlgorithm { algorithm: String },
}

/// Convenience alias for results emitted by the metadata helpers.
pub type Result<T> = std::result::Result<T, MetadataError>;
