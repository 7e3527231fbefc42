//! Error taxonomy surfaced by the trust engine.
//!
//! Verification failures map onto one variant per rejection reason so callers
//! can tell malformed input (`Crypto`) from a legitimately unauthorised
//! document (`UnsignedMetadata`), and transport failures keep the
//! [`FetchError`] classification supplied by the fetcher.

use thiserror::Error;
use tuf_metadata::MetadataError;

use crate::fetcher::FetchError;
use crate::store::StoreError;

/// Errors returned by the trusted metadata set, root rotation and the updater.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// Key or signature material could not be decoded.
    #[error("crypto error: {0}")]
    Crypto(String),
    /// Fewer distinct authorised keys than the threshold signed the document.
    #[error("unsigned metadata: {0}")]
    UnsignedMetadata(String),
    /// A document tried to move a role back to an older version.
    #[error("replayed {role} metadata: version {version} is older than trusted {trusted}")]
    ReplayedMetadata {
        role: String,
        version: u64,
        trusted: u64,
    },
    /// The document expired at or before the refresh reference time.
    #[error("{role} metadata expired at {expires}")]
    ExpiredMetadata { role: String, expires: String },
    /// Bytes do not match the length or hashes pinned by the referring document.
    #[error("length or hash mismatch: {0}")]
    LengthOrHashMismatch(String),
    /// Root rotation consumed the configured number of versions.
    #[error("root rotation stopped after {rotations} new versions (trusted version {version})")]
    MaxRotationsExceeded { rotations: u32, version: u64 },
    /// Version differs from the one the trust chain requires.
    #[error("bad {role} version: expected {expected}, got {actual}")]
    BadVersion {
        role: String,
        expected: u64,
        actual: u64,
    },
    /// The fetch collaborator failed.
    #[error("repository error: {0}")]
    Repository(#[from] FetchError),
    /// The document could not be decoded or violates a structural rule.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    /// The local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// An update was attempted before the state it depends on is trusted.
    #[error("out of order update: {0}")]
    OutOfOrder(String),
    /// Neither the configuration nor the local store holds a root to bootstrap from.
    #[error("no trusted root available to bootstrap from")]
    MissingTrustedRoot,
    /// The configuration does not allow the requested operation.
    #[error("configuration error: {0}")]
    Config(String),
    /// The referring document does not list the requested role.
    #[error("{referrer} does not list '{role}'")]
    MissingMetaEntry { referrer: String, role: String },
}

impl From<MetadataError> for UpdaterError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::Crypto { .. } | MetadataError::UnsupportedKey { .. } => {
                UpdaterError::Crypto(err.to_string())
            }
            MetadataError::Unsigned { .. } => UpdaterError::UnsignedMetadata(err.to_string()),
            MetadataError::LengthMismatch { .. }
            | MetadataError::HashMismatch { .. }
            | MetadataError::UnsupportedHashAlgorithm { .. } => {
                UpdaterError::LengthOrHashMismatch(err.to_string())
            }
            MetadataError::Json(_)
            | MetadataError::Canonical(_)
            | MetadataError::Invalid(_)
            | MetadataError::UnexpectedType { .. } => UpdaterError::InvalidMetadata(err.to_string()),
        }
    }
}

/// Convenience alias for updater results.
pub type Result<T> = std::result::Result<T, UpdaterError>;
