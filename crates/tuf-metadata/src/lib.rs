//! Data model and verification primitives for TUF metadata.
//!
//! This crate decodes and re-encodes signed role documents, derives key IDs,
//! checks threshold signatures, matches target paths against delegations and
//! verifies lengths and hashes. It performs no I/O; the trust state machine
//! and refresh workflow live in `tuf-updater`.

pub mod canonical;
pub mod delegation;
pub mod error;
pub mod hashes;
pub mod key;
pub mod metadata;
pub mod verify;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use canonical::to_canonical_bytes;
pub use error::{MetadataError, Result};
pub use key::{Key, KeyVal, PublicKey};
pub use metadata::{
    meta_file_name, DelegatedRole, Delegations, MetaFile, Metadata, Payload, Role, Root,
    Signature, Signed, Snapshot, SuccinctRoles, TargetFile, Targets, Timestamp,
    UnrecognizedFields, ROOT, SNAPSHOT, SPECIFICATION_VERSION, TARGETS, TIMESTAMP,
    TOP_LEVEL_ROLE_NAMES,
};
pub use verify::verify_threshold;
