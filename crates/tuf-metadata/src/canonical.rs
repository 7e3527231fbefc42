//! Canonical JSON encoding used as the signing input.
//!
//! Objects are emitted with sorted keys and no insignificant whitespace, per
//! the OLPC canonical JSON rules TUF signers follow. Any field a document
//! carried on the wire (including unrecognized ones) flows through here, so
//! the bytes match what the repository signed.

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

use crate::error::{MetadataError, Result};

/// Serialises `value` into canonical JSON bytes.
pub fn to_canonical_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let mut data = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut data, CanonicalFormatter::new());
    value
        .serialize(&mut ser)
        .map_err(|err| MetadataError::Canonical(err.to_string()))?;
    Ok(data)
}
