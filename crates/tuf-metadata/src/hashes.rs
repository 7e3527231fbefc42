//! Length and digest checks for metadata and target payloads.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{MetadataError, Result};

pub const SHA256: &str = "sha256";
pub const SHA512: &str = "sha512";

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Checks `data` against an optional length and an optional hash map.
///
/// Every listed hash must match; an algorithm this crate does not implement
/// fails the check rather than being skipped.
pub fn verify_length_and_hashes(
    data: &[u8],
    length: Option<u64>,
    hashes: Option<&BTreeMap<String, String>>,
) -> Result<()> {
    if let Some(expected) = length {
        let actual = data.len() as u64;
        if actual != expected {
            return Err(MetadataError::LengthMismatch { expected, actual });
        }
    }
    for (algorithm, expected) in hashes.into_iter().flatten() {
        let digest = match algorithm.as_str() {
            SHA256 => hex::encode(Sha256::digest(data)),
            SHA512 => hex::encode(Sha512::digest(data)),
            _ => {
                return Err(MetadataError::UnsupportedHashAlgorithm {
                    algorithm: algorithm.clone(),
                })
            }
        };
        if !digest.eq_ignore_ascii_case(expected) {
            return Err(MetadataError::HashMismatch {
                algorithm: algorithm.clone(),
            });
        }
    }
    Ok(())
}
