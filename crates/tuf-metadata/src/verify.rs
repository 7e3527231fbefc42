//! Threshold signature verification.
//!
//! A document is authentic for a role when at least `threshold` distinct
//! key IDs authorized for that role produced a valid signature over the
//! canonical encoding of the `signed` payload. Signatures from unknown keys
//! and signatures that simply fail to verify are ignored; malformed key or
//! signature material is a hard error.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::{MetadataError, Result};
use crate::key::Key;
use crate::metadata::{Metadata, Root, Targets};

/// Checks that `metadata` carries `threshold` valid signatures from `keyids`.
pub fn verify_threshold(
    role: &str,
    keys: &BTreeMap<String, Key>,
    keyids: &[String],
    threshold: u64,
    metadata: &Metadata,
) -> Result<()> {
    let message = metadata.canonical_signed_bytes()?;
    let mut signers: HashSet<&str> = HashSet::new();

    for keyid in keyids {
        if signers.contains(keyid.as_str()) {
            continue;
        }
        let Some(key) = keys.get(keyid) else {
            debug!(role, keyid = %keyid, "verify: role lists a key that is not defined");
            continue;
        };
        let signatures: Vec<_> = metadata
            .signatures
            .iter()
            .filter(|signature| signature.keyid == *keyid)
            .collect();
        if signatures.is_empty() {
            continue;
        }
        let public = key.to_public_key()?;
        for signature in signatures {
            let sig = hex::decode(&signature.sig).map_err(|err| MetadataError::Crypto {
                keyid: keyid.clone(),
                reason: format!("signature is not hex: {err}"),
            })?;
            if public.verify(&message, &sig) {
                signers.insert(keyid.as_str());
                break;
            }
            debug!(role, keyid = %keyid, "verify: signature does not verify");
        }
    }

    let valid = signers.len() as u64;
    if valid < threshold {
        return Err(MetadataError::Unsigned {
            role: role.to_string(),
            valid,
            threshold,
        });
    }
    Ok(())
}

impl Root {
    /// Verifies `metadata` against the keys and threshold root assigns to `role`.
    pub fn verify_delegate(&self, role: &str, metadata: &Metadata) -> Result<()> {
        let entry = self
            .role(role)
            .ok_or_else(|| MetadataError::Invalid(format!("root does not define role '{role}'")))?;
        verify_threshold(role, &self.keys, &entry.keyids, entry.threshold, metadata)
    }
}

impl Targets {
    /// Verifies `metadata` as the delegated role `role` of this targets document.
    pub fn verify_delegate(&self, role: &str, metadata: &Metadata) -> Result<()> {
        let delegations = self.delegations.as_ref().ok_or_else(|| {
            MetadataError::Invalid(format!("no delegations available for role '{role}'"))
        })?;
        let (keyids, threshold) = delegations.role_keys(role).ok_or_else(|| {
            MetadataError::Invalid(format!("role '{role}' is not delegated"))
        })?;
        verify_threshold(role, &delegations.keys, keyids, threshold, metadata)
    }
}
