//! Deterministic keys and payload builders for tests.
//!
//! Only compiled for this crate's own tests or with the `test-utils`
//! feature. Helpers panic on failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, Ed25519KeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

use crate::key::Key;
use crate::metadata::{
    meta_file_name, MetaFile, Metadata, Role, Root, Signature, Snapshot, Targets, Timestamp,
    UnrecognizedFields, SNAPSHOT, SPECIFICATION_VERSION, TOP_LEVEL_ROLE_NAMES,
};

/// DER prefix of a P-256 SubjectPublicKeyInfo, followed by the 65-byte point.
const P256_SPKI_PREFIX: &str = "3059301306072a8648ce3d020106082a8648ce3d030107034200";

#[derive(Clone)]
enum Signer {
    Ed25519(Arc<Ed25519KeyPair>),
    EcdsaP256(Arc<EcdsaKeyPair>),
}

/// A signing key paired with its public [`Key`].
#[derive(Clone)]
pub struct TestKey {
    key: Key,
    signer: Signer,
}

impl std::fmt::Debug for TestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestKey").field("id", &self.key.id()).finish()
    }
}

impl TestKey {
    /// Ed25519 key derived from a 32-byte seed filled with `seed`.
    pub fn ed25519_from_seed(seed: u8) -> Self {
        let pair = Ed25519KeyPair::from_seed_unchecked(&[seed; 32]).expect("valid ed25519 seed");
        let key = Key::from_ed25519(pair.public_key().as_ref()).expect("ed25519 key");
        Self {
            key,
            signer: Signer::Ed25519(Arc::new(pair)),
        }
    }

    /// Freshly generated ECDSA P-256 key.
    pub fn ecdsa_p256() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("generate p256 key");
        let pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("parse p256 key");
        let mut der = hex::decode(P256_SPKI_PREFIX).expect("spki prefix");
        der.extend_from_slice(pair.public_key().as_ref());
        let key = Key::from_ecdsa_p256_spki_der(&der).expect("p256 key");
        Self {
            key,
            signer: Signer::EcdsaP256(Arc::new(pair)),
        }
    }

    pub fn id(&self) -> &str {
        self.key.id()
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Signs raw bytes.
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        match &self.signer {
            Signer::Ed25519(pair) => pair.sign(message).as_ref().to_vec(),
            Signer::EcdsaP256(pair) => pair
                .sign(&SystemRandom::new(), message)
                .expect("ecdsa sign")
                .as_ref()
                .to_vec(),
        }
    }
}

/// Appends one signature per key over the canonical `signed` payload.
pub fn sign(metadata: &mut Metadata, keys: &[&TestKey]) {
    let message = metadata
        .canonical_signed_bytes()
        .expect("canonical signed bytes");
    for key in keys {
        metadata.signatures.push(Signature {
            keyid: key.id().to_string(),
            sig: hex::encode(key.sign_bytes(&message)),
            unrecognized_fields: UnrecognizedFields::new(),
        });
    }
}

/// A fixed expiry far enough ahead for any test run.
pub fn far_future() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

/// Root assigning every key to every top-level role with one threshold.
pub fn root_payload(version: u64, keys: &[TestKey], threshold: u64) -> Root {
    let keyids: Vec<String> = keys.iter().map(|key| key.id().to_string()).collect();
    let roles = TOP_LEVEL_ROLE_NAMES
        .iter()
        .map(|name| (name.to_string(), Role::new(keyids.clone(), threshold)))
        .collect();
    Root {
        spec_version: SPECIFICATION_VERSION.to_string(),
        consistent_snapshot: Some(true),
        version,
        expires: far_future(),
        keys: keys_map(keys),
        roles,
        unrecognized_fields: UnrecognizedFields::new(),
    }
}

/// Map of key ID to key, as root and delegations carry it.
pub fn keys_map(keys: &[TestKey]) -> BTreeMap<String, Key> {
    keys.iter()
        .map(|key| (key.id().to_string(), key.key().clone()))
        .collect()
}

pub fn timestamp_payload(version: u64, snapshot_version: u64) -> Timestamp {
    let mut meta = BTreeMap::new();
    meta.insert(meta_file_name(SNAPSHOT), MetaFile::new(snapshot_version));
    Timestamp {
        spec_version: SPECIFICATION_VERSION.to_string(),
        version,
        expires: far_future(),
        meta,
        unrecognized_fields: UnrecognizedFields::new(),
    }
}

/// Snapshot listing `(role, version)` pairs.
pub fn snapshot_payload(version: u64, roles: &[(&str, u64)]) -> Snapshot {
    let meta = roles
        .iter()
        .map(|(role, role_version)| (meta_file_name(role), MetaFile::new(*role_version)))
        .collect();
    Snapshot {
        spec_version: SPECIFICATION_VERSION.to_string(),
        version,
        expires: far_future(),
        meta,
        unrecognized_fields: UnrecognizedFields::new(),
    }
}

pub fn targets_payload(version: u64) -> Targets {
    Targets {
        spec_version: SPECIFICATION_VERSION.to_string(),
        version,
        expires: far_future(),
        targets: BTreeMap::new(),
        delegations: None,
        unrecognized_fields: UnrecognizedFields::new(),
    }
}
