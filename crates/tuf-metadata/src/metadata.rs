//! Signed metadata documents and their role payloads.
//!
//! Every document shares one envelope, `{"signed": ..., "signatures": [...]}`,
//! and the payload is a tagged union selected by the `_type` discriminator.
//! Each struct keeps the JSON members it does not model in an ordered
//! `unrecognized_fields` map that is merged back on encoding: those members
//! are covered by signatures, so dropping them would invalidate documents
//! produced by newer repositories.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::canonical::to_canonical_bytes;
use crate::error::{MetadataError, Result};
use crate::hashes::{sha256_hex, verify_length_and_hashes, SHA256};
use crate::key::Key;

/// TUF specification version this crate implements.
pub const SPECIFICATION_VERSION: &str = "1.0.31";
/// Spec versions with a different major are rejected.
const SUPPORTED_SPEC_MAJOR: &str = "1";

pub const ROOT: &str = "root";
pub const TIMESTAMP: &str = "timestamp";
pub const SNAPSHOT: &str = "snapshot";
pub const TARGETS: &str = "targets";

/// Names of the four top-level roles every root must define.
pub const TOP_LEVEL_ROLE_NAMES: [&str; 4] = [ROOT, TIMESTAMP, SNAPSHOT, TARGETS];

/// Ordered bag of JSON members a struct does not model.
pub type UnrecognizedFields = BTreeMap<String, Value>;

/// Returns the `meta` map key used for a role (`<role>.json`).
pub fn meta_file_name(role: &str) -> String {
    format!("{role}.json")
}

/// A complete signed document: payload, signatures, and envelope extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub signed: Signed,
    pub signatures: Vec<Signature>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Metadata {
    /// Wraps a payload in an unsigned envelope.
    pub fn new(signed: impl Into<Signed>) -> Self {
        Self {
            signed: signed.into(),
            signatures: Vec::new(),
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }

    /// Decodes a document from JSON bytes and validates its shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metadata: Metadata = serde_json::from_slice(bytes)?;
        metadata.signed.validate()?;
        Ok(metadata)
    }

    /// Re-encodes the document, unrecognized fields included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Canonical JSON of the `signed` payload: the exact bytes signatures cover.
    pub fn canonical_signed_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_bytes(&self.signed)
    }

    pub fn role_type(&self) -> &'static str {
        self.signed.role_type()
    }

    /// Removes every signature from the envelope.
    pub fn clear_signatures(&mut self) {
        self.signatures.clear();
    }

    /// Borrows the payload as `T`, failing when the `_type` differs.
    pub fn payload<T: Payload>(&self) -> Result<&T> {
        T::from_signed_ref(&self.signed).ok_or(MetadataError::UnexpectedType {
            expected: T::TYPE,
            found: self.signed.role_type(),
        })
    }

    /// Consumes the envelope and returns the payload as `T`.
    pub fn into_payload<T: Payload>(self) -> Result<T> {
        let found = self.signed.role_type();
        T::from_signed(self.signed).map_err(|_| MetadataError::UnexpectedType {
            expected: T::TYPE,
            found,
        })
    }
}

/// One entry of the `signatures` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    /// Hex-encoded signature bytes.
    pub sig: String,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

/// The role payload of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
pub enum Signed {
    Root(Root),
    Timestamp(Timestamp),
    Snapshot(Snapshot),
    Targets(Targets),
}

impl Signed {
    /// The `_type` discriminator.
    pub fn role_type(&self) -> &'static str {
        match self {
            Signed::Root(_) => ROOT,
            Signed::Timestamp(_) => TIMESTAMP,
            Signed::Snapshot(_) => SNAPSHOT,
            Signed::Targets(_) => TARGETS,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Signed::Root(root) => root.version,
            Signed::Timestamp(timestamp) => timestamp.version,
            Signed::Snapshot(snapshot) => snapshot.version,
            Signed::Targets(targets) => targets.version,
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        match self {
            Signed::Root(root) => root.expires,
            Signed::Timestamp(timestamp) => timestamp.expires,
            Signed::Snapshot(snapshot) => snapshot.expires,
            Signed::Targets(targets) => targets.expires,
        }
    }

    fn spec_version(&self) -> &str {
        match self {
            Signed::Root(root) => &root.spec_version,
            Signed::Timestamp(timestamp) => &timestamp.spec_version,
            Signed::Snapshot(snapshot) => &snapshot.spec_version,
            Signed::Targets(targets) => &targets.spec_version,
        }
    }

    /// Checks the structural invariants decoding alone cannot express.
    pub fn validate(&self) -> Result<()> {
        let spec_version = self.spec_version();
        let mut parts = spec_version.split('.');
        let major = parts.next().unwrap_or_default();
        if parts.count() < 1 || major != SUPPORTED_SPEC_MAJOR {
            return Err(invalid(format!(
                "unsupported spec_version '{spec_version}' in {} metadata",
                self.role_type()
            )));
        }
        if self.version() < 1 {
            return Err(invalid(format!(
                "{} metadata version must be at least 1",
                self.role_type()
            )));
        }
        match self {
            Signed::Root(root) => root.validate(),
            Signed::Timestamp(timestamp) => timestamp.validate(),
            Signed::Snapshot(snapshot) => snapshot.validate(),
            Signed::Targets(targets) => targets.validate(),
        }
    }
}

/// Behaviour shared by the four payload kinds.
pub trait Payload: Sized {
    /// `_type` value of the payload.
    const TYPE: &'static str;

    fn from_signed(signed: Signed) -> std::result::Result<Self, Signed>;

    fn from_signed_ref(signed: &Signed) -> Option<&Self>;

    fn version(&self) -> u64;

    fn expires(&self) -> DateTime<Utc>;

    /// Expiry is inclusive: a document expiring exactly at `now` is expired.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires() <= now
    }
}

macro_rules! impl_payload {
    ($ty:ident, $name:expr) => {
        impl Payload for $ty {
            const TYPE: &'static str = $name;

            fn from_signed(signed: Signed) -> std::result::Result<Self, Signed> {
                match signed {
                    Signed::$ty(payload) => Ok(payload),
                    other => Err(other),
                }
            }

            fn from_signed_ref(signed: &Signed) -> Option<&Self> {
                match signed {
                    Signed::$ty(payload) => Some(payload),
                    _ => None,
                }
            }

            fn version(&self) -> u64 {
                self.version
            }

            fn expires(&self) -> DateTime<Utc> {
                self.expires
            }
        }

        impl From<$ty> for Signed {
            fn from(payload: $ty) -> Self {
                Signed::$ty(payload)
            }
        }
    };
}

impl_payload!(Root, ROOT);
impl_payload!(Timestamp, TIMESTAMP);
impl_payload!(Snapshot, SNAPSHOT);
impl_payload!(Targets, TARGETS);

/// Key IDs and signature threshold of a top-level role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub keyids: Vec<String>,
    pub threshold: u64,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Role {
    pub fn new(keyids: Vec<String>, threshold: u64) -> Self {
        Self {
            keyids,
            threshold,
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }
}

/// Payload of `root.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Root {
    pub spec_version: String,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub consistent_snapshot: Option<bool>,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: BTreeMap<String, Key>,
    pub roles: BTreeMap<String, Role>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Root {
    pub fn consistent_snapshot(&self) -> bool {
        self.consistent_snapshot.unwrap_or(false)
    }

    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    fn validate(&self) -> Result<()> {
        for name in TOP_LEVEL_ROLE_NAMES {
            if !self.roles.contains_key(name) {
                return Err(invalid(format!("root does not define the '{name}' role")));
            }
        }
        if let Some(extra) = self
            .roles
            .keys()
            .find(|name| !TOP_LEVEL_ROLE_NAMES.contains(&name.as_str()))
        {
            return Err(invalid(format!("root defines unknown role '{extra}'")));
        }
        for (name, role) in &self.roles {
            validate_threshold(name, role.threshold)?;
        }
        Ok(())
    }
}

/// Describes a metadata file another document refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub length: Option<u64>,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub hashes: Option<BTreeMap<String, String>>,
    pub version: u64,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl MetaFile {
    pub fn new(version: u64) -> Self {
        Self {
            length: None,
            hashes: None,
            version,
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }

    /// Checks `data` against the length and hashes, when they are listed.
    pub fn verify_length_and_hashes(&self, data: &[u8]) -> Result<()> {
        verify_length_and_hashes(data, self.length, self.hashes.as_ref())
    }
}

/// Payload of `timestamp.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Timestamp {
    /// The pinned description of the next snapshot.
    pub fn snapshot_meta(&self) -> Result<&MetaFile> {
        self.meta
            .get(&meta_file_name(SNAPSHOT))
            .ok_or_else(|| invalid("timestamp does not describe snapshot.json"))
    }

    fn validate(&self) -> Result<()> {
        let expected = meta_file_name(SNAPSHOT);
        if self.meta.len() != 1 || !self.meta.contains_key(&expected) {
            return Err(invalid("timestamp meta must contain exactly snapshot.json"));
        }
        Ok(())
    }
}

/// Payload of `snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, MetaFile>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Snapshot {
    /// Looks up the entry pinning a targets role (`<role>.json`).
    pub fn meta_for(&self, role: &str) -> Option<&MetaFile> {
        self.meta.get(&meta_file_name(role))
    }

    fn validate(&self) -> Result<()> {
        if !self.meta.contains_key(&meta_file_name(TARGETS)) {
            return Err(invalid("snapshot meta must describe targets.json"));
        }
        Ok(())
    }
}

/// Describes one target artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetFile {
    pub length: u64,
    pub hashes: BTreeMap<String, String>,
    /// An explicit `null` decodes to `Some(Value::Null)` and is re-encoded.
    #[serde(
        default,
        deserialize_with = "deserialize_nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub custom: Option<Value>,
    /// Target path; filled from the `targets` map key on decode.
    #[serde(skip)]
    pub path: String,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl TargetFile {
    /// Builds a target description for `data` with a sha256 hash.
    pub fn from_data(path: impl Into<String>, data: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256.to_string(), sha256_hex(data));
        Self {
            length: data.len() as u64,
            hashes,
            custom: None,
            path: path.into(),
            unrecognized_fields: UnrecognizedFields::new(),
        }
    }

    /// Checks `data` against the advertised length and every listed hash.
    pub fn verify_length_and_hashes(&self, data: &[u8]) -> Result<()> {
        verify_length_and_hashes(data, Some(self.length), Some(&self.hashes))
    }
}

/// Payload of `targets.json` and of delegated targets roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Targets {
    pub spec_version: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_targets")]
    pub targets: BTreeMap<String, TargetFile>,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub delegations: Option<Delegations>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Targets {
    fn validate(&self) -> Result<()> {
        match &self.delegations {
            Some(delegations) => delegations.validate(),
            None => Ok(()),
        }
    }
}

/// Decodes the `targets` map and stamps each entry with its path.
fn deserialize_targets<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, TargetFile>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut targets = BTreeMap::<String, TargetFile>::deserialize(deserializer)?;
    for (path, target) in targets.iter_mut() {
        target.path = path.clone();
    }
    Ok(targets)
}

/// Keeps an explicit `null` so the member survives re-encoding.
fn deserialize_nullable<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Optional typed members may be absent but never `null`: a dropped `null`
/// would change the canonical bytes the signatures cover.
fn deserialize_non_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer)? {
        Some(value) => Ok(Some(value)),
        None => Err(D::Error::custom("optional member is null")),
    }
}

/// Delegations a targets role makes to other roles.
///
/// Exactly one of `roles` (an ordered list) and `succinct_roles` (hash bins)
/// is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, Key>,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub roles: Option<Vec<DelegatedRole>>,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub succinct_roles: Option<SuccinctRoles>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl Delegations {
    fn validate(&self) -> Result<()> {
        match (&self.roles, &self.succinct_roles) {
            (Some(_), Some(_)) => Err(invalid(
                "delegations cannot carry both roles and succinct_roles",
            )),
            (None, None) => Err(invalid(
                "delegations must carry either roles or succinct_roles",
            )),
            (Some(roles), None) => {
                let mut seen = HashSet::new();
                for role in roles {
                    if TOP_LEVEL_ROLE_NAMES.contains(&role.name.as_str()) {
                        return Err(invalid(format!(
                            "delegated role name '{}' collides with a top-level role",
                            role.name
                        )));
                    }
                    if !seen.insert(role.name.as_str()) {
                        return Err(invalid(format!(
                            "delegated role '{}' is listed twice",
                            role.name
                        )));
                    }
                    role.validate()?;
                }
                Ok(())
            }
            (None, Some(succinct)) => succinct.validate(),
        }
    }
}

/// An entry of the ordered `roles` delegation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    pub keyids: Vec<String>,
    pub threshold: u64,
    pub terminating: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub paths: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_non_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub path_hash_prefixes: Option<Vec<String>>,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl DelegatedRole {
    fn validate(&self) -> Result<()> {
        validate_threshold(&self.name, self.threshold)?;
        if self.paths.is_some() && self.path_hash_prefixes.is_some() {
            return Err(invalid(format!(
                "delegated role '{}' sets both paths and path_hash_prefixes",
                self.name
            )));
        }
        Ok(())
    }
}

/// Hash-bin delegation covering the whole target path space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccinctRoles {
    pub keyids: Vec<String>,
    pub threshold: u64,
    pub bit_length: u32,
    pub name_prefix: String,
    #[serde(flatten)]
    pub unrecognized_fields: UnrecognizedFields,
}

impl SuccinctRoles {
    fn validate(&self) -> Result<()> {
        validate_threshold(&self.name_prefix, self.threshold)?;
        if !(1..=32).contains(&self.bit_length) {
            return Err(invalid(format!(
                "succinct_roles bit_length {} is outside 1..=32",
                self.bit_length
            )));
        }
        Ok(())
    }
}

fn validate_threshold(role: &str, threshold: u64) -> Result<()> {
    if threshold < 1 {
        return Err(invalid(format!("role '{role}' has a threshold below 1")));
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> MetadataError {
    MetadataError::Invalid(reason.into())
}
