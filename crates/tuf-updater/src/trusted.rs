//! The trusted metadata set: the live trust state and its transition guards.
//!
//! Documents are accepted strictly in order (root, timestamp, snapshot,
//! targets, delegated targets). Every `update_*` call either installs the
//! candidate or returns an error and leaves the trusted state untouched.
//!
//! The only state a rejected document can leave behind is a rollback
//! watermark: a correctly signed timestamp or snapshot that fails a finality
//! check (expiry, version pin) is not trusted, but the versions it carries
//! still bound what later candidates in the same refresh may present.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use tuf_metadata::{
    meta_file_name, MetaFile, Metadata, Payload, Root, Snapshot, Targets, Timestamp, ROOT,
    SNAPSHOT, TARGETS, TIMESTAMP,
};

use crate::error::{Result, UpdaterError};

/// Outcome of a timestamp update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUpdate {
    /// The candidate replaced the trusted timestamp.
    Applied,
    /// The candidate has the trusted version; nothing changed.
    Unchanged,
}

/// A root that passed the chained signature and version checks against the
/// root before it. Only [`TrustedMetadataSet::verify_root_candidate`] builds one.
#[derive(Debug, Clone)]
pub struct VerifiedRoot {
    root: Root,
}

impl VerifiedRoot {
    pub fn root(&self) -> &Root {
        &self.root
    }
}

/// In-memory trust state for one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustedMetadataSet {
    /// Reference time applied to every expiry check.
    reference_time: DateTime<Utc>,
    root: Root,
    timestamp: Option<Timestamp>,
    snapshot: Option<Snapshot>,
    /// Top-level `targets` plus every delegated role loaded so far.
    targets: BTreeMap<String, Targets>,
    /// Highest `(timestamp version, pinned snapshot version)` seen correctly signed.
    timestamp_watermark: Option<(u64, u64)>,
    /// Last correctly signed snapshot that passed the rollback checks, final or not.
    snapshot_baseline: Option<Snapshot>,
}

impl TrustedMetadataSet {
    /// Builds a root-only set from locally trusted root bytes.
    ///
    /// The root must carry a threshold of signatures from its own root role.
    /// Its expiry is checked later, once rotation settled on the final root.
    pub fn new(root_bytes: &[u8], reference_time: DateTime<Utc>) -> Result<Self> {
        let metadata = Metadata::from_bytes(root_bytes)?;
        let root = metadata.payload::<Root>()?;
        root.verify_delegate(ROOT, &metadata)?;
        debug!(version = root.version, "trusted: loaded trusted root");
        Ok(Self {
            reference_time,
            root: root.clone(),
            timestamp: None,
            snapshot: None,
            targets: BTreeMap::new(),
            timestamp_watermark: None,
            snapshot_baseline: None,
        })
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn timestamp(&self) -> Option<&Timestamp> {
        self.timestamp.as_ref()
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// The trusted top-level targets.
    pub fn targets(&self) -> Option<&Targets> {
        self.targets.get(TARGETS)
    }

    /// A trusted targets role by name, top-level or delegated.
    pub fn targets_role(&self, role: &str) -> Option<&Targets> {
        self.targets.get(role)
    }

    /// Every trusted targets role keyed by role name.
    pub fn all_targets(&self) -> &BTreeMap<String, Targets> {
        &self.targets
    }

    /// Checks `bytes` as the successor of `previous`.
    ///
    /// The candidate must be signed by the root role of `previous` and by its
    /// own root role, and its version must be exactly `previous.version + 1`.
    /// Expiry is not checked here.
    pub fn verify_root_candidate(previous: &Root, bytes: &[u8]) -> Result<VerifiedRoot> {
        let metadata = Metadata::from_bytes(bytes)?;
        let candidate = metadata.payload::<Root>()?;
        previous.verify_delegate(ROOT, &metadata)?;

        let expected = previous.version + 1;
        if candidate.version != expected {
            return Err(UpdaterError::BadVersion {
                role: ROOT.to_string(),
                expected,
                actual: candidate.version,
            });
        }
        candidate.verify_delegate(ROOT, &metadata)?;
        Ok(VerifiedRoot {
            root: candidate.clone(),
        })
    }

    /// Installs the final root of a rotation.
    pub fn install_root(&mut self, verified: VerifiedRoot) -> Result<()> {
        if self.timestamp.is_some() || self.timestamp_watermark.is_some() {
            return Err(UpdaterError::OutOfOrder(
                "cannot update root after timestamp".to_string(),
            ));
        }
        if verified.root.version <= self.root.version {
            return Err(UpdaterError::BadVersion {
                role: ROOT.to_string(),
                expected: self.root.version + 1,
                actual: verified.root.version,
            });
        }
        self.ensure_unexpired(ROOT, &verified.root)?;
        debug!(
            from = self.root.version,
            to = verified.root.version,
            "trusted: installed rotated root"
        );
        self.root = verified.root;
        Ok(())
    }

    /// Fails when the trusted root is expired.
    pub fn check_final_root(&self) -> Result<()> {
        self.ensure_unexpired(ROOT, &self.root)
    }

    /// Verifies and installs a timestamp.
    pub fn update_timestamp(&mut self, bytes: &[u8]) -> Result<TimestampUpdate> {
        if self.snapshot.is_some() {
            return Err(UpdaterError::OutOfOrder(
                "cannot update timestamp after snapshot".to_string(),
            ));
        }
        self.check_final_root()?;

        let metadata = Metadata::from_bytes(bytes)?;
        let candidate = metadata.payload::<Timestamp>()?;
        self.root.verify_delegate(TIMESTAMP, &metadata)?;
        let pinned = candidate.snapshot_meta()?.version;

        if let Some((floor, floor_snapshot)) = self.timestamp_watermark {
            if candidate.version < floor {
                return Err(UpdaterError::ReplayedMetadata {
                    role: TIMESTAMP.to_string(),
                    version: candidate.version,
                    trusted: floor,
                });
            }
            let unchanged = self
                .timestamp
                .as_ref()
                .is_some_and(|trusted| trusted.version == candidate.version);
            if unchanged {
                return Ok(TimestampUpdate::Unchanged);
            }
            if pinned < floor_snapshot {
                return Err(UpdaterError::ReplayedMetadata {
                    role: SNAPSHOT.to_string(),
                    version: pinned,
                    trusted: floor_snapshot,
                });
            }
        }

        self.timestamp_watermark = Some((candidate.version, pinned));
        self.ensure_unexpired(TIMESTAMP, candidate)?;
        debug!(version = candidate.version, snapshot = pinned, "trusted: accepted timestamp");
        self.timestamp = Some(candidate.clone());
        Ok(TimestampUpdate::Applied)
    }

    /// Verifies and installs a snapshot.
    ///
    /// `trusted_local` marks bytes read back from the local store: hashes are
    /// skipped since they were checked when the document was first stored.
    pub fn update_snapshot(&mut self, bytes: &[u8], trusted_local: bool) -> Result<()> {
        let Some(timestamp) = self.timestamp.as_ref() else {
            return Err(UpdaterError::OutOfOrder(
                "cannot update snapshot before timestamp".to_string(),
            ));
        };
        if !self.targets.is_empty() {
            return Err(UpdaterError::OutOfOrder(
                "cannot update snapshot after targets".to_string(),
            ));
        }
        self.ensure_unexpired(TIMESTAMP, timestamp)?;
        let pin = timestamp.snapshot_meta()?.clone();
        let consistent = self.root.consistent_snapshot();

        if !trusted_local {
            if let Err(err) = pin.verify_length_and_hashes(bytes) {
                if consistent {
                    return Err(UpdaterError::from(err));
                }
                warn!(error = %err, "trusted: snapshot does not match the timestamp pin");
            }
        }

        let metadata = Metadata::from_bytes(bytes)?;
        let candidate = metadata.payload::<Snapshot>()?;
        self.root.verify_delegate(SNAPSHOT, &metadata)?;

        if let Some(baseline) = &self.snapshot_baseline {
            check_snapshot_rollback(baseline, candidate)?;
        }
        // A signed snapshot bounds later candidates even when it is not final.
        self.snapshot_baseline = Some(candidate.clone());

        check_snapshot_pin(&pin, candidate, consistent, trusted_local)?;
        self.ensure_unexpired(SNAPSHOT, candidate)?;
        debug!(version = candidate.version, "trusted: accepted snapshot");
        self.snapshot = Some(candidate.clone());
        Ok(())
    }

    /// Verifies and installs the top-level targets.
    pub fn update_targets(&mut self, bytes: &[u8], trusted_local: bool) -> Result<()> {
        self.update_delegated_targets(bytes, TARGETS, ROOT, trusted_local)
    }

    /// Verifies and installs the targets role `role`, delegated by `delegator`.
    pub fn update_delegated_targets(
        &mut self,
        bytes: &[u8],
        role: &str,
        delegator: &str,
        trusted_local: bool,
    ) -> Result<()> {
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Err(UpdaterError::OutOfOrder(
                "cannot load targets before snapshot".to_string(),
            ));
        };
        self.ensure_unexpired(SNAPSHOT, snapshot)?;
        let meta = snapshot
            .meta_for(role)
            .ok_or_else(|| UpdaterError::MissingMetaEntry {
                referrer: SNAPSHOT.to_string(),
                role: meta_file_name(role),
            })?;
        if !trusted_local {
            meta.verify_length_and_hashes(bytes)?;
        }

        let metadata = Metadata::from_bytes(bytes)?;
        let candidate = metadata.payload::<Targets>()?;
        if delegator == ROOT {
            self.root.verify_delegate(role, &metadata)?;
        } else {
            let parent = self.targets.get(delegator).ok_or_else(|| {
                UpdaterError::OutOfOrder(format!(
                    "delegator '{delegator}' of '{role}' is not trusted"
                ))
            })?;
            parent.verify_delegate(role, &metadata)?;
        }

        if candidate.version != meta.version {
            return Err(UpdaterError::BadVersion {
                role: role.to_string(),
                expected: meta.version,
                actual: candidate.version,
            });
        }
        self.ensure_unexpired(role, candidate)?;
        debug!(role, version = candidate.version, "trusted: accepted targets");
        self.targets.insert(role.to_string(), candidate.clone());
        Ok(())
    }

    fn ensure_unexpired<T: Payload>(&self, role: &str, payload: &T) -> Result<()> {
        if payload.is_expired(self.reference_time) {
            return Err(UpdaterError::ExpiredMetadata {
                role: role.to_string(),
                expires: payload.expires().to_rfc3339(),
            });
        }
        Ok(())
    }
}

/// Checks a snapshot against the version the trusted timestamp pins.
///
/// Consistent snapshots and locally stored copies must carry the pinned
/// version; otherwise a newer snapshot is accepted with a warning and only an
/// older one is refused.
fn check_snapshot_pin(
    pin: &MetaFile,
    candidate: &Snapshot,
    consistent: bool,
    local: bool,
) -> Result<()> {
    let exact = consistent || local;
    if candidate.version == pin.version {
        return Ok(());
    }
    if exact {
        return Err(UpdaterError::BadVersion {
            role: SNAPSHOT.to_string(),
            expected: pin.version,
            actual: candidate.version,
        });
    }
    if candidate.version < pin.version {
        return Err(UpdaterError::ReplayedMetadata {
            role: SNAPSHOT.to_string(),
            version: candidate.version,
            trusted: pin.version,
        });
    }
    warn!(
        pinned = pin.version,
        version = candidate.version,
        "trusted: snapshot is newer than the timestamp pin"
    );
    Ok(())
}

/// Refuses a snapshot that drops a role or moves any role backwards.
fn check_snapshot_rollback(baseline: &Snapshot, candidate: &Snapshot) -> Result<()> {
    if candidate.version < baseline.version {
        return Err(UpdaterError::ReplayedMetadata {
            role: SNAPSHOT.to_string(),
            version: candidate.version,
            trusted: baseline.version,
        });
    }
    for (name, old) in &baseline.meta {
        let Some(new) = candidate.meta.get(name) else {
            return Err(UpdaterError::MissingMetaEntry {
                referrer: SNAPSHOT.to_string(),
                role: name.clone(),
            });
        };
        if new.version < old.version {
            return Err(UpdaterError::ReplayedMetadata {
                role: name.trim_end_matches(".json").to_string(),
                version: new.version,
                trusted: old.version,
            });
        }
    }
    Ok(())
}
