//! Root rotation: walk root versions forward one at a time.
//!
//! Each candidate is checked against the root immediately before it, so every
//! transfer of trust is signed by both the outgoing and the incoming keys.
//! Only the final root of the walk has to be unexpired; nothing is installed
//! when it is not.

use tracing::{debug, warn};
use tuf_metadata::ROOT;

use crate::error::{Result, UpdaterError};
use crate::fetcher::{FetchError, Fetcher};
use crate::store::MetadataStore;
use crate::trusted::{TrustedMetadataSet, VerifiedRoot};

/// Bounds applied to one rotation walk.
#[derive(Debug, Clone, Copy)]
pub struct RotationLimits {
    /// Maximum number of new root versions consumed.
    pub max_rotations: u32,
    /// Upper bound on each root document.
    pub max_length: u64,
}

/// Result of a rotation walk that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Number of new root versions consumed.
    pub rotations: u32,
    /// Trusted root version after the walk.
    pub version: u64,
    /// Bytes of the newly installed root, if the root changed.
    pub root_bytes: Option<Vec<u8>>,
}

impl RotationOutcome {
    /// Whether the walk stopped because it hit the rotation limit.
    pub fn limit_reached(&self, limits: &RotationLimits) -> bool {
        self.rotations >= limits.max_rotations
    }
}

/// Walks root versions forward from the trusted root in `trusted`.
///
/// A missing next version ends the walk. A candidate that fails verification
/// also ends it, with a warning, keeping the roots accepted before it. The
/// final root is persisted under `root` once installed. When the final root
/// is expired nothing is installed; hitting the rotation limit on the way is
/// then reported as [`UpdaterError::MaxRotationsExceeded`].
pub async fn rotate_root<F, S>(
    trusted: &mut TrustedMetadataSet,
    fetcher: &F,
    store: &S,
    limits: RotationLimits,
) -> Result<RotationOutcome>
where
    F: Fetcher + ?Sized,
    S: MetadataStore + ?Sized,
{
    let start = trusted.root().version;
    let mut accepted: Option<(VerifiedRoot, Vec<u8>)> = None;
    let mut rotations = 0u32;

    while rotations < limits.max_rotations {
        let previous = match &accepted {
            Some((verified, _)) => verified.root(),
            None => trusted.root(),
        };
        let next_version = previous.version + 1;
        let bytes = match fetcher
            .fetch_metadata(ROOT, Some(next_version), limits.max_length)
            .await
        {
            Ok(bytes) => bytes,
            Err(FetchError::NotFound(_)) => break,
            Err(err) => return Err(err.into()),
        };
        match TrustedMetadataSet::verify_root_candidate(previous, &bytes) {
            Ok(verified) => {
                debug!(version = next_version, "rotation: root candidate verified");
                accepted = Some((verified, bytes));
                rotations += 1;
            }
            Err(err) => {
                warn!(version = next_version, error = %err, "rotation: rejected root candidate, stopping");
                break;
            }
        }
    }

    let mut root_bytes = None;
    if let Some((verified, bytes)) = accepted {
        let version = verified.root().version;
        match trusted.install_root(verified) {
            Ok(()) => {
                store.persist_role(ROOT, &bytes)?;
                root_bytes = Some(bytes);
            }
            Err(UpdaterError::ExpiredMetadata { role, expires }) => {
                warn!(
                    version,
                    trusted = start,
                    "rotation: final root is expired, keeping the previous root"
                );
                if rotations >= limits.max_rotations {
                    return Err(UpdaterError::MaxRotationsExceeded {
                        rotations,
                        version: start,
                    });
                }
                return Err(UpdaterError::ExpiredMetadata { role, expires });
            }
            Err(err) => return Err(err),
        }
    }

    let version = trusted.root().version;
    if rotations > 0 {
        debug!(from = start, to = version, rotations, "rotation: root updated");
    }
    Ok(RotationOutcome {
        rotations,
        version,
        root_bytes,
    })
}

/// Reports whether the repository publishes a root after `version`.
pub async fn next_root_available<F>(fetcher: &F, version: u64, max_length: u64) -> Result<bool>
where
    F: Fetcher + ?Sized,
{
    match fetcher
        .fetch_metadata(ROOT, Some(version + 1), max_length)
        .await
    {
        Ok(_) => Ok(true),
        Err(FetchError::NotFound(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}
