//! The updater: drives a refresh and answers target lookups.
//!
//! A refresh walks the roles in their dependency order: root rotation, then
//! timestamp, snapshot and top-level targets. Delegated targets are loaded on
//! demand while resolving a target path. Locally stored copies are tried
//! before the network for snapshot and targets, and only newly accepted
//! remote documents are persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use tuf_metadata::{TargetFile, Targets, ROOT, SNAPSHOT, TARGETS, TIMESTAMP};

use crate::config::{Clock, SystemClock, UpdaterConfig};
use crate::error::{Result, UpdaterError};
use crate::fetcher::{encode_file_name, Fetcher};
use crate::resolver::{find_target, TargetsLoader};
use crate::rotation::{next_root_available, rotate_root, RotationLimits};
use crate::store::{write_atomically, MetadataStore};
use crate::trusted::{TimestampUpdate, TrustedMetadataSet};

/// Client-side TUF updater over a fetcher and a local metadata store.
pub struct Updater<F, S> {
    /// Tunables and bootstrap material.
    config: UpdaterConfig,
    /// Source of remote metadata and target bytes.
    fetcher: F,
    /// Durable copy of the last trusted documents.
    store: S,
    /// Reference time source for expiry checks.
    clock: Arc<dyn Clock>,
    /// Bytes of the root every refresh starts from.
    root_bytes: Vec<u8>,
    /// Trust state built by the latest refresh.
    trusted: TrustedMetadataSet,
}

impl<F, S> std::fmt::Debug for Updater<F, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("config", &self.config)
            .field("trusted", &self.trusted)
            .finish_non_exhaustive()
    }
}

impl<F, S> Updater<F, S>
where
    F: Fetcher,
    S: MetadataStore,
{
    /// Builds an updater that checks expiry against the system clock.
    pub fn new(config: UpdaterConfig, fetcher: F, store: S) -> Result<Self> {
        Self::with_clock(config, fetcher, store, Arc::new(SystemClock))
    }

    /// Builds an updater with an explicit time source.
    ///
    /// The bootstrap root comes from `config.trusted_root` when set and from
    /// the store otherwise. It must verify against its own root role; any
    /// failure here is fatal and nothing is persisted.
    pub fn with_clock(
        config: UpdaterConfig,
        fetcher: F,
        store: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let stored = store.load_role(ROOT)?;
        let (root_bytes, from_config) = match (&config.trusted_root, stored.as_ref()) {
            (Some(bootstrap), _) => (bootstrap.clone(), true),
            (None, Some(stored)) => (stored.clone(), false),
            (None, None) => return Err(UpdaterError::MissingTrustedRoot),
        };
        let trusted = TrustedMetadataSet::new(&root_bytes, clock.now())?;
        if from_config && stored.as_deref() != Some(root_bytes.as_slice()) {
            store.persist_role(ROOT, &root_bytes)?;
        }
        info!(
            version = trusted.root().version,
            "updater: bootstrapped trusted root"
        );
        Ok(Self {
            config,
            fetcher,
            store,
            clock,
            root_bytes,
            trusted,
        })
    }

    /// The trust state built by the latest refresh.
    pub fn trusted(&self) -> &TrustedMetadataSet {
        &self.trusted
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Refreshes root, timestamp, snapshot and top-level targets.
    ///
    /// Each refresh restarts from a root-only trust state. An error aborts the
    /// refresh at the failing step; every document trusted before that step
    /// stays trusted.
    pub async fn refresh(&mut self) -> Result<()> {
        self.trusted = TrustedMetadataSet::new(&self.root_bytes, self.clock.now())?;

        let limits = RotationLimits {
            max_rotations: self.config.max_root_rotations,
            max_length: self.config.root_max_length,
        };
        let outcome = rotate_root(&mut self.trusted, &self.fetcher, &self.store, limits).await?;
        if let Some(bytes) = &outcome.root_bytes {
            self.root_bytes = bytes.clone();
        }
        if outcome.limit_reached(&limits)
            && self.config.fail_on_max_rotations
            && next_root_available(&self.fetcher, outcome.version, limits.max_length).await?
        {
            return Err(UpdaterError::MaxRotationsExceeded {
                rotations: outcome.rotations,
                version: outcome.version,
            });
        }
        self.trusted.check_final_root()?;

        self.load_timestamp().await?;
        self.load_snapshot().await?;
        self.load_targets(TARGETS, ROOT).await?;
        debug!(
            root = self.trusted.root().version,
            timestamp = self.trusted.timestamp().map(|t| t.version),
            snapshot = self.trusted.snapshot().map(|s| s.version),
            targets = self.trusted.targets().map(|t| t.version),
            "updater: refresh complete"
        );
        Ok(())
    }

    /// Resolves the verified description of `target_path`.
    ///
    /// Refreshes first when no top-level targets are trusted yet, then walks
    /// the delegation graph, loading delegated roles as needed.
    pub async fn get_target_info(&mut self, target_path: &str) -> Result<Option<TargetFile>> {
        if self.trusted.targets().is_none() {
            self.refresh().await?;
        }
        let max_delegations = self.config.max_delegations;
        find_target(self, target_path, max_delegations).await
    }

    /// Downloads a target, verifies it against `info` and stores it.
    ///
    /// Writes to `file_path`, or to the configured targets directory when not
    /// given. Returns the path written.
    pub async fn download_target(
        &self,
        info: &TargetFile,
        file_path: Option<&Path>,
    ) -> Result<PathBuf> {
        let destination = self.target_destination(info, file_path)?;
        let remote_path = self.remote_target_path(info);
        let bytes = self.fetcher.fetch_target(&remote_path, info.length).await?;
        info.verify_length_and_hashes(&bytes)?;
        write_atomically(&destination, &bytes)?;
        debug!(
            target = %info.path,
            path = %destination.display(),
            "updater: downloaded target"
        );
        Ok(destination)
    }

    /// Returns the local copy of a target when it still matches `info`.
    pub fn find_cached_target(
        &self,
        info: &TargetFile,
        file_path: Option<&Path>,
    ) -> Result<Option<PathBuf>> {
        let destination = self.target_destination(info, file_path)?;
        let bytes = match std::fs::read(&destination) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(UpdaterError::Store(err.into())),
        };
        match info.verify_length_and_hashes(&bytes) {
            Ok(()) => Ok(Some(destination)),
            Err(err) => {
                debug!(target = %info.path, error = %err, "updater: cached target is stale");
                Ok(None)
            }
        }
    }

    fn target_destination(&self, info: &TargetFile, file_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = file_path {
            return Ok(path.to_path_buf());
        }
        let dir = self.config.local_targets_dir.as_ref().ok_or_else(|| {
            UpdaterError::Config("no target path given and no local targets directory set".into())
        })?;
        Ok(dir.join(encode_file_name(&info.path)))
    }

    /// Repository path of a target, hash-prefixed under consistent snapshots.
    fn remote_target_path(&self, info: &TargetFile) -> String {
        let prefix = self.config.prefix_targets_with_hash
            && self.trusted.root().consistent_snapshot();
        let hash = info
            .hashes
            .get(tuf_metadata::hashes::SHA256)
            .or_else(|| info.hashes.values().next());
        match (prefix, hash) {
            (true, Some(hash)) => match info.path.rsplit_once('/') {
                Some((dir, name)) => format!("{dir}/{hash}.{name}"),
                None => format!("{hash}.{}", info.path),
            },
            _ => info.path.clone(),
        }
    }

    async fn load_timestamp(&mut self) -> Result<()> {
        if let Some(bytes) = self.store.load_role(TIMESTAMP)? {
            match self.trusted.update_timestamp(&bytes) {
                Ok(_) => debug!("updater: local timestamp is valid"),
                Err(err) => debug!(error = %err, "updater: local timestamp not valid as final"),
            }
        }
        let bytes = self
            .fetcher
            .fetch_metadata(TIMESTAMP, None, self.config.timestamp_max_length)
            .await?;
        match self.trusted.update_timestamp(&bytes)? {
            TimestampUpdate::Applied => self.store.persist_role(TIMESTAMP, &bytes)?,
            TimestampUpdate::Unchanged => debug!("updater: remote timestamp unchanged"),
        }
        Ok(())
    }

    async fn load_snapshot(&mut self) -> Result<()> {
        if let Some(bytes) = self.store.load_role(SNAPSHOT)? {
            match self.trusted.update_snapshot(&bytes, true) {
                Ok(()) => {
                    debug!("updater: local snapshot is valid");
                    return Ok(());
                }
                Err(err) => debug!(error = %err, "updater: local snapshot not valid as final"),
            }
        }
        let (max_length, version) = {
            let timestamp = self.trusted.timestamp().ok_or_else(|| {
                UpdaterError::OutOfOrder("cannot load snapshot before timestamp".to_string())
            })?;
            let meta = timestamp.snapshot_meta()?;
            (
                meta.length.unwrap_or(self.config.snapshot_max_length),
                self.trusted
                    .root()
                    .consistent_snapshot()
                    .then_some(meta.version),
            )
        };
        let bytes = self
            .fetcher
            .fetch_metadata(SNAPSHOT, version, max_length)
            .await?;
        self.trusted.update_snapshot(&bytes, false)?;
        self.store.persist_role(SNAPSHOT, &bytes)?;
        Ok(())
    }

    /// Returns the trusted `role`, loading it from the store or the repository.
    async fn load_targets(&mut self, role: &str, delegator: &str) -> Result<Targets> {
        if let Some(targets) = self.trusted.targets_role(role) {
            return Ok(targets.clone());
        }
        if let Some(bytes) = self.store.load_role(role)? {
            match self
                .trusted
                .update_delegated_targets(&bytes, role, delegator, true)
            {
                Ok(()) => {
                    debug!(role, "updater: local targets are valid");
                    return self.trusted_targets(role);
                }
                Err(err) => debug!(role, error = %err, "updater: local targets not valid as final"),
            }
        }

        let (max_length, version) = {
            let snapshot = self.trusted.snapshot().ok_or_else(|| {
                UpdaterError::OutOfOrder(format!("cannot load '{role}' before snapshot"))
            })?;
            let meta = snapshot
                .meta_for(role)
                .ok_or_else(|| UpdaterError::MissingMetaEntry {
                    referrer: SNAPSHOT.to_string(),
                    role: tuf_metadata::meta_file_name(role),
                })?;
            (
                meta.length.unwrap_or(self.config.targets_max_length),
                self.trusted
                    .root()
                    .consistent_snapshot()
                    .then_some(meta.version),
            )
        };
        let bytes = self.fetcher.fetch_metadata(role, version, max_length).await?;
        self.trusted
            .update_delegated_targets(&bytes, role, delegator, false)?;
        self.store.persist_role(role, &bytes)?;
        self.trusted_targets(role)
    }

    fn trusted_targets(&self, role: &str) -> Result<Targets> {
        self.trusted
            .targets_role(role)
            .cloned()
            .ok_or_else(|| UpdaterError::OutOfOrder(format!("'{role}' is not trusted")))
    }
}

#[async_trait]
impl<F, S> TargetsLoader for Updater<F, S>
where
    F: Fetcher,
    S: MetadataStore,
{
    async fn load_targets(&mut self, role: &str, delegator: &str) -> Result<Targets> {
        Updater::load_targets(self, role, delegator).await
    }
}
