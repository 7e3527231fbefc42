// In-memory TUF repository that signs documents on demand.
//
// The simulator keeps one editable payload per role plus the signing keys of
// every role, and serves freshly signed bytes through the `Fetcher` trait so
// tests can publish new versions, rotate keys and add delegations between
// refreshes.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tuf_metadata::testing::{
    keys_map, root_payload, sign, snapshot_payload, targets_payload, timestamp_payload, TestKey,
};
use tuf_metadata::{
    meta_file_name, DelegatedRole, Delegations, MetaFile, Metadata, Role, Root, Signed, Snapshot,
    SuccinctRoles, TargetFile, Targets, Timestamp, UnrecognizedFields, ROOT, SNAPSHOT, TARGETS,
    TIMESTAMP,
};
use tuf_updater::{FetchError, Fetcher};

pub struct SimState {
    pub root: Root,
    pub timestamp: Timestamp,
    pub snapshot: Snapshot,
    /// Top-level `targets` plus delegated roles.
    pub targets: BTreeMap<String, Targets>,
    /// Signing keys per role name.
    pub signers: BTreeMap<String, Vec<TestKey>>,
    /// Published root documents; index 0 holds version 1.
    pub signed_roots: Vec<Vec<u8>>,
    pub target_files: BTreeMap<String, Vec<u8>>,
    /// Every metadata request as `(role, version)`.
    pub fetch_log: Vec<(String, Option<u64>)>,
    /// Roles answered with `NotFound` regardless of their payload.
    pub unpublished: BTreeSet<String>,
}

#[derive(Clone)]
pub struct RepositorySimulator {
    state: Arc<Mutex<SimState>>,
}

impl RepositorySimulator {
    /// A repository with one key per top-level role and version 1 of everything.
    pub fn new() -> Self {
        let keys: Vec<TestKey> = (1..=4).map(TestKey::ed25519_from_seed).collect();
        let mut root = root_payload(1, &keys, 1);
        let mut signers = BTreeMap::new();
        for (key, role) in keys.iter().zip([ROOT, TIMESTAMP, SNAPSHOT, TARGETS]) {
            root.roles
                .insert(role.to_string(), Role::new(vec![key.id().to_string()], 1));
            signers.insert(role.to_string(), vec![key.clone()]);
        }
        let mut targets = BTreeMap::new();
        targets.insert(TARGETS.to_string(), targets_payload(1));

        let sim = Self {
            state: Arc::new(Mutex::new(SimState {
                root,
                timestamp: timestamp_payload(1, 1),
                snapshot: snapshot_payload(1, &[(TARGETS, 1)]),
                targets,
                signers,
                signed_roots: Vec::new(),
                target_files: BTreeMap::new(),
                fetch_log: Vec::new(),
                unpublished: BTreeSet::new(),
            })),
        };
        sim.publish_root();
        sim
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Bytes of the published root `version`, used to bootstrap clients.
    pub fn root_bytes(&self, version: u64) -> Vec<u8> {
        self.state().signed_roots[(version - 1) as usize].clone()
    }

    /// Signs the current root payload with the root signers and publishes it.
    pub fn publish_root(&self) {
        let keys = self.state().signers[ROOT].clone();
        self.publish_root_signed_by(&keys.iter().collect::<Vec<_>>());
    }

    pub fn publish_root_signed_by(&self, keys: &[&TestKey]) {
        let mut state = self.state();
        let mut metadata = Metadata::new(state.root.clone());
        sign(&mut metadata, keys);
        let bytes = metadata.to_bytes().unwrap();
        state.signed_roots.push(bytes);
    }

    /// Bumps the root version and publishes it signed by the current root keys.
    pub fn bump_root(&self) {
        self.state().root.version += 1;
        self.publish_root();
    }

    /// Replaces the root keys; the next published root is signed by old and new keys.
    pub fn rotate_root_key(&self, new_key: TestKey) {
        let old = {
            let mut state = self.state();
            let old = state.signers[ROOT].clone();
            state.root.version += 1;
            state
                .root
                .keys
                .insert(new_key.id().to_string(), new_key.key().clone());
            state.root.roles.insert(
                ROOT.to_string(),
                Role::new(vec![new_key.id().to_string()], 1),
            );
            state.signers.insert(ROOT.to_string(), vec![new_key.clone()]);
            old
        };
        let mut keys: Vec<&TestKey> = old.iter().collect();
        keys.push(&new_key);
        self.publish_root_signed_by(&keys);
    }

    /// Publishes a new timestamp pinning the current snapshot.
    pub fn update_timestamp(&self) {
        let mut state = self.state();
        let snapshot_version = state.snapshot.version;
        state.timestamp.version += 1;
        state.timestamp.meta.insert(
            meta_file_name(SNAPSHOT),
            MetaFile::new(snapshot_version),
        );
    }

    /// Publishes a new snapshot listing every targets role, then a new timestamp.
    pub fn update_snapshot(&self) {
        {
            let mut state = self.state();
            let meta: Vec<(String, u64)> = state
                .targets
                .iter()
                .map(|(role, targets)| (meta_file_name(role), targets.version))
                .collect();
            for (name, version) in meta {
                state.snapshot.meta.insert(name, MetaFile::new(version));
            }
            state.snapshot.version += 1;
        }
        self.update_timestamp();
    }

    /// Bumps a targets role and republishes snapshot and timestamp.
    pub fn bump_targets(&self, role: &str) {
        self.state()
            .targets
            .get_mut(role)
            .expect("known targets role")
            .version += 1;
        self.update_snapshot();
    }

    /// Adds a target file to `role` without republishing.
    pub fn add_target(&self, role: &str, path: &str, data: &[u8]) {
        let mut state = self.state();
        let target = TargetFile::from_data(path, data);
        state
            .targets
            .get_mut(role)
            .expect("known targets role")
            .targets
            .insert(path.to_string(), target.clone());
        let hash = &target.hashes["sha256"];
        let stored = match path.rsplit_once('/') {
            Some((dir, name)) => format!("{dir}/{hash}.{name}"),
            None => format!("{hash}.{path}"),
        };
        state.target_files.insert(stored, data.to_vec());
    }

    /// Delegates `paths` from `delegator` to a new role signed by `key`.
    pub fn add_delegation(
        &self,
        delegator: &str,
        role: &str,
        paths: &[&str],
        terminating: bool,
        key: TestKey,
    ) {
        let mut state = self.state();
        let parent = state.targets.get_mut(delegator).expect("known delegator");
        let delegations = parent.delegations.get_or_insert_with(|| Delegations {
            keys: BTreeMap::new(),
            roles: Some(Vec::new()),
            succinct_roles: None,
            unrecognized_fields: UnrecognizedFields::new(),
        });
        delegations
            .keys
            .insert(key.id().to_string(), key.key().clone());
        delegations
            .roles
            .get_or_insert_with(Vec::new)
            .push(DelegatedRole {
                name: role.to_string(),
                keyids: vec![key.id().to_string()],
                threshold: 1,
                terminating,
                paths: Some(paths.iter().map(|path| path.to_string()).collect()),
                path_hash_prefixes: None,
                unrecognized_fields: UnrecognizedFields::new(),
            });
        state.targets.insert(role.to_string(), targets_payload(1));
        state.signers.insert(role.to_string(), vec![key]);
    }

    /// Replaces the delegations of `delegator` with hash bins signed by `key`.
    pub fn add_succinct_roles(&self, delegator: &str, bit_length: u32, prefix: &str, key: TestKey) {
        let succinct = SuccinctRoles {
            keyids: vec![key.id().to_string()],
            threshold: 1,
            bit_length,
            name_prefix: prefix.to_string(),
            unrecognized_fields: UnrecognizedFields::new(),
        };
        let mut state = self.state();
        for bin in succinct.role_names() {
            state.targets.insert(bin.clone(), targets_payload(1));
            state.signers.insert(bin, vec![key.clone()]);
        }
        let parent = state.targets.get_mut(delegator).expect("known delegator");
        parent.delegations = Some(Delegations {
            keys: keys_map(&[key]),
            roles: None,
            succinct_roles: Some(succinct),
            unrecognized_fields: UnrecognizedFields::new(),
        });
    }

    /// Serves `role` as missing until republished.
    pub fn unpublish(&self, role: &str) {
        self.state().unpublished.insert(role.to_string());
    }

    /// Metadata requests for `role` so far.
    pub fn fetch_count(&self, role: &str) -> usize {
        self.state()
            .fetch_log
            .iter()
            .filter(|(logged, _)| logged == role)
            .count()
    }

    fn signed_bytes(state: &SimState, role: &str, payload: Signed) -> Vec<u8> {
        let mut metadata = Metadata::new(payload);
        let signers: Vec<&TestKey> = state.signers[role].iter().collect();
        sign(&mut metadata, &signers);
        metadata.to_bytes().unwrap()
    }

    fn serve(&self, role: &str, version: Option<u64>) -> Result<Vec<u8>, FetchError> {
        let mut state = self.state();
        state.fetch_log.push((role.to_string(), version));
        let not_found = || FetchError::NotFound(role.to_string());
        if state.unpublished.contains(role) {
            return Err(not_found());
        }
        match role {
            ROOT => {
                let version = version.ok_or_else(not_found)?;
                state
                    .signed_roots
                    .get((version as usize).wrapping_sub(1))
                    .cloned()
                    .ok_or_else(not_found)
            }
            TIMESTAMP => Ok(Self::signed_bytes(
                &state,
                TIMESTAMP,
                state.timestamp.clone().into(),
            )),
            SNAPSHOT => {
                if version.is_some_and(|v| v != state.snapshot.version) {
                    return Err(not_found());
                }
                Ok(Self::signed_bytes(&state, SNAPSHOT, state.snapshot.clone().into()))
            }
            _ => {
                let targets = state.targets.get(role).cloned().ok_or_else(not_found)?;
                if version.is_some_and(|v| v != targets.version) {
                    return Err(not_found());
                }
                Ok(Self::signed_bytes(&state, role, targets.into()))
            }
        }
    }
}

#[async_trait]
impl Fetcher for RepositorySimulator {
    async fn fetch_metadata(
        &self,
        role: &str,
        version: Option<u64>,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let bytes = self.serve(role, version)?;
        if bytes.len() as u64 > max_length {
            return Err(FetchError::LengthExceeded {
                name: role.to_string(),
                max_length,
            });
        }
        Ok(bytes)
    }

    async fn fetch_target(&self, path: &str, max_length: u64) -> Result<Vec<u8>, FetchError> {
        let state = self.state();
        let bytes = state
            .target_files
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))?;
        if bytes.len() as u64 > max_length {
            return Err(FetchError::LengthExceeded {
                name: path.to_string(),
                max_length,
            });
        }
        Ok(bytes)
    }
}
