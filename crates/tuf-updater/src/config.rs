//! Updater configuration and the current-time source.
//!
//! Defaults match the limits common TUF clients ship with. Overrides can be read from an
//! iterator of key/value pairs so embedders decide where they come from.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::warn;

const ENV_MAX_ROOT_ROTATIONS: &str = "TUF_MAX_ROOT_ROTATIONS";
const ENV_MAX_DELEGATIONS: &str = "TUF_MAX_DELEGATIONS";
const ENV_ROOT_MAX_LENGTH: &str = "TUF_ROOT_MAX_LENGTH";
const ENV_TIMESTAMP_MAX_LENGTH: &str = "TUF_TIMESTAMP_MAX_LENGTH";
const ENV_SNAPSHOT_MAX_LENGTH: &str = "TUF_SNAPSHOT_MAX_LENGTH";
const ENV_TARGETS_MAX_LENGTH: &str = "TUF_TARGETS_MAX_LENGTH";
const ENV_PREFIX_TARGETS_WITH_HASH: &str = "TUF_PREFIX_TARGETS_WITH_HASH";
const ENV_FAIL_ON_MAX_ROTATIONS: &str = "TUF_FAIL_ON_MAX_ROTATIONS";

/// Tunables consumed by [`crate::Updater`].
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    /// Maximum number of new root versions consumed by one refresh.
    pub max_root_rotations: u32,
    /// Maximum number of delegated roles visited while resolving one target.
    pub max_delegations: u32,
    /// Upper bound on root document size.
    pub root_max_length: u64,
    /// Upper bound on timestamp document size.
    pub timestamp_max_length: u64,
    /// Upper bound on snapshot size when the timestamp does not pin a length.
    pub snapshot_max_length: u64,
    /// Upper bound on targets size when the snapshot does not pin a length.
    pub targets_max_length: u64,
    /// Prefix target file names with their sha256 under consistent snapshots.
    pub prefix_targets_with_hash: bool,
    /// Report [`crate::UpdaterError::MaxRotationsExceeded`] when more root
    /// versions remain after the rotation limit instead of stopping silently.
    pub fail_on_max_rotations: bool,
    /// Bootstrap root bytes. When absent the root is loaded from the store.
    pub trusted_root: Option<Vec<u8>>,
    /// Directory for downloaded targets; required by the download helpers.
    pub local_targets_dir: Option<PathBuf>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            max_root_rotations: 32,
            max_delegations: 32,
            root_max_length: 512_000,
            timestamp_max_length: 16_384,
            snapshot_max_length: 2_000_000,
            targets_max_length: 5_000_000,
            prefix_targets_with_hash: true,
            fail_on_max_rotations: false,
            trusted_root: None,
            local_targets_dir: None,
        }
    }
}

impl UpdaterConfig {
    /// Applies overrides from the process environment.
    pub fn apply_os_env(self) -> Self {
        self.apply_env(env::vars())
    }

    /// Applies overrides from an iterator of key/value pairs.
    ///
    /// Unparseable values are ignored and the current setting is kept.
    pub fn apply_env<I, K, V>(mut self, iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        override_number(&map, ENV_MAX_ROOT_ROTATIONS, &mut self.max_root_rotations);
        override_number(&map, ENV_MAX_DELEGATIONS, &mut self.max_delegations);
        override_number(&map, ENV_ROOT_MAX_LENGTH, &mut self.root_max_length);
        override_number(&map, ENV_TIMESTAMP_MAX_LENGTH, &mut self.timestamp_max_length);
        override_number(&map, ENV_SNAPSHOT_MAX_LENGTH, &mut self.snapshot_max_length);
        override_number(&map, ENV_TARGETS_MAX_LENGTH, &mut self.targets_max_length);
        self.prefix_targets_with_hash = parse_bool(
            map.get(ENV_PREFIX_TARGETS_WITH_HASH).map(String::as_str),
            self.prefix_targets_with_hash,
        );
        self.fail_on_max_rotations = parse_bool(
            map.get(ENV_FAIL_ON_MAX_ROTATIONS).map(String::as_str),
            self.fail_on_max_rotations,
        );
        self
    }
}

fn override_number<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, slot: &mut T) {
    let Some(raw) = map.get(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "config: ignoring malformed override"),
    }
}

/// Parses boolean values from strings, falling back to the provided default.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(|s| s.trim().to_ascii_lowercase()) {
        Some(ref v) if ["1", "true", "t", "yes", "y"].contains(&v.as_str()) => true,
        Some(ref v) if ["0", "false", "f", "no", "n"].contains(&v.as_str()) => false,
        _ => default,
    }
}

/// Source of the reference time used for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracing_test::traced_test;

    /// Defaults cover every limit.
    #[test]
    fn defaults_are_conservative_limits() {
        let config = UpdaterConfig::default();
        assert_eq!(config.max_root_rotations, 32);
        assert_eq!(config.max_delegations, 32);
        assert_eq!(config.root_max_length, 512_000);
        assert_eq!(config.timestamp_max_length, 16_384);
        assert!(config.prefix_targets_with_hash);
        assert!(!config.fail_on_max_rotations);
        assert!(config.trusted_root.is_none());
    }

    /// Overrides apply, malformed values keep the previous setting.
    #[test]
    #[traced_test]
    fn env_overrides_apply() {
        let config = UpdaterConfig::default().apply_env(vec![
            (ENV_MAX_ROOT_ROTATIONS, "3"),
            (ENV_MAX_DELEGATIONS, "not-a-number"),
            (ENV_TARGETS_MAX_LENGTH, " 42 "),
            (ENV_PREFIX_TARGETS_WITH_HASH, "no"),
            (ENV_FAIL_ON_MAX_ROTATIONS, "TRUE"),
        ]);
        assert_eq!(config.max_root_rotations, 3);
        assert_eq!(config.max_delegations, 32);
        assert_eq!(config.targets_max_length, 42);
        assert!(!config.prefix_targets_with_hash);
        assert!(config.fail_on_max_rotations);
        assert!(logs_contain("config: ignoring malformed override"));
    }

    #[test]
    fn fixed_clock_is_frozen() {
        let instant = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let clock = FixedClock(instant);
        assert_eq!(clock.now(), instant);
        assert_eq!(clock.now(), clock.now());
    }
}
