//! Local persistence for trusted role documents.
//!
//! The trust engine only needs "load the last trusted bytes for a role" and
//! "durably replace them". Two stock stores are provided: a directory of
//! `<role>.json` files and a sled database.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sled::{Config as SledConfig, Db, Tree};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::fetcher::encode_file_name;

/// Tree holding role documents keyed by role name.
const ROLES_TREE: &str = "roles";

/// Errors emitted by metadata stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable storage for the last trusted bytes of each role.
pub trait MetadataStore: Send + Sync {
    /// Returns the stored document, or `None` when the role was never persisted.
    fn load_role(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Atomically replaces the stored document for `role`.
    fn persist_role(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

impl<S: MetadataStore + ?Sized> MetadataStore for Arc<S> {
    fn load_role(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).load_role(role)
    }

    fn persist_role(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).persist_role(role, bytes)
    }
}

/// Stores each role as `<dir>/<role>.json`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    /// Uses `dir`, creating it when missing.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn role_path(&self, role: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_name(role)))
    }
}

impl MetadataStore for DirectoryStore {
    fn load_role(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.role_path(role)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn persist_role(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomically(&self.role_path(role), bytes)
    }
}

/// Writes `bytes` to a temporary sibling of `path` and renames it into place.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| StoreError::Io(err.error))?;
    Ok(())
}

/// Stores role documents in a sled database.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    roles: Tree,
    path: PathBuf,
}

impl SledStore {
    /// Opens (or creates) a store at the provided path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled only creates the final directory.
                fs::create_dir_all(parent)?;
            }
        }
        let db = SledConfig::new().path(&path).open()?;
        Self::from_db(db, path)
    }

    /// Opens an in-memory store (ephemeral across restarts).
    pub fn open_ephemeral() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Self::from_db(db, PathBuf::new())
    }

    fn from_db(db: Db, path: PathBuf) -> Result<Self, StoreError> {
        let roles = db.open_tree(ROLES_TREE)?;
        Ok(Self { db, roles, path })
    }

    /// Returns the filesystem path backing the store.
    ///
    /// Empty for ephemeral stores.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

impl MetadataStore for SledStore {
    fn load_role(&self, role: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.roles.get(role.as_bytes())?.map(|value| value.to_vec()))
    }

    fn persist_role(&self, role: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.roles.insert(role.as_bytes(), bytes)?;
        self.flush()
    }
}
