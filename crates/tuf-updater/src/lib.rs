//! Client-side TUF trust engine.
//!
//! Starting from a locally trusted root, an [`Updater`] rotates the root,
//! refreshes timestamp, snapshot and targets from a [`Fetcher`], persists
//! accepted documents to a [`MetadataStore`] and resolves target paths
//! through the delegation graph. Every transition is checked by the
//! [`TrustedMetadataSet`].

pub mod config;
pub mod error;
pub mod fetcher;
pub mod resolver;
pub mod rotation;
pub mod store;
pub mod trusted;
pub mod updater;

pub use config::{Clock, FixedClock, SystemClock, UpdaterConfig};
pub use error::{Result, UpdaterError};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use store::{DirectoryStore, MetadataStore, SledStore, StoreError};
pub use trusted::{TimestampUpdate, TrustedMetadataSet, VerifiedRoot};
pub use updater::Updater;
