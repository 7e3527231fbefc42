//! Fetch collaborator: where metadata and target bytes come from.
//!
//! The trust engine only sees the [`Fetcher`] trait. [`HttpFetcher`] is the
//! stock implementation and speaks to a plain static-file repository over
//! HTTP(S): metadata lives under one base URL, targets under another.

use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client as HttpClient, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

/// Bytes left unescaped in a single file-name component.
const FILE_NAME_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encodes `name` so it is a single, separator-free path component.
pub fn encode_file_name(name: &str) -> String {
    utf8_percent_encode(name, FILE_NAME_SAFE).to_string()
}

/// Errors reported by fetch collaborators.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The repository does not have the requested file.
    #[error("'{0}' was not found")]
    NotFound(String),
    /// The file is larger than the caller's upper bound.
    #[error("'{name}' exceeds the {max_length} byte limit")]
    LengthExceeded { name: String, max_length: u64 },
    /// A failure that may succeed on retry (timeouts, 5xx).
    #[error("transient error fetching '{name}': {reason}")]
    Transient { name: String, reason: String },
    /// Any other failure.
    #[error("error fetching '{name}': {reason}")]
    Other { name: String, reason: String },
}

impl FetchError {
    /// Indicates whether retrying the same request may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Source of repository bytes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `role` metadata, by explicit version when `version` is set.
    async fn fetch_metadata(
        &self,
        role: &str,
        version: Option<u64>,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError>;

    /// Fetches a target file by its repository path.
    async fn fetch_target(&self, path: &str, max_length: u64) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch_metadata(
        &self,
        role: &str,
        version: Option<u64>,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_metadata(role, version, max_length).await
    }

    async fn fetch_target(&self, path: &str, max_length: u64) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_target(path, max_length).await
    }
}

/// Fetches metadata and targets from static HTTP(S) base URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    /// Underlying HTTP client reused across requests.
    http: HttpClient,
    /// Directory URL holding `<version>.<role>.json` files.
    metadata_base: Url,
    /// Directory URL holding target files.
    targets_base: Url,
}

impl HttpFetcher {
    /// Builds a fetcher with a default HTTP client.
    pub fn new(metadata_base_url: &str, targets_base_url: &str) -> Result<Self, FetchError> {
        let http = HttpClient::builder().build().map_err(|err| FetchError::Other {
            name: metadata_base_url.to_string(),
            reason: err.to_string(),
        })?;
        Self::with_client(http, metadata_base_url, targets_base_url)
    }

    /// Builds a fetcher around an existing HTTP client.
    pub fn with_client(
        http: HttpClient,
        metadata_base_url: &str,
        targets_base_url: &str,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            http,
            metadata_base: parse_directory_url(metadata_base_url)?,
            targets_base: parse_directory_url(targets_base_url)?,
        })
    }

    fn metadata_url(&self, role: &str, version: Option<u64>) -> Result<Url, FetchError> {
        let role = encode_file_name(role);
        let name = match version {
            Some(version) => format!("{version}.{role}.json"),
            None => format!("{role}.json"),
        };
        join(&self.metadata_base, &name)
    }

    fn target_url(&self, path: &str) -> Result<Url, FetchError> {
        let relative = path
            .split('/')
            .map(encode_file_name)
            .collect::<Vec<_>>()
            .join("/");
        join(&self.targets_base, &relative)
    }

    /// Downloads `url`, bounded by `max_length` bytes.
    async fn fetch_bounded(&self, url: Url, max_length: u64) -> Result<Vec<u8>, FetchError> {
        let name = url.to_string();
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(&name, err))?;
        classify_status(response.status(), &name)?;

        if let Some(length) = response.content_length() {
            if length > max_length {
                return Err(FetchError::LengthExceeded { name, max_length });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| transport_error(&name, err))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > max_length {
                return Err(FetchError::LengthExceeded { name, max_length });
            }
        }
        debug!(url = %name, length = body.len(), "fetcher: downloaded");
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_metadata(
        &self,
        role: &str,
        version: Option<u64>,
        max_length: u64,
    ) -> Result<Vec<u8>, FetchError> {
        let url = self.metadata_url(role, version)?;
        self.fetch_bounded(url, max_length).await
    }

    async fn fetch_target(&self, path: &str, max_length: u64) -> Result<Vec<u8>, FetchError> {
        let url = self.target_url(path)?;
        self.fetch_bounded(url, max_length).await
    }
}

/// Parses a base URL and makes sure relative joins land inside it.
fn parse_directory_url(raw: &str) -> Result<Url, FetchError> {
    let normalised = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalised).map_err(|err| FetchError::Other {
        name: raw.to_string(),
        reason: format!("invalid base url: {err}"),
    })
}

fn join(base: &Url, relative: &str) -> Result<Url, FetchError> {
    base.join(relative).map_err(|err| FetchError::Other {
        name: relative.to_string(),
        reason: err.to_string(),
    })
}

/// Maps HTTP statuses onto fetch error kinds.
fn classify_status(status: StatusCode, name: &str) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
        // Static hosts commonly answer 403 for missing objects.
        return Err(FetchError::NotFound(name.to_string()));
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::Transient {
            name: name.to_string(),
            reason: format!("status {}", status.as_u16()),
        });
    }
    Err(FetchError::Other {
        name: name.to_string(),
        reason: format!("unexpected status {}", status.as_u16()),
    })
}

fn transport_error(name: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        FetchError::Transient {
            name: name.to_string(),
            reason: err.to_string(),
        }
    } else {
        FetchError::Other {
            name: name.to_string(),
            reason: err.to_string(),
        }
    }
}
