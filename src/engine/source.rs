//! Source acquisition: local filesystem reads and remote fetches.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

use crate::resolve::ResolvedModule;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error("fetch {url} failed with status {status}")]
    Http { url: String, status: u16 },

    #[error("fetch {url} failed: {message}")]
    Network { url: String, message: String },
}

/// Reads module sources from disk or over the network.
pub struct SourceFetcher {
    src_root: PathBuf,
    client: OnceLock<reqwest::blocking::Client>,
}

impl SourceFetcher {
    pub fn new(src_root: PathBuf) -> Self {
        Self {
            src_root,
            client: OnceLock::new(),
        }
    }

    /// Obtain source bytes for a resolved module.
    pub fn fetch(&self, resolved: &ResolvedModule) -> Result<Vec<u8>, FetchError> {
        if resolved.is_remote {
            self.fetch_remote(&resolved.canonical_url)
        } else {
            self.read_local(&resolved.canonical_url)
        }
    }

    /// Absolute filesystem path of a local module's source.
    pub fn local_path(&self, canonical_url: &str) -> PathBuf {
        self.src_root.join(canonical_url.trim_start_matches('/'))
    }

    fn read_local(&self, canonical_url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.local_path(canonical_url);
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                FetchError::NotFound(path)
            } else {
                FetchError::Io { path, source: e }
            }
        })
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let client = self
            .client
            .get_or_init(reqwest::blocking::Client::new);

        let response = client.get(url).send().map_err(|e| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}
