//! Tar archive backend
//!
//! Downloads `.tar`, `.tar.gz` or `.tgz` archives over HTTP(S) or reads them
//! from disk, and unpacks them next to the content directory before moving
//! them into place. A source branch names a sub-directory of the archive to
//! use as the overlay root.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{remove_content, SyncBackend};
use crate::error::BackendError;
use crate::overlay::Source;
use crate::remote::{http_client, local_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Gzip,
}

fn compression_for(uri: &str) -> Option<Compression> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
        Some(Compression::Gzip)
    } else if path.ends_with(".tar") {
        Some(Compression::None)
    } else {
        None
    }
}

fn unpack(bytes: &[u8], compression: Compression, dest: &Path) -> io::Result<()> {
    let reader: Box<dyn Read> = match compression {
        Compression::None => Box::new(Cursor::new(bytes)),
        Compression::Gzip => Box::new(GzDecoder::new(Cursor::new(bytes))),
    };
    std::fs::create_dir_all(dest)?;
    tar::Archive::new(reader).unpack(dest)
}

pub struct ArchiveBackend {
    client: reqwest::Client,
}

impl ArchiveBackend {
    pub fn new(proxy: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let client = http_client(proxy, timeout)
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;
        Ok(Self { client })
    }

    async fn download(&self, uri: &str) -> Result<Vec<u8>, BackendError> {
        let retrieve_error = |message: String| BackendError::Retrieve {
            uri: uri.to_string(),
            message,
        };

        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self
                .client
                .get(uri)
                .send()
                .await
                .map_err(|e| retrieve_error(e.to_string()))?;
            if !response.status().is_success() {
                return Err(retrieve_error(format!("HTTP {}", response.status())));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| retrieve_error(e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        match local_path(uri) {
            Some(path) => tokio::fs::read(&path)
                .await
                .map_err(|e| retrieve_error(e.to_string())),
            None => Err(retrieve_error("unsupported URL scheme".to_string())),
        }
    }

    /// Download and unpack `source` into a staging directory beside `path`.
    ///
    /// Returns the staging guard and the directory to move into place.
    async fn stage(&self, path: &Path, source: &Source) -> Result<(tempfile::TempDir, PathBuf), BackendError> {
        let compression = compression_for(&source.uri).ok_or_else(|| BackendError::ArchiveFormat {
            uri: source.uri.clone(),
        })?;

        let bytes = self.download(&source.uri).await?;
        debug!("Downloaded {} bytes from {}", bytes.len(), source.uri);

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BackendError::io(parent, e))?;
        let staging = tempfile::Builder::new()
            .prefix(".strata-stage-")
            .tempdir_in(parent)
            .map_err(|e| BackendError::io(parent, e))?;

        let unpack_dir = staging.path().join("content");
        let target = unpack_dir.clone();
        tokio::task::spawn_blocking(move || unpack(&bytes, compression, &target))
            .await
            .map_err(|e| BackendError::io(&unpack_dir, io::Error::other(e)))?
            .map_err(|e| BackendError::io(&unpack_dir, e))?;

        let root = match &source.branch {
            Some(branch) => {
                let root = unpack_dir.join(branch.trim_matches('/'));
                if !root.is_dir() {
                    return Err(BackendError::MissingBranch {
                        uri: source.uri.clone(),
                        branch: branch.clone(),
                    });
                }
                root
            }
            None => unpack_dir,
        };

        Ok((staging, root))
    }
}

#[async_trait]
impl SyncBackend for ArchiveBackend {
    fn name(&self) -> &str {
        "tar"
    }

    async fn add(&self, path: &Path, source: &Source) -> Result<(), BackendError> {
        let (_staging, root) = self.stage(path, source).await?;

        // The registry only calls add on an absent path or an empty directory
        remove_content(path).await?;
        tokio::fs::rename(&root, path)
            .await
            .map_err(|e| BackendError::io(path, e))
    }

    async fn sync(&self, path: &Path, source: &Source) -> Result<(), BackendError> {
        let (staging, root) = self.stage(path, source).await?;

        let previous = staging.path().join("previous");
        let had_content = tokio::fs::try_exists(path).await.unwrap_or(false);
        if had_content {
            tokio::fs::rename(path, &previous)
                .await
                .map_err(|e| BackendError::io(path, e))?;
        }

        if let Err(e) = tokio::fs::rename(&root, path).await {
            if had_content {
                if let Err(restore) = tokio::fs::rename(&previous, path).await {
                    warn!("Failed to restore {}: {}", path.display(), restore);
                }
            }
            return Err(BackendError::io(path, e));
        }
        Ok(())
    }
}
