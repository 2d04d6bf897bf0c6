//! Remote catalog fetching and caching
//!
//! Each catalog URL has one cache file, `<cache_dir>/<sha256(url)>.xml`,
//! holding the verbatim bytes of the last successful fetch. Each catalog
//! source (its ordered mirror list) has a marker,
//! `<cache_dir>/<sha256(urls)>.last`, naming the mirror its last successful
//! fetch used. Fetching never happens implicitly: readers use whatever is
//! cached.

pub mod signature;
mod transport;

pub(crate) use transport::{http_client, local_path};

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::{CatalogError, FetchError};
use crate::fsutil;
use crate::overlay::OverlayDatabase;
use signature::SignatureVerifier;

/// Result of refreshing one catalog source
#[derive(Debug)]
pub struct FetchOutcome {
    /// Some URL produced a valid catalog
    pub succeeded: bool,
    /// The cache file was rewritten
    pub changed: bool,
    /// URL that succeeded
    pub url: Option<String>,
    /// One entry per URL that failed, in attempt order
    pub failures: Vec<FetchError>,
}

/// A cached catalog document
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub bytes: Vec<u8>,
}

impl CacheEntry {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Fetches remote catalogs and maintains the URL-keyed cache
pub struct RemoteFetcher {
    cache_dir: PathBuf,
    client: reqwest::Client,
    timeout: Duration,
    verifier: Option<SignatureVerifier>,
}

impl RemoteFetcher {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = http_client(proxy, timeout).map_err(|e| FetchError::Http {
            url: proxy.unwrap_or_default().to_string(),
            message: format!("failed to create HTTP client: {e}"),
        })?;

        Ok(Self {
            cache_dir: cache_dir.into(),
            client,
            timeout,
            verifier: None,
        })
    }

    /// Require a valid detached signature for every fetched catalog
    pub fn with_verifier(mut self, verifier: SignatureVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file location for `url`
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.cache_dir.join(format!("{}.xml", hex::encode(digest)))
    }

    /// The cached document for `url`, if any
    pub fn cached(&self, url: &str) -> Option<CacheEntry> {
        let path = self.cache_path(url);
        let modified = std::fs::metadata(&path).and_then(|m| m.modified());
        let bytes = std::fs::read(&path);

        match (modified, bytes) {
            (Ok(modified), Ok(bytes)) => Some(CacheEntry {
                url: url.to_string(),
                path,
                modified,
                bytes,
            }),
            (Err(e), _) | (_, Err(e)) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Cannot read cache file {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Marker file recording the mirror last used for a source
    pub fn marker_path(&self, urls: &[String]) -> PathBuf {
        let digest = Sha256::digest(urls.join("\n").as_bytes());
        self.cache_dir.join(format!("{}.last", hex::encode(digest)))
    }

    /// The cache of the mirror the last successful fetch of `urls` used.
    ///
    /// Without a usable marker, falls back to the most recently written
    /// cache among the mirrors.
    pub fn latest_cached(&self, urls: &[String]) -> Option<CacheEntry> {
        let marked = std::fs::read_to_string(self.marker_path(urls))
            .ok()
            .map(|content| content.trim().to_string())
            .filter(|url| urls.contains(url))
            .and_then(|url| self.cached(&url));
        if marked.is_some() {
            return marked;
        }

        urls.iter()
            .filter_map(|url| self.cached(url))
            .max_by_key(|entry| entry.modified)
    }

    fn record_source(&self, urls: &[String], url: &str) -> Result<(), FetchError> {
        let path = self.marker_path(urls);
        if std::fs::read_to_string(&path).is_ok_and(|current| current.trim() == url) {
            return Ok(());
        }
        fsutil::write_atomic(&path, format!("{url}\n").as_bytes())
            .map_err(|source| FetchError::Cache { path, source })
    }

    /// Try each URL in order until one yields a valid catalog.
    ///
    /// On success the cache is rewritten only if the content differs. When
    /// every URL fails the cache is left untouched.
    pub async fn fetch(&self, urls: &[String]) -> FetchOutcome {
        let mut failures = Vec::new();

        for url in urls {
            let attempt = match self.fetch_one(url).await {
                Ok(changed) => self.record_source(urls, url).map(|_| changed),
                Err(e) => Err(e),
            };
            match attempt {
                Ok(changed) => {
                    if changed {
                        info!("Catalog {} updated", url);
                    } else {
                        debug!("Catalog {} unchanged", url);
                    }
                    return FetchOutcome {
                        succeeded: true,
                        changed,
                        url: Some(url.clone()),
                        failures,
                    };
                }
                Err(e) => {
                    warn!("{}", e);
                    failures.push(e);
                }
            }
        }

        FetchOutcome {
            succeeded: false,
            changed: false,
            url: None,
            failures,
        }
    }

    async fn fetch_one(&self, url: &str) -> Result<bool, FetchError> {
        let bytes = transport::retrieve(&self.client, url, self.timeout).await?;

        let text = std::str::from_utf8(&bytes).map_err(|_| FetchError::Invalid {
            url: url.to_string(),
            source: CatalogError::parse(url, "document is not valid UTF-8"),
        })?;
        let database = OverlayDatabase::parse(text, url).map_err(|source| FetchError::Invalid {
            url: url.to_string(),
            source,
        })?;
        debug!("Catalog {} lists {} overlays", url, database.len());

        if let Some(verifier) = &self.verifier {
            let signature_url = verifier.signature_url(url);
            let signature = transport::retrieve(&self.client, &signature_url, self.timeout)
                .await
                .map_err(|e| FetchError::Signature {
                    url: url.to_string(),
                    message: format!("cannot retrieve signature: {e}"),
                })?;
            verifier
                .verify(&bytes, &signature)
                .map_err(|message| FetchError::Signature {
                    url: url.to_string(),
                    message,
                })?;
        }

        let path = self.cache_path(url);
        if let Ok(existing) = std::fs::read(&path) {
            if existing == bytes {
                return Ok(false);
            }
        }

        fsutil::write_atomic(&path, &bytes).map_err(|source| FetchError::Cache {
            path: path.clone(),
            source,
        })?;
        Ok(true)
    }

    /// Remove every cached catalog and mirror marker, returning how many
    /// catalogs were deleted
    pub fn clear_cache(&self) -> Result<usize, FetchError> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(FetchError::Cache {
                    path: self.cache_dir.clone(),
                    source,
                })
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !path.is_file() || !matches!(extension, "xml" | "last") {
                continue;
            }
            std::fs::remove_file(&path).map_err(|source| FetchError::Cache {
                path: path.clone(),
                source,
            })?;
            if extension == "xml" {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
