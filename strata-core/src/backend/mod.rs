//! Sync backends: add, sync and delete overlay content for a source type
//!
//! The [`BackendRegistry`] is the only place that maps source type
//! identifiers to implementations. Callers hand it a definition and a
//! content path; it picks the first declared source with a registered
//! backend and enforces the rules every backend shares.

pub mod archive;
pub mod command;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{BackendError, RegistryError};
use crate::fsutil;
use crate::overlay::{OverlayDefinition, Source};

pub use archive::ArchiveBackend;
pub use command::{CommandBackend, CommandTemplate};

/// Add/sync/delete contract for one kind of source
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Backend identifier for logging
    fn name(&self) -> &str;

    /// Materialize `source` at `path`. `path` is absent or an empty directory.
    async fn add(&self, path: &Path, source: &Source) -> Result<(), BackendError>;

    /// Bring existing content at `path` up to date with `source`
    async fn sync(&self, path: &Path, source: &Source) -> Result<(), BackendError>;

    /// Remove content at `path`; absent content is success
    async fn delete(&self, path: &Path, _source: &Source) -> Result<(), BackendError> {
        remove_content(path).await
    }
}

/// Remove a content directory, treating a missing path as already removed
pub async fn remove_content(path: &Path) -> Result<(), BackendError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| BackendError::io(path, e)),
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| BackendError::io(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist, nothing to delete", path.display());
            Ok(())
        }
        Err(e) => Err(BackendError::io(path, e)),
    }
}

/// Capability table from source type to backend
#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn SyncBackend>>,
    timeout: Option<Duration>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in command backends and the tar backend
    pub fn with_defaults(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new().with_timeout(config.backend_timeout());

        for template in command::BUILTIN_TEMPLATES {
            let overrides = template
                .aliases
                .iter()
                .find_map(|alias| config.commands.get(*alias))
                .cloned()
                .unwrap_or_default();
            registry.register(
                template.aliases,
                Arc::new(CommandBackend::new(template.clone(), overrides)),
            );
        }

        let archive = ArchiveBackend::new(config.proxy.as_deref(), config.fetch_timeout())?;
        registry.register(&["tar"], Arc::new(archive));

        Ok(registry)
    }

    /// Fail backend calls that run longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register `backend` under each of `types` (case-insensitive)
    pub fn register(&mut self, types: &[&str], backend: Arc<dyn SyncBackend>) {
        for source_type in types {
            self.backends
                .insert(source_type.to_ascii_lowercase(), Arc::clone(&backend));
        }
    }

    /// Registered source type identifiers
    pub fn source_types(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// First declared source with a registered backend
    pub fn resolve<'a>(
        &self,
        definition: &'a OverlayDefinition,
    ) -> Option<(Arc<dyn SyncBackend>, &'a Source)> {
        definition.sources.iter().find_map(|source| {
            self.backends
                .get(&source.source_type.to_ascii_lowercase())
                .map(|backend| (Arc::clone(backend), source))
        })
    }

    pub fn supports(&self, definition: &OverlayDefinition) -> bool {
        self.resolve(definition).is_some()
    }

    fn dispatch<'a>(
        &self,
        definition: &'a OverlayDefinition,
    ) -> Result<(Arc<dyn SyncBackend>, &'a Source), RegistryError> {
        self.resolve(definition)
            .ok_or_else(|| RegistryError::UnsupportedSource {
                name: definition.name.clone(),
                types: definition.source_types().collect::<Vec<_>>().join(", "),
            })
    }

    async fn bounded<F>(&self, operation: &'static str, path: &Path, call: F) -> Result<(), BackendError>
    where
        F: Future<Output = Result<(), BackendError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::TimedOut {
                    operation,
                    path: path.to_path_buf(),
                    seconds: limit.as_secs(),
                })?,
            None => call.await,
        }
    }

    /// Materialize the overlay at `path`.
    ///
    /// Refuses a non-empty `path`. Partial content from a failed add is removed.
    pub async fn add(&self, definition: &OverlayDefinition, path: &Path) -> Result<(), RegistryError> {
        let (backend, source) = self.dispatch(definition)?;
        let backend_error = |source| RegistryError::Backend {
            name: definition.name.clone(),
            source,
        };

        let empty = fsutil::is_absent_or_empty(path)
            .map_err(|e| backend_error(BackendError::io(path, e)))?;
        if !empty {
            return Err(backend_error(BackendError::PathNotEmpty {
                path: path.to_path_buf(),
            }));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| backend_error(BackendError::io(parent, e)))?;
        }

        debug!(
            "Adding '{}' from {} via {} backend",
            definition.name,
            source.uri,
            backend.name()
        );

        match self.bounded("add", path, backend.add(path, source)).await {
            Ok(()) => {
                info!("Added overlay '{}' at {}", definition.name, path.display());
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = remove_content(path).await {
                    warn!("Failed to clean up after failed add: {}", cleanup);
                }
                Err(backend_error(e))
            }
        }
    }

    /// Update the overlay content at `path`
    pub async fn sync(&self, definition: &OverlayDefinition, path: &Path) -> Result<(), RegistryError> {
        let (backend, source) = self.dispatch(definition)?;
        debug!(
            "Syncing '{}' from {} via {} backend",
            definition.name,
            source.uri,
            backend.name()
        );

        self.bounded("sync", path, backend.sync(path, source))
            .await
            .map_err(|source| RegistryError::Backend {
                name: definition.name.clone(),
                source,
            })?;

        info!("Synced overlay '{}'", definition.name);
        Ok(())
    }

    /// Remove the overlay content at `path`.
    ///
    /// Content of an overlay whose source type is no longer registered is
    /// removed directly.
    pub async fn delete(&self, definition: &OverlayDefinition, path: &Path) -> Result<(), RegistryError> {
        let result = match self.resolve(definition) {
            Some((backend, source)) => {
                self.bounded("delete", path, backend.delete(path, source)).await
            }
            None => remove_content(path).await,
        };

        result.map_err(|source| RegistryError::Backend {
            name: definition.name.clone(),
            source,
        })
    }
}
