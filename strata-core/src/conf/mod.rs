//! Package manager config fragments kept in sync with the enabled overlays
//!
//! Each [`ConfigModule`] owns one file. It renders the desired file content
//! from the current content and the enabled overlays; the file is only
//! replaced when the rendering differs. Entries pointing below the storage
//! root are ours, everything else in the file is preserved.

pub mod make_conf;
pub mod repos_conf;

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{Config, ConfType};
use crate::error::ConfigWriteError;
use crate::fsutil;
use crate::installed::InstalledOverlay;

pub use make_conf::MakeConf;
pub use repos_conf::ReposConf;

/// One enabled overlay as the config fragments see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    pub name: String,
    pub path: PathBuf,
    pub priority: i32,
    pub source_type: String,
}

impl DesiredEntry {
    pub fn from_installed(overlay: &InstalledOverlay, storage: &Path) -> Self {
        let definition = &overlay.definition;
        Self {
            name: definition.name.clone(),
            path: definition.content_path(storage),
            priority: definition.priority,
            source_type: definition
                .source_types()
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        }
    }
}

/// A config fragment writer
pub trait ConfigModule: Send + Sync {
    fn name(&self) -> &str;

    fn path(&self) -> &Path;

    /// New file content for `desired`, or `None` to leave the file alone.
    ///
    /// `existing` is empty when the file does not exist.
    fn render(&self, existing: &str, desired: &[DesiredEntry]) -> Result<Option<String>, String>;

    /// Rewrite the file if its content differs from the rendering
    fn reconcile(&self, desired: &[DesiredEntry]) -> Result<bool, ConfigWriteError> {
        let path = self.path();
        let existing = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigWriteError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let rendered = self
            .render(&existing, desired)
            .map_err(|message| ConfigWriteError::Malformed {
                path: path.to_path_buf(),
                message,
            })?;

        match rendered {
            Some(content) if content != existing => {
                fsutil::write_atomic(path, content.as_bytes()).map_err(|source| {
                    ConfigWriteError::Write {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                info!("Updated {} ({})", path.display(), self.name());
                Ok(true)
            }
            _ => {
                debug!("{} is up to date", path.display());
                Ok(false)
            }
        }
    }
}

/// Runs every configured fragment writer
pub struct ConfigManager {
    modules: Vec<Box<dyn ConfigModule>>,
}

impl ConfigManager {
    pub fn new(modules: Vec<Box<dyn ConfigModule>>) -> Self {
        Self { modules }
    }

    pub fn from_config(config: &Config) -> Self {
        let modules = config
            .conf_types
            .iter()
            .map(|conf_type| -> Box<dyn ConfigModule> {
                match conf_type {
                    ConfType::MakeConf => Box::new(MakeConf::new(
                        config.make_conf_path(),
                        config.make_conf_variable.clone(),
                        config.storage.clone(),
                    )),
                    ConfType::ReposConf => {
                        Box::new(ReposConf::new(config.repos_conf.clone(), config.storage.clone()))
                    }
                }
            })
            .collect();
        Self::new(modules)
    }

    pub fn modules(&self) -> &[Box<dyn ConfigModule>] {
        &self.modules
    }

    /// Bring every fragment in line with `desired`, stopping at the first failure.
    ///
    /// Returns whether any file changed.
    pub fn reconcile(&self, desired: &[DesiredEntry]) -> Result<bool, ConfigWriteError> {
        let mut ordered = desired.to_vec();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut changed = false;
        for module in &self.modules {
            changed |= module.reconcile(&ordered)?;
        }
        Ok(changed)
    }
}
