//! Strata configuration
//!
//! Loaded from `strata.yaml` in the platform config directory (on Linux
//! `~/.config/strata/strata.yaml`) or from an explicit path. Every field has
//! a default, so a missing file or a partial file is valid.
//!
//! ```yaml
//! storage: /var/lib/strata
//! catalogs:
//!   - urls:
//!       - https://api.gentoo.org/overlays/repositories.xml
//! conf_types: [repos.conf]
//! umask: "0022"
//! commands:
//!   git:
//!     sync_opts: ["--depth=1"]
//!     post_sync: "git gc --auto"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default catalog location
pub const DEFAULT_CATALOG_URL: &str = "https://api.gentoo.org/overlays/repositories.xml";

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "strata.yaml";

/// A catalog source: mirror URLs tried in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub urls: Vec<String>,
}

/// Config fragment formats that can be kept in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfType {
    #[serde(rename = "make.conf")]
    MakeConf,
    #[serde(rename = "repos.conf")]
    ReposConf,
}

/// Detached catalog signature verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Environment variable holding the shared HMAC key
    pub key_env: String,

    /// Appended to a catalog URL to locate its signature
    #[serde(default = "default_signature_suffix")]
    pub suffix: String,
}

fn default_signature_suffix() -> String {
    ".sig".to_string()
}

/// Per source type overrides for command backends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandOverride {
    /// Program to run instead of the built-in default
    pub program: Option<String>,
    /// Extra arguments for the initial checkout
    pub add_opts: Vec<String>,
    /// Extra arguments for updates
    pub sync_opts: Vec<String>,
    /// Shell command run inside the content directory after a successful sync
    pub post_sync: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for overlay content and registry state
    pub storage: PathBuf,

    /// Remote catalog cache; `<storage>/cache` when unset
    pub cache_dir: Option<PathBuf>,

    pub catalogs: Vec<CatalogConfig>,

    /// Directory of local `*.xml` catalog documents merged after the remote ones
    pub overlay_defs: Option<PathBuf>,

    pub conf_types: Vec<ConfType>,

    /// make.conf fragment; `<storage>/make.conf` when unset
    pub make_conf: Option<PathBuf>,
    pub make_conf_variable: String,
    pub repos_conf: PathBuf,

    /// HTTP(S) proxy for catalog and archive downloads
    pub proxy: Option<String>,

    /// Octal umask applied while mutating commands run
    pub umask: String,

    /// Refuse unofficial overlays instead of warning
    pub strict: bool,

    /// Refresh an installed overlay's definition from the catalog on sync
    pub support_url_updates: bool,

    pub fetch_timeout_secs: u64,
    pub backend_timeout_secs: Option<u64>,

    pub signature: Option<SignatureConfig>,

    /// Keyed by source type, e.g. "git"
    pub commands: BTreeMap<String, CommandOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("/var/lib/strata"),
            cache_dir: None,
            catalogs: vec![CatalogConfig {
                urls: vec![DEFAULT_CATALOG_URL.to_string()],
            }],
            overlay_defs: Some(PathBuf::from("/etc/strata/overlays")),
            conf_types: vec![ConfType::ReposConf],
            make_conf: None,
            make_conf_variable: "PORTDIR_OVERLAY".to_string(),
            repos_conf: PathBuf::from("/etc/portage/repos.conf/strata.conf"),
            proxy: None,
            umask: "0022".to_string(),
            strict: false,
            support_url_updates: false,
            fetch_timeout_secs: 30,
            backend_timeout_secs: None,
            signature: None,
            commands: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(content)?)
    }

    /// Default config file location
    pub fn default_path() -> Result<PathBuf> {
        directories::ProjectDirs::from("", "", "strata")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .context("Could not determine config directory")
    }

    /// Reject settings that would make every operation fail later
    pub fn validate(&self) -> Result<()> {
        self.umask_value()?;

        if !self.storage.is_absolute() {
            bail!(
                "storage must be an absolute path, got '{}'",
                self.storage.display()
            );
        }

        for (index, catalog) in self.catalogs.iter().enumerate() {
            if catalog.urls.iter().all(|url| url.trim().is_empty()) {
                bail!("catalog source #{} has no URLs", index + 1);
            }
        }

        if let Some(signature) = &self.signature {
            if signature.key_env.trim().is_empty() {
                bail!("signature.key_env must name an environment variable");
            }
        }

        Ok(())
    }

    /// Parse the octal umask string ("0022", "022" or "0o022")
    pub fn umask_value(&self) -> Result<u32> {
        let raw = self.umask.trim();
        let digits = raw.strip_prefix("0o").unwrap_or(raw);
        let value = u32::from_str_radix(digits, 8)
            .with_context(|| format!("Invalid umask '{raw}': expected an octal value like 0022"))?;
        if value > 0o777 {
            bail!("Invalid umask '{raw}': value exceeds 0777");
        }
        Ok(value)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.storage.join("cache"))
    }

    pub fn make_conf_path(&self) -> PathBuf {
        self.make_conf
            .clone()
            .unwrap_or_else(|| self.storage.join("make.conf"))
    }

    pub fn installed_path(&self) -> PathBuf {
        self.storage.join("installed.yaml")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.storage.join(".strata.lock")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Option<Duration> {
        self.backend_timeout_secs.map(Duration::from_secs)
    }

    /// Local catalog documents in file-name order
    pub fn overlay_def_files(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.overlay_defs else {
            return Vec::new();
        };

        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && path.extension().is_some_and(|e| e == "xml"))
                .collect(),
            Err(_) => return Vec::new(),
        };
        files.sort();
        files
    }
}
