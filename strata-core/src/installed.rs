//! Installed overlay set (`<storage>/installed.yaml`)
//!
//! Records which overlays are materialized under the storage root, the
//! definition each was installed from, and whether it is enabled. Only the
//! registry API writes this file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::RegistryError;
use crate::fsutil;
use crate::overlay::OverlayDefinition;

const API_VERSION: &str = "strata/v1";

/// Lifecycle state of an installed overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayState {
    Enabled,
    Disabled,
}

impl OverlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayState::Enabled => "enabled",
            OverlayState::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for OverlayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledOverlay {
    pub definition: OverlayDefinition,
    pub state: OverlayState,
    /// RFC 3339 install time
    pub installed_at: String,
    /// RFC 3339 time of the last successful sync
    #[serde(default)]
    pub synced_at: Option<String>,
}

impl InstalledOverlay {
    pub fn is_enabled(&self) -> bool {
        self.state == OverlayState::Enabled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledSet {
    pub api_version: String,
    #[serde(default)]
    pub overlays: BTreeMap<String, InstalledOverlay>,
}

impl Default for InstalledSet {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            overlays: BTreeMap::new(),
        }
    }
}

impl InstalledSet {
    /// Load the set, or an empty set when the file does not exist
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(RegistryError::State {
                    path: path.to_path_buf(),
                    message: format!("cannot read: {e}"),
                })
            }
        };

        serde_yaml_ng::from_str(&content).map_err(|e| RegistryError::State {
            path: path.to_path_buf(),
            message: format!("cannot parse: {e}"),
        })
    }

    /// Write the set atomically
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let content = serde_yaml_ng::to_string(self).map_err(|e| RegistryError::State {
            path: path.to_path_buf(),
            message: format!("cannot serialize: {e}"),
        })?;

        fsutil::write_atomic(path, content.as_bytes()).map_err(|e| RegistryError::State {
            path: path.to_path_buf(),
            message: format!("cannot write: {e}"),
        })
    }

    /// Record a freshly added overlay as enabled
    pub fn insert(&mut self, definition: OverlayDefinition) {
        let name = definition.name.clone();
        self.overlays.insert(
            name,
            InstalledOverlay {
                definition,
                state: OverlayState::Enabled,
                installed_at: chrono::Utc::now().to_rfc3339(),
                synced_at: None,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledOverlay> {
        self.overlays.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&InstalledOverlay> {
        self.overlays.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.overlays.contains_key(name)
    }

    /// Look up an installed overlay or fail with `NotInstalled`
    pub fn require(&self, name: &str) -> Result<&InstalledOverlay, RegistryError> {
        self.overlays.get(name).ok_or_else(|| RegistryError::NotInstalled {
            name: name.to_string(),
        })
    }

    /// Change the state, returning whether it differed
    pub fn set_state(&mut self, name: &str, state: OverlayState) -> Result<bool, RegistryError> {
        let overlay = self
            .overlays
            .get_mut(name)
            .ok_or_else(|| RegistryError::NotInstalled {
                name: name.to_string(),
            })?;
        let changed = overlay.state != state;
        overlay.state = state;
        Ok(changed)
    }

    /// Replace the stored definition, keeping state and timestamps
    pub fn update_definition(&mut self, definition: OverlayDefinition) -> Result<(), RegistryError> {
        let overlay = self
            .overlays
            .get_mut(&definition.name)
            .ok_or_else(|| RegistryError::NotInstalled {
                name: definition.name.clone(),
            })?;
        overlay.definition = definition;
        Ok(())
    }

    pub fn mark_synced(&mut self, name: &str) {
        if let Some(overlay) = self.overlays.get_mut(name) {
            overlay.synced_at = Some(chrono::Utc::now().to_rfc3339());
        }
    }

    /// Sorted overlay names
    pub fn names(&self) -> Vec<String> {
        self.overlays.keys().cloned().collect()
    }

    /// Installed overlays in precedence order
    pub fn list(&self) -> Vec<&InstalledOverlay> {
        let mut overlays: Vec<_> = self.overlays.values().collect();
        overlays.sort_by(|a, b| a.definition.precedence_cmp(&b.definition));
        overlays
    }

    /// Enabled overlays in precedence order
    pub fn enabled(&self) -> Vec<&InstalledOverlay> {
        self.list().into_iter().filter(|o| o.is_enabled()).collect()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }
}
