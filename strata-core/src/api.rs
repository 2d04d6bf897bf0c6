//! Registry API: the operations behind every `strata` command
//!
//! Mutating operations process each selected overlay independently and in
//! order. A failure for one overlay is recorded in the error log and does not
//! stop the batch. After the loop the installed set is saved and the config
//! fragments are reconciled once, all while the [`MutationGuard`] is held.
//!
//! Per-overlay lifecycle:
//!
//! ```text
//! absent --add--> enabled --disable--> disabled
//!                 enabled <--enable--- disabled
//! enabled|disabled --delete--> absent
//! ```

use anyhow::Context;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::backend::BackendRegistry;
use crate::conf::{ConfigManager, DesiredEntry};
use crate::config::Config;
use crate::error::{FetchError, OverlayError, RegistryError};
use crate::guard::MutationGuard;
use crate::installed::{InstalledSet, OverlayState};
use crate::overlay::{CatalogSource, OverlayDatabase, OverlayDefinition, Quality, Status};
use crate::remote::signature::SignatureVerifier;
use crate::remote::RemoteFetcher;

/// Selection keyword meaning every applicable overlay
pub const ALL: &str = "ALL";

/// Overlay names requested by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Names(Vec<String>),
}

impl Selection {
    /// Parse comma or whitespace separated names; `ALL` selects everything
    pub fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = Vec::new();
        for arg in args {
            for name in arg
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|n| !n.is_empty())
            {
                if name == ALL {
                    return Selection::All;
                }
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        Selection::Names(names)
    }

    /// Concrete names, using `candidates` for `ALL`
    pub fn resolve(&self, candidates: &[String]) -> Vec<String> {
        match self {
            Selection::All => candidates.to_vec(),
            Selection::Names(names) => names.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::Names(names) if names.is_empty())
    }
}

/// One row of `list`
#[derive(Debug, Clone, Serialize)]
pub struct OverlaySummary {
    pub name: String,
    pub priority: i32,
    pub quality: Quality,
    pub status: Status,
    pub official: bool,
    pub supported: bool,
    pub installed: Option<OverlayState>,
    pub source_type: String,
    pub description: String,
}

/// One row of `list-local`
#[derive(Debug, Clone, Serialize)]
pub struct LocalSummary {
    pub name: String,
    pub priority: i32,
    pub state: OverlayState,
    pub official: bool,
    pub supported: bool,
    pub source_type: String,
    pub path: PathBuf,
    pub description: String,
}

/// Result of `info` for one overlay
#[derive(Debug, Clone)]
pub struct OverlayInfo {
    pub definition: OverlayDefinition,
    pub official: bool,
    pub supported: bool,
    pub state: Option<OverlayState>,
    /// Human readable description block
    pub text: String,
}

pub struct RegistryApi {
    config: Config,
    umask: u32,
    fetcher: RemoteFetcher,
    backends: BackendRegistry,
    conf: ConfigManager,
    errors: Vec<OverlayError>,
    warnings: Vec<String>,
}

impl RegistryApi {
    /// Build the API with the default backends and config writers
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mut fetcher = RemoteFetcher::new(
            config.cache_dir(),
            config.proxy.as_deref(),
            config.fetch_timeout(),
        )
        .context("Failed to set up catalog fetcher")?;

        if let Some(signature) = &config.signature {
            let verifier = SignatureVerifier::from_env(&signature.key_env, &signature.suffix)
                .map_err(anyhow::Error::msg)
                .context("Catalog signature verification is configured")?;
            fetcher = fetcher.with_verifier(verifier);
        }

        let backends = BackendRegistry::with_defaults(&config)?;
        let conf = ConfigManager::from_config(&config);
        Self::with_components(config, fetcher, backends, conf)
    }

    /// Build the API from explicit components
    pub fn with_components(
        config: Config,
        fetcher: RemoteFetcher,
        backends: BackendRegistry,
        conf: ConfigManager,
    ) -> anyhow::Result<Self> {
        let umask = config.umask_value()?;
        Ok(Self {
            config,
            umask,
            fetcher,
            backends,
            conf,
            errors: Vec::new(),
            warnings: Vec::new(),
        })
    }

    /// Errors recorded since the last [`clear_messages`](Self::clear_messages)
    pub fn errors(&self) -> &[OverlayError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn clear_messages(&mut self) {
        self.errors.clear();
        self.warnings.clear();
    }

    fn record(&mut self, overlay: &str, error: RegistryError) {
        debug!("{}: {}", overlay, error);
        self.errors.push(OverlayError {
            overlay: overlay.to_string(),
            error,
        });
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn lock(&mut self, operation: &str) -> Option<MutationGuard> {
        match MutationGuard::acquire(&self.config.lock_path(), self.umask) {
            Ok(guard) => Some(guard),
            Err(e) => {
                self.record(operation, e.into());
                None
            }
        }
    }

    /// Refresh the cache of every configured catalog source
    pub async fn fetch_remote_list(&mut self) -> bool {
        let Some(_guard) = self.lock("fetch") else {
            return false;
        };

        let mut success = true;
        for catalog in self.config.catalogs.clone() {
            let outcome = self.fetcher.fetch(&catalog.urls).await;
            for failure in &outcome.failures {
                self.warnings.push(failure.to_string());
            }

            if !outcome.succeeded {
                success = false;
                self.record(
                    "fetch",
                    FetchError::AllFailed {
                        urls: catalog.urls.join(", "),
                    }
                    .into(),
                );
            }
        }
        success
    }

    /// Drop every cached catalog so the next fetch starts clean
    pub fn clear_cache(&mut self) -> bool {
        let Some(_guard) = self.lock("fetch") else {
            return false;
        };

        match self.fetcher.clear_cache() {
            Ok(removed) => {
                info!("Removed {} cached catalog(s)", removed);
                true
            }
            Err(e) => {
                self.record("fetch", e.into());
                false
            }
        }
    }

    /// Merged catalog from the cached remote catalogs and local definitions
    pub fn available(&mut self) -> Result<OverlayDatabase, RegistryError> {
        let mut sources = Vec::new();
        for catalog in &self.config.catalogs {
            match self.fetcher.latest_cached(&catalog.urls) {
                Some(entry) => sources.push(CatalogSource::text(entry.url.clone(), entry.text())),
                None => debug!("No cached catalog for {}", catalog.urls.join(", ")),
            }
        }
        if sources.is_empty() && !self.config.catalogs.is_empty() {
            self.warn("No remote catalog has been fetched yet; run 'strata fetch'".to_string());
        }

        sources.extend(self.config.overlay_def_files().into_iter().map(CatalogSource::file));

        let report = OverlayDatabase::load(&sources)?;
        for warning in report.warnings {
            self.warnings.push(warning.to_string());
        }
        Ok(report.database)
    }

    fn installed(&self) -> Result<InstalledSet, RegistryError> {
        InstalledSet::load(&self.config.installed_path())
    }

    /// Names of installed overlays
    pub fn installed_names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.installed()?.names())
    }

    /// Save the set if it changed and bring the config fragments in line
    fn commit(&mut self, operation: &str, installed: &InstalledSet, dirty: bool) -> bool {
        if dirty {
            if let Err(e) = installed.save(&self.config.installed_path()) {
                self.record(operation, e);
                return false;
            }
        }

        let desired: Vec<DesiredEntry> = installed
            .enabled()
            .into_iter()
            .map(|overlay| DesiredEntry::from_installed(overlay, &self.config.storage))
            .collect();

        match self.conf.reconcile(&desired) {
            Ok(_) => true,
            Err(e) => {
                self.record(operation, e.into());
                false
            }
        }
    }

    /// Install the selected overlays from the catalog
    pub async fn add_repos(&mut self, selection: &Selection) -> bool {
        let Some(_guard) = self.lock("add") else {
            return false;
        };

        let available = match self.available() {
            Ok(database) => database,
            Err(e) => {
                self.record("add", e);
                return false;
            }
        };
        let mut installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record("add", e);
                return false;
            }
        };

        let mut success = true;
        let mut dirty = false;
        for name in selection.resolve(&available.names()) {
            match self.add_one(&available, &mut installed, &name).await {
                Ok(()) => dirty = true,
                Err(e) => {
                    success = false;
                    self.record(&name, e);
                }
            }
        }

        self.commit("add", &installed, dirty) && success
    }

    async fn add_one(
        &mut self,
        available: &OverlayDatabase,
        installed: &mut InstalledSet,
        name: &str,
    ) -> Result<(), RegistryError> {
        if installed.contains(name) {
            return Err(RegistryError::AlreadyInstalled {
                name: name.to_string(),
            });
        }

        let definition = available.select(name)?.clone();
        if !definition.is_official() {
            if self.config.strict {
                return Err(RegistryError::Unofficial {
                    name: name.to_string(),
                });
            }
            self.warn(format!(
                "Overlay '{name}' is not official. Continue at your own risk."
            ));
        }

        let path = definition.content_path(&self.config.storage);
        self.backends.add(&definition, &path).await?;
        installed.insert(definition);
        info!("Overlay '{}' installed and enabled", name);
        Ok(())
    }

    /// Update the selected installed overlays
    pub async fn sync(&mut self, selection: &Selection) -> bool {
        let Some(_guard) = self.lock("sync") else {
            return false;
        };

        let mut installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record("sync", e);
                return false;
            }
        };
        let available = match self.available() {
            Ok(database) => database,
            Err(e) => {
                self.warn(format!("Catalog unavailable, syncing installed definitions: {e}"));
                OverlayDatabase::new()
            }
        };

        let mut success = true;
        let mut dirty = false;
        for name in selection.resolve(&installed.names()) {
            match self.sync_one(&available, &mut installed, &name).await {
                Ok(()) => dirty = true,
                Err(e) => {
                    success = false;
                    self.record(&name, e);
                }
            }
        }

        self.commit("sync", &installed, dirty) && success
    }

    async fn sync_one(
        &mut self,
        available: &OverlayDatabase,
        installed: &mut InstalledSet,
        name: &str,
    ) -> Result<(), RegistryError> {
        let current = installed.require(name)?.definition.clone();

        // The installed definition only changes once the new sources synced
        let (definition, updated) = match available.get(name) {
            None => {
                self.warn(format!(
                    "Overlay '{name}' is no longer listed in any catalog; syncing the installed copy"
                ));
                (current, false)
            }
            Some(remote) if remote.sources != current.sources => {
                if self.config.support_url_updates {
                    info!("Overlay '{}' sources changed, syncing from the new sources", name);
                    (remote.clone(), true)
                } else {
                    self.warn(format!(
                        "The sources of overlay '{name}' changed in the catalog. \
                         Enable support_url_updates or delete and re-add the overlay."
                    ));
                    (current, false)
                }
            }
            Some(_) => (current, false),
        };

        let path = definition.content_path(&self.config.storage);
        self.backends.sync(&definition, &path).await?;
        if updated {
            installed.update_definition(definition)?;
        }
        installed.mark_synced(name);
        Ok(())
    }

    /// Remove the selected overlays and their content
    pub async fn delete_repos(&mut self, selection: &Selection) -> bool {
        let Some(_guard) = self.lock("delete") else {
            return false;
        };

        let mut installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record("delete", e);
                return false;
            }
        };

        let mut success = true;
        let mut dirty = false;
        for name in selection.resolve(&installed.names()) {
            let result = match installed.require(&name) {
                Ok(overlay) => {
                    let definition = overlay.definition.clone();
                    let path = definition.content_path(&self.config.storage);
                    self.backends.delete(&definition, &path).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    installed.remove(&name);
                    dirty = true;
                    info!("Overlay '{}' deleted", name);
                }
                Err(e) => {
                    success = false;
                    self.record(&name, e);
                }
            }
        }

        self.commit("delete", &installed, dirty) && success
    }

    pub fn enable_repos(&mut self, selection: &Selection) -> bool {
        self.set_state("enable", selection, OverlayState::Enabled)
    }

    pub fn disable_repos(&mut self, selection: &Selection) -> bool {
        self.set_state("disable", selection, OverlayState::Disabled)
    }

    fn set_state(&mut self, operation: &str, selection: &Selection, state: OverlayState) -> bool {
        let Some(_guard) = self.lock(operation) else {
            return false;
        };

        let mut installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record(operation, e);
                return false;
            }
        };

        let mut success = true;
        let mut dirty = false;
        for name in selection.resolve(&installed.names()) {
            match installed.set_state(&name, state) {
                Ok(changed) => {
                    dirty |= changed;
                    if changed {
                        info!("Overlay '{}' {}", name, state);
                    }
                }
                Err(e) => {
                    success = false;
                    self.record(&name, e);
                }
            }
        }

        self.commit(operation, &installed, dirty) && success
    }

    /// Details for the selected overlays, from the catalog or the installed set
    pub fn info(&mut self, selection: &Selection) -> Vec<OverlayInfo> {
        let available = match self.available() {
            Ok(database) => database,
            Err(e) => {
                self.record("info", e);
                OverlayDatabase::new()
            }
        };
        let installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record("info", e);
                InstalledSet::default()
            }
        };

        let mut candidates = available.names();
        for name in installed.names() {
            if !available.contains(&name) {
                candidates.push(name);
            }
        }
        candidates.sort();

        let mut infos = Vec::new();
        for name in selection.resolve(&candidates) {
            let state = installed.get(&name).map(|o| o.state);
            let definition = match available.get(&name) {
                Some(definition) => definition.clone(),
                None => match installed.get(&name) {
                    Some(overlay) => overlay.definition.clone(),
                    None => {
                        self.record(&name, RegistryError::NotFound { name: name.clone() });
                        continue;
                    }
                },
            };

            infos.push(OverlayInfo {
                official: definition.is_official(),
                supported: self.backends.supports(&definition),
                text: definition.info_text(),
                definition,
                state,
            });
        }
        infos
    }

    /// Every catalog overlay in precedence order
    pub fn list_remote(&mut self) -> Vec<OverlaySummary> {
        let available = match self.available() {
            Ok(database) => database,
            Err(e) => {
                self.record("list", e);
                return Vec::new();
            }
        };
        let installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.warn(format!("Cannot read installed overlays: {e}"));
                InstalledSet::default()
            }
        };

        available
            .list()
            .into_iter()
            .map(|definition| OverlaySummary {
                name: definition.name.clone(),
                priority: definition.priority,
                quality: definition.quality,
                status: definition.status,
                official: definition.is_official(),
                supported: self.backends.supports(definition),
                installed: installed.get(&definition.name).map(|o| o.state),
                source_type: definition.type_label(),
                description: definition.summary().to_string(),
            })
            .collect()
    }

    /// Installed overlays in precedence order
    pub fn list_local(&mut self) -> Vec<LocalSummary> {
        let installed = match self.installed() {
            Ok(set) => set,
            Err(e) => {
                self.record("list-local", e);
                return Vec::new();
            }
        };

        installed
            .list()
            .into_iter()
            .map(|overlay| {
                let definition = &overlay.definition;
                LocalSummary {
                    name: definition.name.clone(),
                    priority: definition.priority,
                    state: overlay.state,
                    official: definition.is_official(),
                    supported: self.backends.supports(definition),
                    source_type: definition.type_label(),
                    path: definition.content_path(&self.config.storage),
                    description: definition.summary().to_string(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_parse_names() {
        let selection = Selection::parse(["wrobel,wrobel-stable", "other wrobel"]);
        assert_eq!(
            selection,
            Selection::Names(vec![
                "wrobel".to_string(),
                "wrobel-stable".to_string(),
                "other".to_string()
            ])
        );
    }

    #[test]
    fn test_selection_parse_all() {
        assert_eq!(Selection::parse(["wrobel", "ALL"]), Selection::All);
        assert_eq!(Selection::parse(["all"]), Selection::Names(vec!["all".to_string()]));
    }

    #[test]
    fn test_selection_resolve() {
        let candidates = vec!["a".to_string(), "b".to_string()];
        assert_eq!(Selection::All.resolve(&candidates), candidates);
        assert_eq!(
            Selection::Names(vec!["x".to_string()]).resolve(&candidates),
            vec!["x".to_string()]
        );
        assert!(Selection::parse(Vec::<String>::new()).is_empty());
        assert!(!Selection::All.is_empty());
    }
}
