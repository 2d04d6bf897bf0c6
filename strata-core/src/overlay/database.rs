//! Overlay database: name-keyed definitions merged from catalog sources

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::definition::OverlayDefinition;
use super::xml;
use crate::error::{CatalogError, RegistryError};
use crate::fsutil;

/// One catalog document fed to [`OverlayDatabase::load`]
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// In-memory document with a label used in error messages
    Text { origin: String, text: String },
    /// Document on disk; a missing file contributes nothing
    File(PathBuf),
}

impl CatalogSource {
    pub fn text(origin: impl Into<String>, text: impl Into<String>) -> Self {
        CatalogSource::Text {
            origin: origin.into(),
            text: text.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        CatalogSource::File(path.into())
    }
}

/// Result of a load: the merged database and the sources that were skipped
#[derive(Debug)]
pub struct LoadReport {
    pub database: OverlayDatabase,
    pub warnings: Vec<CatalogError>,
}

/// Mapping of overlay name to definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayDatabase {
    overlays: BTreeMap<String, OverlayDefinition>,
}

impl OverlayDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single catalog document
    pub fn parse(text: &str, origin: &str) -> Result<Self, CatalogError> {
        let mut database = Self::new();
        for definition in xml::parse_document(text, origin)? {
            if let Some(previous) = database.insert(definition) {
                debug!(
                    "Catalog '{}' defines overlay '{}' more than once; keeping the last entry",
                    origin, previous.name
                );
            }
        }
        Ok(database)
    }

    /// Parse a catalog document from disk
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Build a database from several sources, later sources winning.
    ///
    /// A source that fails to parse is skipped and reported in
    /// [`LoadReport::warnings`]. When every source that was present failed,
    /// the first failure is returned instead.
    pub fn load(sources: &[CatalogSource]) -> Result<LoadReport, CatalogError> {
        let mut database = Self::new();
        let mut warnings = Vec::new();
        let mut loaded = 0usize;

        for source in sources {
            let parsed = match source {
                CatalogSource::Text { origin, text } => Self::parse(text, origin),
                CatalogSource::File(path) => {
                    if !path.exists() {
                        debug!("Catalog file {} does not exist, skipping", path.display());
                        continue;
                    }
                    Self::from_file(path)
                }
            };

            match parsed {
                Ok(other) => {
                    loaded += 1;
                    database.merge(other);
                }
                Err(e) => {
                    warn!("{}", e);
                    warnings.push(e);
                }
            }
        }

        if loaded == 0 && !warnings.is_empty() {
            return Err(warnings.remove(0));
        }

        Ok(LoadReport { database, warnings })
    }

    /// Merge another database into this one; its entries replace ours
    pub fn merge(&mut self, other: OverlayDatabase) {
        for (name, definition) in other.overlays {
            if self.overlays.insert(name.clone(), definition).is_some() {
                debug!("Overlay '{}' overridden by a later catalog source", name);
            }
        }
    }

    /// Insert or replace a definition, returning the replaced one
    pub fn insert(&mut self, definition: OverlayDefinition) -> Option<OverlayDefinition> {
        self.overlays.insert(definition.name.clone(), definition)
    }

    pub fn get(&self, name: &str) -> Option<&OverlayDefinition> {
        self.overlays.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.overlays.contains_key(name)
    }

    /// Look up a definition by name
    pub fn select(&self, name: &str) -> Result<&OverlayDefinition, RegistryError> {
        self.overlays
            .get(name)
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
            })
    }

    /// Sorted overlay names
    pub fn names(&self) -> Vec<String> {
        self.overlays.keys().cloned().collect()
    }

    /// Definitions in precedence order
    pub fn list(&self) -> Vec<&OverlayDefinition> {
        let mut definitions: Vec<_> = self.overlays.values().collect();
        definitions.sort_by(|a, b| a.precedence_cmp(b));
        definitions
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Serialize as one catalog document, entries in name order
    pub fn to_document(&self) -> String {
        xml::write_document(self.overlays.values())
    }

    /// Write the catalog document atomically
    pub fn write(&self, path: &Path) -> Result<(), CatalogError> {
        fsutil::write_atomic(path, self.to_document().as_bytes()).map_err(|source| {
            CatalogError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Owner, Quality, Source, Status};
    use tempfile::TempDir;

    fn definition(name: &str, priority: i32, description: &str) -> OverlayDefinition {
        OverlayDefinition {
            name: name.to_string(),
            priority,
            quality: Quality::Testing,
            status: Status::Official,
            descriptions: vec![description.to_string()],
            owner: Owner {
                name: Some("Tester".to_string()),
                email: "tester@example.org".to_string(),
            },
            sources: vec![Source::new(format!("https://example.org/{name}.git"), "git")],
            feeds: vec![],
            homepage: None,
            irc: None,
        }
    }

    fn database(defs: Vec<OverlayDefinition>) -> OverlayDatabase {
        let mut db = OverlayDatabase::new();
        for def in defs {
            db.insert(def);
        }
        db
    }

    #[test]
    fn test_disjoint_merge_keeps_all_entries() {
        let mut a = database(vec![definition("alpha", 10, "A")]);
        let b = database(vec![definition("beta", 20, "B")]);

        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get("alpha").unwrap().descriptions, vec!["A"]);
        assert_eq!(a.get("beta").unwrap().descriptions, vec!["B"]);
    }

    #[test]
    fn test_overlapping_merge_later_wins() {
        let mut a = database(vec![definition("alpha", 10, "old")]);
        let b = database(vec![definition("alpha", 30, "new")]);

        a.merge(b);
        assert_eq!(a.len(), 1);
        let alpha = a.get("alpha").unwrap();
        assert_eq!(alpha.priority, 30);
        assert_eq!(alpha.descriptions, vec!["new"]);
    }

    #[test]
    fn test_select_unknown_is_not_found() {
        let db = database(vec![definition("alpha", 10, "A")]);
        let err = db.select("missing").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { ref name } if name == "missing"));
    }

    #[test]
    fn test_list_in_precedence_order() {
        let db = database(vec![
            definition("zeta", 5, "Z"),
            definition("alpha", 50, "A"),
            definition("beta", 5, "B"),
        ]);
        let names: Vec<_> = db.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "zeta", "alpha"]);
        assert_eq!(db.names(), vec!["alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.xml");
        let db = database(vec![definition("alpha", 10, "A"), definition("beta", 20, "B")]);

        db.write(&path).unwrap();
        let first = std::fs::read(&path).unwrap();
        assert_eq!(OverlayDatabase::from_file(&path).unwrap(), db);

        db.write(&path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn test_load_skips_malformed_and_missing_sources() {
        let dir = TempDir::new().unwrap();
        let good = database(vec![definition("alpha", 10, "A")]).to_document();

        let report = OverlayDatabase::load(&[
            CatalogSource::text("broken", "<repositories><repo>"),
            CatalogSource::file(dir.path().join("missing.xml")),
            CatalogSource::text("good", good),
        ])
        .unwrap();

        assert_eq!(report.database.names(), vec!["alpha"]);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_load_fails_when_every_source_fails() {
        let err = OverlayDatabase::load(&[
            CatalogSource::text("first", "not xml at all <"),
            CatalogSource::text("second", "<repositories><repo>"),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::Parse { ref origin, .. } if origin == "first"));
    }

    #[test]
    fn test_load_of_nothing_is_empty() {
        let report = OverlayDatabase::load(&[]).unwrap();
        assert!(report.database.is_empty());
        assert!(report.warnings.is_empty());
    }
}
