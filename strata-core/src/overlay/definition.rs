//! Overlay definitions
//!
//! A definition is the immutable metadata record of one overlay as described
//! by a catalog document.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Priority assigned to overlays whose catalog entry does not declare one
pub const DEFAULT_PRIORITY: i32 = 50;

/// Maturity tag declared by the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Core,
    Stable,
    Testing,
    #[default]
    Experimental,
    Graveyard,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Core => "core",
            Quality::Stable => "stable",
            Quality::Testing => "testing",
            Quality::Experimental => "experimental",
            Quality::Graveyard => "graveyard",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Quality::Core),
            "stable" => Ok(Quality::Stable),
            "testing" => Ok(Quality::Testing),
            "experimental" => Ok(Quality::Experimental),
            "graveyard" => Ok(Quality::Graveyard),
            other => Err(format!("unknown quality '{other}'")),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the overlay is maintained by the distribution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Official,
    #[default]
    Unofficial,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Official => "official",
            Status::Unofficial => "unofficial",
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" => Ok(Status::Official),
            "unofficial" => Ok(Status::Unofficial),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overlay owner contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
}

/// One place the overlay content can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub uri: String,

    /// Source type identifier, e.g. "git", "svn", "tar"
    pub source_type: String,

    /// Branch, module, or archive subpath, depending on the source type
    #[serde(default)]
    pub branch: Option<String>,
}

impl Source {
    pub fn new(uri: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            source_type: source_type.into(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// Metadata of a single overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDefinition {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub status: Status,
    pub descriptions: Vec<String>,
    pub owner: Owner,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub irc: Option<String>,
}

/// A name is a single path component below the storage root and is safe to
/// write into config fragments unquoted
fn is_valid_name(name: &str) -> bool {
    name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
}

impl OverlayDefinition {
    /// Check the invariants every catalog entry must satisfy
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("overlay without a name".to_string());
        }
        if !is_valid_name(&self.name) {
            return Err(format!(
                "overlay name '{}' may only contain letters, digits and '_.+-'",
                self.name.escape_debug()
            ));
        }

        let email = self.owner.email.trim();
        if email.is_empty() {
            return Err(format!("overlay '{}' has no owner email", self.name));
        }
        if !email.contains('@') {
            return Err(format!(
                "overlay '{}' has an invalid owner email '{}'",
                self.name, email
            ));
        }

        if self.descriptions.is_empty() {
            return Err(format!("overlay '{}' has no description", self.name));
        }

        if self.sources.is_empty() {
            return Err(format!("overlay '{}' has no source", self.name));
        }

        for source in &self.sources {
            if source.uri.trim().is_empty() {
                return Err(format!("overlay '{}' has a source without URI", self.name));
            }
            if source.source_type.trim().is_empty() {
                return Err(format!(
                    "overlay '{}' has a source without type ({})",
                    self.name, source.uri
                ));
            }
            if !source
                .source_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(format!(
                    "overlay '{}' has an invalid source type '{}'",
                    self.name,
                    source.source_type.escape_debug()
                ));
            }
        }

        Ok(())
    }

    pub fn is_official(&self) -> bool {
        self.status == Status::Official
    }

    pub fn source_types(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.source_type.as_str())
    }

    pub fn source_uris(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.uri.as_str())
    }

    /// Where this overlay's content lives below the storage root
    pub fn content_path(&self, storage: &Path) -> PathBuf {
        storage.join(&self.name)
    }

    /// Order by precedence: lower priority value first, then by name
    pub fn precedence_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }

    /// Source type label for one-line listings ("git", or "git/.." for mixed)
    pub fn type_label(&self) -> String {
        let mut types = self.source_types();
        let first = types.next().unwrap_or_default();
        if types.all(|t| t == first) {
            first.to_string()
        } else {
            format!("{first}/..")
        }
    }

    /// First description line
    pub fn summary(&self) -> &str {
        self.descriptions
            .first()
            .and_then(|d| d.lines().next())
            .map(str::trim)
            .unwrap_or_default()
    }

    /// Multi-line human readable description block
    pub fn info_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.name);
        out.push('\n');
        out.push_str(&"~".repeat(self.name.chars().count()));
        out.push('\n');

        for (index, source) in self.sources.iter().enumerate() {
            let label = if index == 0 { "Source  :" } else { "         " };
            match &source.branch {
                Some(branch) => {
                    out.push_str(&format!("{label} {} ({branch})\n", source.uri));
                }
                None => out.push_str(&format!("{label} {}\n", source.uri)),
            }
        }

        match &self.owner.name {
            Some(name) => out.push_str(&format!("Contact : {name} <{}>\n", self.owner.email)),
            None => out.push_str(&format!("Contact : {}\n", self.owner.email)),
        }
        out.push_str(&format!(
            "Type    : {}; Priority: {}\n",
            self.type_label(),
            self.priority
        ));
        out.push_str(&format!("Quality : {}\n", self.quality));
        out.push_str("\nDescription:\n");
        for description in &self.descriptions {
            for line in description.lines() {
                out.push_str(&format!("  {}\n", line.trim()));
            }
        }

        if let Some(homepage) = &self.homepage {
            out.push_str(&format!("\nLink:\n  {homepage}\n"));
        }
        if !self.feeds.is_empty() {
            out.push_str("\nFeeds:\n");
            for feed in &self.feeds {
                out.push_str(&format!("  {feed}\n"));
            }
        }
        if let Some(irc) = &self.irc {
            out.push_str(&format!("\nIRC:\n  {irc}\n"));
        }

        out
    }
}
