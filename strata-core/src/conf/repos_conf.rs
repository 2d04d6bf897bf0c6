//! `repos.conf` sections, one per enabled overlay

use regex::Regex;
use std::path::{Path, PathBuf};

use super::{ConfigModule, DesiredEntry};

pub struct ReposConf {
    path: PathBuf,
    storage: PathBuf,
}

impl ReposConf {
    pub fn new(path: PathBuf, storage: PathBuf) -> Self {
        Self { path, storage }
    }

    fn section(entry: &DesiredEntry) -> String {
        format!(
            "[{}]\npriority = {}\nlocation = {}\noverlay-type = {}\nauto-sync = no\n",
            entry.name,
            entry.priority,
            entry.path.display(),
            entry.source_type
        )
    }

    /// Split `existing` into blocks: the preamble, then one block per section
    fn blocks(existing: &str) -> Vec<String> {
        let mut blocks = vec![String::new()];
        for line in existing.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                blocks.push(String::new());
            }
            if let Some(current) = blocks.last_mut() {
                current.push_str(line);
            }
        }
        blocks
    }

    fn is_managed(&self, block: &str, location: &Regex) -> bool {
        location
            .captures(block)
            .and_then(|c| c.get(1))
            .is_some_and(|m| Path::new(m.as_str().trim()).starts_with(&self.storage))
    }
}

impl ConfigModule for ReposConf {
    fn name(&self) -> &str {
        "repos.conf"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn render(&self, existing: &str, desired: &[DesiredEntry]) -> Result<Option<String>, String> {
        if existing.is_empty() && desired.is_empty() {
            return Ok(None);
        }

        let location = Regex::new(r"(?m)^\s*location\s*=\s*(.+?)\s*$").map_err(|e| e.to_string())?;

        let kept: String = Self::blocks(existing)
            .into_iter()
            .filter(|block| !self.is_managed(block, &location))
            .collect();
        let kept = kept.trim_end_matches('\n');

        let mut sorted: Vec<&DesiredEntry> = desired.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        let managed = sorted
            .into_iter()
            .map(Self::section)
            .collect::<Vec<_>>()
            .join("\n");

        let out = match (kept.is_empty(), managed.is_empty()) {
            (true, _) => managed,
            (false, true) => format!("{kept}\n"),
            (false, false) => format!("{kept}\n\n{managed}"),
        };
        Ok(Some(out))
    }
}
