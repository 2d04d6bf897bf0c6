//! `make.conf` style variable holding overlay paths
//!
//! The variable is rendered one path per line:
//!
//! ```text
//! PORTDIR_OVERLAY="
//! /var/lib/strata/wrobel
//! $PORTDIR_OVERLAY
//! "
//! ```
//!
//! Managed paths come first in precedence order, followed by any other
//! entries in their original order.

use regex::Regex;
use std::path::{Path, PathBuf};

use super::{ConfigModule, DesiredEntry};

pub struct MakeConf {
    path: PathBuf,
    variable: String,
    storage: PathBuf,
}

impl MakeConf {
    pub fn new(path: PathBuf, variable: String, storage: PathBuf) -> Self {
        Self {
            path,
            variable,
            storage,
        }
    }

    fn render_assignment(&self, desired: &[DesiredEntry], unmanaged: &[&str]) -> String {
        let mut out = format!("{}=\"\n", self.variable);
        for entry in desired {
            out.push_str(&entry.path.display().to_string());
            out.push('\n');
        }
        for token in unmanaged {
            out.push_str(token);
            out.push('\n');
        }
        out.push('"');
        out
    }
}

impl ConfigModule for MakeConf {
    fn name(&self) -> &str {
        "make.conf"
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn render(&self, existing: &str, desired: &[DesiredEntry]) -> Result<Option<String>, String> {
        let pattern = Regex::new(&format!("(?m)^{}=", regex::escape(&self.variable)))
            .map_err(|e| e.to_string())?;

        let Some(found) = pattern.find(existing) else {
            if desired.is_empty() {
                return Ok(None);
            }
            let mut out = existing.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.render_assignment(desired, &[]));
            out.push('\n');
            return Ok(Some(out));
        };

        if !existing[found.end()..].starts_with('"') {
            return Err(format!("{} is not a double-quoted value", self.variable));
        }
        let value_start = found.end() + 1;
        let value_len = existing[value_start..]
            .find('"')
            .ok_or_else(|| format!("{} has no closing quote", self.variable))?;
        let value_end = value_start + value_len;

        let unmanaged: Vec<&str> = existing[value_start..value_end]
            .split_whitespace()
            .filter(|token| !Path::new(token).starts_with(&self.storage))
            .collect();

        let mut out = String::with_capacity(existing.len());
        out.push_str(&existing[..found.start()]);
        out.push_str(&self.render_assignment(desired, &unmanaged));
        out.push_str(&existing[value_end + 1..]);
        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn module() -> MakeConf {
        MakeConf::new(
            PathBuf::from("/etc/strata/make.conf"),
            "PORTDIR_OVERLAY".to_string(),
            PathBuf::from("/var/lib/strata"),
        )
    }

    fn entry(name: &str) -> DesiredEntry {
        DesiredEntry {
            name: name.to_string(),
            path: PathBuf::from("/var/lib/strata").join(name),
            priority: 50,
            source_type: "git".to_string(),
        }
    }

    #[test]
    fn test_adds_path_before_existing_entries() {
        let existing = "PORTDIR_OVERLAY=\"\n$PORTDIR_OVERLAY\"\n";
        let rendered = module().render(existing, &[entry("wrobel")]).unwrap().unwrap();
        assert_eq!(
            rendered,
            "PORTDIR_OVERLAY=\"\n/var/lib/strata/wrobel\n$PORTDIR_OVERLAY\n\"\n"
        );
    }

    #[test]
    fn test_removes_managed_paths_only() {
        let existing = "# local\nPORTDIR_OVERLAY=\"\n/var/lib/strata/old\n/usr/local/portage\n\"\nFEATURES=\"x\"\n";
        let rendered = module().render(existing, &[]).unwrap().unwrap();
        assert_eq!(
            rendered,
            "# local\nPORTDIR_OVERLAY=\"\n/usr/local/portage\n\"\nFEATURES=\"x\"\n"
        );
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let existing = "PORTDIR_OVERLAY=\"\n$PORTDIR_OVERLAY\"\n";
        let desired = [entry("a"), entry("b")];
        let once = module().render(existing, &desired).unwrap().unwrap();
        let twice = module().render(&once, &desired).unwrap().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_variable() {
        assert_eq!(module().render("FEATURES=\"x\"", &[]).unwrap(), None);

        let rendered = module().render("FEATURES=\"x\"", &[entry("a")]).unwrap().unwrap();
        assert_eq!(
            rendered,
            "FEATURES=\"x\"\nPORTDIR_OVERLAY=\"\n/var/lib/strata/a\n\"\n"
        );
    }

    #[test]
    fn test_unterminated_value_is_malformed() {
        let err = module()
            .render("PORTDIR_OVERLAY=\"\n/usr/local/portage\n", &[])
            .unwrap_err();
        assert!(err.contains("closing quote"));
    }

    #[test]
    fn test_unquoted_value_is_malformed() {
        let err = module()
            .render("PORTDIR_OVERLAY=/usr/local/portage\nFEATURES=\"x\"\n", &[entry("a")])
            .unwrap_err();
        assert!(err.contains("double-quoted"));
    }

    #[test]
    fn test_reconcile_sequence_keeps_single_block() {
        let module = module();
        let start = "PORTDIR_OVERLAY=\"\n/usr/local/portage\n\"\n";

        let added = module.render(start, &[entry("a"), entry("b")]).unwrap().unwrap();
        assert_eq!(added.matches("PORTDIR_OVERLAY=").count(), 1);
        assert_eq!(added.matches("/var/lib/strata/a").count(), 1);

        let removed = module.render(&added, &[entry("b")]).unwrap().unwrap();
        assert_eq!(
            removed,
            "PORTDIR_OVERLAY=\"\n/var/lib/strata/b\n/usr/local/portage\n\"\n"
        );
    }

    #[test]
    fn test_similar_variable_name_not_matched() {
        let existing = "MY_PORTDIR_OVERLAY=\"/x\"\n";
        let rendered = module().render(existing, &[entry("a")]).unwrap().unwrap();
        assert!(rendered.starts_with("MY_PORTDIR_OVERLAY=\"/x\"\n"));
        assert!(rendered.contains("\nPORTDIR_OVERLAY=\"\n/var/lib/strata/a\n\"\n"));
    }
}
