//! Version-control backends that shell out to the VCS program
//!
//! Each built-in [`CommandTemplate`] lists the arguments for the initial
//! checkout and for updates. Arguments may contain `{uri}`, `{path}`,
//! `{dirname}` (last component of the path) and `{branch}`; the standalone
//! arguments `{opts}` and `{branch_opts}` expand to the configured extra
//! options and to the branch selection arguments.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use super::SyncBackend;
use crate::config::CommandOverride;
use crate::error::BackendError;
use crate::overlay::Source;

const RSYNC_ARGS: &[&str] = &[
    "-rlptD",
    "--links",
    "--safe-links",
    "--delete",
    "--delete-after",
    "--timeout=180",
    "--exclude=distfiles/*",
    "--exclude=local/*",
    "--exclude=packages/*",
    "{opts}",
    "{uri}/",
    "{path}",
];

/// Argument layout for one VCS program
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    /// Source type identifiers served by this template
    pub aliases: &'static [&'static str],
    pub program: &'static str,
    pub add: &'static [&'static str],
    /// Inserted at `{branch_opts}` when the source names a branch
    pub branch: &'static [&'static str],
    /// Run inside the content directory
    pub sync: &'static [&'static str],
    /// Run the checkout from the parent of the content directory
    pub add_in_parent: bool,
}

pub const BUILTIN_TEMPLATES: &[CommandTemplate] = &[
    CommandTemplate {
        aliases: &["git"],
        program: "git",
        add: &["clone", "{opts}", "{branch_opts}", "{uri}", "{path}"],
        branch: &["--branch", "{branch}"],
        sync: &["pull", "{opts}"],
        add_in_parent: false,
    },
    CommandTemplate {
        aliases: &["mercurial", "hg"],
        program: "hg",
        add: &["clone", "{opts}", "{branch_opts}", "{uri}", "{path}"],
        branch: &["--updaterev", "{branch}"],
        sync: &["pull", "-u", "{opts}"],
        add_in_parent: false,
    },
    CommandTemplate {
        aliases: &["svn", "subversion"],
        program: "svn",
        add: &["checkout", "{opts}", "{uri}", "{path}"],
        branch: &[],
        sync: &["update", "--accept", "theirs-full", "{opts}"],
        add_in_parent: false,
    },
    CommandTemplate {
        aliases: &["bzr", "bazaar"],
        program: "bzr",
        add: &["branch", "{opts}", "{uri}", "{path}"],
        branch: &[],
        sync: &["pull", "--overwrite", "{opts}", "{uri}"],
        add_in_parent: false,
    },
    CommandTemplate {
        aliases: &["darcs"],
        program: "darcs",
        add: &["get", "--lazy", "{opts}", "{uri}", "{path}"],
        branch: &[],
        sync: &["pull", "--all", "{opts}", "{uri}"],
        add_in_parent: false,
    },
    CommandTemplate {
        aliases: &["rsync"],
        program: "rsync",
        add: RSYNC_ARGS,
        branch: &[],
        sync: RSYNC_ARGS,
        add_in_parent: false,
    },
    // cvs refuses an absolute -d, so the checkout runs next to the target
    CommandTemplate {
        aliases: &["cvs"],
        program: "cvs",
        add: &[
            "-q",
            "-d",
            "{uri}",
            "checkout",
            "{opts}",
            "{branch_opts}",
            "-d",
            "{dirname}",
            ".",
        ],
        branch: &["-r", "{branch}"],
        sync: &["-q", "update", "-d", "{opts}"],
        add_in_parent: true,
    },
];

/// Backend running a VCS program per [`CommandTemplate`]
pub struct CommandBackend {
    template: CommandTemplate,
    overrides: CommandOverride,
}

impl CommandBackend {
    pub fn new(template: CommandTemplate, overrides: CommandOverride) -> Self {
        Self {
            template,
            overrides,
        }
    }

    fn program(&self) -> &str {
        self.overrides
            .program
            .as_deref()
            .unwrap_or(self.template.program)
    }

    /// Expand a template against `source` and `path`
    pub fn expand(&self, template: &[&str], opts: &[String], path: &Path, source: &Source) -> Vec<String> {
        let dirname = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = path.display().to_string();
        let branch = source.branch.as_deref().unwrap_or_default();
        let substitute = |arg: &str| {
            arg.replace("{uri}", &source.uri)
                .replace("{path}", &path)
                .replace("{dirname}", &dirname)
                .replace("{branch}", branch)
        };

        let mut args = Vec::new();
        for arg in template {
            match *arg {
                "{opts}" => args.extend(opts.iter().cloned()),
                "{branch_opts}" => {
                    if source.branch.is_some() {
                        args.extend(self.template.branch.iter().map(|a| substitute(*a)));
                    }
                }
                other => args.push(substitute(other)),
            }
        }
        args
    }

    async fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<(), BackendError> {
        let mut command = Command::new(program);
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Running: {}", command_line);

        let output = command.output().await.map_err(|source| BackendError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(BackendError::CommandFailed {
                command: command_line,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncBackend for CommandBackend {
    fn name(&self) -> &str {
        self.template.program
    }

    async fn add(&self, path: &Path, source: &Source) -> Result<(), BackendError> {
        let args = self.expand(self.template.add, &self.overrides.add_opts, path, source);
        let cwd = if self.template.add_in_parent {
            path.parent()
        } else {
            None
        };
        self.run(self.program(), &args, cwd).await
    }

    async fn sync(&self, path: &Path, source: &Source) -> Result<(), BackendError> {
        let args = self.expand(self.template.sync, &self.overrides.sync_opts, path, source);
        self.run(self.program(), &args, Some(path)).await?;

        if let Some(post_sync) = &self.overrides.post_sync {
            info!("Running post-sync command in {}", path.display());
            self.run("sh", &["-c".to_string(), post_sync.clone()], Some(path))
                .await?;
        }
        Ok(())
    }
}
