//! Strata - overlay registry and synchronization
//!
//! Command line front end for [`strata_core::RegistryApi`].

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use strata_core::{Config, RegistryApi, Selection};

mod output;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "strata",
    about = "Install, update and activate package overlays from shared catalogs",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Configuration file (defaults to strata.yaml in the user config directory)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Use the cached catalogs instead of fetching before add, sync and list
    #[clap(long, global = true)]
    nofetch: bool,

    /// Refuse unofficial overlays
    #[clap(long, global = true)]
    strict: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Refresh the cached remote catalogs
    Fetch {
        /// Drop the cached catalogs before fetching
        #[clap(long)]
        clear: bool,
    },

    /// Install overlays from the catalog
    Add {
        /// Overlay names (comma or space separated), or ALL
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// Update installed overlays
    Sync {
        /// Overlay names (comma or space separated), or ALL
        names: Vec<String>,

        /// Sync every installed overlay
        #[clap(long, conflicts_with = "names")]
        all: bool,
    },

    /// Remove installed overlays and their content
    Delete {
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// Activate installed overlays in the package manager configuration
    Enable {
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// Deactivate installed overlays, keeping their content
    Disable {
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// Show details about overlays
    Info {
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// List overlays from the catalog
    List {
        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// List installed overlays
    ListLocal {
        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },
}

/// Initialize tracing from the --log-level flag
///
/// `RUST_LOG` directives are added on top of the chosen level.
fn initialize_tracing(log_level: &LogLevel) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());
    if let Ok(env) = std::env::var("RUST_LOG") {
        for directive in env.split(',').filter(|d| !d.is_empty()) {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.log_level);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.strict {
        config.strict = true;
    }
    debug!("Storage root: {}", config.storage.display());

    let mut api = RegistryApi::new(config).context("Failed to initialize the overlay registry")?;

    let success = match cli.command {
        Command::Fetch { clear } => {
            if clear && !api.clear_cache() {
                false
            } else {
                api.fetch_remote_list().await
            }
        }
        Command::Add { names } => {
            implicit_fetch(&mut api, cli.nofetch).await;
            api.add_repos(&selection(&names)?).await
        }
        Command::Sync { names, all } => {
            let selection = if all {
                Selection::All
            } else {
                selection(&names)?
            };
            implicit_fetch(&mut api, cli.nofetch).await;
            api.sync(&selection).await
        }
        Command::Delete { names } => api.delete_repos(&selection(&names)?).await,
        Command::Enable { names } => api.enable_repos(&selection(&names)?),
        Command::Disable { names } => api.disable_repos(&selection(&names)?),
        Command::Info { names } => {
            let infos = api.info(&selection(&names)?);
            output::print_info(&infos);
            api.errors().is_empty()
        }
        Command::List { json } => {
            implicit_fetch(&mut api, cli.nofetch).await;
            let rows = api.list_remote();
            output::print_remote(&rows, json)?;
            api.errors().is_empty()
        }
        Command::ListLocal { json } => {
            let rows = api.list_local();
            output::print_local(&rows, json)?;
            api.errors().is_empty()
        }
    };

    output::print_messages(&api);

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn selection(names: &[String]) -> Result<Selection> {
    let selection = Selection::parse(names);
    if selection.is_empty() {
        bail!("No overlay names given. Pass one or more names, or ALL.");
    }
    Ok(selection)
}

/// Refresh the catalogs unless --nofetch; a failure falls back to the cache
async fn implicit_fetch(api: &mut RegistryApi, nofetch: bool) {
    if nofetch {
        debug!("Skipping catalog fetch (--nofetch)");
        return;
    }

    if !api.fetch_remote_list().await {
        warn!("Catalog fetch failed, using cached catalogs");
        let messages: Vec<String> = api
            .warnings()
            .iter()
            .cloned()
            .chain(api.errors().iter().map(|e| e.to_string()))
            .collect();
        api.clear_messages();
        for message in messages {
            eprintln!("Warning: {message}");
        }
    }
}
