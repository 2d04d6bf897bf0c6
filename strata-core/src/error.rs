//! Error types for the overlay registry, with actionable messages
//!
//! Each subsystem has its own error enum. [`RegistryError`] is what the
//! orchestration layer records in its per-overlay error log.

use std::path::PathBuf;
use thiserror::Error;

/// Errors reading, parsing, or writing catalog documents
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The document does not conform to the catalog schema
    #[error("Failed to parse catalog '{origin}': {message}")]
    Parse { origin: String, message: String },

    /// The catalog file could not be read
    #[error("Failed to read catalog {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The catalog file could not be written
    #[error("Failed to write catalog {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CatalogError {
    pub(crate) fn parse(origin: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::Parse {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by a sync backend while adding, syncing, or deleting content
#[derive(Error, Debug)]
pub enum BackendError {
    /// `add` refuses to materialize content over an existing, non-empty path
    #[error("Target path {path} already exists and is not empty")]
    PathNotEmpty { path: PathBuf },

    /// The backend program could not be started
    #[error("Failed to run '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend program exited unsuccessfully
    #[error("Command '{command}' exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The caller-supplied timeout expired
    #[error("Timed out after {seconds}s during {operation} of {path}")]
    TimedOut {
        operation: &'static str,
        path: PathBuf,
        seconds: u64,
    },

    /// Archive content could not be retrieved
    #[error("Failed to retrieve {uri}: {message}")]
    Retrieve { uri: String, message: String },

    /// Archive compression could not be determined or is not supported
    #[error("Unsupported archive format for {uri}")]
    ArchiveFormat { uri: String },

    /// The requested branch/subpath does not exist inside the archive
    #[error("Archive {uri} has no directory '{branch}'")]
    MissingBranch { uri: String, branch: String },

    /// Filesystem failure while materializing or removing content
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors retrieving a remote catalog
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport or status failure
    #[error("HTTP fetch of {url} failed: {message}")]
    Http { url: String, message: String },

    /// rsync transport failure
    #[error("rsync fetch of {url} failed: {message}")]
    Rsync { url: String, message: String },

    /// Local file transport failure
    #[error("Failed to read {url}")]
    File {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// The retrieved document is not a valid catalog
    #[error("Catalog fetched from {url} is invalid")]
    Invalid {
        url: String,
        #[source]
        source: CatalogError,
    },

    /// The detached signature did not validate
    #[error("Signature verification failed for {url}: {message}")]
    Signature { url: String, message: String },

    /// The cache file could not be replaced
    #[error("Failed to update cache file {path}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The URL scheme has no transport
    #[error("Unsupported catalog URL scheme: {url}")]
    UnsupportedScheme { url: String },

    /// Every URL of a catalog source failed
    #[error("Failed to fetch catalog from any of: {urls}")]
    AllFailed { urls: String },
}

/// Errors rewriting a config fragment
#[derive(Error, Debug)]
pub enum ConfigWriteError {
    /// The existing fragment could not be read
    #[error("Failed to read config fragment {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The fragment could not be replaced; the previous file is intact
    #[error("Failed to write config fragment {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing fragment cannot be interpreted safely
    #[error("Config fragment {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },
}

/// Errors acquiring the mutating-operation guard
#[derive(Error, Debug)]
pub enum LockError {
    /// Another invocation holds the lock
    #[error("Another strata process holds the lock {path}.\n\nWait for it to finish and retry.")]
    Busy { path: PathBuf },

    /// The lock file could not be opened or locked
    #[error("Failed to lock {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors surfaced by the registry API
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Unknown overlay name
    #[error("Overlay '{name}' does not exist in the catalog")]
    NotFound { name: String },

    /// The operation requires an installed overlay
    #[error("Overlay '{name}' is not installed")]
    NotInstalled { name: String },

    /// `add` on an overlay that is already installed
    #[error("Overlay '{name}' is already installed")]
    AlreadyInstalled { name: String },

    /// No registered backend for any declared source type
    #[error("Overlay '{name}' has no supported source type (declared: {types})")]
    UnsupportedSource { name: String, types: String },

    /// Strict mode refuses unofficial overlays
    #[error("Overlay '{name}' is not official and strict checking is enabled")]
    Unofficial { name: String },

    /// The backend failed for one overlay
    #[error("Overlay '{name}': {source}")]
    Backend {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    ConfigWrite(#[from] ConfigWriteError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// The installed overlay set could not be loaded or saved
    #[error("Installed overlay set {path}: {message}")]
    State { path: PathBuf, message: String },
}

/// One entry of the orchestration error log
#[derive(Debug)]
pub struct OverlayError {
    /// Overlay the error belongs to, or the operation name for batch-wide failures
    pub overlay: String,
    pub error: RegistryError,
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}
