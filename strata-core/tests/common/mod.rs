//! Shared helpers for strata-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;

use strata_core::backend::{BackendRegistry, SyncBackend};
use strata_core::conf::ConfigManager;
use strata_core::config::{Config, ConfType};
use strata_core::error::BackendError;
use strata_core::overlay::Source;
use strata_core::remote::RemoteFetcher;
use strata_core::RegistryApi;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

/// Backend that materializes a marker file instead of running a VCS
#[derive(Default)]
pub struct StubBackend {
    pub calls: Mutex<Vec<String>>,
    /// Make every sync fail as an unreachable source would
    pub fail_sync: AtomicBool,
}

impl StubBackend {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SyncBackend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn add(&self, path: &Path, source: &Source) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(format!("add {}", source.uri));
        std::fs::create_dir_all(path).map_err(|e| BackendError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path.join("README"), &source.uri).map_err(|e| BackendError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    async fn sync(&self, _path: &Path, source: &Source) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(format!("sync {}", source.uri));
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(BackendError::CommandFailed {
                command: format!("stub sync {}", source.uri),
                code: 128,
                stderr: "repository not found".to_string(),
            });
        }
        Ok(())
    }
}

/// Temporary storage root, catalog directory and config fragments
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub backend: Arc<StubBackend>,
}

impl TestEnv {
    /// Environment whose only catalog is the local `global-overlays.xml`
    pub fn new() -> Self {
        init_test_logging();

        let dir = TempDir::new().unwrap();
        let overlays = dir.path().join("overlays");
        std::fs::create_dir_all(&overlays).unwrap();
        std::fs::copy(
            fixture_path("global-overlays.xml"),
            overlays.join("global-overlays.xml"),
        )
        .unwrap();

        let make_conf = dir.path().join("make.conf");
        std::fs::write(&make_conf, "PORTDIR_OVERLAY=\"\n$PORTDIR_OVERLAY\"\n").unwrap();

        let config = Config {
            storage: dir.path().join("storage"),
            cache_dir: Some(dir.path().join("cache")),
            catalogs: vec![],
            overlay_defs: Some(overlays),
            conf_types: vec![ConfType::MakeConf, ConfType::ReposConf],
            make_conf: Some(make_conf),
            repos_conf: dir.path().join("repos.conf"),
            ..Default::default()
        };

        Self {
            dir,
            config,
            backend: Arc::new(StubBackend::default()),
        }
    }

    /// API whose stub backend serves only `source_types`
    pub fn api(&self, source_types: &[&str]) -> RegistryApi {
        let mut backends = BackendRegistry::new();
        backends.register(source_types, self.backend.clone());

        let fetcher = RemoteFetcher::new(
            self.config.cache_dir(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        let conf = ConfigManager::from_config(&self.config);

        RegistryApi::with_components(self.config.clone(), fetcher, backends, conf).unwrap()
    }

    pub fn storage(&self) -> &Path {
        &self.config.storage
    }

    pub fn make_conf(&self) -> String {
        std::fs::read_to_string(self.config.make_conf_path()).unwrap()
    }

    pub fn repos_conf(&self) -> String {
        std::fs::read_to_string(&self.config.repos_conf).unwrap_or_default()
    }
}
