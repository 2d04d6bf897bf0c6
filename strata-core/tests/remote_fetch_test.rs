//! Remote catalog fetching and the URL-keyed cache, using file URLs

mod common;

use common::{fixture, init_test_logging};
use std::path::Path;
use std::time::Duration;
use strata_core::error::FetchError;
use strata_core::remote::signature::SignatureVerifier;
use strata_core::remote::RemoteFetcher;
use tempfile::TempDir;

fn fetcher(dir: &Path) -> RemoteFetcher {
    RemoteFetcher::new(dir.join("cache"), None, Duration::from_secs(5)).unwrap()
}

fn publish(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    format!("file://{}", path.display())
}

#[tokio::test]
async fn test_unchanged_refetch_leaves_cache_alone() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let url = publish(dir.path(), "repositories.xml", &fixture("global-overlays.xml"));

    let first = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(first.succeeded);
    assert!(first.changed);
    assert_eq!(first.url.as_deref(), Some(url.as_str()));

    let cached = fetcher.cached(&url).unwrap();
    assert_eq!(cached.bytes, fixture("global-overlays.xml").into_bytes());

    let second = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(second.succeeded);
    assert!(!second.changed);

    let again = fetcher.cached(&url).unwrap();
    assert_eq!(again.bytes, cached.bytes);
    assert_eq!(again.modified, cached.modified);
}

#[tokio::test]
async fn test_one_character_change_rewrites_cache() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let original = fixture("global-overlays.xml");
    let url = publish(dir.path(), "repositories.xml", &original);

    assert!(fetcher.fetch(std::slice::from_ref(&url)).await.changed);

    let edited = original.replace("<description>Test</description>", "<description>Tesu</description>");
    publish(dir.path(), "repositories.xml", &edited);

    let outcome = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(outcome.succeeded);
    assert!(outcome.changed);
    assert_eq!(fetcher.cached(&url).unwrap().bytes, edited.into_bytes());
}

#[tokio::test]
async fn test_falls_through_to_next_mirror() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let missing = format!("file://{}", dir.path().join("missing.xml").display());
    let good = publish(dir.path(), "mirror.xml", &fixture("global-overlays.xml"));

    let outcome = fetcher.fetch(&[missing.clone(), good.clone()]).await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.url.as_deref(), Some(good.as_str()));
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(outcome.failures[0], FetchError::File { .. }));

    assert!(fetcher.cached(&missing).is_none());
    assert!(fetcher.cached(&good).is_some());
    assert_eq!(
        fetcher.latest_cached(&[missing, good.clone()]).unwrap().url,
        good
    );
}

#[tokio::test]
async fn test_latest_cached_follows_last_successful_mirror() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let primary_content = fixture("global-overlays.xml");
    let mirror_content = primary_content.replace("<description>Test</description>", "<description>From mirror</description>");

    let primary = publish(dir.path(), "primary.xml", &primary_content);
    let mirror = publish(dir.path(), "mirror.xml", &mirror_content);
    let urls = vec![primary.clone(), mirror.clone()];

    assert_eq!(fetcher.fetch(&urls).await.url.as_deref(), Some(primary.as_str()));

    // Primary down: the mirror is fetched and becomes the newest cache file
    std::fs::rename(dir.path().join("primary.xml"), dir.path().join("primary.bak")).unwrap();
    assert_eq!(fetcher.fetch(&urls).await.url.as_deref(), Some(mirror.as_str()));
    assert_eq!(fetcher.latest_cached(&urls).unwrap().url, mirror);

    // Primary back with unchanged content: its cache file is not rewritten
    std::fs::rename(dir.path().join("primary.bak"), dir.path().join("primary.xml")).unwrap();
    let outcome = fetcher.fetch(&urls).await;
    assert_eq!(outcome.url.as_deref(), Some(primary.as_str()));
    assert!(!outcome.changed);

    let latest = fetcher.latest_cached(&urls).unwrap();
    assert_eq!(latest.url, primary);
    assert!(!latest.text().contains("From mirror"));
}

#[tokio::test]
async fn test_all_failed_keeps_previous_cache() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let url = publish(dir.path(), "repositories.xml", &fixture("global-overlays.xml"));
    assert!(fetcher.fetch(std::slice::from_ref(&url)).await.succeeded);
    let before = fetcher.cached(&url).unwrap();

    // Now the document is broken and the mirror does not exist
    publish(dir.path(), "repositories.xml", "<repositories><repo>");
    let missing = format!("file://{}", dir.path().join("missing.xml").display());

    let outcome = fetcher.fetch(&[url.clone(), missing]).await;
    assert!(!outcome.succeeded);
    assert!(!outcome.changed);
    assert_eq!(outcome.failures.len(), 2);
    assert!(matches!(outcome.failures[0], FetchError::Invalid { .. }));
    assert!(matches!(outcome.failures[1], FetchError::File { .. }));

    let after = fetcher.cached(&url).unwrap();
    assert_eq!(after.bytes, before.bytes);
    assert_eq!(after.modified, before.modified);
}

#[tokio::test]
async fn test_signed_catalog_accepted() {
    let dir = TempDir::new().unwrap();
    let verifier = SignatureVerifier::new(b"shared-key".to_vec(), ".sig");
    let fetcher = fetcher(dir.path()).with_verifier(verifier.clone());

    let content = fixture("global-overlays.xml");
    let url = publish(dir.path(), "repositories.xml", &content);
    publish(
        dir.path(),
        "repositories.xml.sig",
        &verifier.sign(content.as_bytes()).unwrap(),
    );

    let outcome = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(outcome.succeeded, "{:?}", outcome.failures);
}

#[tokio::test]
async fn test_bad_signature_rejected_before_cache() {
    let dir = TempDir::new().unwrap();
    let verifier = SignatureVerifier::new(b"shared-key".to_vec(), ".sig");
    let fetcher = fetcher(dir.path()).with_verifier(verifier.clone());

    let url = publish(dir.path(), "repositories.xml", &fixture("global-overlays.xml"));
    publish(
        dir.path(),
        "repositories.xml.sig",
        &verifier.sign(b"something else").unwrap(),
    );

    let outcome = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(!outcome.succeeded);
    assert!(matches!(outcome.failures[0], FetchError::Signature { .. }));
    assert!(fetcher.cached(&url).is_none());
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let dir = TempDir::new().unwrap();
    let verifier = SignatureVerifier::new(b"shared-key".to_vec(), ".sig");
    let fetcher = fetcher(dir.path()).with_verifier(verifier);
    let url = publish(dir.path(), "repositories.xml", &fixture("global-overlays.xml"));

    let outcome = fetcher.fetch(std::slice::from_ref(&url)).await;
    assert!(!outcome.succeeded);
    assert!(matches!(outcome.failures[0], FetchError::Signature { .. }));
}

#[tokio::test]
async fn test_clear_cache() {
    let dir = TempDir::new().unwrap();
    let fetcher = fetcher(dir.path());
    let url = publish(dir.path(), "repositories.xml", &fixture("global-overlays.xml"));
    fetcher.fetch(std::slice::from_ref(&url)).await;

    assert!(fetcher.marker_path(std::slice::from_ref(&url)).exists());
    assert_eq!(fetcher.clear_cache().unwrap(), 1);
    assert!(fetcher.cached(&url).is_none());
    assert!(!fetcher.marker_path(std::slice::from_ref(&url)).exists());
}
