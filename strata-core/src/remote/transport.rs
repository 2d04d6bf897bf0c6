//! Byte retrieval by URL scheme: HTTP(S), rsync and local files

use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::FetchError;

/// Build the HTTP client used for catalogs and archive sources
pub(crate) fn http_client(
    proxy: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}

/// Local filesystem path for `file://` URLs and bare paths
pub(crate) fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Retrieve the bytes at `url`
pub(crate) async fn retrieve(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return retrieve_http(client, url).await;
    }
    if url.starts_with("rsync://") {
        return retrieve_rsync(url, timeout).await;
    }

    match local_path(url) {
        Some(path) => tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::File {
                url: url.to_string(),
                source,
            }),
        None => Err(FetchError::UnsupportedScheme {
            url: url.to_string(),
        }),
    }
}

async fn retrieve_http(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    debug!("GET {}", url);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Http {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(FetchError::Http {
            url: url.to_string(),
            message: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(|e| FetchError::Http {
        url: url.to_string(),
        message: format!("failed to read response body: {e}"),
    })?;

    Ok(bytes.to_vec())
}

async fn retrieve_rsync(url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
    let rsync_error = |message: String| FetchError::Rsync {
        url: url.to_string(),
        message,
    };

    let dir = tempfile::tempdir().map_err(|e| rsync_error(e.to_string()))?;
    let target = dir.path().join("catalog");

    debug!("rsync {} -> {}", url, target.display());
    let mut command = Command::new("rsync");
    command
        .arg("--quiet")
        .arg(format!("--timeout={}", timeout.as_secs().max(1)))
        .arg(url)
        .arg(&target)
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(rsync_error(format!("failed to run rsync: {e}"))),
        Err(_) => {
            return Err(rsync_error(format!(
                "timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    if !output.status.success() {
        return Err(rsync_error(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    tokio::fs::read(&target)
        .await
        .map_err(|e| rsync_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_path() {
        assert_eq!(local_path("file:///tmp/a.xml"), Some(PathBuf::from("/tmp/a.xml")));
        assert_eq!(local_path("/tmp/a.xml"), Some(PathBuf::from("/tmp/a.xml")));
        assert_eq!(local_path("https://example.org/a.xml"), None);
    }

    #[tokio::test]
    async fn test_retrieve_file_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.xml");
        std::fs::write(&path, "content").unwrap();

        let client = http_client(None, Duration::from_secs(5)).unwrap();
        let url = format!("file://{}", path.display());
        let bytes = retrieve(&client, &url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes, b"content");
    }

    #[tokio::test]
    async fn test_retrieve_missing_file() {
        let dir = TempDir::new().unwrap();
        let client = http_client(None, Duration::from_secs(5)).unwrap();
        let url = dir.path().join("missing.xml").display().to_string();

        let err = retrieve(&client, &url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, FetchError::File { .. }));
    }

    #[tokio::test]
    async fn test_retrieve_unknown_scheme() {
        let client = http_client(None, Duration::from_secs(5)).unwrap();
        let err = retrieve(&client, "gopher://example.org/x", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { .. }));
    }
}
