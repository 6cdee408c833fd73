//! Download one URL into one local file.
//!
//! A fetch either leaves a complete, verified file at its target or leaves the
//! target untouched. Bytes are streamed into a temporary file in the target's
//! directory while being hashed, and the temporary file is renamed over the
//! target only after the byte count and checksum check out. A temporary file
//! that is never persisted is removed when it is dropped, including when the
//! fetch is cancelled mid-stream.

use std::path::{Path, PathBuf};

use backoff::backoff::Backoff;
use reqwest::header::{HeaderMap, CONTENT_ENCODING};
use reqwest::{Client, StatusCode, Url};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{FetchError, Result};
use super::policy::RetryPolicy;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// A file that is present and verified at its target path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// The URL it was downloaded from, or `None` if the existing local file
    /// already matched the expected checksum.
    pub url: Option<String>,
    pub sha256: String,
    pub size: u64,
}

impl FetchedFile {
    pub fn was_downloaded(&self) -> bool {
        self.url.is_some()
    }
}

/// One fetch: where from, where to, and what the content must hash to.
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub target: &'a Path,
    pub headers: HeaderMap,
    pub expected_sha256: Option<&'a str>,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str, target: &'a Path) -> Self {
        Self {
            url,
            target,
            headers: HeaderMap::new(),
            expected_sha256: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_sha256(mut self, sha256: Option<&'a str>) -> Self {
        self.expected_sha256 = sha256;
        self
    }
}

/// Streams HTTP content into local files.
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: Client,
    require_https: bool,
}

impl ContentFetcher {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            require_https: false,
        }
    }

    /// Refuse any URL whose scheme is not `https`.
    pub fn with_require_https(mut self, require_https: bool) -> Self {
        self.require_https = require_https;
        self
    }

    /// Fetch `request.url` into `request.target`.
    ///
    /// If an expected checksum is given and the target already exists, the
    /// local file is hashed instead: a match returns without any network
    /// traffic and a mismatch fails with [`FetchError::ChecksumMismatch`].
    /// Retryable failures are repeated up to `retry.max_attempts` times with
    /// exponential backoff. Cancellation is observed while waiting on the
    /// network and while sleeping between attempts.
    pub async fn fetch(
        &self,
        request: FetchRequest<'_>,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile> {
        let url = Url::parse(request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.to_string(),
            message: e.to_string(),
        })?;
        if self.require_https && url.scheme() != "https" {
            return Err(FetchError::InsecureUrl {
                url: request.url.to_string(),
            });
        }

        if let Some(expected) = request.expected_sha256 {
            if let Some(existing) = verify_existing(request.target, expected).await? {
                debug!(path = %request.target.display(), "existing file matches checksum");
                return Ok(existing);
            }
        }

        let dir = request.target.parent().ok_or_else(|| FetchError::Io {
            path: request.target.to_path_buf(),
            message: "target has no parent directory".to_string(),
        })?;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;

        let mut backoff = retry.backoff();
        let mut attempt = 1;
        loop {
            debug!(url = request.url, attempt, "fetching");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(FetchError::Cancelled),
                result = self.attempt(url.clone(), &request, dir) => result,
            };

            match result {
                Ok(file) => return Ok(file),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(retry.max_backoff);
                    warn!(
                        url = request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "fetch failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, url: Url, request: &FetchRequest<'_>, dir: &Path) -> Result<FetchedFile> {
        let url_text = request.url;
        let mut response = self
            .client
            .get(url)
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|e| FetchError::transport(url_text, e))?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED => {
                return Err(FetchError::Unauthorized {
                    url: url_text.to_string(),
                })
            }
            StatusCode::NOT_FOUND => {
                return Err(FetchError::NotFound {
                    url: url_text.to_string(),
                })
            }
            status if !status.is_success() => {
                return Err(FetchError::Status {
                    url: url_text.to_string(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        if let Some(encoding) = response.headers().get(CONTENT_ENCODING) {
            let encoding = String::from_utf8_lossy(encoding.as_bytes()).trim().to_string();
            if !encoding.eq_ignore_ascii_case("identity") {
                return Err(FetchError::UnsupportedEncoding {
                    url: url_text.to_string(),
                    encoding,
                });
            }
        }

        let expected_size =
            response
                .content_length()
                .ok_or_else(|| FetchError::MissingContentLength {
                    url: url_text.to_string(),
                })?;

        let temp = tempfile::Builder::new()
            .prefix(".artsync-")
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(|e| FetchError::io(dir, e))?;
        let handle = temp
            .as_file()
            .try_clone()
            .map_err(|e| FetchError::io(temp.path(), e))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::transport(url_text, e))?
        {
            size += chunk.len() as u64;
            if size > expected_size {
                break;
            }
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| FetchError::io(temp.path(), e))?;
        }
        if size != expected_size {
            return Err(FetchError::SizeMismatch {
                url: url_text.to_string(),
                expected: expected_size,
                actual: size,
            });
        }
        file.flush().await.map_err(|e| FetchError::io(temp.path(), e))?;
        file.sync_all()
            .await
            .map_err(|e| FetchError::io(temp.path(), e))?;
        drop(file);

        let sha256 = hex::encode(hasher.finalize());
        if let Some(expected) = request.expected_sha256 {
            if !sha256.eq_ignore_ascii_case(expected) {
                return Err(FetchError::ChecksumMismatch {
                    path: request.target.to_path_buf(),
                    expected: expected.to_string(),
                    actual: sha256,
                    size,
                });
            }
        }

        temp.persist(request.target)
            .map_err(|e| FetchError::io(request.target, e.error))?;
        debug!(url = url_text, path = %request.target.display(), size, "fetched");

        Ok(FetchedFile {
            path: request.target.to_path_buf(),
            url: Some(url_text.to_string()),
            sha256,
            size,
        })
    }
}

/// Hash an existing target against `expected`.
///
/// Returns `Ok(None)` if the target does not exist.
async fn verify_existing(target: &Path, expected: &str) -> Result<Option<FetchedFile>> {
    match tokio::fs::metadata(target).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => {
            return Err(FetchError::Io {
                path: target.to_path_buf(),
                message: "target exists and is not a file".to_string(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(FetchError::io(target, e)),
    }

    let (sha256, size) = hash_file(target).await?;
    if sha256.eq_ignore_ascii_case(expected) {
        Ok(Some(FetchedFile {
            path: target.to_path_buf(),
            url: None,
            sha256,
            size,
        }))
    } else {
        Err(FetchError::ChecksumMismatch {
            path: target.to_path_buf(),
            expected: expected.to_string(),
            actual: sha256,
            size,
        })
    }
}

/// Compute the lowercase hex sha256 and size of a file.
pub async fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| FetchError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut size: u64 = 0;
    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| FetchError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    const BODY: &[u8] = b"artifact bytes";

    fn sha_of(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(5), Duration::from_millis(20))
    }

    fn leftover_parts(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn downloads_and_verifies() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/org/lib.jar");
                then.status(200).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("org").join("lib.jar");
        let expected = sha_of(BODY);
        let url = server.url("/org/lib.jar");

        let fetcher = ContentFetcher::new(Client::new());
        let file = fetcher
            .fetch(
                FetchRequest::new(&url, &target).with_sha256(Some(&expected)),
                &fast_retry(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(file.was_downloaded());
        assert_eq!(file.sha256, expected);
        assert_eq!(file.size, BODY.len() as u64);
        assert_eq!(std::fs::read(&target).unwrap(), BODY);
        assert_eq!(leftover_parts(target.parent().unwrap()), 0);
    }

    #[tokio::test]
    async fn existing_matching_file_skips_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(200).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        std::fs::write(&target, BODY).unwrap();
        let expected = sha_of(BODY);
        let url = server.url("/lib.jar");

        let file = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target).with_sha256(Some(&expected)),
                &fast_retry(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!file.was_downloaded());
        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn existing_mismatching_file_fails_without_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(200).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        std::fs::write(&target, b"tampered").unwrap();
        let expected = sha_of(BODY);
        let url = server.url("/lib.jar");

        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target).with_sha256(Some(&expected)),
                &fast_retry(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match error {
            FetchError::ChecksumMismatch {
                expected: e,
                actual,
                size,
                ..
            } => {
                assert_eq!(e, expected);
                assert_eq!(actual, sha_of(b"tampered"));
                assert_eq!(size, 8);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(mock.hits_async().await, 0);
        assert_eq!(std::fs::read(&target).unwrap(), b"tampered");
    }

    #[tokio::test]
    async fn checksum_mismatch_is_not_retried_and_leaves_no_file() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(200).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        let wrong = "0".repeat(64);
        let url = server.url("/lib.jar");

        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target).with_sha256(Some(&wrong)),
                &fast_retry(4),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::ChecksumMismatch { .. }));
        assert_eq!(mock.hits_async().await, 1);
        assert!(!target.exists());
        assert_eq!(leftover_parts(dir.path()), 0);
    }

    #[tokio::test]
    async fn transient_status_is_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(503);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        let url = server.url("/lib.jar");

        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target),
                &fast_retry(3),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::Status { status: 503, .. }));
        assert_eq!(mock.hits_async().await, 3);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let missing = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing.jar");
                then.status(404);
            })
            .await;
        let private = server
            .mock_async(|when, then| {
                when.method(GET).path("/private.jar");
                then.status(401);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let fetcher = ContentFetcher::new(Client::new());
        let cancel = CancellationToken::new();

        let url = server.url("/missing.jar");
        let target = dir.path().join("missing.jar");
        let error = fetcher
            .fetch(FetchRequest::new(&url, &target), &fast_retry(4), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::NotFound { .. }));

        let url = server.url("/private.jar");
        let target = dir.path().join("private.jar");
        let error = fetcher
            .fetch(FetchRequest::new(&url, &target), &fast_retry(4), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::Unauthorized { .. }));

        assert_eq!(missing.hits_async().await, 1);
        assert_eq!(private.hits_async().await, 1);
    }

    #[tokio::test]
    async fn compressed_response_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(200).header("content-encoding", "gzip").body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        let url = server.url("/lib.jar");

        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target),
                &fast_retry(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, FetchError::UnsupportedEncoding { .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn insecure_url_refused_before_any_request() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lib.jar");
                then.status(200).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        let url = server.url("/lib.jar");

        let error = ContentFetcher::new(Client::new())
            .with_require_https(true)
            .fetch(
                FetchRequest::new(&url, &target),
                &fast_retry(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error, FetchError::InsecureUrl { .. }));
        assert_eq!(mock.hits_async().await, 0);
    }

    /// Serves a response that announces more bytes than it sends, then
    /// closes the connection.
    async fn truncating_server() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1000\r\n\r\npartial")
                    .await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/lib.jar", address), server)
    }

    #[tokio::test]
    async fn truncated_body_leaves_target_untouched() {
        let (url, server) = truncating_server().await;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");

        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target),
                &fast_retry(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(
                error,
                FetchError::Transport { .. } | FetchError::SizeMismatch { .. }
            ),
            "unexpected error: {}",
            error
        );
        assert!(!target.exists());
        assert_eq!(leftover_parts(dir.path()), 0);
        server.abort();
    }

    #[tokio::test]
    async fn truncated_body_keeps_previous_file() {
        let (url, server) = truncating_server().await;
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("lib.jar");
        std::fs::write(&target, b"previous release").unwrap();

        // No checksum, so the existing file is not trusted and the transfer runs.
        let error = ContentFetcher::new(Client::new())
            .fetch(
                FetchRequest::new(&url, &target),
                &fast_retry(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(
                error,
                FetchError::Transport { .. } | FetchError::SizeMismatch { .. }
            ),
            "unexpected error: {}",
            error
        );
        assert_eq!(std::fs::read(&target).unwrap(), b"previous release");
        assert_eq!(leftover_parts(dir.path()), 0);
        server.abort();
    }

    #[tokio::test]
    async fn cancellation_stops_a_slow_fetch() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow.jar");
                then.status(200).delay(Duration::from_secs(10)).body(BODY);
            })
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("slow.jar");
        let url = server.url("/slow.jar");
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let error = ContentFetcher::new(Client::new())
            .fetch(FetchRequest::new(&url, &target), &fast_retry(1), &cancel)
            .await
            .unwrap_err();

        assert_eq!(error, FetchError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn hash_file_matches_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, BODY).unwrap();
        let (sha, size) = hash_file(&path).await.unwrap();
        assert_eq!(sha, sha_of(BODY));
        assert_eq!(size, BODY.len() as u64);
    }
}
