pub mod archive;

use std::{
    path::Path,
    time::Duration,
};

use rand::Rng;
use reqwest::{Client, StatusCode};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::context_fetcher::archive::ArchiveKind;
use crate::services::traits::ContextSource;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("context download request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("file download failed with status {0}")]
    Status(u16),

    #[error("unsupported context content type, expected a tar or gzip-compressed tar archive")]
    UnsupportedContentType,

    #[error("context archive exceeds the size limit of {limit} bytes")]
    SizeLimitExceeded { limit: u64 },

    #[error("context extraction failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("context fetch exceeded its deadline of {0} seconds")]
    DeadlineExceeded(u64),

    #[error("context download gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// Connect/timeout transport failures and gateway-style statuses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect() || e.is_timeout(),
            Self::Status(code) => matches!(*code, 502..=504),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Bounds a single attempt, body included. A stalled server surfaces as
    /// a retryable timeout.
    pub request_timeout: Option<Duration>,
    /// Bounds all attempts together.
    pub deadline: Option<Duration>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            request_timeout: None,
            deadline: None,
        }
    }
}

impl FetchPolicy {
    /// Upper bound of the wait after the `attempt`-th failure (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.initial_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Full jitter: uniform in `[0, delay]`.
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    Duration::from_millis(rand::rng().random_range(0..=millis))
}

pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// An extracted build context. Dropping it removes the directory.
#[derive(Debug)]
pub struct FetchedContext {
    dir: TempDir,
}

impl FetchedContext {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub struct ContextFetcher<Z = TokioSleeper> {
    http: Client,
    policy: FetchPolicy,
    sleeper: Z,
}

impl ContextFetcher<TokioSleeper> {
    pub fn new(http: Client, policy: FetchPolicy) -> Self {
        Self::with_sleeper(http, policy, TokioSleeper)
    }
}

impl<Z: Sleeper> ContextFetcher<Z> {
    pub fn with_sleeper(http: Client, policy: FetchPolicy, sleeper: Z) -> Self {
        Self {
            http,
            policy,
            sleeper,
        }
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Downloads and extracts `url`, retrying transient failures.
    #[tracing::instrument(name = "context_fetcher.fetch", skip(self), err)]
    pub async fn fetch(
        &self,
        url: &str,
        max_size_bytes: Option<u64>,
    ) -> Result<FetchedContext, FetchError> {
        let work = self.fetch_with_retry(url, max_size_bytes);
        match self.policy.deadline {
            Some(deadline) => tokio::time::timeout(deadline, work)
                .await
                .map_err(|_| FetchError::DeadlineExceeded(deadline.as_secs()))?,
            None => work.await,
        }
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        max_size_bytes: Option<u64>,
    ) -> Result<FetchedContext, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        let bytes = loop {
            attempt += 1;
            match self.download(url, max_size_bytes).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = jitter(self.policy.next_delay(attempt));
                    warn!(attempt, ?delay, error = %e, "⚠️ Context download failed, retrying");
                    self.sleeper.sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        };

        let kind = archive::detect(&bytes).ok_or(FetchError::UnsupportedContentType)?;
        let dir = tempfile::Builder::new()
            .prefix("build-context-")
            .tempdir()?;
        let dest = dir.path().to_path_buf();

        // dir is dropped (and removed) on any error below
        tokio::task::spawn_blocking(move || archive::extract(kind, &bytes, &dest))
            .await
            .map_err(std::io::Error::other)??;

        info!(
            path = %dir.path().display(),
            gzip = kind == ArchiveKind::Gzip,
            attempts = attempt,
            "📦 Build context extracted"
        );
        Ok(FetchedContext { dir })
    }

    async fn download(&self, url: &str, max_size_bytes: Option<u64>) -> Result<Vec<u8>, FetchError> {
        let mut request = self.http.get(url);
        if let Some(timeout) = self.policy.request_timeout {
            request = request.timeout(timeout);
        }
        let mut response = request.send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let (Some(limit), Some(length)) = (max_size_bytes, response.content_length())
            && length > limit
        {
            return Err(FetchError::SizeLimitExceeded { limit });
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            if let Some(limit) = max_size_bytes
                && bytes.len() as u64 > limit
            {
                return Err(FetchError::SizeLimitExceeded { limit });
            }
        }

        Ok(bytes)
    }
}

impl<Z: Sleeper> ContextSource for ContextFetcher<Z> {
    async fn fetch_context(
        &self,
        url: &str,
        max_size_bytes: Option<u64>,
    ) -> Result<FetchedContext, FetchError> {
        self.fetch(url, max_size_bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::services::context_fetcher::archive::tests::tarball;

    #[derive(Default)]
    struct RecordingSleeper {
        sleeps: Mutex<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }
    }

    fn fetcher(max_attempts: u32) -> ContextFetcher<RecordingSleeper> {
        fetcher_with(FetchPolicy {
            max_attempts,
            ..Default::default()
        })
    }

    fn fetcher_with(policy: FetchPolicy) -> ContextFetcher<RecordingSleeper> {
        ContextFetcher::with_sleeper(Client::new(), policy, RecordingSleeper::default())
    }

    async fn serve(status: u16, body: Vec<u8>, expected: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/context.tar.gz"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .expect(expected)
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let policy = FetchPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_delay(2), Duration::from_secs(2));
        assert_eq!(policy.next_delay(5), Duration::from_secs(16));
        assert_eq!(policy.next_delay(6), Duration::from_secs(30));
        assert_eq!(policy.next_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_secs(2)) <= Duration::from_secs(2));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_gzip_context_is_extracted() {
        let server = serve(200, tarball(true), 1).await;
        let fetcher = fetcher(3);

        let context = fetcher
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap();

        assert!(context.path().join("Dockerfile").is_file());
        assert!(context.path().join("scripts/entry.sh").is_file());
        assert!(
            context
                .path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("build-context-")
        );

        let dir = context.path().to_path_buf();
        drop(context);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_plain_tar_is_extracted() {
        let server = serve(200, tarball(false), 1).await;
        let context = fetcher(3)
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap();
        assert!(context.path().join("Dockerfile").is_file());
    }

    #[tokio::test]
    async fn test_gateway_errors_are_retried_up_to_ceiling() {
        for status in [502, 503, 504] {
            let server = serve(status, Vec::new(), 4).await;
            let fetcher = fetcher(4);

            let err = fetcher
                .fetch(&format!("{}/context.tar.gz", server.uri()), None)
                .await
                .unwrap_err();

            match err {
                FetchError::Exhausted { attempts, last } => {
                    assert_eq!(attempts, 4);
                    assert!(matches!(*last, FetchError::Status(s) if s == status));
                }
                other => panic!("expected Exhausted for {}, got {:?}", status, other),
            }
            let sleeps = fetcher.sleeper.sleeps.lock().unwrap().clone();
            assert_eq!(sleeps.len(), 3);
            for (i, sleep) in sleeps.iter().enumerate() {
                assert!(*sleep <= fetcher.policy().next_delay(i as u32 + 1));
            }
        }
    }

    #[tokio::test]
    async fn test_stalled_server_times_out_and_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/context.tar.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tarball(true))
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let fetcher = fetcher_with(FetchPolicy {
            max_attempts: 2,
            request_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let err = fetcher
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, FetchError::Transport(ref e) if e.is_timeout()));
            }
            other => panic!("expected Exhausted, got {:?}", other),
        }
        assert_eq!(fetcher.sleeper.sleeps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overall_deadline_stops_the_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/context.tar.gz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tarball(true))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let fetcher = fetcher_with(FetchPolicy {
            deadline: Some(Duration::from_millis(200)),
            ..Default::default()
        });

        let started = std::time::Instant::now();
        let err = fetcher
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::DeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_client_and_server_errors_are_not_retried() {
        for status in [400, 500] {
            let server = serve(status, Vec::new(), 1).await;
            let fetcher = fetcher(5);

            let err = fetcher
                .fetch(&format!("{}/context.tar.gz", server.uri()), None)
                .await
                .unwrap_err();

            assert!(matches!(err, FetchError::Status(s) if s == status));
            assert!(fetcher.sleeper.sleeps.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_404_message() {
        let server = serve(404, Vec::new(), 1).await;
        let err = fetcher(3)
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "file download failed with status 404");
    }

    #[tokio::test]
    async fn test_unsupported_content_is_not_retried() {
        let server = serve(200, b"<html>not an archive</html>".to_vec(), 1).await;
        let fetcher = fetcher(5);
        let err = fetcher
            .fetch(&format!("{}/context.tar.gz", server.uri()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedContentType));
        assert!(fetcher.sleeper.sleeps.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        let fetcher = fetcher(3);
        let err = fetcher
            .fetch("http://127.0.0.1:1/context.tar.gz", None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(fetcher.sleeper.sleeps.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let archive = tarball(false);
        let server = serve(200, archive.clone(), 1).await;
        let err = fetcher(3)
            .fetch(
                &format!("{}/context.tar.gz", server.uri()),
                Some(archive.len() as u64 - 1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::SizeLimitExceeded { .. }));
    }
}
