//! Atomic file output + bounded HTTP download utilities for PCAT.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pcat-storage";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The file already held exactly these bytes; nothing was touched.
    Unchanged,
}

/// Write `bytes` to `path` through a sibling temp file and a rename, so an
/// interrupted run never leaves a half-written file behind.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<WriteOutcome> {
    if let Ok(existing) = fs::read(path).await {
        if existing == bytes {
            return Ok(WriteOutcome::Unchanged);
        }
    }

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    drop(file);

    match fs::rename(&temp_path, path).await {
        Ok(()) => Ok(WriteOutcome::Written),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch pool closed")]
    PoolClosed,
}

/// HTTP client with a fixed concurrency ceiling and retry/backoff.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let _permit = self.limit.acquire().await.map_err(|_| FetchError::PoolClosed)?;

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(FetchError::Request(err)),
            None => Err(FetchError::PoolClosed),
        }
    }
}

/// One remote image to mirror into the local image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub product_id: String,
    pub url: String,
    pub dest: PathBuf,
}

impl DownloadJob {
    /// Destination is `<image_dir>/<slug(product_id)><ext>`, ext taken from the URL.
    pub fn for_product(image_dir: &Path, product_id: &str, url: &str) -> Self {
        let file_name = format!("{}{}", slugify_file_stem(product_id), extension_from_url(url));
        Self {
            product_id: product_id.to_string(),
            url: url.trim().to_string(),
            dest: image_dir.join(file_name),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub downloaded: Vec<String>,
    pub skipped_existing: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Mirror every job's URL to disk through the fetcher's bounded pool.
/// Existing destination files are left alone; failures are collected and
/// retried on a later run.
pub async fn download_all(fetcher: Arc<HttpFetcher>, jobs: Vec<DownloadJob>) -> DownloadReport {
    let run_id = Uuid::new_v4();
    let mut report = DownloadReport::default();
    let mut set = JoinSet::new();

    for job in jobs {
        if fs::try_exists(&job.dest).await.unwrap_or(false) {
            report.skipped_existing.push(job.product_id);
            continue;
        }
        let fetcher = Arc::clone(&fetcher);
        let span = info_span!("image_download", %run_id, product_id = %job.product_id);
        set.spawn(
            async move {
                let result = download_one(&fetcher, &job).await;
                (job, result)
            }
            .instrument(span),
        );
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((job, Ok(()))) => {
                info!(product_id = %job.product_id, dest = %job.dest.display(), "image downloaded");
                report.downloaded.push(job.product_id);
            }
            Ok((job, Err(err))) => {
                warn!(product_id = %job.product_id, url = %job.url, error = %err, "image download failed");
                report.failed.push((job.product_id, format!("{err:#}")));
            }
            Err(join_err) => {
                warn!(error = %join_err, "image download task aborted");
                report.failed.push(("<task>".to_string(), join_err.to_string()));
            }
        }
    }

    report.downloaded.sort();
    report.skipped_existing.sort();
    report.failed.sort();
    report
}

async fn download_one(fetcher: &HttpFetcher, job: &DownloadJob) -> anyhow::Result<()> {
    let response = fetcher
        .fetch_bytes(&job.url)
        .await
        .with_context(|| format!("fetching {}", job.url))?;
    write_atomic(&job.dest, &response.body).await?;
    Ok(())
}

pub fn slugify_file_stem(input: &str) -> String {
    input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// `.png` unless the URL path ends in a short alphanumeric extension.
pub fn extension_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && !ext.is_empty()
                && ext.len() <= 5
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => ".png".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn content_hashing_is_stable() {
        let hash = sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn atomic_write_reports_unchanged_bytes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out").join("catalog.json");

        let first = write_atomic(&path, b"{\"products\":[]}").await.expect("first write");
        let second = write_atomic(&path, b"{\"products\":[]}").await.expect("second write");
        let third = write_atomic(&path, b"{\"products\":[1]}").await.expect("third write");

        assert_eq!(first, WriteOutcome::Written);
        assert_eq!(second, WriteOutcome::Unchanged);
        assert_eq!(third, WriteOutcome::Written);
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"products\":[1]}");

        let leftovers = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn download_destination_uses_slug_and_url_extension() {
        let job = DownloadJob::for_product(
            Path::new("/img"),
            "C-331 Plus",
            "https://example.com/wp/uploads/C-331.JPG?ver=2",
        );
        assert_eq!(job.dest, PathBuf::from("/img/c-331-plus.jpg"));
        assert_eq!(extension_from_url("https://example.com/image"), ".png");
    }

    #[test]
    fn retry_classification_matches_status_families() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }

    #[tokio::test]
    async fn existing_destinations_are_skipped_without_network() {
        let dir = tempdir().expect("tempdir");
        let dest = dir.path().join("t461.png");
        std::fs::write(&dest, b"png").unwrap();
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("client"));
        let jobs = vec![DownloadJob {
            product_id: "t461".into(),
            url: "http://127.0.0.1:9/t461.png".into(),
            dest,
        }];
        let report = download_all(fetcher, jobs).await;
        assert_eq!(report.skipped_existing, vec!["t461".to_string()]);
        assert!(report.downloaded.is_empty());
        assert!(report.failed.is_empty());
    }
}
