//! Fetching source documents over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::sanitize::redact_url;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Downloaded bytes plus what the server said they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub content: Vec<u8>,
    /// Media type without parameters, e.g. `application/pdf`.
    pub content_type: String,
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {reason}")]
    Transport {
        url: String,
        reason: String,
        retryable: bool,
    },

    #[error("Response from {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl DownloadError {
    /// Whether trying the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
            }
            DownloadError::Transport { retryable, .. } => *retryable,
            DownloadError::InvalidUrl(_)
            | DownloadError::TooLarge { .. }
            | DownloadError::Client(_) => false,
        }
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Fetched, DownloadError>;
}

/// `Downloader` over reqwest. GETs are idempotent, so transient failures
/// are retried with the configured backoff before surfacing.
pub struct HttpDownloader {
    client: Client,
    retry: RetryPolicy,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(timeout: Duration, retry: RetryPolicy, max_bytes: u64) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docpipe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DownloadError::Client(e.to_string()))?;
        Ok(Self {
            client,
            retry,
            max_bytes,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<Fetched, DownloadError> {
        let redacted = redact_url(url);
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(&redacted, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: redacted,
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    url: redacted,
                    limit: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        // Content-Length is optional, so the cap is enforced while reading.
        let mut content = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error(&redacted, e))?
        {
            if (content.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(DownloadError::TooLarge {
                    url: redacted,
                    limit: self.max_bytes,
                });
            }
            content.extend_from_slice(&chunk);
        }

        Ok(Fetched {
            content,
            content_type,
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> DownloadError {
    if e.is_builder() {
        return DownloadError::InvalidUrl(url.to_string());
    }
    DownloadError::Transport {
        url: url.to_string(),
        retryable: e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
        reason: e.to_string(),
    }
}

/// `text/html; charset=utf-8` → `text/html`.
pub fn normalize_content_type(raw: &str) -> String {
    let media = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if media.is_empty() {
        DEFAULT_CONTENT_TYPE.to_string()
    } else {
        media
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Fetched, DownloadError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DownloadError::InvalidUrl(redact_url(url)));
        }
        self.retry
            .run(|_| self.fetch_once(url), DownloadError::is_retryable)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const CHUNK: usize = 1024;

    /// Serves one chunked response without a Content-Length, writing up to
    /// `total` bytes, and returns how many body bytes went out before the
    /// client hung up.
    async fn chunked_server(total: usize) -> (String, tokio::task::JoinHandle<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/big.txt", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return 0;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n";
            if socket.write_all(head.as_bytes()).await.is_err() {
                return 0;
            }
            let mut frame = format!("{:x}\r\n", CHUNK).into_bytes();
            frame.extend(std::iter::repeat(b'a').take(CHUNK));
            frame.extend_from_slice(b"\r\n");

            let mut written = 0;
            while written < total {
                if socket.write_all(&frame).await.is_err() {
                    break;
                }
                written += CHUNK;
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
            written
        });

        (url, server)
    }

    #[test]
    fn test_normalize_content_type() {
        assert_eq!(normalize_content_type("text/HTML; charset=utf-8"), "text/html");
        assert_eq!(normalize_content_type("application/pdf"), "application/pdf");
        assert_eq!(normalize_content_type(" ; x=y"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_retryable_classification() {
        let status = |status| DownloadError::Status {
            url: "u".to_string(),
            status,
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!DownloadError::InvalidUrl("x".to_string()).is_retryable());
        assert!(DownloadError::Transport {
            url: "u".to_string(),
            reason: "reset".to_string(),
            retryable: true,
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let downloader =
            HttpDownloader::new(Duration::from_secs(1), RetryPolicy::no_retry(), 1024).unwrap();
        assert!(matches!(
            downloader.fetch("file:///etc/passwd").await,
            Err(DownloadError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_size_cap_stops_chunked_body_early() {
        let total = 64 * 1024 * 1024;
        let (url, server) = chunked_server(total).await;
        let downloader =
            HttpDownloader::new(Duration::from_secs(10), RetryPolicy::no_retry(), 1024).unwrap();

        let result = downloader.fetch(&url).await;
        assert!(matches!(result, Err(DownloadError::TooLarge { limit: 1024, .. })));
        drop(downloader);

        let written = tokio::time::timeout(Duration::from_secs(10), server)
            .await
            .unwrap()
            .unwrap();
        assert!(written < total, "server wrote the whole {} byte body", written);
    }

    #[tokio::test]
    async fn test_small_chunked_body_is_read_whole() {
        let (url, server) = chunked_server(3 * CHUNK).await;
        let downloader =
            HttpDownloader::new(Duration::from_secs(10), RetryPolicy::no_retry(), 1024 * 1024).unwrap();

        let fetched = downloader.fetch(&url).await.unwrap();
        assert_eq!(fetched.content.len(), 3 * CHUNK);
        assert_eq!(fetched.content_type, "text/plain");
        assert_eq!(server.await.unwrap(), 3 * CHUNK);
    }
}
