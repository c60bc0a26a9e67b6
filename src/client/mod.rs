//! HTTP clients for the connectivity tracker and the telemetry platform.

mod connectivity;
mod telemetry;

pub use connectivity::*;
pub use telemetry::*;

use crate::config::RetryConfig;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Client error types.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("unexpected response payload: {0}")]
    Payload(String),
}

impl ClientError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Network(e.to_string())
    }
}

/// Status code and body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    /// Body of a 200 reply, otherwise a status error.
    pub fn into_ok_body(self) -> Result<String, ClientError> {
        if self.status == 200 {
            Ok(self.body)
        } else {
            Err(ClientError::Status(self.status))
        }
    }
}

/// Fixed-delay retry for one transient HTTP status.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub retry_status: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(5),
            retry_status: 500,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            delay: Duration::from_secs(cfg.delay_secs),
            ..Default::default()
        }
    }
}

/// Build the shared HTTP client.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClientError::Network(e.to_string()))
}

/// Send a request and read the whole body.
pub async fn execute(request: reqwest::RequestBuilder) -> Result<HttpReply, ClientError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok(HttpReply { status, body })
}

/// Issue `send` until it yields something other than the retryable status.
///
/// The first attempt is followed by at most `max_retries` delayed attempts.
/// Returns the body of a 200 reply; any other final status becomes
/// [`ClientError::Status`]. Network errors are returned without retrying.
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut send: F,
) -> Result<String, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpReply, ClientError>>,
{
    let mut retries = 0;

    loop {
        let reply = send().await?;

        if reply.status == policy.retry_status && retries < policy.max_retries {
            retries += 1;
            tracing::warn!(
                "{}: HTTP {}, probably a delay in data loading; retry {}/{} in {:?}",
                label,
                reply.status,
                retries,
                policy.max_retries,
                policy.delay
            );
            tokio::time::sleep(policy.delay).await;
            continue;
        }

        if reply.status != 200 {
            tracing::error!("{}: fetch failed with HTTP status {}", label, reply.status);
        }
        return reply.into_ok_body();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn reply(status: u16) -> HttpReply {
        HttpReply {
            status,
            body: format!("{{\"status\":{}}}", status),
        }
    }

    #[tokio::test]
    async fn test_persistent_500_retries_exactly_five_times() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(&fast_policy(), "unit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(reply(500)) }
        })
        .await;

        let err = assert_err!(result);
        assert_eq!(err.status(), Some(500));
        // one initial request plus five delayed retries
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_500() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(&fast_policy(), "unit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(reply(if n < 2 { 500 } else { 200 })) }
        })
        .await;

        let body = assert_ok!(result);
        assert_eq!(body, "{\"status\":200}");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_status_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(&fast_policy(), "unit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(reply(404)) }
        })
        .await;

        assert_eq!(assert_err!(result).status(), Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_500_ending_in_other_error() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(&fast_policy(), "unit", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(reply(if n == 0 { 500 } else { 403 })) }
        })
        .await;

        assert_eq!(assert_err!(result).status(), Some(403));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = send_with_retry(&fast_policy(), "unit", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::Network("connection refused".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ClientError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_unreachable_host() {
        let client = build_http_client(Duration::from_millis(100)).unwrap();
        let result = execute(client.get("http://256.256.256.256")).await;
        assert!(result.is_err());
    }
}
