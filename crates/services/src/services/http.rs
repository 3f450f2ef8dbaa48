//! Shared pooled HTTP layer and error classification for remote clients.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use thiserror::Error;
use utils::metrics::MetricsRegistry;

/// Default per-call deadline.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection pool ceiling per origin.
pub const MAX_SOCKETS: usize = 50;

/// Build the process-wide pooled client. Constructed once and injected into
/// every remote client.
pub fn build_http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(MAX_SOCKETS)
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .timeout(REQUEST_TIMEOUT)
        .build()
}

/// Classified remote-call error. `NOT_FOUND` never appears here: clients
/// translate 404 into `Ok(None)` at the boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{component}.{operation}: HTTP {status}: {message}")]
    HttpStatus {
        component: &'static str,
        operation: String,
        status: u16,
        message: String,
    },
    #[error("{component}.{operation}: network error: {message}")]
    Network {
        component: &'static str,
        operation: String,
        message: String,
    },
    #[error("{component}.{operation}: timed out")]
    Timeout {
        component: &'static str,
        operation: String,
    },
    #[error("{component}.{operation}: invalid response: {message}")]
    InvalidResponse {
        component: &'static str,
        operation: String,
        message: String,
    },
}

impl ApiError {
    /// Retry policy input: transient statuses, network failures, and
    /// timeouts are retryable; everything else is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::HttpStatus { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::InvalidResponse { .. } => false,
        }
    }

    pub fn invalid_response(
        component: &'static str,
        operation: &str,
        message: impl Into<String>,
    ) -> Self {
        ApiError::InvalidResponse {
            component,
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn from_reqwest(component: &'static str, operation: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout {
                component,
                operation: operation.to_string(),
            }
        } else if let Some(status) = err.status() {
            ApiError::HttpStatus {
                component,
                operation: operation.to_string(),
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ApiError::Network {
                component,
                operation: operation.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Timer guard: records `(component, operation)` latency when dropped.
pub struct CallTimer<'a> {
    metrics: &'a MetricsRegistry,
    component: &'static str,
    operation: &'static str,
    started: Instant,
}

impl<'a> CallTimer<'a> {
    pub fn start(
        metrics: &'a MetricsRegistry,
        component: &'static str,
        operation: &'static str,
    ) -> Self {
        Self {
            metrics,
            component,
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        let ms = self.started.elapsed().as_millis() as u64;
        self.metrics.record_latency(self.component, self.operation, ms);
    }
}

/// Read a response body, translating HTTP failures into classified errors
/// and 404 into `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(
    component: &'static str,
    operation: &'static str,
    response: reqwest::Response,
) -> Result<Option<T>, ApiError> {
    let status = response.status();

    if status.as_u16() == 404 {
        return Ok(None);
    }

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ApiError::HttpStatus {
            component,
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    let body = response
        .json::<T>()
        .await
        .map_err(|e| ApiError::invalid_response(component, operation, e.to_string()))?;
    Ok(Some(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_error(status: u16) -> ApiError {
        ApiError::HttpStatus {
            component: "huly",
            operation: "listIssues".to_string(),
            status,
            message: String::new(),
        }
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(http_error(status).is_retryable(), "{status} should retry");
        }
        for status in [400, 401, 403, 409, 422] {
            assert!(!http_error(status).is_retryable(), "{status} must not retry");
        }
    }

    #[test]
    fn test_network_and_timeout_always_retry() {
        let network = ApiError::Network {
            component: "vibe",
            operation: "createTask".to_string(),
            message: "connection reset".to_string(),
        };
        let timeout = ApiError::Timeout {
            component: "vibe",
            operation: "createTask".to_string(),
        };
        assert!(network.is_retryable());
        assert!(timeout.is_retryable());
    }
}
