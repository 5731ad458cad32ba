//! Probe Executor: one health check against one URL.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use crate::db::entities::check_result;
use crate::db::enums::CheckStatus;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Performs a single probe. Implementations hold no per-target state and may
/// be called concurrently for any number of targets.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> check_result::Model;
}

#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe_error(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() {
            format!("Request timed out after {} ms", self.timeout.as_millis())
        } else if e.is_connect() {
            format!("Connection failed: {}", error_chain(e))
        } else if e.is_redirect() {
            "Too many redirects".to_string()
        } else {
            format!("Request failed: {}", error_chain(e))
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> check_result::Model {
        let start_time = Instant::now();
        let result = self.client.get(url).send().await;
        let response_time_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => classify_response(response.status(), response_time_ms),
            Err(e) => check_result::Model::failed(self.describe_error(&e)),
        }
    }
}

/// Up for any 2xx status, down for everything else. The latency and status
/// code are recorded either way since a response arrived.
pub fn classify_response(status: StatusCode, response_time_ms: u64) -> check_result::Model {
    let (status_kind, error_detail) = if status.is_success() {
        (CheckStatus::Up, None)
    } else {
        (CheckStatus::Down, Some(format!("Unexpected status: {status}")))
    };
    check_result::Model {
        timestamp: Utc::now(),
        status: status_kind,
        response_time_ms: Some(response_time_ms),
        http_status_code: Some(status.as_u16()),
        error_detail,
    }
}

/// reqwest's top-level message hides the cause (refused, DNS, TLS) in its sources.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
