use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::enums::CheckStatus;

/// Outcome of a single completed probe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub timestamp: DateTime<Utc>,
    pub status: CheckStatus,
    /// Present only when a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Model {
    pub fn is_up(&self) -> bool {
        self.status == CheckStatus::Up
    }

    /// A `down` result for a probe that never got a response.
    pub fn failed(error_detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: CheckStatus::Down,
            response_time_ms: None,
            http_status_code: None,
            error_detail: Some(error_detail.into()),
        }
    }
}
