use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::entities::check_result;
use crate::db::models::TargetWithResult;
use crate::db::store::NewTarget;

fn default_interval() -> i64 {
    5
}

// Model for adding a new monitored URL
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateUrl {
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
    /// Minutes between probes.
    #[serde(default = "default_interval")]
    pub interval: i64,
    /// Start monitoring right after creation.
    #[serde(default)]
    pub active: bool,
}

impl From<CreateUrl> for NewTarget {
    fn from(payload: CreateUrl) -> Self {
        NewTarget {
            name: payload.name,
            url: payload.url,
            interval: payload.interval,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, Copy)]
pub struct CheckAllQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct ControlResponse {
    pub message: &'static str,
    pub target: TargetWithResult,
}

#[derive(Serialize, Debug, Clone)]
pub struct CheckResponse {
    pub message: &'static str,
    pub result: check_result::Model,
}

#[derive(Serialize, Debug, Clone)]
pub struct CheckAllResponse {
    pub message: &'static str,
    pub dispatched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<HashMap<String, check_result::Model>>,
}

#[derive(Serialize, Debug, Clone)]
pub struct DeleteResponse {
    pub message: &'static str,
    pub id: String,
}
