use serde::Serialize;

use crate::db::entities::{check_result, monitored_target};

/// A target together with its most recent probe outcome, as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetWithResult {
    #[serde(flatten)]
    pub target: monitored_target::Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<check_result::Model>,
}

impl TargetWithResult {
    /// Up only when a last result exists and it is up.
    pub fn is_up(&self) -> bool {
        self.last_result.as_ref().is_some_and(|r| r.is_up())
    }
}

/// Aggregate up/down counts. `up + down == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    pub up: usize,
    pub down: usize,
    pub total: usize,
}

impl MonitorSummary {
    /// Targets with no result yet count as down.
    pub fn from_targets<'a>(targets: impl IntoIterator<Item = &'a TargetWithResult>) -> Self {
        targets
            .into_iter()
            .fold(MonitorSummary::default(), |mut summary, target| {
                if target.is_up() {
                    summary.up += 1;
                } else {
                    summary.down += 1;
                }
                summary.total += 1;
                summary
            })
    }
}
