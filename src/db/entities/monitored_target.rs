use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored URL and its schedule configuration.
///
/// This is also the on-disk record: the persisted registry is a JSON object of
/// these keyed by `id`. `monitoring` is accepted as an alias of `active` so
/// registries written by older deployments still load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    /// Minutes between scheduled probes. Always > 0.
    pub interval: u32,
    #[serde(default, alias = "monitoring")]
    pub active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
