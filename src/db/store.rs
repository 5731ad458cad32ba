//! The Target Store: authoritative registry of monitored targets and their
//! latest probe result.
//!
//! Every operation takes the registry lock for its whole duration, so a
//! mutation and its persistence are observed atomically by other callers.
//! A mutation whose write fails is rolled back before the lock is released.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::entities::{check_result, monitored_target};
use crate::db::json_file::{JsonFileBackend, JsonFileError};
use crate::db::models::TargetWithResult;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("URL not found: {0}")]
    NotFound(String),
    #[error("Persistence error: {0}")]
    Persistence(#[from] JsonFileError),
}

/// Input for [`UrlStore::create`]. `interval` is signed so that negative input
/// reaches validation instead of failing deserialization.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub name: Option<String>,
    pub url: String,
    pub interval: i64,
}

/// Everything needed to dispatch one probe for a target.
///
/// `generation` changes whenever an active target is deactivated, and results
/// carrying an older generation are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTicket {
    pub id: String,
    pub url: String,
    pub interval: u32,
    pub generation: u64,
}

#[derive(Debug, Clone)]
struct TargetEntry {
    target: monitored_target::Model,
    last_result: Option<check_result::Model>,
    generation: u64,
}

impl TargetEntry {
    fn new(target: monitored_target::Model) -> Self {
        Self {
            target,
            last_result: None,
            generation: 0,
        }
    }

    fn snapshot(&self) -> TargetWithResult {
        TargetWithResult {
            target: self.target.clone(),
            last_result: self.last_result.clone(),
        }
    }

    fn ticket(&self) -> ProbeTicket {
        ProbeTicket {
            id: self.target.id.clone(),
            url: self.target.url.clone(),
            interval: self.target.interval,
            generation: self.generation,
        }
    }

    /// Keeps the newest result. Returns false when `result` is older than the stored one.
    fn apply_result(&mut self, result: check_result::Model) -> bool {
        if let Some(existing) = &self.last_result {
            if existing.timestamp > result.timestamp {
                return false;
            }
        }
        self.last_result = Some(result);
        true
    }
}

#[derive(Debug)]
pub struct UrlStore {
    targets: RwLock<HashMap<String, TargetEntry>>,
    backend: Option<JsonFileBackend>,
}

impl Default for UrlStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl UrlStore {
    /// A store that keeps nothing across restarts.
    pub fn in_memory() -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            backend: None,
        }
    }

    /// Opens the registry persisted at `path`, creating it on first write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let backend = JsonFileBackend::new(path);
        let loaded = backend.load().await?;
        let targets = loaded
            .into_iter()
            .map(|(id, target)| (id, TargetEntry::new(target)))
            .collect();
        Ok(Self {
            targets: RwLock::new(targets),
            backend: Some(backend),
        })
    }

    async fn persist(&self, targets: &HashMap<String, TargetEntry>) -> Result<(), StoreError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        let snapshot = targets.values().map(|e| e.target.clone()).collect();
        backend.save(snapshot).await.map_err(|e| {
            error!(error = %e, path = %backend.path().display(), "Failed to persist target registry.");
            StoreError::from(e)
        })
    }

    pub async fn create(&self, new: NewTarget) -> Result<monitored_target::Model, StoreError> {
        self.create_with_active(new, false).await
    }

    /// Creates a target with its active flag already set, in a single write.
    pub async fn create_with_active(
        &self,
        new: NewTarget,
        active: bool,
    ) -> Result<monitored_target::Model, StoreError> {
        let (name, url, interval) = validate(new)?;
        let target = monitored_target::Model {
            id: Uuid::new_v4().to_string(),
            name,
            url,
            interval,
            active,
            created_at: Utc::now(),
        };

        let mut targets = self.targets.write().await;
        targets.insert(target.id.clone(), TargetEntry::new(target.clone()));
        if let Err(e) = self.persist(&targets).await {
            targets.remove(&target.id);
            return Err(e);
        }
        info!(target_id = %target.id, url = %target.url, interval = target.interval, "Target created.");
        Ok(target)
    }

    pub async fn get(&self, id: &str) -> Option<TargetWithResult> {
        self.targets.read().await.get(id).map(TargetEntry::snapshot)
    }

    /// All targets with their last result, in no particular order.
    pub async fn list(&self) -> Vec<TargetWithResult> {
        self.targets
            .read()
            .await
            .values()
            .map(TargetEntry::snapshot)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    pub async fn ticket(&self, id: &str) -> Option<ProbeTicket> {
        self.targets.read().await.get(id).map(TargetEntry::ticket)
    }

    pub async fn tickets(&self) -> Vec<ProbeTicket> {
        self.targets
            .read()
            .await
            .values()
            .map(TargetEntry::ticket)
            .collect()
    }

    /// Ids of targets whose persisted flag says they should be on a schedule.
    pub async fn active_ids(&self) -> Vec<String> {
        self.targets
            .read()
            .await
            .values()
            .filter(|e| e.target.active)
            .map(|e| e.target.id.clone())
            .collect()
    }

    pub async fn delete(&self, id: &str) -> Result<monitored_target::Model, StoreError> {
        let mut targets = self.targets.write().await;
        let entry = targets
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Err(e) = self.persist(&targets).await {
            targets.insert(id.to_string(), entry);
            return Err(e);
        }
        info!(target_id = %id, "Target deleted.");
        Ok(entry.target)
    }

    /// Sets the active flag.
    ///
    /// Deactivating an active target starts a new result generation, so no
    /// probe dispatched before that call can record a result. Any other call
    /// leaves the generation alone, and the flag is only written through when
    /// it actually changes.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<ProbeTicket, StoreError> {
        let mut targets = self.targets.write().await;
        let (changed, previous_generation, ticket) = {
            let entry = targets
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let changed = entry.target.active != active;
            let previous_generation = entry.generation;
            if changed && !active {
                entry.generation += 1;
            }
            entry.target.active = active;
            (changed, previous_generation, entry.ticket())
        };

        if changed {
            if let Err(e) = self.persist(&targets).await {
                if let Some(entry) = targets.get_mut(id) {
                    entry.target.active = !active;
                    entry.generation = previous_generation;
                }
                return Err(e);
            }
        }
        debug!(target_id = %id, active, generation = ticket.generation, "Active flag set.");
        Ok(ticket)
    }

    /// Overwrites the last result. Dropped when the target no longer exists
    /// or `result` is older than the stored one.
    pub async fn record_result(&self, id: &str, result: check_result::Model) -> bool {
        let mut targets = self.targets.write().await;
        match targets.get_mut(id) {
            Some(entry) => entry.apply_result(result),
            None => {
                debug!(target_id = %id, "Dropping result for deleted target.");
                false
            }
        }
    }

    /// Like [`record_result`](Self::record_result), but also dropped when the
    /// target's generation moved on since the probe was dispatched.
    pub async fn record_result_for_generation(
        &self,
        id: &str,
        generation: u64,
        result: check_result::Model,
    ) -> bool {
        let mut targets = self.targets.write().await;
        match targets.get_mut(id) {
            Some(entry) if entry.generation == generation => entry.apply_result(result),
            Some(_) => {
                debug!(target_id = %id, generation, "Dropping result from a superseded probe.");
                false
            }
            None => {
                debug!(target_id = %id, "Dropping result for deleted target.");
                false
            }
        }
    }
}

fn validate(new: NewTarget) -> Result<(String, String, u32), StoreError> {
    let url = new.url.trim().to_string();
    if url.is_empty() {
        return Err(StoreError::Validation("URL is required".to_string()));
    }
    let is_valid = reqwest::Url::parse(&url)
        .map(|parsed| {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|h| !h.is_empty())
        })
        .unwrap_or(false);
    if !is_valid {
        return Err(StoreError::Validation("Invalid URL".to_string()));
    }

    if new.interval <= 0 {
        return Err(StoreError::Validation(
            "Interval must be a positive number of minutes".to_string(),
        ));
    }
    let interval = u32::try_from(new.interval)
        .map_err(|_| StoreError::Validation("Interval is too large".to_string()))?;

    let name = new
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| url.clone());

    Ok((name, url, interval))
}
