//! Engine façade over the store and scheduler, used by the HTTP layer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::db::entities::check_result;
use crate::db::models::{MonitorSummary, TargetWithResult};
use crate::db::store::{NewTarget, StoreError, UrlStore};
use crate::monitor::scheduler::{join_check, Scheduler};

/// Outcome of a start/stop request. `changed` is false for the no-op case.
#[derive(Debug, Clone)]
pub struct ControlOutcome {
    pub changed: bool,
    pub target: TargetWithResult,
}

#[derive(Debug, Clone, Default)]
pub struct CheckAllOutcome {
    pub dispatched: usize,
    /// Filled only when the caller chose to wait for the probes.
    pub results: Option<HashMap<String, check_result::Model>>,
}

pub struct MonitorService {
    store: Arc<UrlStore>,
    scheduler: Arc<Scheduler>,
}

impl MonitorService {
    pub fn new(store: Arc<UrlStore>, scheduler: Arc<Scheduler>) -> Self {
        Self { store, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn list(&self) -> Vec<TargetWithResult> {
        self.store.list().await
    }

    pub async fn get(&self, id: &str) -> Result<TargetWithResult, StoreError> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn summary(&self) -> MonitorSummary {
        MonitorSummary::from_targets(&self.store.list().await)
    }

    /// Creates a target, optionally putting it straight on its schedule.
    ///
    /// An active target is written once with its flag already set, so a failed
    /// write leaves nothing behind.
    pub async fn create(&self, new: NewTarget, start: bool) -> Result<TargetWithResult, StoreError> {
        let created = self.store.create_with_active(new, start).await?;
        if start {
            self.scheduler.start(&created.id).await?;
        }
        self.get(&created.id).await
    }

    pub async fn start(&self, id: &str) -> Result<ControlOutcome, StoreError> {
        let changed = self.scheduler.start(id).await?;
        Ok(ControlOutcome {
            changed,
            target: self.get(id).await?,
        })
    }

    pub async fn stop(&self, id: &str) -> Result<ControlOutcome, StoreError> {
        let changed = self.scheduler.stop(id).await?;
        Ok(ControlOutcome {
            changed,
            target: self.get(id).await?,
        })
    }

    pub async fn check(&self, id: &str) -> Result<check_result::Model, StoreError> {
        self.scheduler.check_now(id).await
    }

    /// Dispatches a probe for every target. With `wait = false` this returns as
    /// soon as the probes are spawned.
    pub async fn check_all(&self, wait: bool) -> CheckAllOutcome {
        let handles = self.scheduler.check_all().await;
        let dispatched = handles.len();
        if !wait {
            return CheckAllOutcome {
                dispatched,
                results: None,
            };
        }

        let results = futures::future::join_all(handles.into_iter().map(|(id, handle)| async move {
            let result = join_check(&id, handle).await;
            (id, result)
        }))
        .await
        .into_iter()
        .collect();
        CheckAllOutcome {
            dispatched,
            results: Some(results),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.scheduler.cancel_and_remove(id).await.map(|_| ())
    }

    /// Re-derives schedules from persisted state. Call once at startup.
    pub async fn resume(&self) -> usize {
        let total = self.store.len().await;
        let resumed = self.scheduler.resume_active().await;
        info!(total, resumed, "Monitor engine ready.");
        resumed
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
