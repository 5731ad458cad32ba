//! Scheduler: one independent recurring probe task per active target.
//!
//! The task table and the store's active flag change together under the
//! table lock, so `start`, `stop` and delete never interleave for one target.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::db::entities::{check_result, monitored_target};
use crate::db::store::{ProbeTicket, StoreError, UrlStore};
use crate::monitor::probe::Prober;

pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 32;

/// Runs probes under the global concurrency bound and writes results back.
#[derive(Clone)]
struct ProbeRunner {
    store: Arc<UrlStore>,
    prober: Arc<dyn Prober>,
    permits: Arc<Semaphore>,
}

impl ProbeRunner {
    async fn run(&self, url: &str) -> check_result::Model {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return check_result::Model::failed("Probe capacity is closed"),
        };
        self.prober.probe(url).await
    }

    async fn run_and_record(&self, ticket: &ProbeTicket) -> check_result::Model {
        let result = self.run(&ticket.url).await;
        if result.is_up() {
            debug!(target_id = %ticket.id, response_time_ms = ?result.response_time_ms, "Target is up.");
        } else {
            info!(
                target_id = %ticket.id,
                url = %ticket.url,
                http_status_code = ?result.http_status_code,
                error = ?result.error_detail,
                "Target is down."
            );
        }
        let recorded = self
            .store
            .record_result_for_generation(&ticket.id, ticket.generation, result.clone())
            .await;
        if !recorded {
            debug!(target_id = %ticket.id, status = %result.status, "Probe result discarded.");
        }
        result
    }
}

struct ScheduledMonitor {
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl ScheduledMonitor {
    /// Signals the task and waits for it to exit, so nothing it started can
    /// write after this returns.
    async fn shutdown(self, target_id: &str) {
        if self.shutdown_tx.send(()).is_err() {
            warn!(target_id = %target_id, "Monitor task already finished before shutdown.");
        }
        if let Err(e) = self.handle.await {
            error!(target_id = %target_id, error = %e, "Monitor task ended abnormally.");
        }
    }
}

pub struct Scheduler {
    store: Arc<UrlStore>,
    runner: ProbeRunner,
    tasks: Mutex<HashMap<String, ScheduledMonitor>>,
}

impl Scheduler {
    pub fn new(store: Arc<UrlStore>, prober: Arc<dyn Prober>, max_concurrent_probes: usize) -> Self {
        let runner = ProbeRunner {
            store: store.clone(),
            prober,
            permits: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
        };
        Self {
            store,
            runner,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.tasks.lock().await.contains_key(id)
    }

    pub async fn running_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Puts the target on its schedule. Returns `false` if it already was.
    pub async fn start(&self, id: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(id) {
            debug!(target_id = %id, "Start ignored, target already running.");
            return Ok(false);
        }
        let ticket = self.store.set_active(id, true).await?;
        info!(target_id = %id, interval_minutes = ticket.interval, "Monitoring started.");
        tasks.insert(id.to_string(), self.spawn_monitor(ticket));
        Ok(true)
    }

    /// Takes the target off its schedule. Returns `false` if it was not on one.
    ///
    /// Once this returns no probe dispatched earlier records a result.
    pub async fn stop(&self, id: &str) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.lock().await;
        self.store.set_active(id, false).await?;
        match tasks.remove(id) {
            Some(monitor) => {
                monitor.shutdown(id).await;
                info!(target_id = %id, "Monitoring stopped.");
                Ok(true)
            }
            None => {
                debug!(target_id = %id, "Stop ignored, target not running.");
                Ok(false)
            }
        }
    }

    /// Spawns one out-of-band probe. The schedule and active flag are untouched.
    pub async fn dispatch_check(
        &self,
        id: &str,
    ) -> Result<JoinHandle<check_result::Model>, StoreError> {
        let ticket = self
            .store
            .ticket(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(self.spawn_check(ticket))
    }

    /// Probes the target now and waits for the outcome.
    pub async fn check_now(&self, id: &str) -> Result<check_result::Model, StoreError> {
        let handle = self.dispatch_check(id).await?;
        Ok(join_check(id, handle).await)
    }

    /// Dispatches a probe for every known target. Each runs in its own task, so
    /// a slow or failing target never holds up the others.
    pub async fn check_all(&self) -> Vec<(String, JoinHandle<check_result::Model>)> {
        let tickets = self.store.tickets().await;
        info!(count = tickets.len(), "Dispatching checks for all targets.");
        tickets
            .into_iter()
            .map(|ticket| (ticket.id.clone(), self.spawn_check(ticket)))
            .collect()
    }

    /// Stops the target's schedule and removes it from the store. The store
    /// entry is gone before this returns, so late probe results are dropped.
    pub async fn cancel_and_remove(&self, id: &str) -> Result<monitored_target::Model, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let running = tasks.remove(id);
        let was_running = running.is_some();
        if let Some(monitor) = running {
            monitor.shutdown(id).await;
        }

        match self.store.delete(id).await {
            Ok(target) => Ok(target),
            Err(e) => {
                // The entry was restored, so put its schedule back as well.
                if was_running {
                    if let Some(ticket) = self.store.ticket(id).await {
                        tasks.insert(id.to_string(), self.spawn_monitor(ticket));
                    }
                }
                Err(e)
            }
        }
    }

    /// Starts every target persisted as active. Returns how many were started.
    pub async fn resume_active(&self) -> usize {
        let mut resumed = 0;
        for id in self.store.active_ids().await {
            match self.start(&id).await {
                Ok(true) => resumed += 1,
                Ok(false) => {}
                Err(e) => error!(target_id = %id, error = %e, "Failed to resume monitoring."),
            }
        }
        info!(count = resumed, "Resumed active monitors.");
        resumed
    }

    /// Stops every schedule without touching the active flags, so they are
    /// resumed on the next startup.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, ScheduledMonitor)> = self.tasks.lock().await.drain().collect();
        info!(count = drained.len(), "Stopping all monitor tasks.");
        futures::future::join_all(
            drained
                .into_iter()
                .map(|(id, monitor)| async move { monitor.shutdown(&id).await }),
        )
        .await;
    }

    fn spawn_check(&self, ticket: ProbeTicket) -> JoinHandle<check_result::Model> {
        let runner = self.runner.clone();
        tokio::spawn(async move { runner.run_and_record(&ticket).await })
    }

    fn spawn_monitor(&self, ticket: ProbeTicket) -> ScheduledMonitor {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_schedule(self.runner.clone(), ticket, shutdown_rx));
        ScheduledMonitor {
            handle,
            shutdown_tx,
        }
    }
}

/// Awaits a dispatched check, turning a crashed probe task into a `down` result.
pub async fn join_check(id: &str, handle: JoinHandle<check_result::Model>) -> check_result::Model {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            error!(target_id = %id, error = %e, "Check task failed.");
            check_result::Model::failed(format!("Check task failed: {e}"))
        }
    }
}

/// Probes immediately, then once per interval until shut down. A tick that
/// came due while the previous probe was still running is skipped.
async fn run_schedule(runner: ProbeRunner, ticket: ProbeTicket, mut shutdown_rx: oneshot::Receiver<()>) {
    let period = Duration::from_secs(u64::from(ticket.interval.max(1)) * 60);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut busy_until: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            scheduled = ticker.tick() => {
                if busy_until.is_some_and(|finished| scheduled < finished) {
                    debug!(target_id = %ticket.id, "Skipping tick that fired during the previous probe.");
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = runner.run_and_record(&ticket) => {
                        busy_until = Some(Instant::now());
                    }
                }
            }
        }
    }
    debug!(target_id = %ticket.id, "Monitor task exited.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::CheckStatus;
    use crate::db::store::NewTarget;
    use crate::monitor::test_support::MockProber;

    async fn setup(prober: Arc<MockProber>, max: usize) -> (Arc<UrlStore>, Scheduler) {
        let store = Arc::new(UrlStore::in_memory());
        let scheduler = Scheduler::new(store.clone(), prober, max);
        (store, scheduler)
    }

    async fn add(store: &UrlStore, url: &str, interval: i64) -> String {
        store
            .create(NewTarget {
                name: None,
                url: url.to_string(),
                interval,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_probes_every_interval() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        assert!(scheduler.start(&id).await.unwrap());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(prober.calls(), 1);
        let first = store.get(&id).await.unwrap();
        assert!(first.target.active);
        assert_eq!(first.last_result.unwrap().status, CheckStatus::Up);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        assert!(scheduler.start(&id).await.unwrap());
        assert!(!scheduler.start(&id).await.unwrap());
        assert_eq!(scheduler.running_count().await, 1);

        tokio::time::sleep(Duration::from_secs(150)).await;
        // One timer: probes at 0, 60 and 120 seconds only.
        assert_eq!(prober.calls(), 3);
        assert!(store.get(&id).await.unwrap().target.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_probing() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        scheduler.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop(&id).await.unwrap());
        assert!(!scheduler.stop(&id).await.unwrap());
        let calls_at_stop = prober.calls();
        let result_at_stop = store.get(&id).await.unwrap().last_result;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(prober.calls(), calls_at_stop);
        let after = store.get(&id).await.unwrap();
        assert!(!after.target.active);
        assert_eq!(after.last_result, result_at_stop);
        assert!(!scheduler.is_running(&id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_check() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(10)));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        scheduler.start(&id).await.unwrap();
        let pending = scheduler.dispatch_check(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop(&id).await.unwrap());

        let result = join_check(&id, pending).await;
        assert!(result.is_up());
        assert!(store.get(&id).await.unwrap().last_result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_stop_keeps_in_flight_check() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(2)));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        let pending = scheduler.dispatch_check(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!scheduler.stop(&id).await.unwrap());

        assert!(join_check(&id, pending).await.is_up());
        let stored = store.get(&id).await.unwrap().last_result;
        assert_eq!(stored.map(|r| r.status), Some(CheckStatus::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_all_survives_control_calls() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(2)));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let mut ids = Vec::new();
        for url in ["https://a.example.com", "https://b.example.com", "https://c.example.com"] {
            ids.push(add(&store, url, 1).await);
        }

        let handles = scheduler.check_all().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!scheduler.stop(&ids[0]).await.unwrap());
        assert!(scheduler.start(&ids[1]).await.unwrap());
        for (id, handle) in handles {
            join_check(&id, handle).await;
        }

        for id in &ids {
            assert!(store.get(id).await.unwrap().last_result.is_some(), "{id}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probes_never_overlap() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(90)));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://slow.example.com", 1).await;

        scheduler.start(&id).await.unwrap();
        tokio::time::sleep(Duration::from_secs(250)).await;

        assert_eq!(prober.max_in_flight(), 1);
        // Probes start at 0s and 120s and 240s; the ticks at 60s and 180s are skipped.
        assert!((2..=3).contains(&prober.calls()), "calls = {}", prober.calls());
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_now_leaves_schedule_alone() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 5).await;

        let result = scheduler.check_now(&id).await.unwrap();
        assert!(result.is_up());
        let target = store.get(&id).await.unwrap();
        assert!(!target.target.active);
        assert_eq!(target.last_result, Some(result));
        assert!(!scheduler.is_running(&id).await);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let (_store, scheduler) = setup(Arc::new(MockProber::default()), 4).await;
        assert!(matches!(scheduler.start("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(scheduler.stop("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(scheduler.check_now("nope").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            scheduler.cancel_and_remove("nope").await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(scheduler.running_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_schedule() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(5)));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let id = add(&store, "https://up.example.com", 1).await;

        scheduler.start(&id).await.unwrap();
        // The first probe is still in flight when the target is deleted.
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.cancel_and_remove(&id).await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(store.get(&id).await.is_none());
        assert!(!scheduler.is_running(&id).await);
        assert_eq!(prober.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_start_and_delete_leave_no_timer() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let scheduler = Arc::new(scheduler);

        for _ in 0..20 {
            let id = add(&store, "https://race.example.com", 1).await;
            let (start, delete) = tokio::join!(
                {
                    let scheduler = scheduler.clone();
                    let id = id.clone();
                    tokio::spawn(async move { scheduler.start(&id).await })
                },
                {
                    let scheduler = scheduler.clone();
                    let id = id.clone();
                    tokio::spawn(async move { scheduler.cancel_and_remove(&id).await })
                }
            );
            // Start either ran first or found the target already gone.
            match start.unwrap() {
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => panic!("unexpected start error: {e}"),
            }
            delete.unwrap().unwrap();
            assert!(store.get(&id).await.is_none());
            assert!(!scheduler.is_running(&id).await);
        }
        assert_eq!(scheduler.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_check_all_isolates_failures() {
        let prober = Arc::new(MockProber::default().with_down("https://down.example.com"));
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let ids = vec![
            add(&store, "https://a.example.com", 1).await,
            add(&store, "https://down.example.com", 1).await,
            add(&store, "https://b.example.com", 1).await,
        ];

        let handles = scheduler.check_all().await;
        assert_eq!(handles.len(), 3);
        for (id, handle) in handles {
            join_check(&id, handle).await;
        }

        for id in &ids {
            assert!(store.get(id).await.unwrap().last_result.is_some());
        }
        let down = store
            .list()
            .await
            .into_iter()
            .filter(|t| !t.is_up())
            .count();
        assert_eq!(down, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_concurrency_is_bounded() {
        let prober = Arc::new(MockProber::with_delay(Duration::from_secs(10)));
        let (store, scheduler) = setup(prober.clone(), 2).await;
        for i in 0..5 {
            add(&store, &format!("https://{i}.example.com"), 1).await;
        }

        for (id, handle) in scheduler.check_all().await {
            assert!(join_check(&id, handle).await.is_up());
        }
        assert_eq!(prober.calls(), 5);
        assert_eq!(prober.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_and_shutdown_keep_active_flags() {
        let prober = Arc::new(MockProber::default());
        let (store, scheduler) = setup(prober.clone(), 4).await;
        let active = add(&store, "https://a.example.com", 1).await;
        let idle = add(&store, "https://b.example.com", 1).await;
        store.set_active(&active, true).await.unwrap();

        assert_eq!(scheduler.resume_active().await, 1);
        assert!(scheduler.is_running(&active).await);
        assert!(!scheduler.is_running(&idle).await);

        scheduler.shutdown().await;
        assert_eq!(scheduler.running_count().await, 0);
        assert!(store.get(&active).await.unwrap().target.active);
    }
}
