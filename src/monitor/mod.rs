pub mod probe;
pub mod scheduler;

pub use probe::{HttpProber, ProbeError, Prober, DEFAULT_PROBE_TIMEOUT};
pub use scheduler::{Scheduler, DEFAULT_MAX_CONCURRENT_PROBES};

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::Prober;
    use crate::db::entities::check_result;
    use crate::db::enums::CheckStatus;

    /// Answers `up` for every url except the ones marked down, optionally after
    /// a delay, and keeps call statistics.
    #[derive(Default)]
    pub struct MockProber {
        delay: Duration,
        down_urls: HashSet<String>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl MockProber {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        pub fn with_down(mut self, url: &str) -> Self {
            self.down_urls.insert(url.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(&self, url: &str) -> check_result::Model {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if self.down_urls.contains(url) {
                check_result::Model::failed("Connection failed: connection refused")
            } else {
                check_result::Model {
                    timestamp: Utc::now(),
                    status: CheckStatus::Up,
                    response_time_ms: Some(self.delay.as_millis() as u64),
                    http_status_code: Some(200),
                    error_detail: None,
                }
            }
        }
    }
}
