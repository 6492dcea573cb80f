//! Sliding-window admission control keyed by logical operation.
//!
//! Each key owns a window of recent admission timestamps plus a FIFO queue of
//! waiting callers. The window mutation and the admission check happen under
//! one short `std::sync::Mutex` critical section; waiting always happens with
//! the lock released, either sleeping until the next slot or parked on the
//! waiter's own `Notify` until the queue ahead of it moves.

use crate::error::{IngestError, Result};
use crate::metrics::AdmissionMetrics;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Limits {
    pub max_requests: u32,
    pub window_ms: u64,
    #[serde(default)]
    pub min_delay_ms: u64,
}

impl Limits {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self { max_requests, window_ms, min_delay_ms: 0 }
    }

    pub fn with_min_delay(mut self, min_delay_ms: u64) -> Self {
        self.min_delay_ms = min_delay_ms;
        self
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    // A zero ceiling would never admit anyone.
    fn capacity(&self) -> usize {
        self.max_requests.max(1) as usize
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_requests: 60, window_ms: 60_000, min_delay_ms: 0 }
    }
}

/// Whether callers block for a slot or fail immediately with the required wait
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    #[default]
    Throttle,
    FailFast,
}

#[derive(Default)]
struct KeyWindow {
    admissions: VecDeque<Instant>,
    waiters: VecDeque<(u64, Arc<Notify>)>,
    next_ticket: u64,
}

impl KeyWindow {
    fn prune(&mut self, now: Instant, limits: &Limits) {
        let window = limits.window();
        while let Some(oldest) = self.admissions.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_for(&self, now: Instant, limits: &Limits) -> Duration {
        let window_wait = if self.admissions.len() >= limits.capacity() {
            self.admissions
                .front()
                .map(|oldest| (*oldest + limits.window()).saturating_duration_since(now))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };
        let min_delay_wait = self
            .admissions
            .back()
            .map(|last| (*last + limits.min_delay()).saturating_duration_since(now))
            .unwrap_or_default();
        window_wait.max(min_delay_wait)
    }

    fn record(&mut self, now: Instant, limits: &Limits) {
        self.admissions.push_back(now);
        self.prune(now, limits);
        self.wake_front();
    }

    fn enqueue(&mut self) -> (u64, Arc<Notify>) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let notify = Arc::new(Notify::new());
        self.waiters.push_back((ticket, notify.clone()));
        (ticket, notify)
    }

    fn is_front(&self, ticket: u64) -> bool {
        self.waiters.front().map(|(t, _)| *t) == Some(ticket)
    }

    fn remove(&mut self, ticket: u64) {
        let was_front = self.is_front(ticket);
        self.waiters.retain(|(t, _)| *t != ticket);
        if was_front {
            self.wake_front();
        }
    }

    // notify_one stores a permit, so a front waiter that has not parked yet
    // still observes the wakeup.
    fn wake_front(&self) {
        if let Some((_, notify)) = self.waiters.front() {
            notify.notify_one();
        }
    }
}

/// Per-key sliding-window rate limiter shared by every caller in the process
pub struct RateLimiter {
    default_limits: Limits,
    per_key: HashMap<String, Limits>,
    windows: Mutex<HashMap<String, KeyWindow>>,
}

impl RateLimiter {
    pub fn new(default_limits: Limits) -> Self {
        Self {
            default_limits,
            per_key: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_key_limits(mut self, key: impl Into<String>, limits: Limits) -> Self {
        self.per_key.insert(key.into(), limits);
        self
    }

    pub fn limits_for(&self, key: &str) -> &Limits {
        self.per_key.get(key).unwrap_or(&self.default_limits)
    }

    fn lock_windows(&self) -> MutexGuard<'_, HashMap<String, KeyWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when a call for `key` would be admitted right now without jumping
    /// ahead of queued waiters.
    pub fn can_admit(&self, key: &str) -> bool {
        let limits = self.limits_for(key);
        let mut windows = self.lock_windows();
        let window = windows.entry(key.to_string()).or_default();
        let now = Instant::now();
        window.prune(now, limits);
        window.waiters.is_empty() && window.wait_for(now, limits).is_zero()
    }

    /// `max(window_wait, min_delay_wait)` for the next admission on `key`.
    pub fn time_until_next_slot(&self, key: &str) -> Duration {
        let limits = self.limits_for(key);
        let mut windows = self.lock_windows();
        let window = windows.entry(key.to_string()).or_default();
        let now = Instant::now();
        window.prune(now, limits);
        window.wait_for(now, limits)
    }

    /// Append an admission timestamp for `key` and wake the queue head.
    pub fn record_admission(&self, key: &str) {
        let limits = self.limits_for(key);
        let mut windows = self.lock_windows();
        let window = windows.entry(key.to_string()).or_default();
        window.record(Instant::now(), limits);
    }

    /// Number of admissions inside the trailing window for `key`.
    pub fn in_window(&self, key: &str) -> usize {
        let limits = self.limits_for(key);
        let mut windows = self.lock_windows();
        let window = windows.entry(key.to_string()).or_default();
        window.prune(Instant::now(), limits);
        window.admissions.len()
    }

    /// Fail-fast admission: admits immediately or reports the required wait.
    pub fn try_admit(&self, key: &str) -> Result<()> {
        let limits = self.limits_for(key);
        let mut windows = self.lock_windows();
        let window = windows.entry(key.to_string()).or_default();
        let now = Instant::now();
        window.prune(now, limits);
        let wait = window.wait_for(now, limits);
        if window.waiters.is_empty() && wait.is_zero() {
            window.record(now, limits);
            AdmissionMetrics::record_admitted(key, 0.0);
            return Ok(());
        }
        // Queued waiters are ahead of us even when the window has room.
        let retry_after = if wait.is_zero() { limits.min_delay().max(Duration::from_millis(1)) } else { wait };
        AdmissionMetrics::record_rejected(key);
        Err(IngestError::RateLimitExceeded { key: key.to_string(), retry_after })
    }

    /// Suspend until `key` admits this caller. Waiters are served in arrival
    /// order; dropping the future gives up the caller's place in line.
    pub async fn await_admission(&self, key: &str) {
        let limits = self.limits_for(key).clone();
        let started = Instant::now();
        let (ticket, notify) = {
            let mut windows = self.lock_windows();
            windows.entry(key.to_string()).or_default().enqueue()
        };
        let mut place = QueuePlace { limiter: self, key, ticket, admitted: false };

        loop {
            let wait = {
                let mut windows = self.lock_windows();
                let window = windows.entry(key.to_string()).or_default();
                let now = Instant::now();
                window.prune(now, &limits);
                if window.is_front(ticket) {
                    let wait = window.wait_for(now, &limits);
                    if wait.is_zero() {
                        window.waiters.pop_front();
                        window.record(now, &limits);
                        place.admitted = true;
                        trace!(key, ticket, in_window = window.admissions.len(), "Admission granted");
                        AdmissionMetrics::record_admitted(key, now.duration_since(started).as_secs_f64());
                        return;
                    }
                    Some(wait)
                } else {
                    None
                }
            };

            match wait {
                Some(wait) => {
                    debug!(key, ticket, wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for slot");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = notify.notified() => {}
                    }
                }
                None => notify.notified().await,
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_limits", &self.default_limits)
            .field("per_key", &self.per_key)
            .finish()
    }
}

struct QueuePlace<'a> {
    limiter: &'a RateLimiter,
    key: &'a str,
    ticket: u64,
    admitted: bool,
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        if self.admitted {
            return;
        }
        let mut windows = self.limiter.lock_windows();
        if let Some(window) = windows.get_mut(self.key) {
            window.remove(self.ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn window_never_exceeds_max_requests() {
        let limiter = RateLimiter::new(Limits::new(3, 1_000));
        for _ in 0..3 {
            assert!(limiter.can_admit("upload"));
            limiter.await_admission("upload").await;
        }
        assert!(!limiter.can_admit("upload"));
        assert_eq!(limiter.in_window("upload"), 3);

        let before = Instant::now();
        limiter.await_admission("upload").await;
        assert!(before.elapsed() >= Duration::from_millis(1_000));
        assert!(limiter.in_window("upload") <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn min_delay_is_honored_even_with_window_room() {
        let limiter = RateLimiter::new(Limits::new(10, 60_000).with_min_delay(500));
        limiter.await_admission("status").await;
        let wait = limiter.time_until_next_slot("status");
        assert_eq!(wait, Duration::from_millis(500));

        let before = Instant::now();
        limiter.await_admission("status").await;
        assert!(before.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(Limits::new(1, 10_000));
        limiter.await_admission("upload").await;
        assert!(!limiter.can_admit("upload"));
        assert!(limiter.can_admit("status"));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_reports_required_wait() {
        let limiter = RateLimiter::new(Limits::new(1, 2_000));
        limiter.try_admit("upload").unwrap();
        match limiter.try_admit("upload") {
            Err(IngestError::RateLimitExceeded { key, retry_after }) => {
                assert_eq!(key, "upload");
                assert_eq!(retry_after, Duration::from_millis(2_000));
            }
            other => panic!("expected RateLimitExceeded, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_for_last_slot_admit_exactly_one() {
        let limiter = Arc::new(RateLimiter::new(Limits::new(2, 5_000)));
        limiter.record_admission("upload");

        let admitted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            handles.push(tokio::spawn(async move {
                if limiter.try_admit("upload").is_ok() {
                    admitted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.in_window("upload"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(Limits::new(1, 100)));
        limiter.record_admission("upload");

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.await_admission("upload").await;
                order.lock().unwrap().push(i);
            }));
            // Let each task enqueue before spawning the next.
            tokio::task::yield_now().await;
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_all_finish_within_budget() {
        let limiter = Arc::new(RateLimiter::new(Limits::new(2, 1_000)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.await_admission("upload").await;
                // Sample the window right after admission.
                limiter.in_window("upload")
            }));
        }
        let all = tokio::time::timeout(Duration::from_secs(30), async {
            let mut seen = Vec::new();
            for h in handles {
                seen.push(h.await.unwrap());
            }
            seen
        })
        .await
        .expect("await_admission must not deadlock");
        assert!(all.iter().all(|n| *n <= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_waiter_leaves_the_queue() {
        let limiter = Arc::new(RateLimiter::new(Limits::new(1, 1_000)));
        limiter.record_admission("upload");

        let abandoned = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.await_admission("upload").await })
        };
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        let before = Instant::now();
        limiter.await_admission("upload").await;
        assert!(before.elapsed() <= Duration::from_millis(1_000));
    }
}
