//! Keyed rate limiter implementation

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::bucket::TokenBucket;
use super::config::{RateLimitConfig, RateLimitsConfig};
use super::error::RateLimitError;
use super::queue::{Decision, KeyStats, LimiterTelemetry, PendingRequest, Ticket};

/// Everything mutated for one key. Guarded by a single mutex so refill,
/// decrement, enqueue and dequeue never interleave.
struct KeyState {
    config: RateLimitConfig,
    bucket: TokenBucket,
    queue: VecDeque<PendingRequest>,
    next_id: u64,
    stats: KeyStats,
    /// (when, granted) pairs inside the telemetry window
    recent: VecDeque<(Instant, bool)>,
}

impl KeyState {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.capacity, config.refill_rate()),
            config,
            queue: VecDeque::new(),
            next_id: 0,
            stats: KeyStats::default(),
            recent: VecDeque::new(),
        }
    }

    fn note(&mut self, now: Instant, granted: bool) {
        self.recent.push_back((now, granted));
    }

    fn prune_recent(&mut self, now: Instant, window: Duration) {
        while self
            .recent
            .front()
            .is_some_and(|(t, _)| now.saturating_duration_since(*t) > window)
        {
            self.recent.pop_front();
        }
    }

    /// Release queued requests strictly in arrival order while budget lasts
    fn drain(&mut self, now: Instant) -> usize {
        let mut released = 0;
        while let Some(front) = self.queue.front() {
            let cost = front.cost;
            if !self.bucket.try_take(cost, now) {
                break;
            }
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            if request.tx.send(()).is_err() {
                // Waiter is gone; the tokens go back to the next in line
                debug!(id = request.id, "KeyState::drain: waiter dropped, refunding");
                self.bucket.refund(cost);
                continue;
            }
            let waited = now.saturating_duration_since(request.arrived_at);
            self.stats.total_granted += 1;
            self.stats.total_wait_time_ms += waited.as_millis() as u64;
            self.note(now, true);
            released += 1;
        }
        released
    }
}

/// Token-bucket limiter with a strict FIFO wait queue per key.
///
/// Keys are created on first use from the `default` limits unless configured.
pub struct RateLimiter {
    config: RateLimitsConfig,
    keys: RwLock<HashMap<String, Arc<Mutex<KeyState>>>>,
}

impl RateLimiter {
    /// Create a limiter; configured keys start fresh (fully permissive)
    pub fn new(config: RateLimitsConfig) -> Self {
        debug!(keys = config.keys.len(), "RateLimiter::new: called");
        let keys = config
            .keys
            .iter()
            .map(|(key, limit)| (key.clone(), Arc::new(Mutex::new(KeyState::new(limit.clone())))))
            .collect();
        Self {
            config,
            keys: RwLock::new(keys),
        }
    }

    pub fn config(&self) -> &RateLimitsConfig {
        &self.config
    }

    fn state(&self, key: &str) -> Arc<Mutex<KeyState>> {
        if let Some(state) = self.keys.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            return state.clone();
        }
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.entry(key.to_string())
            .or_insert_with(|| {
                debug!(%key, "RateLimiter::state: creating key from default limits");
                Arc::new(Mutex::new(KeyState::new(self.config.for_key(key).clone())))
            })
            .clone()
    }

    fn known_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Attempt to admit one call of `cost` tokens
    pub async fn admit(&self, key: &str, cost: f64) -> Decision {
        self.admit_at(key, cost, Instant::now()).await
    }

    /// Admission against an explicit clock reading
    pub async fn admit_at(&self, key: &str, cost: f64, now: Instant) -> Decision {
        debug!(%key, cost, "RateLimiter::admit: called");
        let state = self.state(key);
        let mut inner = state.lock().await;
        let window = self.config.telemetry_window();
        inner.prune_recent(now, window);

        if !(cost.is_finite() && cost >= 0.0) {
            warn!(%key, cost, "Rejecting admission with invalid cost");
            inner.stats.total_rejected += 1;
            inner.note(now, false);
            return Decision::Rejected {
                reason: format!("invalid cost {}", cost),
            };
        }

        // Let earlier arrivals go first
        inner.drain(now);

        if cost > inner.bucket.capacity() {
            debug!(%key, cost, "RateLimiter::admit: cost exceeds capacity, rejecting");
            inner.stats.total_rejected += 1;
            inner.note(now, false);
            return Decision::Rejected {
                reason: format!("cost {} exceeds capacity {}", cost, inner.bucket.capacity()),
            };
        }

        if inner.queue.is_empty() && inner.bucket.try_take(cost, now) {
            debug!(%key, "RateLimiter::admit: granted immediately");
            inner.stats.total_granted += 1;
            inner.note(now, true);
            return Decision::Granted;
        }

        if let Some(max) = inner.config.max_queue_depth
            && inner.queue.len() >= max
        {
            debug!(%key, max, "RateLimiter::admit: queue full, rejecting");
            inner.stats.total_rejected += 1;
            inner.note(now, false);
            return Decision::Rejected {
                reason: format!("queue depth limit {} reached", max),
            };
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.queue.push_back(PendingRequest {
            id,
            cost,
            arrived_at: now,
            tx,
        });
        inner.stats.total_queued += 1;
        inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
        inner.note(now, false);

        let position = inner.queue.len();
        debug!(%key, id, position, "RateLimiter::admit: queued");
        Decision::Queued {
            position,
            ticket: Ticket {
                key: key.to_string(),
                id,
                rx,
            },
        }
    }

    /// Admit and, if queued, wait up to the key's `max-wait-secs`
    pub async fn acquire(&self, key: &str, cost: f64) -> Result<(), RateLimitError> {
        match self.admit(key, cost).await {
            Decision::Granted => Ok(()),
            Decision::Rejected { reason } => Err(RateLimitError::Rejected {
                key: key.to_string(),
                reason,
            }),
            Decision::Queued { ticket, .. } => {
                let max_wait = self.config.for_key(key).max_wait();
                self.wait(ticket, max_wait).await
            }
        }
    }

    /// Wait for a queued ticket to be released, failing after `max_wait`
    pub async fn wait(&self, mut ticket: Ticket, max_wait: Duration) -> Result<(), RateLimitError> {
        debug!(key = %ticket.key, id = ticket.id, ?max_wait, "RateLimiter::wait: called");
        match tokio::time::timeout(max_wait, &mut ticket.rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RateLimitError::Closed { key: ticket.key }),
            Err(_) => {
                let state = self.state(&ticket.key);
                let mut inner = state.lock().await;
                let before = inner.queue.len();
                inner.queue.retain(|r| r.id != ticket.id);
                if inner.queue.len() < before {
                    inner.stats.total_timed_out += 1;
                    warn!(key = %ticket.key, ?max_wait, "Rate limit wait timed out");
                    return Err(RateLimitError::Timeout {
                        key: ticket.key,
                        waited: max_wait,
                    });
                }
                drop(inner);
                // Released between the timeout firing and taking the lock
                if ticket.is_released() {
                    Ok(())
                } else {
                    Err(RateLimitError::Timeout {
                        key: ticket.key,
                        waited: max_wait,
                    })
                }
            }
        }
    }

    /// Release whatever the key's budget allows right now
    pub async fn drain(&self, key: &str) -> usize {
        self.drain_at(key, Instant::now()).await
    }

    pub async fn drain_at(&self, key: &str, now: Instant) -> usize {
        let state = self.state(key);
        let mut inner = state.lock().await;
        let released = inner.drain(now);
        if released > 0 {
            debug!(%key, released, remaining = inner.queue.len(), "RateLimiter::drain: released");
        }
        released
    }

    /// Drain every known key
    pub async fn drain_all(&self) -> usize {
        let now = Instant::now();
        let mut released = 0;
        for key in self.known_keys() {
            released += self.drain_at(&key, now).await;
        }
        released
    }

    /// Clamp a key's budget to what the remote side reports as remaining
    pub async fn observe_remaining(&self, key: &str, remaining: f64) {
        let state = self.state(key);
        let mut inner = state.lock().await;
        inner.bucket.observe_remaining(remaining, Instant::now());
        info!(%key, remaining, "Rate limit budget updated from remote");
    }

    /// Current queue length for a key
    pub async fn queue_depth(&self, key: &str) -> usize {
        self.state(key).lock().await.queue.len()
    }

    /// Telemetry for one key
    pub async fn telemetry(&self, key: &str) -> LimiterTelemetry {
        let now = Instant::now();
        let state = self.state(key);
        let mut inner = state.lock().await;
        inner.prune_recent(now, self.config.telemetry_window());
        let recent_granted = inner.recent.iter().filter(|(_, granted)| *granted).count() as u64;
        let head_cost = inner.queue.front().map_or(1.0, |r| r.cost);
        LimiterTelemetry {
            key: key.to_string(),
            capacity: inner.bucket.capacity(),
            tokens_available: inner.bucket.available(now),
            refill_per_sec: inner.bucket.refill_rate(),
            queue_depth: inner.queue.len(),
            head_wait_ms: inner
                .bucket
                .time_until(head_cost, now)
                .map(|wait| wait.as_millis() as u64),
            recent_granted,
            recent_denied: inner.recent.len() as u64 - recent_granted,
            stats: inner.stats.clone(),
        }
    }

    /// Telemetry for every known key, sorted by key
    pub async fn telemetry_all(&self) -> Vec<LimiterTelemetry> {
        let mut all = Vec::new();
        for key in self.known_keys() {
            all.push(self.telemetry(&key).await);
        }
        all
    }

    /// Spawn the periodic drain step. Stops once the limiter is dropped.
    pub fn spawn_drainer(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let every = self.config.drain_interval();
        debug!(?every, "RateLimiter::spawn_drainer: called");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    debug!("RateLimiter drainer: limiter dropped, exiting");
                    break;
                };
                limiter.drain_all().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill_tokens: f64, period_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitsConfig::default().with_key(
            "api",
            RateLimitConfig::new(capacity, refill_tokens, Duration::from_secs(period_secs)),
        ))
    }

    #[tokio::test]
    async fn test_invalid_cost_rejected() {
        let limiter = limiter(5.0, 5.0, 60);
        let t0 = Instant::now();

        for cost in [f64::NAN, -1.0, f64::INFINITY] {
            assert!(matches!(
                limiter.admit_at("api", cost, t0).await,
                Decision::Rejected { .. }
            ));
        }
        assert_eq!(limiter.queue_depth("api").await, 0);

        // A negative cost never mints tokens
        assert!(limiter.admit_at("api", 5.0, t0).await.is_granted());
        assert!(matches!(
            limiter.admit_at("api", -5.0, t0).await,
            Decision::Rejected { .. }
        ));
        assert!(limiter.admit_at("api", 1.0, t0).await.is_queued());

        let telemetry = limiter.telemetry("api").await;
        assert_eq!(telemetry.stats.total_rejected, 4);
        assert!(telemetry.tokens_available <= telemetry.capacity);
    }

    #[tokio::test]
    async fn test_nan_cost_does_not_block_queue() {
        let limiter = limiter(1.0, 1.0, 3600);
        let t0 = Instant::now();

        assert!(limiter.admit_at("api", 1.0, t0).await.is_granted());
        assert!(matches!(
            limiter.admit_at("api", f64::NAN, t0).await,
            Decision::Rejected { .. }
        ));
        let Decision::Queued { ticket, .. } = limiter.admit_at("api", 1.0, t0).await else {
            panic!("expected the request to queue");
        };
        assert_eq!(limiter.queue_depth("api").await, 1);

        // One refill later the honest request at the head is released
        assert_eq!(limiter.drain_at("api", t0 + Duration::from_secs(3600)).await, 1);
        assert!(limiter.wait(ticket, Duration::from_millis(10)).await.is_ok());
        assert_eq!(limiter.queue_depth("api").await, 0);
    }

    #[tokio::test]
    async fn test_fresh_key_grants_first_call() {
        let limiter = limiter(1.0, 1.0, 3600);
        assert!(limiter.admit("api", 1.0).await.is_granted());
        // Unconfigured key also starts full
        assert!(limiter.admit("never-seen", 1.0).await.is_granted());
    }

    #[tokio::test]
    async fn test_burst_over_capacity_then_drain_in_order() {
        let limiter = limiter(50.0, 50.0, 60);
        let t0 = Instant::now();

        let mut granted = 0;
        let mut tickets = Vec::new();
        for _ in 0..60 {
            match limiter.admit_at("api", 1.0, t0).await {
                Decision::Granted => granted += 1,
                Decision::Queued { position, ticket } => tickets.push((position, ticket)),
                Decision::Rejected { reason } => panic!("unexpected rejection: {}", reason),
            }
        }
        assert_eq!(granted, 50);
        assert_eq!(tickets.len(), 10);
        let positions: Vec<_> = tickets.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, (1..=10).collect::<Vec<_>>());
        assert_eq!(limiter.queue_depth("api").await, 10);

        // 4.2s of refill at 50/60s is 3.5 tokens: only the first three go
        let released = limiter.drain_at("api", t0 + Duration::from_millis(4200)).await;
        assert_eq!(released, 3);
        let flags: Vec<_> = tickets.iter_mut().map(|(_, t)| t.is_released()).collect();
        assert_eq!(flags[..3], [true, true, true]);
        assert!(flags[3..].iter().all(|f| !f));

        // By t=60s the remaining seven are all released
        let released = limiter.drain_at("api", t0 + Duration::from_secs(60)).await;
        assert_eq!(released, 7);
        assert!(tickets[3..].iter_mut().all(|(_, t)| t.is_released()));
        assert_eq!(limiter.queue_depth("api").await, 0);
    }

    #[tokio::test]
    async fn test_no_head_of_line_jumping() {
        let limiter = limiter(2.0, 1.0, 1);
        let t0 = Instant::now();
        assert!(limiter.admit_at("api", 2.0, t0).await.is_granted());

        // Needs 2 tokens, waits
        let first = limiter.admit_at("api", 2.0, t0).await;
        assert!(first.is_queued());

        // 1s later one token exists, but a cheap request must still queue behind
        let second = limiter.admit_at("api", 1.0, t0 + Duration::from_secs(1)).await;
        assert!(second.is_queued());
        assert_eq!(limiter.queue_depth("api").await, 2);
    }

    #[tokio::test]
    async fn test_cost_above_capacity_rejected() {
        let limiter = limiter(5.0, 5.0, 60);
        assert!(matches!(
            limiter.admit("api", 6.0).await,
            Decision::Rejected { .. }
        ));
        let err = limiter.acquire("api", 6.0).await.unwrap_err();
        assert!(matches!(err, RateLimitError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_queue_depth_limit() {
        let limiter = RateLimiter::new(RateLimitsConfig::default().with_key(
            "api",
            RateLimitConfig::new(1.0, 1.0, Duration::from_secs(3600)).with_max_queue_depth(1),
        ));
        let t0 = Instant::now();
        assert!(limiter.admit_at("api", 1.0, t0).await.is_granted());
        assert!(limiter.admit_at("api", 1.0, t0).await.is_queued());
        assert!(matches!(
            limiter.admit_at("api", 1.0, t0).await,
            Decision::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let limiter = RateLimiter::new(RateLimitsConfig::default().with_key(
            "api",
            RateLimitConfig::new(1.0, 1.0, Duration::from_secs(3600)).with_max_wait(Duration::from_secs(5)),
        ));
        limiter.acquire("api", 1.0).await.unwrap();

        let err = limiter.acquire("api", 1.0).await.unwrap_err();
        assert!(err.is_timeout());
        // The timed-out request left the queue
        assert_eq!(limiter.queue_depth("api").await, 0);
        assert_eq!(limiter.telemetry("api").await.stats.total_timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_released_by_drainer() {
        let limiter = Arc::new(RateLimiter::new(RateLimitsConfig::default().with_key(
            "api",
            RateLimitConfig::new(1.0, 1.0, Duration::from_secs(2)).with_max_wait(Duration::from_secs(30)),
        )));
        let drainer = limiter.spawn_drainer();

        limiter.acquire("api", 1.0).await.unwrap();
        let start = Instant::now();
        limiter.acquire("api", 1.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));

        drainer.abort();
    }

    #[tokio::test]
    async fn test_dropped_waiter_refunds_tokens() {
        let limiter = limiter(1.0, 1.0, 10);
        let t0 = Instant::now();
        assert!(limiter.admit_at("api", 1.0, t0).await.is_granted());
        let abandoned = limiter.admit_at("api", 1.0, t0).await;
        let kept = limiter.admit_at("api", 1.0, t0).await;
        drop(abandoned);

        let Decision::Queued { mut ticket, .. } = kept else {
            panic!("expected queued");
        };
        // Enough for one: the abandoned request refunds, the next in line gets it
        assert_eq!(limiter.drain_at("api", t0 + Duration::from_secs(10)).await, 1);
        assert!(ticket.is_released());
    }

    #[tokio::test]
    async fn test_observe_remaining_blocks_until_refill() {
        let limiter = limiter(17.0, 17.0, 86_400);
        limiter.observe_remaining("api", 0.0).await;
        assert!(limiter.admit("api", 1.0).await.is_queued());
    }

    #[tokio::test]
    async fn test_telemetry_counts() {
        let limiter = limiter(2.0, 2.0, 3600);
        let t0 = Instant::now();
        for _ in 0..3 {
            let _ = limiter.admit_at("api", 1.0, t0).await;
        }
        let telemetry = limiter.telemetry("api").await;
        assert_eq!(telemetry.queue_depth, 1);
        assert_eq!(telemetry.recent_granted, 2);
        assert_eq!(telemetry.recent_denied, 1);
        assert_eq!(telemetry.stats.total_queued, 1);
        assert_eq!(telemetry.stats.peak_queue_depth, 1);
        assert!(telemetry.tokens_available < 1.0);
        // One token at 2 per hour is about half an hour away
        let wait = telemetry.head_wait_ms.unwrap();
        assert!(wait > 1_790_000 && wait <= 1_800_000);

        let all = limiter.telemetry_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "api");
    }
}
