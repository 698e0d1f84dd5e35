use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::client::ClientId;
use crate::config::RateLimitPolicy;
use crate::errors::AppError;
use crate::telemetry::mask_id;

/// Admission check run once per inbound request, before anything else.
///
/// State is process-local: separate instances enforce separate quotas.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, identifier: &str) -> bool;

    /// Length of one window; reported to clients as `Retry-After`.
    fn window(&self) -> Duration;
}

/// Per-identifier counter for the current window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u64,
    pub window_start: Instant,
}

/// Fixed-window limiter over a sharded map.
///
/// The map is bounded by `max_keys`, tracked in `tracked` so the bound holds
/// under concurrent inserts. When full, expired windows are swept at most
/// once per window length; if no slot frees up, unseen identifiers are
/// refused.
pub struct FixedWindowLimiter {
    policy: RateLimitPolicy,
    max_keys: usize,
    entries: DashMap<String, RateLimitEntry>,
    tracked: AtomicUsize,
    last_sweep: Mutex<Option<Instant>>,
    sweeps: AtomicU64,
}

impl FixedWindowLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_max_keys(policy, crate::config::DEFAULT_RATE_LIMIT_MAX_KEYS)
    }

    pub fn with_max_keys(policy: RateLimitPolicy, max_keys: usize) -> Self {
        Self {
            policy,
            max_keys: max_keys.max(1),
            entries: DashMap::new(),
            tracked: AtomicUsize::new(0),
            last_sweep: Mutex::new(None),
            sweeps: AtomicU64::new(0),
        }
    }

    /// `allow` with an explicit clock reading.
    pub fn allow_at(&self, identifier: &str, now: Instant) -> bool {
        if let Some(mut entry) = self.entries.get_mut(identifier) {
            return self.admit(&mut entry, now);
        }

        if !self.reserve_slot(now) {
            tracing::warn!(
                client = %mask_id(identifier),
                tracked = self.tracked.load(Ordering::Relaxed),
                "rate limiter full, refusing new identifier"
            );
            return false;
        }

        match self.entries.entry(identifier.to_string()) {
            Entry::Occupied(mut existing) => {
                // another request inserted it first; give the slot back
                self.tracked.fetch_sub(1, Ordering::AcqRel);
                self.admit(existing.get_mut(), now)
            }
            Entry::Vacant(vacant) => {
                let mut entry = RateLimitEntry {
                    count: 0,
                    window_start: now,
                };
                let allowed = self.admit(&mut entry, now);
                vacant.insert(entry);
                allowed
            }
        }
    }

    fn admit(&self, entry: &mut RateLimitEntry, now: Instant) -> bool {
        if now.saturating_duration_since(entry.window_start) >= self.policy.window {
            entry.count = 0;
            entry.window_start = now;
        }
        if entry.count >= self.policy.max_requests {
            return false;
        }
        entry.count += 1;
        true
    }

    fn try_reserve(&self) -> bool {
        self.tracked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_keys).then_some(n + 1)
            })
            .is_ok()
    }

    fn reserve_slot(&self, now: Instant) -> bool {
        if self.try_reserve() {
            return true;
        }
        if !self.sweep_due(now) {
            return false;
        }
        let evicted = self.evict_expired(now);
        tracing::debug!(evicted, "rate limiter swept expired windows");
        self.try_reserve()
    }

    /// Claims the sweep for this window. Only one caller per window wins.
    fn sweep_due(&self, now: Instant) -> bool {
        let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.saturating_duration_since(at) < self.policy.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Requests counted in the identifier's current window, if tracked.
    pub fn count(&self, identifier: &str) -> Option<u64> {
        self.entries.get(identifier).map(|e| e.count)
    }

    /// Drop every entry whose window has elapsed. Returns how many went.
    pub fn evict_expired(&self, now: Instant) -> usize {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        let window = self.policy.window;
        let mut evicted = 0;
        self.entries.retain(|_, e| {
            let keep = now.saturating_duration_since(e.window_start) < window;
            if !keep {
                evicted += 1;
            }
            keep
        });
        self.tracked.fetch_sub(evicted, Ordering::AcqRel);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, identifier: &str) -> bool {
        self.allow_at(identifier, Instant::now())
    }

    fn window(&self) -> Duration {
        self.policy.window
    }
}

/// Route middleware: rejects with 429 before the handler (and body parsing)
/// runs when the caller's quota is spent.
pub async fn enforce(
    State(limiter): State<Arc<dyn RateLimiter>>,
    ClientId(client): ClientId,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !limiter.allow(&client) {
        tracing::warn!(
            rate_limit = true,
            client = %mask_id(&client),
            path = %req.uri().path(),
            "rate limit exceeded"
        );
        return Err(AppError::RateLimitExceeded {
            retry_after_secs: limiter.window().as_secs().max(1),
        });
    }
    Ok(next.run(req).await)
}

/// Parse a window such as "30s", "15m", "1h", "1d", or bare seconds ("900").
pub fn parse_window(s: &str) -> Option<Duration> {
    let s = s.trim();
    let secs = if let Some(val) = s.strip_suffix('s') {
        val.parse().ok()?
    } else if let Some(val) = s.strip_suffix('m') {
        val.parse::<u64>().ok()?.checked_mul(60)?
    } else if let Some(val) = s.strip_suffix('h') {
        val.parse::<u64>().ok()?.checked_mul(3600)?
    } else if let Some(val) = s.strip_suffix('d') {
        val.parse::<u64>().ok()?.checked_mul(86400)?
    } else {
        s.parse().ok()?
    };
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u64, window_secs: u64) -> FixedWindowLimiter {
        FixedWindowLimiter::new(RateLimitPolicy::new(max, window_secs))
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("1s"), Some(Duration::from_secs(1)));
        assert_eq!(parse_window("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_window("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_window("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_window("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_window("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_window("900"), Some(Duration::from_secs(900)));
        assert_eq!(parse_window("  5m  "), Some(Duration::from_secs(300))); // verify trim
        assert_eq!(parse_window("garbage"), None);
        assert_eq!(parse_window("0s"), None);
        assert_eq!(parse_window(""), None);
    }

    #[test]
    fn test_fourth_call_in_window_rejected() {
        let rl = limiter(3, 60);
        let t0 = Instant::now();
        assert!(rl.allow_at("1.2.3.4", t0));
        assert!(rl.allow_at("1.2.3.4", t0 + Duration::from_secs(1)));
        assert!(rl.allow_at("1.2.3.4", t0 + Duration::from_secs(2)));
        assert!(!rl.allow_at("1.2.3.4", t0 + Duration::from_secs(3)));
        // rejection does not count
        assert_eq!(rl.count("1.2.3.4"), Some(3));
    }

    #[test]
    fn test_window_elapse_restarts_counter() {
        let rl = limiter(3, 60);
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(rl.allow_at("client", t0));
        }
        assert!(!rl.allow_at("client", t0 + Duration::from_secs(59)));
        assert!(rl.allow_at("client", t0 + Duration::from_secs(60)));
        assert_eq!(rl.count("client"), Some(1));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let rl = limiter(1, 60);
        let t0 = Instant::now();
        assert!(rl.allow_at("a", t0));
        assert!(!rl.allow_at("a", t0));
        assert!(rl.allow_at("b", t0));
    }

    #[test]
    fn test_bounded_map_sweeps_then_refuses() {
        let rl = FixedWindowLimiter::with_max_keys(RateLimitPolicy::new(5, 10), 2);
        let t0 = Instant::now();
        assert!(rl.allow_at("a", t0));
        assert!(rl.allow_at("b", t0));
        // full, nothing expired
        assert!(!rl.allow_at("c", t0 + Duration::from_secs(1)));
        // known identifiers still served
        assert!(rl.allow_at("a", t0 + Duration::from_secs(1)));
        // after the window, a sweep makes room
        assert!(rl.allow_at("c", t0 + Duration::from_secs(11)));
        assert_eq!(rl.len(), 1);
    }

    #[test]
    fn test_full_map_sweeps_once_per_window() {
        let rl = FixedWindowLimiter::with_max_keys(RateLimitPolicy::new(5, 10), 2);
        let t0 = Instant::now();
        assert!(rl.allow_at("a", t0));
        assert!(rl.allow_at("b", t0));

        assert!(!rl.allow_at("c", t0 + Duration::from_secs(1)));
        assert_eq!(rl.sweeps.load(Ordering::Relaxed), 1);

        // refusals later in the same window do not scan again
        for i in 0..50 {
            assert!(!rl.allow_at(&format!("new-{}", i), t0 + Duration::from_secs(2)));
        }
        assert_eq!(rl.sweeps.load(Ordering::Relaxed), 1);

        // one window after the last sweep, the next overflow sweeps again
        assert!(rl.allow_at("c", t0 + Duration::from_secs(11)));
        assert_eq!(rl.sweeps.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_concurrent_new_identifiers_respect_bound() {
        let rl = Arc::new(FixedWindowLimiter::with_max_keys(RateLimitPolicy::new(5, 60), 10));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let rl = rl.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|i| rl.allow(&format!("{}-{}", t, i)))
                        .count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 10);
        assert_eq!(rl.len(), 10);
    }

    #[test]
    fn test_concurrent_allow_never_exceeds_quota() {
        let rl = Arc::new(limiter(100, 60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                std::thread::spawn(move || (0..50).filter(|_| rl.allow("shared")).count())
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }
}
