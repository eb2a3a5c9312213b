//! Process-local rate limiting
//!
//! Sliding-window limiter guarding upstream calls and webhook ingestion.
//! Counts are kept in memory per scope, so limits apply per process; a
//! multi-instance deployment multiplies the effective limit. The limiter
//! fails open: when its state is unavailable the call proceeds.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

const SWEEP_THRESHOLD: usize = 1024;
const MIN_SWEEP_HORIZON: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// How long the caller should wait before retrying, when denied
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

pub trait RateLimiter: Send + Sync {
    /// Records one attempt for `(provider_key, scope)` and reports whether
    /// it fits the window. Scopes are typically a connection id, with a
    /// suffix distinguishing webhook traffic from polling.
    fn check(&self, provider_key: &str, scope: &str) -> RateDecision;
}

pub struct SlidingWindowLimiter {
    default_limit: u32,
    default_window: Duration,
    overrides: HashMap<String, (u32, Duration)>,
    sweep_horizon: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let default_window = Duration::from_millis(config.default_window_ms);
        let overrides: HashMap<String, (u32, Duration)> = config
            .provider_overrides
            .iter()
            .map(|(key, o)| (key.clone(), (o.limit, Duration::from_millis(o.window_ms))))
            .collect();
        let widest = overrides
            .values()
            .map(|(_, window)| *window)
            .chain(std::iter::once(default_window))
            .max()
            .unwrap_or(default_window);
        Self {
            default_limit: config.default_limit,
            default_window,
            overrides,
            sweep_horizon: std::cmp::max(widest * 2, MIN_SWEEP_HORIZON),
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limits_for(&self, provider_key: &str) -> (u32, Duration) {
        self.overrides
            .get(provider_key)
            .copied()
            .unwrap_or((self.default_limit, self.default_window))
    }

    /// Window check against an explicit clock, so tests can advance time.
    fn check_at(&self, provider_key: &str, scope: &str, now: Instant) -> RateDecision {
        let (limit, window) = self.limits_for(provider_key);
        // A zero limit disables the limiter for the provider
        if limit == 0 {
            return RateDecision::allow();
        }

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(_) => return RateDecision::allow(),
        };

        // Idle scopes would otherwise accumulate one deque per connection
        if windows.len() > SWEEP_THRESHOLD {
            let horizon = self.sweep_horizon;
            windows.retain(|_, entries| {
                entries
                    .back()
                    .is_some_and(|newest| now.duration_since(*newest) < horizon)
            });
        }

        let entries = windows
            .entry(format!("{}|{}", provider_key, scope))
            .or_default();
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() as u64 >= u64::from(limit) {
            let retry_after = entries
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)));
            return RateDecision {
                allowed: false,
                retry_after,
            };
        }

        entries.push_back(now);
        RateDecision::allow()
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, provider_key: &str, scope: &str) -> RateDecision {
        self.check_at(provider_key, scope, Instant::now())
    }
}
