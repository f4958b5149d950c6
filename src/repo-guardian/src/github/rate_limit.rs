//! Rate-limit awareness for the GitHub transport.
//!
//! Each transport (the app-level client and every installation-scoped
//! client) owns a [`RateLimitGate`], because GitHub accounts rate budget
//! separately per installation. The gate provides:
//!
//! - pre-emptive throttling when the remaining budget falls below a
//!   configured fraction of the limit, amortizing what is left over the
//!   time until reset;
//! - classification of primary (`403` + `X-RateLimit-Remaining: 0`) and
//!   secondary (`403` + `Retry-After`) rate-limit responses;
//! - the delay to apply before the single retry of a rate-limited request.
//!
//! State is guarded by a mutex that is never held across a sleep or a
//! network call.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::metrics::Metrics;

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Minimum sleep, clamping clock skew between this host and the API.
const MIN_DELAY: Duration = Duration::from_secs(1);

/// Rate-limit state for one transport, updated from response headers.
#[derive(Debug, Default, Clone, Copy)]
struct RateState {
    limit: u64,
    remaining: u64,
    /// Unix timestamp (seconds) when the budget resets.
    reset_at: u64,
}

/// Pre-emptive pacing gate for a single transport.
pub struct RateLimitGate {
    threshold: f64,
    metrics: Arc<Metrics>,
    state: Mutex<RateState>,
}

impl RateLimitGate {
    /// Creates a gate that starts throttling when remaining budget drops to
    /// `threshold` (a fraction of the limit, e.g. `0.10`).
    #[must_use]
    pub fn new(threshold: f64, metrics: Arc<Metrics>) -> Self {
        Self {
            threshold,
            metrics,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Sleeps if the remaining budget is below the threshold, spreading the
    /// remaining requests evenly until the reset. No-op before the first
    /// response has populated the state.
    pub async fn pace(&self) {
        let state = *self.state.lock();

        let Some(delay) = preemptive_delay(state, self.threshold, unix_now()) else {
            return;
        };

        warn!(
            remaining = state.remaining,
            limit = state.limit,
            delay_secs = delay.as_secs_f64(),
            reset_at = state.reset_at,
            "pre-emptive rate limit throttle"
        );
        self.metrics.rate_limit_wait("preemptive", delay.as_secs_f64());

        tokio::time::sleep(delay).await;
    }

    /// Updates the state from response headers. Headers are applied only
    /// when all three are present and parseable; partial or missing headers
    /// leave the state untouched.
    pub fn update(&self, headers: &HeaderMap) {
        let (Some(limit), Some(remaining), Some(reset_at)) = (
            header_u64(headers, HEADER_LIMIT),
            header_u64(headers, HEADER_REMAINING),
            header_u64(headers, HEADER_RESET),
        ) else {
            return;
        };

        {
            let mut state = self.state.lock();
            state.limit = limit;
            state.remaining = remaining;
            state.reset_at = reset_at;
        }

        self.metrics.rate_remaining(remaining as f64);
        debug!(remaining, limit, reset_at, "github api rate limit");
    }
}

/// Computes the pre-emptive delay, or `None` when no throttling is needed.
fn preemptive_delay(state: RateState, threshold: f64, now: u64) -> Option<Duration> {
    if state.limit == 0 {
        return None;
    }

    let threshold_count = (state.limit as f64 * threshold) as u64;
    if state.remaining > threshold_count {
        return None;
    }

    if state.reset_at <= now {
        return None;
    }

    let until_reset = state.reset_at - now;
    let delay = if state.remaining == 0 {
        // Fully exhausted; wait out the window.
        Duration::from_secs(until_reset)
    } else {
        // Spread remaining budget evenly until reset.
        Duration::from_secs_f64(until_reset as f64 / state.remaining as f64)
    };

    Some(delay.max(MIN_DELAY))
}

/// Classifies a rate-limited response, returning the reason label
/// (`"primary"` or `"secondary"`), or `None` for ordinary responses.
pub fn classify(status: StatusCode, headers: &HeaderMap) -> Option<&'static str> {
    if status != StatusCode::FORBIDDEN {
        return None;
    }

    if headers.contains_key(RETRY_AFTER) {
        return Some("secondary");
    }

    if header_u64(headers, HEADER_REMAINING) == Some(0) {
        return Some("primary");
    }

    None
}

/// Computes how long to wait before the single retry of a rate-limited
/// request: `Retry-After` seconds for secondary limits, time until
/// `X-RateLimit-Reset` for primary ones, with a one-second floor.
#[must_use]
pub fn retry_delay(headers: &HeaderMap) -> Duration {
    retry_delay_at(headers, unix_now())
}

fn retry_delay_at(headers: &HeaderMap, now: u64) -> Duration {
    if let Some(seconds) = header_u64(headers, RETRY_AFTER.as_str()) {
        if seconds > 0 {
            return Duration::from_secs(seconds);
        }
    }

    if let Some(reset_at) = header_u64(headers, HEADER_RESET) {
        if reset_at > now {
            return Duration::from_secs(reset_at - now);
        }
    }

    MIN_DELAY
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
