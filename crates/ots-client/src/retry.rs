//! Retry policy with exponential backoff and jitter.
//!
//! Everything in this module is pure: no I/O, no clocks. The caller owns the
//! [`RetryState`] for one logical operation, records failures into it, and
//! asks [`RetryPolicy::decide`] whether and how long to wait.
//!
//! Randomness is injected so tests can seed it.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Symmetric jitter applied to every computed delay (±25%).
pub const JITTER_FRACTION: f64 = 0.25;

/// Kinds an idempotency-unsafe request may be retried on: failures that
/// provably happened before the server executed anything.
const UNSAFE_RETRYABLE: [ErrorKind; 3] = [
    ErrorKind::Connect,
    ErrorKind::RateLimited,
    ErrorKind::ServiceUnavailable,
];

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            retryable_kinds: [
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::ServiceUnavailable,
                ErrorKind::ServerError,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delays(mut self, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Upper bound on the summed delays of one logical operation.
    pub fn max_total_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.saturating_mul(u64::from(self.max_retries)))
    }
}

/// Whether a request may be safely reissued after an ambiguous failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    /// Read-only; retry on any retryable failure.
    Safe,
    /// Has server-side effects (create, retrieve-and-burn, burn); retry
    /// only on pre-execution failures.
    Unsafe,
}

// ---------------------------------------------------------------------------
// Pure functions
// ---------------------------------------------------------------------------

/// `kind` is in the configured list, or is a connection-level failure.
pub fn is_retryable(kind: ErrorKind, config: &RetryConfig) -> bool {
    kind.is_connectivity() || config.retryable_kinds.contains(&kind)
}

/// [`is_retryable`] narrowed by the request's idempotency.
pub fn is_retryable_for(kind: ErrorKind, config: &RetryConfig, idempotency: Idempotency) -> bool {
    match idempotency {
        Idempotency::Safe => is_retryable(kind, config),
        Idempotency::Unsafe => UNSAFE_RETRYABLE.contains(&kind) && is_retryable(kind, config),
    }
}

/// `min(initial * 2^attempt, max)` before jitter.
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let ms = config
        .initial_delay_ms
        .saturating_mul(factor)
        .min(config.max_delay_ms);
    Duration::from_millis(ms)
}

/// [`base_delay`] perturbed by ±[`JITTER_FRACTION`], floored at zero.
pub fn next_delay(attempt: u32, config: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let base = base_delay(attempt, config).as_secs_f64();
    let jitter = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    Duration::from_secs_f64((base * (1.0 + jitter)).max(0.0))
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Per-operation retry bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Retries already performed.
    pub attempt: u32,
    /// Classification of the most recent failure.
    pub last_error: Option<ErrorKind>,
    /// Total time spent waiting between attempts.
    pub elapsed: Duration,
    retry_after: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a failed attempt and any server-requested delay.
    pub fn record_failure(&mut self, kind: ErrorKind, retry_after: Option<Duration>) {
        self.last_error = Some(kind);
        self.retry_after = retry_after;
    }

    /// Note that the caller waited `delay` and is about to retry.
    pub fn record_retry(&mut self, delay: Duration) {
        self.attempt += 1;
        self.elapsed += delay;
        self.retry_after = None;
    }
}

/// Outcome of [`RetryPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

/// Backoff policy built from a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry iff `attempt < max_retries` and the last failure is retryable
    /// for this idempotency class.
    ///
    /// A server `Retry-After` replaces the computed delay, clamped to
    /// `max_delay_ms`. The delay is further clamped so that the summed wait
    /// never exceeds [`RetryConfig::max_total_delay`].
    pub fn decide(
        &self,
        state: &RetryState,
        idempotency: Idempotency,
        rng: &mut impl Rng,
    ) -> RetryDecision {
        let Some(kind) = state.last_error else {
            return RetryDecision::GiveUp;
        };
        if state.attempt >= self.config.max_retries
            || !is_retryable_for(kind, &self.config, idempotency)
        {
            return RetryDecision::GiveUp;
        }

        let max_delay = Duration::from_millis(self.config.max_delay_ms);
        let delay = match state.retry_after {
            Some(requested) => requested.min(max_delay),
            None => next_delay(state.attempt, &self.config, rng),
        };
        let remaining = self.config.max_total_delay().saturating_sub(state.elapsed);

        RetryDecision::Retry {
            delay: delay.min(remaining),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn failed(kind: ErrorKind, attempt: u32) -> RetryState {
        let mut state = RetryState::new();
        state.attempt = attempt;
        state.record_failure(kind, None);
        state
    }

    #[test]
    fn is_retryable_table() {
        let config = RetryConfig::default();
        for kind in ErrorKind::ALL {
            let expected = matches!(
                kind,
                ErrorKind::Connect
                    | ErrorKind::Transport
                    | ErrorKind::Timeout
                    | ErrorKind::RateLimited
                    | ErrorKind::ServiceUnavailable
                    | ErrorKind::ServerError
            );
            assert_eq!(is_retryable(kind, &config), expected, "{kind:?}");
        }
    }

    #[test]
    fn connectivity_retryable_even_with_empty_list() {
        let config = RetryConfig {
            retryable_kinds: BTreeSet::new(),
            ..RetryConfig::default()
        };
        for kind in ErrorKind::ALL {
            assert_eq!(is_retryable(kind, &config), kind.is_connectivity(), "{kind:?}");
        }
    }

    #[test]
    fn unsafe_requests_only_retry_pre_execution_failures() {
        let config = RetryConfig::default();
        for kind in ErrorKind::ALL {
            let expected = matches!(
                kind,
                ErrorKind::Connect | ErrorKind::RateLimited | ErrorKind::ServiceUnavailable
            );
            assert_eq!(
                is_retryable_for(kind, &config, Idempotency::Unsafe),
                expected,
                "{kind:?}"
            );
        }
    }

    #[test]
    fn base_delay_doubles_then_caps() {
        let config = RetryConfig::default();
        let ms: Vec<u128> = (0..6).map(|a| base_delay(a, &config).as_millis()).collect();
        assert_eq!(ms, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
        assert_eq!(base_delay(200, &config).as_millis(), 10_000);
    }

    #[test]
    fn jittered_delay_within_bounds() {
        let config = RetryConfig::default().with_max_retries(8);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..config.max_retries {
            let base = base_delay(attempt, &config).as_secs_f64();
            for _ in 0..200 {
                let delay = next_delay(attempt, &config, &mut rng).as_secs_f64();
                assert!(delay >= 0.75 * base - 1e-9, "attempt {attempt}: {delay}");
                assert!(delay <= 1.25 * base + 1e-9, "attempt {attempt}: {delay}");
            }
        }
    }

    #[test]
    fn seeded_jitter_is_reproducible() {
        let config = RetryConfig::default();
        let a = next_delay(2, &config, &mut StdRng::seed_from_u64(42));
        let b = next_delay(2, &config, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn decide_respects_max_retries() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        for attempt in 0..3 {
            let state = failed(ErrorKind::ServerError, attempt);
            assert!(matches!(
                policy.decide(&state, Idempotency::Safe, &mut rng),
                RetryDecision::Retry { .. }
            ));
        }
        let state = failed(ErrorKind::ServerError, 3);
        assert_eq!(
            policy.decide(&state, Idempotency::Safe, &mut rng),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn decide_gives_up_on_auth_and_unsafe_timeout() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            policy.decide(&failed(ErrorKind::Auth, 0), Idempotency::Safe, &mut rng),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(&failed(ErrorKind::Timeout, 0), Idempotency::Unsafe, &mut rng),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(&RetryState::new(), Idempotency::Safe, &mut rng),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn retry_after_is_honoured_and_clamped() {
        let policy = RetryPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);

        let mut state = RetryState::new();
        state.record_failure(ErrorKind::RateLimited, Some(Duration::from_secs(3)));
        assert_eq!(
            policy.decide(&state, Idempotency::Unsafe, &mut rng),
            RetryDecision::Retry {
                delay: Duration::from_secs(3)
            }
        );

        state.record_failure(ErrorKind::RateLimited, Some(Duration::from_secs(600)));
        assert_eq!(
            policy.decide(&state, Idempotency::Unsafe, &mut rng),
            RetryDecision::Retry {
                delay: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn total_delay_is_bounded() {
        let policy = RetryPolicy::new(RetryConfig::default().with_delays(1_000, 1_000));
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = RetryState::new();

        loop {
            state.record_failure(ErrorKind::Transport, None);
            match policy.decide(&state, Idempotency::Safe, &mut rng) {
                RetryDecision::Retry { delay } => state.record_retry(delay),
                RetryDecision::GiveUp => break,
            }
        }

        assert_eq!(state.attempt, 3);
        assert!(state.elapsed <= policy.config().max_total_delay());
    }
}
