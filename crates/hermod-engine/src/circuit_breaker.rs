//! Per-sink circuit breaker (spec §4.3: "opens after K consecutive
//! failures; enters half-open after cooldown; one probe write decides
//! close/re-open"). Lock-free, state packed into atomics so the hot path
//! never blocks behind a mutex.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Clock abstraction so breaker timing can be faked in tests.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Default)]
pub struct MonotonicClock {
    start: std::sync::OnceLock<std::time::Instant>,
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.start
            .get_or_init(std::time::Instant::now)
            .elapsed()
            .as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Shared {
    state: AtomicU8,
    failure_count: AtomicU8,
    opened_at_millis: AtomicU64,
}

/// Per-sink breaker (spec §4.3). One instance guards every write attempt
/// for that sink across all shard lanes.
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicU8::new(0),
                opened_at_millis: AtomicU64::new(0),
            }),
            config,
            clock,
        }
    }

    /// Whether a write attempt should be allowed right now. Transitions
    /// `Open` -> `HalfOpen` once the cooldown has elapsed, admitting
    /// exactly one probe caller.
    pub fn allow(&self) -> bool {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_HALF_OPEN => false,
            STATE_OPEN => {
                let opened_at = self.shared.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                if elapsed < self.config.cooldown.as_millis() as u64 {
                    return false;
                }
                self.shared
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            }
            _ => unreachable!("invalid circuit breaker state"),
        }
    }

    pub fn on_success(&self) {
        let current = self.shared.state.load(Ordering::Acquire);
        match current {
            STATE_HALF_OPEN => {
                if self
                    .shared
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.shared.failure_count.store(0, Ordering::Release);
                    tracing::info!("circuit breaker closed");
                }
            }
            STATE_CLOSED => self.shared.failure_count.store(0, Ordering::Release),
            _ => {}
        }
    }

    pub fn on_failure(&self) {
        let current = self.shared.state.load(Ordering::Acquire);
        match current {
            STATE_HALF_OPEN => {
                if self
                    .shared
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.shared
                        .opened_at_millis
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!("circuit breaker probe failed, reopening");
                }
            }
            STATE_CLOSED => {
                let failures = self.shared.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures as u32 >= self.config.failure_threshold
                    && self
                        .shared
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.shared
                        .opened_at_millis
                        .store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(failures, "circuit breaker opened");
                }
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.shared.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as StdAtomicU64;

    struct FakeClock(StdAtomicU64);

    impl Clock for FakeClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(1),
        });
        for _ in 0..2 {
            breaker.on_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let clock = Arc::new(FakeClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(100),
            },
            clock.clone(),
        );
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.0.store(200, Ordering::Relaxed);
        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let clock = Arc::new(FakeClock(StdAtomicU64::new(0)));
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(100),
            },
            clock.clone(),
        );
        breaker.on_failure();
        clock.0.store(200, Ordering::Relaxed);
        assert!(breaker.allow());
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
