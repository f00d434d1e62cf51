//! Circuit breaker, one per provider.
//!
//! `closed → open` when consecutive failures reach the threshold;
//! `open → half-open` after the cooldown; `half-open → closed` after enough
//! probe successes; any half-open failure reopens. While open, calls
//! fast-fail without reaching the adapter. Half-open admits a single probe
//! at a time; callers that lose the probe race are turned away as if the
//! circuit were still open.

use tokio::time::Instant;

use crate::domain::models::BreakerSettings;

/// Wire-visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with the call.
    Allowed,
    /// Circuit is open (or a half-open probe is already in flight).
    Blocked,
}

#[derive(Debug)]
enum State {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen {
        successes: u32,
        probe_in_flight: bool,
    },
}

/// Per-provider circuit breaker. Callers hold this behind a mutex; no I/O
/// happens under the lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    state: State,
    /// Times the circuit has opened over its lifetime.
    open_count: u32,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            state: State::Closed {
                consecutive_failures: 0,
            },
            open_count: 0,
        }
    }

    /// Check whether a call may proceed, transitioning open → half-open when
    /// the cooldown has elapsed.
    pub fn admit(&mut self) -> Admission {
        match &mut self.state {
            State::Closed { .. } => Admission::Allowed,
            State::Open { opened_at } => {
                let cooldown = std::time::Duration::from_millis(self.settings.cooldown_ms);
                if opened_at.elapsed() >= cooldown {
                    self.state = State::HalfOpen {
                        successes: 0,
                        probe_in_flight: true,
                    };
                    Admission::Allowed
                } else {
                    Admission::Blocked
                }
            }
            State::HalfOpen { probe_in_flight, .. } => {
                if *probe_in_flight {
                    Admission::Blocked
                } else {
                    *probe_in_flight = true;
                    Admission::Allowed
                }
            }
        }
    }

    /// Record a successful call. Returns true when this success closed the
    /// circuit.
    pub fn record_success(&mut self) -> bool {
        match &mut self.state {
            State::Closed { consecutive_failures } => {
                *consecutive_failures = 0;
                false
            }
            State::Open { .. } => false,
            State::HalfOpen { successes, probe_in_flight } => {
                *successes += 1;
                *probe_in_flight = false;
                if *successes >= self.settings.success_threshold {
                    self.state = State::Closed {
                        consecutive_failures: 0,
                    };
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a failed call. Returns true when this failure opened the
    /// circuit.
    pub fn record_failure(&mut self) -> bool {
        match &mut self.state {
            State::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.settings.failure_threshold {
                    self.open();
                    true
                } else {
                    false
                }
            }
            State::Open { .. } => false,
            State::HalfOpen { .. } => {
                self.open();
                true
            }
        }
    }

    fn open(&mut self) {
        self.state = State::Open {
            opened_at: Instant::now(),
        };
        self.open_count += 1;
    }

    pub fn state(&self) -> CircuitState {
        match self.state {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.state {
            State::Closed { consecutive_failures } => consecutive_failures,
            _ => self.settings.failure_threshold,
        }
    }

    pub fn open_count(&self) -> u32 {
        self.open_count
    }

    /// Release a half-open probe slot without recording an outcome. Used
    /// when an admitted call never reached the adapter (e.g. the rate
    /// limiter timed out first).
    pub fn abort_probe(&mut self) {
        if let State::HalfOpen { probe_in_flight, .. } = &mut self.state {
            *probe_in_flight = false;
        }
    }

    /// Manual reset to closed.
    pub fn reset(&mut self) {
        self.state = State::Closed {
            consecutive_failures: 0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(cooldown_ms: u64) -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 5,
            cooldown_ms,
            success_threshold: 2,
        }
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let mut breaker = CircuitBreaker::new(settings(60_000));
        for i in 1..=4 {
            assert!(!breaker.record_failure(), "should not open at failure {i}");
        }
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.admit(), Admission::Blocked);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let mut breaker = CircuitBreaker::new(settings(60_000));
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..4 {
            assert!(!breaker.record_failure());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_cooldown_then_closes() {
        let mut breaker = CircuitBreaker::new(settings(10));
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.admit(), Admission::Blocked);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(breaker.admit(), Admission::Allowed);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(!breaker.record_success());
        assert_eq!(breaker.admit(), Admission::Allowed);
        assert!(breaker.record_success());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(settings(10));
        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(breaker.admit(), Admission::Allowed);
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.open_count(), 2);
    }

    #[tokio::test]
    async fn test_half_open_serializes_probes() {
        let mut breaker = CircuitBreaker::new(settings(10));
        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // First probe admitted; a second concurrent probe is turned away.
        assert_eq!(breaker.admit(), Admission::Allowed);
        assert_eq!(breaker.admit(), Admission::Blocked);

        // Probe completes; the next probe may proceed.
        breaker.record_success();
        assert_eq!(breaker.admit(), Admission::Allowed);
    }

    #[test]
    fn test_reset() {
        let mut breaker = CircuitBreaker::new(settings(60_000));
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.admit(), Admission::Allowed);
    }
}
