//! Token bucket rate limiter, one bucket per provider.
//!
//! Tokens refill continuously at `refill_rate` per `refill_interval`. A
//! consume attempt that cannot be satisfied sleeps in bounded slices until
//! either the tokens are available or the caller's timeout elapses.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::models::RateLimitSettings;

/// Longest single sleep while waiting for tokens.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Outcome of a `try_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Tokens were deducted; `remaining` reflects the balance after.
    Consumed,
    /// The timeout elapsed before enough tokens accrued.
    TimedOut,
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
}

/// Token bucket with continuous refill.
pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second, derived from rate and interval.
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let interval_secs = (settings.refill_interval_ms as f64 / 1000.0).max(f64::MIN_POSITIVE);
        Self {
            capacity: settings.max_tokens,
            refill_per_sec: settings.refill_rate / interval_secs,
            state: Mutex::new(BucketState {
                available: settings.max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Attempt to deduct `tokens`, waiting up to `timeout`. Waits sleep in
    /// slices of at most 100 ms so cancellation and timeouts stay prompt.
    pub async fn try_consume(&self, tokens: f64, timeout: Duration) -> ConsumeOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.available >= tokens {
                    state.available -= tokens;
                    return ConsumeOutcome::Consumed;
                }
                let missing = tokens - state.available;
                Duration::from_secs_f64(missing / self.refill_per_sec)
            };

            if Instant::now() >= deadline {
                return ConsumeOutcome::TimedOut;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(wait.min(MAX_WAIT_SLICE).min(remaining)).await;
        }
    }

    /// Current balance after refill accrual.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.available
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.available = (state.available + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_tokens: f64, refill_rate: f64) -> RateLimitSettings {
        RateLimitSettings {
            max_tokens,
            refill_rate,
            refill_interval_ms: 1_000,
            acquire_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn test_burst_up_to_capacity() {
        let bucket = TokenBucket::new(&settings(5.0, 5.0));
        for _ in 0..5 {
            let start = Instant::now();
            assert_eq!(
                bucket.try_consume(1.0, Duration::from_millis(10)).await,
                ConsumeOutcome::Consumed
            );
            assert!(start.elapsed() < Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_timeout_when_exhausted() {
        let bucket = TokenBucket::new(&settings(1.0, 0.5));
        assert_eq!(
            bucket.try_consume(1.0, Duration::from_millis(10)).await,
            ConsumeOutcome::Consumed
        );
        // Refill is 0.5 tokens/sec; 20ms cannot yield a full token.
        assert_eq!(
            bucket.try_consume(1.0, Duration::from_millis(20)).await,
            ConsumeOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn test_waits_for_refill_within_timeout() {
        let bucket = TokenBucket::new(&settings(1.0, 20.0));
        assert_eq!(
            bucket.try_consume(1.0, Duration::from_millis(10)).await,
            ConsumeOutcome::Consumed
        );
        // 20 tokens/sec refills one token in 50ms; a 500ms budget suffices.
        let start = Instant::now();
        assert_eq!(
            bucket.try_consume(1.0, Duration::from_millis(500)).await,
            ConsumeOutcome::Consumed
        );
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_available_reports_refill() {
        let bucket = TokenBucket::new(&settings(2.0, 2.0));
        bucket.try_consume(2.0, Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(550)).await;
        let available = bucket.available().await;
        assert!(available > 0.8 && available <= 2.0, "available = {available}");
    }

    #[tokio::test]
    async fn test_concurrent_consumers_are_rate_limited() {
        use std::sync::Arc;
        let bucket = Arc::new(TokenBucket::new(&settings(5.0, 50.0)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let bucket = Arc::clone(&bucket);
            handles.push(tokio::spawn(async move {
                bucket.try_consume(1.0, Duration::from_secs(2)).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), ConsumeOutcome::Consumed);
        }
    }
}
