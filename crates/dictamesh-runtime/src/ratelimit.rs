use parking_lot::Mutex;
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100.0,
            refill_per_sec: 50.0,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: tokio::time::Instant,
}

/// Token bucket keyed per (adapter, operation) by the caller. Exceeding
/// the rate is a regular outcome with retry guidance, not an error the
/// bucket recovers from on its own.
pub struct TokenBucket {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimitConfig) -> Self {
        assert!(
            config.capacity > 0.0 && config.refill_per_sec > 0.0,
            "invariant violated: token bucket needs positive capacity and refill"
        );
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: tokio::time::Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.config.capacity as u64
    }

    /// Whole tokens currently available, without refilling.
    pub fn remaining(&self) -> u64 {
        self.state.lock().tokens.max(0.0) as u64
    }

    /// Take one token, or report how long until one is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens =
            (state.tokens + elapsed * self.config.refill_per_sec).min(self.config.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / self.config.refill_per_sec))
        }
    }
}
