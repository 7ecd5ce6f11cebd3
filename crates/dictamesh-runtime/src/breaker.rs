use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Minimum absolute failures before the rate can trip the breaker.
    pub failure_floor: u64,
    /// Failure fraction over the window that opens the breaker.
    pub failure_rate: f64,
    /// How long an open breaker short-circuits before allowing a probe.
    pub open_timeout: Duration,
    /// Sliding window over which success/failure counts accumulate.
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_floor: 5,
            failure_rate: 0.5,
            open_timeout: Duration::from_secs(30),
            window: Duration::from_secs(60),
        }
    }
}

/// Stateful gate in front of a failing dependency. Transitions are
/// CAS-driven so exactly one caller wins each state change; with zero
/// observations the breaker is closed.
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: AtomicU8,
    successes: AtomicU64,
    failures: AtomicU64,
    window_started_at: AtomicI64,
    opened_at: AtomicI64,
    probe_in_flight: AtomicBool,
}

/// Milliseconds on the tokio clock, anchored at first use. Runs on the
/// paused clock under `start_paused` tests.
fn clock_ms() -> i64 {
    static ANCHOR: OnceLock<tokio::time::Instant> = OnceLock::new();
    let anchor = *ANCHOR.get_or_init(tokio::time::Instant::now);
    tokio::time::Instant::now().duration_since(anchor).as_millis() as i64
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(STATE_CLOSED),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            window_started_at: AtomicI64::new(clock_ms()),
            opened_at: AtomicI64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Gate check before a source call. `Ok(())` admits the call; an open
    /// breaker rejects without touching the source. After the open
    /// timeout one caller wins the half-open probe slot.
    pub fn check(&self) -> Result<(), ()> {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => {
                self.roll_window_if_elapsed();
                Ok(())
            }
            STATE_OPEN => {
                let opened_at = self.opened_at.load(Ordering::Acquire);
                if clock_ms() - opened_at < self.config.open_timeout.as_millis() as i64 {
                    return Err(());
                }
                if self
                    .state
                    .compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.probe_in_flight.store(false, Ordering::Release);
                }
                self.try_take_probe()
            }
            _ => self.try_take_probe(),
        }
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.reset_window();
                    self.probe_in_flight.store(false, Ordering::Release);
                }
            }
            _ => {
                self.successes.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                // Failed probe: back to open, timer restarts.
                if self
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.opened_at.store(clock_ms(), Ordering::Release);
                    self.probe_in_flight.store(false, Ordering::Release);
                }
            }
            _ => {
                let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                let successes = self.successes.load(Ordering::Acquire);
                let total = failures + successes;
                let rate = failures as f64 / total as f64;
                if failures >= self.config.failure_floor
                    && rate > self.config.failure_rate
                    && self
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.opened_at.store(clock_ms(), Ordering::Release);
                    tracing::warn!(failures, successes, "circuit breaker opened");
                }
            }
        }
    }

    fn try_take_probe(&self) -> Result<(), ()> {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Ok(())
        } else {
            Err(())
        }
    }

    fn roll_window_if_elapsed(&self) {
        let started = self.window_started_at.load(Ordering::Acquire);
        let now = clock_ms();
        if now - started >= self.config.window.as_millis() as i64
            && self
                .window_started_at
                .compare_exchange(started, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.successes.store(0, Ordering::Release);
            self.failures.store(0, Ordering::Release);
        }
    }

    fn reset_window(&self) {
        self.successes.store(0, Ordering::Release);
        self.failures.store(0, Ordering::Release);
        self.window_started_at.store(clock_ms(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn zero_observations_is_closed() {
        let breaker = breaker();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_floor_and_rate() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed, "below the floor");
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.check().is_err(), "open breaker short-circuits");
    }

    #[tokio::test(start_paused = true)]
    async fn successes_hold_the_rate_below_threshold() {
        let breaker = breaker();
        for _ in 0..6 {
            breaker.record_success();
        }
        for _ in 0..5 {
            breaker.record_failure();
        }
        // 5 failures of 11 calls is under the 0.5 rate.
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_through_half_open_probe() {
        let breaker = breaker();
        for _ in 0..6 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(breaker.check().is_ok(), "first caller wins the probe slot");
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(breaker.check().is_err(), "second caller is rejected");

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = breaker();
        for _ in 0..6 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.check().is_err(), "timer restarted");
    }

    #[tokio::test(start_paused = true)]
    async fn window_roll_forgets_stale_counts() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(breaker.check().is_ok());
        // The stale failures no longer count toward the floor.
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
