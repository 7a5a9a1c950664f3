//! Simulated clock and authorities for deterministic timing tests.
//!
//! ## Model
//!
//! | Parameter    | Unit | Description                                         |
//! |--------------|------|-----------------------------------------------------|
//! | read cost    | ms   | Time that passes on every `now()` (one spin step)   |
//! | wake latency | ms   | Extra time added to every `sleep()` (OS oversleep)  |
//! | latency      | ms   | Round-trip time of a simulated authority request    |
//!
//! Nothing here sleeps for real: `sleep()` only moves the simulated time.

use super::probe::{Authority, ProbeError};
use super::TimeSource;
use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, DurationRound, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug)]
struct SimState {
    now: DateTime<Utc>,
    read_cost: TimeDelta,
    wake_latency: TimeDelta,
    reads: u64,
    slept: TimeDelta,
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct SimClock {
    state: Arc<Mutex<SimState>>,
}

impl SimClock {
    /// Creates a clock frozen at `start` with 1ms read cost and no wake latency.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                now: start,
                read_cost: TimeDelta::milliseconds(1),
                wake_latency: TimeDelta::zero(),
                reads: 0,
                slept: TimeDelta::zero(),
            })),
        }
    }

    pub fn with_read_cost(self, ms: i64) -> Self {
        self.state().read_cost = TimeDelta::milliseconds(ms);
        self
    }

    pub fn with_wake_latency(self, ms: i64) -> Self {
        self.state().wake_latency = TimeDelta::milliseconds(ms);
        self
    }

    /// Current simulated time without charging a read.
    pub fn peek(&self) -> DateTime<Utc> {
        self.state().now
    }

    pub fn advance(&self, by: TimeDelta) {
        self.state().now += by;
    }

    pub fn reads(&self) -> u64 {
        self.state().reads
    }

    /// Total time spent in `sleep()`, wake latency included.
    pub fn slept(&self) -> TimeDelta {
        self.state().slept
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TimeSource for SimClock {
    fn now(&self) -> DateTime<Utc> {
        let mut state = self.state();
        let now = state.now;
        state.now = now + state.read_cost;
        state.reads += 1;
        now
    }

    async fn sleep(&self, duration: Duration) {
        let mut state = self.state();
        let step = TimeDelta::milliseconds(duration.as_millis() as i64) + state.wake_latency;
        state.now += step;
        state.slept += step;
    }
}

#[derive(Debug, Clone)]
enum Step {
    Reply { latency: TimeDelta, date: Option<String> },
    Fail { latency: TimeDelta },
}

/// Authority that replays a fixed list of responses, advancing a [`SimClock`]
/// by each response's latency.
#[derive(Debug)]
pub struct ScriptedAuthority {
    clock: SimClock,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedAuthority {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers after `latency_ms` with the given `Date` header.
    pub fn reply(self, latency_ms: i64, date: &str) -> Self {
        self.push(Step::Reply {
            latency: TimeDelta::milliseconds(latency_ms),
            date: Some(date.to_string()),
        })
    }

    /// Answers after `latency_ms` without a `Date` header.
    pub fn reply_without_date(self, latency_ms: i64) -> Self {
        self.push(Step::Reply {
            latency: TimeDelta::milliseconds(latency_ms),
            date: None,
        })
    }

    /// Fails the round trip after `latency_ms`.
    pub fn fail(self, latency_ms: i64) -> Self {
        self.push(Step::Fail {
            latency: TimeDelta::milliseconds(latency_ms),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.steps().len()
    }

    fn push(self, step: Step) -> Self {
        self.steps().push_back(step);
        self
    }

    fn steps(&self) -> MutexGuard<'_, VecDeque<Step>> {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Authority for ScriptedAuthority {
    async fn round_trip(&self) -> Result<Option<String>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps().pop_front();
        match step {
            Some(Step::Reply { latency, date }) => {
                self.clock.advance(latency);
                Ok(date)
            }
            Some(Step::Fail { latency }) => {
                self.clock.advance(latency);
                Err(ProbeError::Transport("simulated connection reset".into()))
            }
            None => Err(ProbeError::Transport("script exhausted".into())),
        }
    }
}

/// Authority whose clock runs `skew_ms` ahead of a [`SimClock`] and reports
/// it at whole-second precision from the middle of each round trip.
#[derive(Debug)]
pub struct SkewedAuthority {
    clock: SimClock,
    skew: TimeDelta,
    latency: TimeDelta,
    calls: AtomicUsize,
}

impl SkewedAuthority {
    pub fn new(clock: SimClock, skew_ms: i64, latency_ms: i64) -> Self {
        Self {
            clock,
            skew: TimeDelta::milliseconds(skew_ms),
            latency: TimeDelta::milliseconds(latency_ms),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authority for SkewedAuthority {
    async fn round_trip(&self) -> Result<Option<String>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let half = self.latency / 2;
        self.clock.advance(half);
        let server_now = (self.clock.peek() + self.skew)
            .duration_trunc(TimeDelta::seconds(1))
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        self.clock.advance(self.latency - half);
        Ok(Some(server_now.format(HTTP_DATE_FORMAT).to_string()))
    }
}
