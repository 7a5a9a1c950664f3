//! Hybrid sleep/spin wait on the authority timeline.

use super::sync::ClockOffset;
use super::TimeSource;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use log::*;
use std::time::Duration;

/// Above this remaining time the wait sleeps in [`COARSE_SLEEP_MS`] steps.
pub const COARSE_WINDOW_MS: i64 = 2000;
pub const COARSE_SLEEP_MS: u64 = 1000;
/// Above this remaining time (and up to [`COARSE_WINDOW_MS`]) the wait sleeps
/// in [`FINE_SLEEP_MS`] steps. At or below it the wait spins.
pub const BUSY_POLL_WINDOW_MS: i64 = 50;
pub const FINE_SLEEP_MS: u64 = 10;

/// State at the moment [`wait_until`] decided to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Local clock reading that satisfied the margin.
    pub local_now: DateTime<Utc>,
    /// `target - (local_now + offset)` in ms at that reading.
    pub remaining_ms: i64,
    /// Clock reads spent spinning.
    pub spins: u64,
}

/// Blocks until the authority clock is within `fire_margin_ms` of `target`.
///
/// Far from the target the wait sleeps, inside the last
/// [`BUSY_POLL_WINDOW_MS`] it re-reads the clock in a tight loop. Sleep
/// wake-up latency is tens of ms on most hosts, so the tail must not sleep.
/// The loop never yields to other tasks once spinning and cannot be
/// cancelled.
pub async fn wait_until<C>(
    clock: &C,
    target: DateTime<Utc>,
    offset: ClockOffset,
    fire_margin_ms: i64,
) -> Readiness
where
    C: TimeSource + ?Sized,
{
    debug!(
        "Waiting for {} (offset {}ms, margin {}ms)",
        target, offset.value_ms, fire_margin_ms
    );
    let margin = TimeDelta::milliseconds(fire_margin_ms);
    let coarse_window = TimeDelta::milliseconds(COARSE_WINDOW_MS);
    let busy_window = TimeDelta::milliseconds(BUSY_POLL_WINDOW_MS);
    let mut spins = 0u64;
    loop {
        let local_now = clock.now();
        let remaining = target - (local_now + offset.as_delta());

        if remaining <= margin {
            return Readiness {
                local_now,
                remaining_ms: remaining.num_milliseconds(),
                spins,
            };
        }

        if remaining > coarse_window {
            clock.sleep(Duration::from_millis(COARSE_SLEEP_MS)).await;
        } else if remaining > busy_window {
            clock.sleep(Duration::from_millis(FINE_SLEEP_MS)).await;
        } else {
            spins += 1;
        }
    }
}
