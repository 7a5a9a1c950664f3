//! Clock synchronization against a remote authority and the precision wait
//! built on top of it.
//!
//! All instants are `DateTime<Utc>`. "Local" instants come from a
//! [`TimeSource`]; "authority" instants are local instants shifted by the
//! current [`ClockOffset`].

mod config;
mod probe;
mod simulator;
mod sync;
mod wait;

pub use self::config::ClockConfig;
pub use probe::{parse_http_date, probe, Authority, HttpAuthority, OffsetSample, ProbeError};
pub use simulator::{ScriptedAuthority, SimClock, SkewedAuthority};
pub use sync::{ClockOffset, ClockSynchronizer, SampleRecord, SyncError};
pub use wait::{
    wait_until, Readiness, BUSY_POLL_WINDOW_MS, COARSE_SLEEP_MS, COARSE_WINDOW_MS, FINE_SLEEP_MS,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of local time.
#[async_trait]
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Sleeps until `deadline` on the local timeline. Returns at once if it
    /// has already passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(remaining) = (deadline - self.now()).to_std() {
            self.sleep(remaining).await;
        }
    }
}

/// Wall clock of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
