//! Offset estimation from repeated probes.

use super::probe::{probe, Authority, OffsetSample};
use super::TimeSource;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use log::*;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("all {attempted} probes failed")]
    AllProbesFailed { attempted: usize },
}

/// Authority clock minus local clock, in ms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClockOffset {
    pub value_ms: i64,
}

impl ClockOffset {
    pub fn from_ms(value_ms: i64) -> Self {
        Self { value_ms }
    }

    /// Truncating mean of `offsets`, or `None` for an empty set.
    pub fn average<I>(offsets: I) -> Option<Self>
    where
        I: IntoIterator<Item = i64>,
    {
        let (sum, count) = offsets
            .into_iter()
            .fold((0i64, 0i64), |(sum, count), offset| (sum + offset, count + 1));
        (count > 0).then(|| Self::from_ms(sum / count))
    }

    pub fn as_delta(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.value_ms)
    }
}

/// A sample kept for the timing report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SampleRecord {
    pub run: usize,
    pub sent_at_ms: i64,
    pub received_at_ms: i64,
    pub server_ms: i64,
    pub offset_ms: i64,
}

impl SampleRecord {
    fn new(run: usize, sample: &OffsetSample) -> Self {
        Self {
            run,
            sent_at_ms: sample.sent_at.timestamp_millis(),
            received_at_ms: sample.received_at.timestamp_millis(),
            server_ms: sample.server_time.timestamp_millis(),
            offset_ms: sample.offset_ms(),
        }
    }
}

/// Owns the process-wide [`ClockOffset`].
///
/// The offset changes only at the end of a synchronization run that produced
/// at least one sample. A run where every probe fails keeps the previous value.
#[derive(Debug, Default)]
pub struct ClockSynchronizer {
    offset: ClockOffset,
    runs: usize,
    samples: Vec<SampleRecord>,
}

impl ClockSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(offset: ClockOffset) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn offset(&self) -> ClockOffset {
        self.offset
    }

    /// Number of runs that updated the offset.
    pub fn completed_runs(&self) -> usize {
        self.runs
    }

    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }

    pub fn estimate_authority_now(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        local_now + self.offset.as_delta()
    }

    /// Maps an authority instant back onto the local timeline.
    pub fn to_local(&self, authority_instant: DateTime<Utc>) -> DateTime<Utc> {
        authority_instant - self.offset.as_delta()
    }

    /// Runs `sample_count` probes one after another, pausing
    /// `inter_sample_delay` between two probes, and stores the averaged
    /// offset of the successful ones.
    pub async fn synchronize<A, C>(
        &mut self,
        authority: &A,
        clock: &C,
        sample_count: usize,
        inter_sample_delay: Duration,
    ) -> Result<ClockOffset, SyncError>
    where
        A: Authority + ?Sized,
        C: TimeSource + ?Sized,
    {
        let run = self.runs + 1;
        let mut offsets = Vec::with_capacity(sample_count);
        let mut records = Vec::with_capacity(sample_count);

        for i in 0..sample_count {
            if i > 0 {
                clock.sleep(inter_sample_delay).await;
            }
            match probe(authority, clock).await {
                Ok(sample) => {
                    let offset = sample.offset_ms();
                    info!(
                        "Sample {}: server date [{}] offset {}ms",
                        i + 1,
                        sample.server_time.format("%a, %d %b %Y %H:%M:%S GMT"),
                        offset
                    );
                    offsets.push(offset);
                    records.push(SampleRecord::new(run, &sample));
                }
                Err(e) => warn!("Sample {}: dropped ({e})", i + 1),
            }
        }

        let offset = ClockOffset::average(offsets).ok_or(SyncError::AllProbesFailed {
            attempted: sample_count,
        })?;
        info!(
            "Average offset {}ms over {} samples (positive means local is behind)",
            offset.value_ms,
            records.len()
        );
        self.offset = offset;
        self.runs = run;
        self.samples.extend(records);
        Ok(offset)
    }
}
