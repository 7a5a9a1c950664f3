//! End-to-end firing timeline.
//!
//! ```text
//!  start        target-90s        target-60s              target
//!    |  initial    |   re-sync       |  credential   final   |  fire
//!    |   sync      |                 |   prefetch    wait    |
//! ```
//!
//! Phases only move forward. A phase whose anchor has already passed when
//! the scheduler reaches it is skipped with a warning.

mod deadline;

pub use deadline::TargetDeadline;

use crate::auth::{AuthError, CredentialProvider};
use crate::clock::{
    wait_until, Authority, ClockConfig, ClockOffset, ClockSynchronizer, Readiness, SampleRecord,
    SyncError, TimeSource,
};
use crate::transport::{FireResponse, Transport, TransportError};
use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SchedulePhase {
    InitialSync,
    ResyncWindow,
    PrefetchWindow,
    FinalWait,
    Fire,
}

impl fmt::Display for SchedulePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulePhase::InitialSync => "initial sync",
            SchedulePhase::ResyncWindow => "re-sync",
            SchedulePhase::PrefetchWindow => "credential prefetch",
            SchedulePhase::FinalWait => "final wait",
            SchedulePhase::Fire => "fire",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("{phase}: clock synchronization failed: {source}")]
    Sync {
        phase: SchedulePhase,
        #[source]
        source: SyncError,
    },
    #[error("{phase}: credential acquisition failed: {source}")]
    Auth {
        phase: SchedulePhase,
        #[source]
        source: AuthError,
    },
    #[error("{phase}: registration request failed: {source}")]
    Transport {
        phase: SchedulePhase,
        #[source]
        source: TransportError,
    },
    #[error("{phase}: scheduler already ran")]
    AlreadyRan { phase: SchedulePhase },
}

impl ScheduleError {
    pub fn phase(&self) -> SchedulePhase {
        match self {
            ScheduleError::Sync { phase, .. }
            | ScheduleError::Auth { phase, .. }
            | ScheduleError::Transport { phase, .. }
            | ScheduleError::AlreadyRan { phase } => *phase,
        }
    }
}

/// Bypass switches. `test` fires as soon as a credential is in hand,
/// `local` trusts the local clock and never probes the authority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionMode {
    pub debug: bool,
    pub test: bool,
    pub local: bool,
}

/// Resolved timeline parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Deadline on the authority timeline.
    pub target: DateTime<Utc>,
    pub resync_lead: Duration,
    pub prefetch_lead: Duration,
    /// Lead of the connection warm-up inside the final wait.
    pub warm_up_lead: Duration,
    pub samples: usize,
    pub sample_delay: Duration,
    pub fire_margin_ms: i64,
}

impl SchedulePlan {
    pub fn new(target: DateTime<Utc>, clock: &ClockConfig) -> Self {
        Self {
            target,
            resync_lead: clock.resync_lead(),
            prefetch_lead: clock.prefetch_lead(),
            warm_up_lead: clock.warm_up_lead(),
            samples: clock.samples,
            sample_delay: clock.sample_delay(),
            fire_margin_ms: clock.fire_margin_ms,
        }
    }

    /// Authority instant at which `phase` becomes eligible. The initial sync
    /// has no anchor and runs at start.
    pub fn anchor(&self, phase: SchedulePhase) -> Option<DateTime<Utc>> {
        let lead = match phase {
            SchedulePhase::InitialSync => return None,
            SchedulePhase::ResyncWindow => self.resync_lead,
            SchedulePhase::PrefetchWindow => self.prefetch_lead,
            SchedulePhase::FinalWait | SchedulePhase::Fire => Duration::ZERO,
        };
        chrono::Duration::from_std(lead)
            .ok()
            .map(|lead| self.target - lead)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct FireReport {
    pub response: FireResponse,
    pub offset: ClockOffset,
    /// Local clock reading when the request left.
    pub fired_at: DateTime<Utc>,
    /// `fired_at` on the authority timeline.
    pub authority_fired_at: DateTime<Utc>,
    /// Present when the final wait ran.
    pub readiness: Option<Readiness>,
    pub skipped: Vec<SchedulePhase>,
    pub samples: Vec<SampleRecord>,
}

pub struct Scheduler<C, A, P, T> {
    clock: C,
    authority: A,
    credentials: P,
    transport: T,
    synchronizer: ClockSynchronizer,
    plan: SchedulePlan,
    mode: ExecutionMode,
    phase: Option<SchedulePhase>,
    skipped: Vec<SchedulePhase>,
}

impl<C, A, P, T> Scheduler<C, A, P, T>
where
    C: TimeSource,
    A: Authority,
    P: CredentialProvider,
    T: Transport,
{
    pub fn new(
        clock: C,
        authority: A,
        credentials: P,
        transport: T,
        plan: SchedulePlan,
        mode: ExecutionMode,
    ) -> Self {
        Self {
            clock,
            authority,
            credentials,
            transport,
            synchronizer: ClockSynchronizer::new(),
            plan,
            mode,
            phase: None,
            skipped: Vec::new(),
        }
    }

    pub fn phase(&self) -> Option<SchedulePhase> {
        self.phase
    }

    pub fn synchronizer(&self) -> &ClockSynchronizer {
        &self.synchronizer
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn credentials(&self) -> &P {
        &self.credentials
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Drives every phase in order and fires `payload`. Phases are never
    /// revisited: once a run has started, later calls fail with
    /// [`ScheduleError::AlreadyRan`].
    pub async fn run(
        &mut self,
        identity: &str,
        secret: &str,
        payload: &[u8],
    ) -> Result<FireReport, ScheduleError> {
        if let Some(phase) = self.phase {
            return Err(ScheduleError::AlreadyRan { phase });
        }
        self.initial_sync().await?;
        if self.mode.test {
            warn!("Test mode enabled, sending request immediately");
        }
        self.resync().await;

        self.enter(SchedulePhase::PrefetchWindow);
        if !self.mode.test {
            if let Some(anchor) = self.plan.anchor(SchedulePhase::PrefetchWindow) {
                if self.authority_now() < anchor {
                    info!(
                        "Waiting until {}s before target for credential acquisition",
                        self.plan.prefetch_lead.as_secs()
                    );
                    self.sleep_until_authority(anchor).await;
                } else {
                    warn!("Credential anchor already passed, acquiring now");
                }
            }
        }
        let credential = self
            .credentials
            .acquire_credential(identity, secret, self.mode.debug)
            .await
            .map_err(|source| ScheduleError::Auth {
                phase: SchedulePhase::PrefetchWindow,
                source,
            })?;
        info!("Credential acquired");

        let readiness = if self.mode.test {
            self.skip(SchedulePhase::FinalWait);
            None
        } else {
            self.enter(SchedulePhase::FinalWait);
            self.warm_up().await;
            info!("Waiting for target time {}", self.plan.target);
            Some(
                wait_until(
                    &self.clock,
                    self.plan.target,
                    self.synchronizer.offset(),
                    self.plan.fire_margin_ms,
                )
                .await,
            )
        };

        self.enter(SchedulePhase::Fire);
        let fired_at = match readiness {
            Some(r) => r.local_now,
            None => self.clock.now(),
        };
        info!(">>> FIRING REGISTRATION REQUEST <<<");
        let response = self
            .transport
            .send(payload, &credential)
            .await
            .map_err(|source| ScheduleError::Transport {
                phase: SchedulePhase::Fire,
                source,
            })?;

        Ok(FireReport {
            response,
            offset: self.synchronizer.offset(),
            fired_at,
            authority_fired_at: self.synchronizer.estimate_authority_now(fired_at),
            readiness,
            skipped: self.skipped.clone(),
            samples: self.synchronizer.samples().to_vec(),
        })
    }

    async fn initial_sync(&mut self) -> Result<(), ScheduleError> {
        if self.mode.local {
            info!("[Clock] Skipping server synchronization (local mode)");
            self.skip(SchedulePhase::InitialSync);
            return Ok(());
        }
        self.enter(SchedulePhase::InitialSync);
        info!("[Clock] Syncing with authority...");
        match self.synchronize().await {
            Ok(_) => Ok(()),
            Err(source) if self.mode.test => {
                warn!("[Clock] {source}; test mode continues with offset 0ms");
                Ok(())
            }
            Err(source) => Err(ScheduleError::Sync {
                phase: SchedulePhase::InitialSync,
                source,
            }),
        }
    }

    async fn resync(&mut self) {
        if self.mode.test || self.mode.local {
            self.skip(SchedulePhase::ResyncWindow);
            return;
        }
        let Some(anchor) = self.plan.anchor(SchedulePhase::ResyncWindow) else {
            self.skip(SchedulePhase::ResyncWindow);
            return;
        };
        if self.authority_now() >= anchor {
            warn!(
                "Less than {}s remain, skipping re-sync",
                self.plan.resync_lead.as_secs()
            );
            self.skip(SchedulePhase::ResyncWindow);
            return;
        }

        self.enter(SchedulePhase::ResyncWindow);
        info!(
            "Waiting until {}s before target for re-sync",
            self.plan.resync_lead.as_secs()
        );
        self.sleep_until_authority(anchor).await;
        info!("[Clock] Re-syncing with authority...");
        if let Err(e) = self.synchronize().await {
            warn!(
                "[Clock] Re-sync failed ({e}), keeping offset {}ms",
                self.synchronizer.offset().value_ms
            );
        }
    }

    /// Opens the firing connection `warm_up_lead` before the target.
    async fn warm_up(&self) {
        let Ok(lead) = chrono::Duration::from_std(self.plan.warm_up_lead) else {
            return;
        };
        let anchor = self.plan.target - lead;
        if self.authority_now() < anchor {
            self.sleep_until_authority(anchor).await;
        }
        match self.transport.warm_up().await {
            Ok(()) => debug!("Firing connection warmed up"),
            Err(e) => warn!("Connection warm-up failed ({e}), firing on a fresh connection"),
        }
    }

    async fn synchronize(&mut self) -> Result<ClockOffset, SyncError> {
        self.synchronizer
            .synchronize(
                &self.authority,
                &self.clock,
                self.plan.samples,
                self.plan.sample_delay,
            )
            .await
    }

    fn authority_now(&self) -> DateTime<Utc> {
        self.synchronizer.estimate_authority_now(self.clock.now())
    }

    async fn sleep_until_authority(&self, instant: DateTime<Utc>) {
        self.clock
            .sleep_until(self.synchronizer.to_local(instant))
            .await;
    }

    fn enter(&mut self, phase: SchedulePhase) {
        debug_assert!(self.phase.map_or(true, |current| phase > current));
        debug!("Entering phase: {phase}");
        self.phase = Some(phase);
    }

    fn skip(&mut self, phase: SchedulePhase) {
        debug_assert!(self.phase.map_or(true, |current| phase > current));
        debug!("Skipping phase: {phase}");
        self.phase = Some(phase);
        self.skipped.push(phase);
    }
}
