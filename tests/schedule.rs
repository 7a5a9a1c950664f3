use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, TimeZone, Utc};
use regsnipe::auth::{AuthError, Credential, CredentialProvider};
use regsnipe::clock::{ClockConfig, ClockOffset, ScriptedAuthority, SimClock, SkewedAuthority};
use regsnipe::schedule::{
    ExecutionMode, SchedulePhase, SchedulePlan, ScheduleError, Scheduler,
};
use regsnipe::transport::{FireResponse, Transport, TransportError};
use std::sync::Mutex;

const PAYLOAD: &[u8] = br#"{"ECRN":["21345"],"SCRN":[]}"#;

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 7, h, m, s).unwrap()
}

fn plan() -> SchedulePlan {
    SchedulePlan::new(at(14, 0, 0), &ClockConfig::default())
}

struct FakeLogin {
    clock: SimClock,
    reject: bool,
    calls: Mutex<Vec<DateTime<Utc>>>,
}

impl FakeLogin {
    fn new(clock: &SimClock) -> Self {
        Self {
            clock: clock.clone(),
            reject: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(clock: &SimClock) -> Self {
        Self {
            reject: true,
            ..Self::new(clock)
        }
    }

    fn calls(&self) -> Vec<DateTime<Utc>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialProvider for FakeLogin {
    async fn acquire_credential(
        &self,
        identity: &str,
        secret: &str,
        _verbose: bool,
    ) -> Result<Credential, AuthError> {
        assert_eq!((identity, secret), ("student", "hunter2"));
        self.calls.lock().unwrap().push(self.clock.peek());
        self.clock.advance(TimeDelta::milliseconds(800));
        if self.reject {
            return Err(AuthError::Rejected("jwt endpoint returned html".into()));
        }
        Ok(Credential::bearer("test-token-0123456789"))
    }
}

struct FakeTransport {
    clock: SimClock,
    refuse: bool,
    warmed: Mutex<Vec<DateTime<Utc>>>,
    sent: Mutex<Vec<(DateTime<Utc>, Vec<u8>, String)>>,
}

impl FakeTransport {
    fn new(clock: &SimClock) -> Self {
        Self {
            clock: clock.clone(),
            refuse: false,
            warmed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn refusing(clock: &SimClock) -> Self {
        Self {
            refuse: true,
            ..Self::new(clock)
        }
    }

    fn warmed(&self) -> Vec<DateTime<Utc>> {
        self.warmed.lock().unwrap().clone()
    }

    fn sent(&self) -> Vec<(DateTime<Utc>, Vec<u8>, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn warm_up(&self) -> Result<(), TransportError> {
        self.warmed.lock().unwrap().push(self.clock.peek());
        if self.refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }
        Ok(())
    }

    async fn send(
        &self,
        payload: &[u8],
        credential: &Credential,
    ) -> Result<FireResponse, TransportError> {
        self.sent.lock().unwrap().push((
            self.clock.peek(),
            payload.to_vec(),
            credential.header_value().to_string(),
        ));
        if self.refuse {
            return Err(TransportError::Connect("connection refused".into()));
        }
        Ok(FireResponse {
            status: 200,
            body: br#"{"ecrnResultList":[{"crn":"21345","resultCode":"successResult"}]}"#.to_vec(),
        })
    }
}

fn scheduler<A>(
    clock: &SimClock,
    authority: A,
    login: FakeLogin,
    mode: ExecutionMode,
) -> Scheduler<SimClock, A, FakeLogin, FakeTransport>
where
    A: regsnipe::clock::Authority,
{
    with_transport(clock, authority, login, FakeTransport::new(clock), mode)
}

fn with_transport<A>(
    clock: &SimClock,
    authority: A,
    login: FakeLogin,
    transport: FakeTransport,
    mode: ExecutionMode,
) -> Scheduler<SimClock, A, FakeLogin, FakeTransport>
where
    A: regsnipe::clock::Authority,
{
    Scheduler::new(clock.clone(), authority, login, transport, plan(), mode)
}

#[tokio::test]
async fn full_timeline_resyncs_prefetches_and_fires_on_time() {
    let clock = SimClock::new(at(13, 55, 0));
    let authority = SkewedAuthority::new(clock.clone(), 1000, 40);
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    assert!(report.skipped.is_empty());
    assert_eq!(s.authority().calls(), 10);
    assert_eq!(s.synchronizer().completed_runs(), 2);
    assert_eq!(s.phase(), Some(SchedulePhase::Fire));

    // offset estimate can only err below the true skew
    let offset = report.offset.as_delta();
    assert!(report.offset.value_ms > 0 && report.offset.value_ms <= 1000);

    let logins = s.credentials().calls();
    assert_eq!(logins.len(), 1);
    assert!(logins[0] + offset >= at(13, 59, 0));
    assert!(logins[0] + offset < at(13, 59, 2));

    // the firing connection is opened 5s ahead
    let warmed = s.transport().warmed();
    assert_eq!(warmed.len(), 1);
    assert!(warmed[0] + offset >= at(13, 59, 55));
    assert!(warmed[0] + offset < at(13, 59, 56));

    let readiness = report.readiness.expect("final wait ran");
    assert_eq!(readiness.remaining_ms, 0);
    assert_eq!(report.authority_fired_at, at(14, 0, 0));

    let sent = s.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, PAYLOAD);
    assert_eq!(sent[0].2, "Bearer test-token-0123456789");
    assert!(sent[0].0 + offset >= at(14, 0, 0));
    assert_eq!(report.response.status, 200);
    assert_eq!(report.samples.len(), 10);
}

#[tokio::test]
async fn late_start_skips_resync_and_prefetches() {
    // 75s before the deadline: past the 90s re-sync anchor
    let clock = SimClock::new(at(13, 58, 45));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    assert_eq!(report.skipped, vec![SchedulePhase::ResyncWindow]);
    assert_eq!(s.authority().calls(), 5);
    assert_eq!(s.synchronizer().completed_runs(), 1);
    let logins = s.credentials().calls();
    assert!(logins[0] + report.offset.as_delta() >= at(13, 59, 0));
    assert_eq!(s.transport().sent().len(), 1);
}

#[tokio::test]
async fn start_past_prefetch_anchor_acquires_immediately() {
    let clock = SimClock::new(at(13, 59, 30));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    let logins = s.credentials().calls();
    // initial sync takes about two seconds, then no wait
    assert!(logins[0] < at(13, 59, 33));
    assert!(report.authority_fired_at >= at(14, 0, 0));
}

#[tokio::test]
async fn rejected_credential_aborts_before_firing() {
    let clock = SimClock::new(at(13, 59, 30));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let mut s = scheduler(
        &clock,
        authority,
        FakeLogin::rejecting(&clock),
        ExecutionMode::default(),
    );

    let err = s.run("student", "hunter2", PAYLOAD).await.unwrap_err();

    assert!(matches!(err, ScheduleError::Auth { .. }));
    assert_eq!(err.phase(), SchedulePhase::PrefetchWindow);
    assert!(err.to_string().starts_with("credential prefetch:"));
    assert_eq!(s.credentials().calls().len(), 1);
    assert!(s.transport().sent().is_empty());
}

#[tokio::test]
async fn failed_fire_surfaces_without_retry() {
    let clock = SimClock::new(at(13, 59, 30));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let transport = FakeTransport::refusing(&clock);
    let mut s = with_transport(
        &clock,
        authority,
        FakeLogin::new(&clock),
        transport,
        ExecutionMode::default(),
    );

    let err = s.run("student", "hunter2", PAYLOAD).await.unwrap_err();

    assert!(matches!(
        err,
        ScheduleError::Transport {
            source: TransportError::Connect(_),
            ..
        }
    ));
    assert_eq!(err.phase(), SchedulePhase::Fire);
    assert!(err.to_string().starts_with("fire: registration request failed:"));
    // a failed warm-up does not stop the fire, the fire itself is tried once
    assert_eq!(s.transport().warmed().len(), 1);
    assert_eq!(s.transport().sent().len(), 1);
}

#[tokio::test]
async fn second_run_is_refused() {
    let clock = SimClock::new(at(13, 59, 30));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    s.run("student", "hunter2", PAYLOAD).await.expect("first run succeeds");
    let err = s.run("student", "hunter2", PAYLOAD).await.unwrap_err();

    assert!(matches!(
        err,
        ScheduleError::AlreadyRan {
            phase: SchedulePhase::Fire
        }
    ));
    assert_eq!(s.authority().calls(), 5);
    assert_eq!(s.credentials().calls().len(), 1);
    assert_eq!(s.transport().sent().len(), 1);
}

#[tokio::test]
async fn failed_initial_sync_is_fatal() {
    let clock = SimClock::new(at(13, 50, 0));
    let authority = ScriptedAuthority::new(clock.clone());
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    let err = s.run("student", "hunter2", PAYLOAD).await.unwrap_err();

    assert_eq!(err.phase(), SchedulePhase::InitialSync);
    assert!(s.credentials().calls().is_empty());
    assert!(s.transport().sent().is_empty());
}

#[tokio::test]
async fn failed_resync_keeps_initial_offset() {
    let clock = SimClock::new(at(13, 50, 0));
    let authority = (0..5).fold(ScriptedAuthority::new(clock.clone()), |a, _| {
        a.reply(19, "Sat, 07 Feb 2026 13:50:01 GMT")
    });
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), ExecutionMode::default());

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    // five initial replies, then five exhausted re-sync probes
    assert_eq!(s.authority().calls(), 10);
    assert_eq!(s.synchronizer().completed_runs(), 1);
    assert!(report.samples.iter().all(|sample| sample.run == 1));
    assert_eq!(
        Some(report.offset),
        ClockOffset::average(report.samples.iter().map(|sample| sample.offset_ms))
    );
    assert!(report.skipped.is_empty());
    assert_eq!(s.transport().sent().len(), 1);
}

#[tokio::test]
async fn test_mode_fires_without_waiting() {
    let clock = SimClock::new(at(13, 0, 0));
    let authority = SkewedAuthority::new(clock.clone(), 0, 40);
    let mode = ExecutionMode {
        test: true,
        ..ExecutionMode::default()
    };
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), mode);

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    assert_eq!(
        report.skipped,
        vec![SchedulePhase::ResyncWindow, SchedulePhase::FinalWait]
    );
    assert!(report.readiness.is_none());
    assert!(s.transport().warmed().is_empty());
    assert_eq!(s.authority().calls(), 5);
    let sent = s.transport().sent();
    assert!(sent[0].0 < at(13, 0, 5));
}

#[tokio::test]
async fn test_mode_tolerates_unreachable_authority() {
    let clock = SimClock::new(at(13, 0, 0));
    let authority = ScriptedAuthority::new(clock.clone());
    let mode = ExecutionMode {
        test: true,
        ..ExecutionMode::default()
    };
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), mode);

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");
    assert_eq!(report.offset, ClockOffset::default());
}

#[tokio::test]
async fn local_mode_never_probes() {
    let clock = SimClock::new(at(13, 57, 0));
    let authority = SkewedAuthority::new(clock.clone(), 5000, 40);
    let mode = ExecutionMode {
        local: true,
        ..ExecutionMode::default()
    };
    let mut s = scheduler(&clock, authority, FakeLogin::new(&clock), mode);

    let report = s.run("student", "hunter2", PAYLOAD).await.expect("run succeeds");

    assert_eq!(s.authority().calls(), 0);
    assert_eq!(report.offset, ClockOffset::default());
    assert_eq!(
        report.skipped,
        vec![SchedulePhase::InitialSync, SchedulePhase::ResyncWindow]
    );
    assert_eq!(report.fired_at, at(14, 0, 0));
    assert!(report.samples.is_empty());
}

#[test]
fn plan_anchors() {
    let plan = plan();
    assert_eq!(plan.anchor(SchedulePhase::InitialSync), None);
    assert_eq!(plan.anchor(SchedulePhase::ResyncWindow), Some(at(13, 58, 30)));
    assert_eq!(plan.anchor(SchedulePhase::PrefetchWindow), Some(at(13, 59, 0)));
    assert_eq!(plan.anchor(SchedulePhase::FinalWait), Some(at(14, 0, 0)));
    assert_eq!(plan.anchor(SchedulePhase::Fire), Some(at(14, 0, 0)));
}

#[test]
fn phases_are_ordered() {
    assert!(SchedulePhase::InitialSync < SchedulePhase::ResyncWindow);
    assert!(SchedulePhase::ResyncWindow < SchedulePhase::PrefetchWindow);
    assert!(SchedulePhase::PrefetchWindow < SchedulePhase::FinalWait);
    assert!(SchedulePhase::FinalWait < SchedulePhase::Fire);
}
