//! Single round-trip offset probe.

use super::TimeSource;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::*;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("round trip to authority failed: {0}")]
    Transport(String),
    #[error("unusable Date header: {0}")]
    Parse(String),
}

/// Remote party whose clock is treated as ground truth.
///
/// One call is one minimal round trip. It returns the raw `Date` header of
/// the response, or `None` when the response carried none.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn round_trip(&self) -> Result<Option<String>, ProbeError>;
}

/// One observation of the authority's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSample {
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Second precision.
    pub server_time: DateTime<Utc>,
}

impl OffsetSample {
    /// Local instant matched to `server_time`: halfway through the round trip.
    pub fn midpoint(&self) -> DateTime<Utc> {
        self.sent_at + (self.received_at - self.sent_at) / 2
    }

    /// Authority minus local, in ms. Positive when the authority is ahead.
    pub fn offset_ms(&self) -> i64 {
        (self.server_time - self.midpoint()).num_milliseconds()
    }
}

/// Times one round trip against `authority`.
pub async fn probe<A, C>(authority: &A, clock: &C) -> Result<OffsetSample, ProbeError>
where
    A: Authority + ?Sized,
    C: TimeSource + ?Sized,
{
    let sent_at = clock.now();
    let header = authority.round_trip().await?;
    let received_at = clock.now();

    let raw = header.ok_or_else(|| ProbeError::Parse("missing Date header".into()))?;
    let server_time = parse_http_date(&raw)?;
    Ok(OffsetSample {
        sent_at,
        received_at,
        server_time,
    })
}

/// Parses an RFC 1123 date such as `Sun, 06 Nov 1994 08:49:37 GMT`.
///
/// Only `GMT`, `UTC` and `UT` zones are accepted; all of them are read as UTC.
pub fn parse_http_date(raw: &str) -> Result<DateTime<Utc>, ProbeError> {
    let raw = raw.trim();
    let (stamp, zone) = raw
        .rsplit_once(' ')
        .ok_or_else(|| ProbeError::Parse(format!("no zone in {raw:?}")))?;
    if !matches!(zone, "GMT" | "UTC" | "UT") {
        return Err(ProbeError::Parse(format!("unsupported zone {zone:?} in {raw:?}")));
    }
    NaiveDateTime::parse_from_str(stamp, "%a, %d %b %Y %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| ProbeError::Parse(format!("{raw:?}: {e}")))
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes an HTTPS host with `HEAD` requests.
///
/// The client must not follow redirects: a `3xx` answer carries its own
/// `Date` header and one probe has to be exactly one exchange.
pub struct HttpAuthority {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpAuthority {
    /// Probes through an existing client, e.g. the one that later fires the
    /// registration request.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        Ok(Self {
            timeout,
            ..Self::new(client, url)
        })
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn round_trip(&self) -> Result<Option<String>, ProbeError> {
        let response = self
            .client
            .head(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        trace!("HEAD {} -> {}", self.url, response.status());
        let date = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        Ok(date)
    }
}
