//! Delivery of the registration request.

use crate::auth::Credential;
use async_trait::async_trait;
use log::*;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_TYPE, REFERER};
use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::time::Duration;
use thiserror::Error;

const REGISTRATION_PATH: &str = "api/ders-kayit/v21";
const REGISTRATION_REFERER: &str = "ogrenci/DersKayitIslemleri/DersKayit";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
const WARM_UP_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to server: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid url {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// What came back from the fired request. Non-2xx statuses are still
/// responses: they carry the per-course result codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FireResponse {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection the request will travel over. Called shortly
    /// before the final wait, failures are not fatal.
    async fn warm_up(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, payload: &[u8], credential: &Credential)
        -> Result<FireResponse, TransportError>;
}

/// Client for the clock probes and the registration request. Sharing it
/// keeps the pooled connection to the service open for the fire.
pub fn shared_client() -> Result<Client, TransportError> {
    let client = Client::builder()
        .redirect(Policy::none())
        .pool_idle_timeout(None::<Duration>)
        .tcp_keepalive(KEEPALIVE)
        .build()?;
    Ok(client)
}

/// Posts the registration payload with the headers a browser fetch would send.
pub struct ObsTransport {
    client: Client,
    base: Url,
    endpoint: Url,
    referer: Url,
}

impl ObsTransport {
    pub fn new(client: Client, base_url: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base_url).map_err(|_| TransportError::InvalidUrl(base_url.into()))?;
        let join = |path: &str| {
            base.join(path)
                .map_err(|_| TransportError::InvalidUrl(format!("{base}{path}")))
        };
        Ok(Self {
            client,
            endpoint: join(REGISTRATION_PATH)?,
            referer: join(REGISTRATION_REFERER)?,
            base,
        })
    }
}

#[async_trait]
impl Transport for ObsTransport {
    async fn warm_up(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .head(self.base.clone())
            .timeout(WARM_UP_TIMEOUT)
            .send()
            .await?;
        debug!("Warm-up HEAD {} -> {}", self.base, response.status());
        Ok(())
    }

    async fn send(
        &self,
        payload: &[u8],
        credential: &Credential,
    ) -> Result<FireResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(SEND_TIMEOUT)
            .header(AUTHORIZATION, credential.header_value())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(ACCEPT_LANGUAGE, "tr-TR,tr;q=0.9,en-US;q=0.8,en;q=0.7")
            .header(REFERER, self.referer.as_str())
            .header(
                "sec-ch-ua",
                "\"Not(A:Brand\";v=\"8\", \"Chromium\";v=\"144\", \"Google Chrome\";v=\"144\"",
            )
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Windows\"")
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .body(payload.to_vec())
            .send()
            .await?;
        let status = response.status().as_u16();
        info!("[Result] Server response code: {status}");
        let body = response.bytes().await?.to_vec();
        Ok(FireResponse { status, body })
    }
}
