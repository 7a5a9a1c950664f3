//! Credential acquisition against the OBS single sign-on flow.

use async_trait::async_trait;
use log::*;
use regex::Regex;
use reqwest::header::{ACCEPT, REFERER};
use reqwest::{Client, Url};
use std::sync::OnceLock;
use thiserror::Error;

const JWT_MIN_LEN: usize = 20;
const LOGIN_BUTTON: &str = "Giriş / Login";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http error during {step}: {message}")]
    Http { step: &'static str, message: String },
    #[error("login rejected: {0}")]
    Rejected(String),
    #[error("invalid url {0}")]
    InvalidUrl(String),
}

/// Opaque authorization header value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(header_value: impl Into<String>) -> Self {
        Self(header_value.into())
    }

    pub fn bearer(token: &str) -> Self {
        Self(format!("Bearer {token}"))
    }

    pub fn header_value(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire_credential(
        &self,
        identity: &str,
        secret: &str,
        verbose: bool,
    ) -> Result<Credential, AuthError>;
}

/// Logs in through the OBS login form and exchanges the session for a JWT.
pub struct ObsLogin {
    client: Client,
    base_url: Url,
}

impl ObsLogin {
    /// `base_url` is the service root, e.g. `https://obs.itu.edu.tr/`.
    pub fn new(base_url: &str) -> Result<Self, AuthError> {
        let base_url = Url::parse(base_url).map_err(|_| AuthError::InvalidUrl(base_url.into()))?;
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| http_error("client setup", e))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        self.base_url
            .join(path)
            .map_err(|_| AuthError::InvalidUrl(format!("{}{}", self.base_url, path)))
    }
}

#[async_trait]
impl CredentialProvider for ObsLogin {
    async fn acquire_credential(
        &self,
        identity: &str,
        secret: &str,
        verbose: bool,
    ) -> Result<Credential, AuthError> {
        info!("[Auth] Step 1: opening login page via {}", self.base_url);
        let landing = self
            .client
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(|e| http_error("login page", e))?;
        let landed_url = landing.url().clone();
        if verbose {
            info!("[Auth] Landed on {landed_url}");
        }
        let html = landing.text().await.map_err(|e| http_error("login page", e))?;
        let form = LoginForm::scrape(&html);
        let action_url = landed_url
            .join(&form.action)
            .map_err(|_| AuthError::InvalidUrl(form.action.clone()))?;

        info!(
            "[Auth] Step 2: submitting credentials to {}",
            action_url.host_str().unwrap_or_default()
        );
        let fields = [
            ("__VIEWSTATE", form.view_state.as_str()),
            ("__VIEWSTATEGENERATOR", form.view_state_generator.as_str()),
            ("__EVENTVALIDATION", form.event_validation.as_str()),
            ("ctl00$ContentPlaceHolder1$tbUserName", identity),
            ("ctl00$ContentPlaceHolder1$tbPassword", secret),
            ("ctl00$ContentPlaceHolder1$btnLogin", LOGIN_BUTTON),
        ];
        self.client
            .post(action_url)
            .header(REFERER, landed_url.as_str())
            .form(&fields)
            .send()
            .await
            .map_err(|e| http_error("credential submit", e))?;

        info!("[Auth] Step 3: finalizing session and fetching JWT");
        self.client
            .get(self.endpoint("ogrenci/")?)
            .send()
            .await
            .map_err(|e| http_error("student dashboard", e))?;
        let jwt = self
            .client
            .get(self.endpoint("ogrenci/auth/jwt")?)
            .header("X-Requested-With", "XMLHttpRequest")
            .header(ACCEPT, "application/json, text/plain, */*")
            .send()
            .await
            .map_err(|e| http_error("jwt", e))?
            .text()
            .await
            .map_err(|e| http_error("jwt", e))?;

        let credential = credential_from_jwt_body(&jwt)?;
        if verbose {
            debug!("[Auth] JWT body is {} bytes", jwt.len());
        }
        Ok(credential)
    }
}

fn http_error(step: &'static str, err: reqwest::Error) -> AuthError {
    AuthError::Http {
        step,
        message: err.to_string(),
    }
}

/// Turns the body of the JWT endpoint into a bearer credential. An HTML page
/// or a short body means the session was never authenticated.
pub fn credential_from_jwt_body(body: &str) -> Result<Credential, AuthError> {
    let token = body.trim();
    if token.contains("<!DOCTYPE") || token.len() < JWT_MIN_LEN {
        let preview: String = token.chars().take(100).collect();
        return Err(AuthError::Rejected(format!(
            "jwt endpoint returned no token: {preview:?}"
        )));
    }
    Ok(Credential::bearer(token))
}

/// Hidden state of the ASP.NET login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub view_state: String,
    pub view_state_generator: String,
    pub event_validation: String,
    /// Relative or absolute form target, HTML entities decoded.
    pub action: String,
}

fn form_action_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"action="([^"]*)""#).expect("form action pattern"))
}

fn input_value_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"id="([^"]*)"\s+value="([^"]*)""#).expect("input value pattern")
    })
}

impl LoginForm {
    /// Missing fields scrape as empty strings, a missing action falls back
    /// to `/Login.aspx`.
    pub fn scrape(html: &str) -> Self {
        let action = form_action_pattern()
            .captures(html)
            .map(|c| decode_html(&c[1]))
            .unwrap_or_else(|| "/Login.aspx".to_string());
        Self {
            view_state: hidden_field(html, "__VIEWSTATE"),
            view_state_generator: hidden_field(html, "__VIEWSTATEGENERATOR"),
            event_validation: hidden_field(html, "__EVENTVALIDATION"),
            action,
        }
    }
}

/// Value of `<input id="name" value="...">`, or an empty string.
pub fn hidden_field(html: &str, name: &str) -> String {
    input_value_pattern()
        .captures_iter(html)
        .find(|c| &c[1] == name)
        .map(|c| c[2].to_string())
        .unwrap_or_default()
}

pub fn decode_html(raw: &str) -> String {
    raw.replace("&amp;", "&")
}
