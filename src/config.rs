//! Application configuration.

use crate::clock::ClockConfig;
use crate::registration::RegistrationRequest;
use crate::schedule::TargetDeadline;
use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "data/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursesConfig {
    /// CRNs to add.
    pub crn: Vec<String>,
    /// CRNs to drop.
    #[serde(default)]
    pub scrn: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "ServiceConfig::default_base_url")]
    pub base_url: String,
    /// CSV timing report destination. No report when unset.
    #[serde(default)]
    pub report_path: Option<String>,
}

impl ServiceConfig {
    fn default_base_url() -> String {
        "https://obs.itu.edu.tr/".to_string()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub time: TargetDeadline,
    pub account: AccountConfig,
    pub courses: CoursesConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

impl AppConfig {
    /// Loads and validates the configuration file.
    ///
    /// Environment variables prefixed with `REGSNIPE` override file values,
    /// with `__` between nested keys (e.g. `REGSNIPE__ACCOUNT__PASSWORD`).
    pub fn from_file(config_file: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(config_file))
            .add_source(
                Environment::with_prefix("REGSNIPE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let app: Self = config.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    /// Checks everything that must hold before any network activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.target()?;
        if self.courses.crn.is_empty() && self.courses.scrn.is_empty() {
            return Err(ConfigError::Message(
                "courses: at least one CRN to add or drop is required".into(),
            ));
        }
        Ok(())
    }

    /// Deadline resolved on the authority (UTC) timeline.
    pub fn target(&self) -> Result<DateTime<Utc>, ConfigError> {
        self.time.resolve(self.clock.utc_offset_minutes)
    }

    pub fn registration(&self) -> RegistrationRequest {
        RegistrationRequest::new(self.courses.crn.clone(), self.courses.scrn.clone())
    }
}
