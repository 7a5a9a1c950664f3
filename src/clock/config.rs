//! Clock synchronization and firing parameters.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synchronization and scheduling parameters.
///
/// | Field              | Unit | Description                                         | Default |
/// |--------------------|------|-----------------------------------------------------|---------|
/// | authority_url      | URL  | Host whose `Date` header is treated as ground truth | OBS     |
/// | samples            | —    | Probes per synchronization run                      | 5       |
/// | sample_delay_ms    | ms   | Pause between two probes                            | 500     |
/// | fire_margin_ms     | ms   | Lead subtracted from the deadline for send latency  | 0       |
/// | resync_lead_secs   | s    | Re-sync anchor before the deadline                  | 90      |
/// | prefetch_lead_secs | s    | Credential anchor before the deadline               | 60      |
/// | warm_up_lead_secs  | s    | Connection warm-up before the deadline              | 5       |
/// | utc_offset_minutes | min  | Zone of the configured deadline; host zone if unset | —       |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "ClockConfig::default_authority_url")]
    pub authority_url: String,
    #[serde(default = "ClockConfig::default_samples")]
    pub samples: usize,
    #[serde(default = "ClockConfig::default_sample_delay_ms")]
    pub sample_delay_ms: u64,
    /// Fire this many ms early. Negative values fire late.
    #[serde(default)]
    pub fire_margin_ms: i64,
    #[serde(default = "ClockConfig::default_resync_lead_secs")]
    pub resync_lead_secs: u64,
    #[serde(default = "ClockConfig::default_prefetch_lead_secs")]
    pub prefetch_lead_secs: u64,
    #[serde(default = "ClockConfig::default_warm_up_lead_secs")]
    pub warm_up_lead_secs: u64,
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

impl ClockConfig {
    /// Load clock config from a file. Supports:
    /// - Files with a `[clock]` section (e.g. the full application config)
    /// - Flat files with the clock fields at root
    ///
    /// Environment variables prefixed with `REGSNIPE_CLOCK_` (e.g.
    /// `REGSNIPE_CLOCK_FIRE_MARGIN_MS`) override file values.
    pub fn from_file(config_file: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(config_file))
            .add_source(Environment::with_prefix("REGSNIPE_CLOCK").try_parsing(true))
            .build()?;
        let clock: Self = config.get("clock").or_else(|_| config.try_deserialize())?;
        clock.validate()?;
        Ok(clock)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 {
            return Err(ConfigError::Message("clock.samples must be at least 1".into()));
        }
        if self.prefetch_lead_secs >= self.resync_lead_secs {
            return Err(ConfigError::Message(format!(
                "clock.prefetch_lead_secs ({}) must be below clock.resync_lead_secs ({})",
                self.prefetch_lead_secs, self.resync_lead_secs
            )));
        }
        if self.warm_up_lead_secs >= self.prefetch_lead_secs {
            return Err(ConfigError::Message(format!(
                "clock.warm_up_lead_secs ({}) must be below clock.prefetch_lead_secs ({})",
                self.warm_up_lead_secs, self.prefetch_lead_secs
            )));
        }
        Ok(())
    }

    pub fn sample_delay(&self) -> Duration {
        Duration::from_millis(self.sample_delay_ms)
    }

    pub fn resync_lead(&self) -> Duration {
        Duration::from_secs(self.resync_lead_secs)
    }

    pub fn prefetch_lead(&self) -> Duration {
        Duration::from_secs(self.prefetch_lead_secs)
    }

    pub fn warm_up_lead(&self) -> Duration {
        Duration::from_secs(self.warm_up_lead_secs)
    }

    fn default_authority_url() -> String {
        "https://obs.itu.edu.tr/".to_string()
    }
    fn default_samples() -> usize {
        5
    }
    fn default_sample_delay_ms() -> u64 {
        500
    }
    fn default_resync_lead_secs() -> u64 {
        90
    }
    fn default_prefetch_lead_secs() -> u64 {
        60
    }
    fn default_warm_up_lead_secs() -> u64 {
        5
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            authority_url: Self::default_authority_url(),
            samples: Self::default_samples(),
            sample_delay_ms: Self::default_sample_delay_ms(),
            fire_margin_ms: 0,
            resync_lead_secs: Self::default_resync_lead_secs(),
            prefetch_lead_secs: Self::default_prefetch_lead_secs(),
            warm_up_lead_secs: Self::default_warm_up_lead_secs(),
            utc_offset_minutes: None,
        }
    }
}
