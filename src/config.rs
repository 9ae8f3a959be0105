//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! `tide-relay.toml` file: which tide source is active, its credentials, the
//! refresh period, and where the host keeps its files.
//!
//! Every field has a default, so a partial file (or none at all) still yields
//! a working configuration.

use crate::{noaa, stations, worldtides};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "tide-relay.toml";

/// Longest allowed refresh period: one week
pub const MAX_PERIOD_MINUTES: u64 = 7 * 24 * 60;

/// Application configuration loaded from tide-relay.toml
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Active tide source and its credentials
    pub source: SourceConfig,
    /// Refresh cadence and HTTP timeouts
    pub refresh: RefreshConfig,
    /// Telemetry host integration
    pub host: HostConfig,
    /// Upstream base URLs
    pub endpoints: EndpointConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `"noaa"` or `"worldtides"`
    pub provider: String,
    /// worldtides.info API key (required for the WorldTides source)
    pub worldtides_api_key: Option<String>,
    /// Days of WorldTides predictions per request (at least 2)
    pub worldtides_days: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Minutes between periodic refresh triggers (at least 1)
    pub period_minutes: u64,
    /// Whole-request timeout for upstream calls
    pub request_timeout_secs: u64,
    /// TCP/TLS connect timeout for upstream calls
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding the station cache file
    pub config_path: PathBuf,
    /// Vessel identifier; deltas are published for `vessels.<self_id>`
    pub self_id: String,
    /// Source label attached to every update
    pub source_label: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub noaa_stations_url: String,
    pub noaa_predictions_url: String,
    pub worldtides_url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            provider: noaa::SOURCE_ID.to_string(),
            worldtides_api_key: None,
            worldtides_days: 7,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            period_minutes: 60,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            config_path: PathBuf::from("."),
            self_id: "self".to_string(),
            source_label: "tides-api".to_string(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            noaa_stations_url: noaa::DEFAULT_STATIONS_URL.to_string(),
            noaa_predictions_url: noaa::DEFAULT_PREDICTIONS_URL.to_string(),
            worldtides_url: worldtides::DEFAULT_URL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), provider = %config.source.provider, "loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        };
        config.normalized()
    }

    /// Save current configuration to the given path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        info!(path = %path.as_ref().display(), "configuration saved");
        Ok(())
    }

    /// Clamp values that have a hard lower bound.
    pub fn normalized(mut self) -> Self {
        if self.refresh.period_minutes < 1 {
            warn!("refresh.period_minutes must be at least 1, using 1");
            self.refresh.period_minutes = 1;
        }
        if self.refresh.period_minutes > MAX_PERIOD_MINUTES {
            warn!(
                "refresh.period_minutes must be at most {}, using {}",
                MAX_PERIOD_MINUTES, MAX_PERIOD_MINUTES
            );
            self.refresh.period_minutes = MAX_PERIOD_MINUTES;
        }
        if self.source.worldtides_days < worldtides::MIN_DAYS {
            warn!(
                "source.worldtides_days must be at least {}, using {}",
                worldtides::MIN_DAYS,
                worldtides::MIN_DAYS
            );
            self.source.worldtides_days = worldtides::MIN_DAYS;
        }
        self
    }

    pub fn refresh_period(&self) -> Duration {
        let minutes = self.refresh.period_minutes.clamp(1, MAX_PERIOD_MINUTES);
        Duration::from_secs(minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh.connect_timeout_secs)
    }

    /// Where the station directory is cached
    pub fn station_cache_path(&self) -> PathBuf {
        self.host.config_path.join(stations::CACHE_FILE_NAME)
    }

    /// Delta context for this vessel
    pub fn context(&self) -> String {
        format!("vessels.{}", self.host.self_id)
    }
}
