//! # Tide Sources and Normalization
//!
//! Every upstream tide API is wrapped as a [`TideSource`]. A source turns the
//! vessel's position and the cycle's "now" into a [`TideSnapshot`] holding
//! canonical [`ExtremeEvent`]s. Everything upstream-specific (URL layout, date
//! formats, type markers) stays inside the source module.
//!
//! ## Supported Sources
//! - [`crate::noaa::NoaaSource`]: station based, US coverage, no credentials
//! - [`crate::worldtides::WorldTidesSource`]: coordinate based, global, API key
//!
//! ## Error Handling
//!
//! All failures surface as [`TideError`]. Two upstream failure modes are kept
//! apart on purpose:
//! - **Transport**: connection refused, timeout, non-2xx status
//!   ([`TideError::UpstreamUnavailable`])
//! - **Application**: a well-formed reply whose payload reports an error, such
//!   as a bad API key ([`TideError::UpstreamRejected`])
//!
//! Tide data is read-only. The write-style capabilities exist on the trait so
//! callers get an explicit [`TideError::NotSupported`] instead of a missing
//! method.

use crate::config::Config;
use crate::noaa::{self, NoaaSource};
use crate::stations::StationDirectory;
use crate::worldtides::{self, WorldTidesSource};
use crate::{Coordinate, ExtremeEvent, TideKind, TideSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur while resolving, fetching or normalizing tide data.
#[derive(Error, Debug)]
pub enum TideError {
    /// The host has not reported a position yet
    #[error("no position available")]
    NoPositionAvailable,

    /// The station directory loaded but holds no stations
    #[error("station directory is empty")]
    EmptyDirectory,

    /// Neither the cached nor the upstream station directory could be read
    #[error("station directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Transport failure or non-success HTTP status
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The upstream answered but reported an error in its payload
    #[error("upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// Write-style capability on read-only tide data
    #[error("{0} is not supported for tide resources")]
    NotSupported(&'static str),

    /// The upstream payload lacks or mangles a field we consume
    #[error("malformed upstream payload: {0}")]
    Payload(String),

    /// Configured provider id does not name a known source
    #[error("unknown tide source: {0}")]
    UnknownSource(String),

    /// A source needs a credential that is not configured
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
}

impl From<reqwest::Error> for TideError {
    fn from(err: reqwest::Error) -> Self {
        TideError::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for TideError {
    fn from(err: serde_json::Error) -> Self {
        TideError::Payload(err.to_string())
    }
}

/// The capability set shared by every tide prediction provider.
#[async_trait]
pub trait TideSource: Send + Sync {
    /// Identifier used in configuration (e.g. `"noaa"`)
    fn id(&self) -> &'static str;

    /// Human-readable provider name
    fn title(&self) -> &'static str;

    /// Fetch predicted extremes around `now` for the given position.
    ///
    /// The window always reaches far enough past `now` that at least one
    /// future high and one future low are expected to be present.
    async fn fetch_extremes(
        &self,
        position: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> Result<TideSnapshot, TideError>;

    /// Read a single tide resource by id.
    async fn get(&self, id: &str) -> Result<TideSnapshot, TideError>;

    /// Store a value under a tide resource id.
    async fn write(&self, id: &str, value: serde_json::Value) -> Result<(), TideError>;

    /// Remove a tide resource.
    async fn delete(&self, id: &str) -> Result<(), TideError>;
}

/// How an upstream expressed the time of an extreme.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpstreamTime<'a> {
    /// Seconds since the Unix epoch
    EpochSeconds(i64),
    /// A date-time string; naive strings are read as UTC
    Text(&'a str),
}

/// Naive layouts seen in upstream payloads, all implicitly UTC
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Convert an upstream timestamp into an absolute UTC instant.
///
/// # Example
/// ```
/// use tide_relay_lib::tide_data::{to_utc, UpstreamTime};
///
/// let t = to_utc(UpstreamTime::Text("2023-11-14 22:13")).unwrap();
/// assert_eq!(t.to_rfc3339(), "2023-11-14T22:13:00+00:00");
/// ```
pub fn to_utc(time: UpstreamTime<'_>) -> Result<DateTime<Utc>, TideError> {
    match time {
        UpstreamTime::EpochSeconds(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| TideError::Payload(format!("epoch seconds out of range: {secs}"))),
        UpstreamTime::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(dt.with_timezone(&Utc));
            }
            NAIVE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|naive| naive.and_utc())
                .ok_or_else(|| TideError::Payload(format!("unrecognised timestamp: {text:?}")))
        }
    }
}

/// Map an upstream tide type marker to a [`TideKind`].
///
/// Accepts the one and two letter codes (`H`, `HH`, `L`, `LL`) as well as the
/// spelled-out forms, case-insensitively.
pub fn parse_marker(marker: &str) -> Result<TideKind, TideError> {
    match marker.trim().to_ascii_lowercase().as_str() {
        "h" | "hh" | "high" => Ok(TideKind::High),
        "l" | "ll" | "low" => Ok(TideKind::Low),
        other => Err(TideError::Payload(format!("unknown tide type {other:?}"))),
    }
}

/// Build a canonical extreme from upstream fields.
pub fn normalize_extreme(
    marker: &str,
    value: f64,
    time: UpstreamTime<'_>,
) -> Result<ExtremeEvent, TideError> {
    Ok(ExtremeEvent {
        kind: parse_marker(marker)?,
        value,
        timestamp: to_utc(time)?,
    })
}

/// Build the HTTP client shared by the directory and all sources.
///
/// Falls back to reqwest defaults if the builder rejects the settings.
pub fn http_client(timeout: Duration, connect_timeout: Duration) -> Client {
    ClientBuilder::new()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .user_agent(concat!("tide-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send a request and decode a JSON body.
///
/// Non-success statuses become [`TideError::UpstreamUnavailable`]; a body that
/// does not decode becomes [`TideError::Payload`].
pub(crate) async fn get_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, TideError> {
    let body = get_bytes(request).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Raw body of a successful upstream response.
pub(crate) async fn get_bytes(request: RequestBuilder) -> Result<Vec<u8>, TideError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TideError::UpstreamUnavailable(format!(
            "HTTP {} from {}",
            status,
            response.url().path()
        )));
    }

    let body = response.bytes().await?;
    debug!(bytes = body.len(), "upstream response received");
    Ok(body.to_vec())
}

/// Resolve the configured provider id to exactly one source.
///
/// Station-based sources load their directory here, once, before the first
/// refresh cycle.
pub async fn select_source(
    config: &Config,
    client: Client,
) -> Result<Box<dyn TideSource>, TideError> {
    let provider = config.source.provider.trim();

    if provider.eq_ignore_ascii_case(noaa::SOURCE_ID) {
        let stations = StationDirectory::load(
            &client,
            &config.endpoints.noaa_stations_url,
            &config.station_cache_path(),
        )
        .await?;
        if stations.is_empty() {
            warn!("station directory is empty, NOAA refreshes will fail");
        }
        info!(stations = stations.len(), "using NOAA tide predictions");
        return Ok(Box::new(NoaaSource::new(
            client,
            stations,
            config.endpoints.noaa_predictions_url.clone(),
        )));
    }

    if provider.eq_ignore_ascii_case(worldtides::SOURCE_ID)
        || provider.eq_ignore_ascii_case("worldtides.info")
    {
        let key = config
            .source
            .worldtides_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(TideError::MissingCredential("worldtides_api_key"))?;
        info!(days = config.source.worldtides_days, "using WorldTides predictions");
        return Ok(Box::new(WorldTidesSource::new(
            client,
            config.endpoints.worldtides_url.clone(),
            key.to_string(),
            config.source.worldtides_days,
        )));
    }

    Err(TideError::UnknownSource(provider.to_string()))
}
