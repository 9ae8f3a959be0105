//! # WorldTides Source
//!
//! Coordinate-based predictions from worldtides.info (API v3). No station
//! lookup is needed: the service interpolates its own tidal atlas at the
//! requested position. Requests are billed per call, which is why the window
//! is several days long and the freshness gate matters.
//!
//! A reply always carries a `status` field; anything other than 200 is an
//! application-level rejection whose `error` text is passed on verbatim.

use crate::tide_data::{get_json, normalize_extreme, TideError, TideSource, UpstreamTime};
use crate::{Coordinate, TideSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Configuration identifier
pub const SOURCE_ID: &str = "worldtides";

pub const DEFAULT_URL: &str = "https://www.worldtides.info/api/v3";

/// Shortest window that still reliably contains a future high and low
pub const MIN_DAYS: u32 = 2;

/// Chart Datum
const DATUM: &str = "CD";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorldTidesResponse {
    status: u16,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    atlas: Option<String>,
    #[serde(default)]
    response_lat: Option<f64>,
    #[serde(default)]
    response_lon: Option<f64>,
    #[serde(default)]
    extremes: Vec<Extreme>,
}

#[derive(Debug, Deserialize)]
struct Extreme {
    dt: i64,
    height: f64,
    #[serde(rename = "type")]
    kind: String,
}

pub struct WorldTidesSource {
    client: Client,
    url: String,
    api_key: String,
    days: u32,
}

impl WorldTidesSource {
    /// `days` below [`MIN_DAYS`] is raised to it.
    pub fn new(client: Client, url: String, api_key: String, days: u32) -> Self {
        WorldTidesSource {
            client,
            url,
            api_key,
            days: days.max(MIN_DAYS),
        }
    }
}

#[async_trait]
impl TideSource for WorldTidesSource {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn title(&self) -> &'static str {
        "worldtides.info"
    }

    async fn fetch_extremes(
        &self,
        position: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> Result<TideSnapshot, TideError> {
        let position = position.ok_or(TideError::NoPositionAvailable)?;

        debug!(
            lat = position.latitude,
            lon = position.longitude,
            days = self.days,
            "fetching WorldTides extremes"
        );

        let request = self
            .client
            .get(format!("{}?extremes", self.url))
            .query(&[
                ("lat", position.latitude.to_string()),
                ("lon", position.longitude.to_string()),
                ("start", now.timestamp().to_string()),
                ("days", self.days.to_string()),
                ("datum", DATUM.to_string()),
                ("key", self.api_key.clone()),
            ]);

        let body: WorldTidesResponse = get_json(request).await?;
        snapshot_from_response(position, body)
    }

    async fn get(&self, _id: &str) -> Result<TideSnapshot, TideError> {
        Err(TideError::NotSupported("get"))
    }

    async fn write(&self, _id: &str, _value: serde_json::Value) -> Result<(), TideError> {
        Err(TideError::NotSupported("write"))
    }

    async fn delete(&self, _id: &str) -> Result<(), TideError> {
        Err(TideError::NotSupported("delete"))
    }
}

fn snapshot_from_response(
    query: Coordinate,
    body: WorldTidesResponse,
) -> Result<TideSnapshot, TideError> {
    if body.status != 200 {
        return Err(TideError::UpstreamRejected(
            body.error.unwrap_or_else(|| "none".to_string()),
        ));
    }

    let extremes = body
        .extremes
        .iter()
        .map(|e| normalize_extreme(&e.kind, e.height, UpstreamTime::EpochSeconds(e.dt)))
        .collect::<Result<Vec<_>, _>>()?;

    let position = Coordinate {
        latitude: body.response_lat.unwrap_or(query.latitude),
        longitude: body.response_lon.unwrap_or(query.longitude),
    };

    Ok(TideSnapshot::new(
        "WorldTides",
        body.atlas.unwrap_or_default(),
        position,
        extremes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TideKind;
    use chrono::TimeZone;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn position() -> Option<Coordinate> {
        Some(Coordinate {
            latitude: 1.0,
            longitude: 1.0,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn source(server: &MockServer, days: u32) -> WorldTidesSource {
        WorldTidesSource::new(
            Client::new(),
            format!("{}/api/v3", server.uri()),
            "test-key".to_string(),
            days,
        )
    }

    #[tokio::test]
    async fn normalizes_epoch_extremes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3"))
            .and(query_param("lat", "1"))
            .and(query_param("lon", "1"))
            .and(query_param("start", "1700000000"))
            .and(query_param("days", "7"))
            .and(query_param("datum", "CD"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "callCount": 1,
                "atlas": "FES",
                "responseLat": 1.25,
                "responseLon": 0.75,
                "extremes": [
                    { "dt": 1700022800, "date": "2023-11-15T04:33+0000", "height": -0.61, "type": "Low" },
                    { "dt": 1700000000, "date": "2023-11-14T22:13+0000", "height": 0.58, "type": "High" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = source(&server, 7)
            .fetch_extremes(position(), now())
            .await
            .unwrap();

        assert_eq!(snapshot.station_name, "WorldTides");
        assert_eq!(snapshot.station_id, "FES");
        assert_eq!(snapshot.position.latitude, 1.25);
        assert_eq!(snapshot.extremes[0].kind, TideKind::High);
        assert_eq!(
            snapshot.extremes[0]
                .timestamp
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2023-11-14T22:13:20Z"
        );
        assert_eq!(snapshot.extremes[1].kind, TideKind::Low);
        assert_eq!(snapshot.extremes[1].value, -0.61);
    }

    #[tokio::test]
    async fn status_in_payload_is_rejection_with_upstream_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 400,
                "error": "Invalid API key"
            })))
            .mount(&server)
            .await;

        let err = source(&server, 7)
            .fetch_extremes(position(), now())
            .await
            .unwrap_err();
        match err {
            TideError::UpstreamRejected(message) => assert_eq!(message, "Invalid API key"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn short_window_is_raised_to_minimum() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("days", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 200,
                "extremes": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let snapshot = source(&server, 0)
            .fetch_extremes(position(), now())
            .await
            .unwrap();
        assert!(snapshot.extremes.is_empty());
        assert_eq!(snapshot.position.longitude, 1.0);
    }

    #[tokio::test]
    async fn missing_position_is_reported() {
        let source = WorldTidesSource::new(
            Client::new(),
            DEFAULT_URL.to_string(),
            "k".to_string(),
            7,
        );
        assert!(matches!(
            source.fetch_extremes(None, now()).await,
            Err(TideError::NoPositionAvailable)
        ));
        assert!(matches!(
            source.write("tides", json!(1)).await,
            Err(TideError::NotSupported("write"))
        ));
        assert!(matches!(
            source.delete("tides").await,
            Err(TideError::NotSupported("delete"))
        ));
    }
}
