//! # NOAA Tides and Currents Source
//!
//! Station-based predictions from NOAA CO-OPS. The vessel position is first
//! resolved to the nearest tide-prediction station; predictions are then
//! requested for that station's reference id.
//!
//! ## Request
//! - **Endpoint**: `api/prod/datagetter`, product `predictions`
//! - **Window**: the calendar days from `now - 1 day` to `now + 1 day`
//! - **Datum**: MLLW, metric units, GMT timestamps, `hilo` interval
//!
//! ## Response
//! ```json
//! { "predictions": [ { "t": "2023-11-14 22:13", "v": "1.234", "type": "H" } ] }
//! ```
//! or, on an application-level failure (still HTTP 200):
//! ```json
//! { "error": { "message": "No Predictions data was found." } }
//! ```
//!
//! The returned snapshot reports the station's position, not the vessel's.

use crate::stations::{Station, StationDirectory};
use crate::tide_data::{get_json, normalize_extreme, TideError, TideSource, UpstreamTime};
use crate::{Coordinate, TideSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

/// Configuration identifier
pub const SOURCE_ID: &str = "noaa";

pub const DEFAULT_STATIONS_URL: &str =
    "https://api.tidesandcurrents.noaa.gov/mdapi/prod/webapi/stations.json?type=tidepredictions";

pub const DEFAULT_PREDICTIONS_URL: &str =
    "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

/// Mean Lower Low Water
const DATUM: &str = "MLLW";

const APPLICATION: &str = "tide-relay";

#[derive(Debug, Deserialize)]
struct PredictionsResponse {
    #[serde(default)]
    predictions: Option<Vec<Prediction>>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    t: String,
    v: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

pub struct NoaaSource {
    client: Client,
    stations: StationDirectory,
    predictions_url: String,
}

impl NoaaSource {
    pub fn new(client: Client, stations: StationDirectory, predictions_url: String) -> Self {
        NoaaSource {
            client,
            stations,
            predictions_url,
        }
    }
}

#[async_trait]
impl TideSource for NoaaSource {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn title(&self) -> &'static str {
        "NOAA (US only)"
    }

    async fn fetch_extremes(
        &self,
        position: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> Result<TideSnapshot, TideError> {
        let position = position.ok_or(TideError::NoPositionAvailable)?;
        let station = self.stations.nearest_to(position)?;

        let begin_date = (now - Duration::days(1)).format("%Y%m%d").to_string();
        let end_date = (now + Duration::days(1)).format("%Y%m%d").to_string();

        debug!(
            station = %station.id,
            reference = %station.reference_id,
            %begin_date,
            %end_date,
            "fetching NOAA predictions"
        );

        let request = self.client.get(&self.predictions_url).query(&[
            ("product", "predictions"),
            ("application", APPLICATION),
            ("begin_date", begin_date.as_str()),
            ("end_date", end_date.as_str()),
            ("datum", DATUM),
            ("station", station.reference_id.as_str()),
            ("time_zone", "gmt"),
            ("units", "metric"),
            ("interval", "hilo"),
            ("format", "json"),
        ]);

        let body: PredictionsResponse = get_json(request).await?;
        snapshot_from_response(station, body)
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
    station: &Station,
    body: PredictionsResponse,
) -> Result<TideSnapshot, TideError> {
    if let Some(error) = body.error {
        return Err(TideError::UpstreamRejected(
            error
                .message
                .unwrap_or_else(|| "unspecified NOAA error".to_string()),
        ));
    }

    let predictions = body
        .predictions
        .ok_or_else(|| TideError::Payload("NOAA response has no predictions".to_string()))?;

    let extremes = predictions
        .iter()
        .map(|p| {
            let value: f64 = p
                .v
                .trim()
                .parse()
                .map_err(|_| TideError::Payload(format!("bad NOAA height {:?}", p.v)))?;
            normalize_extreme(&p.kind, value, UpstreamTime::Text(&p.t))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TideSnapshot::new(
        station.name.clone(),
        station.reference_id.clone(),
        station.coordinate(),
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

    fn directory() -> StationDirectory {
        StationDirectory::from_stations(vec![
            Station {
                id: "8443970".to_string(),
                reference_id: "8443970".to_string(),
                name: "Boston".to_string(),
                latitude: 42.3539,
                longitude: -71.0503,
            },
            Station {
                id: "8418150".to_string(),
                reference_id: "8418150".to_string(),
                name: "Portland".to_string(),
                latitude: 43.6567,
                longitude: -70.2467,
            },
        ])
    }

    fn off_boston() -> Option<Coordinate> {
        Some(Coordinate {
            latitude: 42.36,
            longitude: -70.95,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 11, 14, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn fetches_nearest_station_and_reports_its_position() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datagetter"))
            .and(query_param("station", "8443970"))
            .and(query_param("begin_date", "20231113"))
            .and(query_param("end_date", "20231115"))
            .and(query_param("datum", "MLLW"))
            .and(query_param("interval", "hilo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [
                    { "t": "2023-11-14 16:02", "v": "0.120", "type": "L" },
                    { "t": "2023-11-14 22:13", "v": "3.051", "type": "H" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = NoaaSource::new(
            Client::new(),
            directory(),
            format!("{}/datagetter", server.uri()),
        );
        let snapshot = source.fetch_extremes(off_boston(), now()).await.unwrap();

        assert_eq!(snapshot.station_name, "Boston");
        assert_eq!(snapshot.station_id, "8443970");
        assert_eq!(snapshot.position.latitude, 42.3539);
        assert_eq!(snapshot.extremes.len(), 2);
        assert_eq!(snapshot.extremes[1].kind, TideKind::High);
        assert_eq!(snapshot.extremes[1].value, 3.051);
        assert_eq!(
            snapshot.extremes[1].timestamp,
            Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn embedded_error_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "error": { "message": "No Predictions data was found. Please make sure the Datum input is valid." }
            })))
            .mount(&server)
            .await;

        let source = NoaaSource::new(Client::new(), directory(), server.uri());
        let err = source.fetch_extremes(off_boston(), now()).await.unwrap_err();
        match err {
            TideError::UpstreamRejected(message) => {
                assert!(message.starts_with("No Predictions data was found"))
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = NoaaSource::new(Client::new(), directory(), server.uri());
        let err = source.fetch_extremes(off_boston(), now()).await.unwrap_err();
        assert!(matches!(err, TideError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn no_position_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let source = NoaaSource::new(Client::new(), directory(), server.uri());
        let err = source.fetch_extremes(None, now()).await.unwrap_err();
        assert!(matches!(err, TideError::NoPositionAvailable));
    }

    #[tokio::test]
    async fn write_style_capabilities_are_unsupported() {
        let source = NoaaSource::new(
            Client::new(),
            directory(),
            DEFAULT_PREDICTIONS_URL.to_string(),
        );
        assert!(matches!(
            source.write("8443970", json!({})).await,
            Err(TideError::NotSupported("write"))
        ));
        assert!(matches!(
            source.delete("8443970").await,
            Err(TideError::NotSupported("delete"))
        ));
        assert!(matches!(
            source.get("8443970").await,
            Err(TideError::NotSupported("get"))
        ));
    }

    #[test]
    fn bad_height_is_payload_error() {
        let body = PredictionsResponse {
            predictions: Some(vec![Prediction {
                t: "2023-11-14 22:13".to_string(),
                v: "".to_string(),
                kind: "H".to_string(),
            }]),
            error: None,
        };
        let err = snapshot_from_response(&directory().stations()[0], body).unwrap_err();
        assert!(matches!(err, TideError::Payload(_)));
    }
}
