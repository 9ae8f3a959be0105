//! # Host Collaborators
//!
//! The refresher never talks to the telemetry host directly. It reads the
//! position and clock through small traits and hands its results to a delta
//! sink and a status sink, so the same core runs under the CLI, in tests, or
//! embedded in a larger host.

use crate::Coordinate;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tracing::{error, info};

/// Supplies the vessel's current position, if known.
pub trait PositionSource: Send + Sync {
    fn position(&self) -> Option<Coordinate>;
}

/// Supplies "now". Read once per refresh cycle.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Receives normalized updates for the telemetry bus.
pub trait DeltaSink: Send + Sync {
    fn emit(&self, delta: &Delta);
}

/// Receives a human-readable outcome for every cycle.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, message: &str);
    fn set_error(&self, message: &str);
}

/// Render an instant the way values are published: RFC 3339, UTC, `Z`.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One telemetry path and its value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PathValue {
    pub path: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Update {
    #[serde(rename = "$source")]
    pub source: String,
    pub timestamp: String,
    pub values: Vec<PathValue>,
}

/// A telemetry delta: values for one context, stamped with one instant.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Delta {
    pub context: String,
    pub updates: Vec<Update>,
}

impl Delta {
    pub fn new(
        context: impl Into<String>,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        values: Vec<PathValue>,
    ) -> Self {
        Delta {
            context: context.into(),
            updates: vec![Update {
                source: source.into(),
                timestamp: format_instant(timestamp),
                values,
            }],
        }
    }

    /// All path/value pairs across updates.
    pub fn values(&self) -> impl Iterator<Item = &PathValue> {
        self.updates.iter().flat_map(|u| u.values.iter())
    }
}

/// Position shared between a feed and the refresher.
#[derive(Clone, Default)]
pub struct SharedPosition {
    inner: Arc<RwLock<Option<Coordinate>>>,
}

impl SharedPosition {
    pub fn set(&self, position: Option<Coordinate>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = position;
    }
}

impl PositionSource for SharedPosition {
    fn position(&self) -> Option<Coordinate> {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A position that never changes (e.g. given on the command line).
pub struct FixedPosition(pub Option<Coordinate>);

impl PositionSource for FixedPosition {
    fn position(&self) -> Option<Coordinate> {
        self.0
    }
}

/// System wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Follows the host's date-time when one has been reported, else the system
/// clock.
///
/// A report anchors the clock; it keeps advancing from there on the local
/// monotonic clock until the next report.
#[derive(Clone, Default)]
pub struct HostClock {
    reported: Arc<RwLock<Option<(DateTime<Utc>, Instant)>>>,
}

impl HostClock {
    pub fn report(&self, instant: Option<DateTime<Utc>>) {
        let anchor = instant.map(|at| (at, Instant::now()));
        *self.reported.write().unwrap_or_else(PoisonError::into_inner) = anchor;
    }
}

impl Clock for HostClock {
    fn now(&self) -> DateTime<Utc> {
        let reported = *self.reported.read().unwrap_or_else(PoisonError::into_inner);
        match reported {
            Some((at, since)) => chrono::Duration::from_std(since.elapsed())
                .ok()
                .and_then(|elapsed| at.checked_add_signed(elapsed))
                .unwrap_or(at),
            None => Utc::now(),
        }
    }
}

/// Writes each delta as one line of JSON.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> DeltaSink for JsonLinesSink<W> {
    fn emit(&self, delta: &Delta) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let written = serde_json::to_writer(&mut *out, delta)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(out))
            .and_then(|_| out.flush());
        if let Err(err) = written {
            error!(error = %err, "failed to write delta");
        }
    }
}

/// Status sink that only logs.
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn set_status(&self, message: &str) {
        info!(status = message);
    }

    fn set_error(&self, message: &str) {
        error!(status = message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn delta_serializes_in_host_shape() {
        let delta = Delta::new(
            "vessels.self",
            "tides-api",
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            vec![PathValue {
                path: "environment.tide.heightHigh".to_string(),
                value: json!(1.5),
            }],
        );
        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(
            value,
            json!({
                "context": "vessels.self",
                "updates": [{
                    "$source": "tides-api",
                    "timestamp": "2023-11-14T22:13:20Z",
                    "values": [{ "path": "environment.tide.heightHigh", "value": 1.5 }]
                }]
            })
        );
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_delta() {
        let sink = JsonLinesSink::new(Vec::new());
        let delta = Delta::new("vessels.self", "tides-api", Utc::now(), vec![]);
        sink.emit(&delta);
        sink.emit(&delta);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.starts_with("{\"context\"")));
    }

    #[test]
    fn host_clock_prefers_reported_time() {
        let clock = HostClock::default();
        let reported = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        clock.report(Some(reported));
        let now = clock.now();
        assert!(now >= reported);
        assert!(now < reported + Duration::seconds(5));
        clock.report(None);
        assert!(clock.now() > reported);
    }

    #[test]
    fn host_clock_advances_after_a_report() {
        let clock = HostClock::default();
        let reported = Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap();
        clock.report(Some(reported));
        let first = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(clock.now() > first);
    }

    #[test]
    fn shared_position_is_visible_to_clones() {
        let feed = SharedPosition::default();
        let reader = feed.clone();
        assert_eq!(reader.position(), None);
        let here = Coordinate {
            latitude: 1.0,
            longitude: 2.0,
        };
        feed.set(Some(here));
        assert_eq!(reader.position(), Some(here));
    }
}
