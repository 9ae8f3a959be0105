//! # Tide Relay Core Library
//!
//! This library turns third-party tide predictions into a compact "next high /
//! next low" record for a vessel's telemetry bus. No tide is ever computed
//! locally: every value comes from an upstream prediction service.
//!
//! ## Design Philosophy
//!
//! ### One canonical model
//! Upstream APIs disagree on almost everything (epoch seconds vs. date strings,
//! `"H"` vs. `"High"`, numbers vs. numeric strings). Each source normalizes its
//! payload into [`ExtremeEvent`]s before anything else sees it, so the refresh
//! logic only ever reasons about absolute UTC instants.
//!
//! ### Few upstream calls
//! Tide APIs are rate limited and often paid per request. The freshness policy
//! skips a refresh for as long as both the previously published high and low
//! are still ahead of "now".
//!
//! ### Data Flow
//! 1. **Trigger**: a position update or a periodic tick asks for a refresh
//! 2. **Gate**: [`freshness::is_fresh`] decides whether a fetch is needed
//! 3. **Fetch**: the active [`tide_data::TideSource`] returns a [`TideSnapshot`]
//! 4. **Derive**: [`refresh::NextTideSummary`] picks the next high and low
//! 5. **Emit**: up to four path/value pairs go out through [`host::DeltaSink`]
//!
//! ## Core Types
//! - [`Coordinate`]: a WGS84 position in decimal degrees
//! - [`ExtremeEvent`]: one predicted high or low water
//! - [`TideSnapshot`]: the result of one upstream fetch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// Module declarations
pub mod config;
pub mod freshness;
pub mod host;
pub mod noaa;
pub mod refresh;
pub mod stations;
pub mod tide_data;
pub mod worldtides;

/// A position in decimal degrees.
///
/// # Example
/// ```
/// use tide_relay_lib::Coordinate;
///
/// let boston = Coordinate { latitude: 42.3548, longitude: -71.0534 };
/// assert!(boston.latitude > 0.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which kind of extreme a prediction describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TideKind {
    High,
    Low,
}

impl TideKind {
    /// Both kinds, in the order values are emitted.
    pub const ALL: [TideKind; 2] = [TideKind::High, TideKind::Low];

    /// Telemetry path carrying the height of the next extreme of this kind.
    pub fn height_path(self) -> &'static str {
        match self {
            TideKind::High => "environment.tide.heightHigh",
            TideKind::Low => "environment.tide.heightLow",
        }
    }

    /// Telemetry path carrying the time of the next extreme of this kind.
    pub fn time_path(self) -> &'static str {
        match self {
            TideKind::High => "environment.tide.timeHigh",
            TideKind::Low => "environment.tide.timeLow",
        }
    }
}

impl fmt::Display for TideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TideKind::High => f.write_str("High"),
            TideKind::Low => f.write_str("Low"),
        }
    }
}

/// A single predicted high or low water.
///
/// `value` is passed through in the upstream's units and datum (meters for
/// both built-in sources). `timestamp` is always an absolute UTC instant.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtremeEvent {
    pub kind: TideKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Everything a source returned for one fetch.
///
/// `position` is where the prediction applies: the reference station for
/// station-based sources, which is not necessarily the vessel's position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TideSnapshot {
    pub station_name: String,
    pub station_id: String,
    pub position: Coordinate,
    /// Extremes in ascending time order
    pub extremes: Vec<ExtremeEvent>,
}

impl TideSnapshot {
    /// Build a snapshot, ordering the extremes chronologically.
    ///
    /// The sort is stable, so extremes sharing an instant keep upstream order.
    pub fn new(
        station_name: impl Into<String>,
        station_id: impl Into<String>,
        position: Coordinate,
        mut extremes: Vec<ExtremeEvent>,
    ) -> Self {
        extremes.sort_by_key(|e| e.timestamp);
        TideSnapshot {
            station_name: station_name.into(),
            station_id: station_id.into(),
            position,
            extremes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_orders_extremes() {
        let late = ExtremeEvent {
            kind: TideKind::Low,
            value: 0.2,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 16, 18, 0, 0).unwrap(),
        };
        let early = ExtremeEvent {
            kind: TideKind::High,
            value: 2.9,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 16, 12, 0, 0).unwrap(),
        };
        let snapshot = TideSnapshot::new(
            "Test",
            "1",
            Coordinate {
                latitude: 0.0,
                longitude: 0.0,
            },
            vec![late, early],
        );
        assert_eq!(snapshot.extremes, vec![early, late]);
    }

    #[test]
    fn paths_are_canonical() {
        assert_eq!(TideKind::High.height_path(), "environment.tide.heightHigh");
        assert_eq!(TideKind::High.time_path(), "environment.tide.timeHigh");
        assert_eq!(TideKind::Low.height_path(), "environment.tide.heightLow");
        assert_eq!(TideKind::Low.time_path(), "environment.tide.timeLow");
    }
}
