//! # Tide Station Directory
//!
//! Station-based sources need the reference station closest to the vessel.
//! The directory of NOAA tide-prediction stations is large and rarely
//! changes, so it is downloaded once and kept in a cache file next to the
//! host configuration.
//!
//! ## Caching Strategy
//! - **Location**: `<config_path>/noaastations.json`
//! - **Written**: only after a successful download (cache miss)
//! - **Read**: on every process start; a missing, corrupt or empty file counts
//!   as a miss
//! - **Write failures**: logged and ignored, the freshly downloaded directory
//!   is still used

use crate::tide_data::{get_bytes, TideError};
use crate::Coordinate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// Cache file name inside the host's configuration directory
pub const CACHE_FILE_NAME: &str = "noaastations.json";

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A tide-prediction station as listed by the upstream directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    /// Station whose harmonic constants back this station's predictions
    pub reference_id: String,
    pub name: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl Station {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// On-disk and on-the-wire shape of the directory.
#[derive(Debug, Deserialize)]
struct StationList {
    stations: Vec<Station>,
}

/// Immutable, ordered list of stations.
#[derive(Clone, Debug, Default)]
pub struct StationDirectory {
    stations: Vec<Station>,
}

impl StationDirectory {
    pub fn from_stations(stations: Vec<Station>) -> Self {
        StationDirectory { stations }
    }

    /// Load the directory from the cache file, downloading it on a miss.
    ///
    /// Fails with [`TideError::DirectoryUnavailable`] only when the cache is
    /// unusable and the download fails too.
    pub async fn load(client: &Client, url: &str, cache: &Path) -> Result<Self, TideError> {
        match load_cache(cache).await {
            Ok(list) => {
                info!(
                    path = %cache.display(),
                    stations = list.stations.len(),
                    "loaded cached tide stations"
                );
                return Ok(StationDirectory::from_stations(list.stations));
            }
            Err(err) => debug!(path = %cache.display(), error = %err, "station cache miss"),
        }

        info!(url, "downloading tide stations");
        let body = get_bytes(client.get(url))
            .await
            .map_err(|err| TideError::DirectoryUnavailable(err.to_string()))?;
        let list: StationList = serde_json::from_slice(&body)
            .map_err(|err| TideError::DirectoryUnavailable(err.to_string()))?;

        if let Err(err) = save_cache(cache, &body).await {
            warn!(path = %cache.display(), error = %err, "could not write station cache");
        }

        Ok(StationDirectory::from_stations(list.stations))
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// The station closest to `position`; the first loaded wins a tie.
    pub fn nearest_to(&self, position: Coordinate) -> Result<&Station, TideError> {
        let mut best: Option<(&Station, f64)> = None;
        for station in &self.stations {
            let distance = distance_meters(position, station.coordinate());
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((station, distance)),
            }
        }
        best.map(|(station, _)| station)
            .ok_or(TideError::EmptyDirectory)
    }

    /// Up to `limit` stations with their distance in meters, closest first.
    pub fn near(&self, position: Coordinate, limit: usize) -> Vec<(&Station, f64)> {
        let mut ranked: Vec<_> = self
            .stations
            .iter()
            .map(|station| (station, distance_meters(position, station.coordinate())))
            .collect();
        // Stable sort keeps directory order among equal distances
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.truncate(limit);
        ranked
    }
}

/// Great-circle distance between two positions (haversine), in meters.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}

async fn load_cache(path: &Path) -> Result<StationList, io::Error> {
    let data = tokio::fs::read(path).await?;
    let list: StationList = serde_json::from_slice(&data)?;
    if list.stations.is_empty() {
        return Err(io::Error::other("cached directory is empty"));
    }
    Ok(list)
}

/// Store the directory exactly as downloaded.
async fn save_cache(path: &Path, body: &[u8]) -> Result<(), io::Error> {
    tokio::fs::write(path, body).await
}
