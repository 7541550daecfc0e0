//! Watch export file model.
//!
//! A watch file carries two independently clocked streams, both ordered by
//! timestamp (Unix seconds) but neither contiguous nor co-sampled:
//! GPS fixes and per-second sensor details.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// A GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsSample {
    /// Unix timestamp in seconds
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: f64,
}

/// A sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailSample {
    /// Unix timestamp in seconds
    #[serde(rename = "timeStamp")]
    pub timestamp: i64,
    /// Elevation in decimeters
    #[serde(default)]
    pub elevation: f64,
    /// Raw cadence, twice the steps per minute
    #[serde(rename = "frequency", default)]
    pub cadence: f64,
    /// Heart rate in bpm, 0 when the sensor dropped out
    #[serde(default)]
    pub heart_rate: f64,
    #[serde(default)]
    pub pace: f64,
}

/// A complete watch export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFile {
    #[serde(rename = "gpsData", default)]
    pub gps_samples: Vec<GpsSample>,
    #[serde(rename = "detailData", default)]
    pub detail_samples: Vec<DetailSample>,
    /// Unix timestamp in seconds
    #[serde(default)]
    pub start_time: i64,
    /// Seconds
    #[serde(default)]
    pub total_time: u32,
    #[serde(rename = "sportType", default)]
    pub sport_type_code: u32,
    /// Meters
    #[serde(default)]
    pub total_distance: f64,
    /// Average pace in seconds per kilometre
    #[serde(default)]
    pub avg_speed: f64,
    #[serde(default)]
    pub avg_heart_rate: f64,
    /// Average raw cadence
    #[serde(rename = "avgFrequency", default)]
    pub avg_cadence: f64,
}

impl RawFile {
    /// Decode a watch export from its JSON text.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| SyncError::InvalidFile {
            path: String::new(),
            message: e.to_string(),
        })
    }

    /// Read and decode a watch export from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| SyncError::InvalidFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&content).map_err(|e| SyncError::InvalidFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
