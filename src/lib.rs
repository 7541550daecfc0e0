//! # Watch Sync
//!
//! Turns watch-exported fitness files into uploadable activities.
//!
//! This library provides:
//! - Merging of the watch's independently sampled GPS and sensor streams
//! - Synthesis of plausible GPS coverage where the watch had no satellite fix
//! - GPX 1.1 encoding with heart-rate/cadence track-point extensions
//! - A durable ledger of activities already uploaded to the fitness platform
//!
//! ## Features
//!
//! - **`persistence`** - SQLite-backed key-value store for the sync ledger (default)
//! - **`parallel`** - Parallel parse/encode when preparing a batch, using rayon
//! - **`http`** - Mapbox directions and Strava upload/list clients
//! - **`cli`** - The `watch-sync` command-line tool
//!
//! ## Quick Start
//!
//! ```rust
//! use watch_sync::raw::{DetailSample, GpsSample, RawFile};
//! use watch_sync::{gpx, reconcile, SportType, SyncConfig};
//!
//! let raw = RawFile {
//!     gps_samples: vec![GpsSample { timestamp: 1635700800, latitude: 60.1699, longitude: 24.9384, speed: 10.0 }],
//!     detail_samples: vec![DetailSample { timestamp: 1635700800, elevation: 500.0, cadence: 80.0, heart_rate: 150.0, pace: 5.0 }],
//!     start_time: 1635700800,
//!     total_time: 3600,
//!     sport_type_code: 13,
//!     total_distance: 10000.0,
//!     avg_speed: 360.0,
//!     avg_heart_rate: 150.0,
//!     avg_cadence: 80.0,
//! };
//!
//! let activity = reconcile::parse_activity(&raw, &SyncConfig::default()).unwrap();
//! assert_eq!(activity.sport_type, SportType::Running);
//!
//! let xml = gpx::encode(&activity, &SyncConfig::default()).unwrap();
//! assert!(xml.contains("<trkpt"));
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, SyncError};

// Tunables
pub mod config;
pub use config::{BoundsConfig, LeadInConfig, SyncConfig};

// Geographic utilities (distance, bounds, bearing)
pub mod geo_utils;

// Watch file model
pub mod raw;
pub use raw::{DetailSample, GpsSample, RawFile};

// Merge of GPS and detail streams
pub mod reconcile;
pub use reconcile::{parse_activity, parse_activity_with_id};

// Collaborator contracts (directions, upload, remote list, key-value store)
pub mod providers;
pub use providers::{
    ActivityListProvider, DirectionsProvider, KeyValueStore, RemoteActivity, UploadProvider,
    UploadRequest,
};

// Missing-GPS lead-in synthesis
pub mod synthesis;
pub use synthesis::{choose_heuristic, fill_missing_lead_in, synthesize_lead_in, LeadInHeuristic};

// Start-point re-anchoring
pub mod reanchor;
pub use reanchor::{reanchor, ReanchorSession};

// GPX document encoding/decoding
pub mod gpx;

// Key-value stores for the ledger
pub mod store;
pub use store::MemoryStore;
#[cfg(feature = "persistence")]
pub use store::SqliteStore;

// Synced-activity ledger
pub mod ledger;
pub use ledger::SyncLedger;

// Upload orchestration
pub mod sync;
pub use sync::{upload_activities, upload_activity, BatchReport, UploadOutcome};

// HTTP adapters for Mapbox and Strava
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{MapboxDirections, StravaClient};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// `(0, 0)` is the sentinel for "no fix" and is skipped by distance totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// True for the `(0, 0)` "no coordinate" sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// A reconciled or synthesized point of an activity route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Elevation in meters
    pub elevation: f64,
    /// Heart rate in bpm
    pub heart_rate: f64,
    /// Cadence in steps per minute
    pub cadence: f64,
}

impl Waypoint {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Sport type resolved from the watch's numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SportType {
    Walking,
    Biking,
    Running,
    Other,
}

impl SportType {
    /// Resolve a watch sport code. Unknown codes map to `Other`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => SportType::Walking,
            3 => SportType::Biking,
            13 => SportType::Running,
            _ => SportType::Other,
        }
    }

    /// Track type string written to GPX.
    pub fn as_str(&self) -> &'static str {
        match self {
            SportType::Walking => "walking",
            SportType::Biking => "biking",
            SportType::Running => "running",
            SportType::Other => "Other",
        }
    }

    /// Inverse of [`SportType::as_str`]; anything unrecognised is `Other`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "walking" => SportType::Walking,
            "biking" => SportType::Biking,
            "running" => SportType::Running,
            _ => SportType::Other,
        }
    }

    /// Display name used for the uploaded activity and GPX metadata.
    pub fn activity_name(&self) -> &'static str {
        match self {
            SportType::Walking => "Walk",
            SportType::Biking => "Ride",
            SportType::Running => "Run",
            SportType::Other => "Workout",
        }
    }

    /// Strava `activity_type` upload parameter.
    pub fn strava_activity_type(&self) -> &'static str {
        match self {
            SportType::Walking => "walk",
            SportType::Biking => "ride",
            SportType::Running => "run",
            SportType::Other => "workout",
        }
    }
}

impl std::fmt::Display for SportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map framing for a set of waypoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub latitude_delta: f64,
    pub longitude_delta: f64,
    pub center_latitude: f64,
    pub center_longitude: f64,
}

/// Canonical activity produced by reconciling a watch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Identifier used by the sync ledger (empty until assigned)
    pub id: String,
    /// Unix timestamp in milliseconds
    pub start_time: i64,
    /// Total time in seconds
    pub total_time: u32,
    pub sport_type: SportType,
    /// Distance in meters
    pub total_distance: f64,
    /// Average pace in seconds per kilometre, as exported by the watch
    pub avg_speed: f64,
    pub avg_heart_rate: f64,
    /// Average raw cadence (twice the steps per minute)
    pub avg_cadence: f64,
    /// Chronological route, synthetic lead-in first
    pub waypoints: Vec<Waypoint>,
    /// Current start of the route (moves when re-anchored)
    pub start_point: GpsPoint,
    /// First GPS sample of the file; never changes
    pub first_fix: GpsPoint,
    /// Timestamp of the first GPS sample in milliseconds
    pub start_time_gps: i64,
    /// Mean heart rate while the watch had no GPS fix
    pub avg_heart_rate_during_gap: f64,
    /// Number of leading waypoints that are synthetic
    pub lead_in_points: usize,
    pub is_synced: bool,
}

impl ActivityRecord {
    /// Waypoints that came from the watch (synthetic lead-in excluded).
    pub fn recorded_waypoints(&self) -> &[Waypoint] {
        &self.waypoints[self.lead_in_points.min(self.waypoints.len())..]
    }

    /// Recompute `total_distance` from the current waypoints.
    pub fn recalculate_distance(&mut self) {
        self.total_distance = geo_utils::total_distance(&self.waypoints);
    }

    pub fn bounding_box(&self, config: &BoundsConfig) -> Option<BoundingBox> {
        geo_utils::bounding_box(&self.waypoints, config)
    }

    /// Mark as uploaded. There is no way back to unsynced.
    pub fn mark_synced(&mut self) {
        self.is_synced = true;
    }
}

// ============================================================================
// Tests
// ============================================================================
