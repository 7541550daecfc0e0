//! Merge of the watch's GPS and detail streams into canonical waypoints.
//!
//! Each detail sample adopts the first GPS fix (in stream order) whose
//! timestamp lies within the match tolerance. Detail samples without a fix
//! contribute no waypoint; their heart rate feeds the gap average that later
//! seeds synthetic lead-in points.

use log::{debug, info};

use crate::error::{OptionExt, Result, SyncError};
use crate::raw::{GpsSample, RawFile};
use crate::{ActivityRecord, GpsPoint, SportType, SyncConfig, Waypoint};

/// Parse a watch file into an activity with an empty id.
///
/// Fails with [`SyncError::MissingData`] when either stream is empty.
pub fn parse_activity(raw: &RawFile, config: &SyncConfig) -> Result<ActivityRecord> {
    let first = raw.gps_samples.first().copied().ok_or_missing_data()?;
    if raw.detail_samples.is_empty() {
        return Err(SyncError::missing_data());
    }
    let start_time = to_millis(raw.start_time, "startTime")?;
    let start_time_gps = to_millis(first.timestamp, "gpsData timeStamp")?;

    let tolerance = config.match_tolerance_secs;
    let ordered = raw.gps_samples.is_sorted_by_key(|g| g.timestamp)
        && raw.detail_samples.is_sorted_by_key(|d| d.timestamp);

    let mut window = GpsWindow::new(&raw.gps_samples, tolerance, ordered);
    let mut waypoints = Vec::with_capacity(raw.detail_samples.len());
    let mut gap_hr_sum = 0.0;
    let mut gap_hr_count = 0usize;

    for detail in &raw.detail_samples {
        let heart_rate = if detail.heart_rate != 0.0 {
            detail.heart_rate
        } else {
            raw.avg_heart_rate
        };

        match window.find(detail.timestamp) {
            Some(fix) => waypoints.push(Waypoint {
                latitude: fix.latitude,
                longitude: fix.longitude,
                timestamp: to_millis(detail.timestamp, "detailData timeStamp")?,
                elevation: detail.elevation / 10.0,
                heart_rate,
                cadence: detail.cadence / 2.0,
            }),
            None => {
                gap_hr_sum += heart_rate;
                gap_hr_count += 1;
            }
        }
    }

    if !ordered {
        waypoints.sort_by_key(|w| w.timestamp);
    }
    let before_dedup = waypoints.len();
    waypoints.dedup_by_key(|w| w.timestamp);
    if waypoints.len() < before_dedup {
        debug!(
            "[Reconcile] Dropped {} waypoints with duplicate timestamps",
            before_dedup - waypoints.len()
        );
    }

    let avg_heart_rate_during_gap = if gap_hr_count > 0 {
        gap_hr_sum / gap_hr_count as f64
    } else {
        0.0
    };

    let first_fix = GpsPoint::new(first.latitude, first.longitude);
    let sport_type = SportType::from_code(raw.sport_type_code);

    info!(
        "[Reconcile] {} waypoints from {} detail / {} GPS samples ({} without fix), sport={}",
        waypoints.len(),
        raw.detail_samples.len(),
        raw.gps_samples.len(),
        gap_hr_count,
        sport_type
    );

    Ok(ActivityRecord {
        id: String::new(),
        start_time,
        total_time: raw.total_time,
        sport_type,
        total_distance: raw.total_distance,
        avg_speed: raw.avg_speed,
        avg_heart_rate: raw.avg_heart_rate,
        avg_cadence: raw.avg_cadence,
        waypoints,
        start_point: first_fix,
        first_fix,
        start_time_gps,
        avg_heart_rate_during_gap,
        lead_in_points: 0,
        is_synced: false,
    })
}

/// Parse a watch file and assign the ledger id.
pub fn parse_activity_with_id(id: &str, raw: &RawFile, config: &SyncConfig) -> Result<ActivityRecord> {
    let mut activity = parse_activity(raw, config)?;
    activity.id = id.to_string();
    Ok(activity)
}

/// Unix seconds to milliseconds, rejecting timestamps that overflow.
fn to_millis(secs: i64, field: &str) -> Result<i64> {
    secs.checked_mul(1000).ok_or_else(|| SyncError::InvalidFile {
        path: String::new(),
        message: format!("{} out of range: {}", field, secs),
    })
}

/// Forward-only search window over the GPS stream.
///
/// With both streams sorted, the first fix in stream order within tolerance
/// of `t` is the first fix with `timestamp >= t - tolerance`, and that lower
/// edge only ever moves forward. Unsorted input falls back to a full scan.
struct GpsWindow<'a> {
    samples: &'a [GpsSample],
    tolerance: i64,
    sorted: bool,
    lo: usize,
}

impl<'a> GpsWindow<'a> {
    fn new(samples: &'a [GpsSample], tolerance: i64, sorted: bool) -> Self {
        Self {
            samples,
            tolerance,
            sorted,
            lo: 0,
        }
    }

    fn find(&mut self, t: i64) -> Option<&'a GpsSample> {
        if !self.sorted {
            return self
                .samples
                .iter()
                .find(|g| g.timestamp.abs_diff(t) <= self.tolerance.unsigned_abs());
        }

        let lower = t.saturating_sub(self.tolerance);
        while self.lo < self.samples.len() && self.samples[self.lo].timestamp < lower {
            self.lo += 1;
        }

        let candidate = self.samples.get(self.lo)?;
        (candidate.timestamp <= t.saturating_add(self.tolerance)).then_some(candidate)
    }
}
