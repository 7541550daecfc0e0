//! Synthetic GPS coverage for periods without a satellite fix.
//!
//! The directions service returns geometry only, so timestamps are inferred
//! from segment length and the activity's average pace. The result is an
//! approximation of where the athlete probably was, not ground truth.
//!
//! Two entry points:
//! - [`synthesize_lead_in`]: route from a chosen start to the first fix
//!   (used when re-anchoring).
//! - [`fill_missing_lead_in`]: parse-time fill of the window between the
//!   activity start and the first fix, choosing the route start with a
//!   loop or linear heuristic.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result, SyncError};
use crate::geo_utils::{destination, haversine_distance, initial_bearing, segment_distances, total_distance};
use crate::providers::DirectionsProvider;
use crate::{ActivityRecord, GpsPoint, LeadInConfig, SyncConfig, Waypoint};

/// How to guess where the athlete was before the first fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadInHeuristic {
    /// Route ends near where it started: assume the athlete also started
    /// from the finish point.
    Loop,
    /// Extrapolate backwards along the initial heading.
    Linear,
}

/// Start-to-end distance over recorded route length, `None` without movement.
pub fn loop_ratio(activity: &ActivityRecord) -> Option<f64> {
    let recorded: Vec<Waypoint> = activity
        .recorded_waypoints()
        .iter()
        .copied()
        .filter(|w| !w.point().is_sentinel())
        .collect();

    let (first, last) = (recorded.first()?, recorded.last()?);
    let length = total_distance(&recorded);
    if length <= 0.0 {
        return None;
    }
    Some(haversine_distance(&first.point(), &last.point()) / length)
}

/// Pick a heuristic by comparing [`loop_ratio`] with the configured threshold.
///
/// A forced `config.heuristic` wins. A route without movement counts as a loop.
pub fn choose_heuristic(activity: &ActivityRecord, config: &LeadInConfig) -> LeadInHeuristic {
    if let Some(forced) = config.heuristic {
        return forced;
    }
    match loop_ratio(activity) {
        Some(ratio) if ratio > config.loop_ratio_threshold => LeadInHeuristic::Linear,
        _ => LeadInHeuristic::Loop,
    }
}

/// Average pace in seconds per kilometre.
///
/// Falls back to total time over total distance when the file has no pace.
pub fn pace_secs_per_km(activity: &ActivityRecord) -> Option<f64> {
    if activity.avg_speed.is_finite() && activity.avg_speed > 0.0 {
        return Some(activity.avg_speed);
    }
    if activity.total_distance > 0.0 && activity.total_time > 0 {
        return Some(activity.total_time as f64 / (activity.total_distance / 1000.0));
    }
    None
}

/// Waypoints covering a walk from `new_start` to the activity's first fix,
/// timed to arrive exactly when the first fix was recorded.
///
/// Fails with [`SyncError::RouteSynthesis`] if the directions call fails,
/// times out or returns no path, or the activity has no usable pace.
pub async fn synthesize_lead_in(
    activity: &ActivityRecord,
    new_start: GpsPoint,
    directions: &dyn DirectionsProvider,
    config: &SyncConfig,
) -> Result<Vec<Waypoint>> {
    let pace = pace_secs_per_km(activity).ok_or_route("activity has no usable average pace")?;
    let route = fetch_route(directions, new_start, activity.first_fix, config).await?;

    let lead_in = build_lead_in(activity, &route, pace, None);
    debug!(
        "[Synthesis] {} lead-in waypoints from {} route points",
        lead_in.len(),
        route.len()
    );
    Ok(lead_in)
}

/// Fill the window between the activity start and its first recorded
/// waypoint with a synthesized route.
///
/// Returns a new record; the input is never modified. When the window is
/// shorter than `min_lead_in_secs` or there is no recorded route to anchor
/// on, an unchanged copy is returned.
pub async fn fill_missing_lead_in(
    activity: &ActivityRecord,
    directions: &dyn DirectionsProvider,
    config: &SyncConfig,
) -> Result<ActivityRecord> {
    let recorded = activity.recorded_waypoints();
    let Some(first_recorded) = recorded.first() else {
        debug!("[Synthesis] No recorded waypoints, nothing to anchor a lead-in on");
        return Ok(activity.clone());
    };

    let window_secs = (first_recorded.timestamp - activity.start_time) as f64 / 1000.0;
    if window_secs < config.lead_in.min_lead_in_secs {
        debug!("[Synthesis] Lead-in window {:.1}s too short, skipping", window_secs);
        return Ok(activity.clone());
    }

    let pace = pace_secs_per_km(activity).ok_or_route("activity has no usable average pace")?;
    let budget_m = (window_secs / pace * 1000.0).min(config.lead_in.max_lead_in_meters);

    let heuristic = choose_heuristic(activity, &config.lead_in);
    let anchor = match heuristic {
        LeadInHeuristic::Loop => loop_anchor(recorded),
        LeadInHeuristic::Linear => linear_anchor(activity, budget_m, &config.lead_in).unwrap_or_else(|| {
            debug!("[Synthesis] No initial heading available, using loop anchor");
            loop_anchor(recorded)
        }),
    };

    info!(
        "[Synthesis] Filling {:.0}s lead-in ({:.0}m budget) with {:?} heuristic from ({:.5}, {:.5})",
        window_secs, budget_m, heuristic, anchor.latitude, anchor.longitude
    );

    let route = fetch_route(directions, anchor, activity.first_fix, config).await?;
    let route = trim_to_budget(&route, budget_m);
    let lead_in = build_lead_in(activity, &route, pace, Some(activity.start_time));

    let mut filled = activity.clone();
    filled.start_point = lead_in.first().map(Waypoint::point).unwrap_or(activity.first_fix);
    filled.lead_in_points = lead_in.len();
    filled.waypoints = lead_in;
    filled.waypoints.extend_from_slice(recorded);
    filled.recalculate_distance();
    Ok(filled)
}

fn loop_anchor(recorded: &[Waypoint]) -> GpsPoint {
    // recorded is non-empty at every call site
    recorded[recorded.len() - 1].point()
}

/// Point `budget_m` behind the first fix, opposite the initial heading.
fn linear_anchor(activity: &ActivityRecord, budget_m: f64, config: &LeadInConfig) -> Option<GpsPoint> {
    let origin = activity.first_fix;
    let ahead = activity
        .recorded_waypoints()
        .iter()
        .map(Waypoint::point)
        .filter(|p| !p.is_sentinel())
        .find(|p| haversine_distance(&origin, p) >= config.heading_sample_meters)?;

    let heading = initial_bearing(&origin, &ahead);
    let back = (heading + 180.0).rem_euclid(360.0);
    Some(destination(&origin, back, budget_m))
}

async fn fetch_route(
    directions: &dyn DirectionsProvider,
    start: GpsPoint,
    end: GpsPoint,
    config: &SyncConfig,
) -> Result<Vec<GpsPoint>> {
    let timeout = config.route_timeout();
    let coords = tokio::time::timeout(timeout, directions.route(start, end))
        .await
        .map_err(|_| SyncError::route(format!("directions request timed out after {:?}", timeout)))?
        .map_err(|e| match e {
            SyncError::RouteSynthesis { .. } => e,
            other => SyncError::route(other.to_string()),
        })?;

    let route: Vec<GpsPoint> = coords
        .iter()
        .map(|c| GpsPoint::new(c[1], c[0]))
        .filter(GpsPoint::is_valid)
        .collect();

    if route.len() < coords.len() {
        warn!(
            "[Synthesis] Dropped {} invalid coordinates from directions response",
            coords.len() - route.len()
        );
    }
    if route.is_empty() {
        return Err(SyncError::route("directions returned no path"));
    }
    Ok(route)
}

/// Keep the part of `route` nearest its end whose length fits the budget.
fn trim_to_budget(route: &[GpsPoint], budget_m: f64) -> Vec<GpsPoint> {
    let distances = segment_distances(route);
    let mut from_end = 0.0;
    let mut keep_from = route.len().saturating_sub(1);

    for i in (1..route.len()).rev() {
        from_end += distances[i];
        if from_end > budget_m {
            break;
        }
        keep_from = i - 1;
    }
    route[keep_from..].to_vec()
}

/// Time a route so that its last point lands on `start_time_gps`.
///
/// Points at or after the first recorded waypoint, before `not_before`,
/// or repeating the previous timestamp are dropped.
fn build_lead_in(
    activity: &ActivityRecord,
    route: &[GpsPoint],
    pace_secs_per_km: f64,
    not_before: Option<i64>,
) -> Vec<Waypoint> {
    let distances = segment_distances(route);
    let total: f64 = distances.iter().sum();
    // meters * (s/km) / 1000 = seconds; * 1000 for ms
    let ms_per_meter = pace_secs_per_km;
    let mut clock = activity.start_time_gps as f64 - total * ms_per_meter;

    let cutoff = activity
        .recorded_waypoints()
        .first()
        .map(|w| w.timestamp)
        .unwrap_or(i64::MAX);

    let mut lead_in: Vec<Waypoint> = Vec::with_capacity(route.len());
    for (point, distance) in route.iter().zip(&distances) {
        clock += distance * ms_per_meter;
        let timestamp = clock.round() as i64;

        if timestamp >= cutoff || not_before.is_some_and(|t| timestamp < t) {
            continue;
        }
        if lead_in.last().is_some_and(|w| w.timestamp >= timestamp) {
            continue;
        }

        lead_in.push(Waypoint {
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp,
            elevation: 0.0,
            heart_rate: activity.avg_heart_rate_during_gap,
            cadence: activity.avg_cadence / 2.0,
        });
    }
    lead_in
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{EmptyDirections, FailingDirections, LineDirections, SlowDirections};
    use crate::SportType;
    use std::time::Duration;

    const T0: i64 = 1_635_700_800_000;

    fn wp(lat: f64, lon: f64, timestamp: i64) -> Waypoint {
        Waypoint {
            latitude: lat,
            longitude: lon,
            timestamp,
            elevation: 10.0,
            heart_rate: 150.0,
            cadence: 80.0,
        }
    }

    /// Straight run north from (60.0, 24.0), one point every 10 s / ~11 m,
    /// first fix 120 s after the nominal start.
    fn straight_activity() -> ActivityRecord {
        let waypoints: Vec<Waypoint> = (0..60)
            .map(|i| wp(60.0 + i as f64 * 1e-4, 24.0, T0 + 120_000 + i * 10_000))
            .collect();
        activity_from(waypoints)
    }

    /// Square loop ending ~11 m from where it began.
    fn loop_activity() -> ActivityRecord {
        let corners = [(60.0, 24.0), (60.005, 24.0), (60.005, 24.01), (60.0, 24.01), (60.0001, 24.0)];
        let mut waypoints = Vec::new();
        let mut t = T0 + 120_000;
        for pair in corners.windows(2) {
            for s in 0..10 {
                let f = s as f64 / 10.0;
                waypoints.push(wp(
                    pair[0].0 + (pair[1].0 - pair[0].0) * f,
                    pair[0].1 + (pair[1].1 - pair[0].1) * f,
                    t,
                ));
                t += 10_000;
            }
        }
        waypoints.push(wp(60.0001, 24.0, t));
        activity_from(waypoints)
    }

    fn activity_from(waypoints: Vec<Waypoint>) -> ActivityRecord {
        let first = waypoints[0];
        ActivityRecord {
            id: "a1".to_string(),
            start_time: T0,
            total_time: 3600,
            sport_type: SportType::Running,
            total_distance: total_distance(&waypoints),
            avg_speed: 360.0, // 6:00 /km
            avg_heart_rate: 150.0,
            avg_cadence: 160.0,
            start_point: first.point(),
            first_fix: first.point(),
            start_time_gps: first.timestamp,
            avg_heart_rate_during_gap: 130.0,
            lead_in_points: 0,
            is_synced: false,
            waypoints,
        }
    }

    fn strictly_increasing(waypoints: &[Waypoint]) -> bool {
        waypoints.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
    }

    #[tokio::test]
    async fn test_lead_in_timing_and_values() {
        let activity = straight_activity();
        // ~1113 m south of the first fix
        let new_start = GpsPoint::new(59.99, 24.0);
        let lead_in = synthesize_lead_in(&activity, new_start, &LineDirections { steps: 10 }, &SyncConfig::default())
            .await
            .unwrap();

        // last route point coincides with the first fix and is dropped
        assert_eq!(lead_in.len(), 10);
        assert_eq!(lead_in[0].point(), new_start);
        assert!(strictly_increasing(&lead_in));
        assert!(lead_in.last().unwrap().timestamp < activity.start_time_gps);

        let distance = haversine_distance(&new_start, &activity.first_fix);
        let expected_start = activity.start_time_gps as f64 - distance * 360.0;
        assert!((lead_in[0].timestamp as f64 - expected_start).abs() <= 1.0);

        for w in &lead_in {
            assert_eq!(w.elevation, 0.0);
            assert_eq!(w.heart_rate, 130.0);
            assert_eq!(w.cadence, 80.0);
        }
    }

    #[tokio::test]
    async fn test_lead_in_directions_failure() {
        let activity = straight_activity();
        let result = synthesize_lead_in(
            &activity,
            GpsPoint::new(59.99, 24.0),
            &FailingDirections,
            &SyncConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(SyncError::RouteSynthesis { .. })));
    }

    #[tokio::test]
    async fn test_lead_in_empty_route() {
        let activity = straight_activity();
        let result =
            synthesize_lead_in(&activity, GpsPoint::new(59.99, 24.0), &EmptyDirections, &SyncConfig::default()).await;
        assert!(matches!(result, Err(SyncError::RouteSynthesis { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lead_in_timeout() {
        let activity = straight_activity();
        let slow = SlowDirections {
            delay: Duration::from_secs(60),
        };
        let result = synthesize_lead_in(&activity, GpsPoint::new(59.99, 24.0), &slow, &SyncConfig::default()).await;
        match result {
            Err(SyncError::RouteSynthesis { message }) => assert!(message.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lead_in_without_pace() {
        let mut activity = straight_activity();
        activity.avg_speed = 0.0;
        activity.total_distance = 0.0;
        let result = synthesize_lead_in(
            &activity,
            GpsPoint::new(59.99, 24.0),
            &LineDirections { steps: 4 },
            &SyncConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(SyncError::RouteSynthesis { .. })));
    }

    #[test]
    fn test_pace_fallback() {
        let mut activity = straight_activity();
        activity.avg_speed = 0.0;
        activity.total_time = 3000;
        activity.total_distance = 10_000.0;
        assert_eq!(pace_secs_per_km(&activity), Some(300.0));
    }

    #[test]
    fn test_choose_heuristic_by_ratio() {
        let config = LeadInConfig::default();
        assert_eq!(choose_heuristic(&loop_activity(), &config), LeadInHeuristic::Loop);
        assert_eq!(choose_heuristic(&straight_activity(), &config), LeadInHeuristic::Linear);

        // a zero threshold only accepts perfectly closed loops
        let strict = LeadInConfig {
            loop_ratio_threshold: 0.0,
            ..LeadInConfig::default()
        };
        assert_eq!(choose_heuristic(&loop_activity(), &strict), LeadInHeuristic::Linear);

        let forced = LeadInConfig {
            heuristic: Some(LeadInHeuristic::Linear),
            ..LeadInConfig::default()
        };
        assert_eq!(choose_heuristic(&loop_activity(), &forced), LeadInHeuristic::Linear);
    }

    #[test]
    fn test_trim_to_budget_keeps_tail() {
        let route: Vec<GpsPoint> = (0..=10).map(|i| GpsPoint::new(60.0 + i as f64 * 1e-3, 24.0)).collect();
        // each segment ~111 m; 300 m keeps the last two segments
        let trimmed = trim_to_budget(&route, 300.0);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed.last(), route.last());
        assert_eq!(trim_to_budget(&route, 1e9).len(), route.len());
        assert_eq!(trim_to_budget(&route, 0.0).len(), 1);
    }

    #[tokio::test]
    async fn test_fill_linear_extends_backwards() {
        let activity = straight_activity();
        let filled = fill_missing_lead_in(&activity, &LineDirections { steps: 20 }, &SyncConfig::default())
            .await
            .unwrap();

        assert!(filled.lead_in_points > 0);
        assert_eq!(filled.waypoints.len(), activity.waypoints.len() + filled.lead_in_points);
        assert!(strictly_increasing(&filled.waypoints));
        // south of the first fix, opposite the northward heading
        assert!(filled.start_point.latitude < activity.first_fix.latitude);
        // never before the nominal start
        assert!(filled.waypoints[0].timestamp >= activity.start_time);
        // 120 s at 6:00/km is a 333 m budget
        let lead_in_length = total_distance(&filled.waypoints[..=filled.lead_in_points]);
        assert!(lead_in_length <= 340.0);
        assert!(filled.total_distance > activity.total_distance);
        // input untouched
        assert_eq!(activity.lead_in_points, 0);
    }

    #[tokio::test]
    async fn test_fill_loop_starts_from_finish() {
        let activity = loop_activity();
        let config = SyncConfig {
            lead_in: LeadInConfig {
                heuristic: Some(LeadInHeuristic::Loop),
                ..LeadInConfig::default()
            },
            ..SyncConfig::default()
        };
        let filled = fill_missing_lead_in(&activity, &LineDirections { steps: 5 }, &config)
            .await
            .unwrap();

        // finish is ~11 m from the first fix: well inside the budget, so the
        // whole route is kept and the lead-in starts at the finish point
        let finish = activity.waypoints.last().unwrap().point();
        assert_eq!(filled.start_point, finish);
        assert!(strictly_increasing(&filled.waypoints));
    }

    #[tokio::test]
    async fn test_fill_skips_short_window() {
        let mut activity = straight_activity();
        activity.start_time = activity.waypoints[0].timestamp - 2_000;
        let filled = fill_missing_lead_in(&activity, &FailingDirections, &SyncConfig::default())
            .await
            .unwrap();
        assert_eq!(filled, activity);
    }

    #[tokio::test]
    async fn test_fill_replaces_previous_lead_in() {
        let activity = straight_activity();
        let directions = LineDirections { steps: 20 };
        let config = SyncConfig::default();

        let once = fill_missing_lead_in(&activity, &directions, &config).await.unwrap();
        let twice = fill_missing_lead_in(&once, &directions, &config).await.unwrap();
        assert_eq!(once.waypoints, twice.waypoints);
        assert_eq!(once.lead_in_points, twice.lead_in_points);
    }
}
