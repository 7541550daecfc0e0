//! Geographic utilities: distances, bounding boxes and headings.
//!
//! Pure functions, no I/O. Inputs are decimal degrees.

use geo::{Bearing, Destination, Haversine, Point};

use crate::{BoundingBox, BoundsConfig, GpsPoint, Waypoint};

/// Earth radius used for all distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = (p2.latitude - p1.latitude).to_radians();
    let d_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Total route distance in meters, skipping `(0, 0)` sentinel points.
pub fn total_distance(waypoints: &[Waypoint]) -> f64 {
    let valid: Vec<GpsPoint> = waypoints
        .iter()
        .map(Waypoint::point)
        .filter(|p| !p.is_sentinel())
        .collect();

    valid
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Distance of every polyline segment, aligned with the input: entry `i`
/// is the distance from point `i - 1` to point `i`, entry 0 is always 0.
pub fn segment_distances(points: &[GpsPoint]) -> Vec<f64> {
    let mut distances = Vec::with_capacity(points.len());
    if points.is_empty() {
        return distances;
    }
    distances.push(0.0);
    distances.extend(points.windows(2).map(|pair| haversine_distance(&pair[0], &pair[1])));
    distances
}

/// Bounding box for map framing.
///
/// Sentinel points are not filtered; callers drop them first if needed.
/// Returns `None` for an empty slice.
pub fn bounding_box(waypoints: &[Waypoint], config: &BoundsConfig) -> Option<BoundingBox> {
    if waypoints.is_empty() {
        return None;
    }

    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for w in waypoints {
        min_lat = min_lat.min(w.latitude);
        max_lat = max_lat.max(w.latitude);
        min_lng = min_lng.min(w.longitude);
        max_lng = max_lng.max(w.longitude);
    }

    Some(BoundingBox {
        latitude_delta: max_lat - min_lat + config.padding,
        longitude_delta: max_lng - min_lng + config.padding,
        center_latitude: (min_lat + max_lat) / 2.0 - config.latitude_bias,
        center_longitude: (min_lng + max_lng) / 2.0,
    })
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in [0, 360).
pub fn initial_bearing(from: &GpsPoint, to: &GpsPoint) -> f64 {
    let bearing = Haversine::bearing(to_geo(from), to_geo(to));
    bearing.rem_euclid(360.0)
}

/// Point reached by travelling `meters` from `from` along `bearing_deg`.
pub fn destination(from: &GpsPoint, bearing_deg: f64, meters: f64) -> GpsPoint {
    let p = Haversine::destination(to_geo(from), bearing_deg, meters);
    GpsPoint::new(p.y(), p.x())
}

fn to_geo(p: &GpsPoint) -> Point<f64> {
    Point::new(p.longitude, p.latitude)
}
