//! Geographic utilities: distances, track length and display simplification.

use geo::{algorithm::simplify::Simplify, Coord, LineString};

use crate::GpsPoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
///
/// # Example
/// ```
/// use trackview::GpsPoint;
/// use trackview::geo_utils::haversine_distance;
///
/// let bern = GpsPoint::new(46.9480, 7.4474);
/// let zurich = GpsPoint::new(47.3769, 8.5417);
/// let d = haversine_distance(&bern, &zurich);
/// assert!((d - 95_500.0).abs() < 1_500.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let dlat = (p2.latitude - p1.latitude).to_radians();
    let dlng = (p2.longitude - p1.longitude).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters. Invalid points are skipped.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    let valid: Vec<&GpsPoint> = points.iter().filter(|p| p.is_valid()).collect();
    valid
        .windows(2)
        .map(|pair| haversine_distance(pair[0], pair[1]))
        .sum()
}

/// Cumulative distance in kilometers at each point (first entry is 0).
///
/// Invalid points repeat the previous cumulative value so the output has
/// one entry per input point.
pub fn cumulative_distances_km(points: &[GpsPoint]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut total = 0.0;
    let mut last_valid: Option<&GpsPoint> = None;

    for p in points {
        if p.is_valid() {
            if let Some(prev) = last_valid {
                total += haversine_distance(prev, p) / 1000.0;
            }
            last_valid = Some(p);
        }
        out.push(total);
    }

    out
}

/// Simplify a track for display with Douglas-Peucker.
///
/// `tolerance` is in degrees (0.0001 ≈ 11 m). Tracks with fewer than three
/// valid points are returned as-is after dropping invalid points.
pub fn simplify_track(points: &[GpsPoint], tolerance: f64) -> Vec<GpsPoint> {
    let coords: Vec<Coord> = points
        .iter()
        .filter(|p| p.is_valid())
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect();

    if coords.len() < 3 {
        return coords.iter().map(|c| GpsPoint::new(c.y, c.x)).collect();
    }

    LineString::new(coords)
        .simplify(&tolerance)
        .0
        .iter()
        .map(|c| GpsPoint::new(c.y, c.x))
        .collect()
}
