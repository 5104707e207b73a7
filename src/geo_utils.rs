//! Geographic utilities: geodesic distance, interpolation and bounds.
//!
//! Two distance notions coexist here. [`geodesic_distance`] is the ellipsoidal
//! distance used to decide how densely a route is sampled. The planar helpers
//! treat degrees as a flat grid scaled by [`METERS_PER_DEGREE`]; sensor radius
//! queries and segment matching are defined in those units.

use geo::{Distance, Geodesic, Point};

use crate::error::{CongestionError, OptionExt, Result};
use crate::{BoundingBox, GpsPoint};

/// Approximate meters per degree used for all planar conversions.
pub const METERS_PER_DEGREE: f64 = 111_139.0;

/// Geodesic (WGS84 ellipsoid) distance between two points in meters.
pub fn geodesic_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Geodesic::distance(point1, point2)
}

/// Convert a distance in meters to degrees with the flat approximation.
#[inline]
pub fn meters_to_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE
}

/// Euclidean distance in degree space, converted to meters.
pub fn planar_distance_meters(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let dlat = p1.latitude - p2.latitude;
    let dlng = p1.longitude - p2.longitude;
    (dlat * dlat + dlng * dlng).sqrt() * METERS_PER_DEGREE
}

/// Coordinate-wise midpoint of two points.
pub fn midpoint(p1: &GpsPoint, p2: &GpsPoint) -> GpsPoint {
    GpsPoint::new(
        (p1.latitude + p2.latitude) / 2.0,
        (p1.longitude + p2.longitude) / 2.0,
    )
}

/// Points to append after `p1` so that the gap to `p2` is filled.
///
/// When the points are at most `min_spacing_meters` apart this is just `[p2]`.
/// Otherwise `n = floor(distance / min_spacing)` points are placed at linear
/// parameters `1/n ..= n/n`, so `p1` is excluded and the last point is `p2`.
///
/// Fails if the spacing is not a positive finite number.
pub fn interpolate(p1: &GpsPoint, p2: &GpsPoint, min_spacing_meters: f64) -> Result<Vec<GpsPoint>> {
    check_spacing(min_spacing_meters)?;
    let distance = geodesic_distance(p1, p2);
    if distance.is_nan() || distance <= min_spacing_meters {
        return Ok(vec![*p2]);
    }

    let count = ((distance / min_spacing_meters).floor() as usize).max(1);
    let dlat = p2.latitude - p1.latitude;
    let dlng = p2.longitude - p1.longitude;

    let mut points: Vec<GpsPoint> = (1..count)
        .map(|i| {
            let t = i as f64 / count as f64;
            GpsPoint::new(p1.latitude + dlat * t, p1.longitude + dlng * t)
        })
        .collect();
    // Exact endpoint rather than p1 + delta * 1.0
    points.push(*p2);
    Ok(points)
}

pub(crate) fn check_spacing(min_spacing_meters: f64) -> Result<()> {
    if min_spacing_meters.is_finite() && min_spacing_meters > 0.0 {
        Ok(())
    } else {
        Err(CongestionError::invalid_input(
            "min_spacing_meters",
            format!("must be a positive number, got {}", min_spacing_meters),
        ))
    }
}

/// Bounding box of `points` expanded by `margin` degrees on every side.
pub fn bounding_box(points: &[GpsPoint], margin: f64) -> Result<BoundingBox> {
    let bounds = BoundingBox::from_points(points).ok_or_empty("bounding box needs route points")?;
    Ok(bounds.expand(margin))
}
