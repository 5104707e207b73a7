//! Route segment severity.
//!
//! Each pair of consecutive densified route points is colored by the sensor
//! prediction nearest to the pair's midpoint. Distances here use the flat
//! 111,139 m/degree conversion, matching the sensor radius queries.
//!
//! The nearest-sensor search is a linear scan over the request's predictions
//! (a few hundred at most per route). If that grows, an R-tree over the
//! predictions is the natural replacement.

use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::geo_utils::{midpoint, planar_distance_meters};
use crate::model::SensorPrediction;
use crate::GpsPoint;

/// Default distance beyond which a segment has no associated sensor.
pub const DEFAULT_SEGMENT_DISTANCE_CAP_METERS: f64 = 1000.0;

/// Upper bounds (inclusive) of the low, moderate and high classes.
pub const SEVERITY_THRESHOLDS: [f64; 3] = [0.2, 0.3, 0.5];

/// Congestion class of a load value or route segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityClass {
    Unknown,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl SeverityClass {
    pub fn from_load(load: f64) -> Self {
        if load <= SEVERITY_THRESHOLDS[0] {
            SeverityClass::Low
        } else if load <= SEVERITY_THRESHOLDS[1] {
            SeverityClass::Moderate
        } else if load <= SEVERITY_THRESHOLDS[2] {
            SeverityClass::High
        } else {
            SeverityClass::VeryHigh
        }
    }

    /// Map color used by the renderer.
    pub fn color(self) -> &'static str {
        match self {
            SeverityClass::Unknown => "gray",
            SeverityClass::Low => "green",
            SeverityClass::Moderate => "gold",
            SeverityClass::High => "orange",
            SeverityClass::VeryHigh => "red",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SeverityClass::Unknown => "unknown",
            SeverityClass::Low => "low",
            SeverityClass::Moderate => "moderate",
            SeverityClass::High => "high",
            SeverityClass::VeryHigh => "very-high",
        }
    }
}

/// Two consecutive route points and their severity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteSegment {
    pub start: GpsPoint,
    pub end: GpsPoint,
    pub severity_class: SeverityClass,
}

/// Severity of a segment given its nearest prediction as
/// `(distance_meters, predicted_load)`.
///
/// A sensor at or beyond the cap does not count.
pub fn segment_severity(nearest: Option<(f64, f64)>, cap_meters: f64) -> SeverityClass {
    match nearest {
        Some((distance, load)) if distance < cap_meters => SeverityClass::from_load(load),
        _ => SeverityClass::Unknown,
    }
}

/// Nearest prediction to `point` as `(distance_meters, predicted_load)`.
/// Ties keep the earlier prediction.
pub fn nearest_prediction(point: &GpsPoint, predictions: &[SensorPrediction]) -> Option<(f64, f64)> {
    let mut best: Option<(f64, f64)> = None;
    for prediction in predictions {
        let distance = planar_distance_meters(point, &prediction.sensor.location);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, prediction.predicted_load));
        }
    }
    best
}

fn score_pair(
    start: &GpsPoint,
    end: &GpsPoint,
    predictions: &[SensorPrediction],
    cap_meters: f64,
) -> RouteSegment {
    let nearest = nearest_prediction(&midpoint(start, end), predictions);
    RouteSegment {
        start: *start,
        end: *end,
        severity_class: segment_severity(nearest, cap_meters),
    }
}

/// Score every consecutive pair of route points.
#[cfg(not(feature = "parallel"))]
pub fn score_segments(
    route: &[GpsPoint],
    predictions: &[SensorPrediction],
    cap_meters: f64,
) -> Vec<RouteSegment> {
    route
        .windows(2)
        .map(|pair| score_pair(&pair[0], &pair[1], predictions, cap_meters))
        .collect()
}

/// Score every consecutive pair of route points.
#[cfg(feature = "parallel")]
pub fn score_segments(
    route: &[GpsPoint],
    predictions: &[SensorPrediction],
    cap_meters: f64,
) -> Vec<RouteSegment> {
    route
        .par_windows(2)
        .map(|pair| score_pair(&pair[0], &pair[1], predictions, cap_meters))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SeverityGroup;
    use crate::sensors::SensorPoint;

    fn prediction(id: &str, lat: f64, lng: f64, load: f64) -> SensorPrediction {
        SensorPrediction {
            sensor: SensorPoint::new(id, id, GpsPoint::new(lat, lng)),
            historical_mean_load: 0.1,
            group: SeverityGroup::Group1,
            predicted_load: load,
        }
    }

    #[test]
    fn test_severity_thresholds() {
        assert_eq!(SeverityClass::from_load(0.0), SeverityClass::Low);
        assert_eq!(SeverityClass::from_load(0.2), SeverityClass::Low);
        assert_eq!(SeverityClass::from_load(0.21), SeverityClass::Moderate);
        assert_eq!(SeverityClass::from_load(0.3), SeverityClass::Moderate);
        assert_eq!(SeverityClass::from_load(0.5), SeverityClass::High);
        assert_eq!(SeverityClass::from_load(0.51), SeverityClass::VeryHigh);
        assert_eq!(SeverityClass::VeryHigh.color(), "red");
        assert_eq!(SeverityClass::Unknown.color(), "gray");
    }

    #[test]
    fn test_distance_cap_boundary() {
        assert_eq!(segment_severity(Some((1000.0, 0.1)), 1000.0), SeverityClass::Unknown);
        assert_eq!(segment_severity(Some((999.0, 0.1)), 1000.0), SeverityClass::Low);
        assert_eq!(segment_severity(Some((999.0, 0.45)), 1000.0), SeverityClass::High);
        assert_eq!(segment_severity(None, 1000.0), SeverityClass::Unknown);
    }

    #[test]
    fn test_nearest_prediction_picks_closest() {
        let predictions = vec![
            prediction("far", 40.01, -3.0, 0.6),
            prediction("near", 40.001, -3.0, 0.25),
        ];
        let (distance, load) = nearest_prediction(&GpsPoint::new(40.0, -3.0), &predictions).unwrap();
        assert!((distance - 111.139).abs() < 1e-6);
        assert_eq!(load, 0.25);
        assert!(nearest_prediction(&GpsPoint::new(40.0, -3.0), &[]).is_none());
    }

    #[test]
    fn test_score_segments() {
        let route = vec![
            GpsPoint::new(40.000, -3.0),
            GpsPoint::new(40.001, -3.0),
            GpsPoint::new(40.002, -3.0),
            GpsPoint::new(40.020, -3.0),
        ];
        let predictions = vec![prediction("a", 40.001, -3.0001, 0.15)];
        let segments = score_segments(&route, &predictions, 1000.0);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, route[0]);
        assert_eq!(segments[2].end, route[3]);
        assert_eq!(segments[0].severity_class, SeverityClass::Low);
        assert_eq!(segments[1].severity_class, SeverityClass::Low);
        // Midpoint at 40.011 is ~1111m from the sensor
        assert_eq!(segments[2].severity_class, SeverityClass::Unknown);
    }

    #[test]
    fn test_score_segments_without_predictions() {
        let route = vec![GpsPoint::new(40.0, -3.0), GpsPoint::new(40.001, -3.0)];
        let segments = score_segments(&route, &[], 1000.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].severity_class, SeverityClass::Unknown);
        assert!(score_segments(&route[..1], &[], 1000.0).is_empty());
    }
}
