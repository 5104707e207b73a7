//! Route densification.
//!
//! Routing services return polylines whose vertices sit at turns and curves,
//! sometimes hundreds of meters apart. Sensor matching works point by point,
//! so the polyline is filled in until no gap exceeds the minimum spacing.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CongestionError, Result};
use crate::geo_utils::{check_spacing, interpolate};
use crate::GpsPoint;

/// Default minimum spacing between densified route points, in meters.
pub const DEFAULT_MIN_SPACING_METERS: f64 = 8.0;

/// What the routing collaborator handed back for an origin/destination pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawRoute {
    /// Ordered polyline vertices, origin first. May be empty.
    Coordinates { points: Vec<GpsPoint> },
    /// Explicit error payload from the routing service
    Failed {
        status_code: Option<u16>,
        message: String,
    },
}

impl RawRoute {
    pub fn from_points(points: Vec<GpsPoint>) -> Self {
        RawRoute::Coordinates { points }
    }

    pub fn failed(status_code: Option<u16>, message: impl Into<String>) -> Self {
        RawRoute::Failed {
            status_code,
            message: message.into(),
        }
    }
}

/// Densify a routing result, rejecting failures and empty routes.
pub fn densify_route(raw: &RawRoute, min_spacing_meters: f64) -> Result<Vec<GpsPoint>> {
    match raw {
        RawRoute::Failed {
            status_code,
            message,
        } => {
            warn!(
                "[RouteDensifier] Routing failed (status {:?}): {}",
                status_code, message
            );
            Err(CongestionError::RouteUnavailable {
                status_code: *status_code,
                message: message.clone(),
            })
        }
        RawRoute::Coordinates { points } if points.is_empty() => {
            Err(CongestionError::RouteUnavailable {
                status_code: None,
                message: "routing service returned no coordinates".to_string(),
            })
        }
        RawRoute::Coordinates { points } => densify(points, min_spacing_meters),
    }
}

/// Insert interpolated points between any two vertices farther apart than
/// `min_spacing_meters`.
///
/// All original vertices are kept in order, and coincident vertices are not
/// collapsed. The spacing must be a positive finite number.
pub fn densify(points: &[GpsPoint], min_spacing_meters: f64) -> Result<Vec<GpsPoint>> {
    check_spacing(min_spacing_meters)?;
    let Some(first) = points.first() else {
        return Ok(Vec::new());
    };

    let mut dense = Vec::with_capacity(points.len());
    dense.push(*first);
    for pair in points.windows(2) {
        dense.extend(interpolate(&pair[0], &pair[1], min_spacing_meters)?);
    }

    debug!(
        "[RouteDensifier] {} vertices -> {} points at {}m spacing",
        points.len(),
        dense.len(),
        min_spacing_meters
    );
    Ok(dense)
}
