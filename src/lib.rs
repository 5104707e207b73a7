//! # Route Congestion
//!
//! Per-segment traffic congestion estimates along a driving route.
//!
//! This library provides:
//! - Route densification with geodesic spacing
//! - Spatial matching of route points against a fixed sensor catalog
//! - Severity-group model dispatch for per-sensor load prediction
//! - Segment coloring and a route-level summary
//!
//! ## Features
//!
//! - **`parallel`** - Parallel sensor prediction and segment scoring with rayon
//! - **`http`** - Google Routes client for route and baseline lookups
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use route_congestion::{
//!     BaselineTravelTime, CongestionEstimator, ContextInput, EstimatorConfig, GpsPoint,
//!     HistoricalLoadCatalog, InMemoryModelLoader, ModelArtifact, ModelRegistry, RawRoute,
//!     SensorCatalog, SensorPoint, SeverityGroup,
//! };
//!
//! let sensors = SensorCatalog::new(vec![SensorPoint::new(
//!     "3400",
//!     "Paseo de la Castellana",
//!     GpsPoint::new(40.005, -3.0),
//! )])
//! .unwrap();
//! let loads = HistoricalLoadCatalog::from_entries([("3400".to_string(), 0.05)]).unwrap();
//! let models = InMemoryModelLoader::new().with_artifact(
//!     SeverityGroup::Group0,
//!     ModelArtifact::Linear { intercept: 0.15, coefficients: BTreeMap::new() },
//! );
//!
//! let estimator = CongestionEstimator::new(
//!     sensors,
//!     loads,
//!     ModelRegistry::new(models),
//!     EstimatorConfig::default(),
//! )
//! .unwrap();
//!
//! let route = RawRoute::from_points(vec![GpsPoint::new(40.0, -3.0), GpsPoint::new(40.01, -3.0)]);
//! let context = ContextInput::new("13:00", true, false).normalize().unwrap();
//! let estimate = estimator
//!     .estimate(&route, &context, BaselineTravelTime::NotRequested)
//!     .unwrap();
//!
//! println!("{} ({:?})", estimate.summary.severity.label(), estimate.summary.mean_load);
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{CongestionError, OptionExt, Result};

// Geographic utilities (geodesic distance, interpolation, bounds)
pub mod geo_utils;

// Route densification
pub mod densify;
pub use densify::{densify, densify_route, RawRoute};

// Sensor catalogs and spatial index
pub mod sensors;
pub use sensors::{CandidateSensors, HistoricalLoadCatalog, SensorCatalog, SensorIndex, SensorPoint};

// Request context normalization
pub mod context;
pub use context::{ContextInput, ContextVector, TimeOfDay, WeatherVariable};

// Severity groups and model registry
pub mod model;
pub use model::{
    predict_for_sensors, DirectoryModelLoader, FeatureRow, InMemoryModelLoader, ModelArtifact,
    ModelLoader, ModelRegistry, Regressor, SensorPrediction, SeverityGroup,
};

// Segment severity
pub mod scoring;
pub use scoring::{score_segments, RouteSegment, SeverityClass};

// Route-level summary
pub mod summary;
pub use summary::{summarize, BaselineTravelTime, RouteSummary};

// Pipeline context object
pub mod estimator;
pub use estimator::{CongestionEstimate, CongestionEstimator, EstimatorConfig};

// GeoJSON output for renderers
pub mod export;

// HTTP module for route and baseline lookups
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{RoutesClient, RoutesClientConfig, TravelMode};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_congestion::GpsPoint;
/// let point = GpsPoint::new(40.4168, -3.7038); // Madrid
/// ```
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
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Grow the box by `margin` degrees on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self {
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
            min_lng: self.min_lng - margin,
            max_lng: self.max_lng + margin,
        }
    }

    /// Whether `point` lies inside the box, edges included.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// Tests
// ============================================================================
