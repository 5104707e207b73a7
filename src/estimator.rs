//! # Congestion Estimator
//!
//! The explicitly constructed context that owns the shared, read-only
//! resources (sensor index, historical loads, model registry) and runs the
//! estimation pipeline for one request at a time:
//!
//! 1. Densify the raw route polyline
//! 2. Narrow the sensor catalog to the route's bounding box
//! 3. Collect sensors within the search radius of any route point
//! 4. Classify each sensor into a severity group and predict its load
//! 5. Color every route segment by its nearest prediction
//! 6. Summarize the predictions
//!
//! Every request builds fresh result records; shared state is never mutated
//! apart from the registry's load-once model cache. The estimator is `Sync`
//! and can be shared across threads behind an `Arc`.

use log::info;
use serde::{Deserialize, Serialize};

use crate::context::ContextVector;
use crate::densify::{densify_route, RawRoute, DEFAULT_MIN_SPACING_METERS};
use crate::error::{CongestionError, Result};
use crate::geo_utils::bounding_box;
use crate::model::{predict_for_sensors, ModelRegistry, SensorPrediction};
use crate::scoring::{score_segments, RouteSegment, DEFAULT_SEGMENT_DISTANCE_CAP_METERS};
use crate::sensors::{
    HistoricalLoadCatalog, SensorCatalog, SensorIndex, DEFAULT_MAX_CANDIDATES,
    DEFAULT_SENSOR_RADIUS_METERS,
};
use crate::summary::{summarize, BaselineTravelTime, RouteSummary};
use crate::GpsPoint;

/// Configuration for the estimation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Maximum gap between densified route points.
    /// Default: 8.0 meters
    pub min_spacing_meters: f64,

    /// Margin added around the route's extremes before filtering sensors.
    /// Default: 0.01 degrees
    pub bbox_margin_degrees: f64,

    /// Cap on sensors kept from the bounding-box filter.
    /// Default: 1000
    pub max_candidate_sensors: usize,

    /// Radius searched around every route point for sensors.
    /// Default: 6.0 meters
    pub sensor_radius_meters: f64,

    /// Distance beyond which a segment gets no severity.
    /// Default: 1000.0 meters
    pub segment_distance_cap_meters: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_spacing_meters: DEFAULT_MIN_SPACING_METERS,
            bbox_margin_degrees: 0.01,
            max_candidate_sensors: DEFAULT_MAX_CANDIDATES,
            sensor_radius_meters: DEFAULT_SENSOR_RADIUS_METERS,
            segment_distance_cap_meters: DEFAULT_SEGMENT_DISTANCE_CAP_METERS,
        }
    }
}

impl EstimatorConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CongestionError::invalid_input("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("min_spacing_meters", self.min_spacing_meters),
            ("sensor_radius_meters", self.sensor_radius_meters),
            ("segment_distance_cap_meters", self.segment_distance_cap_meters),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(CongestionError::invalid_input(field, "must be a positive number"));
            }
        }
        if !(self.bbox_margin_degrees.is_finite() && self.bbox_margin_degrees >= 0.0) {
            return Err(CongestionError::invalid_input(
                "bbox_margin_degrees",
                "must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Everything the renderer needs for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionEstimate {
    /// Densified route, origin first
    pub route: Vec<GpsPoint>,
    /// Matched sensors with group and predicted load
    pub predictions: Vec<SensorPrediction>,
    pub segments: Vec<RouteSegment>,
    pub summary: RouteSummary,
}

/// Owns the shared catalogs and models and runs estimation requests.
pub struct CongestionEstimator {
    index: SensorIndex,
    loads: HistoricalLoadCatalog,
    registry: ModelRegistry,
    config: EstimatorConfig,
}

impl CongestionEstimator {
    /// Build the estimator, rejecting a config that fails
    /// [`EstimatorConfig::validate`].
    pub fn new(
        sensors: SensorCatalog,
        loads: HistoricalLoadCatalog,
        registry: ModelRegistry,
        config: EstimatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "[CongestionEstimator] Initialized with {} sensors, {} historical loads",
            sensors.len(),
            loads.len()
        );
        Ok(Self {
            index: SensorIndex::new(sensors),
            loads,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Run the pipeline for one routing result.
    ///
    /// Fails without partial output if the route is unusable or a needed
    /// model cannot be loaded. The baseline is attached to the summary as-is.
    pub fn estimate(
        &self,
        raw_route: &RawRoute,
        context: &ContextVector,
        baseline: BaselineTravelTime,
    ) -> Result<CongestionEstimate> {
        let config = &self.config;

        let route = densify_route(raw_route, config.min_spacing_meters)?;
        info!("[CongestionEstimator] Route densified to {} points", route.len());

        let bbox = bounding_box(&route, config.bbox_margin_degrees)?;
        info!("[CongestionEstimator] Bounding box {:?}", bbox);

        let candidates = self
            .index
            .filter_by_bounding_box(&bbox, config.max_candidate_sensors);
        info!(
            "[CongestionEstimator] {} candidate sensors in bounding box",
            candidates.len()
        );

        let nearby = candidates.collect_near_route(&route, config.sensor_radius_meters);
        let predictions = predict_for_sensors(&nearby, &self.loads, context, &self.registry)?;
        info!(
            "[CongestionEstimator] Predicted load for {} of {} nearby sensors",
            predictions.len(),
            nearby.len()
        );

        let segments = score_segments(&route, &predictions, config.segment_distance_cap_meters);
        let summary = summarize(&predictions, baseline);

        Ok(CongestionEstimate {
            route,
            predictions,
            segments,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextInput;
    use crate::model::{InMemoryModelLoader, ModelArtifact, SeverityGroup};
    use crate::scoring::SeverityClass;
    use crate::sensors::SensorPoint;
    use std::collections::BTreeMap;

    fn linear(intercept: f64) -> ModelArtifact {
        ModelArtifact::Linear {
            intercept,
            coefficients: BTreeMap::new(),
        }
    }

    fn catalogs() -> (SensorCatalog, HistoricalLoadCatalog) {
        let sensors = SensorCatalog::new(vec![
            SensorPoint::new("A", "On route", GpsPoint::new(40.005, -3.0)),
            SensorPoint::new("B", "No history", GpsPoint::new(40.006, -3.0)),
            SensorPoint::new("C", "Off route", GpsPoint::new(40.005, -2.99)),
        ])
        .unwrap();
        let loads =
            HistoricalLoadCatalog::from_entries([("A".to_string(), 0.05), ("C".to_string(), 0.5)])
                .unwrap();
        (sensors, loads)
    }

    fn estimator(loader: InMemoryModelLoader) -> CongestionEstimator {
        let (sensors, loads) = catalogs();
        CongestionEstimator::new(
            sensors,
            loads,
            ModelRegistry::new(loader),
            EstimatorConfig::default(),
        )
        .unwrap()
    }

    fn context() -> ContextVector {
        ContextInput::new("08:30", true, false).normalize().unwrap()
    }

    #[test]
    fn test_estimate_straight_route() {
        let estimator = estimator(
            InMemoryModelLoader::new().with_artifact(SeverityGroup::Group0, linear(0.15)),
        );
        let raw = RawRoute::from_points(vec![GpsPoint::new(40.0, -3.0), GpsPoint::new(40.01, -3.0)]);
        let estimate = estimator
            .estimate(&raw, &context(), BaselineTravelTime::NotRequested)
            .unwrap();

        assert_eq!(estimate.segments.len(), estimate.route.len() - 1);
        assert_eq!(estimate.predictions.len(), 1);
        assert_eq!(estimate.predictions[0].sensor.id, "A");
        assert_eq!(estimate.summary.mean_load, Some(0.15));
        assert_eq!(estimate.summary.severity, SeverityClass::Low);
        assert!(estimate
            .segments
            .iter()
            .all(|s| s.severity_class == SeverityClass::Low));
        // Group 3 (sensor C) was never needed
        assert!(!estimator.registry().is_loaded(SeverityGroup::Group3));
    }

    #[test]
    fn test_estimate_propagates_route_failure() {
        let estimator = estimator(InMemoryModelLoader::new());
        let raw = RawRoute::failed(Some(403), "PERMISSION_DENIED");
        assert!(matches!(
            estimator.estimate(&raw, &context(), BaselineTravelTime::NotRequested),
            Err(CongestionError::RouteUnavailable {
                status_code: Some(403),
                ..
            })
        ));
    }

    #[test]
    fn test_estimate_fails_whole_request_on_missing_model() {
        let estimator = estimator(InMemoryModelLoader::new());
        let raw = RawRoute::from_points(vec![GpsPoint::new(40.0, -3.0), GpsPoint::new(40.01, -3.0)]);
        assert!(matches!(
            estimator.estimate(&raw, &context(), BaselineTravelTime::NotRequested),
            Err(CongestionError::ModelUnavailable { group: 0, .. })
        ));
    }

    #[test]
    fn test_route_far_from_sensors() {
        let estimator = estimator(InMemoryModelLoader::new());
        let raw = RawRoute::from_points(vec![GpsPoint::new(41.0, -4.0), GpsPoint::new(41.001, -4.0)]);
        let estimate = estimator
            .estimate(&raw, &context(), BaselineTravelTime::NotRequested)
            .unwrap();
        assert!(estimate.predictions.is_empty());
        assert_eq!(estimate.summary.severity, SeverityClass::Unknown);
        assert!(estimate
            .segments
            .iter()
            .all(|s| s.severity_class == SeverityClass::Unknown));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        for config in [
            EstimatorConfig {
                min_spacing_meters: 0.0,
                ..Default::default()
            },
            EstimatorConfig {
                sensor_radius_meters: f64::NAN,
                ..Default::default()
            },
            EstimatorConfig {
                bbox_margin_degrees: -0.01,
                ..Default::default()
            },
        ] {
            let (sensors, loads) = catalogs();
            let result = CongestionEstimator::new(
                sensors,
                loads,
                ModelRegistry::new(InMemoryModelLoader::new()),
                config,
            );
            assert!(matches!(result, Err(CongestionError::InvalidInput { .. })));
        }
    }

    #[test]
    fn test_config_from_json() {
        let config = EstimatorConfig::from_json_str(r#"{"sensor_radius_meters": 10.0}"#).unwrap();
        assert_eq!(config.sensor_radius_meters, 10.0);
        assert_eq!(config.min_spacing_meters, 8.0);
        assert_eq!(config.max_candidate_sensors, 1000);

        assert!(EstimatorConfig::from_json_str(r#"{"min_spacing_meters": 0.0}"#).is_err());
        assert!(EstimatorConfig::from_json_str(r#"{"min_spacing_meters": "8"}"#).is_err());
    }
}
