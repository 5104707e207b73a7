//! GeoJSON export of an estimate for map renderers.
//!
//! GeoJSON positions are `[longitude, latitude]`.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeoValue};
use serde_json::{json, Value};

use crate::estimator::CongestionEstimate;
use crate::GpsPoint;

fn position(p: &GpsPoint) -> Vec<f64> {
    vec![p.longitude, p.latitude]
}

fn object(value: Value) -> Option<JsonObject> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn feature(geometry: GeoValue, properties: Value) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geometry)),
        id: None,
        properties: object(properties),
        foreign_members: None,
    }
}

impl CongestionEstimate {
    /// One colored line per segment, one marker per sensor prediction, and
    /// start/end markers. Summary figures go in the collection's top-level
    /// `properties` member.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut features = Vec::with_capacity(self.segments.len() + self.predictions.len() + 2);

        for segment in &self.segments {
            features.push(feature(
                GeoValue::LineString(vec![position(&segment.start), position(&segment.end)]),
                json!({
                    "kind": "segment",
                    "severity": segment.severity_class.label(),
                    "color": segment.severity_class.color(),
                }),
            ));
        }

        for prediction in &self.predictions {
            let severity = prediction.severity();
            features.push(feature(
                GeoValue::Point(position(&prediction.sensor.location)),
                json!({
                    "kind": "sensor",
                    "id": prediction.sensor.id,
                    "name": prediction.sensor.name,
                    "predicted_load": prediction.predicted_load,
                    "group": prediction.group.index(),
                    "severity": severity.label(),
                    "color": severity.color(),
                }),
            ));
        }

        if let (Some(start), Some(end)) = (self.route.first(), self.route.last()) {
            features.push(feature(GeoValue::Point(position(start)), json!({ "kind": "start" })));
            features.push(feature(GeoValue::Point(position(end)), json!({ "kind": "end" })));
        }

        let mut summary = JsonObject::new();
        summary.insert(
            "properties".to_string(),
            json!({
                "sensor_count": self.summary.sensor_count,
                "mean_load": self.summary.mean_load,
                "median_load": self.summary.median_load,
                "severity": self.summary.severity.label(),
                "baseline_seconds": self.summary.baseline.seconds(),
            }),
        );

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(summary),
        }
    }

    /// [`Self::to_feature_collection`] as a JSON value.
    pub fn to_geojson(&self) -> Value {
        Value::Object(JsonObject::from(&self.to_feature_collection()))
    }
}
