//! Route-level aggregation of sensor predictions.

use serde::{Deserialize, Serialize};

use crate::error::CongestionError;
use crate::model::SensorPrediction;
use crate::scoring::SeverityClass;

/// Travel time in a historically quiet departure window, shown for reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BaselineTravelTime {
    Available { seconds: f64 },
    Unavailable { reason: String },
    /// No lookup was attempted
    NotRequested,
}

impl BaselineTravelTime {
    pub fn seconds(&self) -> Option<f64> {
        match self {
            BaselineTravelTime::Available { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

impl From<Result<f64, CongestionError>> for BaselineTravelTime {
    fn from(result: Result<f64, CongestionError>) -> Self {
        match result {
            Ok(seconds) => BaselineTravelTime::Available { seconds },
            Err(err) => BaselineTravelTime::Unavailable {
                reason: err.to_string(),
            },
        }
    }
}

/// Congestion figures for the whole route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub sensor_count: usize,
    /// Mean predicted load, `None` without predictions
    pub mean_load: Option<f64>,
    pub median_load: Option<f64>,
    /// Class of the median load; `Unknown` without predictions
    pub severity: SeverityClass,
    pub baseline: BaselineTravelTime,
}

/// Median of unsorted values; the mean of the middle pair for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Aggregate the request's predictions. The baseline is carried for display
/// only.
pub fn summarize(predictions: &[SensorPrediction], baseline: BaselineTravelTime) -> RouteSummary {
    let loads: Vec<f64> = predictions.iter().map(|p| p.predicted_load).collect();
    let mean_load = if loads.is_empty() {
        None
    } else {
        Some(loads.iter().sum::<f64>() / loads.len() as f64)
    };
    let median_load = median(&loads);

    RouteSummary {
        sensor_count: loads.len(),
        mean_load,
        median_load,
        severity: median_load.map_or(SeverityClass::Unknown, SeverityClass::from_load),
        baseline,
    }
}
