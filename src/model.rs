//! Severity groups and the per-group load models.
//!
//! Sensors are bucketed by their historical mean load into four groups, and
//! each group has its own pre-trained regressor. Artifacts are loaded lazily,
//! once per group, and then shared by every request.
//!
//! ## Artifact format
//!
//! A model artifact is a JSON document tagged by `kind`:
//!
//! ```json
//! { "kind": "linear", "intercept": 0.05, "coefficients": { "historical_load": 1.0 } }
//! ```
//!
//! ```json
//! { "kind": "tree_ensemble", "base_score": 0.1, "trees": [
//!     { "nodes": [
//!         { "split": { "feature": "hour_cos", "threshold": 0.0, "left": 1, "right": 2 } },
//!         { "leaf": { "value": 0.08 } },
//!         { "leaf": { "value": -0.02 } } ] } ] }
//! ```
//!
//! Trees start at node 0; `value <= threshold` goes left. The ensemble
//! prediction is `base_score` plus the sum of the reached leaves.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::context::ContextVector;
use crate::error::{CongestionError, Result};
use crate::scoring::SeverityClass;
use crate::sensors::{HistoricalLoadCatalog, SensorPoint};

/// Upper bounds (inclusive) of groups 0, 1 and 2.
pub const GROUP_CUTPOINTS: [f64; 3] = [0.09155, 0.15876, 0.23443];

// ============================================================================
// Severity Groups
// ============================================================================

/// Historical load bucket that selects a sensor's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SeverityGroup {
    Group0,
    Group1,
    Group2,
    Group3,
}

impl SeverityGroup {
    pub const ALL: [SeverityGroup; 4] = [
        SeverityGroup::Group0,
        SeverityGroup::Group1,
        SeverityGroup::Group2,
        SeverityGroup::Group3,
    ];

    /// Bucket a historical mean load. A load equal to a cutpoint belongs to
    /// the lower group.
    pub fn classify(historical_mean_load: f64) -> Self {
        if historical_mean_load <= GROUP_CUTPOINTS[0] {
            SeverityGroup::Group0
        } else if historical_mean_load <= GROUP_CUTPOINTS[1] {
            SeverityGroup::Group1
        } else if historical_mean_load <= GROUP_CUTPOINTS[2] {
            SeverityGroup::Group2
        } else {
            SeverityGroup::Group3
        }
    }

    pub fn index(self) -> u8 {
        match self {
            SeverityGroup::Group0 => 0,
            SeverityGroup::Group1 => 1,
            SeverityGroup::Group2 => 2,
            SeverityGroup::Group3 => 3,
        }
    }

    /// File name of this group's artifact inside a model directory.
    pub fn artifact_file_name(self) -> String {
        format!("model_g{}.json", self.index())
    }
}

impl fmt::Display for SeverityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index())
    }
}

impl From<SeverityGroup> for u8 {
    fn from(group: SeverityGroup) -> u8 {
        group.index()
    }
}

impl TryFrom<u8> for SeverityGroup {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SeverityGroup::Group0),
            1 => Ok(SeverityGroup::Group1),
            2 => Ok(SeverityGroup::Group2),
            3 => Ok(SeverityGroup::Group3),
            other => Err(format!("no severity group {}", other)),
        }
    }
}

// ============================================================================
// Feature Rows
// ============================================================================

/// Column name of the extra per-sensor feature.
pub const HISTORICAL_LOAD_FEATURE: &str = "historical_load";

const FEATURE_COUNT: usize = ContextVector::FEATURE_NAMES.len() + 1;

/// Position of a named feature in a [`FeatureRow`].
pub fn feature_index(name: &str) -> Option<usize> {
    if name == HISTORICAL_LOAD_FEATURE {
        return Some(FEATURE_COUNT - 1);
    }
    ContextVector::FEATURE_NAMES.iter().position(|n| *n == name)
}

/// One model input: the request context plus the sensor's historical load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRow {
    values: [f64; FEATURE_COUNT],
}

impl FeatureRow {
    pub fn new(context: &ContextVector, historical_mean_load: f64) -> Self {
        let mut values = [0.0; FEATURE_COUNT];
        values[..FEATURE_COUNT - 1].copy_from_slice(&context.values());
        values[FEATURE_COUNT - 1] = historical_mean_load;
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }

    #[inline]
    fn at(&self, index: usize) -> f64 {
        self.values[index]
    }
}

// ============================================================================
// Regressors
// ============================================================================

/// A fitted, immutable load predictor.
pub trait Regressor: Send + Sync + fmt::Debug {
    fn predict(&self, row: &FeatureRow) -> f64;
}

/// Serialized model artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelArtifact {
    Linear {
        intercept: f64,
        coefficients: BTreeMap<String, f64>,
    },
    TreeEnsemble {
        base_score: f64,
        trees: Vec<RegressionTree>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: String,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

impl ModelArtifact {
    pub fn from_json_str(json: &str, group: SeverityGroup) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CongestionError::ModelUnavailable {
            group: group.index(),
            message: format!("malformed artifact: {}", e),
        })
    }

    /// Resolve feature names and check tree structure.
    pub fn compile(&self, group: SeverityGroup) -> Result<CompiledModel> {
        let unavailable = |message: String| CongestionError::ModelUnavailable {
            group: group.index(),
            message,
        };
        let resolve = |name: &str| {
            feature_index(name).ok_or_else(|| unavailable(format!("unknown feature '{}'", name)))
        };

        match self {
            ModelArtifact::Linear {
                intercept,
                coefficients,
            } => {
                let terms = coefficients
                    .iter()
                    .map(|(name, weight)| -> Result<(usize, f64)> {
                        Ok((resolve(name)?, *weight))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(CompiledModel(CompiledKind::Linear {
                    intercept: *intercept,
                    terms,
                }))
            }
            ModelArtifact::TreeEnsemble { base_score, trees } => {
                let mut compiled = Vec::with_capacity(trees.len());
                for (t, tree) in trees.iter().enumerate() {
                    if tree.nodes.is_empty() {
                        return Err(unavailable(format!("tree {} has no nodes", t)));
                    }
                    let mut nodes = Vec::with_capacity(tree.nodes.len());
                    for (i, node) in tree.nodes.iter().enumerate() {
                        nodes.push(match node {
                            TreeNode::Leaf { value } => CompiledNode::Leaf(*value),
                            TreeNode::Split {
                                feature,
                                threshold,
                                left,
                                right,
                            } => {
                                // Children must come later, which rules out cycles
                                for child in [*left, *right] {
                                    if child <= i || child >= tree.nodes.len() {
                                        return Err(unavailable(format!(
                                            "tree {} node {} has invalid child {}",
                                            t, i, child
                                        )));
                                    }
                                }
                                CompiledNode::Split {
                                    feature: resolve(feature)?,
                                    threshold: *threshold,
                                    left: *left,
                                    right: *right,
                                }
                            }
                        });
                    }
                    compiled.push(nodes);
                }
                Ok(CompiledModel(CompiledKind::TreeEnsemble {
                    base_score: *base_score,
                    trees: compiled,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CompiledNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(f64),
}

#[derive(Debug, Clone)]
enum CompiledKind {
    Linear {
        intercept: f64,
        terms: Vec<(usize, f64)>,
    },
    TreeEnsemble {
        base_score: f64,
        trees: Vec<Vec<CompiledNode>>,
    },
}

/// An artifact with feature names resolved to row positions.
#[derive(Debug, Clone)]
pub struct CompiledModel(CompiledKind);

impl Regressor for CompiledModel {
    fn predict(&self, row: &FeatureRow) -> f64 {
        match &self.0 {
            CompiledKind::Linear { intercept, terms } => {
                intercept + terms.iter().map(|&(i, w)| w * row.at(i)).sum::<f64>()
            }
            CompiledKind::TreeEnsemble { base_score, trees } => {
                base_score + trees.iter().map(|nodes| eval_tree(nodes, row)).sum::<f64>()
            }
        }
    }
}

fn eval_tree(nodes: &[CompiledNode], row: &FeatureRow) -> f64 {
    let mut idx = 0;
    loop {
        match nodes[idx] {
            CompiledNode::Leaf(value) => return value,
            CompiledNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                idx = if row.at(feature) <= threshold { left } else { right };
            }
        }
    }
}

// ============================================================================
// Loading and Registry
// ============================================================================

/// Source of model artifacts, one per severity group.
pub trait ModelLoader: Send + Sync {
    fn load(&self, group: SeverityGroup) -> Result<Arc<dyn Regressor>>;
}

/// Loads `model_g{N}.json` artifacts from a directory.
#[derive(Debug, Clone)]
pub struct DirectoryModelLoader {
    dir: PathBuf,
}

impl DirectoryModelLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ModelLoader for DirectoryModelLoader {
    fn load(&self, group: SeverityGroup) -> Result<Arc<dyn Regressor>> {
        let path = self.dir.join(group.artifact_file_name());
        let json = std::fs::read_to_string(&path).map_err(|e| {
            CongestionError::ModelUnavailable {
                group: group.index(),
                message: format!("cannot read {}: {}", path.display(), e),
            }
        })?;
        let model = ModelArtifact::from_json_str(&json, group)?.compile(group)?;
        Ok(Arc::new(model))
    }
}

/// Artifacts held in memory, keyed by group.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModelLoader {
    artifacts: BTreeMap<SeverityGroup, ModelArtifact>,
}

impl InMemoryModelLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, group: SeverityGroup, artifact: ModelArtifact) -> Self {
        self.artifacts.insert(group, artifact);
        self
    }
}

impl ModelLoader for InMemoryModelLoader {
    fn load(&self, group: SeverityGroup) -> Result<Arc<dyn Regressor>> {
        let artifact = self
            .artifacts
            .get(&group)
            .ok_or_else(|| CongestionError::ModelUnavailable {
                group: group.index(),
                message: "no artifact registered".to_string(),
            })?;
        Ok(Arc::new(artifact.compile(group)?))
    }
}

/// Load-once cache of the four group models.
///
/// Each slot is filled at most once even under concurrent requests; a failed
/// load leaves the slot empty so a later request retries it.
pub struct ModelRegistry {
    loader: Box<dyn ModelLoader>,
    models: [OnceCell<Arc<dyn Regressor>>; 4],
}

impl ModelRegistry {
    pub fn new(loader: impl ModelLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            models: Default::default(),
        }
    }

    /// Registry over a directory of `model_g{N}.json` artifacts.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(DirectoryModelLoader::new(dir))
    }

    /// The cached model for `group`, loading it on first use.
    pub fn model(&self, group: SeverityGroup) -> Result<&Arc<dyn Regressor>> {
        self.models[group.index() as usize].get_or_try_init(|| {
            debug!("[ModelRegistry] Loading model for group {}", group);
            self.loader.load(group)
        })
    }

    /// Load every group's model now instead of on first use.
    pub fn preload(&self) -> Result<()> {
        for group in SeverityGroup::ALL {
            self.model(group)?;
        }
        info!("[ModelRegistry] All {} group models loaded", SeverityGroup::ALL.len());
        Ok(())
    }

    pub fn is_loaded(&self, group: SeverityGroup) -> bool {
        self.models[group.index() as usize].get().is_some()
    }

    pub fn predict(
        &self,
        group: SeverityGroup,
        context: &ContextVector,
        historical_mean_load: f64,
    ) -> Result<f64> {
        let row = FeatureRow::new(context, historical_mean_load);
        Ok(self.model(group)?.predict(&row))
    }
}

// ============================================================================
// Sensor Predictions
// ============================================================================

/// A matched sensor with its group and predicted load for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPrediction {
    pub sensor: SensorPoint,
    pub historical_mean_load: f64,
    pub group: SeverityGroup,
    pub predicted_load: f64,
}

impl SensorPrediction {
    pub fn severity(&self) -> SeverityClass {
        SeverityClass::from_load(self.predicted_load)
    }
}

fn predict_one(
    sensor: &SensorPoint,
    loads: &HistoricalLoadCatalog,
    context: &ContextVector,
    registry: &ModelRegistry,
) -> Option<Result<SensorPrediction>> {
    let Some(historical_mean_load) = loads.get(&sensor.id) else {
        debug!(
            "[ModelRegistry] Sensor {} has no historical load, skipping",
            sensor.id
        );
        return None;
    };
    let group = SeverityGroup::classify(historical_mean_load);
    Some(
        registry
            .predict(group, context, historical_mean_load)
            .map(|predicted_load| SensorPrediction {
                sensor: sensor.clone(),
                historical_mean_load,
                group,
                predicted_load,
            }),
    )
}

/// Classify and predict every sensor that has a historical load.
///
/// Sensors missing from the historical-load catalog are dropped. Output keeps
/// the input order.
#[cfg(not(feature = "parallel"))]
pub fn predict_for_sensors(
    sensors: &[SensorPoint],
    loads: &HistoricalLoadCatalog,
    context: &ContextVector,
    registry: &ModelRegistry,
) -> Result<Vec<SensorPrediction>> {
    sensors
        .iter()
        .filter_map(|s| predict_one(s, loads, context, registry))
        .collect()
}

/// Classify and predict every sensor that has a historical load.
///
/// Sensors missing from the historical-load catalog are dropped. Output keeps
/// the input order.
#[cfg(feature = "parallel")]
pub fn predict_for_sensors(
    sensors: &[SensorPoint],
    loads: &HistoricalLoadCatalog,
    context: &ContextVector,
    registry: &ModelRegistry,
) -> Result<Vec<SensorPrediction>> {
    sensors
        .par_iter()
        .filter_map(|s| predict_one(s, loads, context, registry))
        .collect()
}
