//! Sensor catalogs and spatial lookups.
//!
//! The sensor catalog and the historical-load catalog are loaded once and
//! shared read-only by every request. Per request, the catalog is narrowed to
//! the route's bounding box and the candidates are indexed for radius queries
//! around each densified route point.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use log::{debug, info};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::{CongestionError, Result};
use crate::geo_utils::meters_to_degrees;
use crate::{BoundingBox, GpsPoint};

/// Default cap on sensors kept after bounding-box filtering.
pub const DEFAULT_MAX_CANDIDATES: usize = 1000;

/// Default radius searched around every route point, in meters.
pub const DEFAULT_SENSOR_RADIUS_METERS: f64 = 6.0;

/// A fixed traffic measurement point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPoint {
    pub id: String,
    pub name: String,
    pub location: GpsPoint,
}

impl SensorPoint {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: GpsPoint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            location,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SensorRecord {
    id: String,
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct HistoricalLoadRecord {
    id: String,
    historical_mean_load: f64,
}

// ============================================================================
// Catalogs
// ============================================================================

/// Static table of sensor locations, in file order.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<SensorPoint>,
}

fn check_location(sensor: &SensorPoint) -> Result<()> {
    if sensor.location.is_valid() {
        Ok(())
    } else {
        Err(CongestionError::catalog(format!(
            "sensor '{}' has invalid coordinates ({}, {})",
            sensor.id, sensor.location.latitude, sensor.location.longitude
        )))
    }
}

fn check_load(sensor_id: &str, load: f64) -> Result<()> {
    if load.is_finite() {
        Ok(())
    } else {
        Err(CongestionError::catalog(format!(
            "sensor '{}' has a non-finite historical load",
            sensor_id
        )))
    }
}

impl SensorCatalog {
    /// Fails if any sensor has out-of-range or non-finite coordinates.
    pub fn new(sensors: Vec<SensorPoint>) -> Result<Self> {
        for sensor in &sensors {
            check_location(sensor)?;
        }
        Ok(Self { sensors })
    }

    /// Read `id,name,latitude,longitude` rows.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut sensors = Vec::new();

        for (row, record) in csv_reader.deserialize::<SensorRecord>().enumerate() {
            let record = record.map_err(|e| {
                CongestionError::catalog(format!("sensor catalog row {}: {}", row + 1, e))
            })?;
            let sensor = SensorPoint::new(
                record.id,
                record.name,
                GpsPoint::new(record.latitude, record.longitude),
            );
            check_location(&sensor)?;
            sensors.push(sensor);
        }

        info!("[SensorCatalog] Loaded {} sensors", sensors.len());
        Ok(Self { sensors })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            CongestionError::catalog(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::from_csv_reader(file)
    }

    pub fn sensors(&self) -> &[SensorPoint] {
        &self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

/// Long-run mean load per sensor id.
#[derive(Debug, Clone, Default)]
pub struct HistoricalLoadCatalog {
    loads: HashMap<String, f64>,
}

impl HistoricalLoadCatalog {
    /// Fails if any load is NaN or infinite.
    pub fn new(loads: HashMap<String, f64>) -> Result<Self> {
        for (id, &load) in &loads {
            check_load(id, load)?;
        }
        Ok(Self { loads })
    }

    /// Build from `(sensor_id, load)` pairs. Later duplicates win.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, f64)>) -> Result<Self> {
        let mut loads = HashMap::new();
        for (id, load) in entries {
            check_load(&id, load)?;
            loads.insert(id, load);
        }
        Ok(Self { loads })
    }

    /// Read `id,historical_mean_load` rows. Later duplicates win.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut loads = HashMap::new();

        for (row, record) in csv_reader.deserialize::<HistoricalLoadRecord>().enumerate() {
            let record = record.map_err(|e| {
                CongestionError::catalog(format!("historical load row {}: {}", row + 1, e))
            })?;
            check_load(&record.id, record.historical_mean_load)?;
            loads.insert(record.id, record.historical_mean_load);
        }

        info!("[HistoricalLoadCatalog] Loaded {} entries", loads.len());
        Ok(Self { loads })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            CongestionError::catalog(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::from_csv_reader(file)
    }

    pub fn get(&self, sensor_id: &str) -> Option<f64> {
        self.loads.get(sensor_id).copied()
    }

    pub fn len(&self) -> usize {
        self.loads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }
}

// ============================================================================
// Spatial Index
// ============================================================================

/// A sensor position with its catalog index for R-tree queries
#[derive(Debug, Clone, Copy)]
struct IndexedSensor {
    idx: usize,
    lat: f64,
    lng: f64,
}

impl RTreeObject for IndexedSensor {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lng])
    }
}

impl PointDistance for IndexedSensor {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlng = self.lng - point[1];
        dlat * dlat + dlng * dlng
    }
}

fn build_rtree<'a>(sensors: impl Iterator<Item = (usize, &'a SensorPoint)>) -> RTree<IndexedSensor> {
    let indexed: Vec<IndexedSensor> = sensors
        .map(|(idx, s)| IndexedSensor {
            idx,
            lat: s.location.latitude,
            lng: s.location.longitude,
        })
        .collect();
    RTree::bulk_load(indexed)
}

/// Spatial index over the full sensor catalog. Built once, read-only.
pub struct SensorIndex {
    sensors: Vec<SensorPoint>,
    tree: RTree<IndexedSensor>,
}

impl SensorIndex {
    pub fn new(catalog: SensorCatalog) -> Self {
        let tree = build_rtree(catalog.sensors.iter().enumerate());
        Self {
            sensors: catalog.sensors,
            tree,
        }
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensors inside `bbox` (edges inclusive), in catalog order, truncated
    /// to `max_count`.
    pub fn filter_by_bounding_box(&self, bbox: &BoundingBox, max_count: usize) -> CandidateSensors<'_> {
        let envelope = AABB::from_corners([bbox.min_lat, bbox.min_lng], [bbox.max_lat, bbox.max_lng]);
        let mut indices: Vec<usize> = self
            .tree
            .locate_in_envelope(&envelope)
            .map(|s| s.idx)
            .collect();
        indices.sort_unstable();
        let found = indices.len();
        indices.truncate(max_count);

        debug!(
            "[SensorIndex] {} sensors in bounding box, keeping {}",
            found,
            indices.len()
        );

        let sensors: Vec<&SensorPoint> = indices.iter().map(|&i| &self.sensors[i]).collect();
        let tree = build_rtree(sensors.iter().copied().enumerate());
        CandidateSensors { sensors, tree }
    }
}

/// The per-request subset of sensors near a route.
pub struct CandidateSensors<'a> {
    sensors: Vec<&'a SensorPoint>,
    tree: RTree<IndexedSensor>,
}

impl<'a> CandidateSensors<'a> {
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn sensors(&self) -> &[&'a SensorPoint] {
        &self.sensors
    }

    /// Sensors within `radius_meters` of `point`, in catalog order.
    ///
    /// The radius is converted to degrees with the flat 111,139 m/degree
    /// approximation and compared against planar degree distance.
    pub fn radius_query(&self, point: &GpsPoint, radius_meters: f64) -> Vec<&'a SensorPoint> {
        let radius_deg = meters_to_degrees(radius_meters);
        let mut indices: Vec<usize> = self
            .tree
            .locate_within_distance([point.latitude, point.longitude], radius_deg * radius_deg)
            .map(|s| s.idx)
            .collect();
        indices.sort_unstable();
        indices.into_iter().map(|i| self.sensors[i]).collect()
    }

    /// Every sensor within `radius_meters` of any route point, each once, in
    /// order of first discovery along the route.
    pub fn collect_near_route(&self, route: &[GpsPoint], radius_meters: f64) -> Vec<SensorPoint> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut nearby = Vec::new();

        for point in route {
            for sensor in self.radius_query(point, radius_meters) {
                if seen.insert(sensor.id.as_str()) {
                    nearby.push(sensor.clone());
                }
            }
        }

        info!(
            "[SensorIndex] {} sensors within {}m of {} route points",
            nearby.len(),
            radius_meters,
            route.len()
        );
        nearby
    }
}
