//! End-to-end estimation scenarios through the public API.
//!
//! Catalogs and model artifacts are written to a temp directory and loaded the
//! way a deployment loads them at start-up.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use route_congestion::geo_utils::geodesic_distance;
use route_congestion::{
    BaselineTravelTime, CongestionError, CongestionEstimator, ContextInput, EstimatorConfig,
    GpsPoint, HistoricalLoadCatalog, ModelRegistry, RawRoute, SensorCatalog, SeverityClass,
    SeverityGroup,
};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write catalogs and four constant-ish models; group 0 predicts 0.15.
fn write_fixtures(dir: &Path) {
    fs::write(
        dir.join("sensors.csv"),
        "id,name,latitude,longitude\n\
         A,Sensor A,40.005,-3.0\n\
         B,Sensor B unscored,40.0075,-3.0\n\
         Z,Elsewhere,40.5,-3.5\n",
    )
    .unwrap();
    fs::write(
        dir.join("loads.csv"),
        "id,historical_mean_load\nA,0.05\nZ,0.4\n",
    )
    .unwrap();

    let models = dir.join("models");
    fs::create_dir(&models).unwrap();
    fs::write(
        models.join("model_g0.json"),
        r#"{"kind":"linear","intercept":0.15,"coefficients":{}}"#,
    )
    .unwrap();
    fs::write(
        models.join("model_g3.json"),
        r#"{"kind":"tree_ensemble","base_score":0.5,"trees":[
            {"nodes":[
                {"split":{"feature":"is_weekday","threshold":0.5,"left":1,"right":2}},
                {"leaf":{"value":-0.1}},
                {"leaf":{"value":0.2}}]}]}"#,
    )
    .unwrap();
}

fn build_estimator(dir: &Path) -> CongestionEstimator {
    CongestionEstimator::new(
        SensorCatalog::from_csv_path(dir.join("sensors.csv")).unwrap(),
        HistoricalLoadCatalog::from_csv_path(dir.join("loads.csv")).unwrap(),
        ModelRegistry::from_dir(dir.join("models")),
        EstimatorConfig::default(),
    )
    .unwrap()
}

fn straight_route() -> RawRoute {
    RawRoute::from_points(vec![GpsPoint::new(40.0, -3.0), GpsPoint::new(40.01, -3.0)])
}

#[test]
fn test_straight_route_scenario() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let estimator = build_estimator(tmp.path());

    let context = ContextInput::new("09:00", true, false).normalize().unwrap();
    let estimate = estimator
        .estimate(&straight_route(), &context, BaselineTravelTime::NotRequested)
        .unwrap();

    // floor(~1110m / 8m) = 138 points after the origin, the last being the destination
    let origin = GpsPoint::new(40.0, -3.0);
    let destination = GpsPoint::new(40.01, -3.0);
    let expected = (geodesic_distance(&origin, &destination) / 8.0).floor() as usize;
    assert_eq!(expected, 138);
    assert_eq!(estimate.route.len(), expected + 1);
    assert_eq!(estimate.route[0], origin);
    assert_eq!(*estimate.route.last().unwrap(), destination);
    assert!(estimate
        .route
        .windows(2)
        .all(|w| w[1].latitude > w[0].latitude));

    // B has no historical load and is dropped; Z is off the route
    assert_eq!(estimate.predictions.len(), 1);
    let a = &estimate.predictions[0];
    assert_eq!(a.sensor.id, "A");
    assert_eq!(a.group, SeverityGroup::Group0);
    assert!((a.predicted_load - 0.15).abs() < 1e-12);

    // The segment whose midpoint is closest to A
    let near_a = estimate
        .segments
        .iter()
        .min_by(|x, y| {
            let dx = (x.start.latitude + x.end.latitude) / 2.0 - 40.005;
            let dy = (y.start.latitude + y.end.latitude) / 2.0 - 40.005;
            dx.abs().total_cmp(&dy.abs())
        })
        .unwrap();
    assert_eq!(near_a.severity_class, SeverityClass::Low);

    assert!((estimate.summary.mean_load.unwrap() - 0.15).abs() < 1e-12);
    assert_eq!(estimate.summary.severity, SeverityClass::Low);
    assert_eq!(estimate.summary.severity.label(), "low");
}

#[test]
fn test_context_defaults_scenario() {
    let mut input = ContextInput::new("13:00", true, false);
    input.temperature = Some("NA".to_string());
    input.radiation = Some("".to_string());

    let context = input.normalize().unwrap();
    assert!((context.temperature - (12.0 - 3.25) / (22.85 - 3.25)).abs() < 1e-12);
    assert!((context.temperature - 0.4464).abs() < 1e-4);
    assert!((context.radiation * 705.0 - 489.0).abs() < 1e-9);
}

#[test]
fn test_invalid_context_is_rejected_before_pipeline() {
    let mut input = ContextInput::new("13:00", true, false);
    input.humidity = Some("very humid".to_string());
    assert!(matches!(
        input.normalize(),
        Err(CongestionError::InvalidInput { .. })
    ));
}

#[test]
fn test_failed_route_has_no_partial_output() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let estimator = build_estimator(tmp.path());
    let context = ContextInput::new("09:00", true, false).normalize().unwrap();

    let err = estimator
        .estimate(
            &RawRoute::failed(Some(404), "NOT_FOUND"),
            &context,
            BaselineTravelTime::NotRequested,
        )
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    assert!(!estimator.registry().is_loaded(SeverityGroup::Group0));
}

#[test]
fn test_missing_group_model_fails_request() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    fs::remove_file(tmp.path().join("models").join("model_g0.json")).unwrap();
    let estimator = build_estimator(tmp.path());
    let context = ContextInput::new("09:00", true, false).normalize().unwrap();

    assert!(matches!(
        estimator.estimate(&straight_route(), &context, BaselineTravelTime::NotRequested),
        Err(CongestionError::ModelUnavailable { group: 0, .. })
    ));
}

#[test]
fn test_baseline_is_display_only() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let estimator = build_estimator(tmp.path());
    let context = ContextInput::new("09:00", true, false).normalize().unwrap();

    let with_baseline = estimator
        .estimate(
            &straight_route(),
            &context,
            BaselineTravelTime::Available { seconds: 180.0 },
        )
        .unwrap();
    let degraded = estimator
        .estimate(
            &straight_route(),
            &context,
            BaselineTravelTime::Unavailable {
                reason: "timeout".to_string(),
            },
        )
        .unwrap();

    assert_eq!(with_baseline.segments, degraded.segments);
    assert_eq!(with_baseline.predictions, degraded.predictions);
    assert_eq!(with_baseline.summary.baseline.seconds(), Some(180.0));
    assert_eq!(degraded.summary.baseline.seconds(), None);
}

#[test]
fn test_tree_model_route_through_busy_sensor() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let estimator = build_estimator(tmp.path());

    let route = RawRoute::from_points(vec![GpsPoint::new(40.4995, -3.5), GpsPoint::new(40.5005, -3.5)]);
    let weekday = ContextInput::new("08:00", true, false).normalize().unwrap();
    let weekend = ContextInput::new("08:00", false, false).normalize().unwrap();

    let busy = estimator
        .estimate(&route, &weekday, BaselineTravelTime::NotRequested)
        .unwrap();
    assert_eq!(busy.predictions.len(), 1);
    assert_eq!(busy.predictions[0].group, SeverityGroup::Group3);
    assert!((busy.predictions[0].predicted_load - 0.7).abs() < 1e-12);
    assert_eq!(busy.summary.severity, SeverityClass::VeryHigh);

    let quiet = estimator
        .estimate(&route, &weekend, BaselineTravelTime::NotRequested)
        .unwrap();
    assert!((quiet.predictions[0].predicted_load - 0.4).abs() < 1e-12);
    assert_eq!(quiet.summary.severity, SeverityClass::High);

    let geojson = busy.to_geojson();
    assert_eq!(geojson["properties"]["severity"], "very-high");
}

#[test]
fn test_zero_spacing_config_is_rejected_at_construction() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let config = EstimatorConfig {
        min_spacing_meters: 0.0,
        ..Default::default()
    };

    let result = CongestionEstimator::new(
        SensorCatalog::from_csv_path(tmp.path().join("sensors.csv")).unwrap(),
        HistoricalLoadCatalog::from_csv_path(tmp.path().join("loads.csv")).unwrap(),
        ModelRegistry::from_dir(tmp.path().join("models")),
        config,
    );
    assert!(matches!(
        result,
        Err(CongestionError::InvalidInput { ref field, .. }) if field == "min_spacing_meters"
    ));

    // The lower-level densifier refuses the same spacing instead of panicking
    assert!(route_congestion::densify_route(&straight_route(), 0.0).is_err());
}

#[test]
fn test_estimator_is_shared_across_threads() {
    let tmp = TempDir::new().unwrap();
    write_fixtures(tmp.path());
    let estimator = Arc::new(build_estimator(tmp.path()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let estimator = Arc::clone(&estimator);
            std::thread::spawn(move || {
                let context = ContextInput::new("09:00", true, false).normalize().unwrap();
                estimator
                    .estimate(&straight_route(), &context, BaselineTravelTime::NotRequested)
                    .unwrap()
                    .summary
                    .mean_load
            })
        })
        .collect();

    for handle in handles {
        let mean = handle.join().unwrap().unwrap();
        assert!((mean - 0.15).abs() < 1e-12);
    }
}
