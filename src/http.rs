//! HTTP client for the Google Routes API.
//!
//! Provides the two routing collaborators of an estimation request:
//! - the route polyline between two addresses
//! - the travel time at a quiet reference departure (the baseline)
//!
//! Route failures are returned as [`RawRoute::Failed`] so the pipeline can
//! report them; baseline failures only degrade the summary.

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::ContextInput;
use crate::densify::RawRoute;
use crate::error::{CongestionError, Result};
use crate::estimator::{CongestionEstimate, CongestionEstimator};
use crate::summary::BaselineTravelTime;
use crate::GpsPoint;

const COMPUTE_ROUTES_URL: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";
const POLYLINE_PRECISION: u32 = 5;

/// Travel mode passed to the routing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TravelMode {
    Drive,
    TwoWheeler,
}

impl TravelMode {
    fn as_api_str(self) -> &'static str {
        match self {
            TravelMode::Drive => "DRIVE",
            TravelMode::TwoWheeler => "TWO_WHEELER",
        }
    }
}

/// Configuration for [`RoutesClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesClientConfig {
    pub api_key: String,

    /// Default: the public computeRoutes endpoint
    pub endpoint: String,

    /// Per-request timeout in seconds.
    /// Default: 30
    pub timeout_secs: u64,

    /// Default: DRIVE
    pub travel_mode: TravelMode,

    /// Appended to addresses that don't mention it, e.g. "Madrid".
    /// Default: None
    pub default_locality: Option<String>,

    /// RFC 3339 departure used for the baseline travel time, chosen in a
    /// historically quiet window. `None` skips the baseline lookup.
    /// Default: None
    pub baseline_departure: Option<String>,

    /// Upper bound on the baseline lookup. The baseline is display-only, so
    /// it gives up sooner than the route request.
    /// Default: 10
    pub baseline_timeout_secs: u64,
}

impl RoutesClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: COMPUTE_ROUTES_URL.to_string(),
            timeout_secs: 30,
            travel_mode: TravelMode::Drive,
            default_locality: None,
            baseline_departure: None,
            baseline_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoutesResponse {
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    #[serde(default)]
    legs: Vec<ApiLeg>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    #[serde(default)]
    steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
struct ApiStep {
    polyline: Option<ApiPolyline>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPolyline {
    encoded_polyline: String,
}

/// Append `locality` unless the address already names it (case-insensitive).
pub fn complete_address(address: &str, locality: Option<&str>) -> String {
    let address = address.trim();
    match locality {
        Some(loc) if !address.to_lowercase().contains(&loc.to_lowercase()) => {
            format!("{}, {}", address, loc)
        }
        _ => address.to_string(),
    }
}

/// Decode the step polylines of the first route into one vertex list.
///
/// Consecutive steps share their join vertex; it is kept once.
pub fn parse_route_body(body: &str) -> RawRoute {
    let response: RoutesResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return RawRoute::failed(None, format!("malformed routes response: {}", e)),
    };

    let Some(route) = response.routes.first() else {
        return RawRoute::from_points(Vec::new());
    };

    let mut points: Vec<GpsPoint> = Vec::new();
    for step in route.legs.iter().flat_map(|leg| leg.steps.iter()) {
        let Some(polyline) = &step.polyline else {
            continue;
        };
        let line = match polyline::decode_polyline(&polyline.encoded_polyline, POLYLINE_PRECISION) {
            Ok(line) => line,
            Err(e) => return RawRoute::failed(None, format!("undecodable polyline: {}", e)),
        };
        let mut decoded = line.0.iter().map(|c| GpsPoint::new(c.y, c.x)).peekable();
        let shares_join = match (points.last(), decoded.peek()) {
            (Some(last), Some(first)) => last == first,
            _ => false,
        };
        if shares_join {
            decoded.next();
        }
        points.extend(decoded);
    }

    RawRoute::from_points(points)
}

/// Parse a protobuf duration string such as `"1260s"` or `"95.5s"`.
pub fn parse_duration_seconds(text: &str) -> Result<f64> {
    let invalid = || CongestionError::DegradedBaseline {
        message: format!("unexpected duration '{}'", text),
    };
    let seconds: f64 = text
        .strip_suffix('s')
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid());
    }
    Ok(seconds)
}

/// Duration of the first route in a baseline response.
pub fn parse_baseline_body(body: &str) -> Result<f64> {
    let response: RoutesResponse =
        serde_json::from_str(body).map_err(|e| CongestionError::DegradedBaseline {
            message: format!("malformed routes response: {}", e),
        })?;
    let duration = response
        .routes
        .first()
        .and_then(|r| r.duration.as_deref())
        .ok_or_else(|| CongestionError::DegradedBaseline {
            message: "no route duration in response".to_string(),
        })?;
    parse_duration_seconds(duration)
}

/// Client for the route and baseline lookups.
pub struct RoutesClient {
    client: Client,
    config: RoutesClientConfig,
}

impl RoutesClient {
    pub fn new(config: RoutesClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CongestionError::invalid_input("http_client", e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn post(
        &self,
        field_mask: &str,
        body: serde_json::Value,
    ) -> std::result::Result<(u16, String), String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("X-Goog-Api-Key", &self.config.api_key)
            .header("X-Goog-FieldMask", field_mask)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| e.to_string())?;
        Ok((status, text))
    }

    fn request_body(&self, origin: &str, destination: &str) -> serde_json::Value {
        let locality = self.config.default_locality.as_deref();
        json!({
            "origin": { "address": complete_address(origin, locality) },
            "destination": { "address": complete_address(destination, locality) },
            "travelMode": self.config.travel_mode.as_api_str(),
        })
    }

    /// Fetch the raw route polyline between two addresses.
    pub async fn compute_route(&self, origin: &str, destination: &str) -> RawRoute {
        info!("[RoutesClient] Requesting route");
        let body = self.request_body(origin, destination);

        match self.post("routes.legs.steps.polyline", body).await {
            Ok((200, text)) => {
                let route = parse_route_body(&text);
                if let RawRoute::Coordinates { points } = &route {
                    debug!("[RoutesClient] Route with {} vertices", points.len());
                }
                route
            }
            Ok((status, text)) => {
                warn!("[RoutesClient] Route request failed with status {}", status);
                RawRoute::failed(Some(status), text)
            }
            Err(e) => {
                warn!("[RoutesClient] Route request error: {}", e);
                RawRoute::failed(None, e)
            }
        }
    }

    /// Travel time at the configured quiet reference departure.
    pub async fn baseline_travel_time(&self, origin: &str, destination: &str) -> BaselineTravelTime {
        let Some(departure) = &self.config.baseline_departure else {
            return BaselineTravelTime::NotRequested;
        };

        let mut body = self.request_body(origin, destination);
        body["routingPreference"] = json!("TRAFFIC_AWARE_OPTIMAL");
        body["departureTime"] = json!(departure);

        let limit = Duration::from_secs(self.config.baseline_timeout_secs);
        let result = match tokio::time::timeout(limit, self.post("routes.duration", body)).await {
            Ok(Ok((200, text))) => parse_baseline_body(&text),
            Ok(Ok((status, _))) => Err(CongestionError::DegradedBaseline {
                message: format!("status {}", status),
            }),
            Ok(Err(e)) => Err(CongestionError::DegradedBaseline { message: e }),
            Err(_) => Err(CongestionError::DegradedBaseline {
                message: format!("no response within {}s", self.config.baseline_timeout_secs),
            }),
        };
        if let Err(e) = &result {
            warn!("[RoutesClient] {}", e);
        }
        result.into()
    }

    /// Look up the route and baseline concurrently, then run the pipeline.
    ///
    /// The context is validated before any request is sent.
    pub async fn estimate_between(
        &self,
        estimator: &CongestionEstimator,
        origin: &str,
        destination: &str,
        context: &ContextInput,
    ) -> Result<CongestionEstimate> {
        let context = context.normalize()?;
        let (route, baseline) = futures::join!(
            self.compute_route(origin, destination),
            self.baseline_travel_time(origin, destination)
        );
        estimator.estimate(&route, &context, baseline)
    }
}
