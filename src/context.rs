//! Request context normalization.
//!
//! Turns the raw environmental and time inputs of a request into the flat,
//! normalized feature set every load model consumes. Weather scalars are
//! min-max scaled against fixed ranges taken from the training data; hour of
//! day and wind direction are encoded on the unit circle.
//!
//! Scaling never clamps. A reading outside its range produces a feature
//! outside `[0, 1]`, which the models will extrapolate from. This is allowed
//! but unusual, and is logged at debug level.

use std::f64::consts::PI;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CongestionError, Result};

/// Default wind direction in degrees when none is given.
pub const DEFAULT_WIND_DIRECTION: f64 = 180.0;

/// Fallback solar radiation (W/m²) by hour of day.
pub const RADIATION_BY_HOUR: [f64; 24] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, // 00-07
    35.0, 120.0, 245.0, 380.0, // 08-11
    512.0, // 12
    489.0, 420.0, 320.0, 205.0, 95.0, 25.0, // 13-18
    0.0, 0.0, 0.0, 0.0, 0.0, // 19-23
];

/// Weather scalars that are min-max normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherVariable {
    Temperature,
    Humidity,
    Pressure,
    Radiation,
    WindSpeed,
}

impl WeatherVariable {
    pub const ALL: [WeatherVariable; 5] = [
        WeatherVariable::Temperature,
        WeatherVariable::Humidity,
        WeatherVariable::Pressure,
        WeatherVariable::Radiation,
        WeatherVariable::WindSpeed,
    ];

    /// Fixed (min, max) normalization range.
    pub fn range(self) -> (f64, f64) {
        match self {
            WeatherVariable::Temperature => (3.25, 22.85),
            WeatherVariable::Humidity => (33.0, 100.0),
            WeatherVariable::Pressure => (933.4286, 968.0),
            WeatherVariable::Radiation => (0.0, 705.0),
            WeatherVariable::WindSpeed => (0.0, 4.775),
        }
    }

    /// Value substituted when the reading is missing.
    ///
    /// Radiation depends on the hour of day; without an hour the overnight
    /// value is used.
    pub fn default_value(self, hour_of_day: Option<u32>) -> f64 {
        match self {
            WeatherVariable::Temperature => 12.0,
            WeatherVariable::Humidity => 70.0,
            WeatherVariable::Pressure => 946.0,
            WeatherVariable::Radiation => default_radiation(hour_of_day.unwrap_or(0)),
            WeatherVariable::WindSpeed => 1.5,
        }
    }

    /// Feature column name expected by the model artifacts.
    pub fn feature_name(self) -> &'static str {
        match self {
            WeatherVariable::Temperature => "temperature",
            WeatherVariable::Humidity => "humidity",
            WeatherVariable::Pressure => "pressure",
            WeatherVariable::Radiation => "radiation",
            WeatherVariable::WindSpeed => "wind_speed",
        }
    }
}

/// Hour-dependent radiation fallback. Hours wrap modulo 24.
pub fn default_radiation(hour_of_day: u32) -> f64 {
    RADIATION_BY_HOUR[(hour_of_day % 24) as usize]
}

/// Linear min-max scaling against the variable's fixed range. No clamping.
pub fn normalize(variable: WeatherVariable, value: f64) -> f64 {
    let (min, max) = variable.range();
    let scaled = (value - min) / (max - min);
    if !(0.0..=1.0).contains(&scaled) {
        debug!(
            "[ContextNormalizer] {:?} = {} is outside [{}, {}], normalized to {:.4}",
            variable, value, min, max, scaled
        );
    }
    scaled
}

fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
}

/// Parse a raw form value, falling back to `default` for absent/blank/"NA".
///
/// Any other non-numeric text is rejected.
pub fn parse_or_default(raw: Option<&str>, field: &str, default: f64) -> Result<f64> {
    match raw {
        None => Ok(default),
        Some(text) if is_missing(text) => Ok(default),
        Some(text) => {
            let value: f64 = text.trim().parse().map_err(|_| {
                CongestionError::invalid_input(field, format!("'{}' is not a number", text))
            })?;
            if !value.is_finite() {
                return Err(CongestionError::invalid_input(
                    field,
                    format!("'{}' is not a finite number", text),
                ));
            }
            Ok(value)
        }
    }
}

/// Apply a weather variable's documented default to a raw reading.
pub fn apply_default(
    raw: Option<&str>,
    variable: WeatherVariable,
    hour_of_day: Option<u32>,
) -> Result<f64> {
    parse_or_default(raw, variable.feature_name(), variable.default_value(hour_of_day))
}

/// Departure time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(CongestionError::invalid_input(
                "hour",
                format!("{:02}:{:02} is not a valid time of day", hour, minute),
            ));
        }
        Ok(Self { hour, minute })
    }

    /// Parse `H:MM` or `HH:MM`.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || CongestionError::invalid_input("hour", format!("'{}' is not HH:MM", text));
        let (h, m) = text.trim().split_once(':').ok_or_else(invalid)?;
        if m.len() != 2 || h.is_empty() || h.len() > 2 {
            return Err(invalid());
        }
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }

    /// Position on the 24h circle as (sin, cos).
    pub fn encode(&self) -> (f64, f64) {
        let angle = 2.0 * PI * (self.hour as f64 + self.minute as f64 / 60.0) / 24.0;
        (angle.sin(), angle.cos())
    }
}

/// Encode an `HH:MM` string on the 24h circle as (sin, cos).
pub fn encode_hour(text: &str) -> Result<(f64, f64)> {
    Ok(TimeOfDay::parse(text)?.encode())
}

/// Encode a compass direction in degrees as (sin, cos).
pub fn encode_wind_direction(degrees: f64) -> (f64, f64) {
    let radians = degrees.to_radians();
    (radians.sin(), radians.cos())
}

/// Raw request context as entered by the user.
///
/// Weather readings are kept as text so "NA" and blanks can be told apart
/// from malformed input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInput {
    /// Departure time, `HH:MM`
    pub hour: String,
    pub is_weekday: bool,
    pub is_raining: bool,
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub pressure: Option<String>,
    pub radiation: Option<String>,
    pub wind_speed: Option<String>,
    pub wind_direction: Option<String>,
}

impl ContextInput {
    pub fn new(hour: impl Into<String>, is_weekday: bool, is_raining: bool) -> Self {
        Self {
            hour: hour.into(),
            is_weekday,
            is_raining,
            ..Default::default()
        }
    }

    fn raw(&self, variable: WeatherVariable) -> Option<&str> {
        match variable {
            WeatherVariable::Temperature => self.temperature.as_deref(),
            WeatherVariable::Humidity => self.humidity.as_deref(),
            WeatherVariable::Pressure => self.pressure.as_deref(),
            WeatherVariable::Radiation => self.radiation.as_deref(),
            WeatherVariable::WindSpeed => self.wind_speed.as_deref(),
        }
    }

    /// Validate, default and normalize into a [`ContextVector`].
    pub fn normalize(&self) -> Result<ContextVector> {
        let time = TimeOfDay::parse(&self.hour)?;
        let (hour_sin, hour_cos) = time.encode();

        let mut scaled = [0.0; 5];
        for (slot, variable) in scaled.iter_mut().zip(WeatherVariable::ALL) {
            let value = apply_default(self.raw(variable), variable, Some(time.hour))?;
            *slot = normalize(variable, value);
        }

        let wind_direction = parse_or_default(
            self.wind_direction.as_deref(),
            "wind_direction",
            DEFAULT_WIND_DIRECTION,
        )?;
        let (wind_dir_sin, wind_dir_cos) = encode_wind_direction(wind_direction);

        Ok(ContextVector {
            hour_sin,
            hour_cos,
            is_weekday: if self.is_weekday { 1.0 } else { 0.0 },
            temperature: scaled[0],
            humidity: scaled[1],
            pressure: scaled[2],
            radiation: scaled[3],
            precipitation: if self.is_raining { 1.0 } else { 0.0 },
            wind_speed: scaled[4],
            wind_dir_sin,
            wind_dir_cos,
        })
    }
}

/// Normalized features shared by every model call of one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextVector {
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub is_weekday: f64,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub radiation: f64,
    pub precipitation: f64,
    pub wind_speed: f64,
    pub wind_dir_sin: f64,
    pub wind_dir_cos: f64,
}

impl ContextVector {
    /// Column names in row order.
    pub const FEATURE_NAMES: [&'static str; 11] = [
        "hour_sin",
        "hour_cos",
        "is_weekday",
        "temperature",
        "humidity",
        "pressure",
        "radiation",
        "precipitation",
        "wind_speed",
        "wind_dir_sin",
        "wind_dir_cos",
    ];

    pub fn values(&self) -> [f64; 11] {
        [
            self.hour_sin,
            self.hour_cos,
            self.is_weekday,
            self.temperature,
            self.humidity,
            self.pressure,
            self.radiation,
            self.precipitation,
            self.wind_speed,
            self.wind_dir_sin,
            self.wind_dir_cos,
        ]
    }

    /// Named features in row order.
    pub fn features(&self) -> Vec<(&'static str, f64)> {
        Self::FEATURE_NAMES.into_iter().zip(self.values()).collect()
    }
}
