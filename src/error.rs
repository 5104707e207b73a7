//! Unified error handling for the congestion pipeline.
//!
//! Every fatal failure of an estimation request is one of these variants and
//! propagates immediately; no partial estimate is ever returned.

use thiserror::Error;

/// Unified error type for route-congestion operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CongestionError {
    /// The routing collaborator failed or returned no usable coordinates
    #[error("{}", route_unavailable_message(*status_code, message))]
    RouteUnavailable {
        status_code: Option<u16>,
        message: String,
    },
    /// A model artifact for a severity group could not be loaded
    #[error("Model for group {group} unavailable: {message}")]
    ModelUnavailable { group: u8, message: String },
    /// A request field could not be parsed
    #[error("Invalid value for '{field}': {message}")]
    InvalidInput { field: String, message: String },
    /// The baseline travel-time lookup failed (never fatal)
    #[error("Baseline travel time unavailable: {message}")]
    DegradedBaseline { message: String },
    /// A static catalog could not be read
    #[error("Catalog error: {message}")]
    CatalogError { message: String },
    /// An operation needed at least one item
    #[error("Empty input: {what}")]
    EmptyInput { what: String },
}

fn route_unavailable_message(status_code: Option<u16>, message: &str) -> String {
    match status_code {
        Some(code) => format!("Route unavailable ({}): {}", code, message),
        None => format!("Route unavailable: {}", message),
    }
}

impl CongestionError {
    /// Whether the request can still produce an estimate after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CongestionError::DegradedBaseline { .. })
    }

    pub(crate) fn invalid_input(field: &str, message: impl Into<String>) -> Self {
        CongestionError::InvalidInput {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn catalog(message: impl Into<String>) -> Self {
        CongestionError::CatalogError {
            message: message.into(),
        }
    }
}

/// Result type alias for route-congestion operations.
pub type Result<T> = std::result::Result<T, CongestionError>;

/// Extension trait for converting Option to CongestionError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an empty input error.
    fn ok_or_empty(self, what: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_empty(self, what: &str) -> Result<T> {
        self.ok_or_else(|| CongestionError::EmptyInput {
            what: what.to_string(),
        })
    }
}
