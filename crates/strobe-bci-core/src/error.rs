//! Error types for the Strobe core crate
//!
//! These errors work in `no_std` environments: every variant carries only
//! static context so no allocation is needed to report them.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Marker Errors
// ============================================================================

/// Errors from parsing a marker payload.
///
/// A missing or unparsable frequency field is not an error: the event is
/// still recognised and simply carries no ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerError {
    /// Payload was empty or whitespace
    Empty,
    /// Payload kind is not part of the marker grammar
    Unrecognized,
}

impl fmt::Display for MarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty marker payload"),
            Self::Unrecognized => write!(f, "Unrecognized marker kind"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MarkerError {}

// ============================================================================
// Parameter Errors
// ============================================================================

/// A decoding parameter is outside its valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParameterError {
    /// Parameter name as it appears in configuration
    pub parameter: &'static str,
    /// Constraint that was violated
    pub reason: &'static str,
}

impl ParameterError {
    /// Create a parameter error
    #[must_use]
    pub const fn new(parameter: &'static str, reason: &'static str) -> Self {
        Self { parameter, reason }
    }
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid parameter {}: {}", self.parameter, self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParameterError {}
