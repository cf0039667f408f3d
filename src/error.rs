// ⚠️ Error taxonomy
// Conversion failures and per-rule failures stay inside the evaluator.
// Validation failures are the only errors a client ever sees.

use thiserror::Error;

// ============================================================================
// CURRENCY CONVERSION
// ============================================================================

/// The price lookup failed or answered with something that is not a number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("currency conversion failed: {message}")]
pub struct CurrencyConversionError {
    /// Diagnostic text (status code + body when a response was received)
    pub message: String,
}

impl CurrencyConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure built from an HTTP response that could not be used
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::new(format!("Status Code: {}, Message: {}", status, body))
    }
}

// ============================================================================
// RULE EVALUATION
// ============================================================================

/// Failure while checking one rule against a candidate transaction.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error(transparent)]
    Conversion(#[from] CurrencyConversionError),

    #[error("amount threshold {threshold} times rate {rate} overflows")]
    AmountOverflow { threshold: i64, rate: i64 },

    #[error("invalid amount threshold {0} (expected -1 or >= 0)")]
    InvalidThreshold(i64),
}

impl RuleError {
    /// Conversion failures are expected fallout from the price service
    pub fn is_conversion(&self) -> bool {
        matches!(self, RuleError::Conversion(_))
    }
}

// ============================================================================
// CLIENT VALIDATION
// ============================================================================

/// Well-formed payload whose values are not acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
