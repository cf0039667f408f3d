// 💸 Transaction - the outcome record of one evaluation
// Created exactly once, status fixed at creation, never updated.

use crate::error::ValidationError;
use crate::rule::validate_destination;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// No rule approved the transaction
    Rejected,
    /// Approved by at least one rule
    Outgoing,
}

impl TransactionStatus {
    /// Single-letter storage code
    pub fn code(&self) -> &'static str {
        match self {
            TransactionStatus::Rejected => "R",
            TransactionStatus::Outgoing => "O",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "R" => Some(TransactionStatus::Rejected),
            "O" => Some(TransactionStatus::Outgoing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Outgoing => "outgoing",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CANDIDATE + RECORD
// ============================================================================

/// A proposed outgoing transaction, before evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCandidate {
    /// Amount in satoshis
    pub amount: i64,
    pub destination: String,
}

impl TransactionCandidate {
    pub fn new(amount: i64, destination: &str) -> Self {
        TransactionCandidate {
            amount,
            destination: destination.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_destination(&self.destination)
    }
}

/// Persisted evaluation outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    #[serde(skip)]
    pub id: i64,

    pub amount: i64,
    pub destination: String,
    pub status: TransactionStatus,

    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {}: {} to {} marked {}",
            self.id, self.amount, self.destination, self.status
        )
    }
}

// ============================================================================
// LIST FILTER
// ============================================================================

/// `?filter=` value on the transaction list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFilter {
    All,
    Status(TransactionStatus),
    /// Unrecognized value: matches nothing
    Unknown,
}

impl TransactionFilter {
    /// Missing, empty or "all" lists everything; status names are exact
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") | Some("all") => TransactionFilter::All,
            Some("outgoing") => TransactionFilter::Status(TransactionStatus::Outgoing),
            Some("rejected") => TransactionFilter::Status(TransactionStatus::Rejected),
            Some(_) => TransactionFilter::Unknown,
        }
    }

    /// Read `filter` from raw query pairs; a repeated key resolves to its last value
    pub fn from_query(pairs: &[(String, String)]) -> Self {
        let raw = pairs
            .iter()
            .rev()
            .find(|(key, _)| key == "filter")
            .map(|(_, value)| value.as_str());

        Self::parse(raw)
    }
}
