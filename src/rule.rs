// 📏 Policy Rule - amount threshold + destination allow-list
// A transaction passes a rule when BOTH checks pass.

use crate::converter::{CurrencyConverter, BASE_UNIT};
use crate::error::{RuleError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Sentinel threshold: no amount limit
pub const NO_AMOUNT_LIMIT: i64 = -1;

/// Longest accepted currency code
pub const MAX_CURRENCY_LEN: usize = 10;

/// Longest accepted destination name
pub const MAX_DESTINATION_LEN: usize = 100;

// ============================================================================
// RULE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Assigned by the store, never changes
    #[serde(rename = "rule_id")]
    pub id: i64,

    /// Set once at creation, defines evaluation order. Not part of the JSON shape.
    #[serde(skip)]
    pub created_at: DateTime<Utc>,

    /// Maximum amount, -1 = unlimited
    pub amount: i64,

    /// Currency of `amount` ("satoshi" = no conversion)
    pub currency: String,

    /// Allowed destinations, empty = any destination
    pub destinations: Vec<String>,
}

impl Rule {
    pub fn has_amount_limit(&self) -> bool {
        self.amount != NO_AMOUNT_LIMIT
    }

    /// True when the threshold is unlimited or `amount` does not exceed it.
    ///
    /// Hits the converter when the rule is in a foreign currency, so this can
    /// fail with a conversion error.
    pub async fn is_amount_valid(
        &self,
        amount: i64,
        converter: &dyn CurrencyConverter,
    ) -> Result<bool, RuleError> {
        if !self.has_amount_limit() {
            return Ok(true);
        }

        Ok(amount <= self.amount_in_base_unit(converter).await?)
    }

    /// True when there is no allow-list or `destination` is on it
    pub fn is_destination_valid(&self, destination: &str) -> bool {
        self.destinations.is_empty() || self.destinations.iter().any(|d| d == destination)
    }

    /// Threshold expressed in satoshis.
    ///
    /// The price service is queried with the threshold itself and the returned
    /// value is multiplied by the threshold again (rate * threshold).
    pub async fn amount_in_base_unit(
        &self,
        converter: &dyn CurrencyConverter,
    ) -> Result<i64, RuleError> {
        if self.amount < NO_AMOUNT_LIMIT {
            return Err(RuleError::InvalidThreshold(self.amount));
        }

        if self.currency == BASE_UNIT {
            return Ok(self.amount);
        }

        let rate = converter.exchange_rate(&self.currency, self.amount).await?;

        rate.checked_mul(self.amount).ok_or(RuleError::AmountOverflow {
            threshold: self.amount,
            rate,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rule {} ({} {}, destinations: [{}])",
            self.id,
            self.amount,
            self.currency,
            self.destinations.join(", ")
        )
    }
}

/// One allow-listed destination row, owned by exactly one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    pub rule_id: i64,
    pub name: String,
}

// ============================================================================
// CREATE / UPDATE PAYLOADS
// ============================================================================

fn default_amount() -> i64 {
    NO_AMOUNT_LIMIT
}

fn default_currency() -> String {
    BASE_UNIT.to_string()
}

/// Payload for creating a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default = "default_amount")]
    pub amount: i64,

    #[serde(default = "default_currency")]
    pub currency: String,

    pub destinations: Vec<String>,
}

impl NewRule {
    pub fn new(amount: i64, currency: &str, destinations: &[&str]) -> Self {
        NewRule {
            amount,
            currency: currency.to_string(),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_threshold(self.amount)?;
        validate_currency(&self.currency)?;
        validate_destinations(&self.destinations)
    }

    /// Materialize once the store has assigned identity
    pub fn into_rule(self, id: i64, created_at: DateTime<Utc>) -> Rule {
        Rule {
            id,
            created_at,
            amount: self.amount,
            currency: self.currency,
            destinations: self.destinations,
        }
    }
}

/// Partial update. `destinations`, when present, replaces the whole list.
/// A field may be omitted but never sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulePatch {
    #[serde(default, deserialize_with = "present")]
    pub amount: Option<i64>,

    #[serde(default, deserialize_with = "present")]
    pub currency: Option<String>,

    #[serde(default, deserialize_with = "present")]
    pub destinations: Option<Vec<String>>,
}

/// Only reached when the key exists, so `null` fails like any other wrong type
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl RulePatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(amount) = self.amount {
            validate_threshold(amount)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        if let Some(destinations) = &self.destinations {
            validate_destinations(destinations)?;
        }
        Ok(())
    }

    /// Apply to an existing rule; identity and creation time are kept
    pub fn apply(&self, rule: &mut Rule) {
        if let Some(amount) = self.amount {
            rule.amount = amount;
        }
        if let Some(currency) = &self.currency {
            rule.currency = currency.clone();
        }
        if let Some(destinations) = &self.destinations {
            rule.destinations = destinations.clone();
        }
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

pub fn validate_threshold(amount: i64) -> Result<(), ValidationError> {
    if amount < NO_AMOUNT_LIMIT {
        return Err(ValidationError::invalid(
            "amount",
            format!("must be -1 (no limit) or a non-negative integer, got {}", amount),
        ));
    }
    Ok(())
}

pub fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.trim().is_empty() {
        return Err(ValidationError::invalid("currency", "may not be blank"));
    }
    if currency.chars().count() > MAX_CURRENCY_LEN {
        return Err(ValidationError::invalid(
            "currency",
            format!("ensure this field has no more than {} characters", MAX_CURRENCY_LEN),
        ));
    }
    Ok(())
}

pub fn validate_destination(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::invalid("destination", "may not be blank"));
    }
    if name.chars().count() > MAX_DESTINATION_LEN {
        return Err(ValidationError::invalid(
            "destination",
            format!("ensure this field has no more than {} characters", MAX_DESTINATION_LEN),
        ));
    }
    Ok(())
}

fn validate_destinations(destinations: &[String]) -> Result<(), ValidationError> {
    destinations.iter().try_for_each(|d| validate_destination(d))
}

// ============================================================================
// TESTS
// ============================================================================
