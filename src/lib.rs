// Policy Gate - Core Library
// Rule-based approval of outgoing transactions. Exposes all modules for the
// CLI, the API server, and tests.

pub mod config;
pub mod converter;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod logging;
pub mod rule;
pub mod store;
pub mod transaction;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use config::{Config, LogFormat};
pub use converter::{
    CurrencyConverter, FixedRateConverter, HttpCurrencyConverter,
    BASE_UNIT, BASE_UNIT_SCALE,
};
pub use db::{
    Event,
    open_database, setup_database,
    insert_rule, get_rule, get_all_rules, update_rule, delete_rule,
    insert_transaction, get_transactions, get_events_for_entity,
};
pub use error::{CurrencyConversionError, RuleError, ValidationError};
pub use evaluator::{decide, evaluate_rule, Evaluation, RuleOutcome, TransactionEvaluator};
pub use rule::{Destination, NewRule, Rule, RulePatch, NO_AMOUNT_LIMIT};
pub use store::{MemoryRuleStore, RuleStore};
pub use transaction::{Transaction, TransactionCandidate, TransactionFilter, TransactionStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
