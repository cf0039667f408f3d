// ⚖️ Transaction Evaluator
// Rules are OR-ed: the first rule that accepts both the amount and the
// destination approves the transaction. A rule that fails to evaluate
// counts as not matching; evaluation itself never fails.

use crate::converter::CurrencyConverter;
use crate::rule::Rule;
use crate::store::{sort_by_creation, RuleStore};
use crate::transaction::{TransactionCandidate, TransactionStatus};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// PER-RULE OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Matched,
    NotMatched,
    /// Price lookup failed; the rule is skipped
    ConversionFailed(String),
    /// Anything else that went wrong with this rule
    UnexpectedFailure(String),
}

impl RuleOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, RuleOutcome::Matched)
    }
}

/// Check one rule. Amount first, then destination.
pub async fn evaluate_rule(
    rule: &Rule,
    candidate: &TransactionCandidate,
    converter: &dyn CurrencyConverter,
) -> RuleOutcome {
    match rule.is_amount_valid(candidate.amount, converter).await {
        Ok(true) if rule.is_destination_valid(&candidate.destination) => RuleOutcome::Matched,
        Ok(_) => RuleOutcome::NotMatched,
        Err(e) if e.is_conversion() => RuleOutcome::ConversionFailed(e.to_string()),
        Err(e) => RuleOutcome::UnexpectedFailure(e.to_string()),
    }
}

/// Fold per-rule outcomes into the final status
pub fn decide<'a, I>(outcomes: I) -> TransactionStatus
where
    I: IntoIterator<Item = &'a RuleOutcome>,
{
    if outcomes.into_iter().any(RuleOutcome::is_match) {
        TransactionStatus::Outgoing
    } else {
        TransactionStatus::Rejected
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Status plus what each visited rule said, in visit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: TransactionStatus,
    pub outcomes: Vec<(i64, RuleOutcome)>,
}

#[derive(Clone)]
pub struct TransactionEvaluator {
    converter: Arc<dyn CurrencyConverter>,
}

impl TransactionEvaluator {
    pub fn new(converter: Arc<dyn CurrencyConverter>) -> Self {
        TransactionEvaluator { converter }
    }

    /// Status for `candidate` against a snapshot of rules
    pub async fn evaluate(&self, rules: &[Rule], candidate: &TransactionCandidate) -> TransactionStatus {
        self.evaluate_detailed(rules, candidate).await.status
    }

    /// Read the snapshot from `store`, then evaluate. Only the store read can fail.
    pub async fn evaluate_store<S>(
        &self,
        store: &S,
        candidate: &TransactionCandidate,
    ) -> Result<TransactionStatus>
    where
        S: RuleStore + Sync + ?Sized,
    {
        let rules = store.list_rules()?;
        Ok(self.evaluate(&rules, candidate).await)
    }

    pub async fn evaluate_detailed(
        &self,
        rules: &[Rule],
        candidate: &TransactionCandidate,
    ) -> Evaluation {
        let mut ordered = rules.to_vec();
        sort_by_creation(&mut ordered);

        let mut outcomes = Vec::new();

        for rule in &ordered {
            let outcome = evaluate_rule(rule, candidate, self.converter.as_ref()).await;

            match &outcome {
                RuleOutcome::ConversionFailed(e) => warn!(
                    rule_id = rule.id,
                    error = %e,
                    "Could not finish transaction status test on {} because of price lookup error",
                    rule
                ),
                RuleOutcome::UnexpectedFailure(e) => error!(
                    rule_id = rule.id,
                    error = %e,
                    "Unexpected failure while evaluating {}",
                    rule
                ),
                RuleOutcome::Matched => debug!(rule_id = rule.id, "{} approved transaction", rule),
                RuleOutcome::NotMatched => {}
            }

            let matched = outcome.is_match();
            outcomes.push((rule.id, outcome));
            if matched {
                break;
            }
        }

        let status = decide(outcomes.iter().map(|(_, o)| o));
        Evaluation { status, outcomes }
    }
}

// ============================================================================
// TESTS
// ============================================================================
