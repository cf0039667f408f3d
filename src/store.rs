// 🗂️ Rule Store - the evaluation scope
// Everything the evaluator and the API need from persistence. SQLite
// implements it in db.rs; MemoryRuleStore backs tests and dry runs.

use crate::rule::{NewRule, Rule, RulePatch};
use anyhow::Result;
use chrono::Utc;

pub trait RuleStore {
    /// Persist a new rule with its destinations. Caller validates first.
    fn create_rule(&mut self, new_rule: NewRule) -> Result<Rule>;

    fn get_rule(&self, id: i64) -> Result<Option<Rule>>;

    /// All rules, oldest first (ties broken by id)
    fn list_rules(&self) -> Result<Vec<Rule>>;

    /// Apply a patch. A supplied destination list replaces the old one
    /// entirely. `None` when the rule does not exist.
    fn update_rule(&mut self, id: i64, patch: &RulePatch) -> Result<Option<Rule>>;

    /// Remove a rule and its destinations. `false` when it did not exist.
    fn delete_rule(&mut self, id: i64) -> Result<bool>;
}

/// Sort key shared by every store
pub fn sort_by_creation(rules: &mut [Rule]) {
    rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Vec<Rule>,
    next_id: i64,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing rules (e.g. with fixed timestamps)
    pub fn with_rules(mut rules: Vec<Rule>) -> Self {
        let next_id = rules.iter().map(|r| r.id).max().unwrap_or(0);
        sort_by_creation(&mut rules);
        MemoryRuleStore { rules, next_id }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl RuleStore for MemoryRuleStore {
    fn create_rule(&mut self, new_rule: NewRule) -> Result<Rule> {
        self.next_id += 1;
        let rule = new_rule.into_rule(self.next_id, Utc::now());
        self.rules.push(rule.clone());
        Ok(rule)
    }

    fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        Ok(self.rules.iter().find(|r| r.id == id).cloned())
    }

    fn list_rules(&self) -> Result<Vec<Rule>> {
        let mut rules = self.rules.clone();
        sort_by_creation(&mut rules);
        Ok(rules)
    }

    fn update_rule(&mut self, id: i64, patch: &RulePatch) -> Result<Option<Rule>> {
        Ok(self.rules.iter_mut().find(|r| r.id == id).map(|rule| {
            patch.apply(rule);
            rule.clone()
        }))
    }

    fn delete_rule(&mut self, id: i64) -> Result<bool> {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        Ok(self.rules.len() != before)
    }
}
