use crate::rule::{Destination, NewRule, Rule, RulePatch};
use crate::store::RuleStore;
use crate::transaction::{Transaction, TransactionCandidate, TransactionFilter, TransactionStatus};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Actor recorded on audit events written by this service
const ACTOR: &str = "policy-gate";

/// Fixed-width timestamps so text ordering equals time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Per-connection: needed for destination cascade
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            amount INTEGER NOT NULL DEFAULT -1,
            currency TEXT NOT NULL DEFAULT 'satoshi'
        );

        CREATE TABLE IF NOT EXISTS destinations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amount INTEGER NOT NULL,
            destination TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('R', 'O')),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rules_created_at ON rules(created_at);
        CREATE INDEX IF NOT EXISTS idx_destinations_rule ON destinations(rule_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )?;

    Ok(())
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

fn rule_event(event_type: &str, rule: &Rule) -> Event {
    Event::new(
        event_type,
        "rule",
        &rule.id.to_string(),
        serde_json::json!({
            "amount": rule.amount,
            "currency": rule.currency,
            "destinations": rule.destinations,
        }),
        ACTOR,
    )
}

// ============================================================================
// RULES + DESTINATIONS
// ============================================================================

fn insert_destinations(conn: &Connection, rule_id: i64, names: &[String]) -> Result<()> {
    let mut stmt = conn.prepare("INSERT INTO destinations (rule_id, name) VALUES (?1, ?2)")?;
    for name in names {
        stmt.execute(params![rule_id, name])?;
    }
    Ok(())
}

fn get_destination_names(conn: &Connection, rule_id: i64) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM destinations WHERE rule_id = ?1 ORDER BY id")?;

    let names = stmt
        .query_map([rule_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;

    Ok(names)
}

/// Destination rows owned by a rule, in insertion order
pub fn get_destinations(conn: &Connection, rule_id: i64) -> Result<Vec<Destination>> {
    let mut stmt = conn
        .prepare("SELECT id, rule_id, name FROM destinations WHERE rule_id = ?1 ORDER BY id")?;

    let destinations = stmt
        .query_map([rule_id], |row| {
            Ok(Destination {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                name: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(destinations)
}

pub fn count_destinations(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM destinations", [], |row| row.get(0))?;
    Ok(count)
}

/// Rule row without destinations
fn read_rule_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
    let created_at: String = row.get(1)?;

    Ok(Rule {
        id: row.get(0)?,
        created_at: parse_timestamp(1, &created_at)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        destinations: Vec::new(),
    })
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<Option<Rule>> {
    let rule = conn
        .query_row(
            "SELECT id, created_at, amount, currency FROM rules WHERE id = ?1",
            [id],
            read_rule_row,
        )
        .optional()?;

    match rule {
        Some(mut rule) => {
            rule.destinations = get_destination_names(conn, rule.id)?;
            Ok(Some(rule))
        }
        None => Ok(None),
    }
}

/// Every rule, oldest first
pub fn get_all_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT id, created_at, amount, currency
         FROM rules
         ORDER BY created_at, id",
    )?;

    let mut rules = stmt
        .query_map([], read_rule_row)?
        .collect::<Result<Vec<_>, _>>()?;

    for rule in &mut rules {
        rule.destinations = get_destination_names(conn, rule.id)?;
    }

    Ok(rules)
}

/// Insert a rule and one destination row per name, atomically
pub fn insert_rule(conn: &mut Connection, new_rule: NewRule) -> Result<Rule> {
    let tx = conn.transaction()?;
    let created_at = Utc::now();

    tx.execute(
        "INSERT INTO rules (created_at, amount, currency) VALUES (?1, ?2, ?3)",
        params![format_timestamp(&created_at), new_rule.amount, new_rule.currency],
    )?;
    let id = tx.last_insert_rowid();

    insert_destinations(&tx, id, &new_rule.destinations)?;

    let rule = get_rule(&tx, id)?.ok_or_else(|| anyhow!("Rule {} vanished after insert", id))?;
    insert_event(&tx, &rule_event("rule_created", &rule))?;

    tx.commit().context("Failed to commit new rule")?;

    info!("Created new rule: {}", rule);
    Ok(rule)
}

/// Update amount/currency; a supplied destination list is deleted and recreated
pub fn update_rule(conn: &mut Connection, id: i64, patch: &RulePatch) -> Result<Option<Rule>> {
    let tx = conn.transaction()?;

    let Some(mut rule) = get_rule(&tx, id)? else {
        return Ok(None);
    };
    patch.apply(&mut rule);

    tx.execute(
        "UPDATE rules SET amount = ?1, currency = ?2 WHERE id = ?3",
        params![rule.amount, rule.currency, id],
    )?;

    if let Some(destinations) = &patch.destinations {
        tx.execute("DELETE FROM destinations WHERE rule_id = ?1", [id])?;
        insert_destinations(&tx, id, destinations)?;
    }

    insert_event(&tx, &rule_event("rule_updated", &rule))?;
    tx.commit().context("Failed to commit rule update")?;

    info!("Updated rule value: {}", rule);
    Ok(Some(rule))
}

/// Delete a rule; its destinations go with it
pub fn delete_rule(conn: &mut Connection, id: i64) -> Result<bool> {
    let tx = conn.transaction()?;

    let Some(rule) = get_rule(&tx, id)? else {
        return Ok(false);
    };

    tx.execute("DELETE FROM rules WHERE id = ?1", [id])?;
    insert_event(&tx, &rule_event("rule_deleted", &rule))?;
    tx.commit().context("Failed to commit rule deletion")?;

    info!("Deleted rule: {}", rule);
    Ok(true)
}

impl RuleStore for Connection {
    fn create_rule(&mut self, new_rule: NewRule) -> Result<Rule> {
        insert_rule(self, new_rule)
    }

    fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        get_rule(self, id)
    }

    fn list_rules(&self) -> Result<Vec<Rule>> {
        get_all_rules(self)
    }

    fn update_rule(&mut self, id: i64, patch: &RulePatch) -> Result<Option<Rule>> {
        update_rule(self, id, patch)
    }

    fn delete_rule(&mut self, id: i64) -> Result<bool> {
        delete_rule(self, id)
    }
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// Persist an evaluated transaction and its audit event in one SQLite
/// transaction. The status is never updated afterwards.
pub fn insert_transaction(
    conn: &mut Connection,
    candidate: &TransactionCandidate,
    status: TransactionStatus,
) -> Result<Transaction> {
    let created_at = Utc::now();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO transactions (amount, destination, status, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            candidate.amount,
            candidate.destination,
            status.code(),
            format_timestamp(&created_at),
        ],
    )?;

    let transaction = Transaction {
        id: tx.last_insert_rowid(),
        amount: candidate.amount,
        destination: candidate.destination.clone(),
        status,
        created_at,
    };

    let event = Event::new(
        "transaction_created",
        "transaction",
        &transaction.id.to_string(),
        serde_json::json!({
            "amount": transaction.amount,
            "destination": transaction.destination,
            "status": transaction.status,
        }),
        ACTOR,
    );
    insert_event(&tx, &event)?;
    tx.commit().context("Failed to commit new transaction")?;

    debug!("New transaction created: {}", transaction);
    Ok(transaction)
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let transaction = conn
        .query_row(
            "SELECT id, amount, destination, status, created_at FROM transactions WHERE id = ?1",
            [id],
            read_transaction_row,
        )
        .optional()?;

    Ok(transaction)
}

/// Transactions in creation order, narrowed by `filter`
pub fn get_transactions(conn: &Connection, filter: TransactionFilter) -> Result<Vec<Transaction>> {
    let transactions = match filter {
        TransactionFilter::All => {
            let mut stmt = conn.prepare(
                "SELECT id, amount, destination, status, created_at
                 FROM transactions
                 ORDER BY id",
            )?;
            let rows = stmt.query_map([], read_transaction_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        TransactionFilter::Status(status) => {
            let mut stmt = conn.prepare(
                "SELECT id, amount, destination, status, created_at
                 FROM transactions
                 WHERE status = ?1
                 ORDER BY id",
            )?;
            let rows = stmt.query_map([status.code()], read_transaction_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        TransactionFilter::Unknown => Vec::new(),
    };

    Ok(transactions)
}

fn read_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let code: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    let status = TransactionStatus::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown transaction status code {:?}", code).into(),
        )
    })?;

    Ok(Transaction {
        id: row.get(0)?,
        amount: row.get(1)?,
        destination: row.get(2)?,
        status,
        created_at: parse_timestamp(4, &created_at)?,
    })
}
