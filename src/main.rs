use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;

use policy_gate::{
    get_all_rules, get_events_for_entity, logging, open_database, Config, HttpCurrencyConverter,
    RuleOutcome, TransactionCandidate, TransactionEvaluator, TransactionStatus,
};

const USAGE: &str = "Usage:
  policy-gate init                          Create the database schema
  policy-gate rules                         List rules in evaluation order
  policy-gate check <amount> <destination>  Dry-run a transaction (nothing is stored)
  policy-gate history <rule_id>             Show audit events for a rule";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = Config::from_env()?;
    logging::init(config.log_format)?;

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config),
        Some("rules") => run_rules(&config),
        Some("check") if args.len() == 4 => run_check(&config, &args[2], &args[3]).await,
        Some("history") if args.len() == 3 => run_history(&config, &args[2]),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn run_init(config: &Config) -> Result<()> {
    open_database(&config.db_path)?;
    println!("✓ Database initialized at {:?}", config.db_path);
    Ok(())
}

fn run_rules(config: &Config) -> Result<()> {
    let conn = open_database(&config.db_path)?;
    let rules = get_all_rules(&conn)?;

    if rules.is_empty() {
        println!("No rules defined: every transaction will be rejected.");
        return Ok(());
    }

    for rule in &rules {
        println!("{}  created {}", rule, rule.created_at.to_rfc3339());
    }
    println!("\n{} rule(s)", rules.len());

    Ok(())
}

async fn run_check(config: &Config, amount: &str, destination: &str) -> Result<()> {
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("amount must be an integer, got {:?}", amount))?;
    let candidate = TransactionCandidate::new(amount, destination);
    candidate.validate()?;

    let rules = {
        let conn = open_database(&config.db_path)?;
        get_all_rules(&conn)?
    };

    let converter = HttpCurrencyConverter::new(config.price_url.clone(), config.price_timeout())?;
    let evaluator = TransactionEvaluator::new(Arc::new(converter));
    let evaluation = evaluator.evaluate_detailed(&rules, &candidate).await;

    for (rule_id, outcome) in &evaluation.outcomes {
        let line = match outcome {
            RuleOutcome::Matched => "matched".to_string(),
            RuleOutcome::NotMatched => "not matched".to_string(),
            RuleOutcome::ConversionFailed(e) => format!("skipped ({})", e),
            RuleOutcome::UnexpectedFailure(e) => format!("failed ({})", e),
        };
        println!("  rule {:>4}: {}", rule_id, line);
    }

    let mark = match evaluation.status {
        TransactionStatus::Outgoing => "✅",
        TransactionStatus::Rejected => "❌",
    };
    println!(
        "\n{} {} to {}: {}",
        mark, candidate.amount, candidate.destination, evaluation.status
    );

    Ok(())
}

fn run_history(config: &Config, rule_id: &str) -> Result<()> {
    let rule_id: i64 = rule_id
        .parse()
        .with_context(|| format!("rule_id must be an integer, got {:?}", rule_id))?;

    let conn = open_database(&config.db_path)?;
    let events = get_events_for_entity(&conn, "rule", &rule_id.to_string())?;

    if events.is_empty() {
        println!("No events for rule {}", rule_id);
    }
    for event in events {
        println!("{}  {:<14} {}", event.timestamp.to_rfc3339(), event.event_type, event.data);
    }

    Ok(())
}
