//! Demo entry point for the reconciliation engine: seeds an in-memory
//! SQLite database with two small sources and one control, runs it once
//! through `run_control`, and prints the classified result rows.
//!
//! Not a scheduler or CLI product — a harness for exercising the pipeline
//! end to end without a real catalogue or source warehouse wired up.
//! Bootstraps `tracing` and env-driven config the same way every other
//! binary in this workspace does, trimmed to what a single demo run needs.

use clap::Parser;
use rusqlite::Connection;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rapo::control::ReconciliationControl;
use rapo::hooks::NoopHooks;
use rapo::model::{
    ControlConfig, CorrelationConfigEntry, DiscrepancyConfigEntry, PeriodType, RuleConfig,
    SourceConfig,
};
use rapo::{run_control, Catalogue, GlobalConfig};

/// Runs a single demo reconciliation between two seeded tables.
#[derive(Parser, Debug)]
#[command(name = "rapo", about = "Revenue Assurance reconciliation control engine demo")]
struct Cli {
    /// Path to the global `[ALGORITHM]` defaults file; missing is fine.
    #[arg(long, env = "RAPO_CONFIG", default_value = "rapo.toml")]
    config: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rapo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Creates `billing`/`mediation` tables with a handful of rows shaped to
/// exercise a Success, a Loss, and a numeric Discrepancy. Dated against the
/// current month so the default window resolves over them regardless of
/// when the demo is run.
fn seed_demo_db() -> Connection {
    let today = chrono::Utc::now().date_naive();
    let d = |day: u32| {
        chrono::NaiveDate::from_ymd_opt(today.year(), today.month(), day.min(27))
            .unwrap()
            .format("%Y-%m-%d")
            .to_string()
    };
    use chrono::Datelike;

    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(&format!(
        "CREATE TABLE billing (id INTEGER PRIMARY KEY, call_id TEXT, event_time TEXT, amount REAL);
         CREATE TABLE mediation (id INTEGER PRIMARY KEY, call_id TEXT, event_time TEXT, amount REAL);

         INSERT INTO billing VALUES (1, 'call-1', '{d1} 09:00:00', 10.0);
         INSERT INTO mediation VALUES (1, 'call-1', '{d1} 09:00:02', 10.0);

         INSERT INTO billing VALUES (2, 'call-2', '{d2} 09:05:00', 25.0);
         INSERT INTO mediation VALUES (2, 'call-2', '{d2} 09:05:01', 27.5);

         INSERT INTO billing VALUES (3, 'call-3', '{d3} 09:10:00', 5.0);",
        d1 = d(1),
        d2 = d(2),
        d3 = d(3),
    ))
    .expect("seed demo tables");
    conn
}

fn demo_control() -> ControlConfig {
    let mut rule_config = RuleConfig {
        need_recons_a: true,
        need_recons_b: true,
        discrepancy_matching: Some(true),
        ..RuleConfig::default()
    };
    rule_config.correlation_config.push(CorrelationConfigEntry {
        field_a: "call_id".to_string(),
        field_b: "call_id".to_string(),
        allow_null: false,
        formula_mode: false,
    });
    rule_config.discrepancy_config.push(DiscrepancyConfigEntry {
        field_a: "amount".to_string(),
        field_b: "amount".to_string(),
        numeric_tolerance_from: -0.01,
        numeric_tolerance_to: 0.01,
        percentage_mode: false,
        formula_mode: false,
        formula_alias: None,
    });

    ControlConfig {
        control_id: 1,
        control_name: "billing_vs_mediation".to_string(),
        source_a: SourceConfig {
            source_name: "billing".to_string(),
            date_field: "event_time".to_string(),
            key_field: Some("call_id".to_string()),
            key_alias: "key".to_string(),
            filter: None,
            output_table: "out_a".to_string(),
        },
        source_b: SourceConfig {
            source_name: "mediation".to_string(),
            date_field: "event_time".to_string(),
            key_field: Some("call_id".to_string()),
            key_alias: "key".to_string(),
            filter: None,
            output_table: "out_b".to_string(),
        },
        period_back: 0,
        period_number: 1,
        period_type: PeriodType::M,
        parallelism: 1,
        timeout_secs: None,
        instance_limit: 1,
        output_limit: None,
        rule_config,
        iteration_config: vec![],
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let global = GlobalConfig::load(&cli.config)?;
    let conn = seed_demo_db();
    let catalogue = Catalogue::open_in_memory()?;
    let control = demo_control();

    info!(control = %control.control_name, "running demo reconciliation");
    let outcome = run_control(
        &conn,
        &catalogue,
        &control,
        &ReconciliationControl,
        &NoopHooks,
        &global,
    )?;

    let result = outcome.result.expect("run_control succeeded");
    println!("window: {} .. {}", result.window.date_from, result.window.date_to);
    println!("fetched: a={} b={}", result.fetched_a, result.fetched_b);

    println!("\n-- side A --");
    for row in &result.results_a {
        println!(
            "{:>4}  {:<10}  {:<11}  {}",
            row.row_id,
            row.key_value,
            row.result_type.as_str(),
            row.discrepancy_description.as_deref().unwrap_or(""),
        );
    }

    println!("\n-- side B --");
    for row in &result.results_b {
        println!(
            "{:>4}  {:<10}  {:<11}  {}",
            row.row_id,
            row.key_value,
            row.result_type.as_str(),
            row.discrepancy_description.as_deref().unwrap_or(""),
        );
    }

    Ok(())
}
