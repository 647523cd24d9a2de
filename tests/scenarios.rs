//! End-to-end scenarios: each test seeds two SQLite tables,
//! runs the full eight-stage pipeline through `engine::run_pipeline`, and
//! asserts on the classified result rows. Mirrors the fixture-builder +
//! assertion shape of `tests/backtest_run_integration.rs`.

use chrono::NaiveDate;
use rusqlite::Connection;
use uuid::Uuid;

use rapo::engine::run_pipeline;
use rapo::model::{
    ControlConfig, CorrelationConfigEntry, DiscrepancyConfigEntry, PeriodType, ResultType,
    RuleConfig, SourceConfig,
};
use rapo::GlobalConfig;

fn global() -> GlobalConfig {
    GlobalConfig::default()
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 10).unwrap()
}

fn source(name: &str, table: &str) -> SourceConfig {
    SourceConfig {
        source_name: table.to_string(),
        date_field: "d".to_string(),
        key_field: Some("k".to_string()),
        key_alias: "key".to_string(),
        filter: None,
        output_table: name.to_string(),
    }
}

fn control(rule_config: RuleConfig) -> ControlConfig {
    ControlConfig {
        control_id: 1,
        control_name: "demo".to_string(),
        source_a: source("out_a", "a"),
        source_b: source("out_b", "b"),
        period_back: 0,
        period_number: 1,
        period_type: PeriodType::D,
        parallelism: 1,
        timeout_secs: None,
        instance_limit: 1,
        output_limit: None,
        rule_config,
        iteration_config: vec![],
    }
}

fn correlate_on_k() -> Vec<CorrelationConfigEntry> {
    vec![CorrelationConfigEntry {
        field_a: "k".to_string(),
        field_b: "k".to_string(),
        allow_null: false,
        formula_mode: false,
    }]
}

#[test]
fn perfect_match_yields_success_both_sides() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 10.0), ('2', '2026-07-10 11:00:00', 20.0);
         INSERT INTO b VALUES ('1', '2026-07-10 10:00:00', 10.0), ('2', '2026-07-10 11:00:00', 20.0);",
    )
    .unwrap();

    let rule_config = RuleConfig {
        need_recons_a: true,
        need_recons_b: true,
        correlation_config: correlate_on_k(),
        ..RuleConfig::default()
    };
    let outcome = run_pipeline(&conn, &control(rule_config), today(), Uuid::new_v4(), &global()).unwrap();

    assert_eq!(outcome.results_a.len(), 2);
    assert_eq!(outcome.results_b.len(), 2);
    assert!(outcome.results_a.iter().all(|r| r.result_type == ResultType::Success));
    assert!(outcome.results_b.iter().all(|r| r.result_type == ResultType::Success));
}

#[test]
fn pure_loss_on_isolated_a_row() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 10.0);",
    )
    .unwrap();

    let rule_config = RuleConfig {
        correlation_config: correlate_on_k(),
        ..RuleConfig::default()
    };
    let outcome = run_pipeline(&conn, &control(rule_config), today(), Uuid::new_v4(), &global()).unwrap();

    assert_eq!(outcome.results_a.len(), 1);
    assert_eq!(outcome.results_a[0].result_type, ResultType::Loss);
    assert!(outcome.results_b.is_empty());
}

fn discrepancy_control(tolerance_from: f64, tolerance_to: f64) -> ControlConfig {
    let rule_config = RuleConfig {
        need_recons_a: true,
        need_recons_b: true,
        correlation_config: correlate_on_k(),
        discrepancy_config: vec![DiscrepancyConfigEntry {
            field_a: "v".to_string(),
            field_b: "v".to_string(),
            numeric_tolerance_from: tolerance_from,
            numeric_tolerance_to: tolerance_to,
            percentage_mode: false,
            formula_mode: false,
            formula_alias: None,
        }],
        ..RuleConfig::default()
    };
    control(rule_config)
}

#[test]
fn numeric_discrepancy_within_tolerance_is_success() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 100.0);
         INSERT INTO b VALUES ('1', '2026-07-10 10:00:00', 103.0);",
    )
    .unwrap();

    let outcome = run_pipeline(&conn, &discrepancy_control(-5.0, 5.0), today(), Uuid::new_v4(), &global()).unwrap();
    assert_eq!(outcome.results_a[0].result_type, ResultType::Success);
    assert_eq!(outcome.results_b[0].result_type, ResultType::Success);
}

#[test]
fn numeric_discrepancy_outside_tolerance_is_flagged() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 100.0);
         INSERT INTO b VALUES ('1', '2026-07-10 10:00:00', 103.0);",
    )
    .unwrap();

    let outcome = run_pipeline(&conn, &discrepancy_control(-2.0, 2.0), today(), Uuid::new_v4(), &global()).unwrap();
    assert_eq!(outcome.results_a[0].result_type, ResultType::Discrepancy);
    assert_eq!(outcome.results_a[0].discrepancy_description.as_deref(), Some("v[3]"));
}

#[test]
fn time_shifted_duplicate_cluster_resolves_positionally() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 0.0), ('1', '2026-07-10 10:02:00', 0.0);
         INSERT INTO b VALUES ('1', '2026-07-10 10:00:01', 0.0), ('1', '2026-07-10 10:00:03', 0.0);",
    )
    .unwrap();

    let rule_config = RuleConfig {
        need_recons_a: true,
        need_recons_b: true,
        correlation_config: correlate_on_k(),
        fuzzy_optimization: Some(true),
        time_shift_from: -120,
        time_shift_to: 120,
        time_tolerance_from: -120,
        time_tolerance_to: 120,
        ..RuleConfig::default()
    };
    let outcome = run_pipeline(&conn, &control(rule_config), today(), Uuid::new_v4(), &global()).unwrap();

    assert_eq!(outcome.results_a.len(), 2);
    assert_eq!(outcome.results_b.len(), 2);
    assert!(outcome.results_a.iter().all(|r| r.result_type == ResultType::Success));
    assert!(outcome.results_b.iter().all(|r| r.result_type == ResultType::Success));
}

#[test]
fn one_to_many_with_discrepancy_matching_reclassifies_loser_as_loss() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE a (k TEXT, d TEXT, v REAL);
         CREATE TABLE b (k TEXT, d TEXT, v REAL);
         INSERT INTO a VALUES ('1', '2026-07-10 10:00:00', 10.0);
         INSERT INTO b VALUES ('1', '2026-07-10 10:00:00', 10.0), ('1', '2026-07-10 10:00:00', 99.0);",
    )
    .unwrap();

    let rule_config = RuleConfig {
        need_recons_a: true,
        need_recons_b: true,
        allow_duplicates: true,
        discrepancy_matching: Some(true),
        correlation_config: correlate_on_k(),
        discrepancy_config: vec![DiscrepancyConfigEntry {
            field_a: "v".to_string(),
            field_b: "v".to_string(),
            numeric_tolerance_from: -1.0,
            numeric_tolerance_to: 1.0,
            percentage_mode: false,
            formula_mode: false,
            formula_alias: None,
        }],
        ..RuleConfig::default()
    };
    let outcome = run_pipeline(&conn, &control(rule_config), today(), Uuid::new_v4(), &global()).unwrap();

    assert_eq!(outcome.results_a.len(), 1);
    assert_eq!(outcome.results_a[0].result_type, ResultType::Success);

    assert_eq!(outcome.results_b.len(), 2);
    let success_count = outcome.results_b.iter().filter(|r| r.result_type == ResultType::Success).count();
    let loss_count = outcome.results_b.iter().filter(|r| r.result_type == ResultType::Loss).count();
    assert_eq!(success_count, 1);
    assert_eq!(loss_count, 1);
    assert!(outcome.results_b.iter().all(|r| r.result_type != ResultType::Duplicate));
}

#[test]
fn correlation_limit_aborts_before_any_result_is_written() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("CREATE TABLE a (k TEXT, d TEXT); CREATE TABLE b (k TEXT, d TEXT);").unwrap();
    {
        let tx = conn.unchecked_transaction().unwrap();
        for i in 0..1000 {
            tx.execute("INSERT INTO a VALUES ('same', '2026-07-10 10:00:00')", []).unwrap();
            tx.execute("INSERT INTO b VALUES ('same', '2026-07-10 10:00:00')", []).unwrap();
            let _ = i;
        }
        tx.commit().unwrap();
    }

    let rule_config = RuleConfig {
        correlation_config: correlate_on_k(),
        correlation_limit: rapo::model::CorrelationLimit::Auto,
        ..RuleConfig::default()
    };
    let err = run_pipeline(&conn, &control(rule_config), today(), Uuid::new_v4(), &global()).unwrap_err();
    assert!(matches!(err, rapo::RapoError::CorrelationLimitExceeded { .. }));

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'rapo_res%'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(table_count, 0, "no result table should be created on an aborted run");
}
