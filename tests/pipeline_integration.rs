//! End-to-end scenarios against a real TimescaleDB/Postgres instance.
//!
//! Gated behind `DATABASE_URL` and the `test-support` feature (for
//! `adapter::mock::MockAdapter`), so the fast unit suite never needs a live
//! database. Run with:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test --features test-support -- --ignored
//! ```

#![cfg(feature = "test-support")]

use chrono::NaiveDate;
use hist_data_engine::adapter::mock::MockAdapter;
use hist_data_engine::config::{JobConfig, SymbolType};
use hist_data_engine::models::RawRecord;
use hist_data_engine::pipeline::{Orchestrator, PipelineStatus};
use hist_data_engine::rules::MappingDocument;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run the live-Postgres integration suite");
    PgPoolOptions::new()
        .max_connections(5)
        .test_before_acquire(true)
        .connect(&url)
        .await
        .expect("failed to connect to test database")
}

fn job(schema: &str, symbols: Vec<&str>) -> JobConfig {
    JobConfig {
        name: "integration-test".into(),
        api: "databento".into(),
        dataset: "GLBX.MDP3".into(),
        schema: schema.into(),
        symbols: symbols.into_iter().map(String::from).collect(),
        stype_in: SymbolType::Continuous,
        start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        chunk_interval_days: None,
        batch_size: Some(100),
        enable_market_calendar_filtering: false,
        exchange_name: None,
    }
}

fn ohlcv_raw(close: &str, ts: &str) -> RawRecord {
    let mut r = RawRecord::new();
    r.set("ts_event", Value::String(ts.into()));
    r.set("instrument_id", Value::from(1));
    r.set("symbol", Value::String("ES.c.0".into()));
    r.set("open", Value::String("4690.00".into()));
    r.set("high", Value::String("4720.00".into()));
    r.set("low", Value::String("4680.00".into()));
    r.set("close", Value::String(close.into()));
    r.set("volume", Value::from(1000));
    r
}

fn trade_raw_missing_symbol(price: &str, ts: &str) -> RawRecord {
    let mut r = RawRecord::new();
    r.set("ts_event", Value::String(ts.into()));
    r.set("instrument_id", Value::from(42));
    r.set("price", Value::String(price.into()));
    r.set("size", Value::from(5));
    r
}

fn statistics_raw_legacy_price(value: &str, ts: &str) -> RawRecord {
    let mut r = RawRecord::new();
    r.set("ts_event", Value::String(ts.into()));
    r.set("instrument_id", Value::from(1));
    r.set("symbol", Value::String("ES.c.0".into()));
    r.set("stat_type", Value::String("settlement_price".into()));
    r.set("price", Value::String(value.into()));
    r
}

fn tbbo_raw_crossed(ts: &str) -> RawRecord {
    let mut r = RawRecord::new();
    r.set("ts_event", Value::String(ts.into()));
    r.set("instrument_id", Value::from(1));
    r.set("symbol", Value::String("ES.c.0".into()));
    r.set("bid_px", Value::String("100.25".into()));
    r.set("ask_px", Value::String("100.20".into()));
    r
}

fn tbbo_raw_missing_ts_event() -> RawRecord {
    let mut r = RawRecord::new();
    r.set("instrument_id", Value::from(1));
    r.set("symbol", Value::String("ES.c.0".into()));
    r
}

#[tokio::test]
#[ignore]
async fn scenario_a_ohlcv_round_trip() {
    let pool = test_pool().await;
    let adapter = MockAdapter::new(vec![
        ohlcv_raw("4700.25", "2024-01-02T00:00:00Z"),
        ohlcv_raw("4710.50", "2024-01-03T00:00:00Z"),
        ohlcv_raw("4705.00", "2024-01-04T00:00:00Z"),
    ]);
    let mut orchestrator = Orchestrator::new(adapter, MappingDocument::empty(), pool.clone());
    let job = job("ohlcv-1d", vec!["ES.c.0"]);
    let result = orchestrator.execute(&job).await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.stats.records_stored, 3);
    assert_eq!(result.stats.records_quarantined, 0);

    let qb = hist_data_engine::query::QueryBuilder::new(pool);
    let rows = qb
        .query_daily_ohlcv("ES.c.0", Some(job.start_date), Some(job.end_date), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.windows(2).all(|w| w[0].ts_event >= w[1].ts_event));
}

#[tokio::test]
#[ignore]
async fn scenario_b_trade_auto_repair_from_job_symbol() {
    let pool = test_pool().await;
    let adapter = MockAdapter::new(vec![trade_raw_missing_symbol(
        "100.50",
        "2024-01-02T10:00:00Z",
    )]);
    let mut orchestrator = Orchestrator::new(adapter, MappingDocument::empty(), pool);
    let job = job("trade", vec!["ES.c.0"]);
    let result = orchestrator.execute(&job).await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.stats.records_stored, 1);
}

#[tokio::test]
#[ignore]
async fn scenario_c_statistics_field_rename() {
    let pool = test_pool().await;
    let adapter = MockAdapter::new(vec![statistics_raw_legacy_price(
        "4700.25",
        "2024-01-02T16:00:00Z",
    )]);
    let mut orchestrator = Orchestrator::new(adapter, MappingDocument::empty(), pool);
    let job = job("statistics", vec!["ES.c.0"]);
    let result = orchestrator.execute(&job).await;

    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.stats.records_stored, 1);
}

#[tokio::test]
#[ignore]
async fn scenario_d_tbbo_crossed_market() {
    let pool = test_pool().await;
    let adapter = MockAdapter::new(vec![tbbo_raw_crossed("2024-01-02T10:00:00Z")]);
    let mut orchestrator = Orchestrator::new(adapter, MappingDocument::empty(), pool.clone());
    let job = job("tbbo", vec!["ES.c.0"]);
    let result = orchestrator.execute(&job).await;

    assert_eq!(result.status, PipelineStatus::Success);
    let qb = hist_data_engine::query::QueryBuilder::new(pool);
    let rows = qb
        .query_tbbo("ES.c.0", Some(job.start_date), Some(job.end_date), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_crossed);
}

#[tokio::test]
#[ignore]
async fn scenario_e_idempotent_rerun() {
    let pool = test_pool().await;
    let record = ohlcv_raw("4700.25", "2024-01-02T00:00:00Z");
    let job = job("ohlcv-1d", vec!["ES.c.0"]);

    let mut first = Orchestrator::new(
        MockAdapter::new(vec![record.clone()]),
        MappingDocument::empty(),
        pool.clone(),
    );
    let first_result = first.execute(&job).await;
    assert_eq!(first_result.stats.records_stored, 1);

    let mut second = Orchestrator::new(
        MockAdapter::new(vec![record]),
        MappingDocument::empty(),
        pool.clone(),
    );
    let second_result = second.execute(&job).await;
    assert_eq!(second_result.stats.records_stored, 1);

    let qb = hist_data_engine::query::QueryBuilder::new(pool);
    let rows = qb
        .query_daily_ohlcv("ES.c.0", Some(job.start_date), Some(job.end_date), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "re-running the same job must not duplicate rows");
}

#[tokio::test]
#[ignore]
async fn scenario_f_quarantine_on_missing_ts_event() {
    let pool = test_pool().await;
    let adapter = MockAdapter::new(vec![tbbo_raw_missing_ts_event()]);
    let mut orchestrator = Orchestrator::new(adapter, MappingDocument::empty(), pool);
    let job = job("tbbo", vec!["ES.c.0"]);
    let result = orchestrator.execute(&job).await;

    assert_eq!(result.status, PipelineStatus::Partial);
    assert_eq!(result.stats.records_stored, 0);
    assert_eq!(result.stats.records_quarantined, 1);
}
