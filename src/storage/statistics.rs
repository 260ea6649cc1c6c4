use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::{Record, StatType};

use super::{sub_batches, LoadStats, Loader};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS statistics_data (
    instrument_id    BIGINT NOT NULL,
    ts_event         TIMESTAMPTZ NOT NULL,
    ts_recv          TIMESTAMPTZ NOT NULL,
    publisher_id     INTEGER NOT NULL,
    symbol           TEXT NOT NULL,
    data_source      TEXT NOT NULL,
    stat_type        TEXT NOT NULL,
    stat_value       NUMERIC,
    open_interest    NUMERIC,
    settlement_price NUMERIC,
    high_limit       NUMERIC,
    low_limit        NUMERIC,
    sequence         BIGINT NOT NULL,
    flags            INTEGER,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (instrument_id, ts_event, stat_type, sequence)
);
"#;

const CREATE_INDEXES_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_statistics_instrument_ts ON statistics_data (instrument_id, ts_event DESC);",
    "CREATE INDEX IF NOT EXISTS idx_statistics_instrument_ts_type ON statistics_data (instrument_id, ts_event, stat_type);",
];

const CREATE_HYPERTABLE_SQL: &str =
    "SELECT create_hypertable('statistics_data', 'ts_event', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE);";

fn stat_type_str(s: &StatType) -> String {
    match s {
        StatType::SettlementPrice => "settlement_price".to_string(),
        StatType::OpenInterest => "open_interest".to_string(),
        StatType::HighLimit => "high_limit".to_string(),
        StatType::LowLimit => "low_limit".to_string(),
        StatType::Other(s) => s.clone(),
    }
}

#[derive(Debug, Default)]
pub struct StatisticsLoader;

#[async_trait]
impl Loader for StatisticsLoader {
    async fn ensure_schema(&self, pool: &PgPool) -> EngineResult<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(pool).await?;
        for idx in CREATE_INDEXES_SQL {
            sqlx::query(idx).execute(pool).await?;
        }
        if let Err(e) = sqlx::query(CREATE_HYPERTABLE_SQL).execute(pool).await {
            warn!(error = %e, "create_hypertable failed (already a hypertable or not TimescaleDB)");
        }
        Ok(())
    }

    async fn insert(
        &self,
        pool: &PgPool,
        records: &[Record],
        data_source: &str,
        sub_batch_size: usize,
    ) -> EngineResult<LoadStats> {
        let rows: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                Record::Statistics(s) => Some(s),
                _ => None,
            })
            .collect();
        if rows.is_empty() {
            return Ok(LoadStats::default());
        }

        let mut stats = LoadStats::default();
        for batch in sub_batches(&rows, sub_batch_size) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO statistics_data (instrument_id, ts_event, ts_recv, publisher_id, \
                 symbol, data_source, stat_type, stat_value, open_interest, settlement_price, \
                 high_limit, low_limit, sequence, flags) ",
            );
            qb.push_values(batch.iter(), |mut b, row| {
                b.push_bind(row.header.instrument_id as i64)
                    .push_bind(row.header.ts_event)
                    .push_bind(row.header.ts_recv)
                    .push_bind(row.header.publisher_id as i32)
                    .push_bind(&row.header.symbol)
                    .push_bind(data_source)
                    .push_bind(stat_type_str(&row.stat_type))
                    .push_bind(row.stat_value)
                    .push_bind(row.open_interest)
                    .push_bind(row.settlement_price)
                    .push_bind(row.high_limit)
                    .push_bind(row.low_limit)
                    .push_bind(row.sequence as i64)
                    .push_bind(row.flags);
            });
            qb.push(
                " ON CONFLICT (instrument_id, ts_event, stat_type, sequence) DO UPDATE SET \
                 ts_recv = EXCLUDED.ts_recv, publisher_id = EXCLUDED.publisher_id, \
                 symbol = EXCLUDED.symbol, stat_value = EXCLUDED.stat_value, \
                 open_interest = EXCLUDED.open_interest, settlement_price = EXCLUDED.settlement_price, \
                 high_limit = EXCLUDED.high_limit, low_limit = EXCLUDED.low_limit, \
                 flags = EXCLUDED.flags, updated_at = now()",
            );

            match qb.build().execute(pool).await {
                Ok(_) => stats.inserted += batch.len(),
                Err(e) => {
                    stats.errors += batch.len();
                    warn!(error = %e, count = batch.len(), "statistics sub-batch upsert failed");
                }
            }
            debug!(count = batch.len(), "processed statistics sub-batch");
        }
        Ok(stats)
    }
}
