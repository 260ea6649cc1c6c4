use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::{Granularity, Record};

use super::{sub_batches, LoadStats, Loader};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS daily_ohlcv_data (
    instrument_id    BIGINT NOT NULL,
    ts_event         TIMESTAMPTZ NOT NULL,
    ts_recv          TIMESTAMPTZ NOT NULL,
    rtype            SMALLINT NOT NULL,
    publisher_id     INTEGER NOT NULL,
    symbol           TEXT NOT NULL,
    granularity      TEXT NOT NULL,
    data_source      TEXT NOT NULL,
    open             NUMERIC NOT NULL,
    high             NUMERIC NOT NULL,
    low              NUMERIC NOT NULL,
    close            NUMERIC NOT NULL,
    volume           NUMERIC NOT NULL,
    trade_count      NUMERIC,
    vwap             NUMERIC,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (instrument_id, ts_event, granularity, data_source)
);
"#;

const CREATE_INDEXES_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_instrument_ts ON daily_ohlcv_data (instrument_id, ts_event DESC);",
    "CREATE INDEX IF NOT EXISTS idx_ohlcv_symbol_ts ON daily_ohlcv_data (symbol, ts_event DESC);",
];

const CREATE_HYPERTABLE_SQL: &str =
    "SELECT create_hypertable('daily_ohlcv_data', 'ts_event', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE);";

fn rtype_for_granularity(g: Granularity) -> i16 {
    match g {
        Granularity::Second1 => 32,
        Granularity::Minute1 => 33,
        Granularity::Hour1 => 34,
        Granularity::Day1 => 35,
    }
}

#[derive(Debug, Default)]
pub struct OhlcvLoader;

#[async_trait]
impl Loader for OhlcvLoader {
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
                Record::Ohlcv(o) => Some(o),
                _ => None,
            })
            .collect();
        if rows.is_empty() {
            return Ok(LoadStats::default());
        }

        let mut stats = LoadStats::default();
        for batch in sub_batches(&rows, sub_batch_size) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO daily_ohlcv_data (instrument_id, ts_event, ts_recv, rtype, \
                 publisher_id, symbol, granularity, data_source, open, high, low, close, \
                 volume, trade_count, vwap) ",
            );
            qb.push_values(batch.iter(), |mut b, row| {
                b.push_bind(row.header.instrument_id as i64)
                    .push_bind(row.header.ts_event)
                    .push_bind(row.header.ts_recv)
                    .push_bind(rtype_for_granularity(row.granularity))
                    .push_bind(row.header.publisher_id as i32)
                    .push_bind(&row.header.symbol)
                    .push_bind(row.granularity.as_str())
                    .push_bind(data_source)
                    .push_bind(row.open)
                    .push_bind(row.high)
                    .push_bind(row.low)
                    .push_bind(row.close)
                    .push_bind(rust_decimal::Decimal::from(row.volume))
                    .push_bind(row.trade_count.map(rust_decimal::Decimal::from))
                    .push_bind(row.vwap);
            });
            qb.push(
                " ON CONFLICT (instrument_id, ts_event, granularity, data_source) DO UPDATE SET \
                 ts_recv = EXCLUDED.ts_recv, rtype = EXCLUDED.rtype, publisher_id = EXCLUDED.publisher_id, \
                 symbol = EXCLUDED.symbol, open = EXCLUDED.open, high = EXCLUDED.high, \
                 low = EXCLUDED.low, close = EXCLUDED.close, volume = EXCLUDED.volume, \
                 trade_count = EXCLUDED.trade_count, vwap = EXCLUDED.vwap, updated_at = now()",
            );

            match qb.build().execute(pool).await {
                Ok(_) => {
                    stats.inserted += batch.len();
                    debug!(count = batch.len(), "upserted ohlcv sub-batch");
                }
                Err(e) => {
                    stats.errors += batch.len();
                    warn!(error = %e, count = batch.len(), "ohlcv sub-batch upsert failed");
                }
            }
        }
        Ok(stats)
    }
}
