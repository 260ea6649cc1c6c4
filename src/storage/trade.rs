use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::Record;

use super::{sub_batches, LoadStats, Loader};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS trades_data (
    instrument_id    BIGINT NOT NULL,
    ts_event         TIMESTAMPTZ NOT NULL,
    ts_recv          TIMESTAMPTZ NOT NULL,
    publisher_id     INTEGER NOT NULL,
    symbol           TEXT NOT NULL,
    data_source      TEXT NOT NULL,
    price            NUMERIC NOT NULL,
    size             BIGINT NOT NULL,
    side             TEXT NOT NULL,
    sequence         BIGINT NOT NULL,
    action           TEXT,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (instrument_id, ts_event, sequence, price, size, side)
);
"#;

const CREATE_INDEXES_SQL: &[&str] =
    &["CREATE INDEX IF NOT EXISTS idx_trades_instrument_ts ON trades_data (instrument_id, ts_event DESC);"];

const CREATE_HYPERTABLE_SQL: &str =
    "SELECT create_hypertable('trades_data', 'ts_event', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE);";

fn side_str(side: crate::models::Side) -> &'static str {
    match side {
        crate::models::Side::B => "B",
        crate::models::Side::S => "S",
        crate::models::Side::N => "N",
    }
}

#[derive(Debug, Default)]
pub struct TradeLoader;

#[async_trait]
impl Loader for TradeLoader {
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
                Record::Trade(t) => Some(t),
                _ => None,
            })
            .collect();
        if rows.is_empty() {
            return Ok(LoadStats::default());
        }

        let mut stats = LoadStats::default();
        for batch in sub_batches(&rows, sub_batch_size) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO trades_data (instrument_id, ts_event, ts_recv, publisher_id, \
                 symbol, data_source, price, size, side, sequence, action) ",
            );
            qb.push_values(batch.iter(), |mut b, row| {
                b.push_bind(row.header.instrument_id as i64)
                    .push_bind(row.header.ts_event)
                    .push_bind(row.header.ts_recv)
                    .push_bind(row.header.publisher_id as i32)
                    .push_bind(&row.header.symbol)
                    .push_bind(data_source)
                    .push_bind(row.price)
                    .push_bind(row.size as i64)
                    .push_bind(side_str(row.side))
                    .push_bind(row.sequence as i64)
                    .push_bind(&row.action);
            });
            qb.push(
                " ON CONFLICT (instrument_id, ts_event, sequence, price, size, side) DO UPDATE SET \
                 ts_recv = EXCLUDED.ts_recv, publisher_id = EXCLUDED.publisher_id, \
                 symbol = EXCLUDED.symbol, action = EXCLUDED.action, updated_at = now()",
            );

            match qb.build().execute(pool).await {
                Ok(_) => stats.inserted += batch.len(),
                Err(e) => {
                    stats.errors += batch.len();
                    warn!(error = %e, count = batch.len(), "trade sub-batch upsert failed");
                }
            }
            debug!(count = batch.len(), "processed trade sub-batch");
        }
        Ok(stats)
    }
}
