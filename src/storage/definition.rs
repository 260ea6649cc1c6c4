use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::Record;

use super::{sub_batches, LoadStats, Loader};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS definitions_data (
    instrument_id               BIGINT NOT NULL,
    ts_event                    TIMESTAMPTZ NOT NULL,
    ts_recv                     TIMESTAMPTZ NOT NULL,
    rtype                       INTEGER NOT NULL,
    publisher_id                INTEGER NOT NULL,
    symbol                      TEXT NOT NULL,
    data_source                 TEXT NOT NULL,
    raw_symbol                  TEXT NOT NULL,
    security_update_action      TEXT NOT NULL,
    instrument_class            TEXT,
    min_price_increment         NUMERIC,
    display_factor              NUMERIC,
    expiration                  TIMESTAMPTZ,
    activation                  TIMESTAMPTZ,
    high_limit_price            NUMERIC,
    low_limit_price             NUMERIC,
    max_price_variation         NUMERIC,
    unit_of_measure_qty         NUMERIC,
    min_price_increment_amount  NUMERIC,
    price_ratio                 NUMERIC,
    inst_attrib_value           BIGINT NOT NULL,
    underlying_id               BIGINT,
    raw_instrument_id           BIGINT,
    market_depth_implied        INTEGER,
    market_depth                INTEGER,
    market_segment_id           INTEGER,
    max_trade_vol               NUMERIC,
    min_lot_size                BIGINT NOT NULL,
    min_lot_size_block          BIGINT NOT NULL,
    min_lot_size_round_lot      BIGINT NOT NULL,
    min_trade_vol               NUMERIC,
    contract_multiplier         INTEGER,
    decay_quantity              INTEGER,
    original_contract_size      INTEGER,
    appl_id                     SMALLINT,
    maturity_year               SMALLINT,
    decay_start_date            TIMESTAMPTZ,
    channel_id                  INTEGER,
    currency                    TEXT,
    settl_currency              TEXT,
    secsubtype                  TEXT,
    group_code                  TEXT NOT NULL,
    exchange                    TEXT,
    asset                       TEXT NOT NULL,
    cfi                         TEXT,
    security_type               TEXT,
    unit_of_measure             TEXT,
    underlying                  TEXT,
    strike_price_currency       TEXT,
    strike_price                NUMERIC,
    match_algorithm             TEXT,
    main_fraction                INTEGER,
    price_display_format        INTEGER,
    sub_fraction                 INTEGER,
    underlying_product          INTEGER,
    maturity_month              INTEGER,
    maturity_day                INTEGER,
    maturity_week               INTEGER,
    user_defined_instrument     TEXT,
    contract_multiplier_unit    INTEGER,
    flow_schedule_type          INTEGER,
    tick_rule                   INTEGER,
    leg_count                   INTEGER,
    leg_index                   INTEGER,
    leg_instrument_id           BIGINT,
    leg_raw_symbol              TEXT,
    leg_instrument_class        TEXT,
    leg_side                    TEXT,
    leg_price                   NUMERIC,
    leg_delta                   NUMERIC,
    leg_ratio_price_numerator   INTEGER,
    leg_ratio_price_denominator INTEGER,
    leg_ratio_qty_numerator     INTEGER,
    leg_ratio_qty_denominator   INTEGER,
    leg_underlying_id           BIGINT,
    updated_at                  TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (instrument_id, ts_event)
);
"#;

const CREATE_INDEXES_SQL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_definitions_instrument_ts ON definitions_data (instrument_id, ts_event DESC);",
    "CREATE INDEX IF NOT EXISTS idx_definitions_raw_symbol ON definitions_data (raw_symbol);",
    "CREATE INDEX IF NOT EXISTS idx_definitions_asset_exchange ON definitions_data (asset, exchange);",
];

const CREATE_HYPERTABLE_SQL: &str =
    "SELECT create_hypertable('definitions_data', 'ts_event', chunk_time_interval => INTERVAL '1 day', if_not_exists => TRUE);";

#[derive(Debug, Default)]
pub struct DefinitionLoader;

#[async_trait]
impl Loader for DefinitionLoader {
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
                Record::Definition(d) => Some(d),
                _ => None,
            })
            .collect();
        if rows.is_empty() {
            return Ok(LoadStats::default());
        }

        let mut stats = LoadStats::default();
        for batch in sub_batches(&rows, sub_batch_size) {
            // Every column is written on insert; only a narrow set of
            // mutable, non-identity columns is refreshed on conflict.
            // Identity columns (instrument_id, ts_event) are the primary
            // key and are never touched in the conflict clause.
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO definitions_data (instrument_id, ts_event, ts_recv, rtype, \
                 publisher_id, symbol, data_source, raw_symbol, security_update_action, \
                 instrument_class, min_price_increment, display_factor, expiration, activation, \
                 high_limit_price, low_limit_price, max_price_variation, unit_of_measure_qty, \
                 min_price_increment_amount, price_ratio, inst_attrib_value, underlying_id, \
                 raw_instrument_id, market_depth_implied, market_depth, market_segment_id, \
                 max_trade_vol, min_lot_size, min_lot_size_block, min_lot_size_round_lot, \
                 min_trade_vol, contract_multiplier, decay_quantity, original_contract_size, \
                 appl_id, maturity_year, decay_start_date, channel_id, currency, settl_currency, \
                 secsubtype, group_code, exchange, asset, cfi, security_type, unit_of_measure, \
                 underlying, strike_price_currency, strike_price, match_algorithm, main_fraction, \
                 price_display_format, sub_fraction, underlying_product, maturity_month, \
                 maturity_day, maturity_week, user_defined_instrument, contract_multiplier_unit, \
                 flow_schedule_type, tick_rule, leg_count, leg_index, leg_instrument_id, \
                 leg_raw_symbol, leg_instrument_class, leg_side, leg_price, leg_delta, \
                 leg_ratio_price_numerator, leg_ratio_price_denominator, leg_ratio_qty_numerator, \
                 leg_ratio_qty_denominator, leg_underlying_id) ",
            );
            qb.push_values(batch.iter(), |mut b, row| {
                b.push_bind(row.header.instrument_id as i64)
                    .push_bind(row.header.ts_event)
                    .push_bind(row.header.ts_recv)
                    .push_bind(row.rtype)
                    .push_bind(row.header.publisher_id as i32)
                    .push_bind(&row.header.symbol)
                    .push_bind(data_source)
                    .push_bind(&row.raw_symbol)
                    .push_bind(&row.security_update_action)
                    .push_bind(&row.instrument_class)
                    .push_bind(row.min_price_increment)
                    .push_bind(row.display_factor)
                    .push_bind(row.expiration)
                    .push_bind(row.activation)
                    .push_bind(row.high_limit_price)
                    .push_bind(row.low_limit_price)
                    .push_bind(row.max_price_variation)
                    .push_bind(row.unit_of_measure_qty)
                    .push_bind(row.min_price_increment_amount)
                    .push_bind(row.price_ratio)
                    .push_bind(row.inst_attrib_value)
                    .push_bind(row.underlying_id.map(|v| v as i64))
                    .push_bind(row.raw_instrument_id.map(|v| v as i64))
                    .push_bind(row.market_depth_implied)
                    .push_bind(row.market_depth)
                    .push_bind(row.market_segment_id)
                    .push_bind(row.max_trade_vol.map(|v| v as i64))
                    .push_bind(row.min_lot_size)
                    .push_bind(row.min_lot_size_block)
                    .push_bind(row.min_lot_size_round_lot)
                    .push_bind(row.min_trade_vol.map(|v| v as i64))
                    .push_bind(row.contract_multiplier)
                    .push_bind(row.decay_quantity)
                    .push_bind(row.original_contract_size)
                    .push_bind(row.appl_id)
                    .push_bind(row.maturity_year)
                    .push_bind(row.decay_start_date)
                    .push_bind(row.channel_id)
                    .push_bind(&row.currency)
                    .push_bind(&row.settl_currency)
                    .push_bind(&row.secsubtype)
                    .push_bind(&row.group)
                    .push_bind(&row.exchange)
                    .push_bind(&row.asset)
                    .push_bind(&row.cfi)
                    .push_bind(&row.security_type)
                    .push_bind(&row.unit_of_measure)
                    .push_bind(&row.underlying)
                    .push_bind(&row.strike_price_currency)
                    .push_bind(row.strike_price)
                    .push_bind(&row.match_algorithm)
                    .push_bind(row.main_fraction)
                    .push_bind(row.price_display_format)
                    .push_bind(row.sub_fraction)
                    .push_bind(row.underlying_product)
                    .push_bind(row.maturity_month)
                    .push_bind(row.maturity_day)
                    .push_bind(row.maturity_week)
                    .push_bind(&row.user_defined_instrument)
                    .push_bind(row.contract_multiplier_unit)
                    .push_bind(row.flow_schedule_type)
                    .push_bind(row.tick_rule)
                    .push_bind(row.leg_count)
                    .push_bind(row.leg_index)
                    .push_bind(row.leg_instrument_id.map(|v| v as i64))
                    .push_bind(&row.leg_raw_symbol)
                    .push_bind(&row.leg_instrument_class)
                    .push_bind(&row.leg_side)
                    .push_bind(row.leg_price)
                    .push_bind(row.leg_delta)
                    .push_bind(row.leg_ratio_price_numerator)
                    .push_bind(row.leg_ratio_price_denominator)
                    .push_bind(row.leg_ratio_qty_numerator)
                    .push_bind(row.leg_ratio_qty_denominator)
                    .push_bind(row.leg_underlying_id.map(|v| v as i64));
            });
            qb.push(
                " ON CONFLICT (instrument_id, ts_event) DO UPDATE SET \
                 updated_at = now(), security_update_action = EXCLUDED.security_update_action, \
                 high_limit_price = EXCLUDED.high_limit_price, low_limit_price = EXCLUDED.low_limit_price",
            );

            match qb.build().execute(pool).await {
                Ok(_) => stats.inserted += batch.len(),
                Err(e) => {
                    stats.errors += batch.len();
                    warn!(error = %e, count = batch.len(), "definition sub-batch upsert failed");
                }
            }
            debug!(count = batch.len(), "processed definition sub-batch");
        }
        Ok(stats)
    }
}
