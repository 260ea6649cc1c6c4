//! Query builder: symbol resolution with graceful fallback and
//! range-pruned reads over the time-partitioned store.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder as SqlQueryBuilder};

use crate::error::EngineResult;
use crate::models::Side;

/// Accepts either a single symbol or a list, per the contract's
/// `symbols: string | string[]`.
pub struct SymbolArg(Vec<String>);

impl From<&str> for SymbolArg {
    fn from(s: &str) -> Self {
        SymbolArg(vec![s.to_string()])
    }
}

impl From<String> for SymbolArg {
    fn from(s: String) -> Self {
        SymbolArg(vec![s])
    }
}

impl From<Vec<String>> for SymbolArg {
    fn from(v: Vec<String>) -> Self {
        SymbolArg(v)
    }
}

impl From<&[&str]> for SymbolArg {
    fn from(v: &[&str]) -> Self {
        SymbolArg(v.iter().map(|s| s.to_string()).collect())
    }
}

const TRADE_TBBO_DEFAULT_LIMIT: i64 = 10_000;

trait IdentifiedRow {
    fn instrument_id(&self) -> i64;
    fn set_symbol(&mut self, symbol: String);
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OhlcvRow {
    pub instrument_id: i64,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: Option<Decimal>,
    pub vwap: Option<Decimal>,
}

impl IdentifiedRow for OhlcvRow {
    fn instrument_id(&self) -> i64 {
        self.instrument_id
    }
    fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRow {
    pub instrument_id: i64,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub price: Decimal,
    pub size: i64,
    pub side: String,
    pub sequence: i64,
}

impl IdentifiedRow for TradeRow {
    fn instrument_id(&self) -> i64 {
        self.instrument_id
    }
    fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TbboRow {
    pub instrument_id: i64,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub bid_px: Option<Decimal>,
    pub ask_px: Option<Decimal>,
    pub bid_sz: Option<i64>,
    pub ask_sz: Option<i64>,
    pub sequence: i64,
    pub is_crossed: bool,
}

impl IdentifiedRow for TbboRow {
    fn instrument_id(&self) -> i64 {
        self.instrument_id
    }
    fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StatisticsRow {
    pub instrument_id: i64,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub stat_type: String,
    pub stat_value: Option<Decimal>,
    pub sequence: i64,
}

impl IdentifiedRow for StatisticsRow {
    fn instrument_id(&self) -> i64 {
        self.instrument_id
    }
    fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DefinitionRow {
    pub instrument_id: i64,
    pub symbol: String,
    pub ts_event: DateTime<Utc>,
    pub raw_symbol: String,
    pub asset: String,
    pub exchange: Option<String>,
    pub instrument_class: Option<String>,
}

impl IdentifiedRow for DefinitionRow {
    fn instrument_id(&self) -> i64 {
        self.instrument_id
    }
    fn set_symbol(&mut self, symbol: String) {
        self.symbol = symbol;
    }
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub side: Option<Side>,
}

#[derive(Debug, Clone, Default)]
pub struct StatisticsFilter {
    pub stat_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DefinitionFilter {
    pub asset: Option<String>,
    pub exchange: Option<String>,
    pub instrument_class: Option<String>,
}

pub struct QueryBuilder {
    pool: PgPool,
}

impl QueryBuilder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// True when `definitions_data` exists and is non-empty. A missing
    /// table (query fails outright) is treated the same as an empty one —
    /// both mean "fall back to the denormalized symbol column".
    async fn definitions_populated(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT count(*) FROM definitions_data")
            .fetch_one(&self.pool)
            .await
            .map(|n| n > 0)
            .unwrap_or(false)
    }

    async fn resolve_instrument_ids(&self, symbols: &[String]) -> Vec<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT DISTINCT instrument_id FROM definitions_data WHERE raw_symbol = ANY($1)",
        )
        .bind(symbols)
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default()
    }

    async fn enrich_symbols<T: IdentifiedRow>(&self, rows: &mut [T]) {
        if rows.is_empty() {
            return;
        }
        let mut ids: Vec<i64> = rows.iter().map(|r| r.instrument_id()).collect();
        ids.sort_unstable();
        ids.dedup();

        let lookup = sqlx::query_as::<_, (i64, String)>(
            "SELECT DISTINCT ON (instrument_id) instrument_id, raw_symbol FROM definitions_data \
             WHERE instrument_id = ANY($1) ORDER BY instrument_id, ts_event DESC",
        )
        .bind(ids.as_slice())
        .fetch_all(&self.pool)
        .await
        .unwrap_or_default();
        let lookup: HashMap<i64, String> = lookup.into_iter().collect();

        for row in &mut rows {
            let symbol = lookup
                .get(&row.instrument_id())
                .cloned()
                .unwrap_or_else(|| "UNKNOWN".to_string());
            row.set_symbol(symbol);
        }
    }

    fn push_symbol_filter<'a>(
        qb: &mut SqlQueryBuilder<'a, Postgres>,
        ids: &'a [i64],
        symbols: &'a [String],
    ) {
        if !ids.is_empty() {
            qb.push("instrument_id = ANY(").push_bind(ids).push(")");
        } else {
            qb.push("symbol = ANY(").push_bind(symbols).push(")");
        }
    }

    fn push_date_range(
        qb: &mut SqlQueryBuilder<'_, Postgres>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) {
        if let Some(start) = start_date {
            qb.push(" AND ts_event >= ").push_bind(start);
        }
        if let Some(end) = end_date {
            qb.push(" AND ts_event <= ").push_bind(end);
        }
    }

    pub async fn query_daily_ohlcv(
        &self,
        symbols: impl Into<SymbolArg>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> EngineResult<Vec<OhlcvRow>> {
        let symbols = symbols.into().0;
        let via_definitions = self.definitions_populated().await;
        let ids = if via_definitions {
            self.resolve_instrument_ids(&symbols).await
        } else {
            Vec::new()
        };

        let mut qb: SqlQueryBuilder<Postgres> = SqlQueryBuilder::new(
            "SELECT instrument_id, symbol, ts_event, open, high, low, close, volume, \
             trade_count, vwap FROM daily_ohlcv_data WHERE ",
        );
        Self::push_symbol_filter(&mut qb, &ids, &symbols);
        Self::push_date_range(&mut qb, start_date, end_date);
        qb.push(" ORDER BY instrument_id, ts_event DESC");
        if let Some(l) = limit {
            qb.push(" LIMIT ").push_bind(l);
        }

        let mut rows: Vec<OhlcvRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        if via_definitions {
            self.enrich_symbols(&mut rows).await;
        }
        Ok(rows)
    }

    pub async fn query_trades(
        &self,
        symbols: impl Into<SymbolArg>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        filter: TradeFilter,
        limit: Option<i64>,
    ) -> EngineResult<Vec<TradeRow>> {
        let symbols = symbols.into().0;
        let via_definitions = self.definitions_populated().await;
        let ids = if via_definitions {
            self.resolve_instrument_ids(&symbols).await
        } else {
            Vec::new()
        };

        let mut qb: SqlQueryBuilder<Postgres> = SqlQueryBuilder::new(
            "SELECT instrument_id, symbol, ts_event, price, size, side, sequence \
             FROM trades_data WHERE ",
        );
        Self::push_symbol_filter(&mut qb, &ids, &symbols);
        Self::push_date_range(&mut qb, start_date, end_date);
        if let Some(side) = filter.side {
            let side_str = match side {
                Side::B => "B",
                Side::S => "S",
                Side::N => "N",
            };
            qb.push(" AND side = ").push_bind(side_str);
        }
        qb.push(" ORDER BY instrument_id, ts_event DESC");
        qb.push(" LIMIT ").push_bind(limit.unwrap_or(TRADE_TBBO_DEFAULT_LIMIT));

        let mut rows: Vec<TradeRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        if via_definitions {
            self.enrich_symbols(&mut rows).await;
        }
        Ok(rows)
    }

    pub async fn query_tbbo(
        &self,
        symbols: impl Into<SymbolArg>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: Option<i64>,
    ) -> EngineResult<Vec<TbboRow>> {
        let symbols = symbols.into().0;
        let via_definitions = self.definitions_populated().await;
        let ids = if via_definitions {
            self.resolve_instrument_ids(&symbols).await
        } else {
            Vec::new()
        };

        let mut qb: SqlQueryBuilder<Postgres> = SqlQueryBuilder::new(
            "SELECT instrument_id, symbol, ts_event, bid_px, ask_px, bid_sz, ask_sz, \
             sequence, is_crossed FROM tbbo_data WHERE ",
        );
        Self::push_symbol_filter(&mut qb, &ids, &symbols);
        Self::push_date_range(&mut qb, start_date, end_date);
        qb.push(" ORDER BY instrument_id, ts_event DESC");
        qb.push(" LIMIT ").push_bind(limit.unwrap_or(TRADE_TBBO_DEFAULT_LIMIT));

        let mut rows: Vec<TbboRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        if via_definitions {
            self.enrich_symbols(&mut rows).await;
        }
        Ok(rows)
    }

    pub async fn query_statistics(
        &self,
        symbols: impl Into<SymbolArg>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        filter: StatisticsFilter,
        limit: Option<i64>,
    ) -> EngineResult<Vec<StatisticsRow>> {
        let symbols = symbols.into().0;
        let via_definitions = self.definitions_populated().await;
        let ids = if via_definitions {
            self.resolve_instrument_ids(&symbols).await
        } else {
            Vec::new()
        };

        let mut qb: SqlQueryBuilder<Postgres> = SqlQueryBuilder::new(
            "SELECT instrument_id, symbol, ts_event, stat_type, stat_value, sequence \
             FROM statistics_data WHERE ",
        );
        Self::push_symbol_filter(&mut qb, &ids, &symbols);
        Self::push_date_range(&mut qb, start_date, end_date);
        if let Some(stat_type) = filter.stat_type {
            qb.push(" AND stat_type = ").push_bind(stat_type);
        }
        qb.push(" ORDER BY instrument_id, ts_event DESC");
        if let Some(l) = limit {
            qb.push(" LIMIT ").push_bind(l);
        }

        let mut rows: Vec<StatisticsRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        if via_definitions {
            self.enrich_symbols(&mut rows).await;
        }
        Ok(rows)
    }

    pub async fn query_definitions(
        &self,
        symbols: impl Into<SymbolArg>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        filter: DefinitionFilter,
        limit: Option<i64>,
    ) -> EngineResult<Vec<DefinitionRow>> {
        let symbols = symbols.into().0;

        let mut qb: SqlQueryBuilder<Postgres> = SqlQueryBuilder::new(
            "SELECT instrument_id, symbol, ts_event, raw_symbol, asset, exchange, \
             instrument_class FROM definitions_data WHERE raw_symbol = ANY(",
        );
        qb.push_bind(symbols);
        qb.push(")");
        Self::push_date_range(&mut qb, start_date, end_date);
        if let Some(asset) = filter.asset {
            qb.push(" AND asset = ").push_bind(asset);
        }
        if let Some(exchange) = filter.exchange {
            qb.push(" AND exchange = ").push_bind(exchange);
        }
        if let Some(instrument_class) = filter.instrument_class {
            qb.push(" AND instrument_class = ").push_bind(instrument_class);
        }
        qb.push(" ORDER BY instrument_id, ts_event DESC");
        if let Some(l) = limit {
            qb.push(" LIMIT ").push_bind(l);
        }

        let rows: Vec<DefinitionRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_arg_accepts_single_and_list() {
        let single: SymbolArg = "ES.c.0".into();
        assert_eq!(single.0, vec!["ES.c.0".to_string()]);

        let list: SymbolArg = vec!["ES.c.0".to_string(), "CL.c.0".to_string()].into();
        assert_eq!(list.0.len(), 2);
    }

    #[test]
    fn trade_filter_defaults_to_no_side_restriction() {
        let filter = TradeFilter::default();
        assert!(filter.side.is_none());
    }
}
