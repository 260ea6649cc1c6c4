//! Typed record kinds and the raw/intermediate shapes that flow between the
//! rule engine and the validator.
//!
//! Fields follow the Databento-style market data schema used throughout the
//! corpus this system ingests from: `ts_event`/`ts_recv` as UTC instants,
//! prices as exact decimals, and a common header on every fact record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The five record kinds this system understands. Keeping this as a closed
/// enum (rather than runtime type dispatch on the source object) means every
/// loader match below is exhaustive at compile time — add a kind here and the
/// compiler finds every place that needs updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Ohlcv,
    Trade,
    Tbbo,
    Statistics,
    Definition,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Ohlcv => "ohlcv",
            RecordKind::Trade => "trade",
            RecordKind::Tbbo => "tbbo",
            RecordKind::Statistics => "statistics",
            RecordKind::Definition => "definition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[serde(rename = "1s")]
    Second1,
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Granularity {
    pub fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "1s" => Some(Granularity::Second1),
            "1m" => Some(Granularity::Minute1),
            "1h" => Some(Granularity::Hour1),
            "1d" => Some(Granularity::Day1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Second1 => "1s",
            Granularity::Minute1 => "1m",
            Granularity::Hour1 => "1h",
            Granularity::Day1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    B,
    S,
    N,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatType {
    SettlementPrice,
    OpenInterest,
    HighLimit,
    LowLimit,
    Other(String),
}

/// Fields present on every fact row, regardless of kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub ts_event: DateTime<Utc>,
    pub ts_recv: DateTime<Utc>,
    pub instrument_id: u32,
    pub publisher_id: u16,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRecord {
    pub header: RecordHeader,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub trade_count: Option<u64>,
    pub vwap: Option<Decimal>,
    pub granularity: Granularity,
    pub data_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub header: RecordHeader,
    pub price: Decimal,
    pub size: u32,
    pub side: Side,
    pub sequence: u64,
    pub action: Option<String>,
    pub data_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TbboRecord {
    pub header: RecordHeader,
    pub bid_px: Option<Decimal>,
    pub ask_px: Option<Decimal>,
    pub bid_sz: Option<u32>,
    pub ask_sz: Option<u32>,
    pub bid_ct: Option<u32>,
    pub ask_ct: Option<u32>,
    pub sequence: u64,
    pub is_crossed: bool,
    pub data_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub header: RecordHeader,
    pub stat_type: StatType,
    pub stat_value: Option<Decimal>,
    pub open_interest: Option<Decimal>,
    pub settlement_price: Option<Decimal>,
    pub high_limit: Option<Decimal>,
    pub low_limit: Option<Decimal>,
    pub sequence: u64,
    pub flags: Option<i32>,
    pub data_source: String,
}

/// Reference-data record. The column list mirrors the vendor's definition
/// schema column-for-column so the store's `definitions_data` table stays
/// bit-exact with what downstream consumers already expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub header: RecordHeader,
    pub rtype: i32,
    pub raw_symbol: String,
    pub security_update_action: String,
    pub instrument_class: Option<String>,
    pub min_price_increment: Option<Decimal>,
    pub display_factor: Option<Decimal>,
    pub expiration: Option<DateTime<Utc>>,
    pub activation: Option<DateTime<Utc>>,
    pub high_limit_price: Option<Decimal>,
    pub low_limit_price: Option<Decimal>,
    pub max_price_variation: Option<Decimal>,
    pub unit_of_measure_qty: Option<Decimal>,
    pub min_price_increment_amount: Option<Decimal>,
    pub price_ratio: Option<Decimal>,
    pub inst_attrib_value: i64,
    pub underlying_id: Option<u32>,
    pub raw_instrument_id: Option<u32>,
    pub market_depth_implied: Option<i32>,
    pub market_depth: Option<i32>,
    pub market_segment_id: Option<i32>,
    pub max_trade_vol: Option<u64>,
    pub min_lot_size: i64,
    pub min_lot_size_block: i64,
    pub min_lot_size_round_lot: i64,
    pub min_trade_vol: Option<u64>,
    pub contract_multiplier: Option<i32>,
    pub decay_quantity: Option<i32>,
    pub original_contract_size: Option<i32>,
    pub appl_id: Option<i16>,
    pub maturity_year: Option<i16>,
    pub decay_start_date: Option<DateTime<Utc>>,
    pub channel_id: Option<i32>,
    pub currency: Option<String>,
    pub settl_currency: Option<String>,
    pub secsubtype: Option<String>,
    pub group: String,
    pub exchange: Option<String>,
    pub asset: String,
    pub cfi: Option<String>,
    pub security_type: Option<String>,
    pub unit_of_measure: Option<String>,
    pub underlying: Option<String>,
    pub strike_price_currency: Option<String>,
    pub strike_price: Option<Decimal>,
    pub match_algorithm: Option<String>,
    pub main_fraction: Option<i32>,
    pub price_display_format: Option<i32>,
    pub sub_fraction: Option<i32>,
    pub underlying_product: Option<i32>,
    pub maturity_month: Option<i32>,
    pub maturity_day: Option<i32>,
    pub maturity_week: Option<i32>,
    pub user_defined_instrument: Option<String>,
    pub contract_multiplier_unit: Option<i32>,
    pub flow_schedule_type: Option<i32>,
    pub tick_rule: Option<i32>,
    pub leg_count: Option<i32>,
    pub leg_index: Option<i32>,
    pub leg_instrument_id: Option<u32>,
    pub leg_raw_symbol: Option<String>,
    pub leg_instrument_class: Option<String>,
    pub leg_side: Option<String>,
    pub leg_price: Option<Decimal>,
    pub leg_delta: Option<Decimal>,
    pub leg_ratio_price_numerator: Option<i32>,
    pub leg_ratio_price_denominator: Option<i32>,
    pub leg_ratio_qty_numerator: Option<i32>,
    pub leg_ratio_qty_denominator: Option<i32>,
    pub leg_underlying_id: Option<u32>,
    pub data_source: String,
}

/// The tagged union over all five stored kinds. This is what the validator
/// produces and what the storage loaders and query builder consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Ohlcv(OhlcvRecord),
    Trade(TradeRecord),
    Tbbo(TbboRecord),
    Statistics(StatisticsRecord),
    Definition(DefinitionRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Ohlcv(_) => RecordKind::Ohlcv,
            Record::Trade(_) => RecordKind::Trade,
            Record::Tbbo(_) => RecordKind::Tbbo,
            Record::Statistics(_) => RecordKind::Statistics,
            Record::Definition(_) => RecordKind::Definition,
        }
    }
}

/// A loosely-typed record as it exists before validation: a bag of named
/// fields straight from the adapter or after rule-engine transformation.
/// Using a string-keyed map (rather than a typed struct) here is deliberate —
/// the rule engine's job is exactly to turn this into something that *can* be
/// typed, and until that succeeds we don't know which fields are missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord(pub HashMap<String, Value>);

impl RawRecord {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0
            .get(field)
            .map(|v| !v.is_null())
            .unwrap_or(false)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(v) = self.0.remove(from) {
            self.0.entry(to.to_string()).or_insert(v);
        }
    }
}

/// A record that failed validation, carried alongside the reason so the
/// quarantine sink (whatever medium the caller chooses) has enough context to
/// act on it later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub kind: RecordKind,
    pub raw: RawRecord,
    pub error_kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_record_contains_treats_null_as_absent() {
        let mut r = RawRecord::new();
        r.set("symbol", Value::Null);
        assert!(!r.contains("symbol"));
        r.set("symbol", Value::String("ES.c.0".into()));
        assert!(r.contains("symbol"));
    }

    #[test]
    fn raw_record_rename_keeps_existing_target() {
        let mut r = RawRecord::new();
        r.set("price", Value::from(1.5));
        r.set("stat_value", Value::from(2.5));
        r.rename("price", "stat_value");
        assert_eq!(r.get("stat_value").unwrap().as_f64(), Some(2.5));
        assert!(r.get("price").is_none());
    }

    #[test]
    fn record_kind_round_trips_through_as_str() {
        for kind in [
            RecordKind::Ohlcv,
            RecordKind::Trade,
            RecordKind::Tbbo,
            RecordKind::Statistics,
            RecordKind::Definition,
        ] {
            assert!(!kind.as_str().is_empty());
        }
    }
}
