//! Record validation and bounded repair.
//!
//! Given transformed records for a single kind, produces a `(good,
//! quarantined)` partition. A handful of recoverable defects are repaired in
//! place before the required-field check runs; everything else that fails
//! the check, or fails to coerce into its stored type, is quarantined.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{
    DefinitionRecord, Granularity, OhlcvRecord, QuarantinedRecord, RawRecord, Record,
    RecordHeader, RecordKind, Side, StatType, StatisticsRecord, TbboRecord, TradeRecord,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationStats {
    pub repaired: usize,
    pub failed_repair: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub good: Vec<Record>,
    pub quarantined: Vec<QuarantinedRecord>,
    pub stats: ValidationStats,
}

fn required_fields(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Ohlcv => &["ts_event", "instrument_id", "symbol", "open", "high", "low", "close"],
        RecordKind::Trade => &["ts_event", "instrument_id", "price", "size", "symbol"],
        RecordKind::Tbbo => &["ts_event", "instrument_id", "symbol"],
        RecordKind::Statistics => &["ts_event", "instrument_id", "symbol", "stat_type"],
        RecordKind::Definition => &["ts_event", "instrument_id", "raw_symbol"],
    }
}

/// Performs the repairable-defect pass: fills in a handful of recoverable
/// gaps before the required-field check runs. Returns `true` if a repair
/// was made.
fn repair(raw: &mut RawRecord, kind: RecordKind, single_job_symbol: Option<&str>) -> bool {
    let mut repaired = false;

    if !raw.contains("symbol") {
        if let Some(symbol) = single_job_symbol {
            raw.set("symbol", Value::String(symbol.to_string()));
            repaired = true;
        } else if let Some(id) = raw.get("instrument_id").and_then(Value::as_u64) {
            raw.set("symbol", Value::String(format!("INSTRUMENT_{id}")));
            repaired = true;
        }
    }

    if kind == RecordKind::Statistics
        && !raw.contains("stat_value")
        && raw.contains("price")
    {
        raw.rename("price", "stat_value");
        repaired = true;
    }

    if kind == RecordKind::Definition {
        let defaults: &[(&str, Value)] = &[
            ("rtype", Value::from(19)),
            ("security_update_action", Value::String("A".into())),
            ("inst_attrib_value", Value::from(0)),
            ("min_lot_size", Value::from(0)),
            ("min_lot_size_block", Value::from(0)),
            ("min_lot_size_round_lot", Value::from(0)),
            ("group", Value::String(String::new())),
            ("asset", Value::String(String::new())),
        ];
        for (field, default) in defaults {
            if !raw.contains(field) {
                raw.set(*field, default.clone());
                repaired = true;
            }
        }
    }

    repaired
}

fn missing_required_field(raw: &RawRecord, kind: RecordKind) -> Option<&'static str> {
    required_fields(kind)
        .iter()
        .find(|field| !raw.contains(field))
        .copied()
}

fn parse_str(raw: &RawRecord, field: &str) -> Option<String> {
    raw.get(field).and_then(Value::as_str).map(str::to_string)
}

fn parse_decimal(raw: &RawRecord, field: &str) -> Option<Decimal> {
    match raw.get(field)? {
        Value::String(s) => s.parse::<Decimal>().ok(),
        Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        _ => None,
    }
}

fn parse_u64(raw: &RawRecord, field: &str) -> Option<u64> {
    match raw.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

fn parse_u32(raw: &RawRecord, field: &str) -> Option<u32> {
    parse_u64(raw, field).and_then(|v| u32::try_from(v).ok())
}

fn parse_u16(raw: &RawRecord, field: &str) -> Option<u16> {
    parse_u64(raw, field).and_then(|v| u16::try_from(v).ok())
}

fn parse_i64(raw: &RawRecord, field: &str) -> Option<i64> {
    match raw.get(field)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_i32(raw: &RawRecord, field: &str) -> Option<i32> {
    parse_i64(raw, field).and_then(|v| i32::try_from(v).ok())
}

fn parse_datetime(raw: &RawRecord, field: &str) -> Option<DateTime<Utc>> {
    match raw.get(field)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn build_header(raw: &RawRecord, data_source: &str) -> Option<RecordHeader> {
    let ts_event = parse_datetime(raw, "ts_event")?;
    let instrument_id = parse_u32(raw, "instrument_id")?;
    let symbol = parse_str(raw, "symbol").or_else(|| parse_str(raw, "raw_symbol"))?;
    let ts_recv = parse_datetime(raw, "ts_recv").unwrap_or(ts_event);
    let publisher_id = parse_u16(raw, "publisher_id").unwrap_or(0);
    let _ = data_source;
    Some(RecordHeader {
        ts_event,
        ts_recv,
        instrument_id,
        publisher_id,
        symbol,
    })
}

fn build_typed(raw: &RawRecord, kind: RecordKind, data_source: &str) -> Option<Record> {
    let header = build_header(raw, data_source)?;
    match kind {
        RecordKind::Ohlcv => {
            let open = parse_decimal(raw, "open")?;
            let high = parse_decimal(raw, "high")?;
            let low = parse_decimal(raw, "low")?;
            let close = parse_decimal(raw, "close")?;
            let volume = parse_u64(raw, "volume").unwrap_or(0);
            let granularity = parse_str(raw, "granularity")
                .and_then(|g| Granularity::from_suffix(&g))
                .unwrap_or(Granularity::Day1);
            Some(Record::Ohlcv(OhlcvRecord {
                header,
                open,
                high,
                low,
                close,
                volume,
                trade_count: parse_u64(raw, "trade_count"),
                vwap: parse_decimal(raw, "vwap"),
                granularity,
                data_source: data_source.to_string(),
            }))
        }
        RecordKind::Trade => {
            let price = parse_decimal(raw, "price")?;
            let size = parse_u32(raw, "size")?;
            let side = match parse_str(raw, "side").as_deref() {
                Some("B") => Side::B,
                Some("S") => Side::S,
                _ => Side::N,
            };
            Some(Record::Trade(TradeRecord {
                header,
                price,
                size,
                side,
                sequence: parse_u64(raw, "sequence").unwrap_or(0),
                action: parse_str(raw, "action"),
                data_source: data_source.to_string(),
            }))
        }
        RecordKind::Tbbo => {
            let bid_px = parse_decimal(raw, "bid_px");
            let ask_px = parse_decimal(raw, "ask_px");
            let is_crossed = match (bid_px, ask_px) {
                (Some(b), Some(a)) => b > a,
                _ => false,
            };
            Some(Record::Tbbo(TbboRecord {
                header,
                bid_px,
                ask_px,
                bid_sz: parse_u32(raw, "bid_sz"),
                ask_sz: parse_u32(raw, "ask_sz"),
                bid_ct: parse_u32(raw, "bid_ct"),
                ask_ct: parse_u32(raw, "ask_ct"),
                sequence: parse_u64(raw, "sequence").unwrap_or(0),
                is_crossed,
                data_source: data_source.to_string(),
            }))
        }
        RecordKind::Statistics => {
            let stat_type_raw = parse_str(raw, "stat_type")?;
            let stat_type = match stat_type_raw.as_str() {
                "settlement_price" => StatType::SettlementPrice,
                "open_interest" => StatType::OpenInterest,
                "high_limit" => StatType::HighLimit,
                "low_limit" => StatType::LowLimit,
                other => StatType::Other(other.to_string()),
            };
            Some(Record::Statistics(StatisticsRecord {
                header,
                stat_type,
                stat_value: parse_decimal(raw, "stat_value"),
                open_interest: parse_decimal(raw, "open_interest"),
                settlement_price: parse_decimal(raw, "settlement_price"),
                high_limit: parse_decimal(raw, "high_limit"),
                low_limit: parse_decimal(raw, "low_limit"),
                sequence: parse_u64(raw, "sequence").unwrap_or(0),
                flags: parse_i32(raw, "flags"),
                data_source: data_source.to_string(),
            }))
        }
        RecordKind::Definition => {
            let raw_symbol = parse_str(raw, "raw_symbol")?;
            Some(Record::Definition(DefinitionRecord {
                header,
                rtype: parse_i32(raw, "rtype").unwrap_or(19),
                raw_symbol,
                security_update_action: parse_str(raw, "security_update_action")
                    .unwrap_or_else(|| "A".to_string()),
                instrument_class: parse_str(raw, "instrument_class"),
                min_price_increment: parse_decimal(raw, "min_price_increment"),
                display_factor: parse_decimal(raw, "display_factor"),
                expiration: parse_datetime(raw, "expiration"),
                activation: parse_datetime(raw, "activation"),
                high_limit_price: parse_decimal(raw, "high_limit_price"),
                low_limit_price: parse_decimal(raw, "low_limit_price"),
                max_price_variation: parse_decimal(raw, "max_price_variation"),
                unit_of_measure_qty: parse_decimal(raw, "unit_of_measure_qty"),
                min_price_increment_amount: parse_decimal(raw, "min_price_increment_amount"),
                price_ratio: parse_decimal(raw, "price_ratio"),
                inst_attrib_value: parse_i64(raw, "inst_attrib_value").unwrap_or(0),
                underlying_id: parse_u32(raw, "underlying_id"),
                raw_instrument_id: parse_u32(raw, "raw_instrument_id"),
                market_depth_implied: parse_i32(raw, "market_depth_implied"),
                market_depth: parse_i32(raw, "market_depth"),
                market_segment_id: parse_i32(raw, "market_segment_id"),
                max_trade_vol: parse_u64(raw, "max_trade_vol"),
                min_lot_size: parse_i64(raw, "min_lot_size").unwrap_or(0),
                min_lot_size_block: parse_i64(raw, "min_lot_size_block").unwrap_or(0),
                min_lot_size_round_lot: parse_i64(raw, "min_lot_size_round_lot").unwrap_or(0),
                min_trade_vol: parse_u64(raw, "min_trade_vol"),
                contract_multiplier: parse_i32(raw, "contract_multiplier"),
                decay_quantity: parse_i32(raw, "decay_quantity"),
                original_contract_size: parse_i32(raw, "original_contract_size"),
                appl_id: parse_i32(raw, "appl_id").and_then(|v| i16::try_from(v).ok()),
                maturity_year: parse_i32(raw, "maturity_year").and_then(|v| i16::try_from(v).ok()),
                decay_start_date: parse_datetime(raw, "decay_start_date"),
                channel_id: parse_i32(raw, "channel_id"),
                currency: parse_str(raw, "currency"),
                settl_currency: parse_str(raw, "settl_currency"),
                secsubtype: parse_str(raw, "secsubtype"),
                group: parse_str(raw, "group").unwrap_or_default(),
                exchange: parse_str(raw, "exchange"),
                asset: parse_str(raw, "asset").unwrap_or_default(),
                cfi: parse_str(raw, "cfi"),
                security_type: parse_str(raw, "security_type"),
                unit_of_measure: parse_str(raw, "unit_of_measure"),
                underlying: parse_str(raw, "underlying"),
                strike_price_currency: parse_str(raw, "strike_price_currency"),
                strike_price: parse_decimal(raw, "strike_price"),
                match_algorithm: parse_str(raw, "match_algorithm"),
                main_fraction: parse_i32(raw, "main_fraction"),
                price_display_format: parse_i32(raw, "price_display_format"),
                sub_fraction: parse_i32(raw, "sub_fraction"),
                underlying_product: parse_i32(raw, "underlying_product"),
                maturity_month: parse_i32(raw, "maturity_month"),
                maturity_day: parse_i32(raw, "maturity_day"),
                maturity_week: parse_i32(raw, "maturity_week"),
                user_defined_instrument: parse_str(raw, "user_defined_instrument"),
                contract_multiplier_unit: parse_i32(raw, "contract_multiplier_unit"),
                flow_schedule_type: parse_i32(raw, "flow_schedule_type"),
                tick_rule: parse_i32(raw, "tick_rule"),
                leg_count: parse_i32(raw, "leg_count"),
                leg_index: parse_i32(raw, "leg_index"),
                leg_instrument_id: parse_u32(raw, "leg_instrument_id"),
                leg_raw_symbol: parse_str(raw, "leg_raw_symbol"),
                leg_instrument_class: parse_str(raw, "leg_instrument_class"),
                leg_side: parse_str(raw, "leg_side"),
                leg_price: parse_decimal(raw, "leg_price"),
                leg_delta: parse_decimal(raw, "leg_delta"),
                leg_ratio_price_numerator: parse_i32(raw, "leg_ratio_price_numerator"),
                leg_ratio_price_denominator: parse_i32(raw, "leg_ratio_price_denominator"),
                leg_ratio_qty_numerator: parse_i32(raw, "leg_ratio_qty_numerator"),
                leg_ratio_qty_denominator: parse_i32(raw, "leg_ratio_qty_denominator"),
                leg_underlying_id: parse_u32(raw, "leg_underlying_id"),
                data_source: data_source.to_string(),
            }))
        }
    }
}

pub struct Validator;

impl Validator {
    /// Validates and repairs a batch of transformed records for a single
    /// kind. `single_job_symbol` should be `Some` only when the job was
    /// configured with exactly one symbol, enabling the missing-symbol
    /// repair to fall back to it.
    pub fn validate_batch(
        records: &[RawRecord],
        kind: RecordKind,
        single_job_symbol: Option<&str>,
        data_source: &str,
    ) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for record in records {
            let mut raw = record.clone();
            if repair(&mut raw, kind, single_job_symbol) {
                outcome.stats.repaired += 1;
            }

            if let Some(field) = missing_required_field(&raw, kind) {
                outcome.stats.failed_repair += 1;
                outcome.quarantined.push(QuarantinedRecord {
                    kind,
                    raw,
                    error_kind: "validation".into(),
                    message: format!("missing required field '{field}'"),
                });
                continue;
            }

            match build_typed(&raw, kind, data_source) {
                Some(typed) => outcome.good.push(typed),
                None => {
                    outcome.stats.failed_repair += 1;
                    outcome.quarantined.push(QuarantinedRecord {
                        kind,
                        raw,
                        error_kind: "validation".into(),
                        message: "structural type-coercion failure".into(),
                    });
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_trade(fields: &[(&str, Value)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (k, v) in fields {
            r.set(*k, v.clone());
        }
        r
    }

    #[test]
    fn partition_sizes_match_input() {
        let records = vec![
            raw_trade(&[
                ("ts_event", Value::String(Utc::now().to_rfc3339())),
                ("instrument_id", Value::from(1)),
                ("symbol", Value::String("ES.c.0".into())),
                ("price", Value::String("100.50".into())),
                ("size", Value::from(10)),
            ]),
            raw_trade(&[("instrument_id", Value::from(1))]),
        ];
        let outcome = Validator::validate_batch(&records, RecordKind::Trade, None, "databento");
        assert_eq!(outcome.good.len() + outcome.quarantined.len(), records.len());
        assert_eq!(outcome.good.len(), 1);
        assert_eq!(outcome.quarantined.len(), 1);
    }

    #[test]
    fn repairs_missing_symbol_from_single_job_symbol() {
        let records = vec![raw_trade(&[
            ("ts_event", Value::String(Utc::now().to_rfc3339())),
            ("instrument_id", Value::from(12345)),
            ("price", Value::String("1.0".into())),
            ("size", Value::from(1)),
        ])];
        let outcome =
            Validator::validate_batch(&records, RecordKind::Trade, Some("ES.c.0"), "databento");
        assert_eq!(outcome.stats.repaired, 1);
        assert_eq!(outcome.quarantined.len(), 0);
        match &outcome.good[0] {
            Record::Trade(t) => assert_eq!(t.header.symbol, "ES.c.0"),
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn repairs_missing_symbol_from_instrument_id_placeholder() {
        let records = vec![raw_trade(&[
            ("ts_event", Value::String(Utc::now().to_rfc3339())),
            ("instrument_id", Value::from(12345)),
            ("price", Value::String("1.0".into())),
            ("size", Value::from(1)),
        ])];
        let outcome = Validator::validate_batch(&records, RecordKind::Trade, None, "databento");
        match &outcome.good[0] {
            Record::Trade(t) => assert_eq!(t.header.symbol, "INSTRUMENT_12345"),
            _ => panic!("expected trade"),
        }
    }

    #[test]
    fn statistics_price_renamed_to_stat_value() {
        let records = vec![raw_trade(&[
            ("ts_event", Value::String(Utc::now().to_rfc3339())),
            ("instrument_id", Value::from(1)),
            ("symbol", Value::String("ES.c.0".into())),
            ("stat_type", Value::String("settlement_price".into())),
            ("price", Value::String("4700.25".into())),
        ])];
        let outcome =
            Validator::validate_batch(&records, RecordKind::Statistics, None, "databento");
        assert_eq!(outcome.quarantined.len(), 0);
        match &outcome.good[0] {
            Record::Statistics(s) => {
                assert_eq!(s.stat_value, Some("4700.25".parse::<Decimal>().unwrap()))
            }
            _ => panic!("expected statistics"),
        }
    }

    #[test]
    fn tbbo_crossed_market_flagged_not_quarantined() {
        let records = vec![raw_trade(&[
            ("ts_event", Value::String(Utc::now().to_rfc3339())),
            ("instrument_id", Value::from(1)),
            ("symbol", Value::String("ES.c.0".into())),
            ("bid_px", Value::String("100.25".into())),
            ("ask_px", Value::String("100.20".into())),
        ])];
        let outcome = Validator::validate_batch(&records, RecordKind::Tbbo, None, "databento");
        assert_eq!(outcome.quarantined.len(), 0);
        match &outcome.good[0] {
            Record::Tbbo(t) => assert!(t.is_crossed),
            _ => panic!("expected tbbo"),
        }
    }

    #[test]
    fn definition_defaults_injected() {
        let records = vec![raw_trade(&[
            ("ts_event", Value::String(Utc::now().to_rfc3339())),
            ("instrument_id", Value::from(1)),
            ("raw_symbol", Value::String("ESZ4".into())),
        ])];
        let outcome =
            Validator::validate_batch(&records, RecordKind::Definition, None, "databento");
        assert_eq!(outcome.quarantined.len(), 0);
        match &outcome.good[0] {
            Record::Definition(d) => {
                assert_eq!(d.rtype, 19);
                assert_eq!(d.security_update_action, "A");
                assert_eq!(d.min_lot_size, 0);
            }
            _ => panic!("expected definition"),
        }
    }

    #[test]
    fn missing_ts_event_quarantines() {
        let records = vec![raw_trade(&[
            ("instrument_id", Value::from(1)),
            ("symbol", Value::String("ES.c.0".into())),
        ])];
        let outcome = Validator::validate_batch(&records, RecordKind::Tbbo, None, "databento");
        assert_eq!(outcome.good.len(), 0);
        assert_eq!(outcome.quarantined.len(), 1);
        assert_eq!(outcome.stats.failed_repair, 1);
    }
}
