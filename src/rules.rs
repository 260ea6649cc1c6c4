//! Rule-driven transformation engine.
//!
//! The mapping document is the only source of truth for how a raw vendor
//! record becomes the normalized internal shape. It is parsed once at
//! startup and compiled into a lookup table; any rule that names a field
//! outside a kind's known field set fails at compile time, not at the first
//! record that happens to hit it.

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::models::{RawRecord, RecordKind};

/// Coercions the engine knows how to apply. `Passthrough` leaves the value as
/// the rule engine found it (after any rename) for the validator to judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    Decimal,
    Integer,
    UnsignedInteger,
    EpochNanos,
    EnumUpper,
    Passthrough,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldRuleDoc {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub coerce: Option<Coercion>,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KindMappingDoc {
    #[serde(default)]
    pub fields: Vec<FieldRuleDoc>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

/// The raw, on-disk shape of the mapping document (one entry per kind, plus a
/// global alias table used when ingesting normalized records — e.g.
/// `record_type`/`rtype`, `update_action`/`security_update_action`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MappingDocumentSource {
    #[serde(default)]
    pub ohlcv: Option<KindMappingDoc>,
    #[serde(default)]
    pub trade: Option<KindMappingDoc>,
    #[serde(default)]
    pub tbbo: Option<KindMappingDoc>,
    #[serde(default)]
    pub statistics: Option<KindMappingDoc>,
    #[serde(default)]
    pub definition: Option<KindMappingDoc>,
    #[serde(default)]
    pub global_aliases: HashMap<String, String>,
}

/// The built-in global alias table, used when no mapping document
/// overrides it.
pub fn default_global_aliases() -> HashMap<String, String> {
    [
        ("record_type", "rtype"),
        ("update_action", "security_update_action"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

fn known_fields(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Ohlcv => &[
            "ts_event",
            "ts_recv",
            "instrument_id",
            "publisher_id",
            "symbol",
            "open",
            "high",
            "low",
            "close",
            "volume",
            "trade_count",
            "vwap",
            "granularity",
        ],
        RecordKind::Trade => &[
            "ts_event",
            "ts_recv",
            "instrument_id",
            "publisher_id",
            "symbol",
            "price",
            "size",
            "side",
            "sequence",
            "action",
        ],
        RecordKind::Tbbo => &[
            "ts_event",
            "ts_recv",
            "instrument_id",
            "publisher_id",
            "symbol",
            "bid_px",
            "ask_px",
            "bid_sz",
            "ask_sz",
            "bid_ct",
            "ask_ct",
            "sequence",
        ],
        RecordKind::Statistics => &[
            "ts_event",
            "ts_recv",
            "instrument_id",
            "publisher_id",
            "symbol",
            "stat_type",
            "stat_value",
            "open_interest",
            "settlement_price",
            "high_limit",
            "low_limit",
            "sequence",
            "flags",
        ],
        RecordKind::Definition => &[
            "ts_event",
            "ts_recv",
            "instrument_id",
            "publisher_id",
            "symbol",
            "rtype",
            "raw_symbol",
            "security_update_action",
            "instrument_class",
            "min_price_increment",
            "expiration",
            "activation",
            "group",
            "asset",
            "exchange",
        ],
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    source: String,
    target: String,
    coerce: Coercion,
    default: Option<Value>,
}

/// A fully compiled mapping document: one rule list and alias table per kind.
#[derive(Debug, Clone, Default)]
pub struct MappingDocument {
    rules: HashMap<RecordKind, Vec<FieldRule>>,
    aliases: HashMap<RecordKind, HashMap<String, String>>,
    global_aliases: HashMap<String, String>,
}

impl MappingDocument {
    /// Compiles a raw document, validating every target field name against
    /// the kind's known field set. Unknown fields are a startup-time error.
    pub fn compile(source: MappingDocumentSource) -> EngineResult<Self> {
        let mut rules = HashMap::new();
        let mut aliases = HashMap::new();

        let entries = [
            (RecordKind::Ohlcv, source.ohlcv),
            (RecordKind::Trade, source.trade),
            (RecordKind::Tbbo, source.tbbo),
            (RecordKind::Statistics, source.statistics),
            (RecordKind::Definition, source.definition),
        ];

        for (kind, maybe_doc) in entries {
            let Some(doc) = maybe_doc else {
                continue;
            };
            let known = known_fields(kind);
            let mut compiled = Vec::with_capacity(doc.fields.len());
            for rule in doc.fields {
                if !known.contains(&rule.target.as_str()) {
                    return Err(EngineError::Config(format!(
                        "mapping document references unknown field '{}' for kind {:?}",
                        rule.target, kind
                    )));
                }
                compiled.push(FieldRule {
                    source: rule.source,
                    target: rule.target,
                    coerce: rule.coerce.unwrap_or(Coercion::Passthrough),
                    default: rule.default,
                });
            }
            rules.insert(kind, compiled);
            aliases.insert(kind, doc.aliases);
        }

        let global_aliases = if source.global_aliases.is_empty() {
            default_global_aliases()
        } else {
            source.global_aliases
        };

        Ok(Self {
            rules,
            aliases,
            global_aliases,
        })
    }

    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
            aliases: HashMap::new(),
            global_aliases: default_global_aliases(),
        }
    }

    /// Transforms a batch of raw records for the given kind. Pure: preserves
    /// input order, never mutates the caller's records, never touches
    /// external state or the clock.
    pub fn transform_batch(&self, records: &[RawRecord], kind: RecordKind) -> Vec<RawRecord> {
        records
            .iter()
            .map(|record| self.transform_one(record, kind))
            .collect()
    }

    fn transform_one(&self, record: &RawRecord, kind: RecordKind) -> RawRecord {
        let mut out = record.clone();

        if kind == RecordKind::Definition {
            for (from, to) in &self.global_aliases {
                out.rename(from, to);
            }
        }
        if let Some(kind_aliases) = self.aliases.get(&kind) {
            for (from, to) in kind_aliases {
                out.rename(from, to);
            }
        }

        if let Some(rules) = self.rules.get(&kind) {
            for rule in rules {
                let value = out.get(&rule.source).cloned();
                let resolved = match value {
                    Some(v) if !v.is_null() => Some(v),
                    _ => rule.default.clone(),
                };
                if let Some(v) = resolved {
                    let coerced = coerce(&v, rule.coerce);
                    out.set(rule.target.clone(), coerced);
                    if rule.source != rule.target {
                        out.remove(&rule.source);
                    }
                }
            }
        }

        out
    }
}

/// Applies a single coercion. Coercion failures never panic and never
/// surface past this function — transformation is best-effort; on failure
/// the original value is passed through unchanged so the validator's
/// structural check can catch it.
fn coerce(value: &Value, coercion: Coercion) -> Value {
    match coercion {
        Coercion::Passthrough => value.clone(),
        Coercion::EnumUpper => match value.as_str() {
            Some(s) if !s.is_empty() => Value::String(s.to_uppercase()),
            Some(_) => Value::Null,
            None => value.clone(),
        },
        Coercion::Decimal => {
            let parsed = match value {
                Value::String(s) if s.is_empty() => return Value::Null,
                Value::String(s) => s.parse::<Decimal>().ok(),
                Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
                _ => None,
            };
            match parsed {
                Some(d) => Value::String(d.to_string()),
                None => value.clone(),
            }
        }
        Coercion::Integer => match value {
            Value::String(s) if s.is_empty() => Value::Null,
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone()),
            other => other.clone(),
        },
        Coercion::UnsignedInteger => match value {
            Value::String(s) if s.is_empty() => Value::Null,
            Value::String(s) => s
                .parse::<u64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone()),
            other => other.clone(),
        },
        Coercion::EpochNanos => {
            let nanos = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.parse::<i64>().ok(),
                _ => None,
            };
            match nanos {
                Some(n) => {
                    let secs = n.div_euclid(1_000_000_000);
                    let nsub = n.rem_euclid(1_000_000_000) as u32;
                    match Utc.timestamp_opt(secs, nsub).single() {
                        Some(dt) => Value::String(dt.to_rfc3339()),
                        None => value.clone(),
                    }
                }
                None => value.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, Value)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (k, v) in pairs {
            r.set(*k, v.clone());
        }
        r
    }

    #[test]
    fn compile_rejects_unknown_target_field() {
        let mut source = MappingDocumentSource::default();
        source.ohlcv = Some(KindMappingDoc {
            fields: vec![FieldRuleDoc {
                source: "o".into(),
                target: "not_a_real_field".into(),
                coerce: None,
                default: None,
            }],
            aliases: HashMap::new(),
        });
        assert!(MappingDocument::compile(source).is_err());
    }

    #[test]
    fn transform_renames_and_coerces_decimal() {
        let mut source = MappingDocumentSource::default();
        source.ohlcv = Some(KindMappingDoc {
            fields: vec![FieldRuleDoc {
                source: "o".into(),
                target: "open".into(),
                coerce: Some(Coercion::Decimal),
                default: None,
            }],
            aliases: HashMap::new(),
        });
        let doc = MappingDocument::compile(source).unwrap();
        let input = raw(&[("o", Value::String("4700.25".into()))]);
        let out = doc.transform_batch(&[input], RecordKind::Ohlcv);
        assert_eq!(
            out[0].get("open").unwrap().as_str(),
            Some("4700.25")
        );
        assert!(out[0].get("o").is_none());
    }

    #[test]
    fn transform_preserves_order_and_does_not_mutate_input() {
        let doc = MappingDocument::empty();
        let input = vec![
            raw(&[("symbol", Value::String("A".into()))]),
            raw(&[("symbol", Value::String("B".into()))]),
        ];
        let out = doc.transform_batch(&input, RecordKind::Trade);
        assert_eq!(out[0].get_str("symbol"), Some("A"));
        assert_eq!(out[1].get_str("symbol"), Some("B"));
        assert_eq!(input[0].get_str("symbol"), Some("A"));
    }

    #[test]
    fn transform_applies_default_when_source_missing() {
        let mut source = MappingDocumentSource::default();
        source.definition = Some(KindMappingDoc {
            fields: vec![FieldRuleDoc {
                source: "rtype".into(),
                target: "rtype".into(),
                coerce: Some(Coercion::Integer),
                default: Some(Value::from(19)),
            }],
            aliases: HashMap::new(),
        });
        let doc = MappingDocument::compile(source).unwrap();
        let input = raw(&[]);
        let out = doc.transform_batch(&[input], RecordKind::Definition);
        assert_eq!(out[0].get("rtype").unwrap().as_i64(), Some(19));
    }

    #[test]
    fn global_alias_applied_for_definition_kind() {
        let doc = MappingDocument::empty();
        let input = raw(&[
            ("record_type", Value::from(19)),
            ("update_action", Value::String("A".into())),
        ]);
        let out = doc.transform_batch(&[input], RecordKind::Definition);
        assert_eq!(out[0].get("rtype").unwrap().as_i64(), Some(19));
        assert_eq!(
            out[0].get("security_update_action").unwrap().as_str(),
            Some("A")
        );
    }
}
