//! Typed job and connection configuration.
//!
//! The core never reads environment variables itself — the out-of-scope CLI
//! shell is responsible for populating these structs from the process
//! environment and handing them to [`crate::pipeline::Orchestrator`].

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{Granularity, RecordKind};

static CONTINUOUS_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+\.(c|n)\.\d+$").unwrap());
static PARENT_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]+\.(FUT|OPT|IVX|MLP)$").unwrap());
static NATIVE_SYMBOL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]+$").unwrap());

pub const ALL_SYMBOLS: &str = "ALL_SYMBOLS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Continuous,
    Parent,
    Native,
}

impl SymbolType {
    fn matches(&self, symbol: &str) -> bool {
        if symbol == ALL_SYMBOLS {
            return true;
        }
        match self {
            SymbolType::Continuous => CONTINUOUS_SYMBOL.is_match(symbol),
            SymbolType::Parent => PARENT_SYMBOL.is_match(symbol),
            SymbolType::Native => NATIVE_SYMBOL.is_match(symbol),
        }
    }
}

/// The schema string a job is configured with, e.g. `"ohlcv-1d"`, normalized
/// into a concrete kind + optional granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSchema {
    pub kind: RecordKind,
    pub granularity: Option<Granularity>,
}

/// Normalizes a job's raw schema string via the fixed alias table and splits
/// off a trailing granularity token for OHLCV.
pub fn resolve_schema(raw: &str) -> EngineResult<ResolvedSchema> {
    let normalized = match raw {
        "definitions" => "definition",
        "stats" => "statistics",
        "ohlcv" => "ohlcv-1d",
        other => other,
    };

    if let Some(suffix) = normalized.strip_prefix("ohlcv-") {
        let granularity = Granularity::from_suffix(suffix).ok_or_else(|| {
            EngineError::Config(format!("unknown ohlcv granularity: {suffix}"))
        })?;
        return Ok(ResolvedSchema {
            kind: RecordKind::Ohlcv,
            granularity: Some(granularity),
        });
    }

    let kind = match normalized {
        "trade" | "trades" => RecordKind::Trade,
        "tbbo" => RecordKind::Tbbo,
        "statistics" => RecordKind::Statistics,
        "definition" => RecordKind::Definition,
        other => {
            return Err(EngineError::Config(format!("unknown schema: {other}")));
        }
    };
    Ok(ResolvedSchema {
        kind,
        granularity: None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub api: String,
    pub dataset: String,
    pub schema: String,
    pub symbols: Vec<String>,
    pub stype_in: SymbolType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub chunk_interval_days: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub enable_market_calendar_filtering: bool,
    #[serde(default)]
    pub exchange_name: Option<String>,
}

impl JobConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 1000;
    pub const DEFAULT_CHUNK_INTERVAL_DAYS: u32 = 1;

    pub fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(Self::DEFAULT_BATCH_SIZE)
    }

    pub fn chunk_interval_days(&self) -> u32 {
        self.chunk_interval_days
            .unwrap_or(Self::DEFAULT_CHUNK_INTERVAL_DAYS)
    }

    /// Validates date ordering and symbol syntax. Unknown schema strings are
    /// caught here too, via [`resolve_schema`].
    pub fn validate(&self) -> EngineResult<()> {
        if self.start_date >= self.end_date {
            return Err(EngineError::Config(
                "start_date must be strictly before end_date".into(),
            ));
        }
        if self.symbols.is_empty() {
            return Err(EngineError::Config("symbols must not be empty".into()));
        }
        for symbol in &self.symbols {
            if !self.stype_in.matches(symbol) {
                return Err(EngineError::Config(format!(
                    "symbol '{symbol}' does not match stype_in {:?}",
                    self.stype_in
                )));
            }
        }
        resolve_schema(&self.schema)?;
        Ok(())
    }

    pub fn resolved_schema(&self) -> EngineResult<ResolvedSchema> {
        resolve_schema(&self.schema)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Pool size; all loaders for a job share one pool.
    #[serde(default = "ConnectionConfig::default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "ConnectionConfig::default_max_overflow")]
    pub max_overflow: u32,
}

impl ConnectionConfig {
    fn default_pool_size() -> u32 {
        5
    }

    fn default_max_overflow() -> u32 {
        10
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_schema_applies_alias_table() {
        assert_eq!(resolve_schema("definitions").unwrap().kind, RecordKind::Definition);
        assert_eq!(resolve_schema("stats").unwrap().kind, RecordKind::Statistics);
        let s = resolve_schema("ohlcv").unwrap();
        assert_eq!(s.kind, RecordKind::Ohlcv);
        assert_eq!(s.granularity, Some(Granularity::Day1));
    }

    #[test]
    fn resolve_schema_parses_granularity_suffix() {
        let s = resolve_schema("ohlcv-1h").unwrap();
        assert_eq!(s.granularity, Some(Granularity::Hour1));
    }

    #[test]
    fn resolve_schema_rejects_unknown() {
        assert!(resolve_schema("bogus").is_err());
    }

    #[test]
    fn symbol_type_matching() {
        assert!(SymbolType::Continuous.matches("ES.c.0"));
        assert!(!SymbolType::Continuous.matches("SPY"));
        assert!(SymbolType::Parent.matches("ES.FUT"));
        assert!(SymbolType::Native.matches("SPY"));
        assert!(SymbolType::Native.matches(ALL_SYMBOLS));
    }

    #[test]
    fn job_config_rejects_equal_dates() {
        let job = JobConfig {
            name: "t".into(),
            api: "databento".into(),
            dataset: "GLBX.MDP3".into(),
            schema: "ohlcv-1d".into(),
            symbols: vec!["ES.c.0".into()],
            stype_in: SymbolType::Continuous,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            chunk_interval_days: None,
            batch_size: None,
            enable_market_calendar_filtering: false,
            exchange_name: None,
        };
        assert!(job.validate().is_err());
    }
}
