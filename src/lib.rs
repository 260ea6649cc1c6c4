//! Historical market data ingestion and query engine.
//!
//! A reusable ETL pipeline that pulls chunked time-series records from a
//! vendor API, validates and normalizes them via declarative rules, and
//! bulk-loads them into a time-partitioned analytical store with idempotent
//! upsert semantics — plus a query layer that resolves business symbols to
//! internal instrument identifiers and serves range queries over the store.

pub mod adapter;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod rules;
pub mod storage;
pub mod validate;

pub use adapter::Adapter;
pub use config::{ConnectionConfig, JobConfig, ResolvedSchema, SymbolType};
pub use error::{EngineError, EngineResult};
pub use models::{Record, RecordKind};
pub use pipeline::{Orchestrator, PipelineResult, PipelineStats, PipelineStatus};
pub use query::QueryBuilder;
pub use rules::MappingDocument;
pub use validate::Validator;
