//! Storage loaders: schema bootstrap and idempotent batch upsert into the
//! time-partitioned analytical store.
//!
//! TimescaleDB is wire-compatible Postgres, so every loader here talks to a
//! plain `sqlx::PgPool`; the time-partitioning comes from `create_hypertable`
//! in each loader's `ensure_schema`.

mod definition;
mod ohlcv;
mod statistics;
mod tbbo;
mod trade;

pub use definition::DefinitionLoader;
pub use ohlcv::OhlcvLoader;
pub use statistics::StatisticsLoader;
pub use tbbo::TbboLoader;
pub use trade::TradeLoader;

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::EngineResult;
use crate::models::Record;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub inserted: usize,
    pub errors: usize,
}

impl std::ops::AddAssign for LoadStats {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.errors += rhs.errors;
    }
}

/// Shared contract implemented by each kind-specific loader.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Creates the target table, hypertable partitioning and secondary
    /// indexes if absent. Safe and cheap to call repeatedly.
    async fn ensure_schema(&self, pool: &PgPool) -> EngineResult<()>;

    /// Upserts a homogeneous batch of records of this loader's kind. Records
    /// of other kinds are ignored (defensive; the orchestrator only ever
    /// hands a loader records matching the job's resolved schema).
    async fn insert(
        &self,
        pool: &PgPool,
        records: &[Record],
        data_source: &str,
        sub_batch_size: usize,
    ) -> EngineResult<LoadStats>;
}

/// Splits a slice into chunks of at most `size`, never producing an empty
/// chunk. Used so each sub-batch becomes exactly one multi-row upsert.
pub(crate) fn sub_batches<T>(items: &[T], size: usize) -> impl Iterator<Item = &[T]> {
    let size = size.max(1);
    items.chunks(size)
}
