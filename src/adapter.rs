//! Adapter contract: the abstract extract-side interface the orchestrator
//! consumes. Concrete vendor adapters (REST/WebSocket clients) are out of
//! scope for this crate — only the trait, and a mock used by tests and by
//! callers wiring up their own adapter, live here.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::config::JobConfig;
use crate::error::EngineResult;
use crate::models::RawRecord;

/// Any extractor plugged into the pipeline orchestrator implements this.
/// The adapter owns retry/backoff against the vendor; the orchestrator never
/// retries a vendor call itself.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Checks the adapter's own configuration (API keys, dataset names) is
    /// well-formed, without making a network call.
    async fn validate_config(&self) -> EngineResult<bool>;

    /// Establishes the vendor connection. Failure here is fatal for the job.
    async fn connect(&mut self) -> EngineResult<()>;

    /// Releases the vendor connection. Called on every exit path.
    async fn disconnect(&mut self) -> EngineResult<()>;

    /// Returns a finite, lazily-pulled stream of raw records for the job.
    /// The stream must not interleave record kinds within a single logical
    /// batch boundary (mixed-kind batches are a caller bug, not something
    /// this contract needs to detect).
    fn fetch(&self, job: &JobConfig) -> BoxStream<'static, EngineResult<RawRecord>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use futures_util::stream;

    /// A finite in-memory adapter used by unit/integration tests and as a
    /// reference implementation for wiring a real one.
    pub struct MockAdapter {
        records: Vec<RawRecord>,
        connected: bool,
        fail_connect: bool,
    }

    impl MockAdapter {
        pub fn new(records: Vec<RawRecord>) -> Self {
            Self {
                records,
                connected: false,
                fail_connect: false,
            }
        }

        pub fn failing_to_connect() -> Self {
            Self {
                records: Vec::new(),
                connected: false,
                fail_connect: true,
            }
        }

        pub fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[async_trait]
    impl Adapter for MockAdapter {
        async fn validate_config(&self) -> EngineResult<bool> {
            Ok(!self.fail_connect)
        }

        async fn connect(&mut self) -> EngineResult<()> {
            if self.fail_connect {
                return Err(crate::error::EngineError::Adapter(
                    "mock adapter configured to fail connect".into(),
                ));
            }
            self.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) -> EngineResult<()> {
            self.connected = false;
            Ok(())
        }

        fn fetch(&self, _job: &JobConfig) -> BoxStream<'static, EngineResult<RawRecord>> {
            let records = self.records.clone();
            Box::pin(stream::iter(records.into_iter().map(Ok)))
        }
    }
}
