// Order execution loop and the seams it drives
pub mod clock;
pub mod dry_run;
pub mod executor;

pub use clock::{Sleeper, TokioSleeper};
pub use dry_run::DryRunSink;
pub use executor::{
    CycleOutcome, ExecutionConfig, ExecutionLoop, ExecutionState, OrderStatePolicy, RunSummary,
};

use crate::error::{OrderError, ProviderError};
use crate::models::{OrderAck, OrderRequest, PriceHistory};
use async_trait::async_trait;

/// Source of daily closing prices
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch up to `bars` of the most recent daily bars, oldest first
    async fn fetch_history(&self, symbol: &str, bars: usize)
        -> Result<PriceHistory, ProviderError>;
}

/// Destination for orders
///
/// A successful result means the order was accepted, not that it filled.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, OrderError>;
}
