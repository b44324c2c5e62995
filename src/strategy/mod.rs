// Trading strategy module
pub mod crossover;

use crate::models::Signal;

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Classify a chronological series of closing prices
    fn classify(&self, prices: &[f64]) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum prices required before the strategy can emit BUY/SELL/HOLD
    fn min_prices_required(&self) -> usize;
}
