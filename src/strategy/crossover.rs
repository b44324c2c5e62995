use super::Strategy;
use crate::error::ConfigError;
use crate::indicators::calculate_sma;
use crate::models::{MarketSnapshot, Signal};
use serde::{Deserialize, Serialize};

/// Window sizes for the moving average crossover
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossoverConfig {
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for CrossoverConfig {
    fn default() -> Self {
        Self {
            short_window: 50,
            long_window: 200,
        }
    }
}

impl CrossoverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.short_window == 0 || self.short_window >= self.long_window {
            return Err(ConfigError::InvalidWindows {
                short: self.short_window,
                long: self.long_window,
            });
        }
        Ok(())
    }
}

/// Golden cross / death cross strategy
///
/// Compares the short and long simple moving averages of the latest close
/// against the same pair computed one bar earlier:
/// - BUY when the short average was at or below the long one and is now above it
/// - SELL when it was at or above and is now below
/// - HOLD otherwise
///
/// Both snapshots need a full long window, so the series must hold at least
/// `long_window + 1` closes; anything shorter is INSUFFICIENT_DATA.
#[derive(Debug, Clone, Default)]
pub struct CrossoverStrategy {
    config: CrossoverConfig,
}

impl CrossoverStrategy {
    pub fn new(config: CrossoverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CrossoverConfig {
        &self.config
    }

    /// Latest close with both averages, `None` if either average is undefined
    pub fn snapshot(&self, prices: &[f64]) -> Option<MarketSnapshot> {
        Some(MarketSnapshot {
            price: *prices.last()?,
            short_ma: calculate_sma(prices, self.config.short_window)?,
            long_ma: calculate_sma(prices, self.config.long_window)?,
        })
    }
}

impl Strategy for CrossoverStrategy {
    fn classify(&self, prices: &[f64]) -> Signal {
        if prices.len() < self.min_prices_required() {
            return Signal::InsufficientData;
        }

        let previous = &prices[..prices.len() - 1];
        let averages = (
            calculate_sma(prices, self.config.short_window),
            calculate_sma(prices, self.config.long_window),
            calculate_sma(previous, self.config.short_window),
            calculate_sma(previous, self.config.long_window),
        );

        let (Some(short_ma), Some(long_ma), Some(prev_short_ma), Some(prev_long_ma)) = averages
        else {
            return Signal::InsufficientData;
        };

        if prev_short_ma <= prev_long_ma && short_ma > long_ma {
            Signal::Buy
        } else if prev_short_ma >= prev_long_ma && short_ma < long_ma {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    fn name(&self) -> &str {
        "CrossoverStrategy"
    }

    fn min_prices_required(&self) -> usize {
        self.config.long_window.saturating_add(1)
    }
}
