use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{MarketDataProvider, OrderSink, Sleeper, TokioSleeper};
use crate::models::{OrderAck, OrderRequest, Signal, TimeInForce};
use crate::strategy::Strategy;

/// When `last_emitted` moves to a BUY/SELL whose order was rejected
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatePolicy {
    /// Only after the sink accepted the order. A failed order is retried on
    /// the next cycle that still sees the same signal.
    #[default]
    ConfirmedOnly,
    /// After every submission attempt. A failed order is never retried.
    AfterAttempt,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub symbol: String,
    pub quantity: u32,
    /// Bars requested per cycle (raised to the strategy minimum if lower)
    pub history_bars: usize,
    pub poll_interval: Duration,
    pub time_in_force: TimeInForce,
    pub order_state_policy: OrderStatePolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            symbol: "AAPL".to_string(),
            quantity: 1,
            history_bars: 250,
            poll_interval: Duration::from_secs(60),
            time_in_force: TimeInForce::Day,
            order_state_policy: OrderStatePolicy::ConfirmedOnly,
        }
    }
}

/// Signal the loop last acted on; lives as long as the loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionState {
    pub last_emitted: Option<Signal>,
    /// Order for the current transition that the sink has not yet accepted.
    /// Resubmitted with the same client order id until accepted or the
    /// signal moves on.
    pub pending_order: Option<OrderRequest>,
}

/// Result of a single polling cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No usable price history; state untouched
    ProviderFailed { reason: String },
    /// Same signal as last cycle; nothing to do
    Unchanged { signal: Signal },
    /// Transition into HOLD or INSUFFICIENT_DATA; recorded without an order
    Recorded { signal: Signal },
    OrderSubmitted { signal: Signal, ack: OrderAck },
    OrderFailed { signal: Signal, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub orders_submitted: u64,
    pub order_failures: u64,
    pub provider_failures: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::ProviderFailed { .. } => self.provider_failures += 1,
            CycleOutcome::OrderSubmitted { .. } => self.orders_submitted += 1,
            CycleOutcome::OrderFailed { .. } => self.order_failures += 1,
            CycleOutcome::Unchanged { .. } | CycleOutcome::Recorded { .. } => {}
        }
    }
}

/// Polls prices, classifies them and emits at most one order per signal transition
pub struct ExecutionLoop {
    config: ExecutionConfig,
    strategy: Box<dyn Strategy>,
    provider: Arc<dyn MarketDataProvider>,
    sink: Arc<dyn OrderSink>,
    sleeper: Arc<dyn Sleeper>,
    state: ExecutionState,
}

impl ExecutionLoop {
    pub fn new(
        config: ExecutionConfig,
        strategy: Box<dyn Strategy>,
        provider: Arc<dyn MarketDataProvider>,
        sink: Arc<dyn OrderSink>,
    ) -> Self {
        Self {
            config,
            strategy,
            provider,
            sink,
            sleeper: Arc::new(TokioSleeper),
            state: ExecutionState::default(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn last_emitted(&self) -> Option<Signal> {
        self.state.last_emitted
    }

    fn bars_to_fetch(&self) -> usize {
        self.config
            .history_bars
            .max(self.strategy.min_prices_required())
    }

    /// Run one fetch → classify → (maybe) order cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let symbol = self.config.symbol.clone();

        let history = match self
            .provider
            .fetch_history(&symbol, self.bars_to_fetch())
            .await
        {
            Ok(history) if history.is_empty() => {
                tracing::error!("  ✗ {} - no price data returned, skipping cycle", symbol);
                return CycleOutcome::ProviderFailed {
                    reason: format!("no price data returned for {}", symbol),
                };
            }
            Ok(history) => history,
            Err(e) => {
                tracing::error!("  ✗ {} - price fetch failed: {}", symbol, e);
                return CycleOutcome::ProviderFailed {
                    reason: e.to_string(),
                };
            }
        };

        let closes = history.closes();
        let signal = self.strategy.classify(&closes);

        if let Some(latest) = history.latest() {
            tracing::info!(
                "  {} @ ${:.2} on {} ({} bars) → {}",
                symbol,
                latest.close,
                latest.timestamp.format("%Y-%m-%d"),
                closes.len(),
                signal
            );
        }

        if self.state.last_emitted == Some(signal) {
            tracing::info!("    → No change since last cycle");
            return CycleOutcome::Unchanged { signal };
        }

        let Some(side) = signal.order_side() else {
            tracing::info!(
                "    → Transition {} → {}, no order",
                describe(self.state.last_emitted),
                signal
            );
            self.state.last_emitted = Some(signal);
            self.state.pending_order = None;
            return CycleOutcome::Recorded { signal };
        };

        let order = match self.state.pending_order.take() {
            Some(pending) if pending.side == side => {
                tracing::info!(
                    "    → Resubmitting {} order {}",
                    side,
                    pending.client_order_id
                );
                pending
            }
            _ => OrderRequest::market(
                symbol.clone(),
                self.config.quantity,
                side,
                self.config.time_in_force,
            ),
        };

        match self.sink.submit_order(&order).await {
            Ok(ack) => {
                tracing::info!(
                    "    ✅ {} {} {} submitted (order {}, status {})",
                    side,
                    order.quantity,
                    symbol,
                    ack.order_id,
                    ack.status
                );
                self.state.last_emitted = Some(signal);
                CycleOutcome::OrderSubmitted { signal, ack }
            }
            Err(e) => {
                match self.config.order_state_policy {
                    OrderStatePolicy::ConfirmedOnly => {
                        tracing::error!(
                            "    ✗ {} order failed, will retry while signal holds: {}",
                            side,
                            e
                        );
                        self.state.pending_order = Some(order);
                    }
                    OrderStatePolicy::AfterAttempt => {
                        tracing::error!("    ✗ {} order failed, not retrying: {}", side, e);
                        self.state.last_emitted = Some(signal);
                    }
                }
                CycleOutcome::OrderFailed {
                    signal,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Run cycles back to back, sleeping the poll interval between them
    ///
    /// `None` runs until the task is dropped. `Some(n)` stops after `n`
    /// cycles and does not sleep after the last one; `Some(0)` does nothing.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();

        tracing::info!(
            "💹 Execution loop starting for {} (qty {}, every {:?}, {})",
            self.config.symbol,
            self.config.quantity,
            self.config.poll_interval,
            self.strategy.name()
        );

        while max_cycles.map_or(true, |max| summary.cycles < max) {
            if summary.cycles > 0 {
                self.sleeper.sleep(self.config.poll_interval).await;
            }

            tracing::info!("💹 [TRADING] Cycle {}", summary.cycles + 1);
            let outcome = self.run_cycle().await;
            summary.record(&outcome);
        }

        tracing::info!(
            "Execution loop finished: {} cycles, {} orders, {} order failures, {} fetch failures",
            summary.cycles,
            summary.orders_submitted,
            summary.order_failures,
            summary.provider_failures
        );

        summary
    }
}

fn describe(signal: Option<Signal>) -> String {
    signal.map_or_else(|| "START".to_string(), |s| s.to_string())
}
