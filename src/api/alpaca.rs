use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{OrderError, ProviderError};
use crate::execution::{MarketDataProvider, OrderSink};
use crate::models::{
    OrderAck, OrderRequest, OrderSide, OrderType, PriceBar, PriceHistory, TimeInForce,
};

// Alpaca REST API v2
// Docs: https://docs.alpaca.markets/reference
pub const ALPACA_PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
pub const ALPACA_DATA_URL: &str = "https://data.alpaca.markets";
const RATE_LIMIT_RPM: u32 = 200; // Free plan: 200 requests per minute
const MAX_RETRIES: u32 = 3;

type AlpacaRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for Alpaca
#[derive(Clone, Deserialize)]
pub struct AlpacaConfig {
    pub api_key_id: String,
    pub api_secret_key: String,
    pub trading_url: String,
    pub data_url: String,
    /// Market data feed (`iex` on the free plan, `sip` with a subscription)
    pub feed: String,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            api_key_id: String::new(),
            api_secret_key: String::new(),
            trading_url: ALPACA_PAPER_TRADING_URL.to_string(),
            data_url: ALPACA_DATA_URL.to_string(),
            feed: "iex".to_string(),
        }
    }
}

// Keep credentials out of logs
impl fmt::Debug for AlpacaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlpacaConfig")
            .field("api_key_id", &"<redacted>")
            .field("api_secret_key", &"<redacted>")
            .field("trading_url", &self.trading_url)
            .field("data_url", &self.data_url)
            .field("feed", &self.feed)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "c")]
    close: f64,
}

#[derive(Debug, Serialize)]
struct NewOrder<'a> {
    symbol: &'a str,
    qty: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: OrderType,
    time_in_force: TimeInForce,
    client_order_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
}

/// Why a request gave up after retries
#[derive(Debug)]
enum RequestFailure {
    Http(reqwest::Error),
    Status { status: u16, body: String },
}

impl From<RequestFailure> for ProviderError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Http(e) => ProviderError::Http(e),
            RequestFailure::Status { status, body } => ProviderError::Api { status, body },
        }
    }
}

impl From<RequestFailure> for OrderError {
    fn from(failure: RequestFailure) -> Self {
        match failure {
            RequestFailure::Http(e) => OrderError::Http(e),
            RequestFailure::Status { status, body } => OrderError::Rejected { status, body },
        }
    }
}

/// Alpaca client serving both daily bars and order submission
///
/// Cloneable; all clones share the same rate limiter.
#[derive(Clone)]
pub struct AlpacaClient {
    client: Client,
    config: AlpacaConfig,
    rate_limiter: Arc<AlpacaRateLimiter>,
    retry_backoff: Duration,
}

impl AlpacaClient {
    pub fn new(config: AlpacaConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            config,
            rate_limiter,
            retry_backoff: Duration::from_secs(1),
        })
    }

    /// Base delay for retries; attempt `n` waits `base * 2^n`
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", &self.config.api_key_id)
            .header("APCA-API-SECRET-KEY", &self.config.api_secret_key)
    }

    /// Send a rate-limited request, retrying 429, 5xx and network errors
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, RequestFailure>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            self.rate_limiter.until_ready().await;
            let backoff = self.retry_backoff * 2u32.pow(attempt);

            match self.authorized(build()).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if retryable && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Alpaca returned {}, retrying in {:?} (attempt {}/{})",
                            status,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }

                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    return Err(RequestFailure::Status {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error: {}, retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(RequestFailure::Http(e)),
            }
        }
    }

    /// Fetch the most recent `limit` daily bars, oldest first
    pub async fn get_daily_bars(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<PriceHistory, ProviderError> {
        let url = format!("{}/v2/stocks/{}/bars", self.config.data_url, symbol);

        // Trading days are sparser than calendar days; look back twice as far
        let start = Utc::now() - ChronoDuration::days(limit as i64 * 2 + 10);
        let start = start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let limit = limit.to_string();

        tracing::debug!("Fetching {} daily bars for {}", limit, symbol);

        let response = self
            .send_with_retry(|| {
                self.client.get(&url).query(&[
                    ("timeframe", "1Day"),
                    ("limit", limit.as_str()),
                    ("sort", "desc"),
                    ("adjustment", "raw"),
                    ("start", start.as_str()),
                    ("feed", self.config.feed.as_str()),
                ])
            })
            .await?;

        let data: BarsResponse = response.json().await?;
        let mut bars: Vec<PriceBar> = data
            .bars
            .unwrap_or_default()
            .into_iter()
            .filter(|bar| bar.close.is_finite() && bar.close > 0.0)
            .map(|bar| PriceBar {
                timestamp: bar.timestamp,
                close: bar.close,
            })
            .collect();

        if bars.is_empty() {
            return Err(ProviderError::Empty {
                symbol: symbol.to_string(),
            });
        }

        // Requested newest first; callers expect oldest first
        bars.reverse();

        tracing::debug!("Fetched {} daily bars for {}", bars.len(), symbol);

        Ok(PriceHistory::new(symbol, bars))
    }

    /// Submit a market order
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, OrderError> {
        let url = format!("{}/v2/orders", self.config.trading_url);
        let payload = NewOrder {
            symbol: &order.symbol,
            qty: order.quantity.to_string(),
            side: order.side,
            order_type: order.order_type,
            time_in_force: order.time_in_force,
            client_order_id: order.client_order_id,
        };

        // Retries reuse the client order id, so a resend of an order that was
        // accepted but never acknowledged comes back as a duplicate
        let response = match self
            .send_with_retry(|| self.client.post(&url).json(&payload))
            .await
        {
            Ok(response) => response,
            Err(RequestFailure::Status { status: 422, body }) if body.contains("client_order_id") => {
                tracing::warn!(
                    "Order {} already exists upstream, looking it up",
                    order.client_order_id
                );
                return self.get_order_by_client_id(order.client_order_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        let accepted: OrderResponse = response.json().await?;

        Ok(OrderAck {
            order_id: accepted.id,
            client_order_id: order.client_order_id,
            status: accepted.status,
        })
    }

    /// Look up an order by the id we assigned to it
    pub async fn get_order_by_client_id(
        &self,
        client_order_id: Uuid,
    ) -> Result<OrderAck, OrderError> {
        let url = format!("{}/v2/orders:by_client_order_id", self.config.trading_url);
        let client_order_id_param = client_order_id.to_string();

        let response = self
            .send_with_retry(|| {
                self.client
                    .get(&url)
                    .query(&[("client_order_id", client_order_id_param.as_str())])
            })
            .await?;

        let existing: OrderResponse = response.json().await?;

        Ok(OrderAck {
            order_id: existing.id,
            client_order_id,
            status: existing.status,
        })
    }
}

#[async_trait]
impl MarketDataProvider for AlpacaClient {
    async fn fetch_history(
        &self,
        symbol: &str,
        bars: usize,
    ) -> Result<PriceHistory, ProviderError> {
        self.get_daily_bars(symbol, bars).await
    }
}

#[async_trait]
impl OrderSink for AlpacaClient {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, OrderError> {
        self.place_order(order).await
    }
}
