use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::ServerSettings;
use crate::models::Signal;
use crate::strategy::crossover::CrossoverStrategy;
use crate::strategy::Strategy;

/// Shared state for the signal handlers
#[derive(Clone)]
pub struct AppState {
    pub strategy: Arc<CrossoverStrategy>,
}

/// Closing prices, oldest first
#[derive(Debug, Deserialize)]
pub struct TradeRequest {
    pub prices: Vec<f64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TradeResponse {
    pub stock: String,
    pub signal: Signal,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("prices must be positive, got {0}")]
    InvalidPrice(f64),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::InvalidPrice(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Bind { .. } | ServerError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_handler))
        .route("/trade/{symbol}", post(trade_handler))
        .with_state(state)
}

async fn health_check_handler() -> &'static str {
    "OK"
}

/// `POST /trade/{symbol}`: classify the posted closes
async fn trade_handler(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(request): Json<TradeRequest>,
) -> Result<Json<TradeResponse>, ServerError> {
    if let Some(bad) = request.prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(ServerError::InvalidPrice(*bad));
    }

    let signal = state.strategy.classify(&request.prices);
    let stock = symbol.to_uppercase();
    tracing::info!("{} Trading Signal: {} ({} prices)", stock, signal, request.prices.len());

    Ok(Json(TradeResponse { stock, signal }))
}

/// Serve the signal endpoint until Ctrl+C
pub async fn run(settings: &ServerSettings, strategy: CrossoverStrategy) -> Result<(), ServerError> {
    let app = create_router(AppState {
        strategy: Arc::new(strategy),
    });

    let address = format!("{}:{}", settings.host, settings.port);
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    tracing::info!("🌐 Signal server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        })
        .await?;

    Ok(())
}
