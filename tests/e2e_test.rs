use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use crossbot::api::{AlpacaClient, AlpacaConfig};
use crossbot::execution::{
    CycleOutcome, DryRunSink, ExecutionConfig, ExecutionLoop, OrderStatePolicy, Sleeper,
};
use crossbot::strategy::crossover::CrossoverStrategy;
use crossbot::Signal;
use mockito::Matcher;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct CountingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Alpaca bars payload, newest first like a `sort=desc` response
fn bars_body(closes: &[f64]) -> String {
    let first_day = Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap();
    let bars: Vec<_> = closes
        .iter()
        .enumerate()
        .rev()
        .map(|(i, close)| {
            json!({
                "t": (first_day + ChronoDuration::days(i as i64)).to_rfc3339(),
                "o": close, "h": close, "l": close, "c": close, "v": 1000
            })
        })
        .collect();

    json!({ "bars": bars, "symbol": "AAPL", "next_page_token": null }).to_string()
}

fn golden_cross_closes() -> Vec<f64> {
    let mut closes = vec![150.0; 200];
    closes.push(160.0);
    closes
}

fn client_for(server: &mockito::ServerGuard) -> Arc<AlpacaClient> {
    let config = AlpacaConfig {
        api_key_id: "key-id".to_string(),
        api_secret_key: "secret".to_string(),
        trading_url: server.url(),
        data_url: server.url(),
        feed: "iex".to_string(),
    };
    Arc::new(
        AlpacaClient::new(config)
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1)),
    )
}

#[tokio::test]
async fn test_sustained_golden_cross_places_one_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut server = mockito::Server::new_async().await;
    let bars = server
        .mock("GET", "/v2/stocks/AAPL/bars")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(bars_body(&golden_cross_closes()))
        .expect(3)
        .create_async()
        .await;
    let orders = server
        .mock("POST", "/v2/orders")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "symbol": "AAPL",
            "qty": "10",
            "side": "buy",
            "type": "market"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "order-1", "status": "accepted"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let sleeper = Arc::new(CountingSleeper::default());
    let config = ExecutionConfig {
        quantity: 10,
        ..Default::default()
    };

    let mut execution = ExecutionLoop::new(
        config,
        Box::new(CrossoverStrategy::default()),
        client.clone(),
        client,
    )
    .with_sleeper(sleeper.clone());

    let summary = execution.run(Some(3)).await;

    bars.assert_async().await;
    orders.assert_async().await;
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.orders_submitted, 1);
    assert_eq!(execution.last_emitted(), Some(Signal::Buy));
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_outage_then_recovery() {
    let mut server = mockito::Server::new_async().await;
    let outage = server
        .mock("GET", "/v2/stocks/AAPL/bars")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let client = client_for(&server);
    let mut execution = ExecutionLoop::new(
        ExecutionConfig::default(),
        Box::new(CrossoverStrategy::default()),
        client,
        Arc::new(DryRunSink),
    )
    .with_sleeper(Arc::new(CountingSleeper::default()));

    let outcome = execution.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::ProviderFailed { .. }));
    assert_eq!(execution.last_emitted(), None);

    outage.remove_async().await;
    let _recovered = server
        .mock("GET", "/v2/stocks/AAPL/bars")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(bars_body(&golden_cross_closes()))
        .create_async()
        .await;

    let outcome = execution.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::OrderSubmitted {
            signal: Signal::Buy,
            ..
        }
    ));
}

#[tokio::test]
async fn test_rejected_order_is_retried_next_cycle() {
    let mut server = mockito::Server::new_async().await;
    let _bars = server
        .mock("GET", "/v2/stocks/AAPL/bars")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(bars_body(&golden_cross_closes()))
        .create_async()
        .await;
    let rejected = server
        .mock("POST", "/v2/orders")
        .match_query(Matcher::Any)
        .with_status(403)
        .with_body(r#"{"message": "market is closed"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let config = ExecutionConfig {
        order_state_policy: OrderStatePolicy::ConfirmedOnly,
        ..Default::default()
    };
    let mut execution = ExecutionLoop::new(
        config,
        Box::new(CrossoverStrategy::default()),
        client.clone(),
        client,
    );

    let outcome = execution.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::OrderFailed { .. }));
    assert_eq!(execution.last_emitted(), None);
    rejected.assert_async().await;

    rejected.remove_async().await;
    let accepted = server
        .mock("POST", "/v2/orders")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"id": "order-2", "status": "accepted"}"#)
        .expect(1)
        .create_async()
        .await;

    let outcome = execution.run_cycle().await;
    assert!(matches!(outcome, CycleOutcome::OrderSubmitted { .. }));
    accepted.assert_async().await;
}
