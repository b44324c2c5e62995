use super::OrderSink;
use crate::error::OrderError;
use crate::models::{OrderAck, OrderRequest};
use async_trait::async_trait;
use uuid::Uuid;

/// Order sink that only logs what it would have sent
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSink;

#[async_trait]
impl OrderSink for DryRunSink {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, OrderError> {
        tracing::info!(
            symbol = %order.symbol,
            side = %order.side,
            quantity = order.quantity,
            client_order_id = %order.client_order_id,
            "🧪 [DRY RUN] Order not sent"
        );

        Ok(OrderAck {
            order_id: format!("dry-run-{}", Uuid::new_v4()),
            client_order_id: order.client_order_id,
            status: "dry_run".to_string(),
        })
    }
}
