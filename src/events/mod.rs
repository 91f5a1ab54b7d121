use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::{DeliveryMethod, PaymentMethod, PaymentStatus, ShippingStatus};

/// Handle used by services to publish domain events.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Used after a commit, where the state change must not be undone.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping domain event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded {
        account_id: Uuid,
        product_id: i32,
        quantity: i32,
    },
    CartItemUpdated {
        account_id: Uuid,
        product_id: i32,
        quantity: i32,
    },
    CartItemRemoved {
        account_id: Uuid,
        product_id: i32,
    },
    CartCleared(Uuid),

    // Checkout events
    CheckoutAddressSelected {
        account_id: Uuid,
        address_id: i32,
    },
    CheckoutShippingSelected {
        account_id: Uuid,
        delivery_method: DeliveryMethod,
        shipping_fee_minor: i64,
    },
    CheckoutCompleted {
        account_id: Uuid,
        order_id: Uuid,
    },
    CheckoutAbandoned(Uuid),

    // Order events
    OrderCreated {
        order_id: Uuid,
        account_id: Uuid,
        total_minor: i64,
        payment_method: PaymentMethod,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: ShippingStatus,
        new_status: ShippingStatus,
    },
    OrderCancelled(Uuid),

    // Payment events
    PaymentInitiated {
        order_id: Uuid,
        payment_url: String,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },

    // Stock events
    StockReserved {
        order_id: Uuid,
        units: i64,
    },
    StockReleased {
        order_id: Uuid,
        units: i64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CartItemAdded { .. } => "cart_item_added",
            Event::CartItemUpdated { .. } => "cart_item_updated",
            Event::CartItemRemoved { .. } => "cart_item_removed",
            Event::CartCleared(_) => "cart_cleared",
            Event::CheckoutAddressSelected { .. } => "checkout_address_selected",
            Event::CheckoutShippingSelected { .. } => "checkout_shipping_selected",
            Event::CheckoutCompleted { .. } => "checkout_completed",
            Event::CheckoutAbandoned(_) => "checkout_abandoned",
            Event::OrderCreated { .. } => "order_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::OrderCancelled(_) => "order_cancelled",
            Event::PaymentInitiated { .. } => "payment_initiated",
            Event::PaymentStatusChanged { .. } => "payment_status_changed",
            Event::StockReserved { .. } => "stock_reserved",
            Event::StockReleased { .. } => "stock_released",
        }
    }
}

/// Drains the event channel, logging each event. Runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("storefront.events", 1, "event" => event.name());
        match &event {
            Event::OrderCreated {
                order_id,
                account_id,
                total_minor,
                payment_method,
            } => info!(
                %order_id,
                %account_id,
                total_minor,
                %payment_method,
                "order created"
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "payment status changed"),
            Event::StockReleased { order_id, units } => {
                info!(%order_id, units, "reserved stock released")
            }
            other => debug!(event = other.name(), payload = ?other, "domain event"),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::CartCleared(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let account = Uuid::new_v4();
        sender.send_or_log(Event::CartCleared(account)).await;
        sender.send_or_log(Event::CheckoutAbandoned(account)).await;

        assert_eq!(rx.recv().await, Some(Event::CartCleared(account)));
        assert_eq!(rx.recv().await, Some(Event::CheckoutAbandoned(account)));
    }
}
