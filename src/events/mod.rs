use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Events published by the core after a mutation commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, item_id: Uuid },
    CartCleared(Uuid),
    CartsMerged { user_cart_id: Uuid, guest_cart_id: Uuid },
    CartAbandoned(Uuid),
    CartRecovered { cart_id: Uuid, order_id: Uuid },

    // Order events
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentSessionCreated { session_id: Uuid, cart_id: Uuid },
    PaymentSucceeded {
        transaction_reference: String,
        order_id: Uuid,
    },
    PaymentFailed { transaction_reference: String },

    // Provisioning events
    ProvisioningCompleted {
        order_id: Uuid,
        successful_products: u32,
        failed_products: u32,
    },
}

/// Sender half of the application event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing channel failures to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing when the channel is
    /// closed. Used after commit, where the mutation must not be reported
    /// as failed because of a consumer problem.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(error = %e, ?event, "failed to publish event");
        }
    }
}

/// Creates an event channel pair with the given buffer size.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
