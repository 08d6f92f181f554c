use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{cart, order, order_item, Order},
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::{active_items, find_active_cart, CartIdentity},
    services::clients::OwnershipStore,
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Checkout parameters: references chosen by the user at checkout, verified
/// to belong to that user before any transaction opens.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutInput {
    pub billing_information_id: Uuid,
    pub payment_card_id: Option<Uuid>,
}

/// Order cancellation request.
#[derive(Debug, Deserialize, Validate)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 255, message = "Cancellation reason is required"))]
    pub reason: String,
}

/// Order conversion workflow: the single state transition that turns a cart
/// into a financial commitment.
///
/// Cart: `active -> converted`, terminal and one-way, claimed with a
/// guarded update so two concurrent checkouts produce exactly one order.
/// Order: `pending -> processing -> completed`, plus the time-boxed
/// `pending -> cancelled` edge.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    ownership: Arc<dyn OwnershipStore>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        ownership: Arc<dyn OwnershipStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            ownership,
            config,
        }
    }

    /// Converts the identity's active cart into an immutable order.
    ///
    /// Inside one transaction: the cart's `active -> converted` flip is a
    /// compare-and-swap, the order row copies the cart summary, and every
    /// active cart item is copied into a frozen order item. Any failure
    /// rolls the whole conversion back, leaving the cart active and no
    /// order behind.
    #[instrument(skip(self, input), fields(billing_information_id = %input.billing_information_id))]
    pub async fn create_from_cart(
        &self,
        identity: &CartIdentity,
        input: CheckoutInput,
    ) -> Result<order::Model, ServiceError> {
        input.validate()?;
        let user_id = identity.user_id.ok_or_else(|| {
            ServiceError::ValidationError("checkout requires an authenticated user".to_string())
        })?;

        // Ownership checks fail fast, before the transaction opens.
        if !self
            .ownership
            .billing_information_belongs_to(user_id, input.billing_information_id)
            .await?
        {
            return Err(ServiceError::NotFound(format!(
                "Billing information {} not found",
                input.billing_information_id
            )));
        }
        if let Some(card_id) = input.payment_card_id {
            if !self.ownership.payment_card_belongs_to(user_id, card_id).await? {
                return Err(ServiceError::NotFound(format!(
                    "Payment card {} not found",
                    card_id
                )));
            }
        }

        let txn = self.db.begin().await?;

        let cart = find_active_cart(&txn, identity)
            .await?
            .ok_or_else(|| ServiceError::NotFound("No active cart for this identity".to_string()))?;
        let items = active_items(&txn, cart.id).await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidState("Cart is empty".to_string()));
        }

        let now = Utc::now();

        // Claim the cart. A concurrent checkout that already flipped the
        // status makes this a zero-row update; the loser must fail cleanly
        // without creating a second order.
        let claimed = cart::Entity::update_many()
            .col_expr(cart::Column::Status, Expr::value(cart::CartStatus::Converted))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Cart was already converted by a concurrent checkout".to_string(),
            ));
        }

        let order_id = Uuid::new_v4();
        let order_number = generate_order_number(order_id);
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number),
            user_id: Set(user_id),
            cart_id: Set(cart.id),
            store_id: Set(cart.store_id),
            status: Set(order::OrderStatus::Pending),
            fulfillment_status: Set(order::FulfillmentStatus::Unfulfilled),
            subtotal: Set(cart.subtotal),
            tax_amount: Set(cart.tax_amount),
            total_amount: Set(cart.total_amount),
            currency: Set(cart.currency.clone()),
            billing_information_id: Set(input.billing_information_id),
            payment_card_id: Set(input.payment_card_id),
            payment_auth_code: Set(None),
            card_masked: Set(None),
            cancellation_reason: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        for item in &items {
            let frozen = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.total_price),
                provision_status: Set(order_item::ProvisionStatus::Pending),
                provisioning_error: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };
            frozen.insert(&txn).await?;
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order_id)).await;
        info!(order_id = %order_id, cart_id = %cart.id, total = %order.total_amount, "order created from cart");
        Ok(order)
    }

    /// Cancels a pending order within the configured day window.
    ///
    /// The window is evaluated inside the guarded update itself, so the
    /// status precondition and the time bound are checked against the same
    /// row state and there is no read-then-write race.
    #[instrument(skip(self, request))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        request: CancelOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        request.validate()?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.user_id != user_id {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }

        let now = Utc::now();
        let cutoff = now - Duration::days(self.config.order_cancel_window_days);
        let cancelled = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(order::OrderStatus::Cancelled))
            .col_expr(order::Column::CancellationReason, Expr::value(request.reason.clone()))
            .col_expr(order::Column::CancelledAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order::OrderStatus::Pending))
            .filter(order::Column::CreatedAt.gt(cutoff))
            .exec(&*self.db)
            .await?;

        if cancelled.rows_affected == 0 {
            // Classify from the current row, not the pre-update read: the
            // order may have advanced between the two.
            let current = Order::find_by_id(order_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
            return if current.status != order::OrderStatus::Pending {
                if order.status == order::OrderStatus::Pending {
                    Err(ServiceError::Conflict(format!(
                        "Order {} was advanced by a concurrent request",
                        order_id
                    )))
                } else {
                    Err(ServiceError::InvalidState(
                        "Only pending orders can be cancelled".to_string(),
                    ))
                }
            } else {
                Err(ServiceError::InvalidState(
                    "Cancellation window has elapsed".to_string(),
                ))
            };
        }

        let updated = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        self.event_sender.send_or_log(Event::OrderCancelled(order_id)).await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: "pending".to_string(),
                new_status: "cancelled".to_string(),
            })
            .await;
        info!(order_id = %order_id, "order cancelled");
        Ok(updated)
    }
}

fn generate_order_number(order_id: Uuid) -> String {
    format!(
        "ORD-{}",
        order_id.simple().to_string()[..12].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_format() {
        let id = Uuid::new_v4();
        let number = generate_order_number(id);
        assert!(number.starts_with("ORD-"));
        assert_eq!(number.len(), 16);
        assert!(number[4..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn cancel_request_requires_reason() {
        let request = CancelOrderRequest {
            reason: String::new(),
        };
        assert!(request.validate().is_err());
    }
}
