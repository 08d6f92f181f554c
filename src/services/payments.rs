use crate::{
    db::DbPool,
    entities::{
        order, payment_response, payment_session, Cart, Order, PaymentResponse, PaymentSession,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::clients::{PaymentDetails, PaymentGateway},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Decrypted gateway webhook payload, as handed over by the transport
/// layer. Amounts in here are never trusted; they are reconciled against
/// the payment session's own recorded total.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub succeeded: bool,
    pub amount: Decimal,
    pub auth_code: Option<String>,
    pub card_masked: Option<String>,
    pub error: Option<String>,
    pub raw: serde_json::Value,
}

/// Result of applying one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WebhookOutcome {
    /// Payment succeeded and the order advanced to processing.
    Applied { order_id: Uuid },
    /// A terminal failure (gateway decline or amount mismatch) was
    /// recorded; the order was not advanced.
    FailureRecorded,
    /// This reference already has a terminal outcome; the delivery was a
    /// no-op.
    AlreadyProcessed,
}

/// Payment session reconciliation: correlates one external gateway attempt
/// to exactly one order, exactly once.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Initiates a gateway payment for a cart and persists the session
    /// before the client is redirected.
    #[instrument(skip(self))]
    pub async fn initiate_payment(
        &self,
        user_id: Option<Uuid>,
        cart_id: Uuid,
        return_url: String,
    ) -> Result<payment_session::Model, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let redirect = self
            .gateway
            .initiate(PaymentDetails {
                amount: cart.total_amount,
                currency: cart.currency.clone(),
                user_id,
                cart_id,
                return_url,
            })
            .await?;

        self.create_for_payment(
            redirect.transaction_reference,
            redirect.form_payload,
            redirect.redirect_url,
            user_id,
            cart_id,
        )
        .await
    }

    /// Persists a payment session row. This is the durable record that a
    /// payment was attempted, required because the gateway callback may
    /// arrive on a different request or process.
    #[instrument(skip(self, form_payload))]
    pub async fn create_for_payment(
        &self,
        transaction_reference: String,
        form_payload: serde_json::Value,
        redirect_url: String,
        user_id: Option<Uuid>,
        cart_id: Uuid,
    ) -> Result<payment_session::Model, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?;

        let session_id = Uuid::new_v4();
        let session = payment_session::ActiveModel {
            id: Set(session_id),
            transaction_reference: Set(transaction_reference.clone()),
            form_payload: Set(form_payload),
            redirect_url: Set(redirect_url),
            user_id: Set(user_id),
            cart_id: Set(cart_id),
            amount: Set(cart.total_amount),
            currency: Set(cart.currency),
            status: Set(payment_session::PaymentSessionStatus::Pending),
            created_at: Set(Utc::now()),
            resolved_at: Set(None),
        };

        let session = match session.insert(&*self.db).await {
            Ok(session) => session,
            Err(DbErr::RecordNotInserted) => {
                return Err(ServiceError::Conflict(format!(
                    "Payment session for reference {} already exists",
                    transaction_reference
                )))
            }
            Err(e) => return Err(e.into()),
        };

        self.event_sender
            .send_or_log(Event::PaymentSessionCreated {
                session_id,
                cart_id,
            })
            .await;
        info!(session_id = %session_id, cart_id = %cart_id, transaction_reference = %transaction_reference, "payment session created");
        Ok(session)
    }

    /// Applies one webhook delivery exactly once.
    ///
    /// A session with an existing `payment_responses` row already has its
    /// terminal outcome, so replays are safe no-ops no matter how far the
    /// order has moved on; the unique insert on that row serializes
    /// concurrent first deliveries. Success additionally requires the
    /// payload amount to reconcile against the session's recorded total,
    /// and advances the pending order to processing via a guarded update.
    #[instrument(skip(self, payload), fields(transaction_reference = %reference))]
    pub async fn handle_webhook(
        &self,
        reference: &str,
        payload: WebhookPayload,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let session = resolve_session(&txn, reference).await?;

        // Replay check first: once a terminal outcome exists for this
        // session the delivery must be a no-op, regardless of what state
        // the order has moved on to since.
        let existing = PaymentResponse::find()
            .filter(
                payment_response::Column::TransactionReference
                    .eq(session.transaction_reference.clone()),
            )
            .one(&txn)
            .await?;
        if existing.is_some() {
            txn.rollback().await?;
            info!(transaction_reference = %session.transaction_reference, "duplicate webhook delivery ignored");
            return Ok(WebhookOutcome::AlreadyProcessed);
        }

        let amount_matches = payload.amount == session.amount;
        let success = payload.succeeded && amount_matches;
        let error = if !payload.succeeded {
            payload
                .error
                .clone()
                .or_else(|| Some("payment declined by gateway".to_string()))
        } else if !amount_matches {
            Some(format!(
                "amount mismatch: webhook reported {}, session recorded {}",
                payload.amount, session.amount
            ))
        } else {
            None
        };

        let pending_order = if success {
            let order = Order::find()
                .filter(order::Column::CartId.eq(session.cart_id))
                .filter(order::Column::Status.eq(order::OrderStatus::Pending))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "No pending order for payment session {}",
                        session.id
                    ))
                })?;
            Some(order)
        } else {
            None
        };

        let now = Utc::now();
        let response = payment_response::ActiveModel {
            id: Set(Uuid::new_v4()),
            transaction_reference: Set(session.transaction_reference.clone()),
            payment_session_id: Set(session.id),
            order_id: Set(pending_order.as_ref().map(|o| o.id)),
            outcome: Set(if success {
                payment_response::PaymentOutcome::Success
            } else {
                payment_response::PaymentOutcome::Failure
            }),
            auth_code: Set(payload.auth_code.clone()),
            card_masked: Set(payload.card_masked.clone()),
            error: Set(error.clone()),
            raw_payload: Set(payload.raw.clone()),
            created_at: Set(now),
        };

        // Idempotency claim: the unique reference index serializes
        // duplicate deliveries, whichever request inserts first wins.
        let inserted = payment_response::Entity::insert(response)
            .on_conflict(
                OnConflict::column(payment_response::Column::TransactionReference)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&txn)
            .await;
        match inserted {
            Ok(_) => {}
            Err(DbErr::RecordNotInserted) => {
                txn.rollback().await?;
                info!(transaction_reference = %session.transaction_reference, "duplicate webhook delivery ignored");
                return Ok(WebhookOutcome::AlreadyProcessed);
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(order) = &pending_order {
            let advanced = order::Entity::update_many()
                .col_expr(order::Column::Status, Expr::value(order::OrderStatus::Processing))
                .col_expr(order::Column::PaymentAuthCode, Expr::value(payload.auth_code.clone()))
                .col_expr(order::Column::CardMasked, Expr::value(payload.card_masked.clone()))
                .col_expr(order::Column::UpdatedAt, Expr::value(now))
                .filter(order::Column::Id.eq(order.id))
                .filter(order::Column::Status.eq(order::OrderStatus::Pending))
                .exec(&txn)
                .await?;
            if advanced.rows_affected == 0 {
                return Err(ServiceError::Conflict(format!(
                    "Order {} was advanced by a concurrent request",
                    order.id
                )));
            }
        }

        let session_id = session.id;
        let session_reference = session.transaction_reference.clone();
        let mut resolved: payment_session::ActiveModel = session.into();
        resolved.status = Set(payment_session::PaymentSessionStatus::Resolved);
        resolved.resolved_at = Set(Some(now));
        resolved.update(&txn).await?;

        txn.commit().await?;

        if let Some(order) = pending_order {
            self.event_sender
                .send_or_log(Event::PaymentSucceeded {
                    transaction_reference: session_reference.clone(),
                    order_id: order.id,
                })
                .await;
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: order.id,
                    old_status: "pending".to_string(),
                    new_status: "processing".to_string(),
                })
                .await;
            info!(session_id = %session_id, order_id = %order.id, "payment applied, order processing");
            Ok(WebhookOutcome::Applied { order_id: order.id })
        } else {
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    transaction_reference: session_reference.clone(),
                })
                .await;
            warn!(session_id = %session_id, error = ?error, "payment failure recorded");
            Ok(WebhookOutcome::FailureRecorded)
        }
    }

    /// Ages out payment sessions that never received a webhook.
    #[instrument(skip(self))]
    pub async fn expire_stale_sessions(&self, max_age_hours: i64) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let expired = payment_session::Entity::update_many()
            .col_expr(
                payment_session::Column::Status,
                Expr::value(payment_session::PaymentSessionStatus::Expired),
            )
            .filter(payment_session::Column::Status.eq(payment_session::PaymentSessionStatus::Pending))
            .filter(payment_session::Column::CreatedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        if expired.rows_affected > 0 {
            info!(count = expired.rows_affected, "expired orphaned payment sessions");
        }
        Ok(expired.rows_affected)
    }
}

/// Finds the payment session for a webhook reference. Exact match first;
/// the gateway may also echo the reference with an appended suffix or
/// truncated, so a single strip-suffix retry and a prefix search follow.
/// Ambiguous prefix matches are rejected rather than guessed.
async fn resolve_session<C: ConnectionTrait>(
    conn: &C,
    reference: &str,
) -> Result<payment_session::Model, ServiceError> {
    let exact = PaymentSession::find()
        .filter(payment_session::Column::TransactionReference.eq(reference))
        .one(conn)
        .await?;
    if let Some(session) = exact {
        return Ok(session);
    }

    if let Some((base, _suffix)) = reference.rsplit_once('-') {
        let base_match = PaymentSession::find()
            .filter(payment_session::Column::TransactionReference.eq(base))
            .one(conn)
            .await?;
        if let Some(session) = base_match {
            return Ok(session);
        }
    }

    let candidates = PaymentSession::find()
        .filter(
            payment_session::Column::TransactionReference
                .like(format!("{}%", reference).as_str()),
        )
        .all(conn)
        .await?;
    let mut candidates = candidates.into_iter();
    match (candidates.next(), candidates.next()) {
        (Some(session), None) => Ok(session),
        (None, _) => Err(ServiceError::NotFound(format!(
            "No payment session for reference {}",
            reference
        ))),
        (Some(_), Some(_)) => {
            warn!(reference = %reference, "ambiguous payment reference prefix");
            Err(ServiceError::NotFound(format!(
                "No unique payment session for reference {}",
                reference
            )))
        }
    }
}
