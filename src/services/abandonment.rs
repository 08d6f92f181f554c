use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{abandoned_cart, cart, order, AbandonedCart, Cart},
    errors::ServiceError,
    events::{Event, EventSender},
    services::carts::active_items,
};
use chrono::{Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Abandoned-cart reconciliation.
///
/// A periodic sweep declares inactive carts abandoned and snapshots their
/// contents for recovery campaigns; completed orders later mark at most
/// one snapshot recovered.
#[derive(Clone)]
pub struct AbandonedCartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
}

impl AbandonedCartService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
        }
    }

    /// Declares abandonment for every active cart whose last activity is
    /// older than the configured threshold and which still holds at least
    /// one active item. Returns the number of carts swept.
    ///
    /// Each cart is claimed with a guarded update, so two overlapping
    /// sweeps (or a sweep racing a checkout) never produce two snapshots
    /// of the same cart.
    #[instrument(skip(self))]
    pub async fn sweep_abandoned(&self) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - Duration::hours(self.config.cart_abandon_hours);
        let stale = Cart::find()
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .filter(cart::Column::LastActivityAt.lt(cutoff))
            .order_by_asc(cart::Column::LastActivityAt)
            .all(&*self.db)
            .await?;

        let mut swept = 0u64;
        for stale_cart in stale {
            let txn = self.db.begin().await?;

            let items = active_items(&txn, stale_cart.id).await?;
            if items.is_empty() {
                // Nothing worth recovering; leave the empty cart alone.
                txn.commit().await?;
                continue;
            }

            let now = Utc::now();
            let claimed = cart::Entity::update_many()
                .col_expr(cart::Column::Status, Expr::value(cart::CartStatus::Abandoned))
                .col_expr(cart::Column::UpdatedAt, Expr::value(now))
                .filter(cart::Column::Id.eq(stale_cart.id))
                .filter(cart::Column::Status.eq(cart::CartStatus::Active))
                .exec(&txn)
                .await?;
            if claimed.rows_affected == 0 {
                // Converted or already swept in the meantime.
                txn.rollback().await?;
                continue;
            }

            let items_snapshot = serde_json::to_value(&items).map_err(|e| {
                ServiceError::InternalError(format!("failed to serialize cart snapshot: {}", e))
            })?;
            let snapshot = abandoned_cart::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(stale_cart.id),
                user_id: Set(stale_cart.user_id),
                cart_token: Set(stale_cart.cart_token.clone()),
                recovery_token: Set(super::opaque_token(40)),
                items_snapshot: Set(items_snapshot),
                subtotal: Set(stale_cart.subtotal),
                total_amount: Set(stale_cart.total_amount),
                currency: Set(stale_cart.currency.clone()),
                status: Set(abandoned_cart::AbandonedCartStatus::Abandoned),
                recovered_order_id: Set(None),
                abandoned_at: Set(now),
                recovered_at: Set(None),
            };
            snapshot.insert(&txn).await?;

            txn.commit().await?;
            swept += 1;
            self.event_sender
                .send_or_log(Event::CartAbandoned(stale_cart.id))
                .await;
        }

        if swept > 0 {
            info!(count = swept, "swept abandoned carts");
        }
        Ok(swept)
    }

    /// Attributes a completed order to an abandoned-cart snapshot, at most
    /// once per snapshot.
    ///
    /// An explicit recovery token (from a recovery link) is authoritative.
    /// Without one, the most recent unrecovered snapshot for the order's
    /// user inside the match window is taken as a best-effort attribution.
    /// Returns the recovered snapshot, or `None` when nothing matched or a
    /// concurrent caller attributed it first.
    #[instrument(skip(self, order))]
    pub async fn mark_recovered_for_order(
        &self,
        order: &order::Model,
        recovery_token: Option<&str>,
    ) -> Result<Option<abandoned_cart::Model>, ServiceError> {
        let snapshot = match recovery_token {
            Some(token) => {
                AbandonedCart::find()
                    .filter(abandoned_cart::Column::RecoveryToken.eq(token))
                    .one(&*self.db)
                    .await?
            }
            None => {
                let window_start =
                    Utc::now() - Duration::hours(self.config.recovery_match_window_hours);
                AbandonedCart::find()
                    .filter(abandoned_cart::Column::UserId.eq(order.user_id))
                    .filter(
                        abandoned_cart::Column::Status
                            .eq(abandoned_cart::AbandonedCartStatus::Abandoned),
                    )
                    .filter(abandoned_cart::Column::AbandonedAt.gt(window_start))
                    .order_by_desc(abandoned_cart::Column::AbandonedAt)
                    .one(&*self.db)
                    .await?
            }
        };
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        if snapshot.status == abandoned_cart::AbandonedCartStatus::Recovered {
            return Ok(None);
        }

        let now = Utc::now();
        let recovered = abandoned_cart::Entity::update_many()
            .col_expr(
                abandoned_cart::Column::Status,
                Expr::value(abandoned_cart::AbandonedCartStatus::Recovered),
            )
            .col_expr(abandoned_cart::Column::RecoveredOrderId, Expr::value(order.id))
            .col_expr(abandoned_cart::Column::RecoveredAt, Expr::value(now))
            .filter(abandoned_cart::Column::Id.eq(snapshot.id))
            .filter(
                abandoned_cart::Column::Status.eq(abandoned_cart::AbandonedCartStatus::Abandoned),
            )
            .exec(&*self.db)
            .await?;
        if recovered.rows_affected == 0 {
            warn!(snapshot_id = %snapshot.id, order_id = %order.id, "snapshot recovered concurrently");
            return Ok(None);
        }

        // Reflect recovery on the cart row as well, where it still reads
        // as abandoned.
        cart::Entity::update_many()
            .col_expr(cart::Column::Status, Expr::value(cart::CartStatus::Recovered))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Id.eq(snapshot.cart_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Abandoned))
            .exec(&*self.db)
            .await?;

        self.event_sender
            .send_or_log(Event::CartRecovered {
                cart_id: snapshot.cart_id,
                order_id: order.id,
            })
            .await;
        info!(snapshot_id = %snapshot.id, cart_id = %snapshot.cart_id, order_id = %order.id, "abandoned cart recovered");

        let updated = AbandonedCart::find_by_id(snapshot.id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Abandoned cart snapshot {} not found", snapshot.id))
            })?;
        Ok(Some(updated))
    }
}
