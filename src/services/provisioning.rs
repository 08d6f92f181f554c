use crate::{
    db::DbPool,
    entities::{order, order_item, Order, OrderItem},
    errors::ServiceError,
    events::{Event, EventSender},
    services::abandonment::AbandonedCartService,
    services::clients::ProvisioningClient,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Per-item provisioning result, reported back to the operator.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionDetail {
    pub order_item_id: Uuid,
    pub product_id: Uuid,
    pub success: bool,
    pub detail: Option<String>,
}

/// Aggregated outcome of one provisioning run over an order.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningSummary {
    pub success: bool,
    pub total_products: usize,
    pub successful_products: usize,
    pub failed_products: usize,
    pub product_details: Vec<ProvisionDetail>,
}

/// License provisioning dispatcher.
///
/// Walks every item of a paid order, calls the partner client per item,
/// and records the per-item outcome durably so a re-run retries only what
/// previously failed. One item's failure never aborts the rest of the run.
#[derive(Clone)]
pub struct ProvisioningService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    client: Arc<dyn ProvisioningClient>,
    abandonment: Option<Arc<AbandonedCartService>>,
}

impl ProvisioningService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        client: Arc<dyn ProvisioningClient>,
        abandonment: Option<Arc<AbandonedCartService>>,
    ) -> Self {
        Self {
            db,
            event_sender,
            client,
            abandonment,
        }
    }

    /// Provisions every outstanding item of a processing order.
    ///
    /// Already-provisioned items are skipped but still counted as
    /// successful, which makes the whole operation safe to re-run after a
    /// partial failure. Only a run with zero failures completes the order.
    #[instrument(skip(self))]
    pub async fn process_order(&self, order_id: Uuid) -> Result<ProvisioningSummary, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        if order.status != order::OrderStatus::Processing {
            return Err(ServiceError::InvalidState(format!(
                "Order {} is not awaiting provisioning (status {:?})",
                order_id, order.status
            )));
        }

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        let mut details = Vec::with_capacity(items.len());
        let mut successful = 0usize;
        let mut failed = 0usize;

        for item in items {
            if item.provision_status == order_item::ProvisionStatus::Provisioned {
                successful += 1;
                details.push(ProvisionDetail {
                    order_item_id: item.id,
                    product_id: item.product_id,
                    success: true,
                    detail: Some("already provisioned".to_string()),
                });
                continue;
            }

            let outcome = match self.client.provision_item(&item).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(order_item_id = %item.id, product_id = %item.product_id, error = %e, "provisioning call failed");
                    crate::services::clients::ProvisionOutcome {
                        success: false,
                        detail: Some(format!("provisioning call failed: {}", e)),
                    }
                }
            };

            let item_id = item.id;
            let product_id = item.product_id;
            let mut active: order_item::ActiveModel = item.into();
            if outcome.success {
                successful += 1;
                active.provision_status = Set(order_item::ProvisionStatus::Provisioned);
                active.provisioning_error = Set(None);
            } else {
                failed += 1;
                warn!(order_item_id = %item_id, detail = ?outcome.detail, "item provisioning failed");
                active.provision_status = Set(order_item::ProvisionStatus::Failed);
                active.provisioning_error = Set(outcome.detail.clone());
            }
            active.updated_at = Set(Utc::now());
            active.update(&*self.db).await?;

            details.push(ProvisionDetail {
                order_item_id: item_id,
                product_id,
                success: outcome.success,
                detail: outcome.detail,
            });
        }

        let total = details.len();
        let all_provisioned = failed == 0 && total > 0;

        let now = Utc::now();
        let mut order_update: order::ActiveModel = order.clone().into();
        if all_provisioned {
            order_update.status = Set(order::OrderStatus::Completed);
            order_update.fulfillment_status = Set(order::FulfillmentStatus::Fulfilled);
        } else if successful > 0 {
            order_update.fulfillment_status = Set(order::FulfillmentStatus::Partial);
        }
        order_update.updated_at = Set(now);
        order_update.update(&*self.db).await?;

        if all_provisioned {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: "processing".to_string(),
                    new_status: "completed".to_string(),
                })
                .await;
            // Completion is what counts as recovery for a previously
            // abandoned cart.
            if let Some(abandonment) = &self.abandonment {
                if let Err(e) = abandonment.mark_recovered_for_order(&order, None).await {
                    warn!(order_id = %order_id, error = %e, "recovery bookkeeping failed");
                }
            }
        }

        self.event_sender
            .send_or_log(Event::ProvisioningCompleted {
                order_id,
                successful_products: successful as u32,
                failed_products: failed as u32,
            })
            .await;
        info!(
            order_id = %order_id,
            total_products = total,
            successful_products = successful,
            failed_products = failed,
            "provisioning run finished"
        );

        Ok(ProvisioningSummary {
            success: all_provisioned,
            total_products: total,
            successful_products: successful,
            failed_products: failed,
            product_details: details,
        })
    }
}
