use crate::{
    config::AppConfig,
    entities::{cart, cart_item, Cart, CartItem},
    errors::ServiceError,
    money,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

/// Computed financial summary of a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Deterministic recomputation of a cart's financial summary.
///
/// Tax policy: a flat configured rate applied to the full subtotal and
/// rounded to two decimal places, not per line item. Totals are derived
/// fields; nothing else in the system may write them.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    tax_rate: Decimal,
}

impl PricingEngine {
    pub fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let tax_rate = Decimal::from_f64_retain(config.default_tax_rate).unwrap_or(Decimal::ZERO);
        Self::new(tax_rate)
    }

    /// Pure computation from line items. Removed items do not contribute.
    pub fn compute(&self, items: &[cart_item::Model]) -> CartTotals {
        let subtotal: Decimal = items
            .iter()
            .filter(|item| item.status == cart_item::CartItemStatus::Active)
            .map(|item| item.total_price)
            .sum();
        let tax_amount = money::apply_rate(subtotal, self.tax_rate);
        CartTotals {
            subtotal,
            tax_amount,
            total_amount: subtotal + tax_amount,
        }
    }

    /// Reloads the cart's items and writes the three derived fields back,
    /// inside the caller's transaction. Invoked synchronously after every
    /// item mutation so `total_amount` reads are never stale.
    pub async fn recompute_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<cart::Model, ServiceError> {
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(conn)
            .await?;
        let totals = self.compute(&items);

        let mut active: cart::ActiveModel = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))?
            .into();

        let now = Utc::now();
        active.subtotal = Set(totals.subtotal);
        active.tax_amount = Set(totals.tax_amount);
        active.total_amount = Set(totals.total_amount);
        active.last_activity_at = Set(now);
        active.updated_at = Set(now);

        Ok(active.update(conn).await?)
    }
}
