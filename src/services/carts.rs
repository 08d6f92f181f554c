use crate::{
    config::AppConfig,
    db::DbPool,
    entities::{cart, cart_item, Cart, CartItem, CartModel},
    errors::ServiceError,
    events::{Event, EventSender},
    money,
    services::clients::CatalogProvider,
    services::pricing::PricingEngine,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Request identity for cart resolution: an authenticated user id, a guest
/// cart token, or (after a login merge) both. Resolution prefers the user.
#[derive(Debug, Clone, Default)]
pub struct CartIdentity {
    pub user_id: Option<Uuid>,
    pub cart_token: Option<String>,
}

impl CartIdentity {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            cart_token: None,
        }
    }

    pub fn guest(cart_token: impl Into<String>) -> Self {
        Self {
            user_id: None,
            cart_token: Some(cart_token.into()),
        }
    }

    fn ensure_present(&self) -> Result<(), ServiceError> {
        if self.user_id.is_none() && self.cart_token.is_none() {
            return Err(ServiceError::ValidationError(
                "request carries neither a user id nor a cart token".to_string(),
            ));
        }
        Ok(())
    }
}

/// Input for adding an item to a cart.
#[derive(Debug, Deserialize)]
pub struct AddItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Cart read model with its active items.
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}

/// Cart store: owns cart and cart-item persistence, identity resolution,
/// merge and cleanup logic. Every mutation runs item write plus totals
/// recompute in a single transaction, so a read of `total_amount` after a
/// mutation always reflects it.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    catalog: Arc<dyn CatalogProvider>,
    pricing: PricingEngine,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        catalog: Arc<dyn CatalogProvider>,
        config: Arc<AppConfig>,
    ) -> Self {
        let pricing = PricingEngine::from_config(&config);
        Self {
            db,
            event_sender,
            catalog,
            pricing,
            config,
        }
    }

    /// Resolves the current cart for an identity without creating one.
    /// "No cart yet" is a normal state, not an error.
    #[instrument(skip(self))]
    pub async fn resolve_cart(
        &self,
        identity: &CartIdentity,
    ) -> Result<Option<CartWithItems>, ServiceError> {
        identity.ensure_present()?;
        let Some(cart) = find_active_cart(&*self.db, identity).await? else {
            return Ok(None);
        };
        let items = active_items(&*self.db, cart.id).await?;
        Ok(Some(CartWithItems { cart, items }))
    }

    /// Adds a product to the identity's cart, creating the cart lazily on
    /// first add. An existing active line for the same product has its
    /// quantity increased instead of duplicating rows. The unit price is
    /// snapshotted from the catalog at add-time.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        identity: &CartIdentity,
        store_id: Uuid,
        input: AddItemInput,
    ) -> Result<(CartModel, cart_item::Model), ServiceError> {
        identity.ensure_present()?;
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be a positive integer".to_string(),
            ));
        }

        let quote = self
            .catalog
            .get_product(input.product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        let (cart, created) = match find_active_cart(&txn, identity).await? {
            Some(cart) => (cart, false),
            None => {
                // Never reuse the identity's token: it may still sit on a
                // converted or merged cart, and the column is unique. The
                // caller picks up the fresh token from the returned cart.
                let cart_token = match identity.user_id {
                    Some(_) => None,
                    None => Some(super::opaque_token(32)),
                };
                let cart = cart::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(identity.user_id),
                    cart_token: Set(cart_token),
                    store_id: Set(store_id),
                    currency: Set(quote.currency.clone()),
                    subtotal: Set(Default::default()),
                    tax_amount: Set(Default::default()),
                    total_amount: Set(Default::default()),
                    status: Set(cart::CartStatus::Active),
                    last_activity_at: Set(now),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                (cart.insert(&txn).await?, true)
            }
        };

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .filter(cart_item::Column::Status.eq(cart_item::CartItemStatus::Active))
            .one(&txn)
            .await?;

        let item = match existing {
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                let unit_price = item.unit_price;
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(quantity);
                active.total_price = Set(money::line_total(unit_price, quantity));
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                let item = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(input.product_id),
                    quantity: Set(input.quantity),
                    unit_price: Set(quote.unit_price),
                    total_price: Set(money::line_total(quote.unit_price, input.quantity)),
                    status: Set(cart_item::CartItemStatus::Active),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                item.insert(&txn).await?
            }
        };

        let cart = self.pricing.recompute_cart(&txn, cart.id).await?;
        txn.commit().await?;

        if created {
            self.event_sender.send_or_log(Event::CartCreated(cart.id)).await;
        }
        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: input.product_id,
            })
            .await;

        info!(cart_id = %cart.id, product_id = %input.product_id, quantity = input.quantity, "added item to cart");
        Ok((cart, item))
    }

    /// Sets a new quantity on an item of the identity's cart. Quantities
    /// below one are rejected; use `remove_item` to delete. Returns `false`
    /// when the item does not exist or does not belong to the resolved
    /// cart.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        identity: &CartIdentity,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        identity.ensure_present()?;
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1; use remove_item to delete".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let Some(cart) = find_active_cart(&txn, identity).await? else {
            return Ok(false);
        };

        let Some(item) = CartItem::find_by_id(item_id).one(&txn).await? else {
            return Ok(false);
        };
        // Cross-cart mutation presents as not-found, never as a leak.
        if item.cart_id != cart.id || item.status != cart_item::CartItemStatus::Active {
            return Ok(false);
        }

        let unit_price = item.unit_price;
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.total_price = Set(money::line_total(unit_price, quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        self.pricing.recompute_cart(&txn, cart.id).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Soft-removes an item and recomputes totals. Idempotent: removing an
    /// already-removed item reports `false` and leaves totals untouched.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        identity: &CartIdentity,
        item_id: Uuid,
    ) -> Result<bool, ServiceError> {
        identity.ensure_present()?;

        let txn = self.db.begin().await?;
        let Some(cart) = find_active_cart(&txn, identity).await? else {
            return Ok(false);
        };

        let Some(item) = CartItem::find_by_id(item_id).one(&txn).await? else {
            return Ok(false);
        };
        if item.cart_id != cart.id || item.status == cart_item::CartItemStatus::Removed {
            return Ok(false);
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.status = Set(cart_item::CartItemStatus::Removed);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        self.pricing.recompute_cart(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: cart.id,
                item_id,
            })
            .await;
        Ok(true)
    }

    /// Hard-deletes all items and resets totals to zero. The cart row
    /// itself stays active.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, identity: &CartIdentity) -> Result<(), ServiceError> {
        identity.ensure_present()?;

        let txn = self.db.begin().await?;
        let Some(cart) = find_active_cart(&txn, identity).await? else {
            return Ok(());
        };

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        self.pricing.recompute_cart(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartCleared(cart.id)).await;
        info!(cart_id = %cart.id, "cleared cart");
        Ok(())
    }

    /// Merges a guest cart into the user's cart at login.
    ///
    /// With no user cart, the guest cart is reassigned to the user. With
    /// both present, guest items are quantity-merged into the user cart
    /// (per-product collision) and the guest cart is closed out empty.
    /// Safe to call with a missing or already-merged token: a no-op.
    #[instrument(skip(self))]
    pub async fn merge_cart_on_login(
        &self,
        user_id: Uuid,
        guest_cart_token: &str,
    ) -> Result<Option<CartModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let guest_cart = Cart::find()
            .filter(cart::Column::CartToken.eq(guest_cart_token))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .one(&txn)
            .await?;
        let Some(guest_cart) = guest_cart else {
            txn.commit().await?;
            return self.find_active_user_cart(user_id).await;
        };
        // The token may already belong to this user's cart.
        if guest_cart.user_id == Some(user_id) {
            txn.commit().await?;
            return Ok(Some(guest_cart));
        }

        let user_cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_asc(cart::Column::CreatedAt)
            .one(&txn)
            .await?;

        let now = Utc::now();
        let merged = match user_cart {
            None => {
                let guest_cart_id = guest_cart.id;
                let mut active: cart::ActiveModel = guest_cart.into();
                active.user_id = Set(Some(user_id));
                active.updated_at = Set(now);
                let cart = active.update(&txn).await?;
                txn.commit().await?;
                info!(cart_id = %guest_cart_id, user_id = %user_id, "reassigned guest cart to user");
                cart
            }
            Some(user_cart) => {
                merge_items_into(&txn, user_cart.id, guest_cart.id).await?;

                let guest_cart_id = guest_cart.id;
                let mut closed: cart::ActiveModel = guest_cart.into();
                closed.status = Set(cart::CartStatus::Converted);
                closed.updated_at = Set(now);
                closed.update(&txn).await?;
                self.pricing.recompute_cart(&txn, guest_cart_id).await?;

                let merged = self.pricing.recompute_cart(&txn, user_cart.id).await?;
                txn.commit().await?;

                self.event_sender
                    .send_or_log(Event::CartsMerged {
                        user_cart_id: merged.id,
                        guest_cart_id,
                    })
                    .await;
                info!(user_cart_id = %merged.id, guest_cart_id = %guest_cart_id, "merged guest cart into user cart");
                merged
            }
        };
        Ok(Some(merged))
    }

    /// Collapses duplicate active carts left behind by concurrent logins:
    /// the oldest cart survives, items from the rest are quantity-merged
    /// into it, and the losers are marked abandoned.
    #[instrument(skip(self))]
    pub async fn cleanup_user_carts(&self, user_id: Uuid) -> Result<Option<CartModel>, ServiceError> {
        let txn = self.db.begin().await?;

        let mut carts = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_asc(cart::Column::CreatedAt)
            .all(&txn)
            .await?;

        if carts.len() <= 1 {
            txn.commit().await?;
            return Ok(carts.pop());
        }

        let survivor = carts.remove(0);
        let duplicates = carts.len();
        let now = Utc::now();
        for duplicate in carts {
            merge_items_into(&txn, survivor.id, duplicate.id).await?;
            let duplicate_id = duplicate.id;
            let mut closed: cart::ActiveModel = duplicate.into();
            closed.status = Set(cart::CartStatus::Abandoned);
            closed.updated_at = Set(now);
            closed.update(&txn).await?;
            self.pricing.recompute_cart(&txn, duplicate_id).await?;
        }

        let survivor = self.pricing.recompute_cart(&txn, survivor.id).await?;
        txn.commit().await?;

        warn!(user_id = %user_id, duplicates, "collapsed duplicate active carts");
        Ok(Some(survivor))
    }

    async fn find_active_user_cart(&self, user_id: Uuid) -> Result<Option<CartModel>, ServiceError> {
        Ok(Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_asc(cart::Column::CreatedAt)
            .one(&*self.db)
            .await?)
    }

    /// Store-level currency fallback for carts created before any catalog
    /// quote is seen.
    pub fn default_currency(&self) -> &str {
        &self.config.default_currency
    }
}

/// Finds the single active cart for an identity: by user id first, then by
/// guest token.
pub(crate) async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    identity: &CartIdentity,
) -> Result<Option<CartModel>, ServiceError> {
    if let Some(user_id) = identity.user_id {
        let cart = Cart::find()
            .filter(cart::Column::UserId.eq(user_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .order_by_asc(cart::Column::CreatedAt)
            .one(conn)
            .await?;
        if cart.is_some() {
            return Ok(cart);
        }
    }
    if let Some(token) = &identity.cart_token {
        return Ok(Cart::find()
            .filter(cart::Column::CartToken.eq(token.clone()))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .one(conn)
            .await?);
    }
    Ok(None)
}

pub(crate) async fn active_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    Ok(CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .filter(cart_item::Column::Status.eq(cart_item::CartItemStatus::Active))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Moves the active items of `source_cart_id` into `target_cart_id`,
/// summing quantities on product collision and keeping the target's price
/// snapshot where one exists. Source items are soft-removed.
async fn merge_items_into<C: ConnectionTrait>(
    conn: &C,
    target_cart_id: Uuid,
    source_cart_id: Uuid,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    let source_items = active_items(conn, source_cart_id).await?;

    for source in source_items {
        let target = CartItem::find()
            .filter(cart_item::Column::CartId.eq(target_cart_id))
            .filter(cart_item::Column::ProductId.eq(source.product_id))
            .filter(cart_item::Column::Status.eq(cart_item::CartItemStatus::Active))
            .one(conn)
            .await?;

        match target {
            Some(target) => {
                let quantity = target.quantity + source.quantity;
                let unit_price = target.unit_price;
                let mut active: cart_item::ActiveModel = target.into();
                active.quantity = Set(quantity);
                active.total_price = Set(money::line_total(unit_price, quantity));
                active.updated_at = Set(now);
                active.update(conn).await?;
            }
            None => {
                let copy = cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(target_cart_id),
                    product_id: Set(source.product_id),
                    quantity: Set(source.quantity),
                    unit_price: Set(source.unit_price),
                    total_price: Set(source.total_price),
                    status: Set(cart_item::CartItemStatus::Active),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                copy.insert(conn).await?;
            }
        }

        let mut removed: cart_item::ActiveModel = source.into();
        removed.status = Set(cart_item::CartItemStatus::Removed);
        removed.updated_at = Set(now);
        removed.update(conn).await?;
    }
    Ok(())
}
