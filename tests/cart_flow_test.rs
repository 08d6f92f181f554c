mod common;

use cspmarket_api::{
    entities::{cart, cart_item},
    services::{AddItemInput, CartIdentity},
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::TestApp;

#[tokio::test]
async fn totals_track_item_mutations() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let store_id = Uuid::new_v4();
    let identity = CartIdentity::user(user_id);
    let product = app.seed_product(dec!(10.00));

    let (cart, item) = app
        .services
        .carts
        .add_item(
            &identity,
            store_id,
            AddItemInput {
                product_id: product,
                quantity: 1,
            },
        )
        .await
        .expect("add item");
    assert_eq!(cart.subtotal, dec!(10.00));
    assert_eq!(cart.total_amount, dec!(10.00));
    assert_eq!(item.unit_price, dec!(10.00));

    let updated = app
        .services
        .carts
        .update_item_quantity(&identity, item.id, 3)
        .await
        .expect("update quantity");
    assert!(updated);
    let resolved = app
        .services
        .carts
        .resolve_cart(&identity)
        .await
        .expect("resolve")
        .expect("cart exists");
    assert_eq!(resolved.cart.subtotal, dec!(30.00));
    assert_eq!(resolved.items.len(), 1);
    assert_eq!(resolved.items[0].quantity, 3);

    let removed = app
        .services
        .carts
        .remove_item(&identity, item.id)
        .await
        .expect("remove item");
    assert!(removed);
    let resolved = app
        .services
        .carts
        .resolve_cart(&identity)
        .await
        .expect("resolve")
        .expect("cart exists");
    // Removing the last item empties the cart but does not close it.
    assert_eq!(resolved.cart.subtotal, dec!(0.00));
    assert_eq!(resolved.cart.status, cart::CartStatus::Active);
    assert!(resolved.items.is_empty());

    // Idempotent: a second remove of the same item is a reported no-op.
    let removed_again = app
        .services
        .carts
        .remove_item(&identity, item.id)
        .await
        .expect("remove again");
    assert!(!removed_again);
}

#[tokio::test]
async fn clear_cart_empties_items_and_keeps_the_cart_open() {
    let app = TestApp::new().await;
    let identity = CartIdentity::user(Uuid::new_v4());
    let store_id = Uuid::new_v4();
    let product_a = app.seed_product(dec!(8.00));
    let product_b = app.seed_product(dec!(3.50));
    app.services
        .carts
        .add_item(&identity, store_id, AddItemInput { product_id: product_a, quantity: 2 })
        .await
        .expect("add A");
    let (cart_model, _) = app
        .services
        .carts
        .add_item(&identity, store_id, AddItemInput { product_id: product_b, quantity: 1 })
        .await
        .expect("add B");

    app.services.carts.clear_cart(&identity).await.expect("clear");

    let resolved = app
        .services
        .carts
        .resolve_cart(&identity)
        .await
        .expect("resolve")
        .expect("cart survives clearing");
    assert_eq!(resolved.cart.id, cart_model.id);
    assert_eq!(resolved.cart.status, cart::CartStatus::Active);
    assert_eq!(resolved.cart.total_amount, dec!(0.00));
    assert!(resolved.items.is_empty());

    let rows = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_model.id))
        .all(&*app.db)
        .await
        .expect("query");
    assert!(rows.is_empty());
}

#[tokio::test]
async fn resolve_does_not_create_a_cart() {
    let app = TestApp::new().await;
    let identity = CartIdentity::user(Uuid::new_v4());

    let resolved = app.services.carts.resolve_cart(&identity).await.expect("resolve");
    assert!(resolved.is_none());

    let carts = cart::Entity::find().all(&*app.db).await.expect("query");
    assert!(carts.is_empty());
}

#[tokio::test]
async fn add_item_merges_quantity_for_same_product() {
    let app = TestApp::new().await;
    let identity = CartIdentity::user(Uuid::new_v4());
    let store_id = Uuid::new_v4();
    let product = app.seed_product(dec!(12.50));

    for _ in 0..2 {
        app.services
            .carts
            .add_item(
                &identity,
                store_id,
                AddItemInput {
                    product_id: product,
                    quantity: 2,
                },
            )
            .await
            .expect("add item");
    }

    let resolved = app
        .services
        .carts
        .resolve_cart(&identity)
        .await
        .expect("resolve")
        .expect("cart exists");
    // One line, summed quantity, not two duplicate rows.
    assert_eq!(resolved.items.len(), 1);
    assert_eq!(resolved.items[0].quantity, 4);
    assert_eq!(resolved.cart.subtotal, dec!(50.00));
}

#[tokio::test]
async fn quantity_below_one_is_rejected() {
    let app = TestApp::new().await;
    let identity = CartIdentity::user(Uuid::new_v4());
    let product = app.seed_product(dec!(5.00));
    let (_, item) = app
        .services
        .carts
        .add_item(
            &identity,
            Uuid::new_v4(),
            AddItemInput {
                product_id: product,
                quantity: 1,
            },
        )
        .await
        .expect("add item");

    let err = app
        .services
        .carts
        .update_item_quantity(&identity, item.id, 0)
        .await
        .expect_err("zero quantity must be rejected");
    assert!(err.to_string().contains("quantity"));
}

#[tokio::test]
async fn login_merge_sums_colliding_products() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let store_id = Uuid::new_v4();
    let product_a = app.seed_product(dec!(10.00));
    let product_b = app.seed_product(dec!(20.00));

    let user_identity = CartIdentity::user(user_id);
    app.services
        .carts
        .add_item(&user_identity, store_id, AddItemInput { product_id: product_a, quantity: 2 })
        .await
        .expect("user add A");
    app.services
        .carts
        .add_item(&user_identity, store_id, AddItemInput { product_id: product_b, quantity: 1 })
        .await
        .expect("user add B");

    let guest_token = "guest-token-merge-test";
    let guest_identity = CartIdentity::guest(guest_token);
    let (guest_cart, _) = app
        .services
        .carts
        .add_item(&guest_identity, store_id, AddItemInput { product_id: product_a, quantity: 1 })
        .await
        .expect("guest add A");

    let merged = app
        .services
        .carts
        .merge_cart_on_login(user_id, guest_token)
        .await
        .expect("merge")
        .expect("user cart after merge");

    let resolved = app
        .services
        .carts
        .resolve_cart(&user_identity)
        .await
        .expect("resolve")
        .expect("cart exists");
    assert_eq!(resolved.cart.id, merged.id);
    assert_eq!(resolved.items.len(), 2);
    let qty_a = resolved
        .items
        .iter()
        .find(|i| i.product_id == product_a)
        .expect("product A line")
        .quantity;
    let qty_b = resolved
        .items
        .iter()
        .find(|i| i.product_id == product_b)
        .expect("product B line")
        .quantity;
    assert_eq!(qty_a, 3);
    assert_eq!(qty_b, 1);
    assert_eq!(resolved.cart.subtotal, dec!(50.00));

    // The guest cart is closed out and holds no active items.
    let closed = cart::Entity::find_by_id(guest_cart.id)
        .one(&*app.db)
        .await
        .expect("query")
        .expect("guest cart row");
    assert_ne!(closed.status, cart::CartStatus::Active);
    let leftover = cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(guest_cart.id))
        .filter(cart_item::Column::Status.eq(cart_item::CartItemStatus::Active))
        .all(&*app.db)
        .await
        .expect("query");
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn guest_re_add_after_merge_gets_a_fresh_token() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let store_id = Uuid::new_v4();
    let product = app.seed_product(dec!(10.00));

    // The user already has a cart, so the merge closes the guest cart and
    // leaves the guest token on a converted row.
    let user_identity = CartIdentity::user(user_id);
    app.services
        .carts
        .add_item(&user_identity, store_id, AddItemInput { product_id: product, quantity: 1 })
        .await
        .expect("user add");

    let guest_token = "guest-token-reuse-test";
    let guest_identity = CartIdentity::guest(guest_token);
    app.services
        .carts
        .add_item(&guest_identity, store_id, AddItemInput { product_id: product, quantity: 1 })
        .await
        .expect("guest add");
    app.services
        .carts
        .merge_cart_on_login(user_id, guest_token)
        .await
        .expect("merge");

    // The browser still carries the old token; the next add must open a
    // new cart under a fresh token instead of tripping the unique index.
    let (new_cart, _) = app
        .services
        .carts
        .add_item(&guest_identity, store_id, AddItemInput { product_id: product, quantity: 2 })
        .await
        .expect("guest re-add after merge");
    assert_eq!(new_cart.status, cart::CartStatus::Active);
    let token = new_cart.cart_token.as_deref().expect("fresh token assigned");
    assert_ne!(token, guest_token);
    assert_eq!(new_cart.subtotal, dec!(20.00));
}

#[tokio::test]
async fn merge_with_unknown_token_is_a_noop() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let product = app.seed_product(dec!(7.00));
    let identity = CartIdentity::user(user_id);
    app.services
        .carts
        .add_item(&identity, Uuid::new_v4(), AddItemInput { product_id: product, quantity: 1 })
        .await
        .expect("add item");

    let merged = app
        .services
        .carts
        .merge_cart_on_login(user_id, "no-such-token")
        .await
        .expect("merge");
    assert_eq!(merged.expect("existing user cart").subtotal, dec!(7.00));
}

#[tokio::test]
async fn cleanup_collapses_duplicate_active_carts() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let store_id = Uuid::new_v4();
    let product_a = app.seed_product(dec!(10.00));
    let product_b = app.seed_product(dec!(4.00));

    let identity = CartIdentity::user(user_id);
    let (first_cart, _) = app
        .services
        .carts
        .add_item(&identity, store_id, AddItemInput { product_id: product_a, quantity: 1 })
        .await
        .expect("add to first cart");

    // A second active cart for the same user, as left behind by a race.
    let second_identity = CartIdentity::guest("duplicate-cart-token");
    let (second_cart, _) = app
        .services
        .carts
        .add_item(&second_identity, store_id, AddItemInput { product_id: product_b, quantity: 2 })
        .await
        .expect("add to second cart");
    let mut claim: cart::ActiveModel = cart::Entity::find_by_id(second_cart.id)
        .one(&*app.db)
        .await
        .expect("query")
        .expect("second cart")
        .into();
    claim.user_id = sea_orm::Set(Some(user_id));
    sea_orm::ActiveModelTrait::update(claim, &*app.db)
        .await
        .expect("assign duplicate to user");

    let survivor = app
        .services
        .carts
        .cleanup_user_carts(user_id)
        .await
        .expect("cleanup")
        .expect("survivor");
    assert_eq!(survivor.id, first_cart.id);
    assert_eq!(survivor.subtotal, dec!(18.00));

    let loser = cart::Entity::find_by_id(second_cart.id)
        .one(&*app.db)
        .await
        .expect("query")
        .expect("loser row");
    assert_eq!(loser.status, cart::CartStatus::Abandoned);
}
