mod common;

use cspmarket_api::{
    entities::{order, order_item},
    errors::ServiceError,
    services::{AddItemInput, CartIdentity, CheckoutInput},
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use common::TestApp;

/// Builds a processing order with one line per given product.
async fn processing_order(app: &TestApp, products: &[Uuid]) -> order::Model {
    let identity = CartIdentity::user(Uuid::new_v4());
    for product in products {
        app.services
            .carts
            .add_item(&identity, Uuid::new_v4(), AddItemInput { product_id: *product, quantity: 1 })
            .await
            .expect("add item");
    }
    let order = app
        .services
        .checkout
        .create_from_cart(
            &identity,
            CheckoutInput {
                billing_information_id: Uuid::new_v4(),
                payment_card_id: None,
            },
        )
        .await
        .expect("checkout");

    // Payment already reconciled; provisioning starts from processing.
    let mut paid: order::ActiveModel = order.into();
    paid.status = Set(order::OrderStatus::Processing);
    paid.update(&*app.db).await.expect("mark processing")
}

#[tokio::test]
async fn partial_failure_is_aggregated_and_does_not_complete_the_order() {
    let app = TestApp::new().await;
    let products = [
        app.seed_product(dec!(10.00)),
        app.seed_product(dec!(20.00)),
        app.seed_product(dec!(30.00)),
    ];
    let order = processing_order(&app, &products).await;
    app.provisioner.fail_product(products[1]);

    let summary = app
        .services
        .provisioning
        .process_order(order.id)
        .await
        .expect("provisioning run");
    assert!(!summary.success);
    assert_eq!(summary.total_products, 3);
    assert_eq!(summary.successful_products, 2);
    assert_eq!(summary.failed_products, 1);
    assert_eq!(summary.product_details.len(), 3);
    let failed_detail = summary
        .product_details
        .iter()
        .find(|d| d.product_id == products[1])
        .expect("failed line reported");
    assert!(!failed_detail.success);

    let row = order::Entity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .expect("query")
        .expect("order row");
    assert_eq!(row.status, order::OrderStatus::Processing);
    assert_eq!(row.fulfillment_status, order::FulfillmentStatus::Partial);

    let failed_items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order.id))
        .filter(order_item::Column::ProvisionStatus.eq(order_item::ProvisionStatus::Failed))
        .all(&*app.db)
        .await
        .expect("query items");
    assert_eq!(failed_items.len(), 1);
    assert!(failed_items[0].provisioning_error.is_some());
}

#[tokio::test]
async fn rerun_retries_only_previously_failed_items() {
    let app = TestApp::new().await;
    let products = [
        app.seed_product(dec!(10.00)),
        app.seed_product(dec!(20.00)),
        app.seed_product(dec!(30.00)),
    ];
    let order = processing_order(&app, &products).await;
    app.provisioner.fail_product(products[1]);

    app.services
        .provisioning
        .process_order(order.id)
        .await
        .expect("first run");
    assert_eq!(app.provisioner.calls().len(), 3);

    app.provisioner.heal_product(products[1]);
    let summary = app
        .services
        .provisioning
        .process_order(order.id)
        .await
        .expect("second run");
    assert!(summary.success);
    assert_eq!(summary.total_products, 3);
    assert_eq!(summary.successful_products, 3);
    assert_eq!(summary.failed_products, 0);

    // Only the previously failed item went back to the partner.
    let calls = app.provisioner.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[3], products[1]);

    let row = order::Entity::find_by_id(order.id)
        .one(&*app.db)
        .await
        .expect("query")
        .expect("order row");
    assert_eq!(row.status, order::OrderStatus::Completed);
    assert_eq!(row.fulfillment_status, order::FulfillmentStatus::Fulfilled);
}

#[tokio::test]
async fn only_processing_orders_are_provisioned() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(5.00));
    let identity = CartIdentity::user(Uuid::new_v4());
    app.services
        .carts
        .add_item(&identity, Uuid::new_v4(), AddItemInput { product_id: product, quantity: 1 })
        .await
        .expect("add item");
    let order = app
        .services
        .checkout
        .create_from_cart(
            &identity,
            CheckoutInput {
                billing_information_id: Uuid::new_v4(),
                payment_card_id: None,
            },
        )
        .await
        .expect("checkout");

    // Still pending: payment has not reconciled.
    let err = app
        .services
        .provisioning
        .process_order(order.id)
        .await
        .expect_err("pending order must not provision");
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert!(app.provisioner.calls().is_empty());
}
