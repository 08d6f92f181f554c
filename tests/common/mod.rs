#![allow(dead_code)]

use async_trait::async_trait;
use cspmarket_api::{
    config::AppConfig,
    db::DbPool,
    entities::{
        abandoned_cart, cart, cart_item, order, order_item, payment_response, payment_session,
    },
    errors::ServiceError,
    events,
    services::clients::{
        CatalogProvider, GatewayRedirect, OwnershipStore, PaymentDetails, PaymentGateway,
        ProductQuote, ProvisionOutcome, ProvisioningClient,
    },
    AppServices,
};
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, Schema};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// In-memory catalog fake. Prices are seeded per test.
#[derive(Default)]
pub struct InMemoryCatalog {
    products: Mutex<HashMap<Uuid, ProductQuote>>,
}

impl InMemoryCatalog {
    pub fn seed(&self, product_id: Uuid, unit_price: Decimal) {
        self.products.lock().unwrap().insert(
            product_id,
            ProductQuote {
                unit_price,
                currency: "USD".to_string(),
            },
        );
    }
}

#[async_trait]
impl CatalogProvider for InMemoryCatalog {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductQuote>, ServiceError> {
        Ok(self.products.lock().unwrap().get(&product_id).cloned())
    }
}

/// Ownership fake that accepts every reference.
pub struct AllowAllOwnership;

#[async_trait]
impl OwnershipStore for AllowAllOwnership {
    async fn billing_information_belongs_to(
        &self,
        _user_id: Uuid,
        _billing_information_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(true)
    }

    async fn payment_card_belongs_to(
        &self,
        _user_id: Uuid,
        _payment_card_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(true)
    }
}

/// Gateway fake issuing sequential transaction references.
#[derive(Default)]
pub struct FakeGateway {
    counter: AtomicU32,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initiate(&self, details: PaymentDetails) -> Result<GatewayRedirect, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRedirect {
            transaction_reference: format!("CSPPAY-{:06}", n),
            form_payload: json!({
                "amount": details.amount.to_string(),
                "currency": details.currency,
            }),
            redirect_url: "https://gateway.test/3ds".to_string(),
        })
    }
}

/// Provisioning fake: fails the product ids it is told to fail and records
/// every invocation so tests can assert retry behaviour.
#[derive(Default)]
pub struct ScriptedProvisioningClient {
    failing_products: Mutex<HashSet<Uuid>>,
    calls: Mutex<Vec<Uuid>>,
}

impl ScriptedProvisioningClient {
    pub fn fail_product(&self, product_id: Uuid) {
        self.failing_products.lock().unwrap().insert(product_id);
    }

    pub fn heal_product(&self, product_id: Uuid) {
        self.failing_products.lock().unwrap().remove(&product_id);
    }

    pub fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningClient for ScriptedProvisioningClient {
    async fn provision_item(
        &self,
        item: &order_item::Model,
    ) -> Result<ProvisionOutcome, ServiceError> {
        self.calls.lock().unwrap().push(item.product_id);
        if self.failing_products.lock().unwrap().contains(&item.product_id) {
            Ok(ProvisionOutcome {
                success: false,
                detail: Some("partner center rejected the subscription".to_string()),
            })
        } else {
            Ok(ProvisionOutcome {
                success: true,
                detail: Some("subscription active".to_string()),
            })
        }
    }
}

/// Test harness: one in-memory SQLite database with the full schema and
/// the service layer wired over fakes.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub catalog: Arc<InMemoryCatalog>,
    pub provisioner: Arc<ScriptedProvisioningClient>,
    pub services: AppServices,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = AppConfig::new("sqlite::memory:");
        // Zero tax keeps cart totals equal to subtotals where a test does
        // not exercise the tax path explicitly.
        config.default_tax_rate = 0.0;
        Self::with_config(config).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let mut options = ConnectOptions::new(config.database_url.clone());
        // A single connection keeps every statement on the same in-memory
        // database.
        options.max_connections(1).sqlx_logging(false);
        let db = Arc::new(Database::connect(options).await.expect("connect sqlite"));
        setup_schema(&db).await;

        let config = Arc::new(config);
        let (event_sender, receiver) = events::channel(64);
        // No consumer in tests; a dropped receiver makes publication a
        // logged no-op instead of backpressure.
        drop(receiver);

        let catalog = Arc::new(InMemoryCatalog::default());
        let provisioner = Arc::new(ScriptedProvisioningClient::default());
        let services = AppServices::build(
            db.clone(),
            config.clone(),
            Arc::new(event_sender),
            catalog.clone(),
            Arc::new(AllowAllOwnership),
            Arc::new(FakeGateway::default()),
            provisioner.clone(),
        );

        Self {
            db,
            config,
            catalog,
            provisioner,
            services,
        }
    }

    /// Seeds a catalog product and returns its id.
    pub fn seed_product(&self, unit_price: Decimal) -> Uuid {
        let product_id = Uuid::new_v4();
        self.catalog.seed(product_id, unit_price);
        product_id
    }
}

async fn setup_schema(db: &DbPool) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let statements = vec![
        schema.create_table_from_entity(cart::Entity),
        schema.create_table_from_entity(cart_item::Entity),
        schema.create_table_from_entity(order::Entity),
        schema.create_table_from_entity(order_item::Entity),
        schema.create_table_from_entity(payment_session::Entity),
        schema.create_table_from_entity(payment_response::Entity),
        schema.create_table_from_entity(abandoned_cart::Entity),
    ];
    for statement in statements {
        db.execute(backend.build(&statement))
            .await
            .expect("create table");
    }
}
