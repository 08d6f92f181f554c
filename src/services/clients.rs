//! Collaborator contracts.
//!
//! The catalog, billing/payment-card stores, payment gateway and the
//! partner provisioning system are external services. The core consumes
//! them through these traits and owns only correlation, idempotency and
//! aggregation, never the remote protocols themselves.

use crate::{entities::order_item, errors::ServiceError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current catalog price for a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuote {
    pub unit_price: Decimal,
    pub currency: String,
}

/// Read-only catalog lookup, consulted once at add-time for the price
/// snapshot. The core never trusts client-supplied prices.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn get_product(&self, product_id: Uuid) -> Result<Option<ProductQuote>, ServiceError>;
}

/// Ownership checks for checkout references.
#[async_trait]
pub trait OwnershipStore: Send + Sync {
    async fn billing_information_belongs_to(
        &self,
        user_id: Uuid,
        billing_information_id: Uuid,
    ) -> Result<bool, ServiceError>;

    async fn payment_card_belongs_to(
        &self,
        user_id: Uuid,
        payment_card_id: Uuid,
    ) -> Result<bool, ServiceError>;
}

/// Input to a gateway payment initiation.
#[derive(Debug, Clone)]
pub struct PaymentDetails {
    pub amount: Decimal,
    pub currency: String,
    pub user_id: Option<Uuid>,
    pub cart_id: Uuid,
    pub return_url: String,
}

/// Gateway response for a newly initiated 3DS payment attempt.
#[derive(Debug, Clone)]
pub struct GatewayRedirect {
    pub transaction_reference: String,
    pub form_payload: serde_json::Value,
    pub redirect_url: String,
}

/// Opaque 3DS payment gateway client.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, details: PaymentDetails) -> Result<GatewayRedirect, ServiceError>;
}

/// Result of provisioning one order item downstream.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub detail: Option<String>,
}

/// Partner-center provisioning client. The dispatcher owns retry and
/// aggregation policy; the client owns the remote API shape.
#[async_trait]
pub trait ProvisioningClient: Send + Sync {
    async fn provision_item(
        &self,
        item: &order_item::Model,
    ) -> Result<ProvisionOutcome, ServiceError>;
}
