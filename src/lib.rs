//! CSP Marketplace API Library
//!
//! Cart, order-conversion and license-provisioning core for a multi-tenant
//! CSP license marketplace. Owns the consistency-critical state machines
//! (cart lifecycle, checkout conversion, payment reconciliation,
//! provisioning, abandonment) while catalog, billing stores, the payment
//! gateway and the partner provisioning system are consumed through traits.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod money;
pub mod services;

use std::sync::Arc;

use crate::services::clients::{
    CatalogProvider, OwnershipStore, PaymentGateway, ProvisioningClient,
};
use crate::services::{
    AbandonedCartService, CartService, CheckoutService, PaymentService, ProvisioningService,
};

/// Fully wired service layer.
#[derive(Clone)]
pub struct AppServices {
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub provisioning: Arc<ProvisioningService>,
    pub abandonment: Arc<AbandonedCartService>,
}

impl AppServices {
    /// Wires every service over one pool, one event channel and the given
    /// collaborator clients.
    pub fn build(
        db: Arc<db::DbPool>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
        catalog: Arc<dyn CatalogProvider>,
        ownership: Arc<dyn OwnershipStore>,
        gateway: Arc<dyn PaymentGateway>,
        provisioning_client: Arc<dyn ProvisioningClient>,
    ) -> Self {
        let carts = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            catalog,
            config.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            ownership,
            config.clone(),
        ));
        let payments = Arc::new(PaymentService::new(
            db.clone(),
            event_sender.clone(),
            gateway,
        ));
        let abandonment = Arc::new(AbandonedCartService::new(
            db.clone(),
            event_sender.clone(),
            config,
        ));
        let provisioning = Arc::new(ProvisioningService::new(
            db,
            event_sender,
            provisioning_client,
            Some(abandonment.clone()),
        ));
        Self {
            carts,
            checkout,
            payments,
            provisioning,
            abandonment,
        }
    }
}

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: AppServices,
}
