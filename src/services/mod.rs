pub mod abandonment;
pub mod carts;
pub mod checkout;
pub mod clients;
pub mod payments;
pub mod pricing;
pub mod provisioning;

pub use abandonment::AbandonedCartService;
pub use carts::{AddItemInput, CartIdentity, CartService, CartWithItems};
pub use checkout::{CancelOrderRequest, CheckoutInput, CheckoutService};
pub use payments::{PaymentService, WebhookOutcome, WebhookPayload};
pub use pricing::{CartTotals, PricingEngine};
pub use provisioning::{ProvisionDetail, ProvisioningService, ProvisioningSummary};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// URL-safe opaque token for guest carts and recovery links.
pub(crate) fn opaque_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
