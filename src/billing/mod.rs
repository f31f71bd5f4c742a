pub mod adapters;
pub mod api;
pub mod catalog;
pub mod errors;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod models;
pub mod scheduler;
pub mod service;
pub mod stripe;

pub use adapters::{GatewayError, PaymentGateway, ProviderPrice, ProviderSubscription};
pub use api::{
    cancel as billing_cancel, current_subscription as billing_current_subscription,
    list_plans as billing_list_plans, subscribe as billing_subscribe, SubscribeRequest,
};
pub use errors::BillingError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{GatewayCall, MockGateway};
pub use models::{PlanSummary, PlanTier, SubscriptionSummary, TierPriceMap};
pub use scheduler::{process_tick as run_reconciliation_sweep, spawn as spawn_reconciliation_sweep, SweepReport};
pub use service::{SubscriptionReconciler, SyncOutcome};
pub use stripe::StripeGateway;
