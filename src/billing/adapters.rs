use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Subscription as reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: i64,
    pub client_secret: Option<String>,
}

/// Active recurring price as reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderPrice {
    pub id: String,
    pub product_name: String,
    pub unit_amount: Option<i64>,
    pub currency: String,
    pub interval: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider rejected request ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("provider resource not found: {0}")]
    NotFound(String),
    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error("invalid provider endpoint `{0}`")]
    InvalidEndpoint(String),
}

/// key: billing-adapter -> provider integration
///
/// Every method is a single remote call. Implementations never retry
/// mutations on their own; `create_subscription` forwards the idempotency key
/// so a caller-initiated retry resolves to the subscription created first.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, email: &str, name: &str) -> Result<String, GatewayError>;

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<(), GatewayError>;

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<(), GatewayError>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError>;

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError>;

    async fn list_active_prices(&self) -> Result<Vec<ProviderPrice>, GatewayError>;
}
