use thiserror::Error;

use super::adapters::GatewayError;
use crate::accounts::StoreError;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("billing configuration error: {0}")]
    Configuration(String),
    #[error("payment provider error during {operation}: {source}")]
    PaymentProvider {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("no active subscription found")]
    NoActiveSubscription,
    #[error("concurrent subscription update: {0}")]
    Conflict(String),
    #[error("account not found")]
    NotFound,
    #[error("account store error: {0}")]
    Store(StoreError),
}

impl BillingError {
    pub(crate) fn provider(operation: &'static str) -> impl FnOnce(GatewayError) -> Self {
        move |source| BillingError::PaymentProvider { operation, source }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => BillingError::NotFound,
            StoreError::Conflict { account_id, version } => BillingError::Conflict(format!(
                "account {account_id} changed since version {version}"
            )),
            StoreError::DuplicateEmail(email) => {
                BillingError::Validation(format!("email `{email}` already registered"))
            }
            other => BillingError::Store(other),
        }
    }
}
