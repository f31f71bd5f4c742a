//! Scripted payment gateway for tests. Compiled only with the `mock` feature.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::adapters::{GatewayError, PaymentGateway, ProviderPrice, ProviderSubscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayCall {
    CreateCustomer,
    AttachPaymentMethod,
    SetDefaultPaymentMethod,
    CreateSubscription,
    CancelSubscription,
    RetrieveSubscription,
    ListActivePrices,
}

#[derive(Debug, Default)]
struct MockState {
    failures: HashMap<GatewayCall, String>,
    calls: Vec<GatewayCall>,
    next_subscription: Option<ProviderSubscription>,
    subscriptions: HashMap<String, ProviderSubscription>,
    by_idempotency_key: HashMap<String, IdempotentCreate>,
    live: HashSet<String>,
    prices: Vec<ProviderPrice>,
    counter: u32,
}

#[derive(Debug, Clone)]
struct IdempotentCreate {
    subscription_id: String,
    customer_id: String,
    price_id: String,
}

/// In-memory stand-in for the payment provider. Records every call, can be
/// told to fail a given call, and honours idempotency keys the way the real
/// provider does.
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps before every call so concurrent callers interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_prices(self, prices: Vec<ProviderPrice>) -> Self {
        self.lock().prices = prices;
        self
    }

    pub fn fail_on(&self, call: GatewayCall, reason: impl Into<String>) {
        self.lock().failures.insert(call, reason.into());
    }

    pub fn clear_failure(&self, call: GatewayCall) {
        self.lock().failures.remove(&call);
    }

    /// Response for the next subscription the mock creates.
    pub fn respond_with(&self, subscription: ProviderSubscription) {
        self.lock().next_subscription = Some(subscription);
    }

    /// Overrides what the provider reports for an existing subscription.
    pub fn set_remote(&self, subscription: ProviderSubscription) {
        let mut state = self.lock();
        state.live.insert(subscription.id.clone());
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Forgets a subscription entirely, as if deleted on the provider side.
    pub fn forget(&self, subscription_id: &str) {
        let mut state = self.lock();
        state.subscriptions.remove(subscription_id);
        state.live.remove(subscription_id);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, call: GatewayCall) -> usize {
        self.lock().calls.iter().filter(|c| **c == call).count()
    }

    /// Subscriptions created and not canceled.
    pub fn live_subscriptions(&self) -> usize {
        self.lock().live.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self, call: GatewayCall) -> Result<(), GatewayError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        state.calls.push(call);
        match state.failures.get(&call) {
            Some(reason) => Err(GatewayError::Rejected {
                status: 402,
                code: Some("mock_failure".to_string()),
                message: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_customer(&self, _email: &str, _name: &str) -> Result<String, GatewayError> {
        self.enter(GatewayCall::CreateCustomer).await?;
        let mut state = self.lock();
        state.counter += 1;
        Ok(format!("cus_{}", state.counter))
    }

    async fn attach_payment_method(
        &self,
        _customer_id: &str,
        _payment_method: &str,
    ) -> Result<(), GatewayError> {
        self.enter(GatewayCall::AttachPaymentMethod).await
    }

    async fn set_default_payment_method(
        &self,
        _customer_id: &str,
        _payment_method: &str,
    ) -> Result<(), GatewayError> {
        self.enter(GatewayCall::SetDefaultPaymentMethod).await
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.enter(GatewayCall::CreateSubscription).await?;
        let mut state = self.lock();
        if let Some(previous) = state.by_idempotency_key.get(idempotency_key) {
            if previous.customer_id != customer_id || previous.price_id != price_id {
                return Err(GatewayError::Rejected {
                    status: 400,
                    code: Some("idempotency_error".to_string()),
                    message: format!(
                        "Keys for idempotent requests can only be used with the same parameters they were first used with. Key: {idempotency_key}"
                    ),
                });
            }
            if let Some(existing) = state.subscriptions.get(&previous.subscription_id) {
                return Ok(existing.clone());
            }
        }

        state.counter += 1;
        let counter = state.counter;
        let subscription = state.next_subscription.take().unwrap_or_else(|| {
            ProviderSubscription {
                id: format!("sub_{counter}"),
                status: "active".to_string(),
                current_period_end: (Utc::now() + chrono::Duration::days(30)).timestamp(),
                client_secret: Some(format!("pi_{counter}_secret")),
            }
        });
        state.by_idempotency_key.insert(
            idempotency_key.to_string(),
            IdempotentCreate {
                subscription_id: subscription.id.clone(),
                customer_id: customer_id.to_string(),
                price_id: price_id.to_string(),
            },
        );
        state.live.insert(subscription.id.clone());
        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        self.enter(GatewayCall::CancelSubscription).await?;
        let mut state = self.lock();
        if !state.live.remove(subscription_id) {
            return Err(GatewayError::NotFound(format!(
                "No such subscription: '{subscription_id}'"
            )));
        }
        if let Some(subscription) = state.subscriptions.get_mut(subscription_id) {
            subscription.status = "canceled".to_string();
        }
        Ok(())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.enter(GatewayCall::RetrieveSubscription).await?;
        self.lock()
            .subscriptions
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("No such subscription: '{subscription_id}'")))
    }

    async fn list_active_prices(&self) -> Result<Vec<ProviderPrice>, GatewayError> {
        self.enter(GatewayCall::ListActivePrices).await?;
        Ok(self.lock().prices.clone())
    }
}
