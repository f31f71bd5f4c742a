use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use super::adapters::{GatewayError, PaymentGateway};
use super::catalog;
use super::errors::BillingError;
use super::models::{PlanSummary, PlanTier, SubscriptionSummary, TierPriceMap};
use crate::accounts::{Account, AccountStore, StoreError, Subscription};

/// Result of a provider sync for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub subscription: Subscription,
    pub changed: bool,
}

/// key: billing-service -> subscription reconciler
///
/// Sole writer of `Account::subscription`. Calls for the same account are
/// serialized by a per-account lock; the store's versioned save catches
/// writers outside this process.
#[derive(Clone)]
pub struct SubscriptionReconciler {
    store: Arc<dyn AccountStore>,
    gateway: Arc<dyn PaymentGateway>,
    prices: Arc<TierPriceMap>,
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl SubscriptionReconciler {
    pub fn new(
        store: Arc<dyn AccountStore>,
        gateway: Arc<dyn PaymentGateway>,
        prices: TierPriceMap,
    ) -> Self {
        Self {
            store,
            gateway,
            prices: Arc::new(prices),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn subscribe(
        &self,
        account_id: i32,
        plan: &str,
        payment_method: &str,
    ) -> Result<SubscriptionSummary, BillingError> {
        let (tier, price_id) = self.resolve_price(plan)?;
        let payment_method = validate_payment_method(payment_method)?;

        let _guard = self.lock_account(account_id).await;

        let account = self.store.find_by_id(account_id).await?;
        ensure_unsubscribed(&account)?;

        // The customer write may have picked up another process's subscription.
        let (account, customer_id) = self.ensure_customer(account).await?;
        ensure_unsubscribed(&account)?;
        let snapshot = account.subscription.clone();

        self.gateway
            .attach_payment_method(&customer_id, payment_method)
            .await
            .map_err(BillingError::provider("attach payment method"))?;
        self.gateway
            .set_default_payment_method(&customer_id, payment_method)
            .await
            .map_err(BillingError::provider("set default payment method"))?;

        let idempotency_key = format!("subscribe-{}-v{}", account.id, account.version);
        let remote = self
            .gateway
            .create_subscription(&customer_id, &price_id, &idempotency_key)
            .await
            .map_err(BillingError::provider("create subscription"))?;

        let next = Subscription::activated(tier, &remote).map_err(|reason| {
            error!(
                %account_id,
                subscription = %remote.id,
                %reason,
                "provider created subscription with unusable period end; not recorded locally"
            );
            BillingError::PaymentProvider {
                operation: "create subscription",
                source: GatewayError::Decode(reason),
            }
        })?;

        match self.commit(account, &snapshot, next).await {
            Ok(_) => {}
            Err(err @ BillingError::Conflict(_)) => {
                self.release_unrecorded(account_id, &remote.id).await;
                return Err(err);
            }
            Err(err) => {
                error!(
                    ?err,
                    %account_id,
                    subscription = %remote.id,
                    "provider subscription created but local write failed; needs reconciliation"
                );
                return Err(err);
            }
        }

        info!(
            %account_id,
            plan = %tier,
            subscription = %remote.id,
            status = %remote.status,
            "subscription activated"
        );

        Ok(SubscriptionSummary {
            subscription_id: remote.id,
            client_secret: remote.client_secret,
            plan: tier,
        })
    }

    pub async fn cancel(&self, account_id: i32) -> Result<(), BillingError> {
        let _guard = self.lock_account(account_id).await;

        let account = self.store.find_by_id(account_id).await?;
        let Some(external_id) = account.subscription.external_subscription_id.clone() else {
            return Err(BillingError::NoActiveSubscription);
        };
        let snapshot = account.subscription.clone();

        match self.gateway.cancel_subscription(&external_id).await {
            Ok(()) => {}
            Err(GatewayError::NotFound(reason)) => {
                warn!(
                    %account_id,
                    subscription = %external_id,
                    %reason,
                    "provider no longer knows subscription; clearing local record"
                );
            }
            Err(err) => {
                error!(
                    ?err,
                    %account_id,
                    subscription = %external_id,
                    "provider cancellation failed; local record left untouched"
                );
                return Err(BillingError::provider("cancel subscription")(err));
            }
        }

        self.commit(account, &snapshot, Subscription::canceled())
            .await
            .map_err(|err| {
                error!(
                    ?err,
                    %account_id,
                    subscription = %external_id,
                    "provider subscription canceled but local write failed; needs reconciliation"
                );
                err
            })?;

        info!(%account_id, subscription = %external_id, "subscription canceled");
        Ok(())
    }

    pub async fn list_plans(&self) -> Result<Vec<PlanSummary>, BillingError> {
        let prices = self
            .gateway
            .list_active_prices()
            .await
            .map_err(BillingError::provider("list prices"))?;

        let mut plans = Vec::with_capacity(prices.len());
        for price in &prices {
            match catalog::plan_summary(price) {
                Ok(plan) => plans.push(plan),
                Err(err) => warn!(price = %price.id, %err, "omitting plan from catalog"),
            }
        }
        Ok(plans)
    }

    pub async fn current_subscription(&self, account_id: i32) -> Result<Subscription, BillingError> {
        Ok(self.store.find_by_id(account_id).await?.subscription)
    }

    /// Pulls the provider's view of the account's subscription and applies it.
    pub async fn sync_from_provider(
        &self,
        account_id: i32,
        now: DateTime<Utc>,
    ) -> Result<SyncOutcome, BillingError> {
        let _guard = self.lock_account(account_id).await;

        let account = self.store.find_by_id(account_id).await?;
        let Some(external_id) = account.subscription.external_subscription_id.clone() else {
            return Ok(SyncOutcome {
                subscription: account.subscription,
                changed: false,
            });
        };
        let snapshot = account.subscription.clone();

        let next = match self.gateway.retrieve_subscription(&external_id).await {
            Ok(remote) => snapshot.refreshed(&remote, now).map_err(|reason| {
                BillingError::PaymentProvider {
                    operation: "retrieve subscription",
                    source: GatewayError::Decode(reason),
                }
            })?,
            Err(GatewayError::NotFound(_)) => Subscription::canceled(),
            Err(err) => return Err(BillingError::provider("retrieve subscription")(err)),
        };

        if next == snapshot {
            return Ok(SyncOutcome {
                subscription: snapshot,
                changed: false,
            });
        }

        let saved = self.commit(account, &snapshot, next).await?;
        info!(
            %account_id,
            subscription = %external_id,
            status = saved.subscription.status.as_deref().unwrap_or("none"),
            active = saved.subscription.is_active,
            "subscription reconciled with provider"
        );
        Ok(SyncOutcome {
            subscription: saved.subscription,
            changed: true,
        })
    }

    /// Accounts the reconciliation sweep has to visit.
    pub async fn tracked_accounts(&self) -> Result<Vec<i32>, BillingError> {
        Ok(self.store.list_with_external_subscription().await?)
    }

    fn resolve_price(&self, plan: &str) -> Result<(PlanTier, String), BillingError> {
        if plan.trim().is_empty() {
            return Err(BillingError::Validation("plan is required".to_string()));
        }
        let tier = plan
            .parse::<PlanTier>()
            .map_err(|_| BillingError::Configuration(format!("no price configured for plan `{plan}`")))?;
        let price_id = self.prices.price_for(tier).ok_or_else(|| {
            BillingError::Configuration(format!("no price configured for plan `{tier}`"))
        })?;
        Ok((tier, price_id.to_string()))
    }

    async fn lock_account(&self, account_id: i32) -> AccountGuard {
        let lock = self
            .locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let held = lock.clone().lock_owned().await;
        AccountGuard {
            locks: self.locks.clone(),
            account_id,
            lock,
            held: Some(held),
        }
    }

    /// Cancels a provider subscription this call created but lost to another
    /// writer, unless the stored record ended up pointing at it anyway.
    async fn release_unrecorded(&self, account_id: i32, subscription_id: &str) {
        match self.store.find_by_id(account_id).await {
            Ok(account)
                if account.subscription.external_subscription_id.as_deref()
                    == Some(subscription_id) =>
            {
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!(
                    ?err,
                    %account_id,
                    subscription = %subscription_id,
                    "could not read account after losing subscription race; needs reconciliation"
                );
                return;
            }
        }

        match self.gateway.cancel_subscription(subscription_id).await {
            Ok(()) | Err(GatewayError::NotFound(_)) => warn!(
                %account_id,
                subscription = %subscription_id,
                "canceled provider subscription that lost the race to another writer"
            ),
            Err(err) => error!(
                ?err,
                %account_id,
                subscription = %subscription_id,
                "unrecorded provider subscription could not be canceled; needs reconciliation"
            ),
        }
    }

    async fn ensure_customer(&self, mut account: Account) -> Result<(Account, String), BillingError> {
        if let Some(customer_id) = account.provider_customer_id.clone() {
            return Ok((account, customer_id));
        }

        let customer_id = self
            .gateway
            .create_customer(&account.email, &account.name)
            .await
            .map_err(BillingError::provider("create customer"))?;
        info!(account_id = account.id, customer = %customer_id, "provider customer created");

        account.provider_customer_id = Some(customer_id.clone());
        match self.store.save(&account).await {
            Ok(saved) => Ok((saved, customer_id)),
            Err(StoreError::Conflict { .. }) => {
                let mut fresh = self.store.find_by_id(account.id).await?;
                if let Some(existing) = fresh.provider_customer_id.clone() {
                    warn!(
                        account_id = account.id,
                        orphaned = %customer_id,
                        customer = %existing,
                        "account gained a customer concurrently; using stored one"
                    );
                    return Ok((fresh, existing));
                }
                fresh.provider_customer_id = Some(customer_id.clone());
                let saved = self.store.save(&fresh).await?;
                Ok((saved, customer_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes `next` as the account's subscription. A version conflict is
    /// retried once, and only if the subscription still equals `snapshot`.
    async fn commit(
        &self,
        mut account: Account,
        snapshot: &Subscription,
        next: Subscription,
    ) -> Result<Account, BillingError> {
        account.subscription = next.clone();
        match self.store.save(&account).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::Conflict { .. }) => {
                warn!(account_id = account.id, "account changed during billing call; reapplying");
                let mut fresh = self.store.find_by_id(account.id).await?;
                if fresh.subscription != *snapshot {
                    return Err(BillingError::Conflict(format!(
                        "subscription of account {} was changed by another writer",
                        account.id
                    )));
                }
                fresh.subscription = next;
                Ok(self.store.save(&fresh).await?)
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Releases the account's mutex, then drops the map entry unless another
/// caller is holding or waiting on it.
struct AccountGuard {
    locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
    account_id: i32,
    lock: Arc<Mutex<()>>,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        self.held.take();
        // one reference in the map, one here
        self.locks.remove_if(&self.account_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

fn ensure_unsubscribed(account: &Account) -> Result<(), BillingError> {
    match &account.subscription.external_subscription_id {
        Some(existing) => Err(BillingError::Validation(format!(
            "account already has subscription `{existing}`; cancel it first"
        ))),
        None => Ok(()),
    }
}

fn validate_payment_method(payment_method: &str) -> Result<&str, BillingError> {
    let token = payment_method.trim();
    if token.is_empty() {
        return Err(BillingError::Validation(
            "payment method is required".to_string(),
        ));
    }
    // Provider tokens look like `pm_...` or `tok_...`.
    if !token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(BillingError::Validation(
            "payment method must be a provider token".to_string(),
        ));
    }
    if token.len() >= 12 && token.chars().all(|c| c.is_ascii_digit()) {
        return Err(BillingError::Validation(
            "payment method must be a provider token, not a card number".to_string(),
        ));
    }
    Ok(token)
}
