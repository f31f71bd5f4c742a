use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::billing::{PlanTier, ProviderSubscription};

/// Provider statuses that still grant access while the paid period runs.
pub const ACCESS_GRANTING_STATUSES: [&str; 2] = ["active", "trialing"];

/// Provider statuses after which the subscription can never become active again.
pub const TERMINAL_STATUSES: [&str; 2] = ["canceled", "incomplete_expired"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Mentor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Role::Student),
            "mentor" => Ok(Role::Mentor),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

/// key: account-subscription -> embedded billing state
///
/// Only the subscription reconciler builds new values of this type. The
/// constructors below are the complete set of states it may write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Option<PlanTier>,
    pub external_subscription_id: Option<String>,
    pub status: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Subscription {
    /// State committed after the provider created a subscription.
    pub fn activated(plan: PlanTier, remote: &ProviderSubscription) -> Result<Self, String> {
        let period_end = period_end_from_epoch(remote.current_period_end)?;
        Ok(Self {
            plan: Some(plan),
            external_subscription_id: Some(remote.id.clone()),
            status: Some(remote.status.clone()),
            current_period_end: Some(period_end),
            is_active: true,
        })
    }

    /// Cancellation clears every provider-linked field at once.
    pub fn canceled() -> Self {
        Self {
            plan: None,
            external_subscription_id: None,
            status: Some("canceled".to_string()),
            current_period_end: None,
            is_active: false,
        }
    }

    /// Applies a provider status report to an existing subscription.
    pub fn refreshed(
        &self,
        remote: &ProviderSubscription,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        if TERMINAL_STATUSES.contains(&remote.status.as_str()) {
            return Ok(Self::canceled());
        }
        let period_end = period_end_from_epoch(remote.current_period_end)?;
        let grants_access = ACCESS_GRANTING_STATUSES.contains(&remote.status.as_str());
        Ok(Self {
            plan: self.plan,
            external_subscription_id: self.external_subscription_id.clone(),
            status: Some(remote.status.clone()),
            current_period_end: Some(period_end),
            is_active: grants_access
                && self.plan.is_some()
                && self.external_subscription_id.is_some()
                && period_end > now,
        })
    }
}

pub fn period_end_from_epoch(seconds: i64) -> Result<DateTime<Utc>, String> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| format!("period end `{seconds}` is not a valid timestamp"))
}

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: i32,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub profile: Value,
    #[serde(skip_serializing)]
    pub provider_customer_id: Option<String>,
    pub subscription: Subscription,
    #[serde(skip_serializing)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub profile: Value,
}
