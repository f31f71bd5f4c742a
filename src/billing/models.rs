use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// key: billing-models -> tiers,price-map,summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Basic,
    Premium,
    Elite,
}

impl PlanTier {
    pub const ALL: [PlanTier; 3] = [PlanTier::Basic, PlanTier::Premium, PlanTier::Elite];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Basic => "basic",
            PlanTier::Premium => "premium",
            PlanTier::Elite => "elite",
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(PlanTier::Basic),
            "premium" => Ok(PlanTier::Premium),
            "elite" => Ok(PlanTier::Elite),
            other => Err(format!("unknown plan tier `{other}`")),
        }
    }
}

/// Provider price identifiers keyed by tier. Built from configuration and
/// handed to the reconciler; a tier without an entry cannot be subscribed to.
#[derive(Debug, Clone, Default)]
pub struct TierPriceMap {
    prices: HashMap<PlanTier, String>,
}

impl TierPriceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, tier: PlanTier, price_id: impl Into<String>) -> Self {
        self.insert(tier, price_id);
        self
    }

    pub fn insert(&mut self, tier: PlanTier, price_id: impl Into<String>) {
        let price_id = price_id.into();
        let trimmed = price_id.trim();
        if trimmed.is_empty() {
            return;
        }
        self.prices.insert(tier, trimmed.to_string());
    }

    pub fn price_for(&self, tier: PlanTier) -> Option<&str> {
        self.prices.get(&tier).map(String::as_str)
    }

    pub fn missing_tiers(&self) -> Vec<PlanTier> {
        PlanTier::ALL
            .into_iter()
            .filter(|tier| !self.prices.contains_key(tier))
            .collect()
    }
}

/// Returned to the caller after a successful subscribe. The client secret is
/// what the front end needs to finish any payment confirmation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSummary {
    pub subscription_id: String,
    pub client_secret: Option<String>,
    pub plan: PlanTier,
}

/// key: billing-catalog-model -> plan listing entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub currency: String,
    pub interval: String,
    pub features: Vec<String>,
}
