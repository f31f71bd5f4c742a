use rust_decimal::Decimal;

use super::adapters::ProviderPrice;
use super::errors::BillingError;
use super::models::PlanSummary;

/// Product metadata key holding the plan's feature list as a JSON array of
/// strings, e.g. `["Full mock tests","Mentor chat"]`.
pub const FEATURES_METADATA_KEY: &str = "features";

/// Currencies the provider bills in whole units.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Currencies the provider bills in thousandths.
const THREE_DECIMAL_CURRENCIES: [&str; 5] = ["bhd", "jod", "kwd", "omr", "tnd"];

/// Number of decimal places in the provider's minor unit for `currency`.
pub fn minor_unit_scale(currency: &str) -> u32 {
    let currency = currency.to_ascii_lowercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        3
    } else {
        2
    }
}

/// key: billing-catalog -> provider price to plan summary
pub fn plan_summary(price: &ProviderPrice) -> Result<PlanSummary, BillingError> {
    let unit_amount = price.unit_amount.ok_or_else(|| {
        BillingError::Configuration(format!("price `{}` has no unit amount", price.id))
    })?;
    let interval = price.interval.clone().ok_or_else(|| {
        BillingError::Configuration(format!("price `{}` is not recurring", price.id))
    })?;
    let features = parse_features(price)?;
    let currency = price.currency.to_ascii_lowercase();

    Ok(PlanSummary {
        id: price.id.clone(),
        name: price.product_name.clone(),
        price: Decimal::new(unit_amount, minor_unit_scale(&currency)),
        currency,
        interval,
        features,
    })
}

pub fn parse_features(price: &ProviderPrice) -> Result<Vec<String>, BillingError> {
    let Some(raw) = price.metadata.get(FEATURES_METADATA_KEY) else {
        return Ok(Vec::new());
    };
    serde_json::from_str::<Vec<String>>(raw).map_err(|err| {
        BillingError::Configuration(format!(
            "price `{}` has malformed `{FEATURES_METADATA_KEY}` metadata: {err}",
            price.id
        ))
    })
}
