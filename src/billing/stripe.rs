use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::adapters::{GatewayError, PaymentGateway, ProviderPrice, ProviderSubscription};

const PRICE_PAGE_SIZE: &str = "100";

/// key: billing-adapter-stripe -> REST client
///
/// Talks to the Stripe v1 API (or anything speaking the same wire format,
/// such as a local mock) using form-encoded bodies and a bearer secret key.
pub struct StripeGateway {
    base: Url,
    secret_key: String,
    client: Client,
}

impl StripeGateway {
    pub fn new(base: impl Into<String>, secret_key: impl Into<String>) -> Result<Self, GatewayError> {
        let base = base.into();
        let base = Url::parse(&base)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| GatewayError::InvalidEndpoint(base.clone()))?;
        Ok(Self {
            base,
            secret_key: secret_key.into(),
            client: Client::builder().timeout(Duration::from_secs(20)).build()?,
        })
    }

    /// Builds `{base}/v1/{segments..}`. Each segment is percent-encoded on
    /// its own, so ids can never add path components or a query.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, GatewayError> {
        Ok(self
            .client
            .request(method, self.endpoint(segments)?)
            .bearer_auth(&self.secret_key))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()));
    }

    let envelope = response.json::<ErrorEnvelope>().await.ok();
    let (code, message) = match envelope {
        Some(ErrorEnvelope { error }) => (
            error.code,
            error
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string()),
        ),
        None => (None, status.to_string()),
    };
    debug!(status = status.as_u16(), ?code, %message, "provider returned error");
    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(message));
    }
    Err(GatewayError::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SubscriptionObject {
    id: String,
    status: String,
    current_period_end: Option<i64>,
    items: Option<List<SubscriptionItem>>,
    #[serde(default)]
    latest_invoice: Value,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    current_period_end: Option<i64>,
}

impl TryFrom<SubscriptionObject> for ProviderSubscription {
    type Error = GatewayError;

    fn try_from(object: SubscriptionObject) -> Result<Self, Self::Error> {
        // Newer API versions only report the period on the subscription items.
        let current_period_end = object
            .current_period_end
            .or_else(|| {
                object
                    .items
                    .as_ref()
                    .and_then(|items| items.data.iter().find_map(|item| item.current_period_end))
            })
            .ok_or_else(|| {
                GatewayError::Decode(format!("subscription `{}` has no period end", object.id))
            })?;
        let client_secret = object.latest_invoice["payment_intent"]["client_secret"]
            .as_str()
            .map(str::to_string);
        Ok(ProviderSubscription {
            id: object.id,
            status: object.status,
            current_period_end,
            client_secret,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PriceObject {
    id: String,
    unit_amount: Option<i64>,
    currency: String,
    recurring: Option<Recurring>,
    #[serde(default)]
    product: Value,
}

#[derive(Debug, Deserialize)]
struct Recurring {
    interval: String,
}

impl From<PriceObject> for ProviderPrice {
    fn from(price: PriceObject) -> Self {
        // `product` is an id unless the list call expanded it.
        let (product_name, metadata) = match &price.product {
            Value::Object(product) => {
                let name = product
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let metadata = product
                    .get("metadata")
                    .and_then(Value::as_object)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|(key, value)| {
                                value.as_str().map(|value| (key.clone(), value.to_string()))
                            })
                            .collect::<HashMap<_, _>>()
                    })
                    .unwrap_or_default();
                (name, metadata)
            }
            Value::String(id) => (id.clone(), HashMap::new()),
            _ => (String::new(), HashMap::new()),
        };
        ProviderPrice {
            id: price.id,
            product_name,
            unit_amount: price.unit_amount,
            currency: price.currency,
            interval: price.recurring.map(|recurring| recurring.interval),
            metadata,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, email: &str, name: &str) -> Result<String, GatewayError> {
        let customer: IdOnly = self
            .send(
                self.request(Method::POST, &["customers"])?
                    .form(&[("email", email), ("name", name)]),
            )
            .await?;
        Ok(customer.id)
    }

    async fn attach_payment_method(
        &self,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<(), GatewayError> {
        let _: IdOnly = self
            .send(
                self.request(
                    Method::POST,
                    &["payment_methods", payment_method, "attach"],
                )?
                .form(&[("customer", customer_id)]),
            )
            .await?;
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<(), GatewayError> {
        let _: IdOnly = self
            .send(
                self.request(Method::POST, &["customers", customer_id])?
                    .form(&[("invoice_settings[default_payment_method]", payment_method)]),
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        let subscription: SubscriptionObject = self
            .send(
                self.request(Method::POST, &["subscriptions"])?
                    .header("Idempotency-Key", idempotency_key)
                    .form(&[
                        ("customer", customer_id),
                        ("items[0][price]", price_id),
                        ("expand[]", "latest_invoice.payment_intent"),
                    ]),
            )
            .await?;
        subscription.try_into()
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), GatewayError> {
        let _: IdOnly = self
            .send(self.request(Method::DELETE, &["subscriptions", subscription_id])?)
            .await?;
        Ok(())
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        let subscription: SubscriptionObject = self
            .send(self.request(Method::GET, &["subscriptions", subscription_id])?)
            .await?;
        subscription.try_into()
    }

    async fn list_active_prices(&self) -> Result<Vec<ProviderPrice>, GatewayError> {
        let mut prices = Vec::new();
        let mut starting_after: Option<String> = None;
        loop {
            let mut query = vec![
                ("active", "true".to_string()),
                ("limit", PRICE_PAGE_SIZE.to_string()),
                ("expand[]", "data.product".to_string()),
            ];
            if let Some(cursor) = &starting_after {
                query.push(("starting_after", cursor.clone()));
            }
            let page: List<PriceObject> = self
                .send(self.request(Method::GET, &["prices"])?.query(&query))
                .await?;
            let has_more = page.has_more;
            starting_after = page.data.last().map(|price| price.id.clone());
            prices.extend(page.data.into_iter().map(ProviderPrice::from));
            if !has_more || starting_after.is_none() {
                break;
            }
        }
        Ok(prices)
    }
}
