use httpmock::prelude::*;
use mentorq_backend::billing::{GatewayError, PaymentGateway, StripeGateway};
use serde_json::json;

// key: stripe-gateway-tests -> wire format against a mock provider
fn gateway(server: &MockServer) -> StripeGateway {
    StripeGateway::new(server.base_url(), "sk_test_123").unwrap()
}

#[tokio::test]
async fn subscription_lifecycle_uses_provider_wire_format() {
    let server = MockServer::start_async().await;

    let customer_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/customers")
                .header("authorization", "Bearer sk_test_123")
                .body_contains("email=ravi%40example.com");
            then.status(200).json_body(json!({"id": "cus_1", "object": "customer"}));
        })
        .await;

    let attach_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/payment_methods/pm_card_visa/attach")
                .body_contains("customer=cus_1");
            then.status(200).json_body(json!({"id": "pm_card_visa", "customer": "cus_1"}));
        })
        .await;

    let default_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/customers/cus_1")
                .body_contains("pm_card_visa");
            then.status(200).json_body(json!({"id": "cus_1"}));
        })
        .await;

    let create_mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/subscriptions")
                .header("idempotency-key", "subscribe-1-v1")
                .body_contains("customer=cus_1")
                .body_contains("price_premium");
            then.status(200).json_body(json!({
                "id": "sub_1",
                "status": "incomplete",
                "current_period_end": 1_700_000_000,
                "latest_invoice": {
                    "id": "in_1",
                    "payment_intent": {"id": "pi_1", "client_secret": "pi_1_secret_abc"}
                }
            }));
        })
        .await;

    let cancel_mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/subscriptions/sub_1");
            then.status(200)
                .json_body(json!({"id": "sub_1", "status": "canceled"}));
        })
        .await;

    let stripe = gateway(&server);
    let customer = stripe.create_customer("ravi@example.com", "Ravi").await.unwrap();
    assert_eq!(customer, "cus_1");
    stripe.attach_payment_method(&customer, "pm_card_visa").await.unwrap();
    stripe
        .set_default_payment_method(&customer, "pm_card_visa")
        .await
        .unwrap();
    let subscription = stripe
        .create_subscription(&customer, "price_premium", "subscribe-1-v1")
        .await
        .unwrap();
    assert_eq!(subscription.id, "sub_1");
    assert_eq!(subscription.status, "incomplete");
    assert_eq!(subscription.current_period_end, 1_700_000_000);
    assert_eq!(subscription.client_secret.as_deref(), Some("pi_1_secret_abc"));
    stripe.cancel_subscription("sub_1").await.unwrap();

    customer_mock.assert_async().await;
    attach_mock.assert_async().await;
    default_mock.assert_async().await;
    create_mock.assert_async().await;
    cancel_mock.assert_async().await;
}

#[tokio::test]
async fn period_end_falls_back_to_subscription_items() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/subscriptions/sub_9");
            then.status(200).json_body(json!({
                "id": "sub_9",
                "status": "active",
                "items": {"object": "list", "data": [{"id": "si_1", "current_period_end": 1_800_000_000}]},
                "latest_invoice": "in_9"
            }));
        })
        .await;

    let subscription = gateway(&server).retrieve_subscription("sub_9").await.unwrap();

    assert_eq!(subscription.current_period_end, 1_800_000_000);
    assert_eq!(subscription.client_secret, None);
}

#[tokio::test]
async fn provider_errors_keep_their_reason() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/payment_methods/pm_declined/attach");
            then.status(402).json_body(json!({
                "error": {
                    "type": "card_error",
                    "code": "card_declined",
                    "message": "Your card was declined."
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/subscriptions/sub_missing");
            then.status(404).json_body(json!({
                "error": {
                    "type": "invalid_request_error",
                    "code": "resource_missing",
                    "message": "No such subscription: 'sub_missing'"
                }
            }));
        })
        .await;

    let stripe = gateway(&server);
    let declined = stripe
        .attach_payment_method("cus_1", "pm_declined")
        .await
        .unwrap_err();
    match declined {
        GatewayError::Rejected {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 402);
            assert_eq!(code.as_deref(), Some("card_declined"));
            assert_eq!(message, "Your card was declined.");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let missing = stripe.retrieve_subscription("sub_missing").await.unwrap_err();
    assert!(matches!(missing, GatewayError::NotFound(_)));
}

#[tokio::test]
async fn active_prices_carry_product_details() {
    let server = MockServer::start_async().await;
    let prices_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/v1/prices")
                .query_param("active", "true")
                .query_param("limit", "100");
            then.status(200).json_body(json!({
                "object": "list",
                "has_more": false,
                "data": [
                    {
                        "id": "price_basic",
                        "unit_amount": 49900,
                        "currency": "inr",
                        "recurring": {"interval": "month"},
                        "product": {"id": "prod_1", "name": "Basic", "metadata": {"features": "[\"Chapter tests\"]"}}
                    },
                    {
                        "id": "price_once",
                        "unit_amount": 1000,
                        "currency": "inr",
                        "recurring": null,
                        "product": "prod_2"
                    }
                ]
            }));
        })
        .await;

    let prices = gateway(&server).list_active_prices().await.unwrap();

    assert_eq!(prices.len(), 2);
    assert_eq!(prices[0].product_name, "Basic");
    assert_eq!(prices[0].unit_amount, Some(49900));
    assert_eq!(prices[0].interval.as_deref(), Some("month"));
    assert_eq!(
        prices[0].metadata.get("features").map(String::as_str),
        Some("[\"Chapter tests\"]")
    );
    assert_eq!(prices[1].product_name, "prod_2");
    assert_eq!(prices[1].interval, None);
    prices_mock.assert_async().await;
}

#[tokio::test]
async fn ids_stay_inside_their_path_segment() {
    let server = MockServer::start_async().await;
    let other_customer = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/customers/cus_victim/attach");
            then.status(200).json_body(json!({"id": "cus_victim"}));
        })
        .await;
    let other_subscription = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/v1/subscriptions/sub_1");
            then.status(200).json_body(json!({"id": "sub_1", "status": "canceled"}));
        })
        .await;

    let stripe = gateway(&server);
    let attach = stripe
        .attach_payment_method("cus_me", "../customers/cus_victim")
        .await;
    let cancel = stripe.cancel_subscription("sub_1?expand[]=x/../sub_1").await;

    assert!(attach.is_err());
    assert!(cancel.is_err());
    assert_eq!(other_customer.hits_async().await, 0);
    assert_eq!(other_subscription.hits_async().await, 0);
}

#[test]
fn base_url_must_be_absolute() {
    assert!(matches!(
        StripeGateway::new("not a url", "sk_test_123"),
        Err(GatewayError::InvalidEndpoint(_))
    ));
}
