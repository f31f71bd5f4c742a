use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Extension, Router,
};
use mentorq_backend::accounts::{AccountStore, InMemoryAccountStore};
use mentorq_backend::billing::{
    GatewayCall, MockGateway, PlanTier, ProviderPrice, SubscriptionReconciler, TierPriceMap,
};
use mentorq_backend::{auth, billing};
use serde_json::{json, Value};
use tower::ServiceExt;

// key: billing-api-tests -> http surface over in-memory store
struct TestApp {
    router: Router,
    gateway: Arc<MockGateway>,
}

fn app() -> TestApp {
    std::env::set_var("JWT_SECRET", "billing-api-secret");
    let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
    let mut metadata = HashMap::new();
    metadata.insert("features".to_string(), r#"["Unlimited mock tests"]"#.to_string());
    let gateway = Arc::new(MockGateway::new().with_prices(vec![ProviderPrice {
        id: "price_premium".to_string(),
        product_name: "Premium".to_string(),
        unit_amount: Some(99900),
        currency: "inr".to_string(),
        interval: Some("month".to_string()),
        metadata,
    }]));
    let reconciler = SubscriptionReconciler::new(
        store.clone(),
        gateway.clone(),
        TierPriceMap::new()
            .with_price(PlanTier::Basic, "price_basic")
            .with_price(PlanTier::Premium, "price_premium"),
    );
    let router = Router::new()
        .merge(auth::routes())
        .merge(billing::api::routes())
        .layer(Extension(store))
        .layer(Extension(reconciler));
    TestApp { router, gateway }
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn signed_in(router: &Router, email: &str) -> String {
    let (status, _) = call(
        router,
        post_json(
            "/api/auth/register",
            None,
            json!({"name": "Meera", "email": email, "password": "s3cret!!"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = call(
        router,
        post_json(
            "/api/auth/login",
            None,
            json!({"email": email, "password": "s3cret!!"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn subscribe_then_cancel_over_http() {
    let TestApp { router, gateway } = app();
    let token = signed_in(&router, "meera@example.com").await;

    let (status, body) = call(
        &router,
        post_json(
            "/api/payments/subscribe",
            Some(&token),
            json!({"plan": "premium", "paymentMethodId": "pm_card_visa"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["plan"], "premium");
    assert!(body["subscription_id"].as_str().unwrap().starts_with("sub_"));
    assert!(body["client_secret"].is_string());

    let (status, body) = call(&router, get("/api/payments/subscription", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_active"], true);
    assert_eq!(body["plan"], "premium");

    let (status, body) = call(&router, get("/api/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription"]["is_active"], true);
    assert!(body.get("password_hash").is_none());

    let (status, body) = call(
        &router,
        post_json("/api/payments/cancel", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (_, body) = call(&router, get("/api/payments/subscription", Some(&token))).await;
    assert_eq!(body["status"], "canceled");
    assert_eq!(body["is_active"], false);
    assert_eq!(body["external_subscription_id"], Value::Null);
    assert_eq!(gateway.live_subscriptions(), 0);
}

#[tokio::test]
async fn billing_endpoints_require_a_session() {
    let TestApp { router, gateway } = app();

    let (status, _) = call(
        &router,
        post_json(
            "/api/payments/subscribe",
            None,
            json!({"plan": "premium", "payment_method_id": "pm_card_visa"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &router,
        post_json("/api/payments/cancel", Some("not-a-jwt"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn errors_come_back_as_message_bodies() {
    let TestApp { router, .. } = app();
    let token = signed_in(&router, "errors@example.com").await;

    let (status, body) = call(
        &router,
        post_json(
            "/api/payments/subscribe",
            Some(&token),
            json!({"plan": "gold", "payment_method_id": "pm_card_visa"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("gold"));

    let (status, body) = call(
        &router,
        post_json("/api/payments/cancel", Some(&token), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "no active subscription found");
}

#[tokio::test]
async fn declined_payment_maps_to_bad_gateway() {
    let TestApp { router, gateway } = app();
    let token = signed_in(&router, "declined@example.com").await;
    gateway.fail_on(GatewayCall::AttachPaymentMethod, "Your card was declined.");

    let (status, body) = call(
        &router,
        post_json(
            "/api/payments/subscribe",
            Some(&token),
            json!({"plan": "basic", "payment_method_id": "pm_card_chargeDeclined"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Your card was declined."));

    let (_, body) = call(&router, get("/api/payments/subscription", Some(&token))).await;
    assert_eq!(body["is_active"], false);
    assert_eq!(body["plan"], Value::Null);
}

#[tokio::test]
async fn plans_are_listed_without_a_session() {
    let TestApp { router, .. } = app();

    let (status, body) = call(&router, get("/api/payments/plans", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{
            "id": "price_premium",
            "name": "Premium",
            "price": 999.0,
            "currency": "inr",
            "interval": "month",
            "features": ["Unlimited mock tests"]
        }])
    );
}

#[tokio::test]
async fn registration_rejects_duplicates_and_admin_role() {
    let TestApp { router, .. } = app();
    signed_in(&router, "dup@example.com").await;

    let (status, body) = call(
        &router,
        post_json(
            "/api/auth/register",
            None,
            json!({"name": "Meera", "email": "DUP@example.com", "password": "s3cret!!"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("already registered"));

    let (status, _) = call(
        &router,
        post_json(
            "/api/auth/register",
            None,
            json!({"name": "Root", "email": "root@example.com", "password": "s3cret!!", "role": "admin"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &router,
        post_json(
            "/api/auth/login",
            None,
            json!({"email": "dup@example.com", "password": "wrong-password"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
