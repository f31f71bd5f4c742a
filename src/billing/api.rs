use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{PlanSummary, SubscriptionReconciler, SubscriptionSummary};
use crate::accounts::Subscription;
use crate::error::AppResult;
use crate::extractor::AuthUser;

/// key: billing-api -> rest endpoints
pub fn routes() -> Router {
    Router::new()
        .route("/api/payments/plans", get(list_plans))
        .route("/api/payments/subscribe", post(subscribe))
        .route("/api/payments/cancel", post(cancel))
        .route("/api/payments/subscription", get(current_subscription))
}

pub async fn list_plans(
    Extension(reconciler): Extension<SubscriptionReconciler>,
) -> AppResult<Json<Vec<PlanSummary>>> {
    Ok(Json(reconciler.list_plans().await?))
}

pub async fn subscribe(
    Extension(reconciler): Extension<SubscriptionReconciler>,
    AuthUser { account_id, .. }: AuthUser,
    Json(payload): Json<SubscribeRequest>,
) -> AppResult<Json<SubscriptionSummary>> {
    let summary = reconciler
        .subscribe(account_id, &payload.plan, &payload.payment_method_id)
        .await?;
    Ok(Json(summary))
}

pub async fn cancel(
    Extension(reconciler): Extension<SubscriptionReconciler>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<Value>> {
    reconciler.cancel(account_id).await?;
    Ok(Json(json!({})))
}

pub async fn current_subscription(
    Extension(reconciler): Extension<SubscriptionReconciler>,
    AuthUser { account_id, .. }: AuthUser,
) -> AppResult<Json<Subscription>> {
    Ok(Json(reconciler.current_subscription(account_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub plan: String,
    #[serde(alias = "paymentMethodId")]
    pub payment_method_id: String,
}
