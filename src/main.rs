use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use mentorq_backend::accounts::{AccountStore, PgAccountStore};
use mentorq_backend::billing::{
    spawn_reconciliation_sweep, PaymentGateway, StripeGateway, SubscriptionReconciler,
};
use mentorq_backend::config;
use mentorq_backend::routes::api_routes;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

async fn root() -> &'static str {
    "MentorQ API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let secret_key = config::STRIPE_SECRET_KEY
        .clone()
        .ok_or("STRIPE_SECRET_KEY must be set")?;
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(StripeGateway::new(config::STRIPE_API_BASE.as_str(), secret_key)?);

    let prices = config::tier_price_map();
    for tier in prices.missing_tiers() {
        tracing::warn!(
            %tier,
            env = config::price_env_var(tier),
            "no provider price configured; subscriptions to this tier will be refused"
        );
    }

    let store: Arc<dyn AccountStore> = Arc::new(PgAccountStore::new(pool.clone()));
    let reconciler = SubscriptionReconciler::new(store.clone(), gateway, prices);
    spawn_reconciliation_sweep(reconciler.clone(), *config::BILLING_RECONCILE_INTERVAL_SECS);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(store))
        .layer(Extension(reconciler));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
