use axum::Router;

use crate::{auth, billing, practice_tests};

pub fn api_routes() -> Router {
    Router::new()
        .merge(auth::routes())
        .merge(billing::api::routes())
        .merge(practice_tests::routes())
}
