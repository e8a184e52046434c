use axum::{routing::get, Router};

pub mod common;
pub mod inventory;
pub mod products;
pub mod sales;
pub mod settings;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .route("/settings", get(settings::get_settings).put(settings::update_settings))
        .nest("/products", products::router())
        .nest("/inventory", inventory::router())
        .nest("/sales", sales::router())
}
