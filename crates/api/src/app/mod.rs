//! Axum router and service wiring.
//!
//! - `services.rs`: event store, bus, projections, dispatcher and fulfilment
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: request bodies and JSON mapping helpers
//! - `errors.rs`: error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (used by `main.rs` and the black-box tests).
pub async fn build_app(config: &AppConfig) -> Result<Router, services::ServicesError> {
    let jwt = Arc::new(tileerp_auth::Hs256JwtValidator::new(config.jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    let services = Arc::new(services::build_services(config).await?);

    // Outermost first: authenticate, load the tenant's read models, hand
    // handlers the services.
    let protected = routes::router().layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware))
            .layer(axum::middleware::from_fn_with_state(
                services.clone(),
                middleware::tenant_ready_middleware,
            ))
            .layer(Extension(services)),
    );

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected))
}
