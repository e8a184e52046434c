use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use tileerp_auth::JwtValidator;

use crate::app::{errors, services::AppServices};
use crate::context::{PrincipalContext, TenantContext};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut().insert(TenantContext::new(claims.tenant_id));
    req.extensions_mut().insert(PrincipalContext::from_claims(&claims));

    Ok(next.run(req).await)
}

/// Make sure the caller's tenant has its read models loaded before any
/// handler reads or writes them. Runs after [`auth_middleware`].
pub async fn tenant_ready_middleware(
    State(services): State<Arc<AppServices>>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(tenant) = req.extensions().get::<TenantContext>().copied() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if let Err(e) = services.ensure_tenant_ready(tenant.tenant_id()) {
        tracing::warn!(tenant_id = %tenant.tenant_id(), error = %e, "tenant read models unavailable");
        return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", e.to_string());
    }

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
