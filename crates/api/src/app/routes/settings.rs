use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;

use tileerp_auth::Permission;
use tileerp_core::AggregateId;
use tileerp_infra::streams;
use tileerp_settings::{SettingsCommand, TenantSettings, UpdateSettings};

use crate::app::routes::common::CmdAuth;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

fn settings_response(services: &AppServices, tenant: &TenantContext) -> axum::response::Response {
    match services.projections().settings.get(tenant.tenant_id()) {
        Some(rm) => (StatusCode::OK, Json(dto::settings_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "settings not initialised"),
    }
}

/// Settings are created with defaults the first time they are read.
pub async fn get_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    if let Err(e) = services.ensure_settings(tenant.tenant_id()) {
        return errors::dispatch_error_to_response(e);
    }
    settings_response(&services, &tenant)
}

pub async fn update_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::UpdateSettingsRequest>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();

    let cmd = SettingsCommand::UpdateSettings(UpdateSettings {
        tenant_id,
        company_name: body.company_name,
        currency: body.currency,
        order_number_prefix: body.order_number_prefix,
        default_low_stock_units: body.default_low_stock_units,
        occurred_at: Utc::now(),
    });
    let cmd = match CmdAuth::new(cmd, Permission::SETTINGS_WRITE).authorized(&tenant, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    if let Err(e) = services.ensure_settings(tenant_id) {
        return errors::dispatch_error_to_response(e);
    }
    if let Err(e) = services.dispatch::<TenantSettings>(
        tenant_id,
        AggregateId::for_tenant(tenant_id),
        streams::TENANT_SETTINGS,
        cmd,
        |_, id| TenantSettings::empty(id),
    ) {
        return errors::dispatch_error_to_response(e);
    }

    tracing::info!(%tenant_id, "settings updated");
    settings_response(&services, &tenant)
}
