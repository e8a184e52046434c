use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;

use tileerp_auth::Permission;
use tileerp_core::AggregateId;
use tileerp_infra::streams;
use tileerp_products::{
    ActivateProduct, ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, UpdatePricing,
    UpdateProductDetails,
};

use crate::app::routes::common::{parse_id, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product).put(update_product))
        .route("/:id/pricing", put(update_pricing))
        .route("/:id/activate", post(activate_product))
        .route("/:id/archive", post(archive_product))
}

/// Creates the product and opens its inventory item under the same id.
pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> axum::response::Response {
    let agg = AggregateId::new();

    let cmd = CreateProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        sku: body.sku,
        name: body.name,
        category: body.category,
        specification: body.specification,
        pieces_per_unit: body.pieces_per_unit,
        unit_label: body.unit_label.unwrap_or_else(|| dto::DEFAULT_UNIT_LABEL.to_string()),
        pricing: body.pricing,
        min_stock_units: body.min_stock_units,
        max_stock_units: body.max_stock_units,
        occurred_at: Utc::now(),
    };

    let cmd = match CmdAuth::new(cmd, Permission::PRODUCTS_WRITE).authorized(&tenant, &principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.create_product(cmd) {
        Ok(committed) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "id": agg.to_string(),
                "events_committed": committed.len(),
            })),
        )
            .into_response(),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateProductRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::UpdateProductDetails(UpdateProductDetails {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        name: body.name,
        category: body.category,
        specification: body.specification,
        unit_label: body.unit_label,
        min_stock_units: body.min_stock_units,
        max_stock_units: body.max_stock_units,
        occurred_at: Utc::now(),
    });
    product_command(&services, &tenant, &principal, agg, cmd)
}

pub async fn update_pricing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdatePricingRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::UpdatePricing(UpdatePricing {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        price_per_piece: body.price_per_piece,
        cost_per_piece: body.cost_per_piece,
        currency: body.currency,
        occurred_at: Utc::now(),
    });
    product_command(&services, &tenant, &principal, agg, cmd)
}

pub async fn activate_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::ActivateProduct(ActivateProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });
    product_command(&services, &tenant, &principal, agg, cmd)
}

pub async fn archive_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = ProductCommand::ArchiveProduct(ArchiveProduct {
        tenant_id: tenant.tenant_id(),
        product_id: ProductId::new(agg),
        occurred_at: Utc::now(),
    });
    product_command(&services, &tenant, &principal, agg, cmd)
}

/// Authorize, dispatch and answer with the updated catalogue row.
fn product_command(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: ProductCommand,
) -> axum::response::Response {
    let cmd = match CmdAuth::new(cmd, Permission::PRODUCTS_WRITE).authorized(tenant, principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    if let Err(e) = services.dispatch::<Product>(tenant.tenant_id(), agg, streams::PRODUCT, cmd, |_, id| {
        Product::empty(ProductId::new(id))
    }) {
        return errors::dispatch_error_to_response(e);
    }

    match services.projections().products.get(tenant.tenant_id(), &ProductId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.projections().products.get(tenant.tenant_id(), &ProductId::new(agg)) {
        Some(rm) => (StatusCode::OK, Json(dto::product_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
    }
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::ProductListQuery>,
) -> axum::response::Response {
    let (filter, page) = query.into_parts();
    let page = services.projections().products.list_filtered(tenant.tenant_id(), &filter, &page);
    (StatusCode::OK, Json(dto::page_to_json(page, dto::product_to_json))).into_response()
}
