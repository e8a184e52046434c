use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use tileerp_auth::Permission;
use tileerp_core::AggregateId;
use tileerp_infra::projections::InventoryReadModel;
use tileerp_infra::streams;
use tileerp_inventory::{
    units_to_cover, AdjustStock, InventoryCommand, InventoryItem, InventoryItemId, Quantity, ReceiveStock, ShipStock,
};

use crate::app::routes::common::{parse_id, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/items", get(list_items))
        .route("/items/:id", get(get_item))
        .route("/items/:id/availability", get(get_availability))
        .route("/items/:id/inbound", post(receive_stock))
        .route("/items/:id/outbound", post(ship_stock))
        .route("/items/:id/adjust", post(adjust_stock))
        .route("/ledger", get(list_ledger))
        .route("/alerts", get(list_alerts))
        .route("/convert", post(convert_quantity))
}

fn find_item(
    services: &AppServices,
    tenant: &TenantContext,
    id: &str,
) -> Result<(AggregateId, InventoryReadModel), axum::response::Response> {
    let agg = parse_id(id, "item")?;
    services
        .projections()
        .inventory
        .get(tenant.tenant_id(), &InventoryItemId::new(agg))
        .map(|rm| (agg, rm))
        .ok_or_else(|| errors::json_error(StatusCode::NOT_FOUND, "not_found", "item not found"))
}

pub async fn receive_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::InboundRequest>,
) -> axum::response::Response {
    let (agg, item) = match find_item(&services, &tenant, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let quantity = match dto::to_pieces(&body.quantity, item.pieces_per_unit) {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    let cmd = InventoryCommand::ReceiveStock(ReceiveStock {
        tenant_id: tenant.tenant_id(),
        item_id: InventoryItemId::new(agg),
        batch_no: body.batch_no,
        quantity,
        unit_cost: body.unit_cost,
        kind: body.kind,
        reference: body.reference,
        note: body.note,
        occurred_at: Utc::now(),
    });
    inventory_command(&services, &tenant, &principal, agg, cmd)
}

pub async fn ship_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::OutboundRequest>,
) -> axum::response::Response {
    let (agg, item) = match find_item(&services, &tenant, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let quantity = match dto::to_pieces(&body.quantity, item.pieces_per_unit) {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    let cmd = InventoryCommand::ShipStock(ShipStock {
        tenant_id: tenant.tenant_id(),
        item_id: InventoryItemId::new(agg),
        quantity,
        batch_no: body.batch_no,
        kind: body.kind,
        reference: body.reference,
        note: body.note,
        occurred_at: Utc::now(),
    });
    inventory_command(&services, &tenant, &principal, agg, cmd)
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> axum::response::Response {
    let (agg, item) = match find_item(&services, &tenant, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let ppu = match dto::pack_size(item.pieces_per_unit) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let delta = match body.delta.to_pieces(ppu) {
        Some(d) => d,
        None => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "delta is too large"),
    };

    let cmd = InventoryCommand::AdjustStock(AdjustStock {
        tenant_id: tenant.tenant_id(),
        item_id: InventoryItemId::new(agg),
        batch_no: body.batch_no,
        delta,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    inventory_command(&services, &tenant, &principal, agg, cmd)
}

/// Authorize, dispatch and answer with the item's current stock.
fn inventory_command(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: InventoryCommand,
) -> axum::response::Response {
    let cmd = match CmdAuth::new(cmd, Permission::INVENTORY_WRITE).authorized(tenant, principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let committed = match services.dispatch::<InventoryItem>(
        tenant.tenant_id(),
        agg,
        streams::INVENTORY_ITEM,
        cmd,
        |_, id| InventoryItem::empty(InventoryItemId::new(id)),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let item = services.projections().inventory.get(tenant.tenant_id(), &InventoryItemId::new(agg));
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": agg.to_string(),
            "events_committed": committed.len(),
            "stream_version": committed.last().map(|e| e.sequence_number).unwrap_or(0),
            "item": item.map(dto::inventory_to_json),
        })),
    )
        .into_response()
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match find_item(&services, &tenant, &id) {
        Ok((_, rm)) => (StatusCode::OK, Json(dto::inventory_to_json(rm))).into_response(),
        Err(resp) => resp,
    }
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let items = services.projections().inventory.list(tenant.tenant_id());
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "items": items.into_iter().map(dto::inventory_to_json).collect::<Vec<_>>(),
        })),
    )
        .into_response()
}

/// Can `?quantity` pieces (or `?units` + `?pieces`) be shipped right now?
#[derive(Debug, serde::Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default)]
    pub units: u64,
    #[serde(default)]
    pub pieces: u64,
}

pub async fn get_availability(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
    Query(query): Query<AvailabilityQuery>,
) -> axum::response::Response {
    let (_, item) = match find_item(&services, &tenant, &id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let requested = match dto::to_pieces(&Quantity::new(query.units, query.pieces), item.pieces_per_unit) {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    let thresholds = services.projections().thresholds_for(tenant.tenant_id(), &item);
    let level = tileerp_inventory::classify(item.available, item.on_hand, &thresholds);
    let ppu = item.pieces_per_unit;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "id": item.item_id.0.to_string(),
            "requested": dto::quantity_json(requested, ppu),
            "on_hand": dto::quantity_json(item.on_hand, ppu),
            "reserved": dto::quantity_json(item.reserved, ppu),
            "available": dto::quantity_json(item.available, ppu),
            "sufficient": requested <= item.available,
            "shortfall": dto::quantity_json(requested.saturating_sub(item.available), ppu),
            "level": level,
        })),
    )
        .into_response()
}

pub async fn list_ledger(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::LedgerQuery>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let (filter, page) = query.into_parts();
    let page = services.projections().ledger.page(tenant_id, &filter, &page);
    let inventory = &services.projections().inventory;

    let body = dto::page_to_json(page, |entry| {
        let ppu = inventory.get(tenant_id, &entry.item_id).map(|i| i.pieces_per_unit);
        dto::ledger_entry_to_json(entry, ppu)
    });
    (StatusCode::OK, Json(body)).into_response()
}

pub async fn list_alerts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
) -> axum::response::Response {
    let alerts = services.projections().stock_alerts(tenant.tenant_id());
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "count": alerts.len(),
            "alerts": alerts,
        })),
    )
        .into_response()
}

pub async fn convert_quantity(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Json(body): Json<dto::ConvertRequest>,
) -> axum::response::Response {
    let pieces_per_unit = match (&body.item_id, body.pieces_per_unit) {
        (Some(id), _) => match find_item(&services, &tenant, id) {
            Ok((_, item)) => item.pieces_per_unit,
            Err(resp) => return resp,
        },
        (None, Some(ppu)) => ppu,
        (None, None) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "either item_id or pieces_per_unit is required",
            );
        }
    };
    let ppu = match dto::pack_size(pieces_per_unit) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let total = match body.quantity.to_pieces(ppu) {
        Ok(t) => t,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "pieces_per_unit": pieces_per_unit,
            "total_pieces": total,
            "normalized": Quantity::from_pieces(total, ppu),
            "units_to_cover": units_to_cover(total, ppu),
        })),
    )
        .into_response()
}
