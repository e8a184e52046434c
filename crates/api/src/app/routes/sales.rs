use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;

use tileerp_auth::Permission;
use tileerp_core::AggregateId;
use tileerp_infra::fulfillment::{ReturnRequest, ShipLine};
use tileerp_infra::streams;
use tileerp_products::{Product, ProductId};
use tileerp_sales::{
    AddLine, CompleteOrder, CreateSalesOrder, LineQuantity, OrderKind, RecordPayment, RemoveLine, SalesOrder,
    SalesOrderCommand, SalesOrderId, SetCharges,
};

use crate::app::routes::common::{parse_id, CmdAuth};
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().nest("/orders", orders_router())
}

fn orders_router() -> Router {
    Router::new()
        .route("/", post(create_sales_order).get(list_sales_orders))
        .route("/:id", get(get_sales_order))
        .route("/:id/lines", post(add_sales_order_line))
        .route("/:id/lines/:line_no", delete(remove_sales_order_line))
        .route("/:id/charges", put(set_charges))
        .route("/:id/confirm", post(confirm_sales_order))
        .route("/:id/ship", post(ship_sales_order))
        .route("/:id/payments", post(record_payment).get(list_payments))
        .route("/:id/returns", post(record_return))
        .route("/:id/complete", post(complete_sales_order))
        .route("/:id/cancel", post(cancel_sales_order))
}

fn order_response(services: &AppServices, tenant: &TenantContext, agg: AggregateId, status: StatusCode) -> axum::response::Response {
    match services.projections().sales_orders.get(tenant.tenant_id(), &SalesOrderId::new(agg)) {
        Some(rm) => (status, Json(dto::sales_order_to_json(rm))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found"),
    }
}

fn load_order(services: &AppServices, tenant: &TenantContext, agg: AggregateId) -> Result<SalesOrder, axum::response::Response> {
    let order = services
        .load::<SalesOrder>(tenant.tenant_id(), agg, |_, id| SalesOrder::empty(SalesOrderId::new(id)))
        .map_err(errors::dispatch_error_to_response)?;
    if !order.is_created() {
        return Err(errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found"));
    }
    Ok(order)
}

/// Convert requested line quantities to pieces using each line's pack size.
fn line_pieces(
    order: &SalesOrder,
    lines: &[dto::LineQuantityRequest],
) -> Result<Vec<(u32, u64, Option<String>)>, axum::response::Response> {
    lines
        .iter()
        .map(|req| {
            let line = order.line(req.line_no).ok_or_else(|| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("line {} does not exist", req.line_no),
                )
            })?;
            let pieces = dto::to_pieces(&req.quantity, line.pieces_per_unit)?;
            Ok((req.line_no, pieces, req.batch_no.clone()))
        })
        .collect()
}

pub async fn create_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateSalesOrderRequest>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let agg = AggregateId::new();

    // Checked before a number is taken from the sequence.
    if let Err(resp) = CmdAuth::new((), Permission::SALES_WRITE).authorized(&tenant, &principal) {
        return resp;
    }

    let order_no = match services.next_order_number(tenant_id) {
        Ok(n) => n,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    let cmd = SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
        tenant_id,
        order_id: SalesOrderId::new(agg),
        order_no,
        kind: body.kind,
        customer: body.customer,
        note: body.note,
        occurred_at: Utc::now(),
    });

    if let Err(e) = services.dispatch::<SalesOrder>(tenant_id, agg, streams::SALES_ORDER, cmd, |_, id| {
        SalesOrder::empty(SalesOrderId::new(id))
    }) {
        return errors::dispatch_error_to_response(e);
    }

    order_response(&services, &tenant, agg, StatusCode::CREATED)
}

/// Copies sku, name and pack size from the catalogue; prices default to it.
pub async fn add_sales_order_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddLineRequest>,
) -> axum::response::Response {
    let tenant_id = tenant.tenant_id();
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_agg = match parse_id(&body.product_id, "product") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let order = match load_order(&services, &tenant, agg) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    let product = match services.load::<Product>(tenant_id, product_agg, |_, id| Product::empty(ProductId::new(id))) {
        Ok(p) if p.is_created() => p,
        Ok(_) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
        Err(e) => return errors::dispatch_error_to_response(e),
    };
    if !product.can_be_sold() {
        return errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            format!("product '{}' is not active", product.sku()),
        );
    }

    let quantity = match dto::to_pieces(&body.quantity, product.pieces_per_unit()) {
        Ok(q) => q,
        Err(resp) => return resp,
    };
    let unit_price = body.unit_price.or(product.pricing().price_per_piece).unwrap_or(0);
    // A transfer line is costed by its supplier, never by the catalogue.
    let unit_cost = match order.kind() {
        OrderKind::Stock => body.unit_cost.or(product.pricing().cost_per_piece),
        OrderKind::Transfer => body.unit_cost,
    };

    let cmd = SalesOrderCommand::AddLine(AddLine {
        tenant_id,
        order_id: SalesOrderId::new(agg),
        product_id: ProductId::new(product_agg),
        sku: product.sku().to_string(),
        name: product.name().to_string(),
        pieces_per_unit: product.pieces_per_unit(),
        quantity,
        unit_price,
        unit_cost,
        supplier: body.supplier,
        occurred_at: Utc::now(),
    });
    order_command(&services, &tenant, &principal, agg, cmd, Permission::SALES_WRITE)
}

pub async fn remove_sales_order_line(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, line_no)): Path<(String, u32)>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::RemoveLine(RemoveLine {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        line_no,
        occurred_at: Utc::now(),
    });
    order_command(&services, &tenant, &principal, agg, cmd, Permission::SALES_WRITE)
}

pub async fn set_charges(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::SetChargesRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::SetCharges(SetCharges {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        discount: body.discount,
        freight: body.freight,
        occurred_at: Utc::now(),
    });
    order_command(&services, &tenant, &principal, agg, cmd, Permission::SALES_WRITE)
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordPaymentRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::RecordPayment(RecordPayment {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        amount: body.amount,
        method: body.method,
        note: body.note,
        occurred_at: Utc::now(),
    });
    order_command(&services, &tenant, &principal, agg, cmd, Permission::SALES_PAYMENTS)
}

pub async fn complete_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = SalesOrderCommand::CompleteOrder(CompleteOrder {
        tenant_id: tenant.tenant_id(),
        order_id: SalesOrderId::new(agg),
        occurred_at: Utc::now(),
    });
    order_command(&services, &tenant, &principal, agg, cmd, Permission::SALES_WRITE)
}

/// Authorize, dispatch and answer with the updated order.
fn order_command(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    agg: AggregateId,
    cmd: SalesOrderCommand,
    permission: &'static str,
) -> axum::response::Response {
    let cmd = match CmdAuth::new(cmd, permission).authorized(tenant, principal) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    if let Err(e) = services.dispatch::<SalesOrder>(tenant.tenant_id(), agg, streams::SALES_ORDER, cmd, |_, id| {
        SalesOrder::empty(SalesOrderId::new(id))
    }) {
        return errors::dispatch_error_to_response(e);
    }

    order_response(services, tenant, agg, StatusCode::OK)
}

/// Stock orders reserve inventory for every line before they are confirmed.
pub async fn confirm_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = CmdAuth::new((), Permission::SALES_WRITE).authorized(&tenant, &principal) {
        return resp;
    }

    let tenant_id = tenant.tenant_id();
    match services.fulfil(|f| f.confirm_order(tenant_id, SalesOrderId::new(agg), Utc::now())) {
        Ok(_) => order_response(&services, &tenant, agg, StatusCode::OK),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub async fn ship_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ShipOrderRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = CmdAuth::new((), Permission::SALES_WRITE).authorized(&tenant, &principal) {
        return resp;
    }

    let order = match load_order(&services, &tenant, agg) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    let lines: Vec<ShipLine> = match line_pieces(&order, &body.lines) {
        Ok(lines) => lines
            .into_iter()
            .map(|(line_no, quantity, batch_no)| ShipLine {
                line_no,
                quantity,
                batch_no,
            })
            .collect(),
        Err(resp) => return resp,
    };

    let tenant_id = tenant.tenant_id();
    match services.fulfil(|f| f.ship_order(tenant_id, SalesOrderId::new(agg), &lines, Utc::now())) {
        Ok(_) => order_response(&services, &tenant, agg, StatusCode::OK),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub async fn record_return(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordReturnRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = CmdAuth::new((), Permission::SALES_WRITE).authorized(&tenant, &principal) {
        return resp;
    }

    let order = match load_order(&services, &tenant, agg) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    let lines = match line_pieces(&order, &body.lines) {
        Ok(lines) => lines
            .into_iter()
            .map(|(line_no, quantity, _)| LineQuantity { line_no, quantity })
            .collect(),
        Err(resp) => return resp,
    };
    let request = ReturnRequest {
        lines,
        refund_amount: body.refund_amount,
        reason: body.reason,
        restock: body.restock,
    };

    let tenant_id = tenant.tenant_id();
    match services.fulfil(|f| f.return_order(tenant_id, SalesOrderId::new(agg), &request, Utc::now())) {
        Ok(_) => order_response(&services, &tenant, agg, StatusCode::OK),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

/// Cancelling releases whatever stock the order still holds.
pub async fn cancel_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelOrderRequest>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = CmdAuth::new((), Permission::SALES_WRITE).authorized(&tenant, &principal) {
        return resp;
    }

    let tenant_id = tenant.tenant_id();
    match services.fulfil(|f| f.cancel_order(tenant_id, SalesOrderId::new(agg), &body.reason, Utc::now())) {
        Ok(_) => order_response(&services, &tenant, agg, StatusCode::OK),
        Err(e) => errors::fulfillment_error_to_response(e),
    }
}

pub async fn get_sales_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    order_response(&services, &tenant, agg, StatusCode::OK)
}

pub async fn list_payments(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let agg = match parse_id(&id, "order") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.projections().sales_orders.get(tenant.tenant_id(), &SalesOrderId::new(agg)) {
        Some(rm) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "order_no": rm.order_no,
                "payments": rm.payments,
                "paid": rm.totals.paid,
                "refunded": rm.totals.refunded,
                "net_paid": rm.totals.net_paid,
                "balance_due": rm.totals.balance_due,
                "payment_status": rm.totals.payment_status,
            })),
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "sales order not found"),
    }
}

pub async fn list_sales_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<dto::SalesOrderListQuery>,
) -> axum::response::Response {
    let (filter, page) = query.into_parts();
    let page = services.projections().sales_orders.list_filtered(tenant.tenant_id(), &filter, &page);
    (StatusCode::OK, Json(dto::page_to_json(page, dto::sales_order_to_json))).into_response()
}
