use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use tileerp_infra::projections::{
    InventoryReadModel, LedgerDirection, LedgerEntry, ProductReadModel, SalesOrderReadModel, SettingsReadModel,
};
use tileerp_infra::query::{LedgerFilter, Page, PageRequest, ProductFilter, SalesOrderFilter};
use tileerp_inventory::{InboundKind, InventoryItemId, OutboundKind, PiecesPerUnit, Quantity};
use tileerp_products::{Pricing, ProductStatus};
use tileerp_sales::{Customer, OrderKind, PaymentMethod, SalesOrderStatus};

use crate::app::errors;

pub const DEFAULT_UNIT_LABEL: &str = "box";

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub pieces_per_unit: u32,
    pub unit_label: Option<String>,
    #[serde(default)]
    pub pricing: Pricing,
    pub min_stock_units: Option<u64>,
    pub max_stock_units: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub unit_label: Option<String>,
    pub min_stock_units: Option<u64>,
    pub max_stock_units: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePricingRequest {
    pub price_per_piece: Option<u64>,
    pub cost_per_piece: Option<u64>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    pub quantity: Quantity,
    pub batch_no: String,
    pub unit_cost: Option<u64>,
    #[serde(default = "default_inbound_kind")]
    pub kind: InboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
}

fn default_inbound_kind() -> InboundKind {
    InboundKind::Purchase
}

#[derive(Debug, Deserialize)]
pub struct OutboundRequest {
    pub quantity: Quantity,
    pub batch_no: Option<String>,
    #[serde(default = "default_outbound_kind")]
    pub kind: OutboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
}

fn default_outbound_kind() -> OutboundKind {
    OutboundKind::Sale
}

/// Signed mixed quantity for stocktake corrections.
#[derive(Debug, Default, Deserialize)]
pub struct QuantityDelta {
    #[serde(default)]
    pub units: i64,
    #[serde(default)]
    pub pieces: i64,
}

impl QuantityDelta {
    pub fn to_pieces(&self, per_unit: PiecesPerUnit) -> Option<i64> {
        self.units
            .checked_mul(i64::from(per_unit.get()))
            .and_then(|p| p.checked_add(self.pieces))
    }
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub batch_no: String,
    pub delta: QuantityDelta,
    pub reason: String,
}

/// Either an item (its pack size is used) or an explicit pack size.
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub item_id: Option<String>,
    pub pieces_per_unit: Option<u32>,
    pub quantity: Quantity,
}

#[derive(Debug, Deserialize)]
pub struct CreateSalesOrderRequest {
    #[serde(default = "default_order_kind")]
    pub kind: OrderKind,
    pub customer: Customer,
    pub note: Option<String>,
}

fn default_order_kind() -> OrderKind {
    OrderKind::Stock
}

/// Prices default to the catalogue price and cost of the product.
#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub product_id: String,
    pub quantity: Quantity,
    pub unit_price: Option<u64>,
    pub unit_cost: Option<u64>,
    pub supplier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetChargesRequest {
    #[serde(default)]
    pub discount: u64,
    #[serde(default)]
    pub freight: u64,
}

#[derive(Debug, Deserialize)]
pub struct LineQuantityRequest {
    pub line_no: u32,
    pub quantity: Quantity,
    pub batch_no: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ShipOrderRequest {
    pub lines: Vec<LineQuantityRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount: u64,
    #[serde(default = "default_payment_method")]
    pub method: PaymentMethod,
    pub note: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Cash
}

#[derive(Debug, Deserialize)]
pub struct RecordReturnRequest {
    pub lines: Vec<LineQuantityRequest>,
    #[serde(default)]
    pub refund_amount: u64,
    pub reason: String,
    #[serde(default = "default_restock")]
    pub restock: bool,
}

fn default_restock() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub company_name: Option<String>,
    pub currency: Option<String>,
    pub order_number_prefix: Option<String>,
    pub default_low_stock_units: Option<u64>,
}

// -------------------------
// Query strings
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    pub search: Option<String>,
    pub status: Option<ProductStatus>,
    pub category: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ProductListQuery {
    pub fn into_parts(self) -> (ProductFilter, PageRequest) {
        let page = PageRequest::new(self.page, self.per_page);
        let filter = ProductFilter {
            search: self.search,
            status: self.status,
            category: self.category,
        };
        (filter, page)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SalesOrderListQuery {
    pub status: Option<SalesOrderStatus>,
    pub kind: Option<OrderKind>,
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl SalesOrderListQuery {
    pub fn into_parts(self) -> (SalesOrderFilter, PageRequest) {
        let page = PageRequest::new(self.page, self.per_page);
        let filter = SalesOrderFilter {
            status: self.status,
            kind: self.kind,
            search: self.search,
            created_from: self.created_from,
            created_to: self.created_to,
        };
        (filter, page)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LedgerQuery {
    pub item_id: Option<InventoryItemId>,
    pub direction: Option<LedgerDirection>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl LedgerQuery {
    pub fn into_parts(self) -> (LedgerFilter, PageRequest) {
        let page = PageRequest::new(self.page, self.per_page);
        let filter = LedgerFilter {
            item_id: self.item_id,
            direction: self.direction,
            from: self.from,
            to: self.to,
        };
        (filter, page)
    }
}

// -------------------------
// Quantity helpers
// -------------------------

pub fn pack_size(pieces_per_unit: u32) -> Result<PiecesPerUnit, axum::response::Response> {
    PiecesPerUnit::new(pieces_per_unit)
        .map_err(|e| errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_pack_size", e.to_string()))
}

/// Mixed entry to pieces for a given pack size.
pub fn to_pieces(quantity: &Quantity, pieces_per_unit: u32) -> Result<u64, axum::response::Response> {
    let ppu = pack_size(pieces_per_unit)?;
    quantity
        .to_pieces(ppu)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()))
}

/// `{ "pieces": n, "units": u, "loose_pieces": p }` for a piece count.
pub fn quantity_json(pieces: u64, pieces_per_unit: u32) -> JsonValue {
    let normalized = match PiecesPerUnit::new(pieces_per_unit) {
        Ok(ppu) => Quantity::from_pieces(pieces, ppu),
        Err(_) => Quantity::pieces_only(pieces),
    };
    json!({
        "pieces": pieces,
        "units": normalized.units,
        "loose_pieces": normalized.pieces,
    })
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn page_to_json<T>(page: Page<T>, item: impl Fn(T) -> JsonValue) -> JsonValue {
    json!({
        "items": page.items.into_iter().map(item).collect::<Vec<_>>(),
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "total_pages": page.total_pages,
    })
}

pub fn product_to_json(rm: ProductReadModel) -> JsonValue {
    json!({
        "id": rm.product_id.0.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "category": rm.category,
        "specification": rm.specification,
        "pieces_per_unit": rm.pieces_per_unit,
        "unit_label": rm.unit_label,
        "pricing": rm.pricing,
        "min_stock_units": rm.min_stock_units,
        "max_stock_units": rm.max_stock_units,
        "status": rm.status,
        "created_at": rm.created_at,
        "updated_at": rm.updated_at,
    })
}

pub fn inventory_to_json(rm: InventoryReadModel) -> JsonValue {
    let ppu = rm.pieces_per_unit;
    json!({
        "id": rm.item_id.0.to_string(),
        "sku": rm.sku,
        "name": rm.name,
        "pieces_per_unit": ppu,
        "on_hand": quantity_json(rm.on_hand, ppu),
        "reserved": quantity_json(rm.reserved, ppu),
        "available": quantity_json(rm.available, ppu),
        "batches": rm.batches.iter().map(|b| json!({
            "batch_no": b.batch_no,
            "on_hand": quantity_json(b.on_hand, ppu),
            "unit_cost": b.unit_cost,
            "received_at": b.received_at,
        })).collect::<Vec<_>>(),
        "reservations": rm.reservations,
        "updated_at": rm.updated_at,
    })
}

/// `pieces_per_unit` is `None` when the item is no longer in the stock read model.
pub fn ledger_entry_to_json(entry: LedgerEntry, pieces_per_unit: Option<u32>) -> JsonValue {
    let quantity = match pieces_per_unit {
        Some(ppu) => quantity_json(entry.quantity, ppu),
        None => json!({ "pieces": entry.quantity }),
    };
    json!({
        "id": entry.entry_id.to_string(),
        "item_id": entry.item_id.0.to_string(),
        "sku": entry.sku,
        "direction": entry.direction,
        "kind": entry.kind,
        "quantity": quantity,
        "batches": entry.batches,
        "unit_cost": entry.unit_cost,
        "reference": entry.reference,
        "note": entry.note,
        "on_hand_after": entry.on_hand_after,
        "occurred_at": entry.occurred_at,
        "sequence_number": entry.sequence_number,
    })
}

pub fn sales_order_to_json(rm: SalesOrderReadModel) -> JsonValue {
    json!({
        "id": rm.order_id.0.to_string(),
        "order_no": rm.order_no,
        "kind": rm.kind,
        "status": rm.status,
        "customer": rm.customer,
        "note": rm.note,
        "lines": rm.lines.iter().map(|l| {
            let figures = rm.line_figures.iter().find(|f| f.line_no == l.line_no);
            json!({
                "line_no": l.line_no,
                "product_id": l.product_id.0.to_string(),
                "sku": l.sku,
                "name": l.name,
                "quantity": quantity_json(l.quantity, l.pieces_per_unit),
                "shipped": quantity_json(l.shipped, l.pieces_per_unit),
                "returned": quantity_json(l.returned, l.pieces_per_unit),
                "unit_price": l.unit_price,
                "unit_cost": l.unit_cost,
                "supplier": l.supplier,
                "revenue": figures.map(|f| f.revenue),
                "cost": figures.map(|f| f.cost),
                "profit": figures.map(|f| f.profit),
            })
        }).collect::<Vec<_>>(),
        "discount": rm.discount,
        "freight": rm.freight,
        "shipments": rm.shipments,
        "payments": rm.payments,
        "returns": rm.returns,
        "totals": rm.totals,
        "cancel_reason": rm.cancel_reason,
        "created_at": rm.created_at,
        "updated_at": rm.updated_at,
    })
}

pub fn settings_to_json(rm: SettingsReadModel) -> JsonValue {
    json!({
        "company_name": rm.company_name,
        "currency": rm.currency,
        "order_number_prefix": rm.order_number_prefix,
        "default_low_stock_units": rm.default_low_stock_units,
        "last_order_no": rm.last_order_no,
        "updated_at": rm.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_are_reported_in_pieces_and_units() {
        assert_eq!(
            quantity_json(14, 4),
            json!({ "pieces": 14, "units": 3, "loose_pieces": 2 })
        );
    }

    #[test]
    fn negative_deltas_convert_through_the_pack_size() {
        let delta = QuantityDelta { units: -2, pieces: 1 };
        assert_eq!(delta.to_pieces(PiecesPerUnit::new(6).unwrap()), Some(-11));
    }

    #[test]
    fn list_queries_fall_back_to_default_paging() {
        let (filter, page) = SalesOrderListQuery::default().into_parts();
        assert_eq!(filter, SalesOrderFilter::default());
        assert_eq!(page.per_page, 20);
        assert_eq!(page.page, 1);
    }
}
