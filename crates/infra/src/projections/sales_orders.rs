use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use tileerp_core::TenantId;
use tileerp_events::EventEnvelope;
use tileerp_sales::totals::{self, LineFigures, OrderTotals};
use tileerp_sales::{
    Customer, LineQuantity, OrderKind, PaymentRecord, ReturnRecord, SalesOrderEvent, SalesOrderId, SalesOrderLine,
    SalesOrderStatus, ShippedBatch,
};

use super::{decode, ensure_same_tenant, ProjectionError, StreamCursors};
use crate::query::{paginate, Page, PageRequest, SalesOrderFilter};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShipmentReadModel {
    pub shipment_no: String,
    pub lines: Vec<LineQuantity>,
    pub batches: Vec<ShippedBatch>,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesOrderReadModel {
    pub order_id: SalesOrderId,
    pub order_no: String,
    pub kind: OrderKind,
    pub status: SalesOrderStatus,
    pub customer: Customer,
    pub note: Option<String>,
    pub lines: Vec<SalesOrderLine>,
    /// Revenue, cost and profit per line on the quantity kept.
    pub line_figures: Vec<LineFigures>,
    pub discount: u64,
    pub freight: u64,
    pub shipments: Vec<ShipmentReadModel>,
    pub payments: Vec<PaymentRecord>,
    pub returns: Vec<ReturnRecord>,
    pub totals: OrderTotals,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SalesOrderReadModel {
    fn refresh_totals(&mut self) {
        self.line_figures = self.lines.iter().map(LineFigures::of).collect();
        self.totals = totals::compute(&self.lines, self.discount, self.freight, &self.payments, &self.returns);
    }
}

/// Sales orders with their rollups, one row per order.
#[derive(Debug)]
pub struct SalesOrdersProjection<S>
where
    S: TenantStore<SalesOrderId, SalesOrderReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SalesOrdersProjection<S>
where
    S: TenantStore<SalesOrderId, SalesOrderReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, order_id: &SalesOrderId) -> Option<SalesOrderReadModel> {
        self.store.get(tenant_id, order_id)
    }

    /// Newest first.
    pub fn list(&self, tenant_id: TenantId) -> Vec<SalesOrderReadModel> {
        let mut orders = self.store.list(tenant_id);
        orders.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.order_no.cmp(&a.order_no))
        });
        orders
    }

    pub fn list_filtered(
        &self,
        tenant_id: TenantId,
        filter: &SalesOrderFilter,
        page: &PageRequest,
    ) -> Page<SalesOrderReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|o| filter.matches(&o.order_no, &o.customer.name, o.status, o.kind, o.created_at))
            .collect();
        paginate(matching, page)
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();

        self.cursors
            .advance_with(tenant_id, aggregate_id, envelope.sequence_number(), || {
                let ev: SalesOrderEvent = decode(envelope)?;
                let (event_tenant, order_id) = stream_of(&ev);
                ensure_same_tenant(envelope, event_tenant)?;
                if order_id.0 != aggregate_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event order_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.apply_event(tenant_id, ev);
                Ok(())
            })
    }

    fn apply_event(&self, tenant_id: TenantId, ev: SalesOrderEvent) {
        if let SalesOrderEvent::SalesOrderCreated(e) = ev {
            let mut rm = SalesOrderReadModel {
                order_id: e.order_id,
                order_no: e.order_no,
                kind: e.kind,
                status: SalesOrderStatus::Draft,
                customer: e.customer,
                note: e.note,
                lines: vec![],
                line_figures: vec![],
                discount: 0,
                freight: 0,
                shipments: vec![],
                payments: vec![],
                returns: vec![],
                totals: totals::compute(&[], 0, 0, &[], &[]),
                cancel_reason: None,
                created_at: e.occurred_at,
                updated_at: e.occurred_at,
            };
            rm.refresh_totals();
            self.store.upsert(tenant_id, e.order_id, rm);
            return;
        }

        let (_, order_id) = stream_of(&ev);
        let Some(mut rm) = self.store.get(tenant_id, &order_id) else {
            tracing::warn!(%tenant_id, %order_id, "order event before creation; skipped");
            return;
        };

        match ev {
            SalesOrderEvent::SalesOrderCreated(_) => {}
            SalesOrderEvent::LineAdded(e) => {
                rm.lines.push(e.line);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::LineRemoved(e) => {
                rm.lines.retain(|l| l.line_no != e.line_no);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::ChargesSet(e) => {
                rm.discount = e.discount;
                rm.freight = e.freight;
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                rm.status = SalesOrderStatus::Confirmed;
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::ShipmentRecorded(e) => {
                for shipped in &e.lines {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == shipped.line_no) {
                        line.shipped += shipped.quantity;
                    }
                }
                rm.status = e.status_after;
                rm.shipments.push(ShipmentReadModel {
                    shipment_no: e.shipment_no,
                    lines: e.lines,
                    batches: e.batches,
                    shipped_at: e.occurred_at,
                });
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::PaymentRecorded(e) => {
                rm.payments.push(e.payment);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::ReturnRecorded(e) => {
                for returned in &e.record.lines {
                    if let Some(line) = rm.lines.iter_mut().find(|l| l.line_no == returned.line_no) {
                        line.returned += returned.quantity;
                    }
                }
                rm.returns.push(e.record);
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderCompleted(e) => {
                rm.status = SalesOrderStatus::Completed;
                rm.updated_at = e.occurred_at;
            }
            SalesOrderEvent::OrderCancelled(e) => {
                rm.status = SalesOrderStatus::Cancelled;
                rm.cancel_reason = Some(e.reason);
                rm.updated_at = e.occurred_at;
            }
        }

        rm.refresh_totals();
        self.store.upsert(tenant_id, order_id, rm);
    }
}

fn stream_of(ev: &SalesOrderEvent) -> (TenantId, SalesOrderId) {
    match ev {
        SalesOrderEvent::SalesOrderCreated(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::LineAdded(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::LineRemoved(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::ChargesSet(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::OrderConfirmed(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::ShipmentRecorded(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::PaymentRecorded(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::ReturnRecorded(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::OrderCompleted(e) => (e.tenant_id, e.order_id),
        SalesOrderEvent::OrderCancelled(e) => (e.tenant_id, e.order_id),
    }
}
