//! Order fulfilment across the sales order and inventory item streams.
//!
//! Each step is its own append, so a multi-stream operation is not atomic.
//! When a later step fails, the earlier inventory effects are reversed with
//! compensating commands before the error is returned. Every error variant
//! except [`FulfillmentError::Dispatch`] carries the events that stay
//! committed, so callers can project them like a success.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use tileerp_core::{Aggregate, TenantId};
use tileerp_events::{EventBus, EventEnvelope};
use tileerp_inventory::{
    AdjustStock, InboundKind, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId, OutboundKind,
    ReceiveStock, ReleaseReservation, ReserveStock, ShipStock,
};
use tileerp_products::ProductId;
use tileerp_sales::{
    CancelOrder, ConfirmOrder, LineQuantity, OrderKind, RecordReturn, RecordShipment, SalesOrder, SalesOrderCommand,
    SalesOrderEvent, SalesOrderId, ShippedBatch,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::streams;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Rejected before anything was committed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A step failed and the steps before it were undone.
    #[error("{cause}")]
    Reverted {
        cause: DispatchError,
        committed: Vec<StoredEvent>,
    },

    /// The operation failed and undoing its earlier steps failed too.
    #[error("{cause}; compensation failed: {compensation}")]
    CompensationFailed {
        cause: DispatchError,
        compensation: DispatchError,
        committed: Vec<StoredEvent>,
    },

    /// The order change is recorded but a stock movement that follows it is not.
    #[error("{recorded} was recorded but the stock movement failed: {cause}")]
    Incomplete {
        recorded: String,
        cause: DispatchError,
        committed: Vec<StoredEvent>,
    },
}

impl FulfillmentError {
    /// Events that stay in the store despite the failure.
    pub fn committed(&self) -> &[StoredEvent] {
        match self {
            FulfillmentError::Dispatch(_) => &[],
            FulfillmentError::Reverted { committed, .. }
            | FulfillmentError::CompensationFailed { committed, .. }
            | FulfillmentError::Incomplete { committed, .. } => committed,
        }
    }
}

/// One line of a shipment request. `batch_no` pins the batch to ship from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShipLine {
    pub line_no: u32,
    pub quantity: u64,
    #[serde(default)]
    pub batch_no: Option<String>,
}

/// Return request for [`Fulfillment::return_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    pub lines: Vec<LineQuantity>,
    pub refund_amount: u64,
    pub reason: String,
    pub restock: bool,
}

/// Inventory reservations are keyed by the order id.
pub fn reservation_reference(order_id: SalesOrderId) -> String {
    order_id.to_string()
}

/// Composes sales order and inventory commands.
///
/// Every method returns all events it committed, in commit order, so callers
/// can update read models before answering.
#[derive(Debug)]
pub struct Fulfillment<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    attempts: u32,
}

impl<S, B> Fulfillment<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, attempts: u32) -> Self {
        Self { dispatcher, attempts }
    }

    fn load_order(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<SalesOrder, DispatchError> {
        let order = self
            .dispatcher
            .load::<SalesOrder>(tenant_id, order_id.0, |_, id| SalesOrder::empty(SalesOrderId::new(id)))?;
        if !order.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(order)
    }

    fn order_command(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        command: SalesOrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch_with_retry::<SalesOrder>(
            self.attempts,
            tenant_id,
            order_id.0,
            streams::SALES_ORDER,
            command,
            |_, id| SalesOrder::empty(SalesOrderId::new(id)),
        )
    }

    fn inventory_command(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
        command: InventoryCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch_with_retry::<InventoryItem>(
            self.attempts,
            tenant_id,
            item_id.0,
            streams::INVENTORY_ITEM,
            command,
            |_, id| InventoryItem::empty(InventoryItemId::new(id)),
        )
    }

    /// Reserve stock for every line of a stock order, then confirm it.
    pub fn confirm_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let order = self.load_order(tenant_id, order_id)?;
        let confirm = SalesOrderCommand::ConfirmOrder(ConfirmOrder {
            tenant_id,
            order_id,
            occurred_at,
        });
        // Decide against current state first so nothing is reserved for an
        // order that cannot be confirmed.
        order.handle(&confirm).map_err(DispatchError::from)?;

        let reference = reservation_reference(order_id);
        let mut committed = Vec::new();
        let mut reserved: Vec<(InventoryItemId, u64)> = Vec::new();

        if order.kind() == OrderKind::Stock {
            for (product_id, quantity) in per_product(order.lines().iter().map(|l| (l.product_id, l.quantity))) {
                let item_id = InventoryItemId::new(product_id.0);
                let result = self.inventory_command(
                    tenant_id,
                    item_id,
                    InventoryCommand::ReserveStock(ReserveStock {
                        tenant_id,
                        item_id,
                        reference: reference.clone(),
                        quantity,
                        occurred_at,
                    }),
                );
                match result {
                    Ok(events) => {
                        committed.extend(events);
                        reserved.push((item_id, quantity));
                    }
                    Err(cause) => {
                        return Err(self.release_all(tenant_id, &reference, &reserved, occurred_at, cause, committed));
                    }
                }
            }
        }

        match self.order_command(tenant_id, order_id, confirm) {
            Ok(events) => committed.extend(events),
            Err(cause) => {
                return Err(self.release_all(tenant_id, &reference, &reserved, occurred_at, cause, committed));
            }
        }

        tracing::info!(%tenant_id, %order_id, reservations = reserved.len(), "order confirmed");
        Ok(committed)
    }

    fn release_all(
        &self,
        tenant_id: TenantId,
        reference: &str,
        reserved: &[(InventoryItemId, u64)],
        occurred_at: DateTime<Utc>,
        cause: DispatchError,
        mut committed: Vec<StoredEvent>,
    ) -> FulfillmentError {
        for (item_id, quantity) in reserved {
            let release = self.inventory_command(
                tenant_id,
                *item_id,
                InventoryCommand::ReleaseReservation(ReleaseReservation {
                    tenant_id,
                    item_id: *item_id,
                    reference: reference.to_string(),
                    quantity: Some(*quantity),
                    occurred_at,
                }),
            );
            match release {
                Ok(events) => committed.extend(events),
                Err(compensation) => {
                    tracing::error!(%tenant_id, %item_id, error = %compensation, "releasing reservation failed");
                    return FulfillmentError::CompensationFailed {
                        cause,
                        compensation,
                        committed,
                    };
                }
            }
        }
        FulfillmentError::Reverted { cause, committed }
    }

    /// Ship order lines. Stock orders take the goods out of inventory first;
    /// transfer orders are delivered by the supplier and only record the shipment.
    pub fn ship_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        lines: &[ShipLine],
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let order = self.load_order(tenant_id, order_id)?;
        let requested: Vec<LineQuantity> = lines
            .iter()
            .map(|l| LineQuantity {
                line_no: l.line_no,
                quantity: l.quantity,
            })
            .collect();

        let mut record = RecordShipment {
            tenant_id,
            order_id,
            lines: requested,
            batches: vec![],
            occurred_at,
        };
        order
            .handle(&SalesOrderCommand::RecordShipment(record.clone()))
            .map_err(DispatchError::from)?;

        let reference = reservation_reference(order_id);
        let mut committed = Vec::new();
        let mut shipped: Vec<(InventoryItemId, StoredEvent)> = Vec::new();

        if order.kind() == OrderKind::Stock {
            for request in lines {
                let Some(line) = order.line(request.line_no) else {
                    let cause = DispatchError::NotFound;
                    return Err(self.reverse_shipments(tenant_id, order.order_no(), &shipped, occurred_at, cause, committed));
                };
                let item_id = InventoryItemId::new(line.product_id.0);
                let result = self.inventory_command(
                    tenant_id,
                    item_id,
                    InventoryCommand::ShipStock(ShipStock {
                        tenant_id,
                        item_id,
                        quantity: request.quantity,
                        batch_no: request.batch_no.clone(),
                        kind: OutboundKind::Sale,
                        reference: Some(reference.clone()),
                        note: Some(order.order_no().to_string()),
                        occurred_at,
                    }),
                );
                let events = match result {
                    Ok(events) => events,
                    Err(cause) => {
                        return Err(self.reverse_shipments(tenant_id, order.order_no(), &shipped, occurred_at, cause, committed));
                    }
                };
                for stored in &events {
                    if let Ok(InventoryEvent::StockShipped(e)) = serde_json::from_value::<InventoryEvent>(stored.payload.clone()) {
                        record.batches.extend(e.allocations.into_iter().map(|a| ShippedBatch {
                            line_no: request.line_no,
                            batch_no: a.batch_no,
                            quantity: a.quantity,
                        }));
                    }
                    shipped.push((item_id, stored.clone()));
                }
                committed.extend(events);
            }
        }

        match self.order_command(tenant_id, order_id, SalesOrderCommand::RecordShipment(record)) {
            Ok(events) => committed.extend(events),
            Err(cause) => {
                return Err(self.reverse_shipments(tenant_id, order.order_no(), &shipped, occurred_at, cause, committed));
            }
        }

        tracing::info!(%tenant_id, %order_id, lines = lines.len(), "shipment recorded");
        Ok(committed)
    }

    /// Put shipped goods back into their batches and restore consumed reservations.
    fn reverse_shipments(
        &self,
        tenant_id: TenantId,
        order_no: &str,
        shipped: &[(InventoryItemId, StoredEvent)],
        occurred_at: DateTime<Utc>,
        cause: DispatchError,
        mut committed: Vec<StoredEvent>,
    ) -> FulfillmentError {
        for (item_id, stored) in shipped.iter().rev() {
            let Ok(InventoryEvent::StockShipped(e)) = serde_json::from_value::<InventoryEvent>(stored.payload.clone())
            else {
                continue;
            };

            let mut commands: Vec<InventoryCommand> = e
                .allocations
                .iter()
                .map(|a| {
                    InventoryCommand::AdjustStock(AdjustStock {
                        tenant_id,
                        item_id: *item_id,
                        batch_no: a.batch_no.clone(),
                        delta: a.quantity as i64,
                        reason: format!("reversal of failed shipment for {order_no}"),
                        occurred_at,
                    })
                })
                .collect();
            if let (Some(reference), true) = (e.reference.clone(), e.reservation_consumed > 0) {
                commands.push(InventoryCommand::ReserveStock(ReserveStock {
                    tenant_id,
                    item_id: *item_id,
                    reference,
                    quantity: e.reservation_consumed,
                    occurred_at,
                }));
            }

            for command in commands {
                match self.inventory_command(tenant_id, *item_id, command) {
                    Ok(events) => committed.extend(events),
                    Err(compensation) => {
                        tracing::error!(%tenant_id, %item_id, error = %compensation, "reversing shipment failed");
                        return FulfillmentError::CompensationFailed {
                            cause,
                            compensation,
                            committed,
                        };
                    }
                }
            }
        }
        FulfillmentError::Reverted { cause, committed }
    }

    /// Record a customer return. Restocked goods of stock orders go back
    /// into the batches the line shipped from, newest shipment first; pieces
    /// no recorded batch covers go to a `RETURN-<order no>` batch.
    pub fn return_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        request: &ReturnRequest,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let order = self.load_order(tenant_id, order_id)?;
        let mut committed = self.order_command(
            tenant_id,
            order_id,
            SalesOrderCommand::RecordReturn(RecordReturn {
                tenant_id,
                order_id,
                lines: request.lines.clone(),
                refund_amount: request.refund_amount,
                reason: request.reason.clone(),
                restock: request.restock,
                occurred_at,
            }),
        )?;

        if order.kind() != OrderKind::Stock || !request.restock {
            return Ok(committed);
        }

        let return_no = committed
            .iter()
            .find_map(|stored| match serde_json::from_value::<SalesOrderEvent>(stored.payload.clone()) {
                Ok(SalesOrderEvent::ReturnRecorded(e)) => Some(e.record.return_no),
                _ => None,
            })
            .unwrap_or_default();

        for (item_id, batch_no, quantity) in restock_plan(&order, &request.lines) {
            let result = self.inventory_command(
                tenant_id,
                item_id,
                InventoryCommand::ReceiveStock(ReceiveStock {
                    tenant_id,
                    item_id,
                    batch_no,
                    quantity,
                    unit_cost: None,
                    kind: InboundKind::Return,
                    reference: Some(reservation_reference(order_id)),
                    note: Some(return_no.clone()),
                    occurred_at,
                }),
            );
            match result {
                Ok(events) => committed.extend(events),
                Err(cause) => {
                    tracing::error!(%tenant_id, %order_id, %item_id, %return_no, error = %cause, "restocking return failed");
                    return Err(FulfillmentError::Incomplete {
                        recorded: format!("return {return_no}"),
                        cause,
                        committed,
                    });
                }
            }
        }

        tracing::info!(%tenant_id, %order_id, %return_no, "return restocked");
        Ok(committed)
    }

    /// Cancel an order and release whatever it still holds in inventory.
    pub fn cancel_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let order = self.load_order(tenant_id, order_id)?;
        let mut committed = self.order_command(
            tenant_id,
            order_id,
            SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                order_id,
                reason: reason.to_string(),
                occurred_at,
            }),
        )?;

        if order.kind() != OrderKind::Stock {
            return Ok(committed);
        }

        let reference = reservation_reference(order_id);
        for (product_id, _) in per_product(order.lines().iter().map(|l| (l.product_id, l.quantity))) {
            let item_id = InventoryItemId::new(product_id.0);
            let release = self
                .dispatcher
                .load::<InventoryItem>(tenant_id, item_id.0, |_, id| InventoryItem::empty(InventoryItemId::new(id)))
                .and_then(|item| {
                    if item.reserved_for(&reference) == 0 {
                        return Ok(Vec::new());
                    }
                    self.inventory_command(
                        tenant_id,
                        item_id,
                        InventoryCommand::ReleaseReservation(ReleaseReservation {
                            tenant_id,
                            item_id,
                            reference: reference.clone(),
                            quantity: None,
                            occurred_at,
                        }),
                    )
                });
            match release {
                Ok(events) => committed.extend(events),
                Err(cause) => {
                    tracing::error!(%tenant_id, %order_id, %item_id, error = %cause, "releasing cancelled order failed");
                    return Err(FulfillmentError::Incomplete {
                        recorded: format!("cancellation of {}", order.order_no()),
                        cause,
                        committed,
                    });
                }
            }
        }

        tracing::info!(%tenant_id, %order_id, "order cancelled");
        Ok(committed)
    }
}

/// Where each returned line goes back into stock: `(item, batch, pieces)`.
fn restock_plan(order: &SalesOrder, returned: &[LineQuantity]) -> Vec<(InventoryItemId, String, u64)> {
    let mut plan = Vec::new();
    for request in returned {
        let Some(line) = order.line(request.line_no) else {
            continue;
        };
        let item_id = InventoryItemId::new(line.product_id.0);
        let batches = order.return_batches(request.line_no, request.quantity);
        let covered: u64 = batches.iter().map(|b| b.quantity).sum();
        plan.extend(batches.into_iter().map(|b| (item_id, b.batch_no, b.quantity)));
        if covered < request.quantity {
            plan.push((item_id, format!("RETURN-{}", order.order_no()), request.quantity - covered));
        }
    }
    plan
}

/// Sum quantities per product, keeping first-seen order.
fn per_product(lines: impl Iterator<Item = (ProductId, u64)>) -> Vec<(ProductId, u64)> {
    let mut totals: Vec<(ProductId, u64)> = Vec::new();
    for (product_id, quantity) in lines {
        match totals.iter_mut().find(|(p, _)| *p == product_id) {
            Some((_, total)) => *total += quantity,
            None => totals.push((product_id, quantity)),
        }
    }
    totals
}
