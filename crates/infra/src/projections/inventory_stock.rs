use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use tileerp_core::TenantId;
use tileerp_events::EventEnvelope;
use tileerp_inventory::{
    classify, units_to_cover, BatchStock, InventoryEvent, InventoryItemId, PiecesPerUnit, Quantity,
    StockLevel, StockThresholds,
};

use super::{decode, ensure_same_tenant, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

/// Current stock of one item. All quantities are pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryReadModel {
    pub item_id: InventoryItemId,
    pub sku: String,
    pub name: String,
    pub pieces_per_unit: u32,
    pub on_hand: u64,
    pub reserved: u64,
    pub available: u64,
    /// Receipt order. Emptied batches stay listed with zero on hand.
    pub batches: Vec<BatchStock>,
    pub reservations: BTreeMap<String, u64>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryReadModel {
    fn recompute(&mut self) {
        self.reservations.retain(|_, held| *held > 0);
        self.on_hand = self.batches.iter().map(|b| b.on_hand).sum();
        self.reserved = self.reservations.values().sum();
        self.available = self.on_hand.saturating_sub(self.reserved);
    }

    /// `pieces` expressed as whole units plus loose pieces for this item.
    pub fn as_units(&self, pieces: u64) -> Quantity {
        match PiecesPerUnit::new(self.pieces_per_unit) {
            Ok(ppu) => Quantity::from_pieces(pieces, ppu),
            Err(_) => Quantity::pieces_only(pieces),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockAlert {
    pub item_id: InventoryItemId,
    pub sku: String,
    pub name: String,
    pub level: StockLevel,
    pub on_hand: u64,
    pub available: u64,
    pub threshold_pieces: u64,
    /// Whole units to order to get back above the threshold.
    pub reorder_units: u64,
}

/// Stock per item, maintained from the inventory item streams.
#[derive(Debug)]
pub struct InventoryStockProjection<S>
where
    S: TenantStore<InventoryItemId, InventoryReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> InventoryStockProjection<S>
where
    S: TenantStore<InventoryItemId, InventoryReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, item_id: &InventoryItemId) -> Option<InventoryReadModel> {
        self.store.get(tenant_id, item_id)
    }

    /// All items of a tenant ordered by SKU.
    pub fn list(&self, tenant_id: TenantId) -> Vec<InventoryReadModel> {
        let mut items = self.store.list(tenant_id);
        items.sort_by(|a, b| a.sku.cmp(&b.sku));
        items
    }

    /// Items whose level calls for a reorder, lowest availability first.
    pub fn alerts(
        &self,
        tenant_id: TenantId,
        thresholds_for: impl Fn(&InventoryReadModel) -> StockThresholds,
    ) -> Vec<StockAlert> {
        let mut alerts: Vec<StockAlert> = self
            .list(tenant_id)
            .into_iter()
            .filter_map(|item| {
                let thresholds = thresholds_for(&item);
                let level = classify(item.available, item.on_hand, &thresholds);
                if !level.needs_reorder() {
                    return None;
                }
                let shortfall = (thresholds.low_pieces + 1).saturating_sub(item.available);
                let reorder_units = match PiecesPerUnit::new(item.pieces_per_unit) {
                    Ok(ppu) => units_to_cover(shortfall, ppu),
                    Err(_) => shortfall,
                };
                Some(StockAlert {
                    item_id: item.item_id,
                    sku: item.sku,
                    name: item.name,
                    level,
                    on_hand: item.on_hand,
                    available: item.available,
                    threshold_pieces: thresholds.low_pieces,
                    reorder_units,
                })
            })
            .collect();
        alerts.sort_by(|a, b| a.available.cmp(&b.available).then_with(|| a.sku.cmp(&b.sku)));
        alerts
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
                let ev: InventoryEvent = decode(envelope)?;
                ensure_same_tenant(envelope, event_tenant(&ev))?;
                if ev.item_id().0 != aggregate_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event item_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.apply_event(tenant_id, ev);
                Ok(())
            })
    }

    fn apply_event(&self, tenant_id: TenantId, ev: InventoryEvent) {
        if let InventoryEvent::ItemOpened(e) = ev {
            self.store.upsert(
                tenant_id,
                e.item_id,
                InventoryReadModel {
                    item_id: e.item_id,
                    sku: e.sku,
                    name: e.name,
                    pieces_per_unit: e.pieces_per_unit.get(),
                    on_hand: 0,
                    reserved: 0,
                    available: 0,
                    batches: vec![],
                    reservations: BTreeMap::new(),
                    updated_at: e.occurred_at,
                },
            );
            return;
        }

        let item_id = ev.item_id();
        let Some(mut rm) = self.store.get(tenant_id, &item_id) else {
            tracing::warn!(%tenant_id, %item_id, "stock movement before item was opened; skipped");
            return;
        };

        match ev {
            InventoryEvent::ItemOpened(_) => {}
            InventoryEvent::StockReceived(e) => {
                match rm.batches.iter_mut().find(|b| b.batch_no == e.batch_no) {
                    Some(batch) => {
                        batch.on_hand += e.quantity;
                        if batch.unit_cost.is_none() {
                            batch.unit_cost = e.unit_cost;
                        }
                    }
                    None => rm.batches.push(BatchStock {
                        batch_no: e.batch_no,
                        on_hand: e.quantity,
                        unit_cost: e.unit_cost,
                        received_at: e.occurred_at,
                    }),
                }
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::StockShipped(e) => {
                for alloc in &e.allocations {
                    if let Some(batch) = rm.batches.iter_mut().find(|b| b.batch_no == alloc.batch_no) {
                        batch.on_hand = batch.on_hand.saturating_sub(alloc.quantity);
                    }
                }
                if let Some(held) = e.reference.as_ref().and_then(|r| rm.reservations.get_mut(r)) {
                    *held = held.saturating_sub(e.reservation_consumed);
                }
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::StockAdjusted(e) => {
                match rm.batches.iter_mut().find(|b| b.batch_no == e.batch_no) {
                    Some(batch) => batch.on_hand = batch.on_hand.saturating_add_signed(e.delta),
                    None => rm.batches.push(BatchStock {
                        batch_no: e.batch_no,
                        on_hand: e.delta.max(0).unsigned_abs(),
                        unit_cost: None,
                        received_at: e.occurred_at,
                    }),
                }
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::StockReserved(e) => {
                *rm.reservations.entry(e.reference).or_insert(0) += e.quantity;
                rm.updated_at = e.occurred_at;
            }
            InventoryEvent::ReservationReleased(e) => {
                if let Some(held) = rm.reservations.get_mut(&e.reference) {
                    *held = held.saturating_sub(e.quantity);
                }
                rm.updated_at = e.occurred_at;
            }
        }

        rm.recompute();
        self.store.upsert(tenant_id, item_id, rm);
    }
}

pub(crate) fn event_tenant(ev: &InventoryEvent) -> TenantId {
    match ev {
        InventoryEvent::ItemOpened(e) => e.tenant_id,
        InventoryEvent::StockReceived(e) => e.tenant_id,
        InventoryEvent::StockShipped(e) => e.tenant_id,
        InventoryEvent::StockAdjusted(e) => e.tenant_id,
        InventoryEvent::StockReserved(e) => e.tenant_id,
        InventoryEvent::ReservationReleased(e) => e.tenant_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tileerp_core::AggregateId;
    use tileerp_inventory::{
        BatchAllocation, InboundKind, ItemOpened, OutboundKind, StockReceived, StockReserved, StockShipped,
    };
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;
    use crate::streams;

    type Stock = InventoryStockProjection<Arc<InMemoryTenantStore<InventoryItemId, InventoryReadModel>>>;

    struct Feed {
        tenant_id: TenantId,
        item_id: InventoryItemId,
        seq: u64,
        projection: Stock,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                tenant_id: TenantId::new(),
                item_id: InventoryItemId::new(AggregateId::new()),
                seq: 0,
                projection: InventoryStockProjection::new(Arc::new(InMemoryTenantStore::new())),
            }
        }

        fn push(&mut self, ev: InventoryEvent) {
            self.seq += 1;
            let env = EventEnvelope::new(
                Uuid::now_v7(),
                self.tenant_id,
                self.item_id.0,
                streams::INVENTORY_ITEM.to_string(),
                self.seq,
                serde_json::to_value(&ev).unwrap(),
            );
            self.projection.apply_envelope(&env).unwrap();
        }

        fn open(&mut self) {
            let (tenant_id, item_id) = (self.tenant_id, self.item_id);
            self.push(InventoryEvent::ItemOpened(ItemOpened {
                tenant_id,
                item_id,
                sku: "T-1".to_string(),
                name: "Marble".to_string(),
                pieces_per_unit: PiecesPerUnit::new(4).unwrap(),
                occurred_at: Utc::now(),
            }));
        }

        fn receive(&mut self, batch_no: &str, quantity: u64) {
            let (tenant_id, item_id) = (self.tenant_id, self.item_id);
            self.push(InventoryEvent::StockReceived(StockReceived {
                tenant_id,
                item_id,
                batch_no: batch_no.to_string(),
                quantity,
                unit_cost: Some(250),
                kind: InboundKind::Purchase,
                reference: None,
                note: None,
                on_hand_after: 0,
                occurred_at: Utc::now(),
            }));
        }

        fn current(&self) -> InventoryReadModel {
            self.projection.get(self.tenant_id, &self.item_id).unwrap()
        }
    }

    #[test]
    fn receipts_accumulate_per_batch() {
        let mut feed = Feed::new();
        feed.open();
        feed.receive("B1", 40);
        feed.receive("B2", 10);
        feed.receive("B1", 2);

        let rm = feed.current();
        assert_eq!(rm.on_hand, 52);
        assert_eq!(rm.available, 52);
        assert_eq!(rm.batches.len(), 2);
        assert_eq!(rm.batches[0].on_hand, 42);
        assert_eq!(rm.as_units(rm.on_hand), Quantity::new(13, 0));
    }

    #[test]
    fn shipping_consumes_reservation_and_batches() {
        let mut feed = Feed::new();
        feed.open();
        feed.receive("B1", 20);
        let (tenant_id, item_id) = (feed.tenant_id, feed.item_id);
        feed.push(InventoryEvent::StockReserved(StockReserved {
            tenant_id,
            item_id,
            reference: "order-1".to_string(),
            quantity: 8,
            reserved_after: 8,
            occurred_at: Utc::now(),
        }));
        assert_eq!(feed.current().available, 12);

        feed.push(InventoryEvent::StockShipped(StockShipped {
            tenant_id,
            item_id,
            quantity: 8,
            allocations: vec![BatchAllocation {
                batch_no: "B1".to_string(),
                quantity: 8,
            }],
            kind: OutboundKind::Sale,
            reference: Some("order-1".to_string()),
            note: None,
            reservation_consumed: 8,
            on_hand_after: 12,
            occurred_at: Utc::now(),
        }));

        let rm = feed.current();
        assert_eq!(rm.on_hand, 12);
        assert_eq!(rm.reserved, 0);
        assert!(rm.reservations.is_empty());
    }

    #[test]
    fn alerts_list_items_at_or_below_threshold() {
        let mut feed = Feed::new();
        feed.open();
        feed.receive("B1", 6);

        let alerts = feed
            .projection
            .alerts(feed.tenant_id, |item| {
                StockThresholds::from_units(2, None, PiecesPerUnit::new(item.pieces_per_unit).unwrap())
            });
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, StockLevel::Low);
        assert_eq!(alerts[0].threshold_pieces, 8);
        // 3 pieces short of clearing the threshold: one box of 4.
        assert_eq!(alerts[0].reorder_units, 1);
    }
}
