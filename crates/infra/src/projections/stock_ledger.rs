//! One row per inbound, outbound or adjustment movement.
//!
//! Reservations move no goods and produce no rows.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tileerp_core::TenantId;
use tileerp_events::EventEnvelope;
use tileerp_inventory::{BatchAllocation, InboundKind, InventoryEvent, InventoryItemId, OutboundKind};

use super::inventory_stock::event_tenant;
use super::{decode, ensure_same_tenant, ProjectionError, StreamCursors};
use crate::query::{paginate, LedgerFilter, Page, PageRequest};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDirection {
    Inbound,
    Outbound,
    Adjustment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Purchase,
    Return,
    Opening,
    Sale,
    Damage,
    Adjustment,
    Other,
}

impl From<InboundKind> for LedgerKind {
    fn from(kind: InboundKind) -> Self {
        match kind {
            InboundKind::Purchase => LedgerKind::Purchase,
            InboundKind::Return => LedgerKind::Return,
            InboundKind::Opening => LedgerKind::Opening,
            InboundKind::Other => LedgerKind::Other,
        }
    }
}

impl From<OutboundKind> for LedgerKind {
    fn from(kind: OutboundKind) -> Self {
        match kind {
            OutboundKind::Sale => LedgerKind::Sale,
            OutboundKind::Damage => LedgerKind::Damage,
            OutboundKind::Other => LedgerKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Id of the event that recorded the movement.
    pub entry_id: Uuid,
    pub item_id: InventoryItemId,
    pub sku: String,
    pub direction: LedgerDirection,
    pub kind: LedgerKind,
    /// Pieces moved, always positive; see `direction`.
    pub quantity: u64,
    pub batches: Vec<BatchAllocation>,
    pub unit_cost: Option<u64>,
    pub reference: Option<String>,
    /// Note on movements, reason on adjustments.
    pub note: Option<String>,
    pub on_hand_after: u64,
    pub occurred_at: DateTime<Utc>,
    pub sequence_number: u64,
}

#[derive(Debug)]
pub struct StockLedgerProjection<S>
where
    S: TenantStore<Uuid, LedgerEntry>,
{
    store: S,
    cursors: StreamCursors,
    skus: RwLock<HashMap<(TenantId, InventoryItemId), String>>,
}

impl<S> StockLedgerProjection<S>
where
    S: TenantStore<Uuid, LedgerEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
            skus: RwLock::new(HashMap::new()),
        }
    }

    /// Newest first.
    pub fn list(&self, tenant_id: TenantId, filter: &LedgerFilter) -> Vec<LedgerEntry> {
        let mut rows: Vec<LedgerEntry> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|row| filter.matches(row.item_id, row.direction, row.occurred_at))
            .collect();
        rows.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.sequence_number.cmp(&a.sequence_number))
                .then_with(|| b.entry_id.cmp(&a.entry_id))
        });
        rows
    }

    pub fn page(&self, tenant_id: TenantId, filter: &LedgerFilter, page: &PageRequest) -> Page<LedgerEntry> {
        paginate(self.list(tenant_id, filter), page)
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
        if let Ok(mut skus) = self.skus.write() {
            skus.retain(|(t, _), _| *t != tenant_id);
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let tenant_id = envelope.tenant_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        self.cursors.advance_with(tenant_id, aggregate_id, seq, || {
            let ev: InventoryEvent = decode(envelope)?;
            ensure_same_tenant(envelope, event_tenant(&ev))?;
            if ev.item_id().0 != aggregate_id {
                return Err(ProjectionError::TenantIsolation(
                    "event item_id does not match envelope aggregate_id".to_string(),
                ));
            }
            self.apply_event(tenant_id, envelope.event_id(), seq, ev)
        })
    }

    fn sku(&self, tenant_id: TenantId, item_id: InventoryItemId) -> String {
        self.skus
            .read()
            .ok()
            .and_then(|skus| skus.get(&(tenant_id, item_id)).cloned())
            .unwrap_or_default()
    }

    fn apply_event(&self, tenant_id: TenantId, entry_id: Uuid, seq: u64, ev: InventoryEvent) -> Result<(), ProjectionError> {
        let item_id = ev.item_id();
        let entry = match ev {
            InventoryEvent::ItemOpened(e) => {
                let mut skus = self.skus.write().map_err(|_| ProjectionError::Unavailable)?;
                skus.insert((tenant_id, item_id), e.sku);
                return Ok(());
            }
            InventoryEvent::StockReserved(_) | InventoryEvent::ReservationReleased(_) => return Ok(()),
            InventoryEvent::StockReceived(e) => LedgerEntry {
                entry_id,
                item_id,
                sku: self.sku(tenant_id, item_id),
                direction: LedgerDirection::Inbound,
                kind: e.kind.into(),
                quantity: e.quantity,
                batches: vec![BatchAllocation {
                    batch_no: e.batch_no,
                    quantity: e.quantity,
                }],
                unit_cost: e.unit_cost,
                reference: e.reference,
                note: e.note,
                on_hand_after: e.on_hand_after,
                occurred_at: e.occurred_at,
                sequence_number: seq,
            },
            InventoryEvent::StockShipped(e) => LedgerEntry {
                entry_id,
                item_id,
                sku: self.sku(tenant_id, item_id),
                direction: LedgerDirection::Outbound,
                kind: e.kind.into(),
                quantity: e.quantity,
                batches: e.allocations,
                unit_cost: None,
                reference: e.reference,
                note: e.note,
                on_hand_after: e.on_hand_after,
                occurred_at: e.occurred_at,
                sequence_number: seq,
            },
            InventoryEvent::StockAdjusted(e) => LedgerEntry {
                entry_id,
                item_id,
                sku: self.sku(tenant_id, item_id),
                direction: LedgerDirection::Adjustment,
                kind: LedgerKind::Adjustment,
                quantity: e.delta.unsigned_abs(),
                batches: vec![BatchAllocation {
                    batch_no: e.batch_no,
                    quantity: e.delta.unsigned_abs(),
                }],
                unit_cost: None,
                reference: None,
                note: Some(e.reason),
                on_hand_after: e.on_hand_after,
                occurred_at: e.occurred_at,
                sequence_number: seq,
            },
        };

        self.store.upsert(tenant_id, entry_id, entry);
        Ok(())
    }
}
