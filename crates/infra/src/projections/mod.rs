//! Read model builders.
//!
//! Projections consume published envelopes and maintain tenant-partitioned
//! read models. They are:
//! - rebuildable from `EventStore::load_tenant`
//! - tenant-isolated (an envelope whose payload names another tenant is rejected)
//! - idempotent per stream: anything at or below the stream cursor is skipped

pub mod inventory_stock;
pub mod products;
pub mod sales_orders;
pub mod settings;
pub mod stock_ledger;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value as JsonValue;
use thiserror::Error;

use tileerp_core::{AggregateId, TenantId};
use tileerp_events::EventEnvelope;
use tileerp_inventory::{StockThresholds, PiecesPerUnit};

use crate::event_store::{EventStore, StoredEvent};
use crate::read_model::InMemoryTenantStore;
use crate::streams;

pub use inventory_stock::{InventoryReadModel, InventoryStockProjection, StockAlert};
pub use products::{ProductCatalogProjection, ProductReadModel};
pub use sales_orders::{SalesOrderReadModel, SalesOrdersProjection, ShipmentReadModel};
pub use settings::{SettingsProjection, SettingsReadModel};
pub use stock_ledger::{LedgerDirection, LedgerEntry, LedgerKind, StockLedgerProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("projection state unavailable")]
    Unavailable,

    #[error("reloading stream failed: {0}")]
    Store(String),
}

pub(crate) fn decode<E: serde::de::DeserializeOwned>(envelope: &EventEnvelope<JsonValue>) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize(e.to_string()))
}

pub(crate) fn ensure_same_tenant(envelope: &EventEnvelope<JsonValue>, event_tenant: TenantId) -> Result<(), ProjectionError> {
    if envelope.tenant_id() != event_tenant {
        return Err(ProjectionError::TenantIsolation(
            "event tenant_id does not match envelope tenant_id".to_string(),
        ));
    }
    Ok(())
}

/// Last applied sequence number per `(tenant, stream)`.
///
/// The lock is held while the event is applied, so a stream is never applied
/// twice even when the same envelope arrives from two consumers at once.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<(TenantId, AggregateId), u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `apply` unless `seq` was already seen. Returns whether it ran.
    ///
    /// Streams are applied gap-free from sequence number 1.
    pub fn advance_with<F>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        seq: u64,
        apply: F,
    ) -> Result<bool, ProjectionError>
    where
        F: FnOnce() -> Result<(), ProjectionError>,
    {
        let mut cursors = self.inner.write().map_err(|_| ProjectionError::Unavailable)?;
        let key = (tenant_id, aggregate_id);
        let last = cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(false);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }

        apply()?;
        cursors.insert(key, seq);
        Ok(true)
    }

    pub fn last(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> u64 {
        self.inner
            .read()
            .ok()
            .and_then(|c| c.get(&(tenant_id, aggregate_id)).copied())
            .unwrap_or(0)
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.retain(|(t, _), _| *t != tenant_id);
        }
    }
}

pub type ProductStore = Arc<InMemoryTenantStore<tileerp_products::ProductId, ProductReadModel>>;
pub type InventoryStore = Arc<InMemoryTenantStore<tileerp_inventory::InventoryItemId, InventoryReadModel>>;
pub type LedgerStore = Arc<InMemoryTenantStore<uuid::Uuid, LedgerEntry>>;
pub type SalesOrderStore = Arc<InMemoryTenantStore<tileerp_sales::SalesOrderId, SalesOrderReadModel>>;
pub type SettingsStore = Arc<InMemoryTenantStore<TenantId, SettingsReadModel>>;

/// Every read model of the application, fed from one envelope stream.
#[derive(Debug)]
pub struct Projections {
    pub products: ProductCatalogProjection<ProductStore>,
    pub inventory: InventoryStockProjection<InventoryStore>,
    pub ledger: StockLedgerProjection<LedgerStore>,
    pub sales_orders: SalesOrdersProjection<SalesOrderStore>,
    pub settings: SettingsProjection<SettingsStore>,
    rebuild_lock: Mutex<()>,
}

impl Default for Projections {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Projections {
    pub fn in_memory() -> Self {
        Self {
            products: ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new())),
            inventory: InventoryStockProjection::new(Arc::new(InMemoryTenantStore::new())),
            ledger: StockLedgerProjection::new(Arc::new(InMemoryTenantStore::new())),
            sales_orders: SalesOrdersProjection::new(Arc::new(InMemoryTenantStore::new())),
            settings: SettingsProjection::new(Arc::new(InMemoryTenantStore::new())),
            rebuild_lock: Mutex::new(()),
        }
    }

    /// Route an envelope by aggregate type. Unknown stream kinds are ignored.
    ///
    /// Returns true when at least one read model changed.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        match envelope.aggregate_type() {
            streams::PRODUCT => self.products.apply_envelope(envelope),
            streams::INVENTORY_ITEM => {
                let stock = self.inventory.apply_envelope(envelope)?;
                let ledger = self.ledger.apply_envelope(envelope)?;
                Ok(stock || ledger)
            }
            streams::SALES_ORDER => self.sales_orders.apply_envelope(envelope),
            streams::TENANT_SETTINGS => self.settings.apply_envelope(envelope),
            _ => Ok(false),
        }
    }

    /// Apply an envelope; when it is ahead of the stream cursor (a writer
    /// published out of order), replay the stream from the store instead.
    pub fn apply_or_catch_up<S: EventStore>(
        &self,
        store: &S,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<bool, ProjectionError> {
        match self.apply_envelope(envelope) {
            Err(ProjectionError::NonMonotonicSequence { last, found }) if found > last => {
                tracing::debug!(
                    tenant_id = %envelope.tenant_id(),
                    aggregate_id = %envelope.aggregate_id(),
                    last,
                    found,
                    "projection behind stream; catching up"
                );
                let stream = store
                    .load_stream(envelope.tenant_id(), envelope.aggregate_id())
                    .map_err(|e| ProjectionError::Store(e.to_string()))?;
                self.apply_stored(&stream)?;
                Ok(true)
            }
            other => other,
        }
    }

    /// Apply freshly committed events, catching up where needed.
    pub fn apply_committed<S: EventStore>(&self, store: &S, events: &[StoredEvent]) -> Result<(), ProjectionError> {
        for stored in events {
            self.apply_or_catch_up(store, &stored.to_envelope())?;
        }
        Ok(())
    }

    pub fn apply_stored(&self, events: &[StoredEvent]) -> Result<(), ProjectionError> {
        for stored in events {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(())
    }

    /// Drop every read model of a tenant and replay its history.
    pub fn rebuild_tenant(&self, tenant_id: TenantId, history: &[StoredEvent]) -> Result<(), ProjectionError> {
        let _guard = self.rebuild_lock.lock().map_err(|_| ProjectionError::Unavailable)?;
        self.clear_tenant(tenant_id);
        self.apply_stored(history)?;
        tracing::info!(%tenant_id, events = history.len(), "projections rebuilt");
        Ok(())
    }

    pub fn clear_tenant(&self, tenant_id: TenantId) {
        self.products.clear_tenant(tenant_id);
        self.inventory.clear_tenant(tenant_id);
        self.ledger.clear_tenant(tenant_id);
        self.sales_orders.clear_tenant(tenant_id);
        self.settings.clear_tenant(tenant_id);
    }

    /// Alert thresholds for an item: the product's own minimum, else the
    /// tenant default, else zero (only out-of-stock alerts). The overstock
    /// ceiling comes from the product alone.
    pub fn thresholds_for(&self, tenant_id: TenantId, item: &InventoryReadModel) -> StockThresholds {
        let product = self
            .products
            .get(tenant_id, &tileerp_products::ProductId::new(item.item_id.0));
        let low_units = product
            .as_ref()
            .and_then(|p| p.min_stock_units)
            .or_else(|| self.settings.get(tenant_id).and_then(|s| s.default_low_stock_units))
            .unwrap_or(0);
        let high_units = product.and_then(|p| p.max_stock_units);
        match PiecesPerUnit::new(item.pieces_per_unit) {
            Ok(ppu) => StockThresholds::from_units(low_units, high_units, ppu),
            Err(_) => StockThresholds {
                low_pieces: low_units,
                high_pieces: high_units,
            },
        }
    }

    /// Items that need reordering, lowest availability first.
    pub fn stock_alerts(&self, tenant_id: TenantId) -> Vec<StockAlert> {
        self.inventory.alerts(tenant_id, |item| self.thresholds_for(tenant_id, item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_skips_replays_and_rejects_gaps() {
        let cursors = StreamCursors::new();
        let tenant_id = TenantId::new();
        let stream = AggregateId::new();

        assert!(cursors.advance_with(tenant_id, stream, 1, || Ok(())).unwrap());
        assert!(!cursors.advance_with(tenant_id, stream, 1, || panic!("replayed")).unwrap());
        assert!(matches!(
            cursors.advance_with(tenant_id, stream, 3, || Ok(())),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3 })
        ));
        assert_eq!(cursors.last(tenant_id, stream), 1);

        let fresh = AggregateId::new();
        assert!(cursors.advance_with(tenant_id, fresh, 2, || Ok(())).is_err());
    }

    #[test]
    fn failed_apply_does_not_advance() {
        let cursors = StreamCursors::new();
        let tenant_id = TenantId::new();
        let stream = AggregateId::new();

        let result = cursors.advance_with(tenant_id, stream, 1, || Err(ProjectionError::Deserialize("bad".into())));
        assert!(result.is_err());
        assert_eq!(cursors.last(tenant_id, stream), 0);
    }

    #[test]
    fn clear_tenant_resets_only_that_tenant() {
        let cursors = StreamCursors::new();
        let a = TenantId::new();
        let b = TenantId::new();
        let stream = AggregateId::new();
        cursors.advance_with(a, stream, 1, || Ok(())).unwrap();
        cursors.advance_with(b, stream, 1, || Ok(())).unwrap();

        cursors.clear_tenant(a);

        assert_eq!(cursors.last(a, stream), 0);
        assert_eq!(cursors.last(b, stream), 1);
    }
}
