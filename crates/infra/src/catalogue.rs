//! Product onboarding: the catalogue entry and its inventory item.
//!
//! A product and its item share one id but live in two streams. Creating
//! both is two appends, so a failed item open is compensated by archiving
//! the product again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use tileerp_core::TenantId;
use tileerp_events::{EventBus, EventEnvelope};
use tileerp_inventory::{InventoryCommand, InventoryItem, InventoryItemId, OpenItem};
use tileerp_products::{ArchiveProduct, CreateProduct, Product, ProductCommand, ProductId, ProductStatus};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, StoredEvent};
use crate::fulfillment::FulfillmentError;
use crate::projections::Projections;
use crate::streams;

/// Creates products. SKU uniqueness is checked against the catalogue read
/// model, so creates of one tenant run one at a time and the new product is
/// projected before the next check.
#[derive(Debug)]
pub struct Catalogue<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    projections: Arc<Projections>,
    attempts: u32,
    tenant_locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl<S, B> Catalogue<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, projections: Arc<Projections>, attempts: u32) -> Self {
        Self {
            dispatcher,
            projections,
            attempts,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant_id: TenantId) -> Result<Arc<Mutex<()>>, DispatchError> {
        let mut locks = self.tenant_locks.lock().map_err(|_| poisoned())?;
        Ok(locks.entry(tenant_id).or_default().clone())
    }

    /// A SKU stays taken while a product holds it, unless that product was
    /// archived without ever getting an inventory item.
    fn sku_taken(&self, tenant_id: TenantId, sku: &str) -> bool {
        let sku = sku.trim();
        self.projections
            .products
            .list(tenant_id)
            .into_iter()
            .filter(|p| p.sku.eq_ignore_ascii_case(sku))
            .any(|p| {
                p.status != ProductStatus::Archived
                    || self
                        .projections
                        .inventory
                        .get(tenant_id, &InventoryItemId::new(p.product_id.0))
                        .is_some()
            })
    }

    fn project(&self, committed: &[StoredEvent]) {
        if let Err(e) = self.projections.apply_committed(self.dispatcher.store(), committed) {
            tracing::warn!("projection apply after commit failed: {e}");
        }
    }

    /// Create the product and open its inventory item under the same id.
    pub fn create_product(&self, command: CreateProduct) -> Result<Vec<StoredEvent>, FulfillmentError> {
        let tenant_id = command.tenant_id;
        let product_id = command.product_id;
        let occurred_at = command.occurred_at;

        let lock = self.tenant_lock(tenant_id)?;
        let _guard = lock.lock().map_err(|_| poisoned())?;

        if !command.sku.trim().is_empty() && self.sku_taken(tenant_id, &command.sku) {
            return Err(DispatchError::Conflict(format!("sku '{}' already exists", command.sku.trim())).into());
        }

        let open = InventoryCommand::OpenItem(OpenItem {
            tenant_id,
            item_id: InventoryItemId::new(product_id.0),
            sku: command.sku.trim().to_string(),
            name: command.name.trim().to_string(),
            pieces_per_unit: command.pieces_per_unit,
            occurred_at,
        });

        let mut committed = self.dispatcher.dispatch_with_retry::<Product>(
            self.attempts,
            tenant_id,
            product_id.0,
            streams::PRODUCT,
            ProductCommand::CreateProduct(command),
            |_, id| Product::empty(ProductId::new(id)),
        )?;

        let opened = self.dispatcher.dispatch_with_retry::<InventoryItem>(
            self.attempts,
            tenant_id,
            product_id.0,
            streams::INVENTORY_ITEM,
            open,
            |_, id| InventoryItem::empty(InventoryItemId::new(id)),
        );
        match opened {
            Ok(events) => committed.extend(events),
            Err(cause) => return Err(self.withdraw(tenant_id, product_id, occurred_at, cause, committed)),
        }

        self.project(&committed);
        tracing::info!(%tenant_id, %product_id, "product created");
        Ok(committed)
    }

    /// Archive a product whose inventory item could not be opened.
    fn withdraw(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        occurred_at: DateTime<Utc>,
        cause: DispatchError,
        mut committed: Vec<StoredEvent>,
    ) -> FulfillmentError {
        let archive = self.dispatcher.dispatch_with_retry::<Product>(
            self.attempts,
            tenant_id,
            product_id.0,
            streams::PRODUCT,
            ProductCommand::ArchiveProduct(ArchiveProduct {
                tenant_id,
                product_id,
                occurred_at,
            }),
            |_, id| Product::empty(ProductId::new(id)),
        );
        let err = match archive {
            Ok(events) => {
                committed.extend(events);
                tracing::warn!(%tenant_id, %product_id, error = %cause, "inventory item not opened; product archived");
                FulfillmentError::Reverted { cause, committed }
            }
            Err(compensation) => {
                tracing::error!(%tenant_id, %product_id, error = %compensation, "archiving product without item failed");
                FulfillmentError::CompensationFailed {
                    cause,
                    compensation,
                    committed,
                }
            }
        };
        self.project(err.committed());
        err
    }
}

fn poisoned() -> DispatchError {
    DispatchError::Store(EventStoreError::Storage("catalogue lock poisoned".to_string()))
}
