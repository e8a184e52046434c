use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use tileerp_core::TenantId;
use tileerp_events::EventEnvelope;
use tileerp_products::{Pricing, ProductEvent, ProductId, ProductStatus};

use super::{decode, ensure_same_tenant, ProjectionError, StreamCursors};
use crate::query::{paginate, Page, PageRequest, ProductFilter};
use crate::read_model::TenantStore;

/// Catalogue row for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub pieces_per_unit: u32,
    pub unit_label: String,
    pub pricing: Pricing,
    pub min_stock_units: Option<u64>,
    pub max_stock_units: Option<u64>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product catalogue: lookup by id or SKU, filtered listing.
#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    /// All products of a tenant ordered by SKU.
    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut products = self.store.list(tenant_id);
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        products
    }

    /// SKUs are compared case-insensitively.
    pub fn find_by_sku(&self, tenant_id: TenantId, sku: &str) -> Option<ProductReadModel> {
        let sku = sku.trim();
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|p| p.sku.eq_ignore_ascii_case(sku))
    }

    pub fn list_filtered(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
        page: &PageRequest,
    ) -> Page<ProductReadModel> {
        let matching = self
            .list(tenant_id)
            .into_iter()
            .filter(|p| filter.matches(&p.sku, &p.name, p.status, p.category.as_deref()))
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
                let ev: ProductEvent = decode(envelope)?;
                let (event_tenant, product_id) = match &ev {
                    ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
                    ProductEvent::ProductDetailsUpdated(e) => (e.tenant_id, e.product_id),
                    ProductEvent::ProductPricingUpdated(e) => (e.tenant_id, e.product_id),
                    ProductEvent::ProductActivated(e) => (e.tenant_id, e.product_id),
                    ProductEvent::ProductArchived(e) => (e.tenant_id, e.product_id),
                };
                ensure_same_tenant(envelope, event_tenant)?;
                if product_id.0 != aggregate_id {
                    return Err(ProjectionError::TenantIsolation(
                        "event product_id does not match envelope aggregate_id".to_string(),
                    ));
                }
                self.apply_event(tenant_id, ev);
                Ok(())
            })
    }

    fn apply_event(&self, tenant_id: TenantId, ev: ProductEvent) {
        if let ProductEvent::ProductCreated(e) = ev {
            self.store.upsert(
                tenant_id,
                e.product_id,
                ProductReadModel {
                    product_id: e.product_id,
                    sku: e.sku,
                    name: e.name,
                    category: e.category,
                    specification: e.specification,
                    pieces_per_unit: e.pieces_per_unit,
                    unit_label: e.unit_label,
                    pricing: e.pricing,
                    min_stock_units: e.min_stock_units,
                    max_stock_units: e.max_stock_units,
                    status: ProductStatus::Draft,
                    created_at: e.occurred_at,
                    updated_at: e.occurred_at,
                },
            );
            return;
        }

        let product_id = match &ev {
            ProductEvent::ProductCreated(e) => e.product_id,
            ProductEvent::ProductDetailsUpdated(e) => e.product_id,
            ProductEvent::ProductPricingUpdated(e) => e.product_id,
            ProductEvent::ProductActivated(e) => e.product_id,
            ProductEvent::ProductArchived(e) => e.product_id,
        };
        // Later events for a product the catalogue never saw created are dropped.
        let Some(mut rm) = self.store.get(tenant_id, &product_id) else {
            tracing::warn!(%tenant_id, %product_id, "product event before creation; skipped");
            return;
        };

        match ev {
            ProductEvent::ProductCreated(_) => {}
            ProductEvent::ProductDetailsUpdated(e) => {
                rm.name = e.name;
                rm.category = e.category;
                rm.specification = e.specification;
                rm.unit_label = e.unit_label;
                rm.min_stock_units = e.min_stock_units;
                rm.max_stock_units = e.max_stock_units;
                rm.updated_at = e.occurred_at;
            }
            ProductEvent::ProductPricingUpdated(e) => {
                rm.pricing = e.pricing;
                rm.updated_at = e.occurred_at;
            }
            ProductEvent::ProductActivated(e) => {
                rm.status = ProductStatus::Active;
                rm.updated_at = e.occurred_at;
            }
            ProductEvent::ProductArchived(e) => {
                rm.status = ProductStatus::Archived;
                rm.updated_at = e.occurred_at;
            }
        }
        self.store.upsert(tenant_id, product_id, rm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tileerp_core::AggregateId;
    use tileerp_products::{ProductActivated, ProductCreated};
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;
    use crate::streams;

    type Catalog = ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;

    fn envelope(tenant_id: TenantId, id: ProductId, seq: u64, ev: &ProductEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            id.0,
            streams::PRODUCT.to_string(),
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn created(tenant_id: TenantId, id: ProductId, sku: &str, name: &str) -> ProductEvent {
        ProductEvent::ProductCreated(ProductCreated {
            tenant_id,
            product_id: id,
            sku: sku.to_string(),
            name: name.to_string(),
            category: Some("floor".to_string()),
            specification: Some("600x600mm".to_string()),
            pieces_per_unit: 4,
            unit_label: "box".to_string(),
            pricing: Pricing::default(),
            min_stock_units: Some(10),
            max_stock_units: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn created_then_activated() {
        let catalog: Catalog = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant_id = TenantId::new();
        let id = ProductId::new(AggregateId::new());

        catalog.apply_envelope(&envelope(tenant_id, id, 1, &created(tenant_id, id, "T-1", "Marble"))).unwrap();
        let activated = ProductEvent::ProductActivated(ProductActivated {
            tenant_id,
            product_id: id,
            occurred_at: Utc::now(),
        });
        catalog.apply_envelope(&envelope(tenant_id, id, 2, &activated)).unwrap();

        let rm = catalog.get(tenant_id, &id).unwrap();
        assert_eq!(rm.status, ProductStatus::Active);
        assert_eq!(rm.pieces_per_unit, 4);
        assert_eq!(catalog.find_by_sku(tenant_id, "t-1").map(|p| p.product_id), Some(id));
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let catalog: Catalog = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant_id = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let env = envelope(tenant_id, id, 1, &created(tenant_id, id, "T-1", "Marble"));

        assert!(catalog.apply_envelope(&env).unwrap());
        assert!(!catalog.apply_envelope(&env).unwrap());
        assert_eq!(catalog.list(tenant_id).len(), 1);
    }

    #[test]
    fn payload_from_another_tenant_is_rejected() {
        let catalog: Catalog = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
        let id = ProductId::new(AggregateId::new());
        let env = envelope(TenantId::new(), id, 1, &created(TenantId::new(), id, "T-1", "Marble"));

        assert!(matches!(catalog.apply_envelope(&env), Err(ProjectionError::TenantIsolation(_))));
    }

    #[test]
    fn filtered_listing_is_sorted_by_sku() {
        let catalog: Catalog = ProductCatalogProjection::new(Arc::new(InMemoryTenantStore::new()));
        let tenant_id = TenantId::new();
        for (sku, name) in [("T-3", "Slate grey"), ("T-1", "Marble white"), ("T-2", "Marble black")] {
            let id = ProductId::new(AggregateId::new());
            catalog.apply_envelope(&envelope(tenant_id, id, 1, &created(tenant_id, id, sku, name))).unwrap();
        }

        let filter = ProductFilter {
            search: Some("marble".to_string()),
            ..Default::default()
        };
        let page = catalog.list_filtered(tenant_id, &filter, &PageRequest::default());
        let skus: Vec<_> = page.items.iter().map(|p| p.sku.as_str()).collect();
        assert_eq!(skus, vec!["T-1", "T-2"]);
        assert_eq!(page.total, 2);
    }
}
