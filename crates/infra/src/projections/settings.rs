use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use tileerp_core::{AggregateId, TenantId};
use tileerp_events::EventEnvelope;
use tileerp_settings::SettingsEvent;

use super::{decode, ensure_same_tenant, ProjectionError, StreamCursors};
use crate::read_model::TenantStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsReadModel {
    pub company_name: String,
    pub currency: String,
    pub order_number_prefix: String,
    pub default_low_stock_units: Option<u64>,
    /// Most recently issued order number, if any.
    pub last_order_no: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One settings row per tenant.
#[derive(Debug)]
pub struct SettingsProjection<S>
where
    S: TenantStore<TenantId, SettingsReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> SettingsProjection<S>
where
    S: TenantStore<TenantId, SettingsReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<SettingsReadModel> {
        self.store.get(tenant_id, &tenant_id)
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
                let ev: SettingsEvent = decode(envelope)?;
                let event_tenant = match &ev {
                    SettingsEvent::SettingsInitialized(e) => e.tenant_id,
                    SettingsEvent::SettingsUpdated(e) => e.tenant_id,
                    SettingsEvent::OrderNumberAllocated(e) => e.tenant_id,
                };
                ensure_same_tenant(envelope, event_tenant)?;
                if aggregate_id != AggregateId::for_tenant(tenant_id) {
                    return Err(ProjectionError::TenantIsolation(
                        "settings stream does not belong to the envelope tenant".to_string(),
                    ));
                }

                match ev {
                    SettingsEvent::SettingsInitialized(e) => {
                        let last_order_no = self.get(tenant_id).and_then(|s| s.last_order_no);
                        self.store.upsert(
                            tenant_id,
                            tenant_id,
                            SettingsReadModel {
                                company_name: e.company_name,
                                currency: e.currency,
                                order_number_prefix: e.order_number_prefix,
                                default_low_stock_units: e.default_low_stock_units,
                                last_order_no,
                                updated_at: e.occurred_at,
                            },
                        );
                    }
                    SettingsEvent::SettingsUpdated(e) => {
                        let last_order_no = self.get(tenant_id).and_then(|s| s.last_order_no);
                        self.store.upsert(
                            tenant_id,
                            tenant_id,
                            SettingsReadModel {
                                company_name: e.company_name,
                                currency: e.currency,
                                order_number_prefix: e.order_number_prefix,
                                default_low_stock_units: e.default_low_stock_units,
                                last_order_no,
                                updated_at: e.occurred_at,
                            },
                        );
                    }
                    SettingsEvent::OrderNumberAllocated(e) => {
                        if let Some(mut rm) = self.get(tenant_id) {
                            rm.last_order_no = Some(e.order_no);
                            rm.updated_at = e.occurred_at;
                            self.store.upsert(tenant_id, tenant_id, rm);
                        }
                    }
                }
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tileerp_settings::{OrderNumberAllocated, SettingsInitialized};
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;
    use crate::streams;

    fn env(tenant_id: TenantId, stream: AggregateId, seq: u64, ev: &SettingsEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            tenant_id,
            stream,
            streams::TENANT_SETTINGS.to_string(),
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    #[test]
    fn tracks_settings_and_last_order_number() {
        let projection = SettingsProjection::new(Arc::new(InMemoryTenantStore::<TenantId, SettingsReadModel>::new()));
        let tenant_id = TenantId::new();
        let stream = AggregateId::for_tenant(tenant_id);

        let init = SettingsEvent::SettingsInitialized(SettingsInitialized {
            tenant_id,
            company_name: "Tiles Ltd".to_string(),
            currency: "EUR".to_string(),
            order_number_prefix: "SO".to_string(),
            default_low_stock_units: Some(5),
            occurred_at: Utc::now(),
        });
        let allocated = SettingsEvent::OrderNumberAllocated(OrderNumberAllocated {
            tenant_id,
            seq: 1,
            order_no: "SO-000001".to_string(),
            occurred_at: Utc::now(),
        });
        projection.apply_envelope(&env(tenant_id, stream, 1, &init)).unwrap();
        projection.apply_envelope(&env(tenant_id, stream, 2, &allocated)).unwrap();

        let rm = projection.get(tenant_id).unwrap();
        assert_eq!(rm.currency, "EUR");
        assert_eq!(rm.default_low_stock_units, Some(5));
        assert_eq!(rm.last_order_no.as_deref(), Some("SO-000001"));
    }

    #[test]
    fn stream_of_another_tenant_is_rejected() {
        let projection = SettingsProjection::new(Arc::new(InMemoryTenantStore::<TenantId, SettingsReadModel>::new()));
        let tenant_id = TenantId::new();
        let init = SettingsEvent::SettingsInitialized(SettingsInitialized {
            tenant_id,
            company_name: "Tiles Ltd".to_string(),
            currency: "EUR".to_string(),
            order_number_prefix: "SO".to_string(),
            default_low_stock_units: None,
            occurred_at: Utc::now(),
        });

        let result = projection.apply_envelope(&env(tenant_id, AggregateId::new(), 1, &init));
        assert!(matches!(result, Err(ProjectionError::TenantIsolation(_))));
    }
}
