use std::{
    collections::HashSet,
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use tileerp_core::{Aggregate, AggregateId, DomainError, TenantId};
use tileerp_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use tileerp_infra::{
    catalogue::Catalogue,
    command_dispatcher::{CommandDispatcher, DispatchError},
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    fulfillment::{Fulfillment, FulfillmentError},
    projections::{ProjectionError, Projections},
    streams,
};
use tileerp_products::CreateProduct;
use tileerp_settings::{
    AllocateOrderNumber, InitializeSettings, SettingsCommand, SettingsEvent, TenantSettings,
};

use crate::config::{AppConfig, StoreConfig};

pub const DEFAULT_COMPANY_NAME: &str = "My Company";
pub const DEFAULT_CURRENCY: &str = "USD";

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

/// Realtime message broadcasted via SSE.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub tenant_id: TenantId,
    pub topic: String,
    pub payload: JsonValue,
}

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("database connection failed: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("projection rebuild failed: {0}")]
    Projection(#[from] ProjectionError),

    #[error("tenant registry unavailable")]
    Poisoned,
}

/// Everything a handler needs: dispatch, fulfilment, read models, realtime.
///
/// Committed events are applied to the read models before a handler answers,
/// so a client reads its own writes. The bus worker applies the same events
/// again (a no-op past the stream cursor) and fans them out over SSE.
pub struct AppServices {
    dispatcher: Arc<Dispatcher>,
    fulfillment: Fulfillment<SharedStore, SharedBus>,
    catalogue: Catalogue<SharedStore, SharedBus>,
    projections: Arc<Projections>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    attempts: u32,
    /// Tenants whose read models were rebuilt from a durable store. `None`
    /// when the store starts empty with the process.
    ready_tenants: Option<Mutex<HashSet<TenantId>>>,
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let durable = matches!(config.store, StoreConfig::Postgres { .. });
    let store: SharedStore = match &config.store {
        StoreConfig::InMemory => Arc::new(InMemoryEventStore::new()),
        StoreConfig::Postgres { database_url } => {
            let pool = sqlx::PgPool::connect(database_url).await?;
            let store = PostgresEventStore::new(pool);
            store.migrate().await?;
            tracing::info!("using postgres event store");
            Arc::new(store)
        }
    };

    let bus: SharedBus = Arc::new(InMemoryEventBus::new());
    let projections = Arc::new(Projections::in_memory());

    // Realtime channel (SSE): lossy broadcast, tenant-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    spawn_projection_worker(bus.subscribe(), store.clone(), projections.clone(), realtime_tx.clone());

    let attempts = config.dispatch_retry_attempts.max(1);
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
    let fulfillment = Fulfillment::new(dispatcher.clone(), attempts);
    let catalogue = Catalogue::new(dispatcher.clone(), projections.clone(), attempts);

    Ok(AppServices {
        dispatcher,
        fulfillment,
        catalogue,
        projections,
        realtime_tx,
        attempts,
        ready_tenants: durable.then(|| Mutex::new(HashSet::new())),
    })
}

/// Background subscriber: bus -> projections -> realtime.
fn spawn_projection_worker(
    sub: Subscription<EventEnvelope<JsonValue>>,
    store: SharedStore,
    projections: Arc<Projections>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) {
    tokio::task::spawn_blocking(move || {
        while let Ok(env) = sub.recv() {
            let at = env.aggregate_type().to_string();
            let tenant_id = env.tenant_id();

            if let Err(e) = projections.apply_or_catch_up(&store, &env) {
                tracing::warn!(
                    %tenant_id,
                    aggregate_id = %env.aggregate_id(),
                    sequence_number = env.sequence_number(),
                    "projection apply failed: {e}"
                );
                continue;
            }

            // Lossy: no backpressure on the write path.
            let _ = realtime_tx.send(RealtimeMessage {
                tenant_id,
                topic: format!("{at}.projection_updated"),
                payload: serde_json::json!({
                    "kind": "projection_update",
                    "aggregate_type": at,
                    "aggregate_id": env.aggregate_id().to_string(),
                    "sequence_number": env.sequence_number(),
                }),
            });

            if at == streams::INVENTORY_ITEM {
                let alert = projections
                    .stock_alerts(tenant_id)
                    .into_iter()
                    .find(|a| a.item_id.0 == env.aggregate_id());
                if let Some(alert) = alert {
                    let _ = realtime_tx.send(RealtimeMessage {
                        tenant_id,
                        topic: "inventory.stock_alert".to_string(),
                        payload: serde_json::to_value(&alert).unwrap_or(JsonValue::Null),
                    });
                }
            }
        }
        tracing::debug!("event bus closed; projection worker stopping");
    });
}

impl AppServices {
    pub fn projections(&self) -> &Projections {
        &self.projections
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Load a tenant's history into the read models on its first request.
    pub fn ensure_tenant_ready(&self, tenant_id: TenantId) -> Result<(), ServicesError> {
        let Some(ready) = &self.ready_tenants else {
            return Ok(());
        };

        // Held across the rebuild so concurrent first requests wait for it.
        let mut ready = ready.lock().map_err(|_| ServicesError::Poisoned)?;
        if ready.contains(&tenant_id) {
            return Ok(());
        }

        let history = self.dispatcher.store().load_tenant(tenant_id)?;
        self.projections.rebuild_tenant(tenant_id, &history)?;
        ready.insert(tenant_id);
        Ok(())
    }

    /// Rehydrate an aggregate without running a command.
    pub fn load<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(TenantId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: serde::de::DeserializeOwned,
    {
        self.dispatcher.load::<A>(tenant_id, aggregate_id, make_aggregate)
    }

    /// Dispatch (retrying on concurrent modification) and update read models.
    pub fn dispatch<A>(
        &self,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl Fn(TenantId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: tileerp_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        let committed = self.dispatcher.dispatch_with_retry::<A>(
            self.attempts,
            tenant_id,
            aggregate_id,
            aggregate_type,
            command,
            make_aggregate,
        )?;
        self.project(&committed);
        Ok(committed)
    }

    /// Create a product with its inventory item. The catalogue projects
    /// what it committed itself.
    pub fn create_product(&self, command: CreateProduct) -> Result<Vec<StoredEvent>, FulfillmentError> {
        self.catalogue.create_product(command)
    }

    /// Run a fulfilment operation and update read models with what it
    /// committed, including what a failed operation left behind.
    pub fn fulfil(
        &self,
        op: impl FnOnce(&Fulfillment<SharedStore, SharedBus>) -> Result<Vec<StoredEvent>, FulfillmentError>,
    ) -> Result<Vec<StoredEvent>, FulfillmentError> {
        match op(&self.fulfillment) {
            Ok(committed) => {
                self.project(&committed);
                Ok(committed)
            }
            Err(err) => {
                self.project(err.committed());
                Err(err)
            }
        }
    }

    fn project(&self, committed: &[StoredEvent]) {
        // The events are durable either way; the bus worker retries the apply.
        if let Err(e) = self.projections.apply_committed(self.dispatcher.store(), committed) {
            tracing::warn!("projection apply after commit failed: {e}");
        }
    }

    /// Initialise tenant settings with defaults unless they already exist.
    pub fn ensure_settings(&self, tenant_id: TenantId) -> Result<(), DispatchError> {
        let stream = AggregateId::for_tenant(tenant_id);
        let settings = self.load::<TenantSettings>(tenant_id, stream, |_, id| TenantSettings::empty(id))?;
        if settings.is_created() {
            return Ok(());
        }

        let init = SettingsCommand::InitializeSettings(InitializeSettings {
            tenant_id,
            company_name: DEFAULT_COMPANY_NAME.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            order_number_prefix: None,
            default_low_stock_units: None,
            occurred_at: Utc::now(),
        });
        match self.dispatch::<TenantSettings>(tenant_id, stream, streams::TENANT_SETTINGS, init, |_, id| {
            TenantSettings::empty(id)
        }) {
            Ok(_) => Ok(()),
            // Another request initialised them first.
            Err(DispatchError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Take the next number from the tenant's order sequence.
    pub fn next_order_number(&self, tenant_id: TenantId) -> Result<String, DispatchError> {
        self.ensure_settings(tenant_id)?;

        let committed = self.dispatch::<TenantSettings>(
            tenant_id,
            AggregateId::for_tenant(tenant_id),
            streams::TENANT_SETTINGS,
            SettingsCommand::AllocateOrderNumber(AllocateOrderNumber {
                tenant_id,
                occurred_at: Utc::now(),
            }),
            |_, id| TenantSettings::empty(id),
        )?;

        committed
            .iter()
            .find_map(|stored| match serde_json::from_value::<SettingsEvent>(stored.payload.clone()) {
                Ok(SettingsEvent::OrderNumberAllocated(e)) => Some(e.order_no),
                _ => None,
            })
            .ok_or_else(|| DispatchError::Deserialize("order number allocation not committed".to_string()))
    }
}

pub fn tenant_sse_stream(
    services: Arc<AppServices>,
    tenant_id: TenantId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.tenant_id == tenant_id => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
