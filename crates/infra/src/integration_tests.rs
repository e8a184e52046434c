//! Pipeline tests: command -> event store -> bus -> projections.
//!
//! Covers:
//! - read models follow commands across products, inventory and sales
//! - fulfilment reserves, ships, restocks and compensates
//! - partial failures report and project what stayed committed
//! - product onboarding keeps SKUs unique and withdraws half-created products
//! - tenant isolation of stores and read models
//! - concurrent stock movements lose no updates

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;

use tileerp_core::{AggregateId, ExpectedVersion, TenantId};
use tileerp_events::{EventBus, EventEnvelope, InMemoryEventBus};
use tileerp_inventory::{
    classify, InboundKind, InventoryCommand, InventoryItem, InventoryItemId, OutboundKind, ReceiveStock, ShipStock,
    StockLevel,
};
use tileerp_products::{CreateProduct, Pricing, ProductId, ProductStatus};
use tileerp_sales::{
    AddLine, CreateSalesOrder, Customer, LineQuantity, OrderKind, PaymentMethod, RecordPayment, SalesOrder,
    SalesOrderCommand, SalesOrderId, SalesOrderStatus,
};

use crate::catalogue::Catalogue;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
use crate::fulfillment::{Fulfillment, FulfillmentError, ReturnRequest, ShipLine};
use crate::projections::{LedgerDirection, Projections};
use crate::query::LedgerFilter;
use crate::streams;

/// In-memory store that can be told to refuse appends of one event type,
/// standing in for a backend that fails mid-operation.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryEventStore,
    refused: Mutex<Option<&'static str>>,
}

impl FlakyStore {
    fn refuse(&self, event_type: &'static str) {
        *self.refused.lock().unwrap() = Some(event_type);
    }

    fn heal(&self) {
        *self.refused.lock().unwrap() = None;
    }
}

impl EventStore for FlakyStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let refused = *self.refused.lock().unwrap();
        if let Some(event_type) = refused.filter(|t| events.iter().any(|e| e.event_type == *t)) {
            return Err(EventStoreError::Storage(format!("append of {event_type} refused")));
        }
        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, tenant_id: TenantId, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(tenant_id, aggregate_id)
    }

    fn load_tenant(&self, tenant_id: TenantId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_tenant(tenant_id)
    }
}

type Store = Arc<FlakyStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Store, Bus>;

struct Harness {
    store: Store,
    dispatcher: Arc<Dispatcher>,
    projections: Arc<Projections>,
    fulfillment: Fulfillment<Store, Bus>,
    catalogue: Catalogue<Store, Bus>,
    tenant_id: TenantId,
}

fn setup() -> Harness {
    let store: Store = Arc::new(FlakyStore::default());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));
    let projections = Arc::new(Projections::in_memory());

    // Subscribe before anything is published.
    let sub = bus.subscribe();
    let worker = projections.clone();
    let worker_store = store.clone();
    std::thread::spawn(move || {
        while let Ok(env) = sub.recv() {
            if let Err(e) = worker.apply_or_catch_up(&worker_store, &env) {
                eprintln!("failed to apply envelope: {e:?}");
            }
        }
    });

    Harness {
        store,
        fulfillment: Fulfillment::new(dispatcher.clone(), 5),
        catalogue: Catalogue::new(dispatcher.clone(), projections.clone(), 5),
        dispatcher,
        projections,
        tenant_id: TenantId::new(),
    }
}

/// Poll until the projections caught up with the condition.
fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(condition(), "condition not met within 2s");
}

impl Harness {
    fn create_cmd(&self, sku: &str, pieces_per_unit: u32) -> CreateProduct {
        CreateProduct {
            tenant_id: self.tenant_id,
            product_id: ProductId::new(AggregateId::new()),
            sku: sku.to_string(),
            name: format!("Tile {sku}"),
            category: Some("floor".to_string()),
            specification: Some("600x600mm".to_string()),
            pieces_per_unit,
            unit_label: "box".to_string(),
            pricing: Pricing::default(),
            min_stock_units: Some(2),
            max_stock_units: None,
            occurred_at: Utc::now(),
        }
    }

    /// Create a product and open its inventory item, as the API does.
    fn product(&self, sku: &str, pieces_per_unit: u32) -> ProductId {
        let cmd = self.create_cmd(sku, pieces_per_unit);
        let product_id = cmd.product_id;
        self.catalogue.create_product(cmd).unwrap();
        product_id
    }

    fn inventory(&self, item_id: InventoryItemId, command: InventoryCommand) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch_with_retry::<InventoryItem>(
                10,
                self.tenant_id,
                item_id.0,
                streams::INVENTORY_ITEM,
                command,
                |_, id| InventoryItem::empty(InventoryItemId::new(id)),
            )
            .map(|_| ())
    }

    fn receive(&self, product_id: ProductId, batch_no: &str, quantity: u64) {
        let item_id = InventoryItemId::new(product_id.0);
        self.inventory(
            item_id,
            InventoryCommand::ReceiveStock(ReceiveStock {
                tenant_id: self.tenant_id,
                item_id,
                batch_no: batch_no.to_string(),
                quantity,
                unit_cost: Some(300),
                kind: InboundKind::Purchase,
                reference: None,
                note: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
    }

    fn order_cmd(&self, order_id: SalesOrderId, command: SalesOrderCommand) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch::<SalesOrder>(
                self.tenant_id,
                order_id.0,
                streams::SALES_ORDER,
                command,
                |_, id| SalesOrder::empty(SalesOrderId::new(id)),
            )
            .map(|_| ())
    }

    /// Draft order with one line per `(product, pieces)`.
    fn order(&self, kind: OrderKind, lines: &[(ProductId, u64)]) -> SalesOrderId {
        let order_id = SalesOrderId::new(AggregateId::new());
        self.order_cmd(
            order_id,
            SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id: self.tenant_id,
                order_id,
                order_no: format!("SO-{}", &order_id.to_string()[..8]),
                kind,
                customer: Customer {
                    name: "Acme Builders".to_string(),
                    phone: None,
                    address: None,
                },
                note: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        for (product_id, quantity) in lines {
            let transfer = kind == OrderKind::Transfer;
            self.order_cmd(
                order_id,
                SalesOrderCommand::AddLine(AddLine {
                    tenant_id: self.tenant_id,
                    order_id,
                    product_id: *product_id,
                    sku: "T".to_string(),
                    name: "Tile".to_string(),
                    pieces_per_unit: 4,
                    quantity: *quantity,
                    unit_price: 500,
                    unit_cost: Some(300),
                    supplier: transfer.then(|| "Quarry Co".to_string()),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }
        order_id
    }

    fn on_hand(&self, product_id: ProductId) -> Option<(u64, u64)> {
        self.projections
            .inventory
            .get(self.tenant_id, &InventoryItemId::new(product_id.0))
            .map(|rm| (rm.on_hand, rm.reserved))
    }

    fn order_status(&self, order_id: SalesOrderId) -> Option<SalesOrderStatus> {
        self.projections.sales_orders.get(self.tenant_id, &order_id).map(|o| o.status)
    }
}

#[test]
fn receiving_stock_updates_stock_and_ledger() {
    let h = setup();
    let product = h.product("T-100", 4);
    h.receive(product, "B1", 40);
    h.receive(product, "B2", 6);

    eventually(|| h.on_hand(product) == Some((46, 0)));
    let rows = h.projections.ledger.list(h.tenant_id, &LedgerFilter::default());
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.direction == LedgerDirection::Inbound));
    assert_eq!(h.projections.products.find_by_sku(h.tenant_id, "t-100").map(|p| p.product_id), Some(product));
}

#[test]
fn stock_order_runs_from_confirmation_to_completion() {
    let h = setup();
    let product = h.product("T-200", 4);
    h.receive(product, "B1", 100);
    let order_id = h.order(OrderKind::Stock, &[(product, 40)]);

    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    eventually(|| h.on_hand(product) == Some((100, 40)));

    h.fulfillment
        .ship_order(
            h.tenant_id,
            order_id,
            &[ShipLine {
                line_no: 1,
                quantity: 40,
                batch_no: None,
            }],
            Utc::now(),
        )
        .unwrap();
    eventually(|| h.on_hand(product) == Some((60, 0)));
    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Shipped));

    let order = h.projections.sales_orders.get(h.tenant_id, &order_id).unwrap();
    assert_eq!(order.shipments.len(), 1);
    assert_eq!(order.shipments[0].batches[0].batch_no, "B1");

    h.order_cmd(
        order_id,
        SalesOrderCommand::RecordPayment(RecordPayment {
            tenant_id: h.tenant_id,
            order_id,
            amount: 20_000,
            method: PaymentMethod::BankTransfer,
            note: None,
            occurred_at: Utc::now(),
        }),
    )
    .unwrap();
    h.order_cmd(
        order_id,
        SalesOrderCommand::CompleteOrder(tileerp_sales::CompleteOrder {
            tenant_id: h.tenant_id,
            order_id,
            occurred_at: Utc::now(),
        }),
    )
    .unwrap();
    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Completed));
}

#[test]
fn failed_confirmation_releases_earlier_reservations() {
    let h = setup();
    let plenty = h.product("T-300", 4);
    let scarce = h.product("T-301", 4);
    h.receive(plenty, "B1", 100);
    h.receive(scarce, "B1", 3);
    let order_id = h.order(OrderKind::Stock, &[(plenty, 20), (scarce, 8)]);

    let err = h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap_err();
    assert!(matches!(
        &err,
        FulfillmentError::Reverted {
            cause: DispatchError::InvariantViolation(_),
            ..
        }
    ));
    // One reservation and its release.
    assert_eq!(err.committed().len(), 2);

    eventually(|| h.on_hand(plenty) == Some((100, 0)));
    let order = h
        .dispatcher
        .load::<SalesOrder>(h.tenant_id, order_id.0, |_, id| SalesOrder::empty(SalesOrderId::new(id)))
        .unwrap();
    assert_eq!(order.status(), SalesOrderStatus::Draft);
}

#[test]
fn restocked_return_goes_back_to_the_shipped_batch() {
    let h = setup();
    let product = h.product("T-400", 4);
    h.receive(product, "B1", 10);
    h.receive(product, "B2", 50);
    let order_id = h.order(OrderKind::Stock, &[(product, 20)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    h.fulfillment
        .ship_order(
            h.tenant_id,
            order_id,
            &[ShipLine {
                line_no: 1,
                quantity: 20,
                batch_no: Some("B2".to_string()),
            }],
            Utc::now(),
        )
        .unwrap();

    h.fulfillment
        .return_order(
            h.tenant_id,
            order_id,
            &ReturnRequest {
                lines: vec![LineQuantity {
                    line_no: 1,
                    quantity: 4,
                }],
                refund_amount: 0,
                reason: "cracked".to_string(),
                restock: true,
            },
            Utc::now(),
        )
        .unwrap();

    eventually(|| h.on_hand(product) == Some((44, 0)));
    let item = h
        .projections
        .inventory
        .get(h.tenant_id, &InventoryItemId::new(product.0))
        .unwrap();
    let b2 = item.batches.iter().find(|b| b.batch_no == "B2").unwrap();
    assert_eq!(b2.on_hand, 34);

    eventually(|| {
        h.projections
            .sales_orders
            .get(h.tenant_id, &order_id)
            .is_some_and(|o| o.totals.credited == 2_000)
    });
}

#[test]
fn cancelling_a_confirmed_order_releases_its_reservation() {
    let h = setup();
    let product = h.product("T-500", 4);
    h.receive(product, "B1", 30);
    let order_id = h.order(OrderKind::Stock, &[(product, 12)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    eventually(|| h.on_hand(product) == Some((30, 12)));

    h.fulfillment
        .cancel_order(h.tenant_id, order_id, "customer changed their mind", Utc::now())
        .unwrap();

    eventually(|| h.on_hand(product) == Some((30, 0)));
    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Cancelled));
}

#[test]
fn transfer_orders_never_touch_inventory() {
    let h = setup();
    let product = h.product("T-600", 4);
    let order_id = h.order(OrderKind::Transfer, &[(product, 200)]);

    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    h.fulfillment
        .ship_order(
            h.tenant_id,
            order_id,
            &[ShipLine {
                line_no: 1,
                quantity: 200,
                batch_no: None,
            }],
            Utc::now(),
        )
        .unwrap();

    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Shipped));
    assert_eq!(h.on_hand(product), Some((0, 0)));
    let order = h.projections.sales_orders.get(h.tenant_id, &order_id).unwrap();
    assert_eq!(order.totals.gross_profit, 40_000);
}

#[test]
fn tenants_do_not_see_each_other() {
    let h = setup();
    let product = h.product("T-700", 4);
    h.receive(product, "B1", 8);
    eventually(|| h.on_hand(product) == Some((8, 0)));

    let other = TenantId::new();
    assert!(h.projections.inventory.list(other).is_empty());
    assert!(h.projections.products.list(other).is_empty());
    assert!(h.dispatcher.store().load_tenant(other).unwrap().is_empty());

    // A command for the right stream under the wrong tenant finds nothing.
    let item_id = InventoryItemId::new(product.0);
    let err = h
        .dispatcher
        .dispatch::<InventoryItem>(
            other,
            item_id.0,
            streams::INVENTORY_ITEM,
            InventoryCommand::ShipStock(ShipStock {
                tenant_id: other,
                item_id,
                quantity: 1,
                batch_no: None,
                kind: OutboundKind::Sale,
                reference: None,
                note: None,
                occurred_at: Utc::now(),
            }),
            |_, id| InventoryItem::empty(InventoryItemId::new(id)),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound));
}

#[test]
fn concurrent_inbound_and_outbound_lose_no_updates() {
    let h = Arc::new(setup());
    let product = h.product("T-800", 4);
    h.receive(product, "B0", 1_000);
    let item_id = InventoryItemId::new(product.0);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let h = h.clone();
            std::thread::spawn(move || {
                for _ in 0..10 {
                    let command = if worker % 2 == 0 {
                        InventoryCommand::ReceiveStock(ReceiveStock {
                            tenant_id: h.tenant_id,
                            item_id,
                            batch_no: "B1".to_string(),
                            quantity: 5,
                            unit_cost: None,
                            kind: InboundKind::Purchase,
                            reference: None,
                            note: None,
                            occurred_at: Utc::now(),
                        })
                    } else {
                        InventoryCommand::ShipStock(ShipStock {
                            tenant_id: h.tenant_id,
                            item_id,
                            quantity: 3,
                            batch_no: None,
                            kind: OutboundKind::Sale,
                            reference: None,
                            note: None,
                            occurred_at: Utc::now(),
                        })
                    };
                    h.dispatcher
                        .dispatch_with_retry::<InventoryItem>(
                            100,
                            h.tenant_id,
                            item_id.0,
                            streams::INVENTORY_ITEM,
                            command,
                            |_, id| InventoryItem::empty(InventoryItemId::new(id)),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // 4 receivers x 10 x 5, 4 shippers x 10 x 3
    let expected = 1_000 + 200 - 120;
    let item = h
        .dispatcher
        .load::<InventoryItem>(h.tenant_id, item_id.0, |_, id| InventoryItem::empty(InventoryItemId::new(id)))
        .unwrap();
    assert_eq!(item.on_hand(), expected);
    eventually(|| h.on_hand(product) == Some((expected, 0)));
}

#[test]
fn rebuild_reproduces_live_read_models() {
    let h = setup();
    let product = h.product("T-900", 4);
    h.receive(product, "B1", 16);
    let order_id = h.order(OrderKind::Stock, &[(product, 8)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    eventually(|| h.on_hand(product) == Some((16, 8)));
    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Confirmed));
    let live_order = h.projections.sales_orders.get(h.tenant_id, &order_id);

    let history = h.dispatcher.store().load_tenant(h.tenant_id).unwrap();
    let rebuilt = Projections::in_memory();
    rebuilt.rebuild_tenant(h.tenant_id, &history).unwrap();

    assert_eq!(
        rebuilt
            .inventory
            .get(h.tenant_id, &InventoryItemId::new(product.0))
            .map(|rm| (rm.on_hand, rm.reserved)),
        Some((16, 8))
    );
    assert_eq!(rebuilt.sales_orders.get(h.tenant_id, &order_id), live_order);
    assert_eq!(rebuilt.ledger.list(h.tenant_id, &LedgerFilter::default()).len(), 1);
}

fn ship_all(h: &Harness, order_id: SalesOrderId, quantity: u64) -> Result<Vec<StoredEvent>, FulfillmentError> {
    h.fulfillment.ship_order(
        h.tenant_id,
        order_id,
        &[ShipLine {
            line_no: 1,
            quantity,
            batch_no: None,
        }],
        Utc::now(),
    )
}

fn restocked_return(quantity: u64) -> ReturnRequest {
    ReturnRequest {
        lines: vec![LineQuantity { line_no: 1, quantity }],
        refund_amount: 0,
        reason: "wrong shade".to_string(),
        restock: true,
    }
}

fn batch_on_hand(h: &Harness, product: ProductId, batch_no: &str) -> Option<u64> {
    h.projections
        .inventory
        .get(h.tenant_id, &InventoryItemId::new(product.0))
        .and_then(|rm| rm.batches.into_iter().find(|b| b.batch_no == batch_no))
        .map(|b| b.on_hand)
}

#[test]
fn restock_splits_over_shipped_batches_newest_first() {
    let h = setup();
    let product = h.product("T-1000", 4);
    h.receive(product, "A", 5);
    h.receive(product, "B", 5);
    let order_id = h.order(OrderKind::Stock, &[(product, 10)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    ship_all(&h, order_id, 8).unwrap();
    eventually(|| batch_on_hand(&h, product, "A") == Some(0) && batch_on_hand(&h, product, "B") == Some(2));

    h.fulfillment
        .return_order(h.tenant_id, order_id, &restocked_return(6), Utc::now())
        .unwrap();

    eventually(|| h.on_hand(product) == Some((8, 2)));
    assert_eq!(batch_on_hand(&h, product, "B"), Some(5));
    assert_eq!(batch_on_hand(&h, product, "A"), Some(3));
}

#[test]
fn failed_restock_reports_the_recorded_return() {
    let h = setup();
    let product = h.product("T-1100", 4);
    h.receive(product, "B1", 20);
    let order_id = h.order(OrderKind::Stock, &[(product, 10)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    ship_all(&h, order_id, 10).unwrap();
    eventually(|| h.on_hand(product) == Some((10, 0)));

    h.store.refuse("inventory.stock.received");
    let err = h
        .fulfillment
        .return_order(h.tenant_id, order_id, &restocked_return(4), Utc::now())
        .unwrap_err();
    h.store.heal();

    let FulfillmentError::Incomplete { recorded, cause, committed } = &err else {
        panic!("expected an incomplete return, got {err:?}");
    };
    assert!(recorded.starts_with("return "));
    assert!(matches!(cause, DispatchError::Store(_)));
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].event_type, "sales.order.return_recorded");

    // Projecting what the error carries shows the return right away.
    h.projections.apply_committed(h.dispatcher.store(), err.committed()).unwrap();
    let order = h.projections.sales_orders.get(h.tenant_id, &order_id).unwrap();
    assert_eq!(order.totals.credited, 2_000);
    assert_eq!(h.on_hand(product), Some((10, 0)));
}

#[test]
fn failed_shipment_record_puts_stock_and_reservation_back() {
    let h = setup();
    let product = h.product("T-1200", 4);
    h.receive(product, "B1", 6);
    h.receive(product, "B2", 44);
    let order_id = h.order(OrderKind::Stock, &[(product, 10)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();
    eventually(|| h.on_hand(product) == Some((50, 10)));

    h.store.refuse("sales.order.shipment_recorded");
    let err = ship_all(&h, order_id, 10).unwrap_err();
    h.store.heal();

    assert!(matches!(
        &err,
        FulfillmentError::Reverted {
            cause: DispatchError::Store(_),
            ..
        }
    ));
    let types: Vec<&str> = err.committed().iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        [
            "inventory.stock.shipped",
            "inventory.stock.adjusted",
            "inventory.stock.reserved",
        ]
    );

    let item = h
        .dispatcher
        .load::<InventoryItem>(h.tenant_id, product.0, |_, id| InventoryItem::empty(InventoryItemId::new(id)))
        .unwrap();
    assert_eq!(item.on_hand(), 50);
    assert_eq!(item.batch("B2").map(|b| b.on_hand), Some(44));
    assert_eq!(item.reserved_for(&order_id.to_string()), 10);
    eventually(|| h.on_hand(product) == Some((50, 10)));

    let order = h
        .dispatcher
        .load::<SalesOrder>(h.tenant_id, order_id.0, |_, id| SalesOrder::empty(SalesOrderId::new(id)))
        .unwrap();
    assert_eq!(order.status(), SalesOrderStatus::Confirmed);
}

#[test]
fn failed_release_after_cancellation_is_reported() {
    let h = setup();
    let product = h.product("T-1300", 4);
    h.receive(product, "B1", 30);
    let order_id = h.order(OrderKind::Stock, &[(product, 12)]);
    h.fulfillment.confirm_order(h.tenant_id, order_id, Utc::now()).unwrap();

    h.store.refuse("inventory.stock.reservation_released");
    let err = h
        .fulfillment
        .cancel_order(h.tenant_id, order_id, "duplicate order", Utc::now())
        .unwrap_err();
    h.store.heal();

    assert!(matches!(err, FulfillmentError::Incomplete { .. }));
    assert_eq!(err.committed()[0].event_type, "sales.order.cancelled");
    eventually(|| h.order_status(order_id) == Some(SalesOrderStatus::Cancelled));
    eventually(|| h.on_hand(product) == Some((30, 12)));
}

#[test]
fn product_without_an_item_is_archived_and_frees_its_sku() {
    let h = setup();

    h.store.refuse("inventory.item.opened");
    let first = h.create_cmd("T-1400", 4);
    let first_id = first.product_id;
    let err = h.catalogue.create_product(first).unwrap_err();
    h.store.heal();

    assert!(matches!(
        &err,
        FulfillmentError::Reverted {
            cause: DispatchError::Store(_),
            ..
        }
    ));
    let types: Vec<&str> = err.committed().iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, ["products.product.created", "products.product.archived"]);
    assert_eq!(
        h.projections.products.get(h.tenant_id, &first_id).map(|p| p.status),
        Some(ProductStatus::Archived)
    );

    let second = h.create_cmd("t-1400", 4);
    let second_id = second.product_id;
    h.catalogue.create_product(second).unwrap();
    assert!(h.projections.inventory.get(h.tenant_id, &InventoryItemId::new(second_id.0)).is_some());

    let third = h.catalogue.create_product(h.create_cmd("T-1400", 4)).unwrap_err();
    assert!(matches!(third, FulfillmentError::Dispatch(DispatchError::Conflict(_))));
}

#[test]
fn concurrent_creates_of_one_sku_admit_one_product() {
    let h = Arc::new(setup());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            std::thread::spawn(move || h.catalogue.create_product(h.create_cmd("T-1500", 4)).is_ok())
        })
        .collect();
    let created = handles.into_iter().map(|t| t.join().unwrap()).filter(|ok| *ok).count();

    assert_eq!(created, 1);
    let with_sku = h
        .projections
        .products
        .list(h.tenant_id)
        .into_iter()
        .filter(|p| p.sku == "T-1500")
        .count();
    assert_eq!(with_sku, 1);
}

#[test]
fn stock_above_the_product_ceiling_is_overstocked() {
    let h = setup();
    let mut cmd = h.create_cmd("T-1600", 4);
    cmd.max_stock_units = Some(5);
    let product = cmd.product_id;
    h.catalogue.create_product(cmd).unwrap();

    h.receive(product, "B1", 20);
    eventually(|| h.on_hand(product) == Some((20, 0)));
    let level = |h: &Harness| {
        let item = h.projections.inventory.get(h.tenant_id, &InventoryItemId::new(product.0)).unwrap();
        let thresholds = h.projections.thresholds_for(h.tenant_id, &item);
        classify(item.available, item.on_hand, &thresholds)
    };
    assert_eq!(level(&h), StockLevel::Normal);

    h.receive(product, "B2", 1);
    eventually(|| h.on_hand(product) == Some((21, 0)));
    assert_eq!(level(&h), StockLevel::Overstocked);
}
