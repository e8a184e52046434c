//! Sales Orders domain module (event-sourced).
//!
//! Stock orders ship out of our warehouse; transfer orders are delivered by a
//! supplier and carry the supplier's cost per line. Payments, partial
//! shipments and returns are all recorded against the order.
//!
//! Pure domain logic: no IO, no HTTP, no storage.

pub mod order;
pub mod totals;

pub use order::{
    AddLine, CancelOrder, ChargesSet, CompleteOrder, ConfirmOrder, CreateSalesOrder, Customer,
    LineAdded, LineQuantity, LineRemoved, OrderCancelled, OrderCompleted, OrderConfirmed,
    OrderKind, PaymentMethod, PaymentRecord, PaymentRecorded, RecordPayment, RecordReturn,
    RecordShipment, RemoveLine, ReturnRecord, ReturnRecorded, SalesOrder, SalesOrderCommand,
    SalesOrderCreated, SalesOrderEvent, SalesOrderId, SalesOrderLine, SalesOrderStatus,
    SetCharges, ShipmentRecorded, ShippedBatch,
};
pub use totals::{LineFigures, OrderTotals, PaymentStatus};
