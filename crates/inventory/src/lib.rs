//! Inventory domain (event-sourced).
//!
//! Stock is always counted in pieces. A unit (box/crate) holds a fixed number
//! of pieces per product; [`quantity`] converts between the two. Each product
//! has one [`InventoryItem`] whose stream is the stock ledger: inbound,
//! outbound, adjustments and reservations, tracked per production batch.

pub mod alert;
pub mod batch;
pub mod item;
pub mod quantity;

pub use alert::{StockLevel, StockThresholds, classify};
pub use batch::{BatchAllocation, BatchStock, allocate, allocate_from};
pub use item::{
    AdjustStock, InboundKind, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId,
    ItemOpened, OpenItem, OutboundKind, ReceiveStock, ReleaseReservation, ReservationReleased,
    ReserveStock, ShipStock, StockAdjusted, StockReceived, StockReserved, StockShipped,
};
pub use quantity::{PiecesPerUnit, Quantity, units_to_cover};
