use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tileerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tileerp_events::Event;

use crate::batch::{BatchAllocation, BatchStock, allocate, allocate_from};
use crate::quantity::PiecesPerUnit;

/// Inventory item identifier. Equal to the product id it tracks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(pub AggregateId);

impl InventoryItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InventoryItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundKind {
    Purchase,
    /// Goods brought back by a customer.
    Return,
    /// Initial count when the system is taken into use.
    Opening,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Sale,
    Damage,
    Other,
}

/// Aggregate root: stock of one product, per batch, plus open reservations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    id: InventoryItemId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    pieces_per_unit: Option<PiecesPerUnit>,
    /// Receipt order is allocation order.
    batches: Vec<BatchStock>,
    /// Pieces held back per reference (sales order id).
    reservations: BTreeMap<String, u64>,
    version: u64,
    created: bool,
}

impl InventoryItem {
    pub fn empty(id: InventoryItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            pieces_per_unit: None,
            batches: Vec::new(),
            reservations: BTreeMap::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pieces_per_unit(&self) -> Option<PiecesPerUnit> {
        self.pieces_per_unit
    }

    pub fn batches(&self) -> &[BatchStock] {
        &self.batches
    }

    pub fn batch(&self, batch_no: &str) -> Option<&BatchStock> {
        self.batches.iter().find(|b| b.batch_no == batch_no)
    }

    pub fn reservations(&self) -> &BTreeMap<String, u64> {
        &self.reservations
    }

    pub fn reserved_for(&self, reference: &str) -> u64 {
        self.reservations.get(reference).copied().unwrap_or(0)
    }

    pub fn on_hand(&self) -> u64 {
        self.batches.iter().map(|b| b.on_hand).sum()
    }

    pub fn reserved(&self) -> u64 {
        self.reservations.values().sum()
    }

    /// What can still be promised to new orders.
    pub fn available(&self) -> u64 {
        self.on_hand().saturating_sub(self.reserved())
    }
}

impl AggregateRoot for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenItem {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub sku: String,
    pub name: String,
    pub pieces_per_unit: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Inbound record. Quantities are in pieces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub batch_no: String,
    pub quantity: u64,
    pub unit_cost: Option<u64>,
    pub kind: InboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Outbound record.
///
/// With a `reference`, any reservation held under it is consumed first, so an
/// order can ship stock that was reserved for it even when `available` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub quantity: u64,
    /// Restrict to one batch; otherwise batches are picked automatically.
    pub batch_no: Option<String>,
    pub kind: OutboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Stocktake correction on one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub batch_no: String,
    pub delta: i64,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Release part (`Some`) or all (`None`) of a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseReservation {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    OpenItem(OpenItem),
    ReceiveStock(ReceiveStock),
    ShipStock(ShipStock),
    AdjustStock(AdjustStock),
    ReserveStock(ReserveStock),
    ReleaseReservation(ReleaseReservation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOpened {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub sku: String,
    pub name: String,
    pub pieces_per_unit: PiecesPerUnit,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub batch_no: String,
    pub quantity: u64,
    pub unit_cost: Option<u64>,
    pub kind: InboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub on_hand_after: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShipped {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub quantity: u64,
    pub allocations: Vec<BatchAllocation>,
    pub kind: OutboundKind,
    pub reference: Option<String>,
    pub note: Option<String>,
    pub reservation_consumed: u64,
    pub on_hand_after: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub batch_no: String,
    pub delta: i64,
    pub reason: String,
    pub on_hand_after: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: u64,
    pub reserved_after: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReleased {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: u64,
    pub reserved_after: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemOpened(ItemOpened),
    StockReceived(StockReceived),
    StockShipped(StockShipped),
    StockAdjusted(StockAdjusted),
    StockReserved(StockReserved),
    ReservationReleased(ReservationReleased),
}

impl InventoryEvent {
    pub fn item_id(&self) -> InventoryItemId {
        match self {
            InventoryEvent::ItemOpened(e) => e.item_id,
            InventoryEvent::StockReceived(e) => e.item_id,
            InventoryEvent::StockShipped(e) => e.item_id,
            InventoryEvent::StockAdjusted(e) => e.item_id,
            InventoryEvent::StockReserved(e) => e.item_id,
            InventoryEvent::ReservationReleased(e) => e.item_id,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemOpened(_) => "inventory.item.opened",
            InventoryEvent::StockReceived(_) => "inventory.stock.received",
            InventoryEvent::StockShipped(_) => "inventory.stock.shipped",
            InventoryEvent::StockAdjusted(_) => "inventory.stock.adjusted",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::ReservationReleased(_) => "inventory.stock.reservation_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemOpened(e) => e.occurred_at,
            InventoryEvent::StockReceived(e) => e.occurred_at,
            InventoryEvent::StockShipped(e) => e.occurred_at,
            InventoryEvent::StockAdjusted(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::ReservationReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemOpened(e) => {
                self.id = e.item_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.pieces_per_unit = Some(e.pieces_per_unit);
                self.created = true;
            }
            InventoryEvent::StockReceived(e) => {
                match self.batches.iter_mut().find(|b| b.batch_no == e.batch_no) {
                    Some(batch) => {
                        batch.on_hand += e.quantity;
                        if batch.unit_cost.is_none() {
                            batch.unit_cost = e.unit_cost;
                        }
                    }
                    None => self.batches.push(BatchStock {
                        batch_no: e.batch_no.clone(),
                        on_hand: e.quantity,
                        unit_cost: e.unit_cost,
                        received_at: e.occurred_at,
                    }),
                }
            }
            InventoryEvent::StockShipped(e) => {
                for alloc in &e.allocations {
                    if let Some(batch) = self.batches.iter_mut().find(|b| b.batch_no == alloc.batch_no) {
                        batch.on_hand = batch.on_hand.saturating_sub(alloc.quantity);
                    }
                }
                if let Some(reference) = &e.reference {
                    self.take_reservation(reference, e.reservation_consumed);
                }
            }
            InventoryEvent::StockAdjusted(e) => {
                match self.batches.iter_mut().find(|b| b.batch_no == e.batch_no) {
                    Some(batch) => {
                        batch.on_hand = batch.on_hand.saturating_add_signed(e.delta);
                    }
                    None => self.batches.push(BatchStock {
                        batch_no: e.batch_no.clone(),
                        on_hand: e.delta.max(0).unsigned_abs(),
                        unit_cost: None,
                        received_at: e.occurred_at,
                    }),
                }
            }
            InventoryEvent::StockReserved(e) => {
                *self.reservations.entry(e.reference.clone()).or_insert(0) += e.quantity;
            }
            InventoryEvent::ReservationReleased(e) => {
                self.take_reservation(&e.reference, e.quantity);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::OpenItem(cmd) => self.handle_open(cmd),
            InventoryCommand::ReceiveStock(cmd) => self.handle_receive(cmd),
            InventoryCommand::ShipStock(cmd) => self.handle_ship(cmd),
            InventoryCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            InventoryCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            InventoryCommand::ReleaseReservation(cmd) => self.handle_release(cmd),
        }
    }
}

impl InventoryItem {
    fn take_reservation(&mut self, reference: &str, quantity: u64) {
        if let Some(held) = self.reservations.get_mut(reference) {
            *held = held.saturating_sub(quantity);
            if *held == 0 {
                self.reservations.remove(reference);
            }
        }
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_item_id(&self, item_id: InventoryItemId) -> Result<(), DomainError> {
        if self.id != item_id {
            return Err(DomainError::invariant("item_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, item_id: InventoryItemId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_item_id(item_id)
    }

    fn handle_open(&self, cmd: &OpenItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("inventory item already exists"));
        }
        self.ensure_item_id(cmd.item_id)?;
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let pieces_per_unit = PiecesPerUnit::new(cmd.pieces_per_unit)?;

        Ok(vec![InventoryEvent::ItemOpened(ItemOpened {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            sku: cmd.sku.clone(),
            name: cmd.name.clone(),
            pieces_per_unit,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.batch_no.trim().is_empty() {
            return Err(DomainError::validation("batch_no cannot be empty"));
        }
        let on_hand_after = self
            .on_hand()
            .checked_add(cmd.quantity)
            .ok_or_else(|| DomainError::validation("quantity is too large"))?;

        Ok(vec![InventoryEvent::StockReceived(StockReceived {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            batch_no: cmd.batch_no.trim().to_string(),
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            kind: cmd.kind,
            reference: cmd.reference.clone(),
            note: cmd.note.clone(),
            on_hand_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let held = cmd.reference.as_deref().map(|r| self.reserved_for(r)).unwrap_or(0);
        let reservation_consumed = held.min(cmd.quantity);
        let shippable = self.available() + reservation_consumed;
        if cmd.quantity > shippable {
            return Err(DomainError::invariant(format!(
                "insufficient available stock: requested {} pieces, {} available",
                cmd.quantity, shippable
            )));
        }

        let allocations = match &cmd.batch_no {
            Some(batch_no) => allocate_from(&self.batches, batch_no, cmd.quantity)?,
            None => allocate(&self.batches, cmd.quantity)?,
        };

        Ok(vec![InventoryEvent::StockShipped(StockShipped {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            allocations,
            kind: cmd.kind,
            reference: cmd.reference.clone(),
            note: cmd.note.clone(),
            reservation_consumed,
            on_hand_after: self.on_hand() - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.item_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta must be non-zero"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("an adjustment needs a reason"));
        }
        let batch_no = cmd.batch_no.trim();
        if batch_no.is_empty() {
            return Err(DomainError::validation("batch_no cannot be empty"));
        }

        let batch_on_hand = self.batch(batch_no).map(|b| b.on_hand).unwrap_or(0);
        let batch_after = batch_on_hand.checked_add_signed(cmd.delta).ok_or_else(|| {
            if cmd.delta < 0 {
                DomainError::invariant("stock cannot go negative")
            } else {
                DomainError::validation("delta is too large")
            }
        })?;

        let on_hand_after = (self.on_hand() - batch_on_hand)
            .checked_add(batch_after)
            .ok_or_else(|| DomainError::validation("delta is too large"))?;
        if on_hand_after < self.reserved() {
            return Err(DomainError::invariant(format!(
                "adjustment would leave {on_hand_after} pieces on hand but {} are reserved",
                self.reserved()
            )));
        }

        Ok(vec![InventoryEvent::StockAdjusted(StockAdjusted {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            batch_no: batch_no.to_string(),
            delta: cmd.delta,
            reason: cmd.reason.clone(),
            on_hand_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.item_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        if cmd.quantity > self.available() {
            return Err(DomainError::invariant(format!(
                "cannot reserve {} pieces, only {} available",
                cmd.quantity,
                self.available()
            )));
        }

        Ok(vec![InventoryEvent::StockReserved(StockReserved {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            reference: cmd.reference.clone(),
            quantity: cmd.quantity,
            reserved_after: self.reserved() + cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseReservation) -> Result<Vec<InventoryEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.item_id)?;

        let held = self.reserved_for(&cmd.reference);
        if held == 0 {
            return Err(DomainError::invariant(format!(
                "no reservation held for '{}'",
                cmd.reference
            )));
        }
        let quantity = match cmd.quantity {
            Some(0) => return Err(DomainError::validation("quantity must be positive")),
            Some(q) => q.min(held),
            None => held,
        };

        Ok(vec![InventoryEvent::ReservationReleased(ReservationReleased {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            reference: cmd.reference.clone(),
            quantity,
            reserved_after: self.reserved() - quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
