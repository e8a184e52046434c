use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tileerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tileerp_events::Event;
use tileerp_products::ProductId;

use crate::totals::{self, OrderTotals};

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Where the goods come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Shipped out of our own warehouse stock.
    Stock,
    /// Delivered directly by a supplier; never touches our inventory.
    Transfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    PartiallyShipped,
    Shipped,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    Cheque,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Order line. Quantities are pieces, prices are per piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pieces_per_unit: u32,
    pub quantity: u64,
    pub unit_price: u64,
    pub unit_cost: Option<u64>,
    /// Supplier delivering a transfer line.
    pub supplier: Option<String>,
    pub shipped: u64,
    pub returned: u64,
}

impl SalesOrderLine {
    pub fn outstanding(&self) -> u64 {
        self.quantity - self.shipped
    }

    pub fn returnable(&self) -> u64 {
        self.shipped - self.returned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuantity {
    pub line_no: u32,
    pub quantity: u64,
}

/// Production batch a shipped line left the warehouse from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippedBatch {
    pub line_no: u32,
    pub batch_no: String,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_no: String,
    pub amount: u64,
    pub method: PaymentMethod,
    pub note: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub return_no: String,
    pub lines: Vec<LineQuantity>,
    /// Value of the returned goods at the order's prices.
    pub credit_amount: u64,
    /// Money handed back to the customer.
    pub refund_amount: u64,
    pub reason: String,
    /// Whether the goods go back into sellable stock.
    pub restock: bool,
    pub returned_at: DateTime<Utc>,
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    order_no: String,
    kind: OrderKind,
    customer: Option<Customer>,
    note: Option<String>,
    status: SalesOrderStatus,
    lines: Vec<SalesOrderLine>,
    discount: u64,
    freight: u64,
    payments: Vec<PaymentRecord>,
    returns: Vec<ReturnRecord>,
    shipments: u32,
    shipped_batches: Vec<ShippedBatch>,
    version: u64,
    created: bool,
}

impl SalesOrder {
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_no: String::new(),
            kind: OrderKind::Stock,
            customer: None,
            note: None,
            status: SalesOrderStatus::Draft,
            lines: Vec::new(),
            discount: 0,
            freight: 0,
            payments: Vec::new(),
            returns: Vec::new(),
            shipments: 0,
            shipped_batches: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn order_no(&self) -> &str {
        &self.order_no
    }

    pub fn kind(&self) -> OrderKind {
        self.kind
    }

    pub fn customer(&self) -> Option<&Customer> {
        self.customer.as_ref()
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[SalesOrderLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&SalesOrderLine> {
        self.lines.iter().find(|l| l.line_no == line_no)
    }

    pub fn payments(&self) -> &[PaymentRecord] {
        &self.payments
    }

    pub fn returns(&self) -> &[ReturnRecord] {
        &self.returns
    }

    pub fn shipped_batches(&self) -> &[ShippedBatch] {
        &self.shipped_batches
    }

    /// Batches that `quantity` more returned pieces of a line go back to.
    ///
    /// Returns are matched newest shipment first. Pieces returned earlier
    /// on the line are taken to have used up the newest batches already.
    /// The result falls short of `quantity` when the line has no recorded
    /// batches left to cover it.
    pub fn return_batches(&self, line_no: u32, quantity: u64) -> Vec<ShippedBatch> {
        let mut skip = self.line(line_no).map(|l| l.returned).unwrap_or(0);
        let mut remaining = quantity;
        let mut out: Vec<ShippedBatch> = Vec::new();
        for shipped in self.shipped_batches.iter().rev().filter(|b| b.line_no == line_no) {
            if remaining == 0 {
                break;
            }
            let used = skip.min(shipped.quantity);
            skip -= used;
            let take = (shipped.quantity - used).min(remaining);
            if take == 0 {
                continue;
            }
            remaining -= take;
            match out.iter_mut().find(|b| b.batch_no == shipped.batch_no) {
                Some(b) => b.quantity += take,
                None => out.push(ShippedBatch {
                    line_no,
                    batch_no: shipped.batch_no.clone(),
                    quantity: take,
                }),
            }
        }
        out
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SalesOrderStatus::Draft)
    }

    pub fn has_shipments(&self) -> bool {
        self.lines.iter().any(|l| l.shipped > 0)
    }

    pub fn totals(&self) -> OrderTotals {
        totals::compute(&self.lines, self.discount, self.freight, &self.payments, &self.returns)
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_no: String,
    pub kind: OrderKind,
    pub customer: Customer,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub pieces_per_unit: u32,
    pub quantity: u64,
    pub unit_price: u64,
    pub unit_cost: Option<u64>,
    pub supplier: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLine {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCharges {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub discount: u64,
    pub freight: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordShipment {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub lines: Vec<LineQuantity>,
    /// Empty for transfer orders.
    pub batches: Vec<ShippedBatch>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordReturn {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub lines: Vec<LineQuantity>,
    pub refund_amount: u64,
    pub reason: String,
    pub restock: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    AddLine(AddLine),
    RemoveLine(RemoveLine),
    SetCharges(SetCharges),
    ConfirmOrder(ConfirmOrder),
    RecordShipment(RecordShipment),
    RecordPayment(RecordPayment),
    RecordReturn(RecordReturn),
    CompleteOrder(CompleteOrder),
    CancelOrder(CancelOrder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_no: String,
    pub kind: OrderKind,
    pub customer: Customer,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line: SalesOrderLine,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargesSet {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub discount: u64,
    pub freight: u64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRecorded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub shipment_no: String,
    pub lines: Vec<LineQuantity>,
    #[serde(default)]
    pub batches: Vec<ShippedBatch>,
    pub status_after: SalesOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub payment: PaymentRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecorded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub record: ReturnRecord,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    LineAdded(LineAdded),
    LineRemoved(LineRemoved),
    ChargesSet(ChargesSet),
    OrderConfirmed(OrderConfirmed),
    ShipmentRecorded(ShipmentRecorded),
    PaymentRecorded(PaymentRecorded),
    ReturnRecorded(ReturnRecorded),
    OrderCompleted(OrderCompleted),
    OrderCancelled(OrderCancelled),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => "sales.order.created",
            SalesOrderEvent::LineAdded(_) => "sales.order.line_added",
            SalesOrderEvent::LineRemoved(_) => "sales.order.line_removed",
            SalesOrderEvent::ChargesSet(_) => "sales.order.charges_set",
            SalesOrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            SalesOrderEvent::ShipmentRecorded(_) => "sales.order.shipment_recorded",
            SalesOrderEvent::PaymentRecorded(_) => "sales.order.payment_recorded",
            SalesOrderEvent::ReturnRecorded(_) => "sales.order.return_recorded",
            SalesOrderEvent::OrderCompleted(_) => "sales.order.completed",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::LineAdded(e) => e.occurred_at,
            SalesOrderEvent::LineRemoved(e) => e.occurred_at,
            SalesOrderEvent::ChargesSet(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::ShipmentRecorded(e) => e.occurred_at,
            SalesOrderEvent::PaymentRecorded(e) => e.occurred_at,
            SalesOrderEvent::ReturnRecorded(e) => e.occurred_at,
            SalesOrderEvent::OrderCompleted(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_no = e.order_no.clone();
                self.kind = e.kind;
                self.customer = Some(e.customer.clone());
                self.note = e.note.clone();
                self.status = SalesOrderStatus::Draft;
                self.created = true;
            }
            SalesOrderEvent::LineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            SalesOrderEvent::LineRemoved(e) => {
                self.lines.retain(|l| l.line_no != e.line_no);
            }
            SalesOrderEvent::ChargesSet(e) => {
                self.discount = e.discount;
                self.freight = e.freight;
            }
            SalesOrderEvent::OrderConfirmed(_) => {
                self.status = SalesOrderStatus::Confirmed;
            }
            SalesOrderEvent::ShipmentRecorded(e) => {
                for shipped in &e.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == shipped.line_no) {
                        line.shipped += shipped.quantity;
                    }
                }
                self.shipped_batches.extend(e.batches.iter().cloned());
                self.shipments += 1;
                self.status = e.status_after;
            }
            SalesOrderEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
            }
            SalesOrderEvent::ReturnRecorded(e) => {
                for returned in &e.record.lines {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == returned.line_no) {
                        line.returned += returned.quantity;
                    }
                }
                self.returns.push(e.record.clone());
            }
            SalesOrderEvent::OrderCompleted(_) => {
                self.status = SalesOrderStatus::Completed;
            }
            SalesOrderEvent::OrderCancelled(_) => {
                self.status = SalesOrderStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            SalesOrderCommand::RemoveLine(cmd) => self.handle_remove_line(cmd),
            SalesOrderCommand::SetCharges(cmd) => self.handle_set_charges(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::RecordShipment(cmd) => self.handle_shipment(cmd),
            SalesOrderCommand::RecordPayment(cmd) => self.handle_payment(cmd),
            SalesOrderCommand::RecordReturn(cmd) => self.handle_return(cmd),
            SalesOrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

/// Reject duplicates and zero quantities in a per-line request.
fn validate_line_quantities(lines: &[LineQuantity]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("at least one line is required"));
    }
    for (idx, lq) in lines.iter().enumerate() {
        if lq.quantity == 0 {
            return Err(DomainError::validation(format!(
                "line {} quantity must be positive",
                lq.line_no
            )));
        }
        if lines[..idx].iter().any(|other| other.line_no == lq.line_no) {
            return Err(DomainError::validation(format!("line {} listed twice", lq.line_no)));
        }
    }
    Ok(())
}

impl SalesOrder {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_order_id(order_id)
    }

    fn ensure_draft(&self, action: &str) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(format!(
                "cannot {action}: order is {:?}, only draft orders can be modified",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        if cmd.order_no.trim().is_empty() {
            return Err(DomainError::validation("order_no cannot be empty"));
        }
        if cmd.customer.name.trim().is_empty() {
            return Err(DomainError::validation("customer name cannot be empty"));
        }

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            order_no: cmd.order_no.clone(),
            kind: cmd.kind,
            customer: cmd.customer.clone(),
            note: cmd.note.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_draft("add line")?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price == 0 {
            return Err(DomainError::validation("unit_price must be positive"));
        }
        if cmd.pieces_per_unit == 0 {
            return Err(DomainError::validation("pieces_per_unit must be at least 1"));
        }
        let line_amount = cmd
            .quantity
            .checked_mul(cmd.unit_price)
            .ok_or_else(|| DomainError::validation("line amount is too large"))?;
        if let Some(cost) = cmd.unit_cost {
            cmd.quantity
                .checked_mul(cost)
                .filter(|c| *c <= totals::MAX_AMOUNT)
                .ok_or_else(|| DomainError::validation("line cost is too large"))?;
        }
        totals::subtotal(&self.lines)
            .checked_add(line_amount)
            .and_then(|s| s.checked_add(self.freight))
            .filter(|t| *t <= totals::MAX_AMOUNT)
            .ok_or_else(|| DomainError::validation("order amount is too large"))?;

        if self.kind == OrderKind::Transfer {
            let has_supplier = cmd.supplier.as_deref().is_some_and(|s| !s.trim().is_empty());
            if !has_supplier {
                return Err(DomainError::validation("transfer lines need a supplier"));
            }
            if cmd.unit_cost.is_none() {
                return Err(DomainError::validation("transfer lines need a supplier unit_cost"));
            }
        }

        let line_no = self.lines.iter().map(|l| l.line_no).max().unwrap_or(0) + 1;

        Ok(vec![SalesOrderEvent::LineAdded(LineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line: SalesOrderLine {
                line_no,
                product_id: cmd.product_id,
                sku: cmd.sku.clone(),
                name: cmd.name.clone(),
                pieces_per_unit: cmd.pieces_per_unit,
                quantity: cmd.quantity,
                unit_price: cmd.unit_price,
                unit_cost: cmd.unit_cost,
                supplier: cmd.supplier.clone(),
                shipped: 0,
                returned: 0,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line(&self, cmd: &RemoveLine) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;
        self.ensure_draft("remove line")?;

        if self.line(cmd.line_no).is_none() {
            return Err(DomainError::validation(format!("line {} does not exist", cmd.line_no)));
        }

        Ok(vec![SalesOrderEvent::LineRemoved(LineRemoved {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_charges(&self, cmd: &SetCharges) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        let editable = match self.status {
            SalesOrderStatus::Draft => true,
            SalesOrderStatus::Confirmed => !self.has_shipments(),
            _ => false,
        };
        if !editable {
            return Err(DomainError::invariant(format!(
                "charges cannot change once an order is {:?}",
                self.status
            )));
        }

        let subtotal = totals::subtotal(&self.lines);
        if cmd.discount > subtotal {
            return Err(DomainError::validation(format!(
                "discount {} exceeds subtotal {}",
                cmd.discount, subtotal
            )));
        }

        (subtotal - cmd.discount)
            .checked_add(cmd.freight)
            .filter(|t| *t <= totals::MAX_AMOUNT)
            .ok_or_else(|| DomainError::validation("freight is too large"))?;

        let after = totals::compute(&self.lines, cmd.discount, cmd.freight, &self.payments, &self.returns);
        if after.balance_due < 0 {
            return Err(DomainError::invariant("new charges would leave the order overpaid"));
        }

        Ok(vec![SalesOrderEvent::ChargesSet(ChargesSet {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            discount: cmd.discount,
            freight: cmd.freight,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only draft orders can be confirmed (current: {:?})",
                self.status
            )));
        }
        if self.lines.is_empty() {
            return Err(DomainError::invariant("cannot confirm an order without lines"));
        }

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_shipment(&self, cmd: &RecordShipment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if !matches!(
            self.status,
            SalesOrderStatus::Confirmed | SalesOrderStatus::PartiallyShipped
        ) {
            return Err(DomainError::invariant(format!(
                "cannot ship an order that is {:?}",
                self.status
            )));
        }
        validate_line_quantities(&cmd.lines)?;

        for lq in &cmd.lines {
            let line = self
                .line(lq.line_no)
                .ok_or_else(|| DomainError::validation(format!("line {} does not exist", lq.line_no)))?;
            if lq.quantity > line.outstanding() {
                return Err(DomainError::invariant(format!(
                    "line {}: shipping {} pieces but only {} outstanding",
                    lq.line_no,
                    lq.quantity,
                    line.outstanding()
                )));
            }
        }

        for batch in &cmd.batches {
            let shipped_now = cmd
                .lines
                .iter()
                .find(|lq| lq.line_no == batch.line_no)
                .map(|lq| lq.quantity)
                .ok_or_else(|| {
                    DomainError::validation(format!("batch {} is for a line not in this shipment", batch.batch_no))
                })?;
            let batched: u64 = cmd
                .batches
                .iter()
                .filter(|b| b.line_no == batch.line_no)
                .map(|b| b.quantity)
                .sum();
            if batched > shipped_now {
                return Err(DomainError::validation(format!(
                    "line {}: batches cover {} pieces but only {} shipped",
                    batch.line_no, batched, shipped_now
                )));
            }
        }

        let fully_shipped = self.lines.iter().all(|line| {
            let now = cmd
                .lines
                .iter()
                .find(|lq| lq.line_no == line.line_no)
                .map(|lq| lq.quantity)
                .unwrap_or(0);
            line.shipped + now == line.quantity
        });
        let status_after = if fully_shipped {
            SalesOrderStatus::Shipped
        } else {
            SalesOrderStatus::PartiallyShipped
        };

        Ok(vec![SalesOrderEvent::ShipmentRecorded(ShipmentRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            shipment_no: format!("{}-S{}", self.order_no, self.shipments + 1),
            lines: cmd.lines.clone(),
            batches: cmd.batches.clone(),
            status_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_payment(&self, cmd: &RecordPayment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if matches!(self.status, SalesOrderStatus::Draft | SalesOrderStatus::Cancelled) {
            return Err(DomainError::invariant(format!(
                "payments are not accepted on {:?} orders",
                self.status
            )));
        }
        if cmd.amount == 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        let balance_due = u64::try_from(self.totals().balance_due.max(0)).unwrap_or(0);
        if cmd.amount > balance_due {
            return Err(DomainError::invariant(format!(
                "payment {} exceeds balance due {}",
                cmd.amount, balance_due
            )));
        }

        Ok(vec![SalesOrderEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            payment: PaymentRecord {
                payment_no: format!("{}-P{}", self.order_no, self.payments.len() + 1),
                amount: cmd.amount,
                method: cmd.method,
                note: cmd.note.clone(),
                received_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &RecordReturn) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if !matches!(
            self.status,
            SalesOrderStatus::PartiallyShipped | SalesOrderStatus::Shipped | SalesOrderStatus::Completed
        ) {
            return Err(DomainError::invariant(format!(
                "nothing has been delivered on a {:?} order",
                self.status
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a return needs a reason"));
        }
        validate_line_quantities(&cmd.lines)?;

        let mut credit_amount = 0u64;
        for lq in &cmd.lines {
            let line = self
                .line(lq.line_no)
                .ok_or_else(|| DomainError::validation(format!("line {} does not exist", lq.line_no)))?;
            if lq.quantity > line.returnable() {
                return Err(DomainError::invariant(format!(
                    "line {}: returning {} pieces but only {} delivered and not yet returned",
                    lq.line_no,
                    lq.quantity,
                    line.returnable()
                )));
            }
            credit_amount = lq
                .quantity
                .checked_mul(line.unit_price)
                .and_then(|amount| credit_amount.checked_add(amount))
                .ok_or_else(|| DomainError::validation("return amount is too large"))?;
        }

        let net_paid = self.totals().net_paid;
        if cmd.refund_amount > net_paid {
            return Err(DomainError::invariant(format!(
                "refund {} exceeds amount paid {}",
                cmd.refund_amount, net_paid
            )));
        }
        if cmd.refund_amount > credit_amount {
            return Err(DomainError::invariant(format!(
                "refund {} exceeds value of returned goods {}",
                cmd.refund_amount, credit_amount
            )));
        }

        Ok(vec![SalesOrderEvent::ReturnRecorded(ReturnRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            record: ReturnRecord {
                return_no: format!("{}-R{}", self.order_no, self.returns.len() + 1),
                lines: cmd.lines.clone(),
                credit_amount,
                refund_amount: cmd.refund_amount,
                reason: cmd.reason.clone(),
                restock: cmd.restock,
                returned_at: cmd.occurred_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        if self.status != SalesOrderStatus::Shipped {
            return Err(DomainError::invariant(format!(
                "only fully shipped orders can be completed (current: {:?})",
                self.status
            )));
        }
        let balance_due = self.totals().balance_due;
        if balance_due > 0 {
            return Err(DomainError::invariant(format!(
                "order still has {balance_due} outstanding"
            )));
        }

        Ok(vec![SalesOrderEvent::OrderCompleted(OrderCompleted {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.order_id)?;

        match self.status {
            SalesOrderStatus::Draft | SalesOrderStatus::Confirmed => {}
            SalesOrderStatus::Cancelled => {
                return Err(DomainError::conflict("order is already cancelled"));
            }
            other => {
                return Err(DomainError::invariant(format!(
                    "cannot cancel an order that is {other:?}"
                )));
            }
        }
        if self.totals().net_paid > 0 {
            return Err(DomainError::invariant("refund payments before cancelling"));
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totals::PaymentStatus;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> SalesOrderId {
        SalesOrderId::new(AggregateId::new())
    }

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    struct Fixture {
        tenant_id: TenantId,
        order_id: SalesOrderId,
        order: SalesOrder,
    }

    impl Fixture {
        fn new(kind: OrderKind) -> Self {
            let tenant_id = test_tenant_id();
            let order_id = test_order_id();
            let mut fx = Self {
                tenant_id,
                order_id,
                order: SalesOrder::empty(order_id),
            };
            fx.run(SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id,
                order_no: "SO-000001".to_string(),
                kind,
                customer: Customer {
                    name: "Acme Builders".to_string(),
                    phone: Some("555-0100".to_string()),
                    address: None,
                },
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap();
            fx
        }

        fn run(&mut self, cmd: SalesOrderCommand) -> Result<Vec<SalesOrderEvent>, DomainError> {
            let events = self.order.handle(&cmd)?;
            for e in &events {
                self.order.apply(e);
            }
            Ok(events)
        }

        fn add_line(&mut self, quantity: u64, unit_price: u64) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::AddLine(AddLine {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                product_id: test_product_id(),
                sku: "FT-6060".to_string(),
                name: "Floor tile".to_string(),
                pieces_per_unit: 4,
                quantity,
                unit_price,
                unit_cost: Some(unit_price / 2),
                supplier: None,
                occurred_at: test_time(),
            }))
        }

        fn confirm(&mut self) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                occurred_at: test_time(),
            }))
        }

        fn ship(&mut self, lines: &[(u32, u64)]) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::RecordShipment(RecordShipment {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                lines: lines
                    .iter()
                    .map(|(line_no, quantity)| LineQuantity { line_no: *line_no, quantity: *quantity })
                    .collect(),
                batches: Vec::new(),
                occurred_at: test_time(),
            }))
        }

        fn pay(&mut self, amount: u64) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::RecordPayment(RecordPayment {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                amount,
                method: PaymentMethod::BankTransfer,
                note: None,
                occurred_at: test_time(),
            }))
        }

        fn return_goods(&mut self, lines: &[(u32, u64)], refund: u64) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::RecordReturn(RecordReturn {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                lines: lines
                    .iter()
                    .map(|(line_no, quantity)| LineQuantity { line_no: *line_no, quantity: *quantity })
                    .collect(),
                refund_amount: refund,
                reason: "wrong shade".to_string(),
                restock: true,
                occurred_at: test_time(),
            }))
        }

        fn complete(&mut self) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::CompleteOrder(CompleteOrder {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                occurred_at: test_time(),
            }))
        }

        fn cancel(&mut self) -> Result<Vec<SalesOrderEvent>, DomainError> {
            self.run(SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id: self.tenant_id,
                order_id: self.order_id,
                reason: "customer changed mind".to_string(),
                occurred_at: test_time(),
            }))
        }
    }

    fn expect_invariant(result: Result<Vec<SalesOrderEvent>, DomainError>, needle: &str) {
        match result {
            Err(DomainError::InvariantViolation(msg)) if msg.contains(needle) => {}
            other => panic!("expected InvariantViolation containing '{needle}', got: {other:?}"),
        }
    }

    #[test]
    fn create_sales_order_emits_created_event() {
        let fx = Fixture::new(OrderKind::Stock);
        assert_eq!(fx.order.order_no(), "SO-000001");
        assert_eq!(fx.order.status(), SalesOrderStatus::Draft);
        assert_eq!(fx.order.customer().unwrap().name, "Acme Builders");
        assert_eq!(fx.order.version(), 1);
    }

    #[test]
    fn create_requires_customer_name() {
        let order_id = test_order_id();
        let err = SalesOrder::empty(order_id)
            .handle(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id: test_tenant_id(),
                order_id,
                order_no: "SO-1".to_string(),
                kind: OrderKind::Stock,
                customer: Customer { name: " ".to_string(), phone: None, address: None },
                note: None,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn add_line_numbers_lines_sequentially() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 1_000).unwrap();
        let events = fx.add_line(5, 2_000).unwrap();
        match &events[0] {
            SalesOrderEvent::LineAdded(e) => assert_eq!(e.line.line_no, 2),
            _ => panic!("Expected LineAdded event"),
        }
        assert_eq!(fx.order.totals().subtotal, 20_000);
    }

    #[test]
    fn add_line_rejects_zero_quantity_or_price() {
        let mut fx = Fixture::new(OrderKind::Stock);
        assert!(matches!(fx.add_line(0, 100), Err(DomainError::Validation(_))));
        assert!(matches!(fx.add_line(1, 0), Err(DomainError::Validation(_))));
    }

    #[test]
    fn transfer_lines_need_supplier_and_cost() {
        let mut fx = Fixture::new(OrderKind::Transfer);
        let mut cmd = AddLine {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            product_id: test_product_id(),
            sku: "MOS-01".to_string(),
            name: "Glass mosaic".to_string(),
            pieces_per_unit: 11,
            quantity: 22,
            unit_price: 900,
            unit_cost: None,
            supplier: Some("Ceramica Sud".to_string()),
            occurred_at: test_time(),
        };
        assert!(matches!(
            fx.run(SalesOrderCommand::AddLine(cmd.clone())),
            Err(DomainError::Validation(msg)) if msg.contains("unit_cost")
        ));

        cmd.unit_cost = Some(650);
        cmd.supplier = None;
        assert!(matches!(
            fx.run(SalesOrderCommand::AddLine(cmd.clone())),
            Err(DomainError::Validation(msg)) if msg.contains("supplier")
        ));

        cmd.supplier = Some("Ceramica Sud".to_string());
        fx.run(SalesOrderCommand::AddLine(cmd)).unwrap();

        let totals = fx.order.totals();
        assert_eq!(totals.cost_total, 22 * 650);
        assert_eq!(totals.gross_profit, 22 * 250);
    }

    #[test]
    fn remove_line_only_in_draft() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.add_line(10, 100).unwrap();
        fx.run(SalesOrderCommand::RemoveLine(RemoveLine {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            line_no: 1,
            occurred_at: test_time(),
        }))
        .unwrap();
        assert_eq!(fx.order.lines().len(), 1);

        fx.confirm().unwrap();
        expect_invariant(
            fx.run(SalesOrderCommand::RemoveLine(RemoveLine {
                tenant_id: fx.tenant_id,
                order_id: fx.order_id,
                line_no: 2,
                occurred_at: test_time(),
            })),
            "only draft orders can be modified",
        );
    }

    #[test]
    fn discount_cannot_exceed_subtotal() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        let err = fx
            .run(SalesOrderCommand::SetCharges(SetCharges {
                tenant_id: fx.tenant_id,
                order_id: fx.order_id,
                discount: 1_001,
                freight: 0,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("discount")));
    }

    #[test]
    fn cannot_confirm_empty_order() {
        let mut fx = Fixture::new(OrderKind::Stock);
        expect_invariant(fx.confirm(), "without lines");
    }

    #[test]
    fn partial_then_full_shipment_moves_status() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.add_line(4, 100).unwrap();
        fx.confirm().unwrap();

        let events = fx.ship(&[(1, 6)]).unwrap();
        match &events[0] {
            SalesOrderEvent::ShipmentRecorded(e) => assert_eq!(e.shipment_no, "SO-000001-S1"),
            _ => panic!("Expected ShipmentRecorded"),
        }
        assert_eq!(fx.order.status(), SalesOrderStatus::PartiallyShipped);

        fx.ship(&[(1, 4), (2, 4)]).unwrap();
        assert_eq!(fx.order.status(), SalesOrderStatus::Shipped);
        assert!(fx.order.lines().iter().all(|l| l.shipped == l.quantity));
    }

    #[test]
    fn cannot_ship_more_than_ordered() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.ship(&[(1, 8)]).unwrap();

        expect_invariant(fx.ship(&[(1, 3)]), "only 2 outstanding");
        assert!(matches!(fx.ship(&[(1, 1), (1, 1)]), Err(DomainError::Validation(_))));
        assert!(matches!(fx.ship(&[(9, 1)]), Err(DomainError::Validation(_))));
    }

    #[test]
    fn shipment_remembers_batches() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();

        let over = fx.run(SalesOrderCommand::RecordShipment(RecordShipment {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            lines: vec![LineQuantity { line_no: 1, quantity: 4 }],
            batches: vec![ShippedBatch { line_no: 1, batch_no: "B1".to_string(), quantity: 5 }],
            occurred_at: test_time(),
        }));
        assert!(matches!(over, Err(DomainError::Validation(_))));

        fx.run(SalesOrderCommand::RecordShipment(RecordShipment {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            lines: vec![LineQuantity { line_no: 1, quantity: 4 }],
            batches: vec![
                ShippedBatch { line_no: 1, batch_no: "B1".to_string(), quantity: 1 },
                ShippedBatch { line_no: 1, batch_no: "B2".to_string(), quantity: 3 },
            ],
            occurred_at: test_time(),
        }))
        .unwrap();

        assert_eq!(fx.order.shipped_batches().len(), 2);
        assert_eq!(fx.order.return_batches(1, 1)[0].batch_no, "B2");
        assert!(fx.order.return_batches(2, 1).is_empty());
    }

    #[test]
    fn returns_go_back_to_the_newest_batches_first() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.run(SalesOrderCommand::RecordShipment(RecordShipment {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            lines: vec![LineQuantity { line_no: 1, quantity: 8 }],
            batches: vec![
                ShippedBatch { line_no: 1, batch_no: "A".to_string(), quantity: 5 },
                ShippedBatch { line_no: 1, batch_no: "B".to_string(), quantity: 3 },
            ],
            occurred_at: test_time(),
        }))
        .unwrap();

        let split: Vec<(String, u64)> = fx
            .order
            .return_batches(1, 6)
            .into_iter()
            .map(|b| (b.batch_no, b.quantity))
            .collect();
        assert_eq!(split, vec![("B".to_string(), 3), ("A".to_string(), 3)]);

        // After two pieces came back, the next return starts one piece into B.
        fx.return_goods(&[(1, 2)], 0).unwrap();
        let split: Vec<(String, u64)> = fx
            .order
            .return_batches(1, 4)
            .into_iter()
            .map(|b| (b.batch_no, b.quantity))
            .collect();
        assert_eq!(split, vec![("B".to_string(), 1), ("A".to_string(), 3)]);

        let short = fx.order.return_batches(1, 20);
        assert_eq!(short.iter().map(|b| b.quantity).sum::<u64>(), 6);
    }

    #[test]
    fn cannot_ship_draft_order() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        expect_invariant(fx.ship(&[(1, 1)]), "cannot ship");
    }

    #[test]
    fn payments_cannot_exceed_balance() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        expect_invariant(fx.pay(100), "not accepted");

        fx.confirm().unwrap();
        let events = fx.pay(400).unwrap();
        match &events[0] {
            SalesOrderEvent::PaymentRecorded(e) => assert_eq!(e.payment.payment_no, "SO-000001-P1"),
            _ => panic!("Expected PaymentRecorded"),
        }
        assert_eq!(fx.order.totals().payment_status, PaymentStatus::Partial);

        expect_invariant(fx.pay(601), "exceeds balance due");
        fx.pay(600).unwrap();
        assert_eq!(fx.order.totals().payment_status, PaymentStatus::Paid);
        expect_invariant(fx.pay(1), "exceeds balance due");
    }

    #[test]
    fn oversized_payment_is_rejected_not_wrapped() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();

        expect_invariant(fx.pay(u64::MAX), "exceeds balance due");
        expect_invariant(fx.pay(i64::MAX as u64 + 1), "exceeds balance due");

        let t = fx.order.totals();
        assert_eq!(t.net_paid, 0);
        assert_eq!(t.balance_due, 1_000);
        fx.pay(1_000).unwrap();
        assert_eq!(fx.order.totals().payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn order_amounts_are_bounded() {
        let mut fx = Fixture::new(OrderKind::Stock);
        assert!(matches!(fx.add_line(u64::MAX, 2), Err(DomainError::Validation(_))));
        assert!(matches!(fx.add_line(i64::MAX as u64, 2), Err(DomainError::Validation(_))));

        fx.add_line(1, i64::MAX as u64 - 10).unwrap();
        assert!(matches!(fx.add_line(1, 11), Err(DomainError::Validation(_))));
        fx.add_line(1, 10).unwrap();
        assert_eq!(fx.order.totals().total, i64::MAX as u64);
    }

    #[test]
    fn return_credit_covers_a_line_at_the_amount_limit() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(2, i64::MAX as u64 / 2).unwrap();
        fx.confirm().unwrap();
        fx.ship(&[(1, 2)]).unwrap();

        let events = fx.return_goods(&[(1, 2)], 0).unwrap();
        match &events[0] {
            SalesOrderEvent::ReturnRecorded(e) => assert_eq!(e.record.credit_amount, (i64::MAX as u64 / 2) * 2),
            _ => panic!("Expected ReturnRecorded"),
        }
    }

    #[test]
    fn returns_are_limited_to_delivered_quantity() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.ship(&[(1, 6)]).unwrap();

        expect_invariant(fx.return_goods(&[(1, 7)], 0), "only 6 delivered");
        fx.return_goods(&[(1, 2)], 0).unwrap();
        assert_eq!(fx.order.line(1).unwrap().returned, 2);
        expect_invariant(fx.return_goods(&[(1, 5)], 0), "only 4 delivered");
    }

    #[test]
    fn refund_is_capped_by_payments_and_goods_value() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.pay(150).unwrap();
        fx.ship(&[(1, 10)]).unwrap();

        expect_invariant(fx.return_goods(&[(1, 3)], 200), "exceeds amount paid");
        expect_invariant(fx.return_goods(&[(1, 1)], 150), "exceeds value of returned goods");

        let events = fx.return_goods(&[(1, 3)], 100).unwrap();
        match &events[0] {
            SalesOrderEvent::ReturnRecorded(e) => {
                assert_eq!(e.record.return_no, "SO-000001-R1");
                assert_eq!(e.record.credit_amount, 300);
            }
            _ => panic!("Expected ReturnRecorded"),
        }

        let totals = fx.order.totals();
        assert_eq!(totals.adjusted_total, 700);
        assert_eq!(totals.net_paid, 50);
        assert_eq!(totals.balance_due, 650);
    }

    #[test]
    fn complete_requires_full_shipment_and_payment() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        expect_invariant(fx.complete(), "only fully shipped");

        fx.ship(&[(1, 10)]).unwrap();
        expect_invariant(fx.complete(), "outstanding");

        fx.pay(1_000).unwrap();
        fx.complete().unwrap();
        assert_eq!(fx.order.status(), SalesOrderStatus::Completed);
    }

    #[test]
    fn cancel_rules() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.pay(100).unwrap();
        expect_invariant(fx.cancel(), "refund payments");

        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.cancel().unwrap();
        assert_eq!(fx.order.status(), SalesOrderStatus::Cancelled);
        assert!(matches!(fx.cancel(), Err(DomainError::Conflict(_))));
        expect_invariant(fx.pay(1), "not accepted");

        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        fx.confirm().unwrap();
        fx.ship(&[(1, 1)]).unwrap();
        expect_invariant(fx.cancel(), "cannot cancel");
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let mut fx = Fixture::new(OrderKind::Stock);
        fx.add_line(10, 100).unwrap();
        let before = fx.order.clone();
        let _ = fx.order.handle(&SalesOrderCommand::ConfirmOrder(ConfirmOrder {
            tenant_id: fx.tenant_id,
            order_id: fx.order_id,
            occurred_at: test_time(),
        }));
        assert_eq!(fx.order, before);
    }

    #[test]
    fn other_tenant_is_rejected() {
        let fx = Fixture::new(OrderKind::Stock);
        let err = fx
            .order
            .handle(&SalesOrderCommand::ConfirmOrder(ConfirmOrder {
                tenant_id: test_tenant_id(),
                order_id: fx.order_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(msg) if msg.contains("tenant")));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Ship(u32, u64),
            Pay(u64),
            Return(u32, u64, u64),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1u32..4, 1u64..15).prop_map(|(l, q)| Op::Ship(l, q)),
                (1u64..3_000).prop_map(Op::Pay),
                (1u32..4, 1u64..10, 0u64..1_000).prop_map(|(l, q, r)| Op::Return(l, q, r)),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 300,
                ..ProptestConfig::default()
            })]

            /// shipped <= ordered, returned <= shipped, refunds <= payments.
            #[test]
            fn fulfilment_bounds_hold(ops in prop::collection::vec(op(), 1..30)) {
                let mut fx = Fixture::new(OrderKind::Stock);
                fx.add_line(10, 100).unwrap();
                fx.add_line(5, 250).unwrap();
                fx.add_line(8, 75).unwrap();
                fx.confirm().unwrap();

                for op in ops {
                    let _ = match op {
                        Op::Ship(l, q) => fx.ship(&[(l, q)]),
                        Op::Pay(a) => fx.pay(a),
                        Op::Return(l, q, r) => fx.return_goods(&[(l, q)], r),
                    };

                    for line in fx.order.lines() {
                        prop_assert!(line.shipped <= line.quantity);
                        prop_assert!(line.returned <= line.shipped);
                    }
                    let t = fx.order.totals();
                    prop_assert!(t.refunded <= t.paid);
                    prop_assert!(t.net_paid <= t.adjusted_total || t.credited > 0);
                }
            }
        }
    }
}
