use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tileerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tileerp_events::Event;

pub const DEFAULT_ORDER_PREFIX: &str = "SO";

/// Company settings. One stream per tenant, keyed by `AggregateId::for_tenant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSettings {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    company_name: String,
    currency: String,
    order_number_prefix: String,
    default_low_stock_units: Option<u64>,
    next_order_seq: u64,
    version: u64,
    created: bool,
}

impl TenantSettings {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            company_name: String::new(),
            currency: String::new(),
            order_number_prefix: DEFAULT_ORDER_PREFIX.to_string(),
            default_low_stock_units: None,
            next_order_seq: 1,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn order_number_prefix(&self) -> &str {
        &self.order_number_prefix
    }

    pub fn default_low_stock_units(&self) -> Option<u64> {
        self.default_low_stock_units
    }

    pub fn next_order_seq(&self) -> u64 {
        self.next_order_seq
    }
}

impl AggregateRoot for TenantSettings {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeSettings {
    pub tenant_id: TenantId,
    pub company_name: String,
    pub currency: String,
    pub order_number_prefix: Option<String>,
    pub default_low_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub tenant_id: TenantId,
    pub company_name: Option<String>,
    pub currency: Option<String>,
    pub order_number_prefix: Option<String>,
    pub default_low_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateOrderNumber {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsCommand {
    InitializeSettings(InitializeSettings),
    UpdateSettings(UpdateSettings),
    AllocateOrderNumber(AllocateOrderNumber),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInitialized {
    pub tenant_id: TenantId,
    pub company_name: String,
    pub currency: String,
    pub order_number_prefix: String,
    pub default_low_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Carries the full resulting settings so read models never merge partials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub tenant_id: TenantId,
    pub company_name: String,
    pub currency: String,
    pub order_number_prefix: String,
    pub default_low_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderNumberAllocated {
    pub tenant_id: TenantId,
    pub seq: u64,
    pub order_no: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsEvent {
    SettingsInitialized(SettingsInitialized),
    SettingsUpdated(SettingsUpdated),
    OrderNumberAllocated(OrderNumberAllocated),
}

impl Event for SettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SettingsEvent::SettingsInitialized(_) => "settings.tenant.initialized",
            SettingsEvent::SettingsUpdated(_) => "settings.tenant.updated",
            SettingsEvent::OrderNumberAllocated(_) => "settings.tenant.order_number_allocated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SettingsEvent::SettingsInitialized(e) => e.occurred_at,
            SettingsEvent::SettingsUpdated(e) => e.occurred_at,
            SettingsEvent::OrderNumberAllocated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TenantSettings {
    type Command = SettingsCommand;
    type Event = SettingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SettingsEvent::SettingsInitialized(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.company_name = e.company_name.clone();
                self.currency = e.currency.clone();
                self.order_number_prefix = e.order_number_prefix.clone();
                self.default_low_stock_units = e.default_low_stock_units;
                self.created = true;
            }
            SettingsEvent::SettingsUpdated(e) => {
                self.company_name = e.company_name.clone();
                self.currency = e.currency.clone();
                self.order_number_prefix = e.order_number_prefix.clone();
                self.default_low_stock_units = e.default_low_stock_units;
            }
            SettingsEvent::OrderNumberAllocated(e) => {
                self.next_order_seq = e.seq + 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SettingsCommand::InitializeSettings(cmd) => self.handle_initialize(cmd),
            SettingsCommand::UpdateSettings(cmd) => self.handle_update(cmd),
            SettingsCommand::AllocateOrderNumber(cmd) => self.handle_allocate(cmd),
        }
    }
}

fn validate_currency(currency: &str) -> Result<String, DomainError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(DomainError::validation(format!(
            "currency must be a 3-letter ISO code, got '{currency}'"
        )));
    }
    Ok(currency.to_ascii_uppercase())
}

fn validate_prefix(prefix: &str) -> Result<String, DomainError> {
    let prefix = prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(DomainError::validation(
            "order number prefix must be non-empty and alphanumeric",
        ));
    }
    Ok(prefix.to_string())
}

fn validate_company_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("company_name cannot be empty"));
    }
    Ok(name.to_string())
}

impl TenantSettings {
    fn ensure_stream(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.id != AggregateId::for_tenant(tenant_id) {
            return Err(DomainError::invariant("settings stream does not belong to tenant"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        self.ensure_stream(tenant_id)
    }

    fn handle_initialize(&self, cmd: &InitializeSettings) -> Result<Vec<SettingsEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("settings already initialized"));
        }
        self.ensure_stream(cmd.tenant_id)?;

        let prefix = match cmd.order_number_prefix.as_deref() {
            Some(p) => validate_prefix(p)?,
            None => DEFAULT_ORDER_PREFIX.to_string(),
        };

        Ok(vec![SettingsEvent::SettingsInitialized(SettingsInitialized {
            tenant_id: cmd.tenant_id,
            company_name: validate_company_name(&cmd.company_name)?,
            currency: validate_currency(&cmd.currency)?,
            order_number_prefix: prefix,
            default_low_stock_units: cmd.default_low_stock_units,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateSettings) -> Result<Vec<SettingsEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;

        let company_name = match cmd.company_name.as_deref() {
            Some(n) => validate_company_name(n)?,
            None => self.company_name.clone(),
        };
        let currency = match cmd.currency.as_deref() {
            Some(c) => validate_currency(c)?,
            None => self.currency.clone(),
        };
        let order_number_prefix = match cmd.order_number_prefix.as_deref() {
            Some(p) => validate_prefix(p)?,
            None => self.order_number_prefix.clone(),
        };
        let default_low_stock_units = cmd.default_low_stock_units.or(self.default_low_stock_units);

        Ok(vec![SettingsEvent::SettingsUpdated(SettingsUpdated {
            tenant_id: cmd.tenant_id,
            company_name,
            currency,
            order_number_prefix,
            default_low_stock_units,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_allocate(&self, cmd: &AllocateOrderNumber) -> Result<Vec<SettingsEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id)?;

        let seq = self.next_order_seq;
        Ok(vec![SettingsEvent::OrderNumberAllocated(OrderNumberAllocated {
            tenant_id: cmd.tenant_id,
            seq,
            order_no: format!("{}-{:06}", self.order_number_prefix, seq),
            occurred_at: cmd.occurred_at,
        })])
    }
}
