use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tileerp_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use tileerp_events::Event;

/// Product identifier. The product's inventory item shares the same stream id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

/// Prices in the smallest currency unit, per piece.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub price_per_piece: Option<u64>,
    pub cost_per_piece: Option<u64>,
    /// ISO 4217 code; falls back to the tenant currency when absent.
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    category: Option<String>,
    specification: Option<String>,
    pieces_per_unit: u32,
    unit_label: String,
    pricing: Pricing,
    min_stock_units: Option<u64>,
    max_stock_units: Option<u64>,
    status: ProductStatus,
    version: u64,
    created: bool,
}

impl Product {
    /// Not-yet-created instance used for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            category: None,
            specification: None,
            pieces_per_unit: 1,
            unit_label: String::new(),
            pricing: Pricing::default(),
            min_stock_units: None,
            max_stock_units: None,
            status: ProductStatus::Draft,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
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

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn specification(&self) -> Option<&str> {
        self.specification.as_deref()
    }

    pub fn pieces_per_unit(&self) -> u32 {
        self.pieces_per_unit
    }

    pub fn unit_label(&self) -> &str {
        &self.unit_label
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    pub fn min_stock_units(&self) -> Option<u64> {
        self.min_stock_units
    }

    /// Stock above this many units is reported as overstocked.
    pub fn max_stock_units(&self) -> Option<u64> {
        self.max_stock_units
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    /// Only active products may be put on a sales order.
    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    /// Free-form size/finish, e.g. `600x600mm polished`.
    pub specification: Option<String>,
    pub pieces_per_unit: u32,
    pub unit_label: String,
    pub pricing: Pricing,
    pub min_stock_units: Option<u64>,
    #[serde(default)]
    pub max_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProductDetails {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: Option<String>,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub unit_label: Option<String>,
    pub min_stock_units: Option<u64>,
    #[serde(default)]
    pub max_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePricing {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub price_per_piece: Option<u64>,
    pub cost_per_piece: Option<u64>,
    pub currency: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    UpdateProductDetails(UpdateProductDetails),
    UpdatePricing(UpdatePricing),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub pieces_per_unit: u32,
    pub unit_label: String,
    pub pricing: Pricing,
    pub min_stock_units: Option<u64>,
    #[serde(default)]
    pub max_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

/// Carries the full resulting details so projections need no prior state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetailsUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub category: Option<String>,
    pub specification: Option<String>,
    pub unit_label: String,
    pub min_stock_units: Option<u64>,
    #[serde(default)]
    pub max_stock_units: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPricingUpdated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub pricing: Pricing,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductDetailsUpdated(ProductDetailsUpdated),
    ProductPricingUpdated(ProductPricingUpdated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::ProductDetailsUpdated(_) => "products.product.details_updated",
            ProductEvent::ProductPricingUpdated(_) => "products.product.pricing_updated",
            ProductEvent::ProductActivated(_) => "products.product.activated",
            ProductEvent::ProductArchived(_) => "products.product.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductDetailsUpdated(e) => e.occurred_at,
            ProductEvent::ProductPricingUpdated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.specification = e.specification.clone();
                self.pieces_per_unit = e.pieces_per_unit;
                self.unit_label = e.unit_label.clone();
                self.pricing = e.pricing.clone();
                self.min_stock_units = e.min_stock_units;
                self.max_stock_units = e.max_stock_units;
                self.status = ProductStatus::Draft;
                self.created = true;
            }
            ProductEvent::ProductDetailsUpdated(e) => {
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.specification = e.specification.clone();
                self.unit_label = e.unit_label.clone();
                self.min_stock_units = e.min_stock_units;
                self.max_stock_units = e.max_stock_units;
            }
            ProductEvent::ProductPricingUpdated(e) => {
                self.pricing = e.pricing.clone();
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::UpdateProductDetails(cmd) => self.handle_update_details(cmd),
            ProductCommand::UpdatePricing(cmd) => self.handle_update_pricing(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
        }
    }
}

fn non_empty(value: &str, field: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn validate_stock_band(min: Option<u64>, max: Option<u64>) -> Result<(), DomainError> {
    match (min, max) {
        (_, Some(0)) => Err(DomainError::validation("max_stock_units must be positive")),
        (Some(min), Some(max)) if max <= min => Err(DomainError::validation(format!(
            "max_stock_units ({max}) must be above min_stock_units ({min})"
        ))),
        _ => Ok(()),
    }
}

fn validate_pricing(pricing: &Pricing) -> Result<(), DomainError> {
    if pricing.price_per_piece == Some(0) {
        return Err(DomainError::validation("price_per_piece must be positive"));
    }
    if let Some(currency) = &pricing.currency {
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation("currency must be a 3-letter ISO code"));
        }
    }
    Ok(())
}

impl Product {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_existing(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_tenant(tenant_id)?;
        self.ensure_product_id(product_id)
    }

    fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be modified"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        self.ensure_product_id(cmd.product_id)?;

        non_empty(&cmd.sku, "SKU")?;
        non_empty(&cmd.name, "name")?;
        non_empty(&cmd.unit_label, "unit_label")?;
        if cmd.pieces_per_unit == 0 {
            return Err(DomainError::validation("pieces_per_unit must be at least 1"));
        }
        validate_pricing(&cmd.pricing)?;
        validate_stock_band(cmd.min_stock_units, cmd.max_stock_units)?;

        // SKU uniqueness is a tenant-wide rule; the API checks the catalogue
        // read model before dispatching.
        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            category: cmd.category.clone(),
            specification: cmd.specification.clone(),
            pieces_per_unit: cmd.pieces_per_unit,
            unit_label: cmd.unit_label.trim().to_string(),
            pricing: cmd.pricing.clone(),
            min_stock_units: cmd.min_stock_units,
            max_stock_units: cmd.max_stock_units,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_details(
        &self,
        cmd: &UpdateProductDetails,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        self.ensure_editable()?;

        if let Some(name) = &cmd.name {
            non_empty(name, "name")?;
        }
        if let Some(label) = &cmd.unit_label {
            non_empty(label, "unit_label")?;
        }
        let min_stock_units = cmd.min_stock_units.or(self.min_stock_units);
        let max_stock_units = cmd.max_stock_units.or(self.max_stock_units);
        validate_stock_band(min_stock_units, max_stock_units)?;

        Ok(vec![ProductEvent::ProductDetailsUpdated(ProductDetailsUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            name: cmd
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| self.name.clone()),
            category: cmd.category.clone().or_else(|| self.category.clone()),
            specification: cmd.specification.clone().or_else(|| self.specification.clone()),
            unit_label: cmd
                .unit_label
                .as_ref()
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| self.unit_label.clone()),
            min_stock_units,
            max_stock_units,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_pricing(&self, cmd: &UpdatePricing) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;
        self.ensure_editable()?;

        let pricing = Pricing {
            price_per_piece: cmd.price_per_piece.or(self.pricing.price_per_piece),
            cost_per_piece: cmd.cost_per_piece.or(self.pricing.cost_per_piece),
            currency: cmd.currency.clone().or_else(|| self.pricing.currency.clone()),
        };
        validate_pricing(&pricing)?;

        Ok(vec![ProductEvent::ProductPricingUpdated(ProductPricingUpdated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            pricing,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        if self.status == ProductStatus::Active {
            return Err(DomainError::conflict("product is already active"));
        }
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be activated"));
        }
        if self.pricing.price_per_piece.is_none() {
            return Err(DomainError::invariant("a product needs a selling price before activation"));
        }

        Ok(vec![ProductEvent::ProductActivated(ProductActivated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
