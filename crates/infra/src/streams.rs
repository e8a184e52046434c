//! Aggregate type names used as stream kinds in the event store.

pub const PRODUCT: &str = "products.product";
pub const INVENTORY_ITEM: &str = "inventory.item";
pub const SALES_ORDER: &str = "sales.order";
pub const TENANT_SETTINGS: &str = "settings.tenant";
