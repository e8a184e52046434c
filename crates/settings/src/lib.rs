//! Per-tenant company settings and the sales order number sequence.

pub mod settings;

pub use settings::{
    AllocateOrderNumber, InitializeSettings, OrderNumberAllocated, SettingsCommand,
    SettingsEvent, SettingsInitialized, SettingsUpdated, TenantSettings, UpdateSettings,
    DEFAULT_ORDER_PREFIX,
};
