//! Disposable, tenant-partitioned read model storage.
//!
//! Everything stored here can be rebuilt from the event store.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
