//! Append-only event store boundary.
//!
//! Tenant-scoped streams, one per aggregate instance. The in-memory store
//! backs dev and tests; the Postgres store is behind the `postgres` feature.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
