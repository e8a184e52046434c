use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tileerp_core::TenantId;

/// Key/value storage partitioned by tenant.
///
/// Reads never cross a tenant boundary: there is no way to look up a key
/// without naming the tenant it belongs to.
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;

    fn upsert(&self, tenant_id: TenantId, key: K, value: V);

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V>;

    /// Every record of one tenant, in no particular order.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;

    /// Drop all records of a tenant before a rebuild.
    fn clear_tenant(&self, tenant_id: TenantId);

    fn contains_tenant(&self, tenant_id: TenantId) -> bool;
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }

    fn contains_tenant(&self, tenant_id: TenantId) -> bool {
        (**self).contains_tenant(tenant_id)
    }
}

/// In-process store: one map per tenant behind a single lock.
///
/// A poisoned lock reads as empty and drops writes; the projections that
/// own the store can always be rebuilt from the event log.
#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    tenants: RwLock<HashMap<TenantId, HashMap<K, V>>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let tenants = self.tenants.read().ok()?;
        tenants.get(&tenant_id)?.get(key).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.entry(tenant_id).or_default().insert(key, value);
        }
    }

    fn remove(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let mut tenants = self.tenants.write().ok()?;
        tenants.get_mut(&tenant_id)?.remove(key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        match self.tenants.read() {
            Ok(tenants) => tenants
                .get(&tenant_id)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut tenants) = self.tenants.write() {
            tenants.remove(&tenant_id);
        }
    }

    fn contains_tenant(&self, tenant_id: TenantId) -> bool {
        self.tenants
            .read()
            .map(|tenants| tenants.contains_key(&tenant_id))
            .unwrap_or(false)
    }
}
