//! Tenant-scoped read model storage.
//!
//! Projections keep their query-side documents behind this trait so the
//! in-memory implementation used in tests and a durable backend stay
//! interchangeable. Keys are aggregate ids; values are whatever shape the
//! projection maintains.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use gearshop_core::{AggregateId, TenantId};

pub trait TenantStore<V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: AggregateId) -> Option<V>;

    fn upsert(&self, tenant_id: TenantId, key: AggregateId, value: V);

    /// Remove a single document. Returns the removed value, if any.
    fn remove(&self, tenant_id: TenantId, key: AggregateId) -> Option<V>;

    /// All documents for a tenant, in unspecified order.
    fn list(&self, tenant_id: TenantId) -> Vec<V>;

    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<V, S: TenantStore<V> + ?Sized> TenantStore<V> for Arc<S> {
    fn get(&self, tenant_id: TenantId, key: AggregateId) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: AggregateId, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn remove(&self, tenant_id: TenantId, key: AggregateId) -> Option<V> {
        (**self).remove(tenant_id, key)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

/// In-memory tenant store backed by a nested map.
#[derive(Debug)]
pub struct InMemoryTenantStore<V> {
    inner: RwLock<HashMap<TenantId, HashMap<AggregateId, V>>>,
}

impl<V> InMemoryTenantStore<V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for InMemoryTenantStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> TenantStore<V> for InMemoryTenantStore<V> {
    fn get(&self, tenant_id: TenantId, key: AggregateId) -> Option<V> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.get(&tenant_id).and_then(|m| m.get(&key)).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: AggregateId, value: V) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.entry(tenant_id).or_default().insert(key, value);
    }

    fn remove(&self, tenant_id: TenantId, key: AggregateId) -> Option<V> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let tenant = guard.get_mut(&tenant_id)?;
        let removed = tenant.remove(&key);
        if tenant.is_empty() {
            guard.remove(&tenant_id);
        }
        removed
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard
            .get(&tenant_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(&tenant_id);
    }
}
