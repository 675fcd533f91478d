use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::clients::tenants::TenantRecord;

/// One tenant as this service sees it. Entries handed out by the cache are
/// immutable snapshots; a rotation replaces the whole entry rather than
/// mutating it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub site_id: String,
    /// Admin tenant of the site that owns this tenant.
    pub site_admin_tenant_id: String,
    /// Used as the `iss` claim of every token minted for this tenant.
    pub issuer: String,
    pub status: TenantStatus,
    pub access_token_ttl: u64,
    pub refresh_token_ttl: u64,
    /// PEM-encoded RSA private key; empty until bootstrap has run.
    pub private_key: String,
    /// PEM-encoded RSA public key as published in the Tenants registry.
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantStatus {
    Active,
    Draft,
    Inactive,
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("No tenant found with id {0}")]
    NotFound(String),
    #[error("Tenant cache is not ready")]
    NotReady,
    #[error("Tenant {0} has no signing key")]
    MissingPrivateKey(String),
}

/// Defaults applied when a registry record carries no TTL metadata.
#[derive(Debug, Clone, Copy)]
pub struct TtlDefaults {
    pub access_token_ttl: u64,
    pub refresh_token_ttl: u64,
}

impl Tenant {
    /// Build a cache entry from a registry record. The private key is left
    /// empty; bootstrap fills it from the SK (or from the site-admin key in
    /// dev mode).
    pub fn from_record(record: &TenantRecord, defaults: TtlDefaults) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            site_id: record.site_id.clone(),
            site_admin_tenant_id: record.site_admin_tenant_id.clone(),
            issuer: record.token_service.clone(),
            status: record.status,
            access_token_ttl: record.access_token_ttl.unwrap_or(defaults.access_token_ttl),
            refresh_token_ttl: record
                .refresh_token_ttl
                .unwrap_or(defaults.refresh_token_ttl),
            private_key: String::new(),
            public_key: record.public_key.clone().unwrap_or_default(),
        }
    }
}

/// Per-process tenant cache. Read-mostly: the only writers after bootstrap
/// are `set_private_key` (key rotation) and `reload`. Writers swap whole
/// `Arc<Tenant>` entries, so a signer holding a snapshot never observes a
/// torn PEM.
pub struct TenantCache {
    entries: RwLock<HashMap<String, Arc<Tenant>>>,
    ready: AtomicBool,
}

impl TenantCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Build a ready cache from fully-populated entries. Used by tests and
    /// by dev-mode bootstrap.
    pub fn from_entries(entries: impl IntoIterator<Item = Tenant>) -> Self {
        let cache = Self::new();
        {
            let mut map = cache.entries.write().expect("tenant cache lock poisoned");
            for t in entries {
                map.insert(t.tenant_id.clone(), Arc::new(t));
            }
        }
        cache.mark_ready();
        cache
    }

    pub fn get(&self, tenant_id: &str) -> Result<Arc<Tenant>, TenantError> {
        let map = self.entries.read().expect("tenant cache lock poisoned");
        map.get(tenant_id)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }

    /// Snapshot of a tenant that is guaranteed to carry a signing key.
    pub fn get_signing(&self, tenant_id: &str) -> Result<Arc<Tenant>, TenantError> {
        let tenant = self.get(tenant_id)?;
        if tenant.private_key.is_empty() {
            return Err(TenantError::MissingPrivateKey(tenant_id.to_string()));
        }
        Ok(tenant)
    }

    pub fn insert(&self, tenant: Tenant) {
        let mut map = self.entries.write().expect("tenant cache lock poisoned");
        map.insert(tenant.tenant_id.clone(), Arc::new(tenant));
    }

    /// Atomically replace a tenant's private key. The sole write path after
    /// bootstrap besides `reload`; safe under concurrent `get`.
    pub fn set_private_key(&self, tenant_id: &str, pem: &str) -> Result<(), TenantError> {
        let mut map = self.entries.write().expect("tenant cache lock poisoned");
        let entry = map
            .get_mut(tenant_id)
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))?;
        let mut updated = (**entry).clone();
        updated.private_key = pem.to_string();
        *entry = Arc::new(updated);
        Ok(())
    }

    /// Admin tenants of every site represented in the cache. These are the
    /// tenants the service must hold a service token for.
    pub fn iter_site_admin_tenants(&self) -> Vec<String> {
        let map = self.entries.read().expect("tenant cache lock poisoned");
        let mut admins: Vec<String> = map
            .values()
            .map(|t| t.site_admin_tenant_id.clone())
            .collect();
        admins.sort();
        admins.dedup();
        admins
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        let map = self.entries.read().expect("tenant cache lock poisoned");
        map.keys().cloned().collect()
    }

    /// Refresh tenant metadata from registry records. Private keys already in
    /// the cache are preserved: the SK is the source of truth for keys and
    /// reload is metadata-only. Tenants that disappeared from the registry
    /// stay cached and simply go unused.
    pub fn reload(&self, records: &[TenantRecord], defaults: TtlDefaults) {
        let mut map = self.entries.write().expect("tenant cache lock poisoned");
        for record in records {
            let mut tenant = Tenant::from_record(record, defaults);
            if let Some(existing) = map.get(&record.tenant_id) {
                tenant.private_key = existing.private_key.clone();
            }
            map.insert(tenant.tenant_id.clone(), Arc::new(tenant));
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for TenantCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str, site: &str, admin: &str) -> Tenant {
        Tenant {
            tenant_id: id.to_string(),
            site_id: site.to_string(),
            site_admin_tenant_id: admin.to_string(),
            issuer: format!("https://{}.tapis.io/v3/tokens", id),
            status: TenantStatus::Active,
            access_token_ttl: 300,
            refresh_token_ttl: 600,
            private_key: "key".to_string(),
            public_key: "pub".to_string(),
        }
    }

    #[test]
    fn test_get_unknown_tenant() {
        let cache = TenantCache::new();
        assert!(matches!(cache.get("dev"), Err(TenantError::NotFound(_))));
    }

    #[test]
    fn test_set_private_key_swaps_snapshot() {
        let cache = TenantCache::from_entries([tenant("dev", "tacc", "admin")]);
        let before = cache.get("dev").unwrap();
        cache.set_private_key("dev", "new-key").unwrap();
        let after = cache.get("dev").unwrap();

        // the old snapshot is untouched; the new one carries the new key
        assert_eq!(before.private_key, "key");
        assert_eq!(after.private_key, "new-key");
        assert_eq!(after.issuer, before.issuer);
    }

    #[test]
    fn test_site_admin_tenants_are_deduped() {
        let cache = TenantCache::from_entries([
            tenant("dev", "tacc", "admin"),
            tenant("foo", "tacc", "admin"),
            tenant("assoc", "uh", "uh-admin"),
        ]);
        assert_eq!(cache.iter_site_admin_tenants(), vec!["admin", "uh-admin"]);
    }

    #[test]
    fn test_reload_preserves_private_keys() {
        let cache = TenantCache::from_entries([tenant("dev", "tacc", "admin")]);
        let record = TenantRecord {
            tenant_id: "dev".to_string(),
            site_id: "tacc".to_string(),
            site_admin_tenant_id: "admin".to_string(),
            token_service: "https://dev.tapis.io/v3/tokens".to_string(),
            public_key: Some("fresh-pub".to_string()),
            status: TenantStatus::Active,
            access_token_ttl: Some(900),
            refresh_token_ttl: None,
        };
        let defaults = TtlDefaults {
            access_token_ttl: 300,
            refresh_token_ttl: 600,
        };
        cache.reload(&[record], defaults);

        let t = cache.get("dev").unwrap();
        assert_eq!(t.access_token_ttl, 900);
        assert_eq!(t.refresh_token_ttl, 600);
        assert_eq!(t.public_key, "fresh-pub");
        // the SK-sourced key survives a metadata reload
        assert_eq!(t.private_key, "key");
    }

    #[test]
    fn test_signing_requires_private_key() {
        let cache = TenantCache::new();
        let mut t = tenant("dev", "tacc", "admin");
        t.private_key = String::new();
        cache.insert(t);
        assert!(matches!(
            cache.get_signing("dev"),
            Err(TenantError::MissingPrivateKey(_))
        ));
    }
}
