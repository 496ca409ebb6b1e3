//! Cached, lazily-provisioned per-tenant configuration
//!
//! Lookups go through a bounded TTL cache; misses re-check the persistent
//! store under a per-tenant lock so that two callers racing on a cold cache
//! never both insert a tenant record. Stored records are synchronized against
//! the currently registered modules on every store read, which lets newly
//! deployed modules retroactively configure existing tenants without a
//! migration step.

use crate::cache::{Clock, ExpiringCache, SystemClock};
use crate::db::TenantConfigStore;
use crate::models::TenantConfig;
use crate::modules::ModuleRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Threshold above which a config fetch is logged as slow
const SLOW_FETCH_WARN_MS: u128 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct GetConfigOptions {
    pub create_if_absent: bool,
    pub use_cache: bool,
}

impl Default for GetConfigOptions {
    fn default() -> Self {
        GetConfigOptions {
            create_if_absent: true,
            use_cache: true,
        }
    }
}

impl GetConfigOptions {
    /// Bypass the cache, reading straight through to the store
    pub fn fresh() -> Self {
        GetConfigOptions {
            create_if_absent: true,
            use_cache: false,
        }
    }
}

pub struct ConfigStore {
    store: Arc<dyn TenantConfigStore>,
    registry: Arc<ModuleRegistry>,
    cache: ExpiringCache<String, TenantConfig>,
    /// Per-tenant locks making "check store, maybe create" atomic
    creation_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConfigStore {
    pub fn new(
        store: Arc<dyn TenantConfigStore>,
        registry: Arc<ModuleRegistry>,
        cache_len: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self::with_clock(store, registry, cache_len, cache_ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn TenantConfigStore>,
        registry: Arc<ModuleRegistry>,
        cache_len: usize,
        cache_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        ConfigStore {
            store,
            registry,
            cache: ExpiringCache::with_clock(cache_len, cache_ttl, clock),
            creation_locks: DashMap::new(),
        }
    }

    /// Get the config for a tenant.
    ///
    /// Returns `None` only when the tenant has no stored record and
    /// `create_if_absent` is false. With `create_if_absent` a config is always
    /// returned, even if persisting the new record fails.
    pub async fn get_config(
        &self,
        tenant_id: &str,
        options: GetConfigOptions,
    ) -> Option<TenantConfig> {
        let start = Instant::now();

        if options.use_cache {
            if let Some(config) = self.cache.get(&tenant_id.to_string()) {
                return Some(config);
            }
        }

        let lock = self.creation_lock(tenant_id);
        let _guard = lock.lock().await;

        // Re-check the store under the lock: another caller may have created
        // the record while we were waiting.
        let (config, cache_snapshot) = match self.store.get(tenant_id).await {
            Ok(Some(stored)) => (self.sync_config(stored).await, true),
            Ok(None) => {
                log::debug!("[config] No stored config for tenant {}", tenant_id);
                if !options.create_if_absent {
                    return None;
                }
                (self.create_default(tenant_id).await, true)
            }
            Err(e) => {
                // Transient store errors must not block a command; serve the
                // registry defaults without persisting them. The fallback is
                // not a snapshot of the record, so it must not enter the
                // cache: the next lookup retries the store.
                log::error!(
                    "[config] Store read failed for tenant {}: {} - serving defaults",
                    tenant_id,
                    e
                );
                (self.default_config(tenant_id), false)
            }
        };

        if cache_snapshot {
            self.cache.insert(tenant_id.to_string(), config.clone());
        }

        let elapsed = start.elapsed().as_millis();
        if elapsed > SLOW_FETCH_WARN_MS {
            log::warn!(
                "[config] Config fetch for tenant {} took {} ms (over {} ms threshold)",
                tenant_id,
                elapsed,
                SLOW_FETCH_WARN_MS
            );
        }

        Some(config)
    }

    /// Apply a mutation to the authoritative record and refresh the cache
    pub async fn update_config<F>(&self, tenant_id: &str, mutator: F) -> Result<TenantConfig, String>
    where
        F: FnOnce(&mut TenantConfig),
    {
        let lock = self.creation_lock(tenant_id);
        let _guard = lock.lock().await;

        let existing = self.store.get(tenant_id).await?;
        let is_new = existing.is_none();
        let mut config = match existing {
            Some(stored) => self.sync_config(stored).await,
            None => self.default_config(tenant_id),
        };

        mutator(&mut config);

        if is_new {
            self.store.insert(&config).await?;
        } else {
            self.store.update(&config).await?;
        }

        self.cache.insert(tenant_id.to_string(), config.clone());
        Ok(config)
    }

    /// Rewrite a tenant's record back to registry defaults
    pub async fn reset_config(&self, tenant_id: &str) -> Result<TenantConfig, String> {
        let lock = self.creation_lock(tenant_id);
        let _guard = lock.lock().await;

        let config = self.default_config(tenant_id);
        match self.store.get(tenant_id).await? {
            Some(_) => self.store.update(&config).await?,
            None => self.store.insert(&config).await?,
        }

        self.cache.insert(tenant_id.to_string(), config.clone());
        log::info!("[config] Reset config for tenant {}", tenant_id);
        Ok(config)
    }

    /// Drop the cached entry so the next lookup reads the store
    pub fn invalidate(&self, tenant_id: &str) {
        self.cache.remove(&tenant_id.to_string());
    }

    fn creation_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.creation_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Insert defaults for any registered module missing from the stored
    /// settings map, persisting the record if anything changed.
    async fn sync_config(&self, mut config: TenantConfig) -> TenantConfig {
        let mut dirty = false;

        for descriptor in self.registry.descriptors() {
            if !config.settings.contains_key(&descriptor.name) {
                log::debug!(
                    "[config] Module {} missing from tenant {} config - adding defaults",
                    descriptor.name,
                    config.tenant_id
                );
                config
                    .settings
                    .insert(descriptor.name.clone(), descriptor.default_settings.clone());
                dirty = true;
            }
        }

        if dirty {
            if let Err(e) = self.store.update(&config).await {
                log::error!(
                    "[config] Could not persist synchronized config for tenant {}: {}",
                    config.tenant_id,
                    e
                );
            }
        }

        config
    }

    async fn create_default(&self, tenant_id: &str) -> TenantConfig {
        let config = self.default_config(tenant_id);

        log::debug!("[config] Inserting new config for tenant {}", tenant_id);
        if let Err(e) = self.store.insert(&config).await {
            // The in-memory default is still useful; a config must never
            // block a command from executing.
            log::error!(
                "[config] Could not insert config for tenant {}: {}",
                tenant_id,
                e
            );
        }

        config
    }

    fn default_config(&self, tenant_id: &str) -> TenantConfig {
        let mut config = TenantConfig::new(tenant_id);
        for descriptor in self.registry.descriptors() {
            config
                .settings
                .insert(descriptor.name.clone(), descriptor.default_settings.clone());
        }
        config
    }
}
