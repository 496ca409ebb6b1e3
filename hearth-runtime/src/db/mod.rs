//! Persistent store interface consumed by the runtime services
//!
//! The runtime only needs simple CRUD; the traits exist so tests can
//! substitute in-memory stores for the sqlite implementation.

pub mod sqlite;
pub mod tables;

pub use sqlite::Database;

use crate::models::{CronJob, TenantConfig};
use async_trait::async_trait;

#[async_trait]
pub trait TenantConfigStore: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>, String>;
    async fn insert(&self, config: &TenantConfig) -> Result<(), String>;
    async fn update(&self, config: &TenantConfig) -> Result<(), String>;
}

#[async_trait]
pub trait CronJobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<CronJob>, String>;
    async fn insert(&self, job: &CronJob) -> Result<(), String>;
    async fn delete(&self, job_id: &str) -> Result<(), String>;
    async fn list_all(&self) -> Result<Vec<CronJob>, String>;
    async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<CronJob>, String>;
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory tenant config store with call counters
    pub struct MemoryConfigStore {
        pub records: Mutex<HashMap<String, TenantConfig>>,
        pub reads: AtomicUsize,
        pub inserts: AtomicUsize,
        pub updates: AtomicUsize,
        /// Artificial read latency, used to widen race windows
        pub read_delay: Option<Duration>,
        pub fail_reads: AtomicBool,
    }

    impl MemoryConfigStore {
        pub fn new() -> Self {
            MemoryConfigStore {
                records: Mutex::new(HashMap::new()),
                reads: AtomicUsize::new(0),
                inserts: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                read_delay: None,
                fail_reads: AtomicBool::new(false),
            }
        }

        pub fn with_read_delay(delay: Duration) -> Self {
            MemoryConfigStore {
                read_delay: Some(delay),
                ..Self::new()
            }
        }

        pub fn seed(&self, config: TenantConfig) {
            self.records.lock().insert(config.tenant_id.clone(), config);
        }

        pub fn stored(&self, tenant_id: &str) -> Option<TenantConfig> {
            self.records.lock().get(tenant_id).cloned()
        }
    }

    #[async_trait]
    impl TenantConfigStore for MemoryConfigStore {
        async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>, String> {
            if let Some(delay) = self.read_delay {
                tokio::time::sleep(delay).await;
            }
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err("store unavailable".to_string());
            }
            Ok(self.records.lock().get(tenant_id).cloned())
        }

        async fn insert(&self, config: &TenantConfig) -> Result<(), String> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .insert(config.tenant_id.clone(), config.clone());
            Ok(())
        }

        async fn update(&self, config: &TenantConfig) -> Result<(), String> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .insert(config.tenant_id.clone(), config.clone());
            Ok(())
        }
    }

    /// In-memory cron job store
    pub struct MemoryCronJobStore {
        pub records: Mutex<HashMap<String, CronJob>>,
        pub fail_reads: AtomicBool,
    }

    impl MemoryCronJobStore {
        pub fn new() -> Self {
            MemoryCronJobStore {
                records: Mutex::new(HashMap::new()),
                fail_reads: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CronJobStore for MemoryCronJobStore {
        async fn get(&self, job_id: &str) -> Result<Option<CronJob>, String> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err("store unavailable".to_string());
            }
            Ok(self.records.lock().get(job_id).cloned())
        }

        async fn insert(&self, job: &CronJob) -> Result<(), String> {
            self.records.lock().insert(job.job_id.clone(), job.clone());
            Ok(())
        }

        async fn delete(&self, job_id: &str) -> Result<(), String> {
            self.records.lock().remove(job_id);
            Ok(())
        }

        async fn list_all(&self) -> Result<Vec<CronJob>, String> {
            Ok(self.records.lock().values().cloned().collect())
        }

        async fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<CronJob>, String> {
            Ok(self
                .records
                .lock()
                .values()
                .filter(|j| j.tenant_id == tenant_id)
                .cloned()
                .collect())
        }
    }
}
