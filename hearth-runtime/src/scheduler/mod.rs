//! Recurring task manager - owns the lifecycle of all background jobs
//!
//! Two kinds of jobs share the same wait/execute/cancel shape: loop jobs
//! (one per tenant, or per tenant x resource, discovered from config) and
//! cron jobs (persisted, user-created records driven by a schedule
//! expression). Tasks stop themselves when their liveness conditions fail at
//! wake time; a low-frequency supervisor only ever starts tasks, so the
//! running-job registry is the single source of truth for liveness.

mod cron_job;
mod loop_job;
pub mod wait;

use crate::cache::ExpiringCache;
use crate::config_store::ConfigStore;
use crate::db::CronJobStore;
use crate::models::CronJob;
use crate::modules::{ModuleDescriptor, ModuleRegistry};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Enumerates the tenants this process serves and whether each is currently
/// reachable. Supplied by the gateway layer; tests use the static impl.
pub trait TenantDirectory: Send + Sync {
    fn tenant_ids(&self) -> Vec<String>;
    fn is_reachable(&self, tenant_id: &str) -> bool;
}

/// Fixed tenant list, adjustable at runtime
pub struct StaticTenantDirectory {
    tenants: RwLock<Vec<String>>,
}

impl StaticTenantDirectory {
    pub fn new(tenants: Vec<String>) -> Self {
        StaticTenantDirectory {
            tenants: RwLock::new(tenants),
        }
    }

    pub fn add(&self, tenant_id: impl Into<String>) {
        self.tenants.write().push(tenant_id.into());
    }

    pub fn remove(&self, tenant_id: &str) {
        self.tenants.write().retain(|t| t != tenant_id);
    }
}

impl TenantDirectory for StaticTenantDirectory {
    fn tenant_ids(&self) -> Vec<String> {
        self.tenants.read().clone()
    }

    fn is_reachable(&self, tenant_id: &str) -> bool {
        self.tenants.read().iter().any(|t| t == tenant_id)
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the supervisor re-reads configured resource lists
    pub tracker_interval: Duration,
    /// Delay substituted when a wait strategy cannot be resolved
    pub fallback_wait: Duration,
    pub job_cache_len: usize,
    /// TTL of the cron-record cache; a wake past it re-reads the store
    pub job_cache_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tracker_interval: Duration::from_secs(300),
            fallback_wait: Duration::from_secs(300),
            job_cache_len: 100,
            job_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Handle for a running loop job
struct LoopHandle {
    token: CancellationToken,
}

/// Handle for a running cron job; retained so `cancel` can reach the task
struct CronHandle {
    tenant_id: String,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct RecurringTaskManager {
    config_store: Arc<ConfigStore>,
    registry: Arc<ModuleRegistry>,
    directory: Arc<dyn TenantDirectory>,
    job_store: Arc<dyn CronJobStore>,
    loop_jobs: Arc<DashMap<String, LoopHandle>>,
    cron_jobs: Arc<DashMap<String, CronHandle>>,
    job_cache: Arc<ExpiringCache<String, CronJob>>,
    settings: SchedulerConfig,
    shutdown: CancellationToken,
}

/// Registry key for a loop job
fn loop_key(module: &str, tenant_id: &str, resource: Option<&str>) -> String {
    match resource {
        Some(resource) => format!("{}:{}:{}", module, tenant_id, resource),
        None => format!("{}:{}", module, tenant_id),
    }
}

impl RecurringTaskManager {
    pub fn new(
        config_store: Arc<ConfigStore>,
        registry: Arc<ModuleRegistry>,
        directory: Arc<dyn TenantDirectory>,
        job_store: Arc<dyn CronJobStore>,
        settings: SchedulerConfig,
    ) -> Self {
        let job_cache = Arc::new(ExpiringCache::new(
            settings.job_cache_len,
            settings.job_cache_ttl,
        ));
        RecurringTaskManager {
            config_store,
            registry,
            directory,
            job_store,
            loop_jobs: Arc::new(DashMap::new()),
            cron_jobs: Arc::new(DashMap::new()),
            job_cache,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start loop jobs for every known tenant, re-spawn persisted cron jobs,
    /// and launch the reconciliation supervisor.
    pub async fn start(&self) {
        for tenant_id in self.directory.tenant_ids() {
            self.register_tenant_tasks(&tenant_id).await;
        }

        self.kickoff_persisted_jobs().await;

        let manager = self.clone();
        tokio::spawn(async move {
            manager.supervisor_loop().await;
        });

        log::info!(
            "[scheduler] Started with {} loop jobs and {} cron jobs",
            self.loop_jobs.len(),
            self.cron_jobs.len()
        );
    }

    /// Create the configured loop tasks for one tenant
    pub async fn register_tenant_tasks(&self, tenant_id: &str) {
        let Some(config) = self
            .config_store
            .get_config(tenant_id, Default::default())
            .await
        else {
            return;
        };

        for descriptor in self.registry.descriptors() {
            if descriptor.job.is_none() {
                continue;
            }

            let resources = descriptor
                .resource_list_key
                .as_deref()
                .map(|key| config.resource_list(&descriptor.name, key))
                .unwrap_or_default();

            if resources.is_empty() {
                self.spawn_loop_job(descriptor, tenant_id.to_string(), None);
            } else {
                for resource in resources {
                    self.spawn_loop_job(descriptor.clone(), tenant_id.to_string(), Some(resource));
                }
            }
        }
    }

    /// Re-spawn every cron job found in the persistent store
    pub async fn kickoff_persisted_jobs(&self) {
        match self.job_store.list_all().await {
            Ok(jobs) => {
                for job in jobs {
                    if let Err(e) = self.start_cron_job(job) {
                        log::warn!("[scheduler] Skipping persisted cron job: {}", e);
                    }
                }
            }
            Err(e) => {
                log::error!("[scheduler] Could not list persisted cron jobs: {}", e);
            }
        }
    }

    /// Start a background task for a cron job record
    pub fn start_cron_job(&self, job: CronJob) -> Result<(), String> {
        let job_id = job.job_id.clone();
        let token = self.shutdown.child_token();

        // The entry holds the shard lock across check and insert, so two
        // racing starts of the same job id cannot both spawn
        match self.cron_jobs.entry(job_id.clone()) {
            Entry::Occupied(_) => {
                return Err(format!("Cron job {} is already running", job_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(CronHandle {
                    tenant_id: job.tenant_id.clone(),
                    token: token.clone(),
                });
            }
        }
        self.job_cache.insert(job_id.clone(), job.clone());

        log::info!(
            "[scheduler] Starting cron job {} (module={}, tenant={}, schedule={})",
            job_id,
            job.module,
            job.tenant_id,
            job.schedule
        );

        let ctx = cron_job::CronJobContext {
            job,
            job_store: self.job_store.clone(),
            job_cache: self.job_cache.clone(),
            registry: self.registry.clone(),
            config_store: self.config_store.clone(),
            fallback_wait: self.settings.fallback_wait,
            token,
        };

        let cron_jobs = self.cron_jobs.clone();
        tokio::spawn(async move {
            let job_id = ctx.job.job_id.clone();
            cron_job::run(ctx).await;
            cron_jobs.remove(&job_id);
        });

        Ok(())
    }

    /// Request cancellation of a running cron job.
    ///
    /// Cooperative: the task observes the signal at its next wake, so at most
    /// one more in-flight execution can occur.
    pub fn cancel(&self, job_id: &str) -> Result<(), String> {
        match self.cron_jobs.remove(job_id) {
            Some((_, handle)) => {
                log::info!(
                    "[scheduler] Cancelling cron job {} (tenant={})",
                    job_id,
                    handle.tenant_id
                );
                self.job_cache.remove(&job_id.to_string());
                handle.token.cancel();
                Ok(())
            }
            None => Err(format!("Cron job {} is not running", job_id)),
        }
    }

    /// Signal every running task to stop at its next wake
    pub fn shutdown(&self) {
        log::info!("[scheduler] Shutting down all background jobs");
        self.shutdown.cancel();
    }

    pub fn is_loop_running(&self, module: &str, tenant_id: &str, resource: Option<&str>) -> bool {
        self.loop_jobs.contains_key(&loop_key(module, tenant_id, resource))
    }

    pub fn running_loop_jobs(&self) -> Vec<String> {
        self.loop_jobs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn running_cron_jobs(&self) -> Vec<String> {
        self.cron_jobs.iter().map(|e| e.key().clone()).collect()
    }

    fn spawn_loop_job(
        &self,
        descriptor: Arc<ModuleDescriptor>,
        tenant_id: String,
        resource: Option<String>,
    ) {
        let Some(body) = descriptor.job.clone() else {
            return;
        };

        let key = loop_key(&descriptor.name, &tenant_id, resource.as_deref());
        let token = self.shutdown.child_token();

        // Same atomicity as start_cron_job: the supervisor and explicit
        // registration may race on the same key
        match self.loop_jobs.entry(key.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(LoopHandle {
                    token: token.clone(),
                });
            }
        }

        log::debug!("[scheduler] Starting loop job {}", key);

        let ctx = loop_job::LoopJobContext {
            descriptor,
            body,
            tenant_id,
            resource,
            config_store: self.config_store.clone(),
            registry: self.registry.clone(),
            directory: self.directory.clone(),
            fallback_wait: self.settings.fallback_wait,
            token,
        };

        let loop_jobs = self.loop_jobs.clone();
        tokio::spawn(async move {
            loop_job::run(ctx).await;
            loop_jobs.remove(&key);
            log::debug!("[scheduler] Loop job {} stopped", key);
        });
    }

    /// Periodically re-read each tenant's configured resource lists and start
    /// loop jobs for resources not yet represented among the running tasks.
    /// Tasks are never stopped from here; each self-terminates at wake time.
    async fn supervisor_loop(&self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.settings.tracker_interval) => {}
            }

            log::debug!("[scheduler] Reconciling loop jobs against tenant configs");

            for tenant_id in self.directory.tenant_ids() {
                if !self.directory.is_reachable(&tenant_id) {
                    continue;
                }

                let Some(config) = self
                    .config_store
                    .get_config(&tenant_id, crate::config_store::GetConfigOptions::fresh())
                    .await
                else {
                    continue;
                };

                for descriptor in self.registry.descriptors() {
                    let (Some(_), Some(key)) =
                        (descriptor.job.as_ref(), descriptor.resource_list_key.as_deref())
                    else {
                        continue;
                    };

                    for resource in config.resource_list(&descriptor.name, key) {
                        if !self.is_loop_running(&descriptor.name, &tenant_id, Some(&resource)) {
                            log::debug!(
                                "[scheduler] Found new resource {} for module {} in tenant {} - starting task",
                                resource,
                                descriptor.name,
                                tenant_id
                            );
                            self.spawn_loop_job(
                                descriptor.clone(),
                                tenant_id.clone(),
                                Some(resource),
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testutil::{MemoryConfigStore, MemoryCronJobStore};
    use crate::models::TenantConfig;
    use crate::modules::{JobBody, JobContext, Wait};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBody {
        executions: AtomicUsize,
        wait: Duration,
    }

    impl CountingBody {
        fn new(wait: Duration) -> Arc<Self> {
            Arc::new(CountingBody {
                executions: AtomicUsize::new(0),
                wait,
            })
        }

        fn count(&self) -> usize {
            self.executions.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobBody for CountingBody {
        async fn execute(&self, _ctx: JobContext<'_>) -> Result<(), String> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_strategy(&self, _config: &TenantConfig) -> Result<Wait, String> {
            Ok(Wait::Fixed(self.wait))
        }

        fn run_on_start(&self) -> bool {
            true
        }
    }

    struct Fixture {
        store: Arc<MemoryConfigStore>,
        job_store: Arc<MemoryCronJobStore>,
        config_store: Arc<ConfigStore>,
        registry: Arc<ModuleRegistry>,
        directory: Arc<StaticTenantDirectory>,
        manager: RecurringTaskManager,
    }

    fn fixture(body: Arc<dyn JobBody>, settings: SchedulerConfig) -> Fixture {
        let store = Arc::new(MemoryConfigStore::new());
        let mut config = TenantConfig::new("t1");
        config.enabled_modules.push("announce".to_string());
        config
            .settings
            .insert("announce".to_string(), json!({ "channels": ["c1"] }));
        store.seed(config);

        let registry = Arc::new(ModuleRegistry::new());
        registry.register(ModuleDescriptor {
            name: "announce".to_string(),
            default_settings: json!({ "channels": [] }),
            resource_list_key: Some("channels".to_string()),
            job: Some(body),
        });

        let config_store = Arc::new(ConfigStore::new(
            store.clone(),
            registry.clone(),
            100,
            Duration::from_secs(1200),
        ));
        let directory = Arc::new(StaticTenantDirectory::new(vec!["t1".to_string()]));
        let job_store = Arc::new(MemoryCronJobStore::new());

        let manager = RecurringTaskManager::new(
            config_store.clone(),
            registry.clone(),
            directory.clone(),
            job_store.clone(),
            settings,
        );

        Fixture {
            store,
            job_store,
            config_store,
            registry,
            directory,
            manager,
        }
    }

    fn test_settings() -> SchedulerConfig {
        SchedulerConfig {
            tracker_interval: Duration::from_millis(200),
            fallback_wait: Duration::from_millis(50),
            job_cache_len: 100,
            job_cache_ttl: Duration::from_secs(300),
        }
    }

    async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_job_stops_when_resource_removed() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        f.manager.start().await;
        assert!(f.manager.is_loop_running("announce", "t1", Some("c1")));
        assert!(eventually(|| body.count() > 0).await);

        // Remove the resource; the task observes this on its next wake
        f.config_store
            .update_config("t1", |config| {
                config
                    .settings
                    .insert("announce".to_string(), json!({ "channels": [] }));
            })
            .await
            .unwrap();

        assert!(eventually(|| f.manager.running_loop_jobs().is_empty()).await);

        // The supervisor must not restart it while the resource is absent
        let count = body.count();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(f.manager.running_loop_jobs().is_empty());
        assert_eq!(body.count(), count);

        // Reappearing resource is picked up by reconciliation
        f.config_store
            .update_config("t1", |config| {
                config
                    .settings
                    .insert("announce".to_string(), json!({ "channels": ["c1"] }));
            })
            .await
            .unwrap();
        assert!(eventually(|| f.manager.is_loop_running("announce", "t1", Some("c1"))).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_job_stops_when_module_unloaded() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        f.manager.start().await;
        assert!(eventually(|| body.count() > 0).await);

        f.registry.unregister("announce");
        assert!(eventually(|| f.manager.running_loop_jobs().is_empty()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_job_stops_when_tenant_unreachable() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        f.manager.start().await;
        assert!(eventually(|| body.count() > 0).await);

        f.directory.remove("t1");
        assert!(eventually(|| f.manager.running_loop_jobs().is_empty()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_module_skips_execution_but_keeps_looping() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        f.store.seed({
            let mut config = TenantConfig::new("t1");
            // module not enabled, resource still configured
            config
                .settings
                .insert("announce".to_string(), json!({ "channels": ["c1"] }));
            config
        });

        f.manager.start().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(f.manager.is_loop_running("announce", "t1", Some("c1")));
        assert_eq!(body.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_job_deleted_mid_wait_terminates_without_executing() {
        let body = CountingBody::new(Duration::from_millis(50));
        let mut settings = test_settings();
        // Force every wake to consult the store
        settings.job_cache_ttl = Duration::ZERO;
        let f = fixture(body.clone(), settings);

        let job = CronJob::new("announce", "t1", "record-1", "c1", "* * * * * *");
        // Never persisted: the first wake's store lookup finds it deleted
        f.manager.start_cron_job(job.clone()).unwrap();
        assert_eq!(f.manager.running_cron_jobs().len(), 1);

        assert!(eventually(|| f.manager.running_cron_jobs().is_empty()).await);
        assert_eq!(body.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cron_job_executes_and_cancel_stops_it() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        let job = CronJob::new("announce", "t1", "record-1", "c1", "* * * * * *");
        f.job_store.insert(&job).await.unwrap();
        f.manager.start_cron_job(job.clone()).unwrap();

        assert!(eventually(|| body.count() > 0).await);

        f.manager.cancel(&job.job_id).unwrap();
        assert!(eventually(|| f.manager.running_cron_jobs().is_empty()).await);
        assert!(f.manager.cancel(&job.job_id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kickoff_starts_persisted_jobs() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        let job = CronJob::new("announce", "t1", "record-1", "c1", "* * * * * *");
        f.job_store.insert(&job).await.unwrap();

        f.manager.kickoff_persisted_jobs().await;
        assert_eq!(f.manager.running_cron_jobs(), vec![job.job_id.clone()]);

        // Starting the same job twice is rejected
        assert!(f.manager.start_cron_job(job).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_of_same_cron_job_admit_one() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        let job = CronJob::new("announce", "t1", "record-1", "c1", "0 0 * * * *");
        f.job_store.insert(&job).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = f.manager.clone();
            let job = job.clone();
            tasks.push(tokio::spawn(async move { manager.start_cron_job(job) }));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        // Exactly one start wins; the rest see the running handle
        assert_eq!(admitted, 1);
        assert_eq!(f.manager.running_cron_jobs(), vec![job.job_id.clone()]);

        f.manager.cancel(&job.job_id).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregistering_tenant_does_not_duplicate_loop_jobs() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        f.manager.start().await;
        assert_eq!(f.manager.running_loop_jobs().len(), 1);

        f.manager.register_tenant_tasks("t1").await;
        assert_eq!(f.manager.running_loop_jobs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_body_does_not_kill_the_loop() {
        struct FailingBody {
            executions: AtomicUsize,
        }

        #[async_trait]
        impl JobBody for FailingBody {
            async fn execute(&self, _ctx: JobContext<'_>) -> Result<(), String> {
                self.executions.fetch_add(1, Ordering::SeqCst);
                Err("boom".to_string())
            }

            async fn wait_strategy(&self, _config: &TenantConfig) -> Result<Wait, String> {
                // Unresolvable strategy exercises the fallback delay too
                Ok(Wait::Cron("not a cron line".to_string()))
            }

            fn run_on_start(&self) -> bool {
                true
            }
        }

        let body = Arc::new(FailingBody {
            executions: AtomicUsize::new(0),
        });
        let f = fixture(body.clone(), test_settings());

        f.manager.start().await;
        assert!(eventually(|| body.executions.load(Ordering::SeqCst) >= 3).await);
        assert!(f.manager.is_loop_running("announce", "t1", Some("c1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenant_without_resources_gets_tenant_level_job() {
        let body = CountingBody::new(Duration::from_millis(50));
        let f = fixture(body.clone(), test_settings());

        // Second module with no resource list key
        f.registry.register(ModuleDescriptor {
            name: "digest".to_string(),
            default_settings: json!({}),
            resource_list_key: None,
            job: Some(body.clone()),
        });
        f.config_store
            .update_config("t1", |config| {
                config.enabled_modules.push("digest".to_string());
            })
            .await
            .unwrap();

        f.manager.start().await;
        assert!(f.manager.is_loop_running("digest", "t1", None));
    }
}
