//! Module registry - the set of feature units currently loaded in the process
//!
//! Command handlers themselves live outside this crate; a module registers
//! here with its default settings (seeded into every tenant config), an
//! optional resource-list key (per-resource loop jobs), and an optional job
//! body for background execution.

pub mod builtin;

use crate::models::{CronJob, TenantConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// How a job suspends between executions
#[derive(Debug, Clone)]
pub enum Wait {
    Fixed(Duration),
    /// Block until the expression next matches wall-clock time
    Cron(String),
}

/// Context handed to a job body on each wake
pub struct JobContext<'a> {
    pub tenant_id: &'a str,
    /// Config reloaded fresh for this wake
    pub config: &'a TenantConfig,
    /// Target resource for resource-bound jobs
    pub resource: Option<&'a str>,
    /// Present when the wake was driven by a persisted cron job record
    pub cron_job: Option<&'a CronJob>,
}

/// Background work supplied by a module.
///
/// Errors returned from `execute` are logged by the task loop and never kill
/// the scheduling loop.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn execute(&self, ctx: JobContext<'_>) -> Result<(), String>;

    /// Computed each cycle so config changes take effect without a restart
    async fn wait_strategy(&self, config: &TenantConfig) -> Result<Wait, String>;

    /// True if the first execution should happen before the first wait
    fn run_on_start(&self) -> bool {
        false
    }
}

/// Static description of a registered module
pub struct ModuleDescriptor {
    pub name: String,
    /// Settings object seeded into tenant configs for this module
    pub default_settings: Value,
    /// Settings key holding the list of target resources, if the module runs
    /// one loop job per resource rather than one per tenant
    pub resource_list_key: Option<String>,
    pub job: Option<Arc<dyn JobBody>>,
}

pub struct ModuleRegistry {
    modules: DashMap<String, Arc<ModuleDescriptor>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            modules: DashMap::new(),
        }
    }

    pub fn register(&self, descriptor: ModuleDescriptor) {
        log::info!("[modules] Registered module: {}", descriptor.name);
        self.modules
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    /// Unload a module. Its running loop jobs stop themselves on their next
    /// wake; nothing is cancelled preemptively.
    pub fn unregister(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        let removed = self.modules.remove(name).map(|(_, d)| d);
        if removed.is_some() {
            log::info!("[modules] Unregistered module: {}", name);
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        self.modules.get(name).map(|d| d.clone())
    }

    pub fn descriptors(&self) -> Vec<Arc<ModuleDescriptor>> {
        self.modules.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
