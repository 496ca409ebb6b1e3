//! Persisted record types shared across the runtime

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Per-tenant configuration document.
///
/// Every registered module has an entry in `settings`; entries for modules
/// deployed after the record was created are synchronized in on first access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub enabled_modules: Vec<String>,
    /// Module name -> arbitrary settings object
    pub settings: HashMap<String, Value>,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        TenantConfig {
            tenant_id: tenant_id.into(),
            enabled_modules: Vec::new(),
            settings: HashMap::new(),
        }
    }

    pub fn module_enabled(&self, module: &str) -> bool {
        self.enabled_modules.iter().any(|m| m == module)
    }

    /// Read a module's configured resource list (e.g. target channels).
    ///
    /// Entries may be stored as strings or numbers; both are normalized to
    /// strings. A missing or malformed list reads as empty.
    pub fn resource_list(&self, module: &str, key: &str) -> Vec<String> {
        self.settings
            .get(module)
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A user-created recurring task record, persisted so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub job_id: String,
    /// Module whose job body runs on each fire
    pub module: String,
    pub tenant_id: String,
    /// Reference to the record this job periodically re-announces
    pub owner_ref: String,
    pub resource_id: String,
    /// Cron schedule expression
    pub schedule: String,
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    pub fn new(
        module: impl Into<String>,
        tenant_id: impl Into<String>,
        owner_ref: impl Into<String>,
        resource_id: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        CronJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            module: module.into(),
            tenant_id: tenant_id.into(),
            owner_ref: owner_ref.into(),
            resource_id: resource_id.into(),
            schedule: schedule.into(),
            created_at: Utc::now(),
        }
    }
}
