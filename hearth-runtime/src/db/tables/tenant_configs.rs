//! Tenant config database operations

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use serde_json::Value;
use std::collections::HashMap;

use super::super::{Database, TenantConfigStore};
use crate::models::TenantConfig;

impl Database {
    fn get_tenant_config_row(&self, tenant_id: &str) -> SqliteResult<Option<TenantConfig>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            "SELECT tenant_id, enabled_modules, settings FROM tenant_configs WHERE tenant_id = ?1",
            [tenant_id],
            |row| {
                let tenant_id: String = row.get(0)?;
                let enabled_json: String = row.get(1)?;
                let settings_json: String = row.get(2)?;

                let enabled_modules: Vec<String> =
                    serde_json::from_str(&enabled_json).unwrap_or_default();
                let settings: HashMap<String, Value> =
                    serde_json::from_str(&settings_json).unwrap_or_default();

                Ok(TenantConfig {
                    tenant_id,
                    enabled_modules,
                    settings,
                })
            },
        )
        .optional()
    }

    fn insert_tenant_config_row(&self, config: &TenantConfig) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let enabled_json =
            serde_json::to_string(&config.enabled_modules).unwrap_or_else(|_| "[]".to_string());
        let settings_json =
            serde_json::to_string(&config.settings).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "INSERT INTO tenant_configs (tenant_id, enabled_modules, settings, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![config.tenant_id, enabled_json, settings_json, &now, &now],
        )?;

        Ok(())
    }

    fn update_tenant_config_row(&self, config: &TenantConfig) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        let enabled_json =
            serde_json::to_string(&config.enabled_modules).unwrap_or_else(|_| "[]".to_string());
        let settings_json =
            serde_json::to_string(&config.settings).unwrap_or_else(|_| "{}".to_string());

        conn.execute(
            "UPDATE tenant_configs SET enabled_modules = ?2, settings = ?3, updated_at = ?4
             WHERE tenant_id = ?1",
            rusqlite::params![config.tenant_id, enabled_json, settings_json, &now],
        )?;

        Ok(())
    }
}

#[async_trait]
impl TenantConfigStore for Database {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantConfig>, String> {
        self.get_tenant_config_row(tenant_id)
            .map_err(|e| e.to_string())
    }

    async fn insert(&self, config: &TenantConfig) -> Result<(), String> {
        self.insert_tenant_config_row(config)
            .map_err(|e| e.to_string())
    }

    async fn update(&self, config: &TenantConfig) -> Result<(), String> {
        self.update_tenant_config_row(config)
            .map_err(|e| e.to_string())
    }
}
