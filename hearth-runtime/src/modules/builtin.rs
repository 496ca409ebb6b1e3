//! Built-in modules registered at startup
//!
//! These are deliberately thin: delivery transports live outside this crate,
//! so job bodies here do their work and hand results to the log. They exist
//! so a fresh deployment has real loop and cron traffic to exercise the
//! scheduler and the HTTP client.

use super::{JobBody, JobContext, ModuleDescriptor, ModuleRegistry, Wait};
use crate::http::{CallOptions, HttpResponse, RateLimitedClient};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const ANNOUNCE_DEFAULT_RATE_SECS: u64 = 3600;

fn setting_u64(config: &Value, key: &str, default: u64) -> u64 {
    config.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
}

fn setting_str<'a>(config: &'a Value, key: &'a str) -> Option<&'a str> {
    config.get(key).and_then(|v| v.as_str())
}

/// Posts the configured message into each target channel on a fixed interval.
/// Cron jobs created against this module re-announce a stored record.
struct AnnounceJob;

#[async_trait]
impl JobBody for AnnounceJob {
    async fn execute(&self, ctx: JobContext<'_>) -> Result<(), String> {
        let settings = ctx
            .config
            .settings
            .get("announce")
            .cloned()
            .unwrap_or_else(|| json!({}));

        if let Some(job) = ctx.cron_job {
            log::info!(
                "[announce] tenant={} channel={} re-announcing {}",
                ctx.tenant_id,
                job.resource_id,
                job.owner_ref
            );
            return Ok(());
        }

        let message = setting_str(&settings, "message")
            .ok_or_else(|| "no announce message configured".to_string())?;
        let channel = ctx.resource.unwrap_or("(tenant)");
        log::info!(
            "[announce] tenant={} channel={}: {}",
            ctx.tenant_id,
            channel,
            message
        );
        Ok(())
    }

    async fn wait_strategy(&self, config: &crate::models::TenantConfig) -> Result<Wait, String> {
        let settings = config
            .settings
            .get("announce")
            .cloned()
            .unwrap_or_else(|| json!({}));
        // Admins may set a cron schedule instead of a fixed rate
        if let Some(expr) = setting_str(&settings, "schedule") {
            return Ok(Wait::Cron(expr.to_string()));
        }
        let secs = setting_u64(&settings, "rate_secs", ANNOUNCE_DEFAULT_RATE_SECS);
        Ok(Wait::Fixed(Duration::from_secs(secs)))
    }
}

/// Polls a headline feed through the shared rate-limited client and logs the
/// top results per target channel.
struct NewsJob {
    client: Arc<RateLimitedClient>,
}

#[async_trait]
impl JobBody for NewsJob {
    async fn execute(&self, ctx: JobContext<'_>) -> Result<(), String> {
        let settings = ctx
            .config
            .settings
            .get("news")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let url = setting_str(&settings, "feed_url")
            .ok_or_else(|| "no feed_url configured".to_string())?;

        let response = self
            .client
            .call(
                Method::GET,
                url,
                CallOptions {
                    use_cache: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        let payload = match response {
            HttpResponse::Structured(payload) => payload,
            HttpResponse::Raw { .. } => return Err("unexpected raw response".to_string()),
        };
        let count = payload
            .get("articles")
            .and_then(|a| a.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        log::info!(
            "[news] tenant={} channel={} fetched {} articles",
            ctx.tenant_id,
            ctx.resource.unwrap_or("(tenant)"),
            count
        );
        Ok(())
    }

    async fn wait_strategy(&self, config: &crate::models::TenantConfig) -> Result<Wait, String> {
        let settings = config
            .settings
            .get("news")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let secs = setting_u64(&settings, "rate_secs", 3600);
        Ok(Wait::Fixed(Duration::from_secs(secs)))
    }

    fn run_on_start(&self) -> bool {
        true
    }
}

/// Build the registry of built-in modules.
pub fn create_default_registry(client: Arc<RateLimitedClient>) -> ModuleRegistry {
    let registry = ModuleRegistry::new();

    registry.register(ModuleDescriptor {
        name: "announce".to_string(),
        default_settings: json!({
            "channels": [],
            "message": "",
            "rate_secs": ANNOUNCE_DEFAULT_RATE_SECS,
        }),
        resource_list_key: Some("channels".to_string()),
        job: Some(Arc::new(AnnounceJob)),
    });

    registry.register(ModuleDescriptor {
        name: "news".to_string(),
        default_settings: json!({
            "channels": [],
            "feed_url": "",
            "rate_secs": 3600,
        }),
        resource_list_key: Some("channels".to_string()),
        job: Some(Arc::new(NewsJob {
            client: client.clone(),
        })),
    });

    registry
}
