//! Loop job task - the WAITING -> EXECUTING cycle for one tenant/resource

use super::wait;
use super::TenantDirectory;
use crate::config_store::{ConfigStore, GetConfigOptions};
use crate::models::TenantConfig;
use crate::modules::{JobBody, JobContext, ModuleDescriptor, ModuleRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(super) struct LoopJobContext {
    pub descriptor: Arc<ModuleDescriptor>,
    pub body: Arc<dyn JobBody>,
    pub tenant_id: String,
    pub resource: Option<String>,
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<ModuleRegistry>,
    pub directory: Arc<dyn TenantDirectory>,
    pub fallback_wait: Duration,
    pub token: CancellationToken,
}

pub(super) async fn run(ctx: LoopJobContext) {
    let Some(mut config) = ctx
        .config_store
        .get_config(&ctx.tenant_id, GetConfigOptions::fresh())
        .await
    else {
        return;
    };

    if !ctx.body.run_on_start() && !wait_cycle(&ctx, &config).await {
        return;
    }

    loop {
        // On wake: reload config fresh and re-check liveness before executing
        config = match ctx
            .config_store
            .get_config(&ctx.tenant_id, GetConfigOptions::fresh())
            .await
        {
            Some(config) => config,
            None => break,
        };

        if !ctx.registry.contains(&ctx.descriptor.name) {
            log::debug!(
                "[scheduler] Module {} unloaded - stopping loop for tenant {}",
                ctx.descriptor.name,
                ctx.tenant_id
            );
            break;
        }

        if !ctx.directory.is_reachable(&ctx.tenant_id) {
            log::debug!(
                "[scheduler] Tenant {} unreachable - stopping loop for module {}",
                ctx.tenant_id,
                ctx.descriptor.name
            );
            break;
        }

        if let (Some(resource), Some(key)) = (
            ctx.resource.as_deref(),
            ctx.descriptor.resource_list_key.as_deref(),
        ) {
            let configured = config.resource_list(&ctx.descriptor.name, key);
            if !configured.iter().any(|r| r == resource) {
                log::debug!(
                    "[scheduler] Resource {} no longer configured for module {} in tenant {} - stopping",
                    resource,
                    ctx.descriptor.name,
                    ctx.tenant_id
                );
                break;
            }
        }

        // A disabled module keeps its loop alive but skips the body
        if config.module_enabled(&ctx.descriptor.name) {
            let job_ctx = JobContext {
                tenant_id: &ctx.tenant_id,
                config: &config,
                resource: ctx.resource.as_deref(),
                cron_job: None,
            };
            if let Err(e) = ctx.body.execute(job_ctx).await {
                // Always proceed to the next wait, even when execute fails
                log::error!(
                    "[scheduler] Loop job execute error: module={} tenant={} resource={:?}: {}",
                    ctx.descriptor.name,
                    ctx.tenant_id,
                    ctx.resource,
                    e
                );
            }
        }

        if !wait_cycle(&ctx, &config).await {
            break;
        }
    }
}

/// Suspend per the module's wait strategy. Returns false when cancelled.
async fn wait_cycle(ctx: &LoopJobContext, config: &TenantConfig) -> bool {
    let delay = match ctx
        .body
        .wait_strategy(config)
        .await
        .and_then(|w| wait::resolve(&w))
    {
        Ok(delay) => delay,
        Err(e) => {
            // Substitute a fixed delay to avoid a tight error loop
            log::error!(
                "[scheduler] Could not resolve wait for module={} tenant={}: {} - using fallback",
                ctx.descriptor.name,
                ctx.tenant_id,
                e
            );
            ctx.fallback_wait
        }
    };

    tokio::select! {
        _ = ctx.token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
