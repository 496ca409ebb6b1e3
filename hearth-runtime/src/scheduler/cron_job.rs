//! Cron job task - schedule-driven execution of a persisted job record

use super::wait;
use crate::cache::ExpiringCache;
use crate::config_store::{ConfigStore, GetConfigOptions};
use crate::db::CronJobStore;
use crate::models::CronJob;
use crate::modules::{JobContext, ModuleRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(super) struct CronJobContext {
    pub job: CronJob,
    pub job_store: Arc<dyn CronJobStore>,
    /// Short-TTL cache over persisted records, shared with the manager
    pub job_cache: Arc<ExpiringCache<String, CronJob>>,
    pub registry: Arc<ModuleRegistry>,
    pub config_store: Arc<ConfigStore>,
    pub fallback_wait: Duration,
    pub token: CancellationToken,
}

pub(super) async fn run(mut ctx: CronJobContext) {
    let job_id = ctx.job.job_id.clone();
    let mut lookup_retried = false;

    loop {
        // WAITING until the schedule next matches wall-clock time
        let delay = match wait::next_cron_delay(&ctx.job.schedule, Utc::now()) {
            Ok(delay) => delay,
            Err(e) => {
                log::error!(
                    "[scheduler] Cron job {}: {} - using fallback wait",
                    job_id,
                    e
                );
                ctx.fallback_wait
            }
        };

        tokio::select! {
            _ = ctx.token.cancelled() => {
                log::debug!("[scheduler] Cron job {} cancelled", job_id);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        // The in-memory execution must reflect the latest persisted record;
        // a deleted record means this task is done.
        ctx.job = match ctx.job_cache.get(&job_id) {
            Some(job) => job,
            None => match ctx.job_store.get(&job_id).await {
                Ok(Some(job)) => {
                    ctx.job_cache.insert(job_id.clone(), job.clone());
                    lookup_retried = false;
                    job
                }
                Ok(None) => {
                    log::warn!(
                        "[scheduler] Cron job {} deleted from store - stopping",
                        job_id
                    );
                    return;
                }
                Err(e) if !lookup_retried => {
                    log::error!(
                        "[scheduler] Cron job {} store lookup failed: {} - retrying next wake",
                        job_id,
                        e
                    );
                    lookup_retried = true;
                    continue;
                }
                Err(e) => {
                    log::error!(
                        "[scheduler] Cron job {} store lookup failed twice: {} - treating as deleted",
                        job_id,
                        e
                    );
                    return;
                }
            },
        };

        let Some(descriptor) = ctx.registry.get(&ctx.job.module) else {
            log::debug!(
                "[scheduler] Module {} unloaded - stopping cron job {}",
                ctx.job.module,
                job_id
            );
            return;
        };
        let Some(body) = descriptor.job.clone() else {
            log::warn!(
                "[scheduler] Module {} has no job body - stopping cron job {}",
                ctx.job.module,
                job_id
            );
            return;
        };

        let Some(config) = ctx
            .config_store
            .get_config(&ctx.job.tenant_id, GetConfigOptions::fresh())
            .await
        else {
            return;
        };

        let job_ctx = JobContext {
            tenant_id: &ctx.job.tenant_id,
            config: &config,
            resource: Some(&ctx.job.resource_id),
            cron_job: Some(&ctx.job),
        };
        if let Err(e) = body.execute(job_ctx).await {
            log::error!(
                "[scheduler] Cron job {} execute error: tenant={} resource={}: {}",
                job_id,
                ctx.job.tenant_id,
                ctx.job.resource_id,
                e
            );
        }
    }
}
