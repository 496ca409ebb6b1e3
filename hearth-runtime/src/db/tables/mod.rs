//! Record operations, one file per table

pub mod cron_jobs;
pub mod tenant_configs;
