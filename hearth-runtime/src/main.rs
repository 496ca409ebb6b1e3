use dotenv::dotenv;
use std::sync::Arc;

mod cache;
mod config;
mod config_store;
mod db;
mod http;
mod models;
mod modules;
mod scheduler;

use config::Config;
use config_store::ConfigStore;
use db::{CronJobStore, TenantConfigStore};
use http::RateLimitedClient;
use modules::ModuleRegistry;
use scheduler::{RecurringTaskManager, SchedulerConfig, StaticTenantDirectory, TenantDirectory};

/// Shared service handles, one instance per process
pub struct RuntimeServices {
    pub config: Config,
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<ModuleRegistry>,
    pub http_client: Arc<RateLimitedClient>,
    pub task_manager: RecurringTaskManager,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    // Check ./config first, then ../config (for running from a subdirectory)
    let config_dir = if std::path::Path::new("./config").exists() {
        std::path::Path::new("./config")
    } else {
        std::path::Path::new("../config")
    };
    log::info!("Using config directory: {:?}", config_dir);
    let rate_limits = config::load_rate_limits(config_dir);

    let config = Config::from_env();
    if config.tenant_ids.is_empty() {
        log::warn!("TENANT_IDS is empty - no loop jobs will be started");
    }

    log::info!("Initializing database at {}", config.database_url);
    let db = db::Database::new(&config.database_url).expect("Failed to initialize database");
    let db = Arc::new(db);

    log::info!("Initializing rate-limited HTTP client");
    let http_client = Arc::new(RateLimitedClient::new(
        rate_limits,
        config.http_cache_len,
        config.http_cache_ttl,
    ));

    log::info!("Initializing module registry");
    let registry = Arc::new(modules::builtin::create_default_registry(
        http_client.clone(),
    ));
    log::info!("Registered {} modules", registry.len());

    let config_store = Arc::new(ConfigStore::new(
        db.clone() as Arc<dyn TenantConfigStore>,
        registry.clone(),
        config.config_cache_len,
        config.config_cache_ttl,
    ));

    let directory = Arc::new(StaticTenantDirectory::new(config.tenant_ids.clone()));

    log::info!("Initializing task manager");
    let task_manager = RecurringTaskManager::new(
        config_store.clone(),
        registry.clone(),
        directory.clone() as Arc<dyn TenantDirectory>,
        db.clone() as Arc<dyn CronJobStore>,
        SchedulerConfig::default(),
    );
    task_manager.start().await;

    let services = RuntimeServices {
        config,
        config_store,
        registry,
        http_client,
        task_manager,
    };

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    services.task_manager.shutdown();
    Ok(())
}
