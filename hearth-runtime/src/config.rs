//! Process configuration from environment variables and the config directory

use crate::http::HostLimit;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    /// Tenants served by this process, comma separated in TENANT_IDS
    pub tenant_ids: Vec<String>,
    pub config_cache_len: usize,
    pub config_cache_ttl: Duration,
    pub http_cache_len: usize,
    pub http_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "./.db/hearth.db".to_string()),
            tenant_ids: env::var("TENANT_IDS")
                .unwrap_or_default()
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            config_cache_len: env_usize("CONFIG_CACHE_LEN", 100),
            config_cache_ttl: Duration::from_secs(env_u64("CONFIG_CACHE_SECONDS", 1200)),
            http_cache_len: env_usize("HTTP_CACHE_LEN", 50),
            http_cache_ttl: Duration::from_secs(env_u64("HTTP_CACHE_SECONDS", 300)),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// RON shape for one host's budget
#[derive(Debug, Clone, Deserialize)]
struct RateLimitEntry {
    max_calls: u32,
    window_secs: u64,
}

/// Load per-host rate limits from `rate_limits.ron` in the config directory,
/// falling back to the compiled-in table when the file is absent.
pub fn load_rate_limits(config_dir: &Path) -> HashMap<String, HostLimit> {
    let path = config_dir.join("rate_limits.ron");
    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match ron::from_str::<HashMap<String, RateLimitEntry>>(&content) {
                Ok(entries) => {
                    log::info!(
                        "[config] Loaded {} host rate limits from {:?}",
                        entries.len(),
                        path
                    );
                    return entries
                        .into_iter()
                        .map(|(host, entry)| {
                            (
                                host,
                                HostLimit {
                                    max_calls: entry.max_calls,
                                    window: Duration::from_secs(entry.window_secs),
                                },
                            )
                        })
                        .collect();
                }
                Err(e) => log::error!("[config] Failed to parse rate limits: {}", e),
            },
            Err(e) => log::error!("[config] Failed to read rate limits file: {}", e),
        }
    } else {
        log::warn!("[config] Rate limits file not found: {:?} - using defaults", path);
    }

    default_rate_limits()
}

fn default_rate_limits() -> HashMap<String, HostLimit> {
    let limit = |max_calls, window_secs| HostLimit {
        max_calls,
        window: Duration::from_secs(window_secs),
    };

    HashMap::from([
        ("api.urbandictionary.com".to_string(), limit(2, 60)),
        ("www.googleapis.com".to_string(), limit(5, 60)),
        ("ipinfo.io".to_string(), limit(1, 30)),
        ("api.open-notify.org".to_string(), limit(1, 60)),
        ("geocode.xyz".to_string(), limit(1, 60)),
        ("v2.jokeapi.dev".to_string(), limit(10, 60)),
        ("newsapi.org".to_string(), limit(1, 30)),
        ("api.openweathermap.org".to_string(), limit(3, 60)),
        ("api.github.com".to_string(), limit(3, 60)),
        ("xkcd.com".to_string(), limit(5, 60)),
    ])
}
