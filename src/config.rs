//! Typed view over the recognized environment keys.

use anyhow::Result;

use crate::util::env::{env_opt, env_parse, env_req};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Catalog store connection string.
    pub database_url: String,
    /// Backing store for queues / locks / rate-limit windows. Defaults to the
    /// catalog database; may point at a dedicated instance.
    pub queue_url: String,
    /// Connection used for LISTEN/NOTIFY event bridging. Defaults likewise.
    pub bus_url: String,

    pub steam_api_key: Option<String>,
    pub mcp_api_key: Option<String>,
    pub secret_key: Option<String>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,

    pub workers: usize,
    pub max_connections: u32,
    pub cache_ttl_secs: u64,

    pub api_host: String,
    pub api_port: u16,
    pub realtime_addr: String,

    pub sync_batch_size: usize,
    pub sync_job_timeout_secs: u64,
    pub sync_max_transient_retries: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env_req("DATABASE_URL")?;
        let queue_url = env_opt("QUEUE_URL").unwrap_or_else(|| database_url.clone());
        let bus_url = env_opt("BUS_URL").unwrap_or_else(|| database_url.clone());

        Ok(Self {
            database_url,
            queue_url,
            bus_url,
            steam_api_key: env_opt("STEAM_API_KEY"),
            mcp_api_key: env_opt("MCP_API_KEY"),
            secret_key: env_opt("SECRET_KEY"),
            admin_email: env_opt("ADMIN_EMAIL"),
            admin_password: env_opt("ADMIN_PASSWORD"),
            workers: env_parse("WORKERS", 1usize).max(1),
            max_connections: env_parse("MAX_CONNECTIONS", 20u32).max(1),
            cache_ttl_secs: env_parse("CACHE_TTL", 3600u64),
            api_host: env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            api_port: env_parse("API_PORT", 8080u16),
            realtime_addr: env_opt("REALTIME_ADDR").unwrap_or_else(|| "0.0.0.0:8081".to_string()),
            sync_batch_size: env_parse("SYNC_BATCH_SIZE", 100usize).max(1),
            sync_job_timeout_secs: env_parse("SYNC_JOB_TIMEOUT_SECS", 7200u64),
            sync_max_transient_retries: env_parse("SYNC_MAX_TRANSIENT_RETRIES", 5u32),
        })
    }

    /// HTTP auth is enabled only when both admin credentials are configured;
    /// otherwise the API trusts the fronting proxy.
    pub fn auth_enabled(&self) -> bool {
        self.admin_email.is_some() && self.admin_password.is_some()
    }
}
