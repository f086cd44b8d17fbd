//! Postgres connection pool setup.
//!
//! Defaults live in [`courier_core::defaults`]; deployments override the
//! connection string via `DATABASE_URL` (a `.env` file is honored).

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use courier_core::defaults::{
    POOL_CONNECT_TIMEOUT_SECS, POOL_IDLE_TIMEOUT_SECS, POOL_MAX_CONNECTIONS,
    POOL_MAX_LIFETIME_SECS, POOL_MIN_CONNECTIONS,
};
use courier_core::{Error, Result};

/// Pool sizing and timeout knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    /// `None` keeps connections until the idle timeout reaps them.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: POOL_MAX_CONNECTIONS,
            min_connections: POOL_MIN_CONNECTIONS,
            connect_timeout: Duration::from_secs(POOL_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(POOL_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(POOL_MAX_LIFETIME_SECS)),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }
}

/// Resolve the database connection string from the environment.
///
/// Loads `.env` if present, then requires `DATABASE_URL`.
pub fn database_url() -> Result<String> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL")
        .map_err(|_| Error::Config("DATABASE_URL is not set".to_string()))
}

/// Connect a pool using `DATABASE_URL` and default sizing.
pub async fn create_pool_from_env() -> Result<PgPool> {
    create_pool(&database_url()?).await
}

/// Connect a pool with default sizing.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Connect a pool with explicit sizing.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout);

    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log current pool health, warning when no connection is idle.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_shared_constants() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, POOL_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, POOL_MIN_CONNECTIONS);
        assert_eq!(
            config.max_lifetime,
            Some(Duration::from_secs(POOL_MAX_LIFETIME_SECS))
        );
    }

    #[test]
    fn builder_overrides_sizing() {
        let config = PoolConfig::new().max_connections(20).min_connections(5);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
    }
}
