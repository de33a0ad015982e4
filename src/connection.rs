//! Connection descriptors and pool lifecycle management.
//!
//! A [`ConnectionConfig`] identifies one logical database target and is
//! immutable once built. A [`PoolManager`] owns exactly one pool for the
//! lifetime of one load job: sizing is validated before any network I/O,
//! and `open`/`close` are wrapped in the crate-wide retry policy.

use crate::error::LoadError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode};

/// Transport security requested for database connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
        }
    }
}

/// Connection details for one PostgreSQL target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl ConnectionConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(self.ssl_mode.into())
    }

    /// Open a standalone connection outside any pool. Used for catalog and
    /// DDL work that must not compete with load traffic for pool slots.
    /// Callers classify the failure (pool vs. index maintenance).
    pub async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        self.connect_options().connect().await
    }

    /// Schema-qualified table name for SQL statements.
    pub fn qualified_table(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }
}

/// Owns one sized connection pool through its `Closed -> Open -> Closed`
/// lifecycle. No other component opens or closes the pool.
#[derive(Debug)]
pub struct PoolManager {
    config: ConnectionConfig,
    min_size: u32,
    max_size: u32,
    retry: RetryPolicy,
    pool: Option<PgPool>,
}

impl PoolManager {
    /// Validate sizing and build a manager. Fails synchronously with a
    /// configuration error before attempting any connection; this is not
    /// retried.
    pub fn new(config: ConnectionConfig, min_size: u32, max_size: u32) -> Result<Self, LoadError> {
        Self::validate_sizing(min_size, max_size)?;

        Ok(Self {
            config,
            min_size,
            max_size,
            retry: RetryPolicy::default(),
            pool: None,
        })
    }

    /// Sizing rules shared by the manager and the load entry points: both
    /// bounds at least 1, max never below min. Distinct messages per
    /// violation.
    pub fn validate_sizing(min_size: u32, max_size: u32) -> Result<(), LoadError> {
        if min_size == 0 || max_size == 0 {
            return Err(LoadError::Config(
                "connection pool sizes must be at least 1".to_string(),
            ));
        }
        if max_size < min_size {
            return Err(LoadError::Config(format!(
                "max pool size ({}) must not be smaller than min pool size ({})",
                max_size, min_size
            )));
        }
        Ok(())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    /// Establish the pool with at least `min_size` connections ready before
    /// returning. Retried under the crate-wide policy; the last failure is
    /// propagated after the attempt budget is spent.
    pub async fn open(&mut self) -> Result<(), LoadError> {
        let options = self.config.connect_options();
        let min_size = self.min_size;
        let max_size = self.max_size;

        let pool = self
            .retry
            .run("open connection pool", || {
                let options = options.clone();
                async move {
                    let pool = PgPoolOptions::new()
                        .min_connections(min_size)
                        .max_connections(max_size)
                        .connect_with(options)
                        .await?;

                    // Warm the pool so min_size connections are established,
                    // not just promised.
                    let mut warm = Vec::with_capacity(min_size as usize);
                    for _ in 0..min_size {
                        warm.push(pool.acquire().await?);
                    }
                    drop(warm);

                    Ok::<PgPool, sqlx::Error>(pool)
                }
            })
            .await
            .map_err(LoadError::Pool)?;

        log::debug!(
            "connection pool open against {}:{}/{} (min={}, max={})",
            self.config.host,
            self.config.port,
            self.config.database,
            min_size,
            max_size
        );
        self.pool = Some(pool);
        Ok(())
    }

    /// Access the open pool.
    pub fn pool(&self) -> Result<&PgPool, LoadError> {
        self.pool
            .as_ref()
            .ok_or_else(|| LoadError::Config("connection pool is not open".to_string()))
    }

    /// Release all pooled connections. Safe to call when never opened.
    pub async fn close(&mut self) -> Result<(), LoadError> {
        let Some(pool) = self.pool.take() else {
            return Ok(());
        };

        self.retry
            .run("close connection pool", || {
                let pool = pool.clone();
                async move {
                    pool.close().await;
                    Ok::<(), sqlx::Error>(())
                }
            })
            .await
            .map_err(LoadError::Pool)?;

        log::debug!("connection pool closed");
        Ok(())
    }
}
