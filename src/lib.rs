//! Parallel bulk loader for PostgreSQL.
//!
//! Streams in-memory tabular datasets into a target table through the
//! streaming COPY protocol instead of per-row INSERT statements.
//!
//! # Architecture Overview
//!
//! A load job moves through the following components:
//!
//! - **`partition`**: splits the dataset into contiguous row ranges of at
//!   most one batch each; every range becomes one COPY task.
//!
//! - **`connection`**: validates pool sizing, then owns the connection
//!   pool's lifecycle (`open`/`close` with retry) for exactly one job.
//!
//! - **`executor`**: fans the ranges out as concurrent COPY tasks bounded by
//!   the number of guaranteed-ready pooled connections, and fans back in
//!   once every task has settled.
//!
//! - **`indexes`**: captures and drops plain secondary indexes before the
//!   load and guarantees their recreation afterwards, so ingestion never
//!   pays per-row index maintenance.
//!
//! - **`fanout`**: distributes a sequence of datasets across isolated
//!   worker processes, each running the full single-dataset pipeline with
//!   its own pool.
//!
//! - **`load`**: the public entry points tying the above together.
//!
//! # Atomicity
//!
//! There is no transactional atomicity across a whole load. Row-level
//! atomicity exists only within a single range task; when a load fails,
//! ranges that already finished stay committed. Callers needing all-or-
//! nothing semantics should load into a staging table and swap.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgbulk::{ConnectionConfig, Dataset, LoadOptions, SslMode};
//!
//! let config = ConnectionConfig {
//!     host: "localhost".into(),
//!     port: 5432,
//!     user: "postgres".into(),
//!     password: "postgres".into(),
//!     database: "warehouse".into(),
//!     schema: "public".into(),
//!     ssl_mode: SslMode::Prefer,
//! };
//!
//! let mut dataset = Dataset::new(vec!["id", "name"]);
//! dataset.push_row(vec![Some("1".into()), Some("alpha".into())])?;
//!
//! let rows = pgbulk::load_dataset(&config, "items", dataset, &LoadOptions::new(10_000)).await?;
//! ```

pub mod connection;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod indexes;
pub mod load;
pub mod partition;
pub mod retry;

pub use connection::{ConnectionConfig, PoolManager, SslMode};
pub use dataset::Dataset;
pub use error::LoadError;
pub use fanout::FanoutOptions;
pub use load::{LoadOptions, load_dataset, load_datasets, load_with_fanout};
pub use retry::RetryPolicy;

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Initialize logging once per process. Safe to call from multiple entry
/// points (binary, workers, tests).
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    });
}

pub mod test_support {
    //! Disposable database provisioning for integration tests.
    //!
    //! Launches a throwaway Postgres container and creates a uniquely named
    //! database in it per test, so tests never share state.

    use crate::connection::{ConnectionConfig, SslMode};
    use sqlx::PgPool;
    use sqlx::postgres::PgPoolOptions;
    use testcontainers::{GenericImage, ImageExt, core::WaitFor};
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database factory for integration tests.
    pub struct TestDatabase {
        // Held for its lifetime; dropping stops the container.
        _container: ContainerAsync<GenericImage>,
        config: ConnectionConfig,
    }

    impl TestDatabase {
        /// Launch a disposable Postgres container and provision a fresh,
        /// uniquely named database in it.
        pub async fn new() -> Result<Self, TestDatabaseError> {
            let image = GenericImage::new("postgres", "16-alpine")
                .with_wait_for(WaitFor::message_on_stdout(
                    "database system is ready to accept connections",
                ))
                .with_wait_for(WaitFor::message_on_stderr(
                    "database system is ready to accept connections",
                ));

            let request = image
                .with_env_var("POSTGRES_DB", "postgres")
                .with_env_var("POSTGRES_USER", "postgres")
                .with_env_var("POSTGRES_PASSWORD", "postgres");

            let container = request.start().await?;

            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;

            let admin_config = ConnectionConfig {
                host,
                port,
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                database: "postgres".to_string(),
                schema: "public".to_string(),
                ssl_mode: SslMode::Disable,
            };

            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_config.connect_options())
                .await?;

            let database = format!("pgbulk_test_{}", Uuid::new_v4().simple());
            sqlx::query(&format!("CREATE DATABASE \"{}\" TEMPLATE template0", database))
                .execute(&admin_pool)
                .await?;
            admin_pool.close().await;

            let config = ConnectionConfig {
                database,
                ..admin_config
            };

            Ok(Self {
                _container: container,
                config,
            })
        }

        /// Connection details for the provisioned database.
        pub fn config(&self) -> &ConnectionConfig {
            &self.config
        }

        /// A small helper pool for schema setup and assertions.
        pub async fn pool(&self) -> Result<PgPool, TestDatabaseError> {
            Ok(PgPoolOptions::new()
                .max_connections(2)
                .connect_with(self.config.connect_options())
                .await?)
        }
    }
}
