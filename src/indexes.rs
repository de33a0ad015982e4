//! Secondary-index suspension around a bulk load.
//!
//! COPY throughput on an indexed table is dominated by per-row index
//! maintenance. Dropping plain secondary indexes before the load and
//! rebuilding them once afterwards is strictly cheaper for large datasets,
//! so the entry points capture eligible indexes, drop them, and guarantee
//! recreation no matter how the load concluded.
//!
//! Only definitions that read `CREATE INDEX ...` are touched; unique and
//! primary-key-backing indexes (`CREATE UNIQUE INDEX ...`) stay in place.

use crate::connection::ConnectionConfig;
use crate::error::LoadError;
use crate::fanout::{DdlWorkerRequest, run_worker};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// One captured index: schema-qualified name plus its creation DDL.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub name: String,
    pub definition: String,
}

/// Captures, drops, and recreates the plain secondary indexes of one table.
///
/// Catalog and DDL statements run on one-off connections outside the load
/// job's pool, so index maintenance never competes for pool slots.
pub struct IndexMaintenance {
    config: ConnectionConfig,
    table: String,
}

impl IndexMaintenance {
    pub fn new(config: ConnectionConfig, table: &str) -> Self {
        Self {
            config,
            table: table.to_string(),
        }
    }

    /// Query the catalog for droppable indexes on the target table.
    pub async fn capture(&self) -> Result<Vec<IndexRecord>, LoadError> {
        let mut conn = self.config.connect().await.map_err(LoadError::Index)?;

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"SELECT indexname, indexdef FROM pg_indexes
               WHERE schemaname = $1 AND tablename = $2
                 AND indexdef LIKE 'CREATE INDEX %'"#,
        )
        .bind(&self.config.schema)
        .bind(&self.table)
        .fetch_all(&mut conn)
        .await
        .map_err(LoadError::Index)?;

        // The schema prefix is needed to find and drop the index later.
        Ok(rows
            .into_iter()
            .map(|(name, definition)| IndexRecord {
                name: format!("{}.{}", self.config.schema, name),
                definition,
            })
            .collect())
    }

    /// Drop all captured indexes in one statement. No-op for an empty set.
    pub async fn drop(&self, records: &[IndexRecord]) -> Result<(), LoadError> {
        if records.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
        log::info!("dropping indexes: {}", names.join(", "));

        let mut conn = self.config.connect().await.map_err(LoadError::Index)?;
        sqlx::query(&format!("DROP INDEX IF EXISTS {}", names.join(", ")))
            .execute(&mut conn)
            .await
            .map_err(LoadError::Index)?;

        Ok(())
    }

    /// Re-execute each captured creation DDL, sequentially or with one
    /// worker process per statement.
    pub async fn recreate(
        &self,
        records: &[IndexRecord],
        parallel: bool,
        worker_program: Option<&Path>,
    ) -> Result<(), LoadError> {
        if records.is_empty() {
            return Ok(());
        }

        log::info!("recreating {} indexes (parallel={})", records.len(), parallel);
        if parallel {
            self.recreate_parallel(records, worker_program).await
        } else {
            self.recreate_sequential(records).await
        }
    }

    async fn recreate_sequential(&self, records: &[IndexRecord]) -> Result<(), LoadError> {
        let mut conn = self.config.connect().await.map_err(LoadError::Index)?;
        for record in records {
            log::debug!("recreating index {}", record.name);
            sqlx::query(&record.definition)
                .execute(&mut conn)
                .await
                .map_err(LoadError::Index)?;
        }
        Ok(())
    }

    /// One DDL statement per worker process, bounded by the CPU count. All
    /// workers are awaited; the first failure surfaces after all finish.
    async fn recreate_parallel(
        &self,
        records: &[IndexRecord],
        worker_program: Option<&Path>,
    ) -> Result<(), LoadError> {
        let program: PathBuf = match worker_program {
            Some(program) => program.to_path_buf(),
            None => std::env::current_exe()?,
        };

        let limiter = Arc::new(Semaphore::new(num_cpus::get().max(1)));
        let mut workers = JoinSet::new();
        for record in records {
            let request = DdlWorkerRequest {
                connection: self.config.clone(),
                statement: record.definition.clone(),
            };
            let payload = serde_json::to_string(&request)?;
            let program = program.clone();
            let limiter = Arc::clone(&limiter);
            let name = record.name.clone();

            workers.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| LoadError::Worker("worker limiter closed".to_string()))?;
                log::debug!("recreating index {} in worker process", name);
                run_worker(&program, "ddl-worker", &payload).await
            });
        }

        let mut first_error: Option<LoadError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("index recreation worker failed: {}", err);
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(LoadError::TaskJoin(join_err));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Disable WAL for the target table. Further accelerates ingestion at
    /// the cost of crash-durability until the table is set logged again.
    pub async fn set_table_unlogged(&self) -> Result<(), LoadError> {
        self.alter_logging("SET UNLOGGED").await
    }

    /// Restore WAL for the target table.
    pub async fn set_table_logged(&self) -> Result<(), LoadError> {
        self.alter_logging("SET LOGGED").await
    }

    async fn alter_logging(&self, clause: &str) -> Result<(), LoadError> {
        let mut conn = self.config.connect().await.map_err(LoadError::Index)?;
        let statement = format!(
            "ALTER TABLE {} {}",
            self.config.qualified_table(&self.table),
            clause
        );
        log::debug!("{}", statement);
        sqlx::query(&statement)
            .execute(&mut conn)
            .await
            .map_err(LoadError::Index)?;
        Ok(())
    }
}
