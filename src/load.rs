//! High-level load entry points.
//!
//! Three ways in: [`load_dataset`] for one in-memory dataset,
//! [`load_datasets`] for a sequence executed over one shared pool, and
//! [`load_with_fanout`] for a sequence where each dataset gets its own
//! worker process. All of them optionally suspend secondary indexes for the
//! duration of the load; recreation is guaranteed once the drop happened,
//! whatever the load's outcome.

use crate::connection::{ConnectionConfig, PoolManager};
use crate::dataset::Dataset;
use crate::error::LoadError;
use crate::executor::CopyExecutor;
use crate::fanout::{CopyWorkerRequest, DdlWorkerRequest, FanoutOptions, ProcessCoordinator};
use crate::indexes::{IndexMaintenance, IndexRecord};
use crate::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Tuning for one load job.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Rows per COPY task.
    pub batch_size: usize,
    /// Connections established and ready when the pool opens.
    pub min_pool_size: u32,
    /// Upper bound on pooled connections.
    pub max_pool_size: u32,
    /// Column subset to load, in the given order. `None` loads every
    /// dataset column in its existing order.
    pub columns: Option<Vec<String>>,
    /// Drop plain secondary indexes before the load and recreate them
    /// afterwards.
    pub drop_and_create_index: bool,
    /// Recreate indexes with one worker process per statement instead of
    /// sequentially.
    pub parallel_index_creation: bool,
    /// Program spawned for index-recreation workers. Defaults to the
    /// current executable.
    pub worker_program: Option<PathBuf>,
    /// Retry policy applied to pool open/close and per-range copies.
    pub retry: RetryPolicy,
}

impl LoadOptions {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            min_pool_size: 5,
            max_pool_size: 10,
            columns: None,
            drop_and_create_index: true,
            parallel_index_creation: true,
            worker_program: None,
            retry: RetryPolicy::default(),
        }
    }

    fn validate(&self) -> Result<(), LoadError> {
        PoolManager::validate_sizing(self.min_pool_size, self.max_pool_size)?;
        if self.batch_size == 0 {
            return Err(LoadError::Config(
                "batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load one in-memory dataset into `table`, returning the rows copied.
pub async fn load_dataset(
    config: &ConnectionConfig,
    table: &str,
    dataset: Dataset,
    options: &LoadOptions,
) -> Result<u64, LoadError> {
    options.validate()?;
    let started = Instant::now();

    let maintenance = IndexMaintenance::new(config.clone(), table);
    let captured = capture_and_drop(&maintenance, options).await?;

    let result = run_single(config, table, dataset, options).await;

    let rows = conclude(
        &maintenance,
        captured,
        options.parallel_index_creation,
        options.worker_program.as_deref(),
        result,
    )
    .await?;

    log::debug!("load_dataset finished in {:?}", started.elapsed());
    Ok(rows)
}

/// Load a sequence of datasets sequentially over one shared pool.
///
/// The pool is opened once with the caller's sizing and closed after the
/// last dataset (or the first failure). An empty sequence is a
/// configuration error.
pub async fn load_datasets(
    config: &ConnectionConfig,
    table: &str,
    datasets: Vec<Dataset>,
    options: &LoadOptions,
) -> Result<u64, LoadError> {
    options.validate()?;
    if datasets.is_empty() {
        return Err(LoadError::Config("data input cannot be empty".to_string()));
    }
    let started = Instant::now();

    let maintenance = IndexMaintenance::new(config.clone(), table);
    let captured = capture_and_drop(&maintenance, options).await?;

    let result = run_sequential(config, table, datasets, options).await;

    let rows = conclude(
        &maintenance,
        captured,
        options.parallel_index_creation,
        options.worker_program.as_deref(),
        result,
    )
    .await?;

    log::debug!("load_datasets finished in {:?}", started.elapsed());
    Ok(rows)
}

/// Load a sequence of datasets with one isolated worker process per
/// dataset, each running the single-dataset pipeline with its own pool.
///
/// Index recreation in this mode is always fanned out across worker
/// processes.
pub async fn load_with_fanout(
    config: &ConnectionConfig,
    table: &str,
    datasets: Vec<Dataset>,
    options: &LoadOptions,
    fanout: &FanoutOptions,
) -> Result<(), LoadError> {
    options.validate()?;
    if datasets.is_empty() {
        return Err(LoadError::Config(
            "no datasets supplied for multi-process load".to_string(),
        ));
    }
    let coordinator = ProcessCoordinator::new(fanout)?;
    let started = Instant::now();

    let maintenance = IndexMaintenance::new(config.clone(), table);
    let captured = capture_and_drop(&maintenance, options).await?;

    let requests = datasets
        .into_iter()
        .map(|dataset| CopyWorkerRequest {
            connection: config.clone(),
            table: table.to_string(),
            batch_size: options.batch_size,
            min_pool_size: options.min_pool_size,
            max_pool_size: options.max_pool_size,
            columns: options.columns.clone(),
            dataset,
        })
        .collect();

    let result = coordinator.run(requests).await;

    let worker_program = fanout
        .worker_program
        .as_deref()
        .or(options.worker_program.as_deref());
    conclude(&maintenance, captured, true, worker_program, result).await?;

    log::debug!("load_with_fanout finished in {:?}", started.elapsed());
    Ok(())
}

/// Open a pool sized for the dataset, execute every range, close the pool.
///
/// The pool floor is tightened to `min(min_pool_size, range_count)`: there
/// is no point holding more guaranteed-ready connections than there are
/// concurrent copy tasks. An empty dataset completes immediately without
/// opening the pool.
async fn run_single(
    config: &ConnectionConfig,
    table: &str,
    dataset: Dataset,
    options: &LoadOptions,
) -> Result<u64, LoadError> {
    if dataset.is_empty() {
        log::warn!("no rows to load into {}", config.qualified_table(table));
        return Ok(0);
    }

    let range_count = dataset.len().div_ceil(options.batch_size);
    let pool_floor = (options.min_pool_size as usize).min(range_count).max(1) as u32;

    let mut manager = PoolManager::new(config.clone(), pool_floor, options.max_pool_size)?
        .with_retry_policy(options.retry);
    manager.open().await?;

    let executor = CopyExecutor::new(
        manager.pool()?.clone(),
        config.qualified_table(table),
        options.batch_size,
        pool_floor,
    )
    .with_retry_policy(options.retry);

    let result = executor
        .execute(Arc::new(dataset), options.columns.as_deref())
        .await;

    // The pool is closed whatever the load did; the load error wins.
    let close_result = manager.close().await;
    let rows = result?;
    close_result?;
    Ok(rows)
}

/// One pool, datasets executed in order, stopping at the first failure.
async fn run_sequential(
    config: &ConnectionConfig,
    table: &str,
    datasets: Vec<Dataset>,
    options: &LoadOptions,
) -> Result<u64, LoadError> {
    let mut manager = PoolManager::new(
        config.clone(),
        options.min_pool_size,
        options.max_pool_size,
    )?
    .with_retry_policy(options.retry);
    manager.open().await?;

    let executor = CopyExecutor::new(
        manager.pool()?.clone(),
        config.qualified_table(table),
        options.batch_size,
        manager.min_size(),
    )
    .with_retry_policy(options.retry);

    let mut total = 0u64;
    let mut failure: Option<LoadError> = None;
    for dataset in datasets {
        match executor
            .execute(Arc::new(dataset), options.columns.as_deref())
            .await
        {
            Ok(rows) => total += rows,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    let close_result = manager.close().await;
    if let Some(err) = failure {
        return Err(err);
    }
    close_result?;
    Ok(total)
}

async fn capture_and_drop(
    maintenance: &IndexMaintenance,
    options: &LoadOptions,
) -> Result<Option<Vec<IndexRecord>>, LoadError> {
    if !options.drop_and_create_index {
        return Ok(None);
    }

    let records = maintenance.capture().await?;
    log::info!(
        "indexes to be dropped and re-created: [{}]",
        records
            .iter()
            .map(|record| record.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    maintenance.drop(&records).await?;
    Ok(Some(records))
}

/// Finish a wrapped load: recreate captured indexes unconditionally, then
/// report the load result (which takes precedence over recreation errors).
async fn conclude<T>(
    maintenance: &IndexMaintenance,
    captured: Option<Vec<IndexRecord>>,
    parallel: bool,
    worker_program: Option<&Path>,
    result: Result<T, LoadError>,
) -> Result<T, LoadError> {
    let recreate_result = match &captured {
        Some(records) => maintenance.recreate(records, parallel, worker_program).await,
        None => Ok(()),
    };

    let value = result?;
    recreate_result?;
    Ok(value)
}

/// Entry point for a `copy-worker` process: run the single-dataset
/// pipeline described by the request, with index maintenance left to the
/// coordinating parent.
pub async fn run_copy_worker(request: CopyWorkerRequest) -> Result<u64, LoadError> {
    let options = LoadOptions {
        batch_size: request.batch_size,
        min_pool_size: request.min_pool_size,
        max_pool_size: request.max_pool_size,
        columns: request.columns.clone(),
        drop_and_create_index: false,
        parallel_index_creation: false,
        worker_program: None,
        retry: RetryPolicy::default(),
    };
    options.validate()?;
    run_single(&request.connection, &request.table, request.dataset, &options).await
}

/// Entry point for a `ddl-worker` process: execute one statement on a
/// one-off connection.
pub async fn run_ddl_worker(request: DdlWorkerRequest) -> Result<(), LoadError> {
    let mut conn = request.connection.connect().await.map_err(LoadError::Index)?;
    sqlx::query(&request.statement)
        .execute(&mut conn)
        .await
        .map_err(LoadError::Index)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SslMode;

    fn unreachable_config() -> ConnectionConfig {
        ConnectionConfig {
            host: "localhost".to_string(),
            port: 1,
            user: "nobody".to_string(),
            password: String::new(),
            database: "nowhere".to_string(),
            schema: "public".to_string(),
            ssl_mode: SslMode::Disable,
        }
    }

    #[tokio::test]
    async fn empty_dataset_sequence_is_a_configuration_error() {
        let err = load_datasets(
            &unreachable_config(),
            "events",
            Vec::new(),
            &LoadOptions::new(100),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: data input cannot be empty"
        );
    }

    #[tokio::test]
    async fn zero_batch_size_fails_before_any_io() {
        let dataset =
            Dataset::from_rows(vec!["a"], vec![vec![Some("1".to_string())]]).unwrap();
        let err = load_dataset(
            &unreachable_config(),
            "events",
            dataset,
            &LoadOptions::new(0),
        )
        .await
        .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn invalid_pool_sizing_fails_before_any_io() {
        let mut options = LoadOptions::new(100);
        options.min_pool_size = 0;
        let err = load_dataset(
            &unreachable_config(),
            "events",
            Dataset::new(vec!["a"]),
            &options,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: connection pool sizes must be at least 1"
        );
    }

    #[tokio::test]
    async fn empty_fanout_sequence_is_rejected() {
        let mut options = LoadOptions::new(100);
        options.drop_and_create_index = false;
        let err = load_with_fanout(
            &unreachable_config(),
            "events",
            Vec::new(),
            &options,
            &FanoutOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_config());
    }
}
