//! Bounded-concurrency COPY execution for one load job.
//!
//! Every row range of a partitioned dataset becomes one task that acquires a
//! pooled connection, encodes its rows as CSV, and streams them through
//! `COPY ... FROM STDIN`. Tasks are scheduled together (fan-out) and the job
//! waits for all of them (fan-in); a failing range never cancels siblings
//! already in flight, so partial application across ranges is an accepted
//! outcome of a failed load.

use crate::dataset::Dataset;
use crate::error::LoadError;
use crate::partition::split_ranges;
use crate::retry::RetryPolicy;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Executes all row ranges of one dataset against a shared pool.
pub struct CopyExecutor {
    pool: PgPool,
    qualified_table: String,
    batch_size: usize,
    min_connections: u32,
    retry: RetryPolicy,
}

impl CopyExecutor {
    pub fn new(
        pool: PgPool,
        qualified_table: String,
        batch_size: usize,
        min_connections: u32,
    ) -> Self {
        Self {
            pool,
            qualified_table,
            batch_size,
            min_connections,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Load the dataset, restricted to `columns` when given, and return the
    /// number of rows the server reported as copied.
    ///
    /// An empty dataset produces zero ranges and completes immediately
    /// without touching the pool. On failure the first unrecovered error is
    /// returned once every in-flight range has settled.
    pub async fn execute(
        &self,
        dataset: Arc<Dataset>,
        columns: Option<&[String]>,
    ) -> Result<u64, LoadError> {
        let ranges = split_ranges(dataset.len(), self.batch_size);
        log::debug!(
            "partitioned {} rows into {} ranges for {}",
            dataset.len(),
            ranges.len(),
            self.qualified_table
        );

        if ranges.is_empty() {
            log::warn!("no rows to load into {}", self.qualified_table);
            return Ok(0);
        }

        let projection = Arc::new(dataset.projection(columns)?);
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT CSV, DELIMITER ',')",
            self.qualified_table,
            dataset.column_list(&projection)
        );

        // Never schedule more concurrent copies than there are
        // guaranteed-ready pooled connections, and never more than there is
        // work. The range count is exactly ceil(rows / batch_size).
        let concurrency = usize::min(self.min_connections as usize, ranges.len()).max(1);
        let limiter = Arc::new(Semaphore::new(concurrency));
        log::debug!("scheduling {} ranges with concurrency {}", ranges.len(), concurrency);

        let mut tasks = JoinSet::new();
        for range in ranges {
            let pool = self.pool.clone();
            let dataset = Arc::clone(&dataset);
            let projection = Arc::clone(&projection);
            let statement = statement.clone();
            let limiter = Arc::clone(&limiter);
            let retry = self.retry;

            tasks.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| LoadError::Worker("concurrency limiter closed".to_string()))?;

                let payload = dataset.encode_range(range, &projection);
                let rows = retry
                    .run("copy range", || {
                        let pool = pool.clone();
                        let statement = statement.clone();
                        let payload = payload.as_bytes();
                        async move {
                            let mut conn = pool.acquire().await?;
                            let mut copy = conn.copy_in_raw(&statement).await?;
                            copy.send(payload).await?;
                            let rows = copy.finish().await?;
                            Ok::<u64, sqlx::Error>(rows)
                        }
                    })
                    .await
                    .map_err(|source| LoadError::Copy { range, source })?;

                log::trace!("copied rows [{}, {}): {} rows", range.start, range.end, rows);
                Ok::<u64, LoadError>(rows)
            });
        }

        // Fan-in: drain every task before reporting, so a failing range
        // never cancels its siblings. The first failure wins.
        let mut total = 0u64;
        let mut first_error: Option<LoadError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(rows)) => total += rows,
                Ok(Err(err)) => {
                    log::error!("range load failed: {}", err);
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(LoadError::TaskJoin(join_err));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                log::info!("loaded {} rows into {}", total, self.qualified_table);
                Ok(total)
            }
        }
    }
}
