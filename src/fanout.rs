//! Multi-process fan-out for generator-sourced datasets.
//!
//! Each dataset in a sequence is handed to an independent OS process that
//! re-runs the single-dataset pipeline with its own connection pool; nothing
//! is shared across the process boundary. A worker receives one JSON request
//! on stdin and reports failure through its exit status and stderr.
//!
//! The same spawn machinery drives parallel index recreation, where each
//! worker executes exactly one DDL statement.

use crate::connection::ConnectionConfig;
use crate::dataset::Dataset;
use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Stdin payload for a `copy-worker` process: everything needed to run the
/// single-dataset pipeline in isolation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CopyWorkerRequest {
    pub connection: ConnectionConfig,
    pub table: String,
    pub batch_size: usize,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub columns: Option<Vec<String>>,
    pub dataset: Dataset,
}

/// Stdin payload for a `ddl-worker` process: one statement to execute.
#[derive(Debug, Serialize, Deserialize)]
pub struct DdlWorkerRequest {
    pub connection: ConnectionConfig,
    pub statement: String,
}

/// Tuning for process-level fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanoutOptions {
    /// Upper bound on concurrently running worker processes. `None` uses the
    /// platform default (one per CPU); zero is a configuration error.
    pub workers: Option<usize>,
    /// Program to spawn for workers. Defaults to the current executable,
    /// which must expose the hidden worker subcommands.
    pub worker_program: Option<PathBuf>,
}

/// Schedules one worker process per dataset, bounded by a worker count.
#[derive(Debug)]
pub struct ProcessCoordinator {
    program: PathBuf,
    workers: usize,
}

impl ProcessCoordinator {
    pub fn new(options: &FanoutOptions) -> Result<Self, LoadError> {
        let workers = match options.workers {
            Some(0) => {
                return Err(LoadError::Config(
                    "worker process count must be at least 1".to_string(),
                ));
            }
            Some(count) => count,
            None => num_cpus::get(),
        };

        let program = match &options.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        Ok(Self { program, workers })
    }

    /// Run one worker process per request. All workers are awaited even when
    /// one fails; the first failure is surfaced afterwards.
    pub async fn run(&self, requests: Vec<CopyWorkerRequest>) -> Result<(), LoadError> {
        if requests.is_empty() {
            return Err(LoadError::Config(
                "no datasets supplied for multi-process load".to_string(),
            ));
        }

        log::info!(
            "fanning out {} datasets across up to {} worker processes",
            requests.len(),
            self.workers
        );

        let limiter = Arc::new(Semaphore::new(self.workers));
        let mut children = JoinSet::new();
        for (index, request) in requests.into_iter().enumerate() {
            let program = self.program.clone();
            let limiter = Arc::clone(&limiter);
            let payload = serde_json::to_string(&request)?;

            children.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| LoadError::Worker("worker limiter closed".to_string()))?;
                log::debug!("starting copy worker {}", index);
                run_worker(&program, "copy-worker", &payload).await
            });
        }

        let mut first_error: Option<LoadError> = None;
        while let Some(joined) = children.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    log::error!("copy worker failed: {}", err);
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
}

/// Spawn `program <subcommand>`, write the JSON request to its stdin, and
/// wait for it to exit. A non-zero exit becomes a worker error carrying the
/// child's stderr.
pub(crate) async fn run_worker(
    program: &Path,
    subcommand: &str,
    request_json: &str,
) -> Result<(), LoadError> {
    let mut child = Command::new(program)
        .arg(subcommand)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| LoadError::Worker("worker stdin unavailable".to_string()))?;
    if let Err(err) = stdin.write_all(request_json.as_bytes()).await {
        // A child that dies before reading its request closes the pipe; the
        // exit status below carries the real failure.
        if err.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(err.into());
        }
    }
    drop(stdin);

    let output = child.wait_with_output().await?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LoadError::Worker(format!(
            "{} exited with {}: {}",
            subcommand,
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SslMode;

    fn request() -> CopyWorkerRequest {
        CopyWorkerRequest {
            connection: ConnectionConfig {
                host: "localhost".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: "postgres".to_string(),
                database: "postgres".to_string(),
                schema: "public".to_string(),
                ssl_mode: SslMode::Disable,
            },
            table: "events".to_string(),
            batch_size: 100,
            min_pool_size: 2,
            max_pool_size: 3,
            columns: None,
            dataset: Dataset::new(vec!["id"]),
        }
    }

    #[test]
    fn zero_workers_is_a_configuration_error() {
        let options = FanoutOptions {
            workers: Some(0),
            worker_program: None,
        };
        let err = ProcessCoordinator::new(&options).unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn empty_dataset_sequence_is_rejected_before_spawning() {
        let options = FanoutOptions {
            workers: Some(2),
            worker_program: Some(PathBuf::from("/nonexistent-worker")),
        };
        let coordinator = ProcessCoordinator::new(&options).unwrap();
        let err = coordinator.run(Vec::new()).await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn worker_consuming_stdin_and_exiting_cleanly_succeeds() {
        let options = FanoutOptions {
            workers: Some(2),
            worker_program: Some(PathBuf::from("cat")),
        };
        let coordinator = ProcessCoordinator::new(&options).unwrap();
        coordinator
            .run(vec![request(), request()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failing_worker_surfaces_after_all_workers_finish() {
        let options = FanoutOptions {
            workers: Some(2),
            worker_program: Some(PathBuf::from("false")),
        };
        let coordinator = ProcessCoordinator::new(&options).unwrap();
        let err = coordinator.run(vec![request(), request()]).await.unwrap_err();
        assert!(matches!(err, LoadError::Worker(_)));
    }

    #[test]
    fn worker_requests_round_trip_as_json() {
        let json = serde_json::to_string(&request()).unwrap();
        let back: CopyWorkerRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.table, "events");
        assert_eq!(back.batch_size, 100);
    }
}
