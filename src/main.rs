use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncReadExt;

use pgbulk::connection::{ConnectionConfig, SslMode};
use pgbulk::dataset::Dataset;
use pgbulk::fanout::{CopyWorkerRequest, DdlWorkerRequest};
use pgbulk::load::{self, LoadOptions};

#[derive(Parser, Debug)]
#[command(name = "pgbulk", about = "Bulk-load tabular data into PostgreSQL over COPY")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a serialized dataset file into a table.
    Load(LoadArgs),
    /// Internal: run the single-dataset pipeline for a request on stdin.
    #[command(hide = true, name = "copy-worker")]
    CopyWorker,
    /// Internal: execute one DDL statement for a request on stdin.
    #[command(hide = true, name = "ddl-worker")]
    DdlWorker,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// JSON dataset file: {"columns": [...], "rows": [[...], ...]}.
    #[arg(long)]
    input: PathBuf,

    /// Target table name (unqualified; see --schema).
    #[arg(long)]
    table: String,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 5432)]
    port: u16,

    #[arg(long)]
    user: String,

    #[arg(long, default_value = "postgres")]
    database: String,

    #[arg(long, default_value = "public")]
    schema: String,

    /// Transport security: disable, prefer, or require.
    #[arg(long, default_value = "prefer")]
    ssl_mode: String,

    /// Rows per COPY batch.
    #[arg(long, default_value_t = 10_000)]
    batch_size: usize,

    #[arg(long, default_value_t = 5)]
    min_pool_size: u32,

    #[arg(long, default_value_t = 10)]
    max_pool_size: u32,

    /// Comma-separated column subset to load.
    #[arg(long)]
    columns: Option<String>,

    /// Leave secondary indexes in place during the load.
    #[arg(long)]
    keep_indexes: bool,

    /// Recreate indexes sequentially instead of in worker processes.
    #[arg(long)]
    serial_index_rebuild: bool,
}

#[tokio::main]
async fn main() {
    pgbulk::init_logger();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Load(args) => run_load(args).await,
        Command::CopyWorker => run_copy_worker().await,
        Command::DdlWorker => run_ddl_worker().await,
    };

    if let Err(err) = result {
        let _ = writeln!(io::stderr(), "error: {err}");
        std::process::exit(1);
    }
}

async fn run_load(args: LoadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let ssl_mode = match args.ssl_mode.as_str() {
        "disable" => SslMode::Disable,
        "prefer" => SslMode::Prefer,
        "require" => SslMode::Require,
        other => return Err(format!("unsupported ssl mode '{other}'").into()),
    };

    // Passwords never travel on argv.
    let password = std::env::var("PGPASSWORD").unwrap_or_default();

    let config = ConnectionConfig {
        host: args.host,
        port: args.port,
        user: args.user,
        password,
        database: args.database,
        schema: args.schema,
        ssl_mode,
    };

    let dataset: Dataset = serde_json::from_slice(&std::fs::read(&args.input)?)?;
    log::info!(
        "loading {} rows from {} into {}",
        dataset.len(),
        args.input.display(),
        args.table
    );

    let mut options = LoadOptions::new(args.batch_size);
    options.min_pool_size = args.min_pool_size;
    options.max_pool_size = args.max_pool_size;
    options.columns = args
        .columns
        .map(|list| list.split(',').map(|name| name.trim().to_string()).collect());
    options.drop_and_create_index = !args.keep_indexes;
    options.parallel_index_creation = !args.serial_index_rebuild;

    let rows = pgbulk::load_dataset(&config, &args.table, dataset, &options).await?;
    log::info!("done: {rows} rows loaded");
    Ok(())
}

async fn read_stdin_request<T: serde::de::DeserializeOwned>() -> Result<T, Box<dyn std::error::Error>>
{
    let mut buffer = String::new();
    tokio::io::stdin().read_to_string(&mut buffer).await?;
    Ok(serde_json::from_str(&buffer)?)
}

async fn run_copy_worker() -> Result<(), Box<dyn std::error::Error>> {
    let request: CopyWorkerRequest = read_stdin_request().await?;
    let rows = load::run_copy_worker(request).await?;
    log::debug!("copy worker done: {rows} rows");
    Ok(())
}

async fn run_ddl_worker() -> Result<(), Box<dyn std::error::Error>> {
    let request: DdlWorkerRequest = read_stdin_request().await?;
    load::run_ddl_worker(request).await?;
    Ok(())
}
