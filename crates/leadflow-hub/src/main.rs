use anyhow::Context;
use clap::Parser;
use leadflow_engine::{EngineConfig, LeadEngine};
use leadflow_hub::{build_router, HubState};
use leadflow_storage::SqliteStore;
use std::{fs::OpenOptions, io, net::SocketAddr, path::Path, sync::Arc};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

const IN_MEMORY_DB: &str = ":memory:";
const LOG_FILE_NAME: &str = "leadflow-hub.log";

/// Every flag falls back to its `LEADFLOW_*` environment variable.
#[derive(Parser, Debug)]
#[command(name = "leadflow-hub")]
struct Args {
    #[arg(long, env = "LEADFLOW_ADDR", default_value = "127.0.0.1:5000")]
    addr: String,
    /// SQLite file, or `:memory:` for a throwaway store.
    #[arg(long, env = "LEADFLOW_DB", default_value = "leadflow.db")]
    db: String,
    /// Shorthand for `--log-level debug`.
    #[arg(long, env = "LEADFLOW_DEBUG")]
    debug: bool,
    #[arg(long, env = "LEADFLOW_LOG_LEVEL", default_value = "info")]
    log_level: String,
    /// Empty to log to stdout only.
    #[arg(long, env = "LEADFLOW_LOG_DIR", default_value = ".leadflow/logs")]
    log_dir: String,
    #[arg(long, env = "LEADFLOW_MAX_UPLOAD_MB", default_value_t = 16)]
    max_upload_mb: usize,
}

impl Args {
    fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.max(1) * 1024 * 1024
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let addr: SocketAddr = args.addr.parse().map_err(|err| {
        error!(event = "invalid_addr", error = %err, addr = %args.addr);
        anyhow::anyhow!("invalid listen address {}", args.addr)
    })?;

    let store = open_store(&args.db)
        .with_context(|| format!("failed to open lead store at {}", args.db))?;
    let engine = LeadEngine::new(store, EngineConfig::default());
    let max_upload_bytes = args.max_upload_bytes();
    let app = build_router(HubState::new(engine, max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(event = "hub_start", %addr, db = %args.db, max_upload_bytes);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| {
            error!(event = "hub_error", error = %err);
            err
        })?;
    Ok(())
}

fn open_store(db_path: &str) -> Result<SqliteStore, leadflow_storage::StorageError> {
    if db_path == IN_MEMORY_DB {
        SqliteStore::open_in_memory()
    } else {
        SqliteStore::open(db_path)
    }
}

/// `RUST_LOG` wins over `--debug`, which wins over `--log-level`.
fn init_logging(args: &Args) {
    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_file = if args.log_dir.trim().is_empty() {
        Ok(None)
    } else {
        open_log_file(Path::new(&args.log_dir)).map(Some)
    };
    let writer = match &log_file {
        Ok(Some(file)) => BoxMakeWriter::new(io::stdout.and(Arc::clone(file))),
        _ => BoxMakeWriter::new(io::stdout),
    };

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .try_init()
        .is_ok();
    if let (true, Err(err)) = (installed, log_file) {
        warn!(event = "log_file_unavailable", dir = %args.log_dir, error = %err);
    }
}

fn open_log_file(dir: &Path) -> io::Result<Arc<std::fs::File>> {
    std::fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(Arc::new(file))
}
