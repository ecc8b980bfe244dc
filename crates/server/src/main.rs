// cellgraphd - spreadsheet recompute server

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use cellgraph_config::{ServerConfig, StoreBackend};
use cellgraph_server::Server;
use cellgraph_service::SpreadsheetServices;
use cellgraph_store::{CellStore, MemoryStore, SqliteStore};

#[derive(Parser)]
#[command(name = "cellgraphd")]
#[command(about = "Spreadsheet dependency-graph server speaking JSONL over TCP")]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/cellgraph/server.toml if present)
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:7878
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Persist to this SQLite database
    #[arg(long, value_name = "FILE", conflicts_with = "memory")]
    db: Option<PathBuf>,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long)]
    memory: bool,

    /// Log filter used when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Flags win over file values.
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(path) = self.db {
            config.store.backend = StoreBackend::Sqlite;
            config.store.path = path;
        }
        if self.memory {
            config.store.backend = StoreBackend::Memory;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ServerConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => cli.apply(config),
        Err(e) => {
            // Logger is not up yet; its level comes from this file
            eprintln!("cellgraphd: {}", e);
            return ExitCode::from(2);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Box<dyn CellStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory store");
            Box::new(MemoryStore::new())
        }
        StoreBackend::Sqlite => Box::new(SqliteStore::open(&config.store.path)?),
    };

    let services = Arc::new(SpreadsheetServices::new(store));
    let server = Server::start(config, services)?;
    server.wait();
    Ok(())
}
