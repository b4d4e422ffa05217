//! Binary entrypoint for the x6100-webserver CLI.
//!
//! Commands:
//! - `start [--db <path>] [--host <addr>] [--port <n>]` - run the web service and sync timer
//! - `init` - write a starter `config.toml`
//! - `status` - print the persisted sync settings and progress as JSON
//! - `sync-now` - upload once using the stored settings, bypassing dedup
//!
//! See the library crate docs for module-level details: `x6100_webserver::`.
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use x6100_webserver::config::Config;
use x6100_webserver::store::SqliteParamStore;
use x6100_webserver::sync::{SyncClient, SyncOverride, SyncService, SyncTrigger};
use x6100_webserver::web::{self, AppState};

#[derive(Parser)]
#[command(name = "x6100-webserver")]
#[command(about = "Local web service and Wavelog sync for the Xiegu X6100")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Path to the SQLite parameter database (overrides server.db_path)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web service and the sync timer
    Start {
        /// Address to listen on
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a default configuration file
    Init,
    /// Show persisted sync settings and progress
    Status,
    /// Run one sync immediately (no dedup, timer untouched)
    SyncNow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    // Only a missing file falls back to defaults.
    let mut config = match Config::load(&cli.config).await {
        Ok(cfg) => {
            init_logging(&Some(cfg.clone()), cli.verbose);
            cfg
        }
        Err(e) if Config::is_missing_file(&e) => {
            init_logging(&None, cli.verbose);
            warn!("{:#} (using defaults)", e);
            Config::default()
        }
        Err(e) => {
            init_logging(&None, cli.verbose);
            error!("{:#}", e);
            return Err(e);
        }
    };
    if let Some(db) = cli.db {
        config.server.db_path = db;
    }

    match cli.command {
        Commands::Start { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting x6100-webserver v{}", env!("CARGO_PKG_VERSION"));
            let service = open_service(&config)?;

            // Kick off the first cycle; it arms the timer when a delay is configured.
            let first = Arc::clone(&service);
            tokio::spawn(async move {
                let _ = first.run(SyncTrigger::Auto).await;
            });

            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;
            info!("Listening on http://{}", addr);
            web::serve(listener, AppState { sync: service }).await?;
        }
        Commands::Status => {
            let service = open_service(&config)?;
            let status = service.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::SyncNow => {
            let service = open_service(&config)?;
            let overrides = SyncOverride {
                nodelay: true,
                ..Default::default()
            };
            match service.run(SyncTrigger::Manual(overrides)).await {
                Ok(report) => println!("synced {}: {}", report.summary, report.response),
                Err(e) if e.is_skip() => println!("skipped: {e}"),
                Err(e) => {
                    error!("sync failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Init => unreachable!("handled above"),
    }

    Ok(())
}

fn open_service(config: &Config) -> Result<Arc<SyncService>> {
    config.validate()?;
    let store = SqliteParamStore::open(&config.server.db_path)
        .map_err(|e| anyhow!("Failed to open database {}: {}", config.server.db_path, e))?;
    let source = config.sync.build_source()?;
    let client = SyncClient::new(config.sync.timeout_seconds);
    Ok(SyncService::start(Arc::new(store), source, client))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let file = std::sync::Mutex::new(f);
        // Running under a service manager: the file is enough, skip the console.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let line = format!(
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            );
            if let Ok(mut guard) = file.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
