//! swcache - offline-first request cache worker
//!
//! Runs a versioned caching worker behind a Unix socket: clients submit
//! requests to intercept and control messages, the worker answers from its
//! stores, the network, or the offline page.

mod cache;
mod config;
mod ipc;
mod net;
mod strategy;
#[cfg(test)]
mod test_support;
mod worker;

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cache::{CacheStorage, DiskStore};
use config::{Settings, WorkerConfig};
use ipc::{IpcServer, Message, Reply};
use net::HttpFetcher;
use worker::{Clients, ControlChannel, LoggingHooks, Registration, Worker};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Run the worker daemon (default)
    Serve { config: Option<PathBuf> },
    /// Ask a running daemon to intercept a request
    Fetch { url: String, config: Option<PathBuf> },
    /// Ask a running daemon for its generation tag
    Version { config: Option<PathBuf> },
    /// Ask a running daemon to delete every store
    Clear { config: Option<PathBuf> },
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"swcache - offline-first request cache worker

USAGE:
    swcache [serve] [--config <path>]     # Run the worker daemon (default)
    swcache fetch <url> [--config <path>]
    swcache version [--config <path>]
    swcache clear [--config <path>]
    swcache help

COMMANDS:
    serve    Install and activate the configured generation, then serve the socket
    fetch    Intercept a GET request through a running daemon and print the result
    version  Print the running daemon's generation tag
    clear    Delete every cache store of a running daemon
    help     Show this help message

ENVIRONMENT:
    SWCACHE_ORIGIN   Origin the worker is scoped to
    SWCACHE_VERSION  Generation tag (core store becomes <prefix><tag>)
    SWCACHE_SOCKET   Control socket path
    RUST_LOG         Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<Command> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config = None;
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        if pos + 1 >= args.len() {
            return Err(anyhow!("--config requires a path"));
        }
        config = Some(PathBuf::from(args.remove(pos + 1)));
        args.remove(pos);
    }

    match args.first().map(String::as_str) {
        None | Some("serve") => Ok(Command::Serve { config }),
        Some("fetch") => {
            let url = args
                .get(1)
                .cloned()
                .ok_or_else(|| anyhow!("Usage: swcache fetch <url>"))?;
            Ok(Command::Fetch { url, config })
        }
        Some("version") => Ok(Command::Version { config }),
        Some("clear") => Ok(Command::Clear { config }),
        Some("help" | "--help" | "-h") => Ok(Command::Help),
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            Ok(Command::Help)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    let settings = Settings::load(path)?;
    WorkerConfig::from_settings(settings)
}

async fn serve(config: WorkerConfig) -> Result<()> {
    let config = Arc::new(config);
    info!(
        origin = %config.origin,
        generation = %config.generation_tag,
        store = %config.core_cache_name(),
        "Starting swcache worker"
    );

    let storage = if config.persist {
        let disk = match &config.cache_dir {
            Some(dir) => DiskStore::with_root(dir.clone()),
            None => DiskStore::new(),
        }
        .context("Failed to open disk store")?;
        CacheStorage::load(disk).await.context("Failed to load cache stores")?
    } else {
        CacheStorage::in_memory()
    };
    let storage = Arc::new(storage);

    let fetcher = Arc::new(HttpFetcher::new(config.request_timeout)?);
    let clients = Arc::new(Clients::new());
    let registration = Arc::new(Registration::new(
        Arc::clone(&storage),
        Arc::clone(&clients),
        Arc::new(LoggingHooks),
    ));

    let worker = Arc::new(Worker::new(Arc::clone(&config), storage, fetcher, clients));
    let report = registration.install(worker).await;
    if !report.failed.is_empty() {
        warn!(failed = ?report.failed, "Some manifest entries could not be pre-cached");
    }

    let (control, _control_handle) = ControlChannel::spawn(Arc::clone(&registration));

    let mut ipc_server = IpcServer::new(Arc::clone(&registration), control, &config.socket_path);
    if let Err(e) = ipc_server.start().await {
        error!(error = %e, "Failed to start IPC server");
        return Err(e);
    }
    let ipc_server = Arc::new(ipc_server);

    info!("Worker ready. Waiting for clients...");

    // Run IPC server in a separate task
    let server = Arc::clone(&ipc_server);
    let _ipc_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "IPC server error");
        }
    });

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;

    info!("Received shutdown signal, settling background work...");
    registration.shutdown().await;
    ipc_server.stop()?;

    info!("Shutdown complete.");
    Ok(())
}

/// Send one message to a running daemon and return its reply
async fn send_to_daemon(socket_path: &Path, message: &Message) -> Result<Reply> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Failed to connect to daemon at {:?}", socket_path))?;
    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(&ipc::serialize_message(message)?)
        .await
        .context("Failed to send message")?;

    let mut line = String::new();
    BufReader::new(reader)
        .read_line(&mut line)
        .await
        .context("Failed to read reply")?;

    ipc::parse_reply(line.trim().as_bytes()).context("Failed to parse reply")
}

fn print_reply(reply: Reply) -> Result<()> {
    match reply {
        Reply::Fetched(fetched) => {
            println!("{} ({:?})", fetched.status, fetched.source);
            for (name, value) in &fetched.headers {
                println!("{}: {}", name, value);
            }
            println!();
            let body = fetched.decode_body().context("Daemon sent an undecodable body")?;
            println!("{}", String::from_utf8_lossy(&body));
        }
        Reply::Version(version) => println!("{}", version.version),
        Reply::PassThrough { .. } => println!("Not intercepted (pass-through)"),
        Reply::Ack { message, .. } => println!("{}", message.unwrap_or_else(|| "ok".to_string())),
        Reply::Status(status) => println!("{}", serde_json::to_string_pretty(&status)?),
        Reply::Error { error } => return Err(anyhow!(error)),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Serve { config } => {
            let config = load_config(config.as_deref())?;
            serve(config).await?;
        }
        Command::Fetch { url, config } => {
            let config = load_config(config.as_deref())?;
            let message = Message::Fetch {
                url,
                method: "GET".to_string(),
            };
            print_reply(send_to_daemon(&config.socket_path, &message).await?)?;
        }
        Command::Version { config } => {
            let config = load_config(config.as_deref())?;
            print_reply(send_to_daemon(&config.socket_path, &Message::GetVersion).await?)?;
        }
        Command::Clear { config } => {
            let config = load_config(config.as_deref())?;
            print_reply(send_to_daemon(&config.socket_path, &Message::ClearCache).await?)?;
        }
        Command::Help => {
            print_help();
        }
    }

    Ok(())
}
