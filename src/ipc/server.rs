//! IPC Server - Unix socket server for client communication
//!
//! Each connection is an open client of the worker: it is registered on
//! connect (and claimed by activations) and released on disconnect. Control
//! messages go through the control channel; fetches go to the active generation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::ipc::protocol::{
    parse_message, serialize_reply, FetchedReply, Message, Reply, StatusReply, StoreInfo, PROTOCOL_VERSION,
};
use crate::net::Request;
use crate::worker::{ControlChannel, ControlMessage, FetchOutcome, Registration};

/// IPC Server that listens for client messages
pub struct IpcServer {
    registration: Arc<Registration>,
    control: ControlChannel,
    socket_path: PathBuf,
    /// Socket listener
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(registration: Arc<Registration>, control: ControlChannel, socket_path: &Path) -> Self {
        Self {
            registration,
            control,
            socket_path: socket_path.to_path_buf(),
            listener: None,
        }
    }

    /// Start the IPC server
    pub async fn start(&mut self) -> Result<()> {
        // Clean up any existing socket file
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path).context("Failed to bind Unix socket")?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Run the server loop, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let registration = Arc::clone(&self.registration);
                    let control = self.control.clone();

                    // Spawn a new task to handle this connection
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, registration, control).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Stop the IPC server and clean up
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    registration: Arc<Registration>,
    control: ControlChannel,
) -> Result<()> {
    let controller = registration.current_version().await;
    let client_id = registration.clients().register(controller.as_deref());

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    // Read messages line by line (newline-delimited JSON)
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client = client_id, "Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(client = client_id, message = %trimmed, "Received message");

                let reply = match parse_message(trimmed.as_bytes()) {
                    Ok(message) => process_message(message, &registration, &control).await,
                    Err(e) => {
                        error!(error = %e, message = %trimmed, "Failed to parse message");
                        Reply::error(format!("Invalid message: {}", e))
                    }
                };

                match serialize_reply(&reply) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write reply");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize reply");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    registration.clients().release(client_id);
    Ok(())
}

/// Process a message and return a reply
async fn process_message(message: Message, registration: &Registration, control: &ControlChannel) -> Reply {
    match message {
        Message::Fetch { url, method } => {
            let request = match Request::parse(&method, &url) {
                Ok(request) => request,
                Err(e) => return Reply::error(e),
            };
            match registration.handle_fetch(request).await {
                FetchOutcome::Respond(response) => Reply::Fetched(FetchedReply::from(&response)),
                FetchOutcome::PassThrough => Reply::PassThrough { pass_through: true },
            }
        }

        Message::GetVersion => {
            let (reply, rx) = oneshot::channel();
            if let Err(e) = control.send(ControlMessage::GetVersion { reply }).await {
                return Reply::error(e);
            }
            match rx.await {
                Ok(version) => Reply::Version(version),
                Err(e) => Reply::error(e),
            }
        }

        Message::GetStatus => status_reply(registration).await,

        Message::SkipWaiting => acknowledge(control, ControlMessage::SkipWaiting).await,
        Message::CacheUrls { urls } => acknowledge(control, ControlMessage::CacheUrls { urls }).await,
        Message::ClearCache => acknowledge(control, ControlMessage::ClearCache).await,
        Message::Sync { tag } => acknowledge(control, ControlMessage::Sync { tag }).await,
        Message::Push { payload } => acknowledge(control, ControlMessage::Push { payload }).await,
    }
}

async fn acknowledge(control: &ControlChannel, message: ControlMessage) -> Reply {
    match control.request(message).await {
        Ok(summary) => Reply::ack(summary),
        Err(e) => Reply::error(e),
    }
}

async fn status_reply(registration: &Registration) -> Reply {
    let status = registration.status().await;
    let storage = registration.storage();
    let (hits, misses, _) = storage.stats();
    let stores = storage
        .summary()
        .await
        .into_iter()
        .map(|(name, entries)| StoreInfo { name, entries })
        .collect();
    let (network, recent_errors) = match registration.active().await {
        Some(worker) => (
            worker.fetcher().health_status().to_string(),
            worker.fetcher().recent_errors(),
        ),
        None => ("unknown".to_string(), Vec::new()),
    };

    let (generation, state) = match status.active {
        Some((generation, state)) => (Some(generation), Some(state)),
        None => (None, None),
    };

    Reply::Status(StatusReply {
        protocol: PROTOCOL_VERSION,
        generation,
        state,
        waiting: status.waiting,
        clients: status.clients,
        stores,
        hits,
        misses,
        network,
        recent_errors,
    })
}
