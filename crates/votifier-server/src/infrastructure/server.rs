//! Listening socket, accept loop, and server lifecycle.
//!
//! The accept loop runs in its own task and spawns one [`ConnectionHandler`]
//! task per accepted connection.  Handlers are unbounded in number; each is
//! bounded in time by its own deadline.
//!
//! # Stopping
//!
//! `stop` signals the accept loop through a `watch` channel.  The loop drops
//! the listening socket first, so new connection attempts are refused, and
//! then waits for every in-flight handler to finish on its own.  Only after
//! that drain does `stop` publish `ServerStopped`.  The lifecycle lock is
//! held throughout, so a concurrent `start` cannot bind while the old socket
//! is still open.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use votifier_core::{
    listener_fn, ConnectionInfo, Current, ErrorKind, Event, EventBus, EventKind,
};

use crate::domain::Settings;
use crate::infrastructure::connection::{ConnectionHandler, ConnectionState};

/// Pause after a failed `accept` (e.g. out of file descriptors) before
/// trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for server lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind vote listener on {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("server is not running")]
    NotRunning,

    /// The accept loop task panicked or was cancelled.
    #[error("accept loop terminated abnormally: {0}")]
    AcceptLoop(String),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::BindFailure { .. } => ErrorKind::BindFailure,
            ServerError::AlreadyRunning(_) | ServerError::NotRunning => ErrorKind::ServerState,
            ServerError::AcceptLoop(_) => ErrorKind::IoFailure,
        }
    }
}

struct RunningServer {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// The vote receiver's listening side.
pub struct Server {
    settings: Arc<Current<Settings>>,
    bus: Arc<EventBus>,
    running: AsyncMutex<Option<RunningServer>>,
}

impl Server {
    pub fn new(settings: Arc<Current<Settings>>, bus: Arc<EventBus>) -> Self {
        Self {
            settings,
            bus,
            running: AsyncMutex::new(None),
        }
    }

    /// Binds the configured address and starts accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is `0`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::AlreadyRunning`] if the server is running and
    /// [`ServerError::BindFailure`] if the address cannot be bound.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(ServerError::AlreadyRunning(current.address));
        }

        let configured = self.settings.get().listen_addr;
        let listener = TcpListener::bind(configured)
            .await
            .map_err(|source| ServerError::BindFailure {
                addr: configured,
                source,
            })?;
        let address = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailure {
                addr: configured,
                source,
            })?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            Arc::clone(&self.settings),
            Arc::clone(&self.bus),
        ));
        *running = Some(RunningServer {
            address,
            shutdown,
            accept_task,
        });
        drop(running);

        info!("vote listener started on {address}");
        self.bus.publish(&Event::ServerStarted { address });
        Ok(address)
    }

    /// Stops accepting, drains in-flight connections, then publishes
    /// `ServerStopped`.
    ///
    /// Completes within roughly one connection timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotRunning`] if the server is not running.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        let current = running.take().ok_or(ServerError::NotRunning)?;

        debug!("stopping vote listener on {}", current.address);
        // The receiver may already be gone if the loop panicked.
        let _ = current.shutdown.send(true);
        let joined = current
            .accept_task
            .await
            .map_err(|e| ServerError::AcceptLoop(e.to_string()));
        drop(running);

        info!("vote listener on {} stopped", current.address);
        self.bus.publish(&Event::ServerStopped {
            address: current.address,
        });
        joined
    }

    /// Stops the server, installs `next` as the current settings, and starts
    /// again.
    ///
    /// The restart waits for its own `ServerStopped` before rebinding, so the
    /// old listening socket is always closed first.  A server that is not
    /// running is simply started with `next`.  If the new start fails the
    /// server stays stopped.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed `stop` or `start`.
    pub async fn restart(&self, next: Settings) -> Result<SocketAddr, ServerError> {
        let (stopped_tx, stopped_rx) = oneshot::channel();
        let stopped_tx = Mutex::new(Some(stopped_tx));
        let once = self.bus.subscribe_once(
            EventKind::ServerStopped,
            listener_fn(move |_| {
                let sender = stopped_tx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(sender) = sender {
                    let _ = sender.send(());
                }
                Ok(())
            }),
        );

        match self.stop().await {
            Ok(()) => {
                let _ = stopped_rx.await;
            }
            Err(ServerError::NotRunning) => {
                self.bus.unsubscribe(once);
            }
            Err(e) => {
                self.bus.unsubscribe(once);
                return Err(e);
            }
        }

        self.settings.replace(next);
        self.start().await
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.address)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    settings: Arc<Current<Settings>>,
    bus: Arc<EventBus>,
) {
    let mut handlers: JoinSet<ConnectionState> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn_handler(&mut handlers, stream, peer, &settings, &bus);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }

        while let Some(finished) = handlers.try_join_next() {
            log_handler_result(finished);
        }
    }

    drop(listener);
    if !handlers.is_empty() {
        info!("waiting for {} in-flight connection(s)", handlers.len());
    }
    while let Some(finished) = handlers.join_next().await {
        log_handler_result(finished);
    }
}

fn spawn_handler(
    handlers: &mut JoinSet<ConnectionState>,
    stream: TcpStream,
    peer: SocketAddr,
    settings: &Current<Settings>,
    bus: &Arc<EventBus>,
) {
    let snapshot = settings.get();
    let local = stream.local_addr().unwrap_or(snapshot.listen_addr);
    let connection = ConnectionInfo::new(peer, local);
    debug!("accepted connection {connection}");

    let handler = ConnectionHandler::new(stream, connection, snapshot, Arc::clone(bus));
    handlers.spawn(handler.run());
}

fn log_handler_result(result: Result<ConnectionState, tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("connection task failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
