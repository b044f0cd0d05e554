//! Event listener that writes every event to the log.

use tracing::{debug, info, warn};
use votifier_core::{Event, Listener, ListenerError};

/// Logs each event at a level matching its severity.
///
/// Raw input, when the server is configured to expose it, is only logged at
/// `debug` so it stays out of default output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl Listener for LoggingListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        match event {
            Event::ServerStarted { address } => info!("votifier listening on {address}"),
            Event::ServerStopped { address } => info!("votifier on {address} stopped"),
            Event::VoteReceived { vote, connection } => {
                info!("received {vote} via {connection}");
            }
            Event::DecryptInputException {
                connection,
                cause,
                raw_input,
            } => {
                warn!("could not decrypt input from {connection}: {cause}");
                log_raw_input(connection, raw_input.as_deref());
            }
            Event::MalformedInputException {
                connection,
                cause,
                raw_input,
            } => {
                warn!("malformed vote from {connection}: {cause}");
                log_raw_input(connection, raw_input.as_deref());
            }
            Event::TimeoutException { connection } => {
                warn!("connection {connection} timed out");
            }
            Event::ConnectionException { connection, cause } => {
                warn!("connection {connection} failed: {cause}");
            }
        }
        Ok(())
    }
}

fn log_raw_input(connection: &votifier_core::ConnectionInfo, raw: Option<&[u8]>) {
    if let Some(raw) = raw {
        debug!(
            "raw input from {connection} ({} bytes): {:?}",
            raw.len(),
            String::from_utf8_lossy(raw)
        );
    }
}
