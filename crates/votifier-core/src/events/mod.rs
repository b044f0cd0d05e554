//! Events published by the receiver and the bus that delivers them.
//!
//! Every protocol outcome, success or failure, becomes exactly one [`Event`].
//! Consumers (logging, downstream reward hooks, tests) register a
//! [`Listener`] on the [`EventBus`] and filter on [`Event::kind`].
//!
//! Failure variants carry the [`ProtocolError`] that caused them but never
//! the undecryptable bytes, unless the server was configured to expose raw
//! input, in which case `raw_input` is `Some`.

pub mod bus;

pub use bus::{listener_fn, EventBus, Listener, ListenerError, ListenerId};

use std::fmt;
use std::net::SocketAddr;

use uuid::Uuid;

use crate::protocol::ProtocolError;
use crate::vote::Vote;

/// Identity of the TCP connection an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Unique per accepted connection, for correlating log lines.
    pub id: Uuid,
    /// Remote address of the sender.
    pub peer: SocketAddr,
    /// Local address the connection was accepted on.
    pub local: SocketAddr,
}

impl ConnectionInfo {
    pub fn new(peer: SocketAddr, local: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            local,
        }
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.peer, self.id)
    }
}

/// Discriminant of [`Event`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerStarted,
    ServerStopped,
    VoteReceived,
    DecryptInputException,
    MalformedInputException,
    TimeoutException,
    ConnectionException,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ServerStarted => "server_started",
            EventKind::ServerStopped => "server_stopped",
            EventKind::VoteReceived => "vote_received",
            EventKind::DecryptInputException => "decrypt_input_exception",
            EventKind::MalformedInputException => "malformed_input_exception",
            EventKind::TimeoutException => "timeout_exception",
            EventKind::ConnectionException => "connection_exception",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the receiver reports.
#[derive(Debug, Clone)]
pub enum Event {
    /// The listening socket is bound and the accept loop is running.
    ServerStarted { address: SocketAddr },

    /// The listening socket is closed and every in-flight connection has
    /// finished.
    ServerStopped { address: SocketAddr },

    /// A vote was decrypted and parsed.
    VoteReceived {
        vote: Vote,
        connection: ConnectionInfo,
    },

    /// The ciphertext had the wrong length or failed padding validation.
    DecryptInputException {
        connection: ConnectionInfo,
        cause: ProtocolError,
        raw_input: Option<Vec<u8>>,
    },

    /// The plaintext decrypted but is not a vote record.
    MalformedInputException {
        connection: ConnectionInfo,
        cause: ProtocolError,
        raw_input: Option<Vec<u8>>,
    },

    /// The connection deadline expired, or the peer closed before sending a
    /// full block.
    TimeoutException { connection: ConnectionInfo },

    /// Any other socket failure while serving the connection.
    ConnectionException {
        connection: ConnectionInfo,
        cause: String,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ServerStarted { .. } => EventKind::ServerStarted,
            Event::ServerStopped { .. } => EventKind::ServerStopped,
            Event::VoteReceived { .. } => EventKind::VoteReceived,
            Event::DecryptInputException { .. } => EventKind::DecryptInputException,
            Event::MalformedInputException { .. } => EventKind::MalformedInputException,
            Event::TimeoutException { .. } => EventKind::TimeoutException,
            Event::ConnectionException { .. } => EventKind::ConnectionException,
        }
    }

    /// The originating connection, for every variant that has one.
    pub fn connection(&self) -> Option<&ConnectionInfo> {
        match self {
            Event::ServerStarted { .. } | Event::ServerStopped { .. } => None,
            Event::VoteReceived { connection, .. }
            | Event::DecryptInputException { connection, .. }
            | Event::MalformedInputException { connection, .. }
            | Event::TimeoutException { connection }
            | Event::ConnectionException { connection, .. } => Some(connection),
        }
    }

    /// True for the variants that report a failed connection.
    pub fn is_exception(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::DecryptInputException
                | EventKind::MalformedInputException
                | EventKind::TimeoutException
                | EventKind::ConnectionException
        )
    }
}
