//! Diagnostic client that speaks the sender side of the protocol.
//!
//! Used by the `testvote` and `testquery` operator commands to check that the
//! configured key pair and address produce a connection the server accepts.
//! Every step runs under one deadline equal to the configured connection
//! timeout.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;
use votifier_core::protocol::MAX_GREETING_LEN;
use votifier_core::{encode_query, encode_vote, encrypt, Current, ErrorKind, ProtocolError, Vote};

use crate::domain::Settings;

/// Error type for the diagnostic client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("timed out talking to {addr}")]
    Timeout { addr: SocketAddr },

    /// The server closed, or sent too much, before a greeting newline.
    #[error("no protocol greeting from {addr}")]
    Greeting { addr: SocketAddr },

    #[error("could not encrypt message: {0}")]
    Encryption(#[from] ProtocolError),

    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Timeout { .. } => ErrorKind::TimeoutFailure,
            ClientError::Encryption(e) => e.kind(),
            ClientError::Connect { .. } | ClientError::Greeting { .. } | ClientError::Io { .. } => {
                ErrorKind::IoFailure
            }
        }
    }
}

/// Sends encrypted test messages to a vote listener.
pub struct ProtocolClient {
    settings: Arc<Current<Settings>>,
    target: Option<SocketAddr>,
}

impl ProtocolClient {
    /// A client that dials the configured listen address.
    pub fn new(settings: Arc<Current<Settings>>) -> Self {
        Self {
            settings,
            target: None,
        }
    }

    /// Dials `target` instead of the configured address, e.g. the actual
    /// address of a server bound to port `0`.
    pub fn targeting(mut self, target: SocketAddr) -> Self {
        self.target = Some(target);
        self
    }

    /// Encodes, encrypts, and sends `vote`.
    pub async fn test_vote(&self, vote: &Vote) -> Result<(), ClientError> {
        self.send(&encode_vote(vote)).await
    }

    /// Encrypts and sends `message` verbatim, without the vote layout.
    pub async fn test_query(&self, message: &str) -> Result<(), ClientError> {
        self.send(&encode_query(message)).await
    }

    async fn send(&self, plaintext: &[u8]) -> Result<(), ClientError> {
        // One snapshot: a concurrent restart cannot pair the old address
        // with the new key.
        let settings = self.settings.get();
        let addr = self.target.unwrap_or_else(|| settings.client_target());
        let ciphertext = encrypt(plaintext, &settings.key_pair.public)?;
        let deadline = Instant::now() + settings.timeout;

        let stream = timeout_at(deadline, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout { addr })?
            .map_err(|source| ClientError::Connect { addr, source })?;

        let mut reader = BufReader::new(stream);
        let mut greeting = Vec::new();
        timeout_at(
            deadline,
            (&mut reader)
                .take(MAX_GREETING_LEN as u64)
                .read_until(b'\n', &mut greeting),
        )
        .await
        .map_err(|_| ClientError::Timeout { addr })?
        .map_err(|source| ClientError::Io { addr, source })?;
        if greeting.last() != Some(&b'\n') {
            return Err(ClientError::Greeting { addr });
        }
        debug!(
            "greeting from {addr}: {}",
            String::from_utf8_lossy(&greeting).trim_end()
        );

        let mut stream = reader.into_inner();
        timeout_at(deadline, async {
            stream.write_all(&ciphertext).await?;
            stream.shutdown().await
        })
        .await
        .map_err(|_| ClientError::Timeout { addr })?
        .map_err(|source| ClientError::Io { addr, source })?;

        debug!("sent {}-byte block to {addr}", ciphertext.len());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
