//! Per-connection protocol state machine.
//!
//! ```text
//! Accepted ─► GreetingSent ─► CiphertextRead ─► Decrypted ─► Parsed ─► Dispatched ─► Closed
//!    │              │               │               │           │
//!    └──────────────┴───────────────┴───────────────┴───────────┴──► Failed
//! ```
//!
//! One deadline, armed when the handler starts, bounds every socket step of
//! the connection.  Each path out of the machine publishes exactly one event:
//! `VoteReceived` on success, or the exception event naming the step that
//! failed.  The socket is shut down on every path.
//!
//! The handler is generic over the stream so it can be driven by
//! `tokio_test::io::Mock` in unit tests and by `TcpStream` in production.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};
use votifier_core::protocol::greeting;
use votifier_core::{decrypt, parse_vote, ConnectionInfo, Event, EventBus, ProtocolError, Vote};

use crate::domain::Settings;

/// Upper bound on the final socket shutdown, which runs after the deadline
/// may already have passed.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    GreetingSent,
    CiphertextRead,
    Decrypted,
    Parsed,
    Dispatched,
    Closed,
    Failed,
}

/// Drives one accepted connection from greeting to close.
pub struct ConnectionHandler<S> {
    stream: S,
    connection: ConnectionInfo,
    settings: Arc<Settings>,
    bus: Arc<EventBus>,
    state: ConnectionState,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// `settings` is the snapshot this connection uses from start to finish,
    /// even if the server's settings are replaced meanwhile.
    pub fn new(
        stream: S,
        connection: ConnectionInfo,
        settings: Arc<Settings>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            stream,
            connection,
            settings,
            bus,
            state: ConnectionState::Accepted,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the connection to completion and returns its terminal state,
    /// [`ConnectionState::Closed`] or [`ConnectionState::Failed`].
    ///
    /// Never returns an error: every failure is published as an event.
    pub async fn run(mut self) -> ConnectionState {
        let deadline = Instant::now() + self.settings.timeout;

        match self.serve(deadline).await {
            Ok(vote) => {
                debug!("connection {}: {vote}", self.connection);
                self.bus.publish(&Event::VoteReceived {
                    vote,
                    connection: self.connection,
                });
                self.transition(ConnectionState::Dispatched);
            }
            Err(event) => {
                debug!("connection {}: failed with {}", self.connection, event.kind());
                self.bus.publish(&event);
                self.transition(ConnectionState::Failed);
            }
        }

        self.close().await;
        self.state
    }

    /// Runs the socket and codec steps; the `Err` is the event to publish.
    async fn serve(&mut self, deadline: Instant) -> Result<Vote, Event> {
        let line = greeting();
        match timeout_at(deadline, write_line(&mut self.stream, line.as_bytes())).await {
            Err(_) => return Err(self.timeout_event()),
            Ok(Err(e)) => return Err(self.io_event(&e)),
            Ok(Ok(())) => {}
        }
        self.transition(ConnectionState::GreetingSent);

        let mut ciphertext = vec![0u8; self.settings.block_size()];
        match timeout_at(deadline, self.stream.read_exact(&mut ciphertext)).await {
            Err(_) => return Err(self.timeout_event()),
            // The peer closed before a full block arrived.
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(self.timeout_event())
            }
            Ok(Err(e)) => return Err(self.io_event(&e)),
            Ok(Ok(_)) => {}
        }
        self.transition(ConnectionState::CiphertextRead);

        let expose = self.settings.expose_raw_input;
        let raw_ciphertext = expose.then(|| ciphertext.clone());
        let pair = Arc::clone(&self.settings.key_pair);
        let decrypted = tokio::task::spawn_blocking(move || decrypt(&ciphertext, &pair.private))
            .await
            .unwrap_or_else(|e| Err(ProtocolError::Decryption(format!("decrypt task failed: {e}"))));
        let connection = self.connection;
        let plaintext = decrypted.map_err(|cause| Event::DecryptInputException {
            connection,
            cause,
            raw_input: raw_ciphertext,
        })?;
        self.transition(ConnectionState::Decrypted);

        let vote = parse_vote(&plaintext).map_err(|cause| Event::MalformedInputException {
            connection,
            cause,
            raw_input: expose.then(|| plaintext.clone()),
        })?;
        self.transition(ConnectionState::Parsed);

        Ok(vote)
    }

    async fn close(&mut self) {
        // The peer may already be gone; the stream is dropped either way.
        if let Ok(Err(e)) = timeout(SHUTDOWN_GRACE, self.stream.shutdown()).await {
            trace!("connection {}: shutdown error ignored: {e}", self.connection);
        }
        if self.state == ConnectionState::Dispatched {
            self.transition(ConnectionState::Closed);
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        trace!("connection {}: {:?} -> {next:?}", self.connection, self.state);
        self.state = next;
    }

    fn timeout_event(&self) -> Event {
        Event::TimeoutException {
            connection: self.connection,
        }
    }

    fn io_event(&self, error: &io::Error) -> Event {
        Event::ConnectionException {
            connection: self.connection,
            cause: error.to_string(),
        }
    }
}

async fn write_line<S>(stream: &mut S, line: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line).await?;
    stream.flush().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio_test::io::Builder;
    use votifier_core::{encode_query, encode_vote, encrypt, listener_fn, EventKind};

    use super::*;
    use crate::test_support::loopback_settings;

    const GREETING: &[u8] = b"VOTIFIER 1.9\n";

    fn connection() -> ConnectionInfo {
        ConnectionInfo::new(
            "192.0.2.10:50000".parse().unwrap(),
            "127.0.0.1:8192".parse().unwrap(),
        )
    }

    /// Subscribes a listener that records every published event.
    fn record(bus: &EventBus) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(listener_fn(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        }));
        events
    }

    fn settings() -> Arc<Settings> {
        Arc::new(loopback_settings(Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_valid_vote_is_dispatched_and_connection_closed() {
        // Arrange
        let settings = settings();
        let vote = Vote::new("TesterService", "alice", "host", "2024-01-01T00:00:00");
        let ciphertext = encrypt(&encode_vote(&vote), &settings.key_pair.public).unwrap();
        let stream = Builder::new().write(GREETING).read(&ciphertext).build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);
        let conn = connection();

        // Act
        let state = ConnectionHandler::new(stream, conn, settings, bus).run().await;

        // Assert
        assert_eq!(state, ConnectionState::Closed);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::VoteReceived {
                vote: received,
                connection,
            } => {
                assert_eq!(received, &vote);
                assert_eq!(connection.id, conn.id);
            }
            other => panic!("expected VoteReceived, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_handler_starts_accepted() {
        let stream = Builder::new().build();
        let handler =
            ConnectionHandler::new(stream, connection(), settings(), Arc::new(EventBus::new()));
        assert_eq!(handler.state(), ConnectionState::Accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_client_times_out_once() {
        // Arrange: the client reads the greeting and then says nothing
        let stream = Builder::new()
            .write(GREETING)
            .wait(Duration::from_secs(60))
            .build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);
        let started = Instant::now();

        // Act
        let state = ConnectionHandler::new(stream, connection(), settings(), bus)
            .run()
            .await;

        // Assert
        assert_eq!(state, ConnectionState::Failed);
        let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::TimeoutException]);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_short_ciphertext_then_eof_is_timeout() {
        let stream = Builder::new().write(GREETING).read(&[1, 2, 3]).build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        let state = ConnectionHandler::new(stream, connection(), settings(), bus)
            .run()
            .await;

        assert_eq!(state, ConnectionState::Failed);
        let kinds: Vec<EventKind> = events.lock().unwrap().iter().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::TimeoutException]);
    }

    #[tokio::test]
    async fn test_read_error_is_connection_exception() {
        let stream = Builder::new()
            .write(GREETING)
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
            .build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        let state = ConnectionHandler::new(stream, connection(), settings(), bus)
            .run()
            .await;

        assert_eq!(state, ConnectionState::Failed);
        let events = events.lock().unwrap();
        assert!(matches!(
            &events[..],
            [Event::ConnectionException { cause, .. }] if cause.contains("reset by peer")
        ));
    }

    #[tokio::test]
    async fn test_greeting_write_error_is_connection_exception() {
        let stream = Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"))
            .build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        let state = ConnectionHandler::new(stream, connection(), settings(), bus)
            .run()
            .await;

        assert_eq!(state, ConnectionState::Failed);
        assert_eq!(events.lock().unwrap()[0].kind(), EventKind::ConnectionException);
    }

    #[tokio::test]
    async fn test_undecryptable_block_is_decrypt_exception_without_raw_bytes() {
        // Arrange: a full-length block that is not valid PKCS#1 v1.5
        let settings = settings();
        let garbage = vec![0x01u8; settings.block_size()];
        let stream = Builder::new().write(GREETING).read(&garbage).build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        // Act
        let state = ConnectionHandler::new(stream, connection(), settings, bus)
            .run()
            .await;

        // Assert
        assert_eq!(state, ConnectionState::Failed);
        let events = events.lock().unwrap();
        match &events[..] {
            [Event::DecryptInputException { raw_input, .. }] => assert!(raw_input.is_none()),
            other => panic!("expected one DecryptInputException, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raw_ciphertext_attached_when_exposed() {
        // Arrange
        let mut settings = loopback_settings(Duration::from_secs(5));
        settings.expose_raw_input = true;
        let garbage = vec![0x01u8; settings.block_size()];
        let stream = Builder::new().write(GREETING).read(&garbage).build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        // Act
        ConnectionHandler::new(stream, connection(), Arc::new(settings), bus)
            .run()
            .await;

        // Assert
        let events = events.lock().unwrap();
        match &events[..] {
            [Event::DecryptInputException { raw_input, .. }] => {
                assert_eq!(raw_input.as_deref(), Some(&garbage[..]));
            }
            other => panic!("expected one DecryptInputException, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plaintext_without_marker_is_malformed_exception() {
        // Arrange
        let mut settings = loopback_settings(Duration::from_secs(5));
        settings.expose_raw_input = true;
        let ciphertext = encrypt(&encode_query("hello\nworld"), &settings.key_pair.public).unwrap();
        let stream = Builder::new().write(GREETING).read(&ciphertext).build();
        let bus = Arc::new(EventBus::new());
        let events = record(&bus);

        // Act
        let state = ConnectionHandler::new(stream, connection(), Arc::new(settings), bus)
            .run()
            .await;

        // Assert
        assert_eq!(state, ConnectionState::Failed);
        let events = events.lock().unwrap();
        match &events[..] {
            [Event::MalformedInputException {
                cause, raw_input, ..
            }] => {
                assert_eq!(cause, &ProtocolError::MissingVoteMarker);
                assert_eq!(raw_input.as_deref(), Some(&b"hello\nworld"[..]));
            }
            other => panic!("expected one MalformedInputException, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_change_outcome() {
        // Arrange
        let settings = settings();
        let vote = Vote::new("s", "u", "a", "t");
        let ciphertext = encrypt(&encode_vote(&vote), &settings.key_pair.public).unwrap();
        let stream = Builder::new().write(GREETING).read(&ciphertext).build();
        let bus = Arc::new(EventBus::new());
        bus.subscribe(listener_fn(|_| panic!("listener bug")));
        let events = record(&bus);

        // Act
        let state = ConnectionHandler::new(stream, connection(), settings, bus)
            .run()
            .await;

        // Assert
        assert_eq!(state, ConnectionState::Closed);
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
