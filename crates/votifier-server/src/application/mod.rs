//! Application layer: operator-facing operations.
//!
//! [`Votifier`] is what the CLI talks to.  It owns the shared settings cell,
//! the event bus, and the server, and turns operator commands (`genkeypair`,
//! `showkey`, `testvote`, ...) into calls on the infrastructure.

pub mod logging_listener;
pub mod votifier;

pub use logging_listener::LoggingListener;
pub use votifier::{OperatorError, Votifier, TEST_VOTE_SERVICE};
