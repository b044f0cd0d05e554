//! votifier-server library crate.
//!
//! Receives vote notifications over TCP, decrypts them with the local RSA
//! private key, and republishes them on the event bus.
//!
//! # Architecture
//!
//! ```text
//! Sender (server-list website)
//!         ↓  TCP: greeting, one RSA block
//! [votifier-server]
//!   ├── domain/           Settings: the runtime snapshot shared by every task
//!   ├── application/      Votifier operator facade, logging listener
//!   └── infrastructure/
//!         ├── server      Listening socket, accept loop, start/stop/restart
//!         ├── connection  Per-connection state machine
//!         ├── tester      Diagnostic client (testvote / testquery)
//!         └── storage/    TOML configuration file
//!         ↓
//! EventBus listeners (logging, downstream actions)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` composes infrastructure behind operator-level operations.
//! - `infrastructure` owns every socket and file.

/// Domain layer: runtime settings.
pub mod domain;

/// Application layer: operator operations.
pub mod application;

/// Infrastructure layer: sockets and configuration storage.
pub mod infrastructure;

#[cfg(test)]
mod test_support;
