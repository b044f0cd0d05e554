//! Infrastructure layer for votifier-server.
//!
//! Everything that touches a socket or a file lives here:
//!
//! - `server`     – listening socket, accept loop, start/stop/restart
//! - `connection` – the per-connection protocol state machine
//! - `tester`     – the diagnostic client used by `testvote`/`testquery`
//! - `storage`    – the TOML configuration file

pub mod connection;
pub mod server;
pub mod storage;
pub mod tester;

pub use connection::{ConnectionHandler, ConnectionState};
pub use server::{Server, ServerError};
pub use tester::{ClientError, ProtocolClient};
