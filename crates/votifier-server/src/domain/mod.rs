//! Domain layer for votifier-server.
//!
//! Plain values with no dependency on sockets, files, or the runtime.

pub mod settings;

pub use settings::{connectable, Settings};
