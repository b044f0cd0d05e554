//! # votifier-core
//!
//! Shared library for the Votifier vote receiver containing the vote record
//! codec, RSA key management, and the in-process event bus.
//!
//! This crate is used by both the server and the diagnostic test client.
//! It has zero dependencies on network sockets or async runtimes.
//!
//! # Architecture overview
//!
//! A remote sender (usually a server-list website) notifies us that a user
//! voted.  It opens a TCP connection, reads a one-line greeting, and writes a
//! single RSA-encrypted block containing a newline-delimited vote record.
//!
//! This crate is the shared foundation.  It defines:
//!
//! - **`protocol`** – How a vote travels over the wire: the plaintext layout,
//!   PKCS#1 v1.5 encryption and decryption, and the greeting line.
//!
//! - **`keys`** – The RSA key pair lifecycle: generate, save to and load from
//!   DER key files, and render keys as base64 for copy/paste.
//!
//! - **`events`** – The publish/subscribe bus that decouples protocol
//!   outcomes (a vote arrived, a connection timed out, ...) from the code that
//!   reacts to them.
//!
//! - **`current`** – A small mutex-guarded cell holding the "current" value
//!   of something that can be swapped wholesale at runtime (the settings).

pub mod current;
pub mod error;
pub mod events;
pub mod keys;
pub mod protocol;
pub mod vote;

pub use current::Current;
pub use error::ErrorKind;
pub use events::{
    listener_fn, ConnectionInfo, Event, EventBus, EventKind, Listener, ListenerError, ListenerId,
};
pub use keys::{KeyError, KeyKind, KeyPair};
pub use protocol::codec::{decrypt, encode_query, encode_vote, encrypt, parse_vote, ProtocolError};
pub use vote::Vote;
