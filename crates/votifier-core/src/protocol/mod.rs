//! Protocol module containing the wire constants and the vote codec.
//!
//! # Wire protocol (one TCP connection per vote)
//!
//! ```text
//! server -> client   "VOTIFIER 1.9\n"
//! client -> server   N raw bytes, N = RSA modulus size in bytes
//! (no reply; the client closes)
//! ```
//!
//! The `N` bytes are a single PKCS#1 v1.5 block.  Once decrypted they read:
//!
//! ```text
//! VOTE\n<service>\n<user>\n<address>\n<timestamp>
//! ```

pub mod codec;

pub use codec::{decrypt, encode_query, encode_vote, encrypt, parse_vote, ProtocolError};

/// Protocol name sent at the start of the greeting line.
pub const PROTOCOL_NAME: &str = "VOTIFIER";

/// Protocol version sent in the greeting line.
///
/// Senders only look for the terminating newline, but `1.9` is what the
/// widely deployed senders expect to see.
pub const PROTOCOL_VERSION: &str = "1.9";

/// Literal first line of every vote plaintext.
pub const VOTE_MARKER: &str = "VOTE";

/// Number of fields that follow [`VOTE_MARKER`].
pub const VOTE_FIELD_COUNT: usize = 4;

/// Bytes of PKCS#1 v1.5 padding overhead inside one RSA block.
pub const PKCS1_PADDING_OVERHEAD: usize = 11;

/// Upper bound on the greeting line a client will buffer before giving up.
pub const MAX_GREETING_LEN: usize = 256;

/// Returns the newline-terminated greeting line.
///
/// # Examples
///
/// ```rust
/// assert_eq!(votifier_core::protocol::greeting(), "VOTIFIER 1.9\n");
/// ```
pub fn greeting() -> String {
    format!("{PROTOCOL_NAME} {PROTOCOL_VERSION}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_is_single_newline_terminated_line() {
        let line = greeting();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.starts_with(PROTOCOL_NAME));
        assert!(line.len() <= MAX_GREETING_LEN);
    }
}
