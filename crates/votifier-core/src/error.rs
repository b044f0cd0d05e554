//! Machine-inspectable error taxonomy.
//!
//! Every error type in the workspace maps onto one [`ErrorKind`] through a
//! `kind()` method.  Callers such as the CLI match on the kind to pick a
//! message or an exit code instead of parsing formatted error text.

use std::fmt;

/// Coarse classification of every failure the receiver can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The listening socket could not be bound (port in use, permission).
    BindFailure,
    /// A connection did not complete within its deadline.
    TimeoutFailure,
    /// Ciphertext had the wrong length or failed padding validation.
    DecryptionFailure,
    /// Decrypted plaintext lacked the `VOTE` marker or enough fields.
    MalformedVoteFormat,
    /// A configured key file does not exist.
    KeyFileMissing,
    /// A key file exists but could not be decoded.
    InvalidKeyFile,
    /// Requested key size is outside the accepted policy range.
    InvalidKeySize,
    /// Any other file system or socket I/O failure.
    IoFailure,
    /// A message could not be encrypted (too long for the key).
    EncryptionFailure,
    /// The configuration file could not be read or parsed.
    ConfigFailure,
    /// The server was asked to start while running, or stop while stopped.
    ServerState,
}

impl ErrorKind {
    /// Stable snake_case identifier, suitable for log fields and exit reports.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BindFailure => "bind_failure",
            ErrorKind::TimeoutFailure => "timeout_failure",
            ErrorKind::DecryptionFailure => "decryption_failure",
            ErrorKind::MalformedVoteFormat => "malformed_vote_format",
            ErrorKind::KeyFileMissing => "key_file_missing",
            ErrorKind::InvalidKeyFile => "invalid_key_file",
            ErrorKind::InvalidKeySize => "invalid_key_size",
            ErrorKind::IoFailure => "io_failure",
            ErrorKind::EncryptionFailure => "encryption_failure",
            ErrorKind::ConfigFailure => "config_failure",
            ErrorKind::ServerState => "server_state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
