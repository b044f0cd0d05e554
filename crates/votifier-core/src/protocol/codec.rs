//! Vote codec: plaintext layout plus the RSA block encryption around it.
//!
//! The four operations are pure functions.  The connection handler chains
//! `decrypt` then `parse_vote`; the test client chains `encode_vote` then
//! `encrypt`.  Both sides use PKCS#1 v1.5 padding with a block size equal to
//! the key's modulus size in bytes.

use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::protocol::{PKCS1_PADDING_OVERHEAD, VOTE_FIELD_COUNT, VOTE_MARKER};
use crate::vote::Vote;

/// Errors produced while encoding, encrypting, decrypting, or parsing a vote.
///
/// The variants never carry the undecryptable input itself, so they are
/// safe to log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The ciphertext is not exactly one RSA block long.
    #[error("ciphertext length mismatch: expected {expected} bytes, got {actual}")]
    CiphertextLength { expected: usize, actual: usize },

    /// RSA decryption or padding validation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The first plaintext line is not the literal `VOTE`.
    #[error("missing VOTE marker")]
    MissingVoteMarker,

    /// Fewer than four lines follow the marker.
    #[error("expected {VOTE_FIELD_COUNT} fields after the VOTE marker, found {found}")]
    MissingFields { found: usize },

    /// The plaintext is not valid UTF-8.
    #[error("vote plaintext is not valid UTF-8")]
    InvalidUtf8,

    /// The plaintext does not fit into one PKCS#1 v1.5 block.
    #[error("plaintext of {len} bytes exceeds the {max}-byte limit for this key")]
    MessageTooLong { len: usize, max: usize },

    /// RSA encryption failed for another reason (e.g. unsupported key).
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::CiphertextLength { .. } | ProtocolError::Decryption(_) => {
                ErrorKind::DecryptionFailure
            }
            ProtocolError::MissingVoteMarker
            | ProtocolError::MissingFields { .. }
            | ProtocolError::InvalidUtf8 => ErrorKind::MalformedVoteFormat,
            ProtocolError::MessageTooLong { .. } | ProtocolError::Encryption(_) => {
                ErrorKind::EncryptionFailure
            }
        }
    }
}

// ── Plaintext layout ──────────────────────────────────────────────────────────

/// Encodes a vote into its plaintext layout.
///
/// Absent fields contribute an empty line; there is no trailing newline.
/// Fields must not contain `\n`: the layout has no escaping, so a newline
/// inside one field shifts every later field down by one line.
///
/// # Examples
///
/// ```rust
/// use votifier_core::{encode_vote, Vote};
///
/// let vote = Vote { user_name: Some("alice".into()), ..Vote::default() };
/// assert_eq!(encode_vote(&vote), b"VOTE\n\nalice\n\n".to_vec());
/// ```
pub fn encode_vote(vote: &Vote) -> Vec<u8> {
    let fields = [
        VOTE_MARKER,
        vote.service_name_or_empty(),
        vote.user_name_or_empty(),
        vote.address_or_empty(),
        vote.time_stamp_or_empty(),
    ];
    fields.join("\n").into_bytes()
}

/// Encodes an arbitrary query string.  The bytes are passed through as-is.
pub fn encode_query(message: &str) -> Vec<u8> {
    message.as_bytes().to_vec()
}

/// Parses decrypted plaintext into a [`Vote`].
///
/// Lines beyond the fifth are ignored so that senders may append fields.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingVoteMarker`] if the first line is not
/// `VOTE`, [`ProtocolError::MissingFields`] if fewer than four lines follow
/// it, and [`ProtocolError::InvalidUtf8`] for non-UTF-8 input.
pub fn parse_vote(plaintext: &[u8]) -> Result<Vote, ProtocolError> {
    let text = std::str::from_utf8(plaintext).map_err(|_| ProtocolError::InvalidUtf8)?;
    let mut lines = text.split('\n');

    if lines.next() != Some(VOTE_MARKER) {
        return Err(ProtocolError::MissingVoteMarker);
    }

    let fields: Vec<&str> = lines.take(VOTE_FIELD_COUNT).collect();
    if fields.len() < VOTE_FIELD_COUNT {
        return Err(ProtocolError::MissingFields {
            found: fields.len(),
        });
    }

    Ok(Vote {
        service_name: Some(fields[0].to_string()),
        user_name: Some(fields[1].to_string()),
        address: Some(fields[2].to_string()),
        time_stamp: Some(fields[3].to_string()),
    })
}

// ── RSA block ─────────────────────────────────────────────────────────────────

/// Decrypts one ciphertext block with the private key.
///
/// # Errors
///
/// Returns [`ProtocolError::CiphertextLength`] when `ciphertext` is not
/// exactly one block, and [`ProtocolError::Decryption`] when the padding
/// does not validate.
pub fn decrypt(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, ProtocolError> {
    let expected = private_key.size();
    if ciphertext.len() != expected {
        return Err(ProtocolError::CiphertextLength {
            expected,
            actual: ciphertext.len(),
        });
    }

    private_key
        .decrypt(Pkcs1v15Encrypt, ciphertext)
        .map_err(|e| ProtocolError::Decryption(e.to_string()))
}

/// Encrypts `plaintext` into one block with the public key.
///
/// The output is always exactly the key's block size long.
///
/// # Errors
///
/// Returns [`ProtocolError::MessageTooLong`] when `plaintext` is longer than
/// `block_size - 11` bytes.
pub fn encrypt(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, ProtocolError> {
    let max = public_key.size().saturating_sub(PKCS1_PADDING_OVERHEAD);
    if plaintext.len() > max {
        return Err(ProtocolError::MessageTooLong {
            len: plaintext.len(),
            max,
        });
    }

    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| ProtocolError::Encryption(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
