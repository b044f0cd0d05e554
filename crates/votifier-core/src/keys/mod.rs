//! RSA key pair lifecycle: generate, save, load, and display.
//!
//! # File format
//!
//! The key pair lives in two files whose paths come from configuration:
//!
//! | File          | Container                                   |
//! |---------------|---------------------------------------------|
//! | public key    | X.509 `SubjectPublicKeyInfo`, DER encoded   |
//! | private key   | PKCS#8 `PrivateKeyInfo`, DER encoded        |
//!
//! These are the standard containers every RSA toolkit can read, so a key
//! generated here can be pasted into a sender's configuration as-is (see
//! [`to_display_string`]).
//!
//! # Key size policy
//!
//! Generation accepts 512 to 16384 bits.  These bounds are policy: smaller
//! keys cannot hold a useful vote record in one PKCS#1 v1.5 block, and
//! larger keys make generation take minutes.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs1;
use rsa::pkcs8::der::Decode;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, SubjectPublicKeyInfoRef};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::ErrorKind;

/// Smallest accepted modulus size in bits.
pub const MIN_KEY_BITS: usize = 512;

/// Largest accepted modulus size in bits.
pub const MAX_KEY_BITS: usize = 16384;

/// Modulus size used when the operator does not ask for one.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Error type for key pair operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid key size {bits}: must be between {MIN_KEY_BITS} and {MAX_KEY_BITS} bits")]
    InvalidKeySize { bits: usize },

    #[error("public key file not found: {}", .0.display())]
    PublicKeyFileNotFound(PathBuf),

    #[error("private key file not found: {}", .0.display())]
    PrivateKeyFileNotFound(PathBuf),

    #[error("invalid public key file {}: {reason}", .path.display())]
    InvalidPublicKeyFile { path: PathBuf, reason: String },

    #[error("invalid private key file {}: {reason}", .path.display())]
    InvalidPrivateKeyFile { path: PathBuf, reason: String },

    #[error("I/O error accessing key file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("key encoding failed: {0}")]
    Encoding(String),
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::InvalidKeySize { .. } | KeyError::Generation(_) => ErrorKind::InvalidKeySize,
            KeyError::PublicKeyFileNotFound(_) | KeyError::PrivateKeyFileNotFound(_) => {
                ErrorKind::KeyFileMissing
            }
            KeyError::InvalidPublicKeyFile { .. }
            | KeyError::InvalidPrivateKeyFile { .. }
            | KeyError::Encoding(_) => ErrorKind::InvalidKeyFile,
            KeyError::Io { .. } => ErrorKind::IoFailure,
        }
    }
}

/// Which half of the key pair an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

/// Returned when a string names neither half of the key pair.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown key kind '{0}': expected pub, public, priv, or private")]
pub struct UnknownKeyKind(pub String);

impl FromStr for KeyKind {
    type Err = UnknownKeyKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pub" | "public" => Ok(KeyKind::Public),
            "priv" | "private" => Ok(KeyKind::Private),
            other => Err(UnknownKeyKind(other.to_string())),
        }
    }
}

/// An RSA key pair.  Immutable once built; replaced wholesale, never edited.
#[derive(Clone)]
pub struct KeyPair {
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

impl KeyPair {
    /// Builds a pair from a private key, deriving the public half.
    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { public, private }
    }

    /// Modulus size in bytes: the length of every ciphertext block.
    pub fn block_size(&self) -> usize {
        self.private.size()
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.n().bits()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

/// Checks `bits` against the accepted key size range.
///
/// # Errors
///
/// Returns [`KeyError::InvalidKeySize`] when `bits` is below
/// [`MIN_KEY_BITS`] or above [`MAX_KEY_BITS`].
pub fn validate_key_size(bits: usize) -> Result<(), KeyError> {
    if (MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
        Ok(())
    } else {
        Err(KeyError::InvalidKeySize { bits })
    }
}

/// Generates a fresh key pair with a `bits`-bit modulus.
///
/// Draws randomness from the operating system (`OsRng`).  This is CPU-bound
/// and takes seconds for 4096-bit keys; async callers should run it on a
/// blocking thread.
///
/// # Errors
///
/// Returns [`KeyError::InvalidKeySize`] for sizes outside the policy range.
pub fn generate(bits: usize) -> Result<KeyPair, KeyError> {
    validate_key_size(bits)?;
    debug!("generating {bits}-bit RSA key pair");

    let private =
        RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyError::Generation(e.to_string()))?;
    Ok(KeyPair::from_private(private))
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Writes the key pair to `public_path` and `private_path`.
///
/// Both encodings are written to `*.tmp` siblings first and only then
/// renamed over the targets, so a failed write never leaves a truncated key
/// file behind.  The two renames are not atomic as a pair: if the second
/// one fails the public file is already new while the private file is old,
/// and the returned error names the private path.
///
/// # Errors
///
/// Returns [`KeyError::Io`] for file-system failures and
/// [`KeyError::Encoding`] if DER encoding fails.
pub fn save(pair: &KeyPair, public_path: &Path, private_path: &Path) -> Result<(), KeyError> {
    let public_der = pair
        .public
        .to_public_key_der()
        .map_err(|e| KeyError::Encoding(e.to_string()))?;
    let private_der = pair
        .private
        .to_pkcs8_der()
        .map_err(|e| KeyError::Encoding(e.to_string()))?;

    let public_tmp = write_temp(public_path, public_der.as_bytes())?;
    let private_tmp = match write_temp(private_path, private_der.as_bytes()) {
        Ok(tmp) => tmp,
        Err(e) => {
            let _ = fs::remove_file(&public_tmp);
            return Err(e);
        }
    };

    rename(&public_tmp, public_path)?;
    rename(&private_tmp, private_path)?;

    info!(
        "saved {}-bit key pair to {} and {}",
        pair.bits(),
        public_path.display(),
        private_path.display()
    );
    Ok(())
}

/// Loads a key pair from its two files.
///
/// # Errors
///
/// Returns [`KeyError::PublicKeyFileNotFound`] /
/// [`KeyError::PrivateKeyFileNotFound`] when a file is absent and
/// [`KeyError::InvalidPublicKeyFile`] / [`KeyError::InvalidPrivateKeyFile`]
/// when it cannot be decoded.
pub fn load(public_path: &Path, private_path: &Path) -> Result<KeyPair, KeyError> {
    let public_der = read_key_file(public_path, KeyError::PublicKeyFileNotFound)?;
    let private_der = read_key_file(private_path, KeyError::PrivateKeyFileNotFound)?;

    let public =
        decode_public_key(&public_der).map_err(|reason| KeyError::InvalidPublicKeyFile {
            path: public_path.to_path_buf(),
            reason,
        })?;
    let private = RsaPrivateKey::from_pkcs8_der(&private_der).map_err(|e| {
        KeyError::InvalidPrivateKeyFile {
            path: private_path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    debug!("loaded {}-bit key pair", public.n().bits());
    Ok(KeyPair { public, private })
}

/// Renders one half of the pair as base64 of its DER container.
///
/// # Errors
///
/// Returns [`KeyError::Encoding`] if DER encoding fails.
pub fn to_display_string(pair: &KeyPair, kind: KeyKind) -> Result<String, KeyError> {
    let der = match kind {
        KeyKind::Public => pair
            .public
            .to_public_key_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec(),
        KeyKind::Private => pair
            .private
            .to_pkcs8_der()
            .map_err(|e| KeyError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec(),
    };
    Ok(BASE64_STANDARD.encode(der))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Decodes an X.509 SubjectPublicKeyInfo RSA key.
///
/// `RsaPublicKey`'s own decoder caps the modulus at 4096 bits; keys up to
/// [`MAX_KEY_BITS`] are accepted here.
fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey, String> {
    let spki = SubjectPublicKeyInfoRef::from_der(der).map_err(|e| e.to_string())?;
    if spki.algorithm.oid != pkcs1::ALGORITHM_OID {
        return Err(format!("not an RSA key (algorithm {})", spki.algorithm.oid));
    }

    let key = pkcs1::RsaPublicKey::from_der(spki.subject_public_key.raw_bytes())
        .map_err(|e| e.to_string())?;
    let n = BigUint::from_bytes_be(key.modulus.as_bytes());
    let e = BigUint::from_bytes_be(key.public_exponent.as_bytes());
    RsaPublicKey::new_with_max_size(n, e, MAX_KEY_BITS).map_err(|e| e.to_string())
}

fn read_key_file(path: &Path, not_found: fn(PathBuf) -> KeyError) -> Result<Vec<u8>, KeyError> {
    fs::read(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            not_found(path.to_path_buf())
        } else {
            KeyError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf, KeyError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| KeyError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, bytes).map_err(|source| KeyError::Io {
        path: tmp.clone(),
        source,
    })?;
    Ok(tmp)
}

fn rename(from: &Path, to: &Path) -> Result<(), KeyError> {
    fs::rename(from, to).map_err(|source| KeyError::Io {
        path: to.to_path_buf(),
        source,
    })
}


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::test_support::shared_key_pair;
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("votifier_keys_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_validate_key_size_accepts_boundaries() {
        assert!(validate_key_size(MIN_KEY_BITS).is_ok());
        assert!(validate_key_size(MAX_KEY_BITS).is_ok());
        assert!(validate_key_size(DEFAULT_KEY_BITS).is_ok());
    }

    #[test]
    fn test_generate_rejects_too_small() {
        let err = generate(511).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeySize { bits: 511 }));
        assert_eq!(err.kind(), ErrorKind::InvalidKeySize);
    }

    #[test]
    fn test_generate_rejects_too_large() {
        let err = generate(16385).unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeySize { bits: 16385 }));
    }

    #[test]
    fn test_generate_minimum_size_key() {
        let pair = generate(MIN_KEY_BITS).unwrap();
        assert_eq!(pair.bits(), 512);
        assert_eq!(pair.block_size(), 64);
    }

    #[test]
    fn test_public_key_above_4096_bits_decodes_and_encrypts() {
        // Arrange: an 8192-bit modulus; generating a real pair that size is too slow
        let n = (BigUint::from(1u8) << 8191usize) + BigUint::from(1u8);
        let public = RsaPublicKey::new_with_max_size(n, BigUint::from(65537u32), MAX_KEY_BITS)
            .unwrap();
        let der = public.to_public_key_der().unwrap();

        // Act
        let decoded = decode_public_key(der.as_bytes()).unwrap();
        let ciphertext = crate::encrypt(b"VOTE\na\nb\nc\nd", &decoded).unwrap();

        // Assert
        assert_eq!(decoded, public);
        assert_eq!(ciphertext.len(), 1024);
    }

    #[test]
    fn test_generate_draws_fresh_keys_each_call() {
        let first = generate(MIN_KEY_BITS).unwrap();
        let second = generate(MIN_KEY_BITS).unwrap();
        assert_ne!(first.public, second.public);
    }

    #[test]
    fn test_save_then_load_restores_same_key() {
        // Arrange
        let dir = temp_dir();
        let public_path = dir.join("public.key");
        let private_path = dir.join("private.key");
        let pair = shared_key_pair();

        // Act
        save(pair, &public_path, &private_path).unwrap();
        let loaded = load(&public_path, &private_path).unwrap();

        // Assert
        assert_eq!(loaded.public, pair.public);
        assert_eq!(loaded.private, pair.private);
        assert!(!temp_path(&public_path).exists(), "temp file must be renamed away");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_creates_missing_parent_directory() {
        let dir = temp_dir();
        let public_path = dir.join("nested").join("public.key");
        let private_path = dir.join("nested").join("private.key");

        save(shared_key_pair(), &public_path, &private_path).unwrap();

        assert!(public_path.exists());
        assert!(private_path.exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_public_key_file() {
        let dir = temp_dir();
        let err = load(&dir.join("nope.pub"), &dir.join("nope.priv")).unwrap_err();
        assert!(matches!(err, KeyError::PublicKeyFileNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::KeyFileMissing);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_private_key_file() {
        // Arrange: a valid public file but no private file
        let dir = temp_dir();
        let public_path = dir.join("public.key");
        let private_path = dir.join("private.key");
        save(shared_key_pair(), &public_path, &private_path).unwrap();
        fs::remove_file(&private_path).unwrap();

        // Act
        let err = load(&public_path, &private_path).unwrap_err();

        // Assert
        assert!(matches!(err, KeyError::PrivateKeyFileNotFound(_)));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_garbage_public_key_file() {
        let dir = temp_dir();
        let public_path = dir.join("public.key");
        let private_path = dir.join("private.key");
        save(shared_key_pair(), &public_path, &private_path).unwrap();
        fs::write(&public_path, b"definitely not DER").unwrap();

        let err = load(&public_path, &private_path).unwrap_err();

        assert!(matches!(err, KeyError::InvalidPublicKeyFile { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidKeyFile);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_garbage_private_key_file() {
        let dir = temp_dir();
        let public_path = dir.join("public.key");
        let private_path = dir.join("private.key");
        save(shared_key_pair(), &public_path, &private_path).unwrap();
        fs::write(&private_path, [0u8; 32]).unwrap();

        let err = load(&public_path, &private_path).unwrap_err();

        assert!(matches!(err, KeyError::InvalidPrivateKeyFile { .. }));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_swapped_files_is_invalid() {
        // The private container is not a SubjectPublicKeyInfo.
        let dir = temp_dir();
        let public_path = dir.join("public.key");
        let private_path = dir.join("private.key");
        save(shared_key_pair(), &public_path, &private_path).unwrap();

        let err = load(&private_path, &public_path).unwrap_err();

        assert!(matches!(err, KeyError::InvalidPublicKeyFile { .. }));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_display_string_is_base64_of_der() {
        let pair = shared_key_pair();
        let text = to_display_string(pair, KeyKind::Public).unwrap();
        let der = BASE64_STANDARD.decode(&text).unwrap();
        assert_eq!(decode_public_key(&der).unwrap(), pair.public);
    }

    #[test]
    fn test_display_strings_differ_between_halves() {
        let pair = shared_key_pair();
        assert_ne!(
            to_display_string(pair, KeyKind::Public).unwrap(),
            to_display_string(pair, KeyKind::Private).unwrap()
        );
    }

    #[test]
    fn test_key_kind_from_str_accepts_short_and_long_names() {
        assert_eq!("pub".parse::<KeyKind>(), Ok(KeyKind::Public));
        assert_eq!("public".parse::<KeyKind>(), Ok(KeyKind::Public));
        assert_eq!("priv".parse::<KeyKind>(), Ok(KeyKind::Private));
        assert_eq!("private".parse::<KeyKind>(), Ok(KeyKind::Private));
        assert!("secret".parse::<KeyKind>().is_err());
    }

    #[test]
    fn test_key_pair_debug_does_not_print_components() {
        let text = format!("{:?}", shared_key_pair());
        assert!(text.contains("1024"));
        assert!(!text.contains("primes"));
    }
}
