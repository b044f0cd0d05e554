//! Runtime settings snapshot.
//!
//! [`Settings`] is what every connection handler and the test client read.
//! It is built from the TOML configuration plus the loaded key pair, and is
//! shared through a `Current<Settings>` cell so that a restart or a key
//! regeneration replaces it as a whole.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use votifier_core::KeyPair;

/// Per-connection deadline used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything the receiver needs at runtime.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use votifier_server::domain::Settings;
///
/// let pair = Arc::new(votifier_core::keys::generate(1024).unwrap());
/// let settings = Settings::new("0.0.0.0:8192".parse().unwrap(), pair);
/// assert_eq!(settings.client_target().to_string(), "127.0.0.1:8192");
/// ```
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address the listening socket binds to.
    pub listen_addr: SocketAddr,

    /// Deadline for a whole connection: greeting, ciphertext, and close.
    pub timeout: Duration,

    /// Attach the undecryptable or unparsable bytes to exception events.
    pub expose_raw_input: bool,

    /// Where `genkeypair` writes the public key.
    pub public_key_path: PathBuf,

    /// Where `genkeypair` writes the private key.
    pub private_key_path: PathBuf,

    /// The current key pair.
    pub key_pair: Arc<KeyPair>,
}

impl Settings {
    /// Builds settings with default timeout and key file names.
    pub fn new(listen_addr: SocketAddr, key_pair: Arc<KeyPair>) -> Self {
        Self {
            listen_addr,
            timeout: DEFAULT_TIMEOUT,
            expose_raw_input: false,
            public_key_path: PathBuf::from("public.key"),
            private_key_path: PathBuf::from("private.key"),
            key_pair,
        }
    }

    /// Returns a copy that uses `key_pair` instead of the current one.
    pub fn with_key_pair(&self, key_pair: Arc<KeyPair>) -> Self {
        Self {
            key_pair,
            ..self.clone()
        }
    }

    /// Ciphertext length every sender must write.
    pub fn block_size(&self) -> usize {
        self.key_pair.block_size()
    }

    /// Address a local client should dial to reach this listener.
    ///
    /// A wildcard bind address is not connectable; see [`connectable`].
    pub fn client_target(&self) -> SocketAddr {
        connectable(self.listen_addr)
    }
}

/// Maps a wildcard address to the loopback address of the same family.
pub fn connectable(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}
