//! Fixtures shared by the unit tests of this crate.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use votifier_core::{keys, KeyPair};

use crate::domain::Settings;

/// A 1024-bit key pair generated once per test binary.
pub(crate) fn shared_key_pair() -> Arc<KeyPair> {
    static PAIR: OnceLock<Arc<KeyPair>> = OnceLock::new();
    Arc::clone(PAIR.get_or_init(|| Arc::new(keys::generate(1024).expect("generate test key"))))
}

/// Loopback settings on an ephemeral port with a short deadline.
pub(crate) fn loopback_settings(timeout: Duration) -> Settings {
    let addr = "127.0.0.1:0".parse().expect("literal address");
    let mut settings = Settings::new(addr, shared_key_pair());
    settings.timeout = timeout;
    settings
}
