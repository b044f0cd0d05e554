//! The operator facade.
//!
//! [`Votifier`] ties the configuration file, the key files, the server, and
//! the diagnostic client together behind the operations the CLI exposes.
//! Every operation returns an [`OperatorError`] whose [`OperatorError::kind`]
//! the CLI can match on.
//!
//! # First run
//!
//! Loading from a configuration path that does not exist writes the default
//! configuration there.  If neither key file exists either, a
//! [`DEFAULT_KEY_BITS`]-bit pair is generated and saved.  Exactly one missing
//! key file is an error: the other half cannot be recovered.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;
use votifier_core::keys::{self, DEFAULT_KEY_BITS};
use votifier_core::{Current, ErrorKind, EventBus, KeyError, KeyKind, Vote};

use crate::application::LoggingListener;
use crate::domain::{connectable, Settings};
use crate::infrastructure::storage::config::{config_base_dir, load_config, save_config};
use crate::infrastructure::storage::ConfigError;
use crate::infrastructure::{ClientError, ProtocolClient, Server, ServerError};

/// Service name carried by votes sent with `testvote`.
pub const TEST_VOTE_SERVICE: &str = "TesterService";

/// Error type for operator operations.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// A test vote field would spill into the next line of the plaintext.
    #[error("test vote {field} must not contain a newline")]
    NewlineInField { field: &'static str },

    /// A blocking helper task panicked.
    #[error("background task failed: {0}")]
    Task(String),
}

impl OperatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::Config(e) => e.kind(),
            OperatorError::Key(e) => e.kind(),
            OperatorError::Server(e) => e.kind(),
            OperatorError::Client(e) => e.kind(),
            OperatorError::NewlineInField { .. } => ErrorKind::MalformedVoteFormat,
            OperatorError::Task(_) => ErrorKind::IoFailure,
        }
    }
}

/// The running receiver plus everything needed to operate it.
pub struct Votifier {
    config_path: PathBuf,
    settings: Arc<Current<Settings>>,
    bus: Arc<EventBus>,
    server: Server,
    /// Held by `restart` and key regeneration so neither installs a pair
    /// the other is about to overwrite.
    reload: AsyncMutex<()>,
}

impl Votifier {
    /// Loads configuration and keys from `config_path`, bootstrapping both on
    /// first run.
    ///
    /// # Errors
    ///
    /// Returns the configuration or key error that prevented loading.
    pub async fn load(config_path: impl Into<PathBuf>) -> Result<Self, OperatorError> {
        let config_path = config_path.into();
        let settings = load_settings_blocking(config_path.clone()).await?;
        Ok(Self::with_settings(config_path, settings))
    }

    /// Builds a facade around already-loaded settings.
    ///
    /// A [`LoggingListener`] is subscribed on the new event bus.
    pub fn with_settings(config_path: PathBuf, settings: Settings) -> Self {
        let settings = Arc::new(Current::new(settings));
        let bus = Arc::new(EventBus::new());
        bus.subscribe(Arc::new(LoggingListener));
        let server = Server::new(Arc::clone(&settings), Arc::clone(&bus));
        Self {
            config_path,
            settings,
            bus,
            server,
            reload: AsyncMutex::new(()),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.get()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub async fn start(&self) -> Result<SocketAddr, OperatorError> {
        Ok(self.server.start().await?)
    }

    pub async fn stop(&self) -> Result<(), OperatorError> {
        Ok(self.server.stop().await?)
    }

    /// Re-reads the configuration file and key files, then restarts the
    /// server with them.
    ///
    /// The new settings are loaded before the server is stopped, so a broken
    /// configuration file leaves the running server untouched.  A concurrent
    /// [`Votifier::generate_and_save_key_pair`] runs entirely before or after
    /// the restart.
    pub async fn restart(&self) -> Result<SocketAddr, OperatorError> {
        let _reload = self.reload.lock().await;
        let next = load_settings_blocking(self.config_path.clone()).await?;
        info!("configuration reloaded from {}", self.config_path.display());
        Ok(self.server.restart(next).await?)
    }

    // ── Keys ──────────────────────────────────────────────────────────────────

    /// Generates a new key pair, writes it to the configured key files, and
    /// makes it current.  Returns the public key's display string.
    ///
    /// New connections use the new pair immediately; connections already in
    /// progress finish with the old one.  `None` means
    /// [`DEFAULT_KEY_BITS`].
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeySize`] for sizes outside 512..=16384
    /// and I/O errors from saving.  On error the current pair is unchanged.
    pub async fn generate_and_save_key_pair(
        &self,
        bits: Option<usize>,
    ) -> Result<String, OperatorError> {
        let bits = bits.unwrap_or(DEFAULT_KEY_BITS);
        keys::validate_key_size(bits)?;

        let _reload = self.reload.lock().await;
        let current = self.settings.get();
        let public_path = current.public_key_path.clone();
        let private_path = current.private_key_path.clone();
        info!("generating {bits}-bit key pair");
        let pair = tokio::task::spawn_blocking(move || -> Result<_, KeyError> {
            let pair = keys::generate(bits)?;
            keys::save(&pair, &public_path, &private_path)?;
            Ok(pair)
        })
        .await
        .map_err(|e| OperatorError::Task(e.to_string()))??;

        let pair = Arc::new(pair);
        self.settings.update(|s| s.with_key_pair(Arc::clone(&pair)));
        info!("new {bits}-bit key pair is active");
        Ok(keys::to_display_string(&pair, KeyKind::Public)?)
    }

    /// Renders the current public or private key for copy/paste.
    pub fn display_key(&self, kind: KeyKind) -> Result<String, OperatorError> {
        Ok(keys::to_display_string(&self.settings.get().key_pair, kind)?)
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Sends a vote for `user_name` to this receiver and returns it.
    ///
    /// The vote carries [`TEST_VOTE_SERVICE`], the configured bind host, and
    /// the current Unix time in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NewlineInField`] if `user_name` contains a
    /// newline, since the receiver would read it as two fields.
    pub async fn send_test_vote(&self, user_name: &str) -> Result<Vote, OperatorError> {
        if user_name.contains('\n') {
            return Err(OperatorError::NewlineInField { field: "user name" });
        }
        let settings = self.settings.get();
        let vote = Vote::new(
            TEST_VOTE_SERVICE,
            user_name,
            settings.listen_addr.ip().to_string(),
            unix_millis().to_string(),
        );
        self.client().await.test_vote(&vote).await?;
        Ok(vote)
    }

    /// Sends `lines`, joined with `\n`, as a raw encrypted message.
    pub async fn send_test_query<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), OperatorError> {
        let message = lines
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join("\n");
        Ok(self.client().await.test_query(&message).await?)
    }

    /// A client aimed at the running server, or at the configured address
    /// when this process is not serving.
    async fn client(&self) -> ProtocolClient {
        let client = ProtocolClient::new(Arc::clone(&self.settings));
        match self.server.local_addr().await {
            Some(addr) => client.targeting(connectable(addr)),
            None => client,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

async fn load_settings_blocking(config_path: PathBuf) -> Result<Settings, OperatorError> {
    tokio::task::spawn_blocking(move || load_settings(&config_path))
        .await
        .map_err(|e| OperatorError::Task(e.to_string()))?
}

fn load_settings(config_path: &Path) -> Result<Settings, OperatorError> {
    let first_run = !config_path.exists();
    let config = load_config(config_path)?;
    if first_run {
        save_config(config_path, &config)?;
        info!("wrote default configuration to {}", config_path.display());
    }
    let listen_addr = config.listen_addr()?;

    let (public_key_path, private_key_path) = config.key_paths(&config_base_dir(config_path));
    let key_pair = if !public_key_path.exists() && !private_key_path.exists() {
        info!("no key pair found; generating a {DEFAULT_KEY_BITS}-bit pair");
        let pair = keys::generate(DEFAULT_KEY_BITS)?;
        keys::save(&pair, &public_key_path, &private_key_path)?;
        pair
    } else {
        keys::load(&public_key_path, &private_key_path)?
    };

    Ok(Settings {
        listen_addr,
        timeout: config.timeout(),
        expose_raw_input: config.server.expose_raw_input,
        public_key_path,
        private_key_path,
        key_pair: Arc::new(key_pair),
    })
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
