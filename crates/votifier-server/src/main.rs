//! Votifier vote receiver: entry point.
//!
//! Listens for RSA-encrypted vote notifications from voting sites and offers
//! the operator commands for managing keys and checking the setup.
//!
//! # Usage
//!
//! ```text
//! votifier [--config <PATH>] [COMMAND]
//!
//! Commands:
//!   serve                 Run the vote listener (default)
//!   genkeypair [BITS]     Generate and save a new key pair [default: 2048]
//!   showkey <pub|priv>    Print a key for copy/paste into a voting site
//!   testvote <USER>       Send a test vote to the configured listener
//!   testquery <LINE>...   Send raw lines, joined with '\n', as one message
//! ```
//!
//! # Environment variables
//!
//! | Variable          | Default         | Description                        |
//! |-------------------|-----------------|------------------------------------|
//! | `VOTIFIER_CONFIG` | `votifier.toml` | Configuration file path            |
//! | `RUST_LOG`        | config `level`  | Log filter, overrides the config   |
//!
//! # Signals
//!
//! While serving, Ctrl+C stops the listener after in-flight connections
//! finish.  On unix, SIGHUP re-reads the configuration and key files and
//! restarts the listener.
//!
//! `genkeypair` runs in its own process: it writes the new key files but a
//! `serve` process that is already running keeps its old pair until it
//! receives SIGHUP.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use votifier_core::KeyKind;
use votifier_server::application::Votifier;
use votifier_server::infrastructure::storage::{load_config, DEFAULT_CONFIG_FILE};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Receiver for Votifier-protocol vote notifications.
#[derive(Debug, Parser)]
#[command(
    name = "votifier",
    about = "Receiver for RSA-encrypted vote notifications",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    ///
    /// Created with default values on first run.  Relative key file paths
    /// inside it are resolved against its directory.
    #[arg(
        short,
        long,
        global = true,
        default_value = DEFAULT_CONFIG_FILE,
        env = "VOTIFIER_CONFIG"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Run the vote listener until Ctrl+C.
    Serve,

    /// Generate a new key pair, save it, and print the public key.
    Genkeypair {
        /// Key size in bits (512..=16384).
        bits: Option<usize>,
    },

    /// Print the public or private key.
    Showkey {
        /// `pub`/`public` or `priv`/`private`.
        kind: KeyKind,
    },

    /// Send a test vote for USER.
    Testvote {
        user: String,
    },

    /// Send raw lines as one encrypted message.
    Testquery {
        #[arg(required = true)]
        lines: Vec<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.config);

    let votifier = Votifier::load(&cli.config)
        .await
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&votifier).await,
        Command::Genkeypair { bits } => {
            let public = votifier
                .generate_and_save_key_pair(bits)
                .await
                .context("key generation failed")?;
            let settings = votifier.settings();
            eprintln!(
                "{}",
                key_saved_notice(&settings.public_key_path, &settings.private_key_path)
            );
            println!("{public}");
            Ok(())
        }
        Command::Showkey { kind } => {
            println!("{}", votifier.display_key(kind)?);
            Ok(())
        }
        Command::Testvote { user } => {
            let vote = votifier
                .send_test_vote(&user)
                .await
                .context("test vote failed")?;
            println!("sent {vote}");
            Ok(())
        }
        Command::Testquery { lines } => {
            votifier
                .send_test_query(lines.as_slice())
                .await
                .context("test query failed")?;
            println!("sent {} line(s)", lines.len());
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise the configured level; otherwise `info`.
///
/// Runs before the subscriber exists, so a config file that cannot be read
/// here is silently skipped and reported by the real load right after.
fn init_logging(config_path: &Path) {
    let configured = load_config(config_path)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&configured))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Where the keys went, and how to make a running server pick them up.
fn key_saved_notice(public_path: &Path, private_path: &Path) -> String {
    format!(
        "saved key pair to {} and {}; send SIGHUP to a running `votifier serve` to load it",
        public_path.display(),
        private_path.display()
    )
}

// ── Serve loop ────────────────────────────────────────────────────────────────

async fn serve(votifier: &Votifier) -> anyhow::Result<()> {
    votifier.start().await.context("failed to start vote listener")?;
    info!(
        "public key for voting sites:\n{}",
        votifier.display_key(KeyKind::Public)?
    );

    let mut hangup = Hangup::new()?;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("received Ctrl+C, shutting down");
                break;
            }
            _ = hangup.recv() => {
                info!("received SIGHUP, reloading");
                if let Err(e) = votifier.restart().await {
                    if votifier.server().is_running().await {
                        warn!("reload failed, still serving with the old settings: {e}");
                    } else {
                        error!("restart failed: {e}");
                        return Err(e).context("restart failed");
                    }
                }
            }
        }
    }

    votifier.stop().await.context("failed to stop vote listener")?;
    Ok(())
}

/// SIGHUP stream on unix; never fires elsewhere.
struct Hangup {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl Hangup {
    #[cfg(unix)]
    fn new() -> anyhow::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        let inner = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
        Ok(Self { inner })
    }

    #[cfg(not(unix))]
    fn new() -> anyhow::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> Option<()> {
        self.inner.recv().await
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_serve_with_default_config() {
        // Arrange / Act
        let cli = Cli::try_parse_from(["votifier"]).unwrap();

        // Assert
        assert_eq!(cli.command, None);
        if std::env::var_os("VOTIFIER_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from("votifier.toml"));
        }
    }

    #[test]
    fn test_cli_config_override() {
        let cli = Cli::try_parse_from(["votifier", "-c", "/etc/votifier.toml", "serve"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/votifier.toml"));
        assert_eq!(cli.command, Some(Command::Serve));
    }

    #[test]
    fn test_cli_config_after_subcommand() {
        let cli = Cli::try_parse_from(["votifier", "showkey", "pub", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn test_cli_genkeypair_bits_optional() {
        let cli = Cli::try_parse_from(["votifier", "genkeypair"]).unwrap();
        assert_eq!(cli.command, Some(Command::Genkeypair { bits: None }));

        let cli = Cli::try_parse_from(["votifier", "genkeypair", "4096"]).unwrap();
        assert_eq!(cli.command, Some(Command::Genkeypair { bits: Some(4096) }));
    }

    #[test]
    fn test_cli_genkeypair_rejects_non_numeric_bits() {
        assert!(Cli::try_parse_from(["votifier", "genkeypair", "big"]).is_err());
    }

    #[test]
    fn test_cli_showkey_accepts_aliases() {
        for (arg, kind) in [
            ("pub", KeyKind::Public),
            ("public", KeyKind::Public),
            ("priv", KeyKind::Private),
            ("private", KeyKind::Private),
        ] {
            let cli = Cli::try_parse_from(["votifier", "showkey", arg]).unwrap();
            assert_eq!(cli.command, Some(Command::Showkey { kind }));
        }
    }

    #[test]
    fn test_cli_showkey_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["votifier", "showkey", "secret"]).is_err());
    }

    #[test]
    fn test_cli_testvote_takes_user() {
        let cli = Cli::try_parse_from(["votifier", "testvote", "alice"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Testvote {
                user: "alice".to_string()
            })
        );
    }

    #[test]
    fn test_cli_testquery_collects_lines() {
        let cli = Cli::try_parse_from(["votifier", "testquery", "VOTE", "svc", "bob"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Testquery {
                lines: vec!["VOTE".into(), "svc".into(), "bob".into()]
            })
        );
    }

    #[test]
    fn test_key_saved_notice_names_files_and_reload_signal() {
        let notice = key_saved_notice(Path::new("keys/public.key"), Path::new("keys/private.key"));

        assert!(notice.contains("keys/public.key"));
        assert!(notice.contains("keys/private.key"));
        assert!(notice.contains("SIGHUP"));
    }

    #[test]
    fn test_cli_testquery_requires_a_line() {
        assert!(Cli::try_parse_from(["votifier", "testquery"]).is_err());
    }
}
