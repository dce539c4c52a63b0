//! binpatch CLI Module
//! Command-line definitions for the update client and the update server

pub mod formatter;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::config::{ClientConfig, DEFAULT_FETCH_TIMEOUT};
use crate::engine::verify::SignatureType;

#[derive(Parser, Debug)]
#[command(name = "binpatch")]
#[command(author = "binpatch Team")]
#[command(version)]
#[command(about = "Fetch and apply binary updates to an executable", long_about = None)]
pub struct Cli {
    /// Update server base URL
    #[arg(short, long, global = true, default_value = "http://localhost:8080")]
    pub server: String,

    /// Application name on the server (defaults to the target's file name)
    #[arg(short, long, global = true)]
    pub name: Option<String>,

    /// Version the target currently runs
    #[arg(long, global = true, default_value = "v0.0.0")]
    pub current_version: String,

    /// Executable to update (defaults to this binary)
    #[arg(short, long, global = true)]
    pub target: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Keep `.<exe>.old` after a successful update
    #[arg(long, global = true)]
    pub keep_backup: bool,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Verbose logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the client version
    Version,

    /// Replace the target with the latest full binary
    Update,

    /// Update through a binary delta against the current version
    PatchUpdate,

    /// Signed updates, verified before anything is written
    Signed {
        #[command(subcommand)]
        action: SignedAction,
    },

    /// Upload a binary to the server
    Upload {
        /// Binary to upload
        file: PathBuf,

        /// Version of the uploaded binary
        #[arg(long)]
        version: String,

        /// Architecture, e.g. amd64
        #[arg(long)]
        arch: String,

        /// Operating system, e.g. linux
        #[arg(long)]
        os: String,

        /// Signing key (PEM, or hex for --key-type) used to sign the binary
        #[arg(long)]
        signing_key: Option<PathBuf>,

        /// Scheme of a hex signing key
        #[arg(long, value_enum, default_value_t = SignatureType::Ecdsa)]
        key_type: SignatureType,
    },

    /// Print the public key for a signing key
    PublicKey {
        /// Signing key (PEM, or hex for --key-type)
        #[arg(long)]
        signing_key: PathBuf,

        /// Scheme of a hex signing key
        #[arg(long, value_enum, default_value_t = SignatureType::Ecdsa)]
        key_type: SignatureType,
    },
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Public key file: PEM for ECDSA, hex for Ed25519
    #[arg(long)]
    pub public_key: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum SignedAction {
    /// Signed full binary
    Update(KeyArgs),
    /// Signed delta; the signature covers the rebuilt binary
    PatchUpdate(KeyArgs),
}

impl Cli {
    pub fn get_target(&self) -> std::io::Result<PathBuf> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => std::env::current_exe(),
        }
    }

    pub fn client_config(&self) -> std::io::Result<ClientConfig> {
        let target = self.get_target()?;
        let name = self.name.clone().unwrap_or_else(|| {
            target
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        Ok(ClientConfig {
            server_url: self.server.clone(),
            name,
            current_version: self.current_version.clone(),
            target,
            timeout: Duration::from_secs(self.timeout_secs),
            keep_backup: self.keep_backup,
        })
    }
}

#[derive(Parser, Debug)]
#[command(name = "binpatch-server")]
#[command(author = "binpatch Team")]
#[command(version)]
#[command(about = "Serve versioned binaries, deltas and signed envelopes", long_about = None)]
pub struct ServerCli {
    /// Config file, or a directory holding binpatch.config.json
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Artifact store directory
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_subcommands() {
        let cli = Cli::try_parse_from([
            "binpatch",
            "--target",
            "/opt/tool",
            "signed",
            "patch-update",
            "--public-key",
            "key.hex",
        ])
        .unwrap();
        match cli.command {
            Commands::Signed {
                action: SignedAction::PatchUpdate(args),
            } => assert_eq!(args.public_key, PathBuf::from("key.hex")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_upload_key_type() {
        let cli = Cli::try_parse_from([
            "binpatch", "upload", "tool", "--version", "v2", "--arch", "amd64", "--os", "linux",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload { key_type, signing_key, .. } => {
                assert_eq!(key_type, SignatureType::Ecdsa);
                assert!(signing_key.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "binpatch", "public-key", "--signing-key", "k.hex", "--key-type", "ed25519",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::PublicKey {
                key_type: SignatureType::Ed25519,
                ..
            }
        ));
    }

    #[test]
    fn test_name_defaults_to_target_file_name() {
        let cli = Cli::try_parse_from(["binpatch", "--target", "/opt/bin/tool", "update"]).unwrap();
        let config = cli.client_config().unwrap();
        assert_eq!(config.name, "tool");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(!config.keep_backup);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "binpatch",
            "update",
            "--keep-backup",
            "--timeout-secs",
            "5",
            "--name",
            "app",
        ])
        .unwrap();
        let config = cli.client_config().unwrap();
        assert_eq!(config.name, "app");
        assert!(config.keep_backup);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_server_flags() {
        let cli = ServerCli::try_parse_from(["binpatch-server", "--port", "9000", "--debug"]).unwrap();
        assert_eq!(cli.port, Some(9000));
        assert!(cli.debug);
        assert!(cli.config.is_none());
    }
}
