//! binpatch - Main entry point for the update client
//!
//! Replaces an executable with its latest version from a binpatch server.

use anyhow::{Context, Result};
use binpatch_lib::engine::{
    api::UploadData,
    cli::{
        formatter::{format_size, CliFormatter},
        Cli, Commands, OutputFormat, SignedAction,
    },
    logging,
    updater::{Fetcher, PatchClient, UpdateError, UpdateOutcome, UpdateVariant},
    verify::{PublicKey, SigningKey},
};
use clap::Parser;
use serde_json::json;
use std::path::Path;

/// Exit status when the original executable could not be restored
const EXIT_ROLLBACK_FAILURE: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    let json_output = cli.format == OutputFormat::Json;

    if let Err(e) = run_cli(cli, json_output).await {
        let rollback_failed = e
            .downcast_ref::<UpdateError>()
            .is_some_and(UpdateError::is_rollback_failure);

        if json_output {
            println!(
                "{}",
                json!({ "status": "error", "error": format!("{:#}", e), "rollback_failed": rollback_failed })
            );
        } else if rollback_failed {
            CliFormatter::fatal(&format!("{:#}", e));
        } else {
            CliFormatter::error(&format!("{:#}", e));
        }
        std::process::exit(if rollback_failed { EXIT_ROLLBACK_FAILURE } else { 1 });
    }
}

fn read_key_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn run_cli(cli: Cli, json_output: bool) -> Result<()> {
    match &cli.command {
        Commands::Version => {
            let version = env!("CARGO_PKG_VERSION");
            if json_output {
                println!("{}", json!({ "version": version }));
            } else {
                println!("binpatch {}", version);
            }
            Ok(())
        }
        Commands::Update => cmd_update(&cli, UpdateVariant::Full, None, json_output).await,
        Commands::PatchUpdate => cmd_update(&cli, UpdateVariant::Diff, None, json_output).await,
        Commands::Signed { action } => {
            let (variant, key) = match action {
                SignedAction::Update(args) => (UpdateVariant::SignedFull, &args.public_key),
                SignedAction::PatchUpdate(args) => (UpdateVariant::SignedDiff, &args.public_key),
            };
            cmd_update(&cli, variant, Some(key.as_path()), json_output).await
        }
        Commands::Upload {
            file,
            version,
            arch,
            os,
            signing_key,
            key_type,
        } => {
            let key = match signing_key {
                Some(path) => Some(SigningKey::parse(&read_key_file(path)?, *key_type)?),
                None => None,
            };
            cmd_upload(&cli, file, version, arch, os, key.as_ref(), json_output).await
        }
        Commands::PublicKey {
            signing_key,
            key_type,
        } => {
            let key = SigningKey::parse(&read_key_file(signing_key)?, *key_type)?;
            let public = key.public_key().to_text()?;
            if json_output {
                println!("{}", json!({ "public_key": public }));
            } else {
                println!("{}", public.trim_end());
            }
            Ok(())
        }
    }
}

async fn cmd_update(
    cli: &Cli,
    variant: UpdateVariant,
    public_key: Option<&Path>,
    json_output: bool,
) -> Result<()> {
    let config = cli
        .client_config()
        .context("Failed to locate the target executable")?;
    let mut client = PatchClient::new(config)?;
    if let Some(path) = public_key {
        client = client.with_public_key(PublicKey::parse(&read_key_file(path)?)?);
    }

    let outcome = client.run(variant).await?;
    let config = client.config();
    match outcome {
        UpdateOutcome::AlreadyCurrent => {
            if json_output {
                println!("{}", json!({ "status": "current", "version": config.current_version }));
            } else {
                CliFormatter::success(&format!(
                    "{} {} is already the latest version",
                    config.name, config.current_version
                ));
            }
        }
        UpdateOutcome::Updated { bytes } => {
            if json_output {
                println!(
                    "{}",
                    json!({
                        "status": "updated",
                        "target": config.target,
                        "bytes": bytes,
                        "variant": variant.route(),
                    })
                );
            } else {
                CliFormatter::success(&format!("Updated {}", config.target.display()));
                CliFormatter::kv("Size", &format_size(bytes as u64));
                CliFormatter::kv("Via", variant.route());
            }
        }
    }
    Ok(())
}

async fn cmd_upload(
    cli: &Cli,
    file: &Path,
    version: &str,
    arch: &str,
    os: &str,
    signing_key: Option<&SigningKey>,
    json_output: bool,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = match &cli.name {
        Some(name) => name.clone(),
        None => file
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Cannot derive an application name from the file; pass --name")?,
    };

    let signature = signing_key.map(|key| key.sign(&data));
    let upload = UploadData {
        data,
        version: version.to_string(),
        arch: arch.to_string(),
        os: os.to_string(),
        signature,
        signature_type: signing_key.map(|key| key.signature_type().to_string()),
    };

    if !json_output {
        CliFormatter::info(&format!(
            "Uploading {} ({}) as {} {}",
            file.display(),
            format_size(upload.data.len() as u64),
            name,
            version
        ));
    }
    let fetcher = Fetcher::new(&cli.server, std::time::Duration::from_secs(cli.timeout_secs))?;
    let response = fetcher.upload(&name, &upload).await?;

    if json_output {
        println!("{}", json!({ "status": "uploaded", "message": response.message }));
    } else {
        CliFormatter::success(&response.message);
    }
    Ok(())
}
