//! stowage CLI: inspect and move blobs of a configured storage backend.
//!
//! Usage:
//!   stowage --storage s3://bucket/prefix put <KEY> <FILE>
//!   stowage --storage s3://bucket/prefix get <KEY> <DEST>
//!   stowage --storage gs://bucket exists <KEY>
//!   stowage --storage az://container rm <KEY>
//!   stowage --config storage.json ls [PREFIX]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stowage_core::config::StorageConfig;
use stowage_core::{Format, Payload, Result, StowError};
use stowage_storage::Storage;

/// stowage - blob storage for pipeline artifacts
#[derive(Parser)]
#[command(name = "stowage")]
#[command(version)]
#[command(about = "Inspect and move blobs of a stowage storage backend", long_about = None)]
struct Cli {
    /// Storage URI: local:///path, s3://bucket/prefix, gs://bucket/prefix, az://container/prefix
    #[arg(long, env = "STOWAGE_STORAGE", conflicts_with = "config")]
    storage: Option<String>,

    /// JSON storage configuration file
    #[arg(long, env = "STOWAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the parent folder prepended to every key
    #[arg(long)]
    parent_folder: Option<String>,

    /// Multipart chunk size in bytes for uploads
    #[arg(long)]
    chunk_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file
    Put {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Download a blob into a local file
    Get {
        #[arg(value_name = "KEY")]
        key: String,

        #[arg(value_name = "DEST")]
        dest: PathBuf,
    },

    /// Print whether a blob exists
    Exists {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Delete a blob and its local staging files
    Rm {
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// List keys under a prefix
    Ls {
        #[arg(value_name = "PREFIX", default_value = "")]
        prefix: String,
    },
}

fn load_config(cli: &Cli) -> Result<StorageConfig> {
    let mut config = match (&cli.storage, &cli.config) {
        (Some(uri), _) => StorageConfig::from_uri(uri)?,
        (None, Some(path)) => StorageConfig::from_json_file(path)?,
        (None, None) => {
            return Err(StowError::Config {
                message: "either --storage or --config is required".to_string(),
            })
        }
    };
    if let Some(parent_folder) = &cli.parent_folder {
        config.parent_folder = parent_folder.clone();
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = Some(chunk_size);
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let storage = Storage::from_config(&config).await?;

    match cli.command {
        Commands::Put { key, file } => {
            storage
                .save(&key, &Payload::File(file.clone()), Format::File, None)
                .await?;
            info!(key = %key, file = %file.display(), "Uploaded");
        }
        Commands::Get { key, dest } => {
            let staged = storage.load(&key, Format::File, None, None).await?.into_file()?;
            let copied = fs::copy(&staged, &dest).await.map_err(|e| {
                StowError::storage(format!("Failed to write {}", dest.display()), e)
            });
            fs::remove_file(&staged).await.map_err(|e| {
                StowError::storage(format!("Failed to remove {}", staged.display()), e)
            })?;
            let bytes = copied?;
            info!(key = %key, dest = %dest.display(), bytes, "Downloaded");
        }
        Commands::Exists { key } => {
            println!("{}", storage.exists(&key).await?);
        }
        Commands::Rm { key } => {
            storage.delete(&key).await?;
            info!(key = %key, "Deleted");
        }
        Commands::Ls { prefix } => {
            for key in storage.list(&prefix).await? {
                println!("{key}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(config: &std::path::Path, args: &[&str]) -> Cli {
        let mut argv = vec!["stowage", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[tokio::test]
    async fn test_get_leaves_other_staged_copies() {
        let tmp = TempDir::new().unwrap();
        let staging = tmp.path().join("staging");
        let config = StorageConfig::local(tmp.path().join("blobs")).with_staging_dir(&staging);
        let config_path = tmp.path().join("storage.json");
        std::fs::write(&config_path, serde_json::to_string(&config).unwrap()).unwrap();

        let source = tmp.path().join("report.csv");
        std::fs::write(&source, "a,b\n1,2\n").unwrap();
        run(cli(&config_path, &["put", "reports/q1", source.to_str().unwrap()]))
            .await
            .unwrap();

        // A copy another caller loaded earlier and still holds.
        let storage = Storage::from_config(&config).await.unwrap();
        let held = storage
            .load("reports/q1", Format::File, None, None)
            .await
            .unwrap()
            .into_file()
            .unwrap();

        let dest = tmp.path().join("out/q1.csv");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        run(cli(&config_path, &["get", "reports/q1", dest.to_str().unwrap()]))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "a,b\n1,2\n");
        assert!(held.exists());
        assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 1);
    }
}
