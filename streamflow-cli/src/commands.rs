//! CLI command implementations

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Subcommand;
use streamflow_core::StreamflowConfig;
use streamflow_core::engine::{Catalog, spawn_simulated_swarm};
use streamflow_core::streaming::{SubtitleFormat, normalize};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server backed by the simulated swarm
    Server {
        /// Host to bind to
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory whose files and subdirectories the swarm serves
        #[arg(long, default_value = "content")]
        content_dir: PathBuf,
        /// Simulated download rate in bytes per second
        #[arg(long)]
        download_rate: Option<u64>,
    },
    /// List the magnet links the simulated swarm can serve
    Catalog {
        /// Directory whose files and subdirectories the swarm serves
        #[arg(long, default_value = "content")]
        content_dir: PathBuf,
    },
    /// Convert a subtitle file for browser playback and print it
    Subtitle {
        /// Path to a .srt, .vtt, .ass, .ssa or .sub file
        file: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            host,
            port,
            content_dir,
            download_rate,
        } => start_server(host, port, &content_dir, download_rate).await,
        Commands::Catalog { content_dir } => list_catalog(&content_dir).await,
        Commands::Subtitle { file } => convert_subtitle(&file).await,
    }
}

/// Start the API server with a simulated swarm seeded from `content_dir`
async fn start_server(
    host: Option<IpAddr>,
    port: Option<u16>,
    content_dir: &Path,
    download_rate: Option<u64>,
) -> anyhow::Result<()> {
    let mut config = StreamflowConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(rate) = download_rate {
        config.simulation.download_rate = rate;
    }

    let catalog = load_catalog(content_dir).await?;
    if catalog.is_empty() {
        tracing::warn!("No content found in {}", content_dir.display());
    }
    for entry in catalog.entries() {
        tracing::info!("Serving {}: {}", entry.name, entry.magnet_uri());
    }

    let swarm = spawn_simulated_swarm(config.simulation.clone(), catalog);
    streamflow_web::run_server(config, Arc::new(swarm.clone()))
        .await
        .map_err(|e| anyhow::anyhow!("Server failed: {e}"))?;

    if let Err(e) = swarm.shutdown().await {
        tracing::debug!("Simulated swarm already stopped: {e}");
    }
    Ok(())
}

/// Print every catalog entry with its magnet link
async fn list_catalog(content_dir: &Path) -> anyhow::Result<()> {
    let catalog = load_catalog(content_dir).await?;
    if catalog.is_empty() {
        println!("No content found in {}", content_dir.display());
        return Ok(());
    }

    for entry in catalog.entries() {
        let size: u64 = entry.files.iter().map(|file| file.length).sum();
        println!("{} ({} files, {size} bytes)", entry.name, entry.files.len());
        println!("  {}", entry.magnet_uri());
    }
    Ok(())
}

/// Print a subtitle file normalized for browser playback
async fn convert_subtitle(file: &Path) -> anyhow::Result<()> {
    let path = file.to_string_lossy();
    let Some(format) = SubtitleFormat::from_path(&path) else {
        bail!("Unsupported subtitle format: {}", file.display());
    };

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let subtitle = normalize(format, &bytes);

    tracing::debug!(
        "Converted {} ({} bytes) to {}",
        file.display(),
        bytes.len(),
        subtitle.content_type
    );
    print!("{}", subtitle.text);
    Ok(())
}

async fn load_catalog(content_dir: &Path) -> anyhow::Result<Catalog> {
    Catalog::from_directory(content_dir)
        .await
        .with_context(|| format!("Failed to load content from {}", content_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_convert_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        tokio::fs::write(&file, "hello").await.unwrap();

        assert!(convert_subtitle(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_catalog_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();

        assert!(load_catalog(&dir.path().join("missing")).await.is_err());
    }
}
