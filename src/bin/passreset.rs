use anyhow::{Context, Result};
use passreset::cli;
use rustls::crypto::ring;

#[tokio::main]
async fn main() -> Result<()> {
    // sqlx uses the process-wide rustls provider.
    ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))
        .context("TLS crypto provider initialization failed")?;

    let action = cli::start()?;

    action.execute().await?;

    Ok(())
}
