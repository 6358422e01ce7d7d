mod commands;
mod config;
mod registry;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, command output to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let registry = config.load_registry()?;
    debug!("Configured backends: {}", registry.aliases().join(", "));
    let backend = registry.get(&config.alias)?;

    let output = commands::run(backend.as_ref(), config.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
