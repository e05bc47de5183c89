use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use courier::Courier;

/// Multi-tenant outbound mail relay daemon
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Run the courier mail relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "courier.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = std::env::var("COURIER_CONFIG")
        .map_or(cli.config, PathBuf::from);

    let raw = if config_path.exists() {
        std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?
    } else {
        // No file: run on defaults, overridable through the environment.
        String::new()
    };

    let mut courier = Courier::from_toml(&raw)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    courier.apply_env();

    courier.run().await
}
