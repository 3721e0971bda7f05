//! Request filter CLI.

use anyhow::Result;
use clap::Parser;
use geogate::{Config, Decision, FilterEngine};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "geogate")]
#[command(about = "Geolocation and reputation based request filter - classify source addresses against ordered block rules")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "geogate.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Decide for a single source address and exit
    #[arg(long, value_name = "IP")]
    check: Option<IpAddr>,

    /// Request path used with --check
    #[arg(long, default_value = "/")]
    path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let ip = match args.check {
        Some(ip) => ip,
        None => anyhow::bail!("nothing to do: pass --check <IP>, --validate or --print-config"),
    };

    let engine = FilterEngine::from_config(config).await?;

    match engine.decide(ip, &args.path).await {
        Decision::Allow => println!("{} {} -> allow", ip, args.path),
        Decision::Block { rule, response } => println!(
            "{} {} -> block ({}, status {})",
            ip,
            args.path,
            rule.as_str(),
            response.status_code
        ),
        Decision::LookupFailed { response } => println!(
            "{} {} -> lookup failed (status {})",
            ip, args.path, response.status_code
        ),
    }

    Ok(())
}
