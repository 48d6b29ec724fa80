//! sitepack CLI entry point.

use clap::{Parser, Subcommand};
use sitepack::config::SitepackConfig;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;

/// sitepack - self-contained web application installers
#[derive(Parser, Debug)]
#[command(name = "sitepack")]
#[command(about = "Build self-contained web application installers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an installer from a published site directory.
    Pack(cli::pack::PackCmd),

    /// Show the payload embedded in an installer.
    Inspect(cli::inspect::InspectCmd),

    /// Extract an installer's payload into a directory.
    Extract(cli::extract::ExtractCmd),

    /// List installed applications.
    #[command(alias = "ls")]
    List(cli::list::ListCmd),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = sitepack::VERSION, "starting sitepack");

    let config = match SitepackConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            SitepackConfig::default()
        }
    };

    let result = match cli.command {
        Commands::Pack(cmd) => cmd.run(&config),
        Commands::Inspect(cmd) => cmd.run(),
        Commands::Extract(cmd) => cmd.run(),
        Commands::List(cmd) => cmd.run(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sitepack=warn,sitepack_pack=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
