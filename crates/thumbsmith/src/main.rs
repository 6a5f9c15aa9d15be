//! Thumbsmith CLI - upload photos and derive thumbnails asynchronously.
//!
//! Uploads land in a local blob store; a background worker picks their ids
//! off an in-process queue, derives a fixed-size thumbnail for each, and
//! links it back onto the photo record.
//!
//! # Usage
//!
//! ```bash
//! # Upload a directory and wait for every thumbnail
//! thumbsmith run ./photos/ --user alice
//!
//! # Inspect a photo and its thumbnail
//! thumbsmith info 65f1c0ffee0123456789abcd
//!
//! # Write the thumbnail to disk
//! thumbsmith export 65f1c0ffee0123456789abcd ./thumbs/
//!
//! # View configuration
//! thumbsmith config show
//! ```

use clap::{Parser, Subcommand};

mod cli;
mod logging;

/// Thumbsmith - asynchronous thumbnail pipeline for uploaded photos.
#[derive(Parser, Debug)]
#[command(name = "thumbsmith")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload images and run the thumbnail worker until every task settles
    Run(cli::run::RunArgs),

    /// Show a photo record and its linked thumbnail
    Info(cli::info::InfoArgs),

    /// Write a photo's thumbnail to a file
    Export(cli::export::ExportArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let config = match thumbsmith_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `thumbsmith config path`."
            );
            thumbsmith_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Thumbsmith v{}", thumbsmith_core::VERSION);

    match cli.command {
        Commands::Run(args) => cli::run::execute(args, config).await,
        Commands::Info(args) => cli::info::execute(args, config).await,
        Commands::Export(args) => cli::export::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "thumbsmith",
            "run",
            "./photos",
            "--user",
            "alice",
            "--concurrency",
            "8",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.user, "alice");
                assert_eq!(args.concurrency, Some(8));
                assert_eq!(args.paths.len(), 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_requires_input() {
        assert!(Cli::try_parse_from(["thumbsmith", "run"]).is_err());
        assert!(
            Cli::try_parse_from(["thumbsmith", "run", "--photo-id", "0123456789abcdef01234567"])
                .is_ok()
        );
    }
}
