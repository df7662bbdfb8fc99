// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flotilla - multi-device bulk messaging dispatcher.
//!
//! This is the binary entry point. `serve` runs the engine until a signal
//! arrives; the other subcommands run one engine operation and exit.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod ops;
mod serve;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flotilla_config::FlotillaConfig;

/// Flotilla - multi-device bulk messaging dispatcher.
#[derive(Parser, Debug)]
#[command(name = "flotilla", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatch engine until interrupted.
    Serve,
    /// Show queue counts and live broadcast locks.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Run one stuck-message sweep.
    Reclaim,
    /// Re-queue failed messages as fresh attempts.
    Retry {
        #[arg(long, conflicts_with = "sequence")]
        campaign: Option<String>,
        #[arg(long)]
        sequence: Option<String>,
    },
    /// Enroll a contact into a sequence.
    Enroll {
        #[arg(long)]
        contact: String,
        #[arg(long)]
        sequence: String,
        /// Trigger label to consume from the contact on success.
        #[arg(long)]
        trigger: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> FlotillaConfig {
    let loaded = match path {
        Some(path) => flotilla_config::load_and_validate_path(path),
        None => flotilla_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            flotilla_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref());
    serve::init_tracing(&config.engine.log_level);

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Status { json }) => status::run_status(&config, json).await,
        Some(Commands::Reclaim) => ops::run_reclaim(config).await,
        Some(Commands::Retry { campaign, sequence }) => {
            ops::run_retry(config, campaign, sequence).await
        }
        Some(Commands::Enroll {
            contact,
            sequence,
            trigger,
        }) => ops::run_enroll(config, contact, sequence, trigger).await,
        None => {
            println!("flotilla: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["flotilla", "retry", "--campaign", "k1"]).unwrap();
        match cli.command {
            Some(Commands::Retry { campaign, sequence }) => {
                assert_eq!(campaign.as_deref(), Some("k1"));
                assert!(sequence.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "flotilla", "enroll", "--contact", "c1", "--sequence", "s1", "--config", "f.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("f.toml")));
        assert!(matches!(cli.command, Some(Commands::Enroll { trigger: None, .. })));
    }

    #[test]
    fn retry_scopes_are_exclusive() {
        let parsed =
            Cli::try_parse_from(["flotilla", "retry", "--campaign", "k1", "--sequence", "s1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = flotilla_config::load_and_validate_str("")
            .expect("default config should be valid");
        assert_eq!(config.engine.name, "flotilla");
    }
}
