//! modelsnap launcher
//!
//! - `watch`: run the ingest loop until SIGINT/SIGTERM (or one pass with `--once`)
//! - `upload`: send one archive to the receiver
//! - `config`: print the resolved configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use modelsnap_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "modelsnap",
    version,
    about = "Watch a directory for 3D models, snapshot them and ship the snapshots"
)]
struct Cli {
    /// Enable verbose logging (debug to stderr and log file)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (default: ~/.modelsnap/config.toml)
    #[arg(long, global = true, env = "MODELSNAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a directory and process every new model exactly once
    Watch {
        /// Directory to watch (overrides `watch_dir`)
        #[arg(long)]
        watch_dir: Option<PathBuf>,

        /// Where batch directories are written (overrides `work_dir`)
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Full receiver URL (overrides `upload.host` and `upload.receiver_path`)
        #[arg(long)]
        endpoint: Option<String>,

        /// Accept any server certificate
        #[arg(long)]
        insecure: bool,

        /// Process what is in the directory now, wait for uploads, exit
        #[arg(long)]
        once: bool,
    },

    /// Upload one archive to the receiver
    Upload {
        /// Zip archive to send
        archive: PathBuf,

        /// Full receiver URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Accept any server certificate
        #[arg(long)]
        insecure: bool,
    },

    /// Print the resolved configuration
    Config {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

fn run_command(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Commands::Watch {
            watch_dir,
            work_dir,
            endpoint,
            insecure,
            once,
        } => {
            let overrides = cli::Overrides {
                watch_dir,
                work_dir,
                endpoint,
                insecure,
            };
            let config = cli::resolve_config(config_path.as_deref(), &overrides)?;
            cli::watch::run(config, once)
        }
        Commands::Upload {
            archive,
            endpoint,
            insecure,
        } => {
            let overrides = cli::Overrides {
                endpoint,
                insecure,
                ..Default::default()
            };
            let config = cli::resolve_config(config_path.as_deref(), &overrides)?;
            cli::upload::run(&config, &archive)
        }
        Commands::Config { json } => {
            let config = cli::resolve_config(config_path.as_deref(), &cli::Overrides::default())?;
            cli::config::run(&config, json)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "modelsnap",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:?}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_watch_flags() {
        let cli = Cli::try_parse_from([
            "modelsnap",
            "-v",
            "watch",
            "--watch-dir",
            "/tmp/in",
            "--endpoint",
            "https://10.0.0.2:7026/in",
            "--insecure",
            "--once",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Watch {
                watch_dir,
                endpoint,
                insecure,
                once,
                ..
            } => {
                assert_eq!(watch_dir, Some(PathBuf::from("/tmp/in")));
                assert_eq!(endpoint.as_deref(), Some("https://10.0.0.2:7026/in"));
                assert!(insecure);
                assert!(once);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn upload_requires_archive() {
        assert!(Cli::try_parse_from(["modelsnap", "upload"]).is_err());
    }
}
