//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: execute the full lifecycle — build images, start containers,
//!   publish endpoints, run an optional wrapped command, tear down
//! - `validate`: load and check a descriptor without touching the engine

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::env;

#[derive(Debug, Parser)]
#[command(name = "stevedore")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Builds images and runs containers around an automated build, then tears everything down"
)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full lifecycle described by a descriptor file
    Run {
        /// Descriptor file
        #[arg(short = 'f', long = "file", default_value = env::DESCRIPTOR_FILE_NAME)]
        file: PathBuf,

        /// Engine host, overriding DOCKER_HOST and the default endpoint
        #[arg(long = "docker-host")]
        docker_host: Option<String>,

        /// Engine port paired with --docker-host
        #[arg(long = "docker-port")]
        docker_port: Option<u16>,

        /// Write endpoint properties to this file for the surrounding build
        #[arg(long = "endpoints-file")]
        endpoints_file: Option<PathBuf>,

        /// Command run between startup and teardown, e.g. the test suite
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Load a descriptor, validate it, and print the resulting plan
    Validate {
        /// Descriptor file
        #[arg(short = 'f', long = "file", default_value = env::DESCRIPTOR_FILE_NAME)]
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let args = Args::parse_from(["stevedore", "run"]);
        match args.command {
            Commands::Run {
                file,
                command,
                docker_host,
                ..
            } => {
                assert_eq!(file, PathBuf::from(env::DESCRIPTOR_FILE_NAME));
                assert!(command.is_empty());
                assert!(docker_host.is_none());
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_run_with_wrapped_command() {
        let args = Args::parse_from([
            "stevedore",
            "run",
            "-f",
            "it.toml",
            "--docker-host",
            "engine",
            "--",
            "cargo",
            "test",
        ]);
        match args.command {
            Commands::Run {
                file,
                docker_host,
                command,
                ..
            } => {
                assert_eq!(file, PathBuf::from("it.toml"));
                assert_eq!(docker_host.as_deref(), Some("engine"));
                assert_eq!(command, ["cargo", "test"]);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_validate() {
        let args = Args::parse_from(["stevedore", "validate", "--file", "ci/stevedore.toml"]);
        match args.command {
            Commands::Validate { file } => assert_eq!(file, PathBuf::from("ci/stevedore.toml")),
            other => panic!("expected validate, got {other:?}"),
        }
    }
}
