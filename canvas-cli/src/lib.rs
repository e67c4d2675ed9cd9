//! # Canvas CLI
//!
//! Command-line host for the canvas mutation engine.
//!
//! ## Usage
//!
//! ```bash
//! canvas-cli compile model.json --html
//! canvas-cli validate ops.json --model model.json
//! canvas-cli save home model.json --data-dir ./documents
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `CliConfig` - Resolved configuration: engine settings, data directory
//! - `commands` - One function per subcommand, each returning a serializable report

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

mod commands;

pub use commands::{compile, load, save, validate, CliError, CompileOutput, SaveOutput};

use std::path::PathBuf;

use canvas_engine::EngineConfig;
use clap::{Parser, Subcommand};

/// Command-line arguments for canvas-cli.
#[derive(Debug, Clone, Parser)]
#[command(name = "canvas-cli")]
#[command(about = "Compile and validate canvas element models")]
#[command(version)]
pub struct CliArgs {
    /// Engine configuration file (JSON); unset fields keep their defaults
    #[arg(long, env = "CANVAS_ENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding persisted element models
    #[arg(long, env = "CANVAS_DATA_DIR", default_value = ".canvas")]
    pub data_dir: PathBuf,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Compile an element model against an empty document and print the operations
    Compile {
        /// Element model file (JSON)
        model: PathBuf,
        /// Also print the resulting document markup
        #[arg(long)]
        html: bool,
    },
    /// Validate an operation batch produced by an AI collaborator
    Validate {
        /// Operation batch file (JSON array)
        ops: PathBuf,
        /// Element model used for z-index and overlap checks
        #[arg(long)]
        model: Option<PathBuf>,
    },
    /// Persist an element model under a document id
    Save {
        /// Document id
        document: String,
        /// Element model file (JSON)
        model: PathBuf,
    },
    /// Print a persisted element model
    Show {
        /// Document id
        document: String,
    },
}

/// Resolved CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Engine configuration file, if any.
    pub config_path: Option<PathBuf>,
    /// Directory holding persisted element models.
    pub data_dir: PathBuf,
    /// Subcommand to run.
    pub command: Command,
}

impl From<CliArgs> for CliConfig {
    fn from(args: CliArgs) -> Self {
        Self {
            config_path: args.config,
            data_dir: args.data_dir,
            command: args.command,
        }
    }
}

impl CliConfig {
    /// Load the engine configuration, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or
    /// describes an inconsistent configuration.
    pub fn engine_config(&self) -> Result<EngineConfig, CliError> {
        let config = match &self.config_path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|source| CliError::Read {
                    path: path.clone(),
                    source,
                })?;
                EngineConfig::from_json(&json)?
            }
            None => EngineConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_compile_subcommand() {
        let args = CliArgs::try_parse_from(["canvas-cli", "compile", "model.json", "--html"])
            .expect("parse");
        let config = CliConfig::from(args);
        assert_eq!(config.data_dir, PathBuf::from(".canvas"));
        match config.command {
            Command::Compile { model, html } => {
                assert_eq!(model, PathBuf::from("model.json"));
                assert!(html);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_default_engine_config_without_file() {
        let args = CliArgs::try_parse_from(["canvas-cli", "show", "home"]).expect("parse");
        let engine = CliConfig::from(args).engine_config().expect("config");
        assert_eq!(engine, EngineConfig::default());
    }

    #[test]
    fn test_engine_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "observer": { "throttle_ms": 250 } }"#).expect("write");
        let args = CliArgs::try_parse_from([
            "canvas-cli",
            "--config",
            path.to_str().expect("utf-8 path"),
            "show",
            "home",
        ])
        .expect("parse");
        let engine = CliConfig::from(args).engine_config().expect("config");
        assert_eq!(engine.observer.throttle_ms, 250);
    }
}
