//! CLI command definitions
//!
//! Defines the clap commands for the restify CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::scenario::{EvaluatorKind, Format};

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test scenario against its target API
    Run {
        /// Path to the scenario file (YAML or JSON)
        path: PathBuf,

        /// Expression evaluator to use (overrides the config file)
        #[arg(long, value_enum)]
        evaluator: Option<EvaluatorKind>,

        /// Print the results as JSON instead of a summary
        #[arg(long)]
        json: bool,

        /// Configuration file to use instead of the default one
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse a scenario file and list its cases in execution order
    Check {
        /// Path to the scenario file (YAML or JSON)
        path: PathBuf,
    },

    /// Re-encode a scenario file as JSON or YAML
    Convert {
        /// Path to the scenario file (YAML or JSON)
        path: PathBuf,

        /// Target encoding
        #[arg(long, value_enum)]
        to: Format,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}
