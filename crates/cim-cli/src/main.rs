//! `cimbios` command line tool
//!
//! # Usage
//!
//! ```bash
//! # Object count per class
//! cimbios stats --schema cim.json grid.nt
//!
//! # Re-encode, codec chosen by extension
//! cimbios convert --schema cim.json grid.nt grid.jsonld
//!
//! # Replay a saved difference onto a baseline
//! cimbios diff-apply --schema cim.json base.nt changes.nt merged.nt
//! ```

mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CIM model file tools
#[derive(Parser, Debug)]
#[command(name = "cimbios")]
#[command(about = "Inspect, convert and patch CIM model files")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count objects per class
    Stats {
        #[command(flatten)]
        model: ModelArgs,

        /// Model file
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-encode a model file
    Convert {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Source file
        input: PathBuf,

        /// Destination file
        output_path: PathBuf,
    },

    /// Apply a saved difference to a baseline model
    DiffApply {
        #[command(flatten)]
        model: ModelArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Baseline model file
        base: PathBuf,

        /// Difference file
        diff: PathBuf,

        /// Destination file
        output_path: PathBuf,
    },
}

/// Identifier scheme of the model's objects
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OidScheme {
    /// RFC 4122 UUIDs
    Uuid,
    /// Free-form text
    Text,
}

/// Schema and identifier options shared by every command
#[derive(Args, Debug)]
struct ModelArgs {
    /// JSON schema description
    #[arg(short, long)]
    schema: PathBuf,

    /// Identifier scheme
    #[arg(long, value_enum, default_value = "uuid")]
    oids: OidScheme,

    /// Namespace prefix of object IRIs
    #[arg(long)]
    namespace: Option<String>,

    /// Ignore classes and properties missing from the schema
    #[arg(long)]
    skip_unknown: bool,
}

/// Output layout options
#[derive(Args, Debug)]
struct OutputArgs {
    /// Write each association from one side only
    #[arg(long)]
    no_inverse: bool,

    /// Order objects by identifier
    #[arg(long)]
    sort: bool,

    /// Single-line output where the format allows it
    #[arg(long)]
    compact: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Command::Stats { model, input, json } => commands::stats(&model, &input, json),
        Command::Convert {
            model,
            output,
            input,
            output_path,
        } => commands::convert(&model, &output, &input, &output_path),
        Command::DiffApply {
            model,
            output,
            base,
            diff,
            output_path,
        } => commands::diff_apply(&model, &output, &base, &diff, &output_path),
    }
}
