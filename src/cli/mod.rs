//! CLI interface using clap
//!
//! Provides the command-line interface for xformshift

mod commands;

pub use commands::*;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// xformshift - XForm schema migration tool
#[derive(Parser, Debug)]
#[command(name = "xformshift")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    pub path: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a workspace
    Init(InitArgs),

    /// Register a new form from its XForm definition
    Register(RegisterArgs),

    /// Store submitted answers for a form
    Submit(SubmitArgs),

    /// Preview how a new schema differs from the live one
    Compare(CompareArgs),

    /// Replace a form's schema and migrate its answers
    Update(UpdateArgs),

    /// Restore a form to an earlier version or its latest backup
    Restore(RestoreArgs),

    /// Show the version history of a form
    History(FormArgs),

    /// List the stored answers of a form
    Answers(FormArgs),

    /// Show workspace status
    Status,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Arguments for init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force re-initialization
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for register command
#[derive(Parser, Debug)]
pub struct RegisterArgs {
    /// XForm definition file
    pub schema: PathBuf,

    /// Free-text description of the form
    #[arg(short, long, default_value = "")]
    pub description: String,
}

/// Arguments for submit command
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Form id
    pub form: String,

    /// Answer XML files
    #[arg(required = true)]
    pub answers: Vec<PathBuf>,
}

/// Operator decisions, from the command line and/or a TOML file
#[derive(Parser, Debug, Default)]
pub struct DecisionArgs {
    /// Decision as key=value, e.g. determine_first_name=name (repeatable)
    #[arg(short, long = "decision", value_name = "KEY=VALUE")]
    pub decisions: Vec<String>,

    /// TOML file of decision keys and values
    #[arg(long)]
    pub decisions_file: Option<PathBuf>,
}

/// Arguments for compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Form id
    pub form: String,

    /// New XForm definition file
    pub schema: PathBuf,

    #[command(flatten)]
    pub decisions: DecisionArgs,
}

/// Arguments for update command
#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Form id
    pub form: String,

    /// New XForm definition file
    pub schema: PathBuf,

    #[command(flatten)]
    pub decisions: DecisionArgs,

    /// Skip the backup normally taken before migrating
    #[arg(long)]
    pub no_backup: bool,
}

/// Arguments for restore command
#[derive(Parser, Debug)]
#[command(disable_version_flag = true)]
pub struct RestoreArgs {
    /// Form id
    pub form: String,

    /// Version to restore
    #[arg(long)]
    pub version: Option<i64>,

    /// Restore the most recent backup
    #[arg(long)]
    pub last: bool,
}

/// Arguments naming a single form
#[derive(Parser, Debug)]
pub struct FormArgs {
    /// Form id
    pub form: String,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
