//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sqlvein")]
#[command(author, version, about = "Column-level SQL lineage with readable transformation logic")]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Extract enhanced column lineage from SQL query files
    Query {
        /// SQL files to analyze (supports glob patterns)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Data platform (postgres, mysql, hive, ...)
        #[arg(short, long, default_value = "postgres")]
        platform: String,

        /// Default database for unqualified table names
        #[arg(short = 'd', long)]
        database: Option<String>,

        /// Default schema for unqualified table names
        #[arg(short = 's', long)]
        schema: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Leave definition references (CTEs, derived tables) unexpanded
        #[arg(long)]
        no_expand: bool,

        /// Leave table aliases unresolved
        #[arg(long)]
        no_aliases: bool,

        /// Maximum nested definition expansion depth
        #[arg(long, default_value = "5")]
        max_depth: usize,

        /// Output format
        #[arg(short, long, default_value = "human", value_enum)]
        format: OutputFormat,
    },

    /// Decompose a stored procedure and extract per-node lineage
    Procedure {
        /// File containing the procedure body
        file: PathBuf,

        /// Procedure name (defaults to the file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Data platform (postgres, mysql, hive, ...)
        #[arg(short, long, default_value = "postgres")]
        platform: String,

        /// Default database for unqualified table names
        #[arg(short = 'd', long)]
        database: Option<String>,

        /// Default schema for unqualified table names
        #[arg(short = 's', long)]
        schema: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "human", value_enum)]
        format: OutputFormat,
    },

    /// Parse SQL and display the AST (for debugging)
    Parse {
        /// SQL file to parse
        file: PathBuf,

        /// Data platform (postgres, mysql, hive, ...)
        #[arg(short, long, default_value = "postgres")]
        platform: String,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// Pretty-printed JSON
    Json,
    /// One JSON fact per line (sink wire format)
    JsonLines,
}
