//! CLI argument definitions using clap
//!
//! Commands:
//! - aeroquery find --data <docs.json> --collection <name> --query <json>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// aeroquery - multi-plan query cursor over an in-memory document store
#[derive(Parser, Debug)]
#[command(name = "aeroquery")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load documents and run one query against them
    Find(FindArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FindArgs {
    /// JSON file holding an array of documents
    #[arg(long)]
    pub data: PathBuf,

    /// Namespace the documents are loaded into
    #[arg(long, default_value = "test.data")]
    pub collection: String,

    /// Field to build an ascending index on (repeatable)
    #[arg(long = "index")]
    pub indexes: Vec<String>,

    /// Field to build a 2d index on (repeatable)
    #[arg(long = "geo-index")]
    pub geo_indexes: Vec<String>,

    /// Query document
    #[arg(long, default_value = "{}")]
    pub query: String,

    /// Order document, e.g. {"a": 1} or {"$natural": -1}
    #[arg(long)]
    pub sort: Option<String>,

    /// Print the plan explain instead of a summary line
    #[arg(long)]
    pub explain: bool,

    /// Cursor configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Also log per-step TRACE events (yields, clause starts)
    #[arg(long, short)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
