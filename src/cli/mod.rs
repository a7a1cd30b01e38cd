//! CLI module for aeroquery
//!
//! Provides command-line interface for:
//! - find: Load a dataset, run one query, print results and plan details

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, FindArgs};
pub use commands::{find, load_config, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{parse_object_arg, read_documents, write_json_line};
