//! CLI module for quarry
//!
//! Provides command-line interface for:
//! - compile: compile a query description to a cursor or statement plan
//! - explain: describe how a query description compiles

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Target};
pub use commands::{compile, compile_request, explain, explain_request, run, run_command};
pub use errors::{CliError, CliResult};
pub use io::{parse_request, read_request, write_response};
