//! CLI argument definitions using clap
//!
//! Commands:
//! - quarry compile --schema <path> [--target cursor|statement]
//! - quarry explain --schema <path> [--target cursor|statement]

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// quarry - query compiler and transaction scheduler
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Plan a query description compiles to
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Cursor,
    Statement,
}

impl Target {
    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Cursor => "cursor",
            Target::Statement => "statement",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a query description read from stdin
    Compile {
        /// Path to the schema file
        #[arg(long, default_value = "./schema.json")]
        schema: PathBuf,

        #[arg(long, value_enum, default_value_t = Target::Cursor)]
        target: Target,
    },

    /// Explain how a query description read from stdin compiles
    Explain {
        /// Path to the schema file
        #[arg(long, default_value = "./schema.json")]
        schema: PathBuf,

        #[arg(long, value_enum, default_value_t = Target::Cursor)]
        target: Target,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compile() {
        let args = ["quarry", "compile", "--schema", "s.json", "--target", "statement"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Compile { schema, target } => {
                assert_eq!(schema, PathBuf::from("s.json"));
                assert_eq!(target, Target::Statement);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_explain_defaults_to_cursor() {
        let cli = Cli::try_parse_from(["quarry", "explain"]).unwrap();
        assert!(matches!(cli.command, Command::Explain { target: Target::Cursor, .. }));
    }

    #[test]
    fn test_unknown_target_rejected() {
        assert!(Cli::try_parse_from(["quarry", "compile", "--target", "sql"]).is_err());
    }
}
