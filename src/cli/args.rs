//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pyground")]
#[command(author, version, about = "Run practice Python programs in a captured sandbox", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubCommand,

    /// Output format as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output and debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Time limit per run in milliseconds (0 disables the limit)
    #[arg(long, global = true, env = "PYGROUND_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Maximum depth of nested calls
    #[arg(long, global = true, env = "PYGROUND_RECURSION_LIMIT", default_value_t = 1000)]
    pub recursion_limit: usize,

    /// Bytes of program output kept before the run is stopped
    #[arg(long, global = true, env = "PYGROUND_MAX_OUTPUT", default_value_t = 1 << 20)]
    pub max_output: usize,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Run a program and print what it wrote
    Run {
        /// Path to the program, or - to read it from stdin
        file: PathBuf,

        /// Input lines handed to input(), separated by newlines
        #[arg(long, conflicts_with = "stdin_file")]
        stdin: Option<String>,

        /// File whose lines are handed to input()
        #[arg(long, value_name = "PATH")]
        stdin_file: Option<PathBuf>,
    },

    /// Parse and check a program without running it
    Check {
        /// Path to the program, or - to read it from stdin
        file: PathBuf,
    },

    /// List the names a program can use without defining them
    Builtins,

    /// Start interactive mode
    Repl,
}
