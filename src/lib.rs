//! pyground - a practice pad for learner Python programs
//!
//! pyground runs a program with a restricted set of builtins, feeds
//! `input()` from a queue of prepared lines and captures everything the
//! program writes. Faults never escape: they come back as traceback text in
//! the captured stderr.
//!
//! # Example
//!
//! ```
//! let (stdout, stderr) = pyground::run("name = input()\nprint('Hi', name)\n", "Ada\n");
//! assert_eq!(stdout, "Hi Ada\n");
//! assert_eq!(stderr, "");
//! ```
//!
//! The restriction keeps practice programs away from files and imports; it is
//! not a security boundary for hostile code.

pub mod cli;
pub mod engine;
pub mod error;
pub mod output;
pub mod parser;
pub mod repl;
pub mod sandbox;
pub mod script;
pub mod security;

pub use error::{PygroundError, Result};
pub use output::{format_report, OutputFormat};
pub use parser::{parse_program, Program, SyntaxError};
pub use sandbox::{run, InterruptHandle, Outcome, RunReport, Sandbox, SandboxConfig};
pub use script::{validate_program, ProgramIssue, ProgramRunner};
