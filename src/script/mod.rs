//! Program files: loading, static checks and running
//!
//! Handles reading programs from disk or stdin, validating them before
//! execution and handing them to the sandbox.

pub mod runner;
pub mod validator;

pub use runner::{load_source, stdin_payload, ProgramRunner, STDIN_PATH};
pub use validator::{has_errors, validate_program, IssueSeverity, ProgramIssue};
