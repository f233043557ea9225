//! Output formatting module

pub mod formatter;
pub mod human;
pub mod json;

pub use formatter::{format_builtins, format_issues, format_program, format_report, OutputFormat};
