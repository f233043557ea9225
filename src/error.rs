//! Error types for pyground
//!
//! These cover host-level failures only. A program that raises, times out or
//! fails to parse while running inside the sandbox is reported through the
//! captured stderr of its [`RunReport`](crate::sandbox::RunReport) instead.

use thiserror::Error;

use crate::parser::SyntaxError;

#[derive(Error, Debug)]
pub enum PygroundError {
    #[error("Parse error: {0}")]
    Parse(#[from] SyntaxError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sandbox error: {0}")]
    Sandbox(String),
}

pub type Result<T> = std::result::Result<T, PygroundError>;
