//! REPL module for interactive mode

pub mod session;

#[cfg(feature = "repl")]
pub mod interactive;

#[cfg(feature = "repl")]
pub use interactive::run_repl;

pub use session::{ReplCommand, ReplSession, Reply};

#[cfg(not(feature = "repl"))]
pub fn run_repl(_runner: crate::script::ProgramRunner) -> crate::error::Result<()> {
    Err(crate::error::PygroundError::Sandbox(
        "REPL not enabled. Rebuild with --features repl".to_string(),
    ))
}
