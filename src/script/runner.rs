//! Loading program files and feeding them to a sandbox

use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::error::{PygroundError, Result};
use crate::parser::parse_program;
use crate::sandbox::{InterruptHandle, RunReport, Sandbox};
use crate::script::validator::{validate_program, ProgramIssue};

/// Path that stands for the process's own stdin
pub const STDIN_PATH: &str = "-";

/// Runs program files through a [`Sandbox`]
#[derive(Debug, Clone, Default)]
pub struct ProgramRunner {
    sandbox: Sandbox,
    interrupt: InterruptHandle,
}

impl ProgramRunner {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox,
            interrupt: InterruptHandle::new(),
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Handle that stops whatever this runner is currently running
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Run program text with `stdin` as its input lines
    pub fn run_source(&self, source: &str, stdin: &str) -> RunReport {
        self.sandbox.run_with(source, stdin, &self.interrupt)
    }

    /// Load and run a program file
    pub fn run_file(&self, path: &Path, stdin: &str) -> Result<RunReport> {
        let source = load_source(path)?;
        debug!(path = %path.display(), bytes = source.len(), "loaded program");
        Ok(self.run_source(&source, stdin))
    }

    /// Parse and statically check a program file without running it
    pub fn check_file(&self, path: &Path) -> Result<Vec<ProgramIssue>> {
        let source = load_source(path)?;
        let program = parse_program(&source)?;
        Ok(validate_program(&program))
    }
}

/// Read program text from a file, or from stdin when the path is `-`
pub fn load_source(path: &Path) -> Result<String> {
    if path.as_os_str() == STDIN_PATH {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        return Ok(source);
    }
    Ok(fs::read_to_string(path)?)
}

/// Resolve the stdin payload from inline text or a file
pub fn stdin_payload(inline: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(_), Some(_)) => Err(PygroundError::Sandbox(
            "stdin may be given inline or as a file, not both".to_string(),
        )),
        (Some(text), None) => Ok(text.to_string()),
        (None, Some(path)) => Ok(fs::read_to_string(path)?),
        (None, None) => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_run_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = input('Name: ')\nprint('Hello,', name)").unwrap();

        let runner = ProgramRunner::default();
        let report = runner.run_file(file.path(), "Ada\n").unwrap();
        assert_eq!(report.stdout, "Name: Hello, Ada\n");
        assert_eq!(report.stderr, "");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let runner = ProgramRunner::default();
        let err = runner
            .run_file(Path::new("/definitely/not/here.py"), "")
            .unwrap_err();
        assert!(matches!(err, PygroundError::Io(_)));
    }

    #[test]
    fn test_check_file_reports_syntax_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "if True\n    print(1)").unwrap();
        let err = ProgramRunner::default().check_file(file.path()).unwrap_err();
        assert!(matches!(err, PygroundError::Parse(_)));
    }

    #[test]
    fn test_stdin_payload_sources() {
        assert_eq!(stdin_payload(None, None).unwrap(), "");
        assert_eq!(stdin_payload(Some("1\n2"), None).unwrap(), "1\n2");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "86").unwrap();
        assert_eq!(stdin_payload(None, Some(file.path())).unwrap(), "86\n");
        assert!(stdin_payload(Some("x"), Some(file.path())).is_err());
    }
}
