//! Command-line interface

pub mod args;

pub use args::{Args, SubCommand};

use std::time::Duration;

use crate::sandbox::SandboxConfig;

impl Args {
    /// Sandbox configuration selected by the global flags
    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
            recursion_limit: self.recursion_limit,
            max_output: self.max_output,
            ..SandboxConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_run_arguments() {
        let args = Args::try_parse_from([
            "pyground",
            "run",
            "prog.py",
            "--stdin",
            "86",
            "--timeout-ms",
            "0",
        ])
        .unwrap();
        assert!(matches!(
            &args.command,
            SubCommand::Run { stdin: Some(text), stdin_file: None, .. } if text == "86"
        ));
        assert_eq!(args.sandbox_config().timeout, None);
    }

    #[test]
    fn test_stdin_sources_conflict() {
        let result = Args::try_parse_from([
            "pyground",
            "run",
            "prog.py",
            "--stdin",
            "1",
            "--stdin-file",
            "input.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["pyground", "builtins"]).unwrap();
        let config = args.sandbox_config();
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.recursion_limit, 1000);
        assert_eq!(config.max_output, 1 << 20);
    }
}
