//! Per-run output sinks
//!
//! Each run writes into its own pair of buffers; nothing touches the host
//! process's stdout or stderr, so concurrent runs cannot interleave.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("output limit of {limit} bytes exceeded")]
pub struct OutputLimitExceeded {
    pub limit: usize,
}

/// Captured stdout and stderr of one run
#[derive(Debug, Clone, Default)]
pub struct OutputBuffers {
    stdout: String,
    stderr: String,
    /// Maximum bytes of program stdout
    limit: usize,
    exceeded: bool,
}

impl OutputBuffers {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Append program output, keeping whatever fits under the limit
    pub fn write_stdout(&mut self, text: &str) -> Result<(), OutputLimitExceeded> {
        let error = OutputLimitExceeded { limit: self.limit };
        if self.exceeded {
            return Err(error);
        }
        let room = self.limit.saturating_sub(self.stdout.len());
        if text.len() <= room {
            self.stdout.push_str(text);
            return Ok(());
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.stdout.push_str(&text[..cut]);
        self.exceeded = true;
        Err(error)
    }

    /// Append host-generated text such as the termination line
    pub fn append_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
    }

    /// Append a fault report
    pub fn write_stderr(&mut self, text: &str) {
        self.stderr.push_str(text);
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn into_parts(self) -> (String, String) {
        (self.stdout, self.stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_accumulate() {
        let mut buffers = OutputBuffers::new(64);
        buffers.write_stdout("hello ").unwrap();
        buffers.write_stdout("world\n").unwrap();
        buffers.write_stderr("oops\n");
        assert_eq!(buffers.stdout(), "hello world\n");
        assert_eq!(buffers.into_parts(), ("hello world\n".to_string(), "oops\n".to_string()));
    }

    #[test]
    fn test_limit_truncates_and_sticks() {
        let mut buffers = OutputBuffers::new(5);
        buffers.write_stdout("abc").unwrap();
        let err = buffers.write_stdout("defgh").unwrap_err();
        assert_eq!(err.to_string(), "output limit of 5 bytes exceeded");
        assert_eq!(buffers.stdout(), "abcde");
        assert!(buffers.write_stdout("").is_err());
    }

    #[test]
    fn test_limit_respects_char_boundaries() {
        let mut buffers = OutputBuffers::new(4);
        assert!(buffers.write_stdout("aé€").is_err());
        // 'a' is one byte, 'é' two and '€' three, so only "aé" fits
        assert_eq!(buffers.stdout(), "aé");
    }

    #[test]
    fn test_host_text_bypasses_limit() {
        let mut buffers = OutputBuffers::new(2);
        assert!(buffers.write_stdout("abc").is_err());
        buffers.append_stdout("SystemExit: done\n");
        assert_eq!(buffers.stdout(), "abSystemExit: done\n");
    }
}
