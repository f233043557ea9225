//! Syntax errors raised while reading a program

use serde::{Deserialize, Serialize};

/// Whether a syntax error came from indentation or from the statement itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyntaxErrorKind {
    Syntax,
    Indentation,
    /// Indentation whose meaning depends on the tab width
    Tab,
}

impl SyntaxErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SyntaxErrorKind::Syntax => "SyntaxError",
            SyntaxErrorKind::Indentation => "IndentationError",
            SyntaxErrorKind::Tab => "TabError",
        }
    }
}

/// A located syntax error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub message: String,
    /// 1-based line number in the program
    pub lineno: usize,
    /// 1-based column of the offending character
    pub offset: usize,
    /// Physical source line the error points at
    pub text: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, lineno: usize, offset: usize, text: &str) -> Self {
        Self {
            kind: SyntaxErrorKind::Syntax,
            message: message.into(),
            lineno,
            offset,
            text: text.to_string(),
        }
    }

    pub fn indentation(message: impl Into<String>, lineno: usize, text: &str) -> Self {
        Self {
            kind: SyntaxErrorKind::Indentation,
            message: message.into(),
            lineno,
            offset: text.len() - text.trim_start().len() + 1,
            text: text.to_string(),
        }
    }

    pub fn tab(lineno: usize, text: &str) -> Self {
        Self {
            kind: SyntaxErrorKind::Tab,
            ..Self::indentation("inconsistent use of tabs and spaces in indentation", lineno, text)
        }
    }

    /// Render the report shown for a program that failed to parse
    pub fn render(&self, filename: &str) -> String {
        let mut out = format!("  File \"{}\", line {}\n", filename, self.lineno);
        let stripped = self.text.trim_start();
        if !stripped.is_empty() {
            let removed = self.text.chars().count() - stripped.chars().count();
            let caret = self.offset.saturating_sub(removed + 1);
            let shown = stripped.trim_end();
            out.push_str(&format!("    {}\n", shown));
            if self.kind != SyntaxErrorKind::Tab {
                out.push_str(&format!("    {}^\n", " ".repeat(caret.min(shown.chars().count()))));
            }
        }
        out.push_str(&format!("{}: {}\n", self.kind.name(), self.message));
        out
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (line {})", self.kind.name(), self.message, self.lineno)
    }
}

impl std::error::Error for SyntaxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_points_at_column() {
        let err = SyntaxError::new("invalid syntax", 2, 9, "    x = = 1");
        assert_eq!(
            err.render("<string>"),
            "  File \"<string>\", line 2\n    x = = 1\n        ^\nSyntaxError: invalid syntax\n"
        );
    }

    #[test]
    fn test_indentation_error_name() {
        let err = SyntaxError::indentation("unexpected indent", 3, "  y = 2");
        assert!(err.render("<string>").ends_with("IndentationError: unexpected indent\n"));
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn test_tab_error_has_no_caret() {
        let err = SyntaxError::tab(3, "\tprint(x)");
        assert_eq!(
            err.render("<string>"),
            "  File \"<string>\", line 3\n    print(x)\nTabError: inconsistent use of tabs and spaces in indentation\n"
        );
    }
}
