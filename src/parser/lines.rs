//! Logical line splitting
//!
//! Turns raw program text into logical lines: comments are dropped, lines are
//! joined inside brackets and after a trailing backslash, and the indentation
//! of each line is measured. Blank and comment-only lines disappear.

use crate::parser::error::SyntaxError;

/// Maximum bracket nesting accepted on one logical line.
pub const MAX_NESTING: usize = 200;

/// One logical line of source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based physical line where the logical line starts
    pub lineno: usize,
    /// Indentation width (tabs advance to the next multiple of 8)
    pub indent: usize,
    /// Statement text without indentation or comments
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
struct OpenString {
    quote: char,
    triple: bool,
    lineno: usize,
    col: usize,
}

/// Normalize line endings the way the tokenizer expects them
pub fn normalize_newlines(source: &str) -> String {
    source.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split program text into logical lines
pub fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, SyntaxError> {
    let source = normalize_newlines(source);
    let physical: Vec<&str> = source.split('\n').collect();

    let mut lines = Vec::new();
    let mut text = String::new();
    let mut start_line = 0;
    let mut indent = 0;
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut open_string: Option<OpenString> = None;
    let mut indents = IndentStack::default();

    for (idx, raw) in physical.iter().enumerate() {
        let lineno = idx + 1;
        let chars: Vec<char> = raw.chars().collect();
        let mut pos = 0;
        let mut escaped_newline = false;
        let mut continued = false;

        let starts_statement = text.is_empty() && open_string.is_none() && brackets.is_empty();
        if starts_statement {
            let (width, alt, offset) = measure_indent(&chars);
            let rest: String = chars[offset..].iter().collect();
            let trimmed = rest.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if !indents.consistent(width, alt) {
                return Err(SyntaxError::tab(lineno, raw));
            }
            indent = width;
            start_line = lineno;
            pos = offset;
        } else if open_string.is_none() {
            // Indentation of a continuation line is insignificant
            while pos < chars.len() && matches!(chars[pos], ' ' | '\t' | '\x0C') {
                pos += 1;
            }
        }
        while pos < chars.len() {
            let c = chars[pos];

            if let Some(open) = open_string {
                if c == '\\' {
                    text.push(c);
                    if pos + 1 < chars.len() {
                        text.push(chars[pos + 1]);
                        pos += 2;
                    } else {
                        text.push('\n');
                        escaped_newline = true;
                        pos += 1;
                    }
                    continue;
                }
                if c == open.quote {
                    if !open.triple {
                        text.push(c);
                        pos += 1;
                        open_string = None;
                        continue;
                    }
                    if pos + 2 < chars.len() && chars[pos + 1] == c && chars[pos + 2] == c {
                        text.push_str(&c.to_string().repeat(3));
                        pos += 3;
                        open_string = None;
                        continue;
                    }
                }
                text.push(c);
                pos += 1;
                continue;
            }

            match c {
                '#' => break,
                '"' | '\'' => {
                    let triple = pos + 2 < chars.len() && chars[pos + 1] == c && chars[pos + 2] == c;
                    open_string = Some(OpenString {
                        quote: c,
                        triple,
                        lineno,
                        col: pos + 1,
                    });
                    if triple {
                        text.push_str(&c.to_string().repeat(3));
                        pos += 3;
                    } else {
                        text.push(c);
                        pos += 1;
                    }
                }
                '(' | '[' | '{' => {
                    brackets.push((c, lineno));
                    if brackets.len() > MAX_NESTING {
                        return Err(SyntaxError::new(
                            "too many nested parentheses",
                            lineno,
                            pos + 1,
                            raw,
                        ));
                    }
                    text.push(c);
                    pos += 1;
                }
                ')' | ']' | '}' => {
                    match brackets.pop() {
                        Some((open, open_line)) if !brackets_match(open, c) => {
                            let message = if open_line == lineno {
                                format!(
                                    "closing parenthesis '{}' does not match opening parenthesis '{}'",
                                    c, open
                                )
                            } else {
                                format!(
                                    "closing parenthesis '{}' does not match opening parenthesis '{}' on line {}",
                                    c, open, open_line
                                )
                            };
                            return Err(SyntaxError::new(message, lineno, pos + 1, raw));
                        }
                        Some(_) => {}
                        None => {
                            return Err(SyntaxError::new(
                                format!("unmatched '{}'", c),
                                lineno,
                                pos + 1,
                                raw,
                            ));
                        }
                    }
                    text.push(c);
                    pos += 1;
                }
                '\\' if pos + 1 == chars.len() => {
                    continued = true;
                    pos += 1;
                }
                _ => {
                    text.push(c);
                    pos += 1;
                }
            }
        }

        if let Some(open) = open_string {
            if escaped_newline {
                continue;
            }
            if open.triple {
                text.push('\n');
                continue;
            }
            return Err(SyntaxError::new(
                format!("unterminated string literal (detected at line {})", lineno),
                open.lineno,
                open.col,
                raw,
            ));
        }

        if continued {
            if lineno == physical.len() {
                return Err(SyntaxError::new(
                    "unexpected EOF while parsing",
                    lineno,
                    chars.len(),
                    raw,
                ));
            }
            text.push(' ');
            continue;
        }

        if !brackets.is_empty() {
            text.push(' ');
            continue;
        }

        let statement = text.trim_end().to_string();
        text.clear();
        if !statement.is_empty() {
            lines.push(LogicalLine {
                lineno: start_line,
                indent,
                text: statement,
            });
        }
    }

    if let Some(open) = open_string {
        let line_text = physical.get(open.lineno - 1).copied().unwrap_or("");
        return Err(SyntaxError::new(
            format!(
                "unterminated triple-quoted string literal (detected at line {})",
                physical.len()
            ),
            open.lineno,
            1,
            line_text,
        ));
    }

    if let Some((open, open_line)) = brackets.last() {
        let line_text = physical.get(open_line - 1).copied().unwrap_or("");
        return Err(SyntaxError::new(
            format!("'{}' was never closed", open),
            *open_line,
            1,
            line_text,
        ));
    }

    Ok(lines)
}

/// Indentation measured with tabs as 8 columns and, alternatively, as 1
fn measure_indent(chars: &[char]) -> (usize, usize, usize) {
    let mut width = 0;
    let mut alt = 0;
    let mut offset = 0;
    for &c in chars {
        match c {
            ' ' => {
                width += 1;
                alt += 1;
            }
            '\t' => {
                width = (width / 8 + 1) * 8;
                alt += 1;
            }
            '\x0C' => {
                width = 0;
                alt = 0;
            }
            _ => break,
        }
        offset += 1;
    }
    (width, alt, offset)
}

/// Open indentation levels, each measured both ways.
///
/// A line is ambiguous when the two measurements order it differently
/// against the enclosing levels: its block structure would change with
/// the tab width.
#[derive(Debug)]
struct IndentStack {
    levels: Vec<(usize, usize)>,
}

impl Default for IndentStack {
    fn default() -> Self {
        Self { levels: vec![(0, 0)] }
    }
}

impl IndentStack {
    fn consistent(&mut self, width: usize, alt: usize) -> bool {
        let &(top, top_alt) = self.levels.last().unwrap_or(&(0, 0));
        if width > top {
            if alt <= top_alt {
                return false;
            }
            self.levels.push((width, alt));
            return true;
        }
        while self.levels.len() > 1 && self.levels.last().map_or(false, |&(w, _)| width < w) {
            self.levels.pop();
        }
        match self.levels.last() {
            Some(&(w, a)) if w == width => a == alt,
            // A dedent to an unknown level is reported by the block reader
            _ => true,
        }
    }
}

fn brackets_match(open: char, close: char) -> bool {
    matches!((open, close), ('(', ')') | ('[', ']') | ('{', '}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_blank_and_comment_lines() {
        let lines = logical_lines("x = 1\n\n   # note\ny = 2  # trailing\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "x = 1");
        assert_eq!(lines[1].text, "y = 2");
        assert_eq!(lines[1].lineno, 4);
    }

    #[test]
    fn test_measures_indentation() {
        let lines = logical_lines("if x:\n    y = 1\n\tz = 2\n").unwrap();
        assert_eq!(lines[0].indent, 0);
        assert_eq!(lines[1].indent, 4);
        assert_eq!(lines[2].indent, 8);
    }

    #[test]
    fn test_mixed_tabs_and_spaces() {
        // Eight spaces and one tab agree only when tabs are 8 wide
        let err = logical_lines("if True:\n        x = 1\n\ty = 2\n").unwrap_err();
        assert_eq!(err.kind, crate::parser::SyntaxErrorKind::Tab);
        assert_eq!(err.lineno, 3);
        let err = logical_lines("if True:\n    x = 1\n\tprint(x)\n").unwrap_err();
        assert_eq!(err.kind, crate::parser::SyntaxErrorKind::Tab);

        // Consistent use of either is fine, as is a tab after spaces at a deeper level
        assert!(logical_lines("if a:\n\tif b:\n\t\tx = 1\n\ty = 2\n").is_ok());
        assert!(logical_lines("if a:\n    if b:\n    \tx = 1\n    y = 2\n").is_ok());
    }

    #[test]
    fn test_joins_bracketed_lines() {
        let lines = logical_lines("total = sum([1,\n          2,  # two\n          3])\nprint(total)").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "total = sum([1, 2,   3])");
        assert_eq!(lines[1].lineno, 4);
    }

    #[test]
    fn test_backslash_continuation() {
        let lines = logical_lines("x = 1 + \\\n    2\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "x = 1 +  2");
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let lines = logical_lines("print('# not a comment')  # comment").unwrap();
        assert_eq!(lines[0].text, "print('# not a comment')");
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let lines = logical_lines("s = \"\"\"a\n# kept\nb\"\"\"\nprint(s)").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "s = \"\"\"a\n# kept\nb\"\"\"");
    }

    #[test]
    fn test_unterminated_string() {
        let err = logical_lines("x = 'abc\ny = 1").unwrap_err();
        assert!(err.message.contains("unterminated string literal"));
        assert_eq!(err.lineno, 1);
    }

    #[test]
    fn test_unmatched_bracket() {
        let err = logical_lines("x = 1)\n").unwrap_err();
        assert_eq!(err.message, "unmatched ')'");
        let err = logical_lines("x = (1,\n2\n").unwrap_err();
        assert_eq!(err.message, "'(' was never closed");
    }

    #[test]
    fn test_crlf_line_endings() {
        let lines = logical_lines("a = 1\r\nb = 2\r\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].text, "b = 2");
    }
}
