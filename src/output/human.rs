//! Human-readable output formatting

use crate::sandbox::{Outcome, RunReport};
use crate::script::ProgramIssue;

pub fn report_summary(report: &RunReport) -> String {
    let exit = match report.outcome {
        Outcome::Completed | Outcome::Terminated => String::new(),
        other => format!(" (exit code {})", other.exit_code()),
    };
    format!(
        "--- {} in {} ms at {}{} ---",
        report.outcome,
        report.elapsed_ms,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        exit
    )
}

pub fn issues_text(issues: &[ProgramIssue]) -> String {
    if issues.is_empty() {
        return "No issues found".to_string();
    }
    let mut output = String::new();
    for issue in issues {
        output.push_str(&issue.to_string());
        output.push('\n');
    }
    output.push_str(&format!(
        "\n{} issue{} found",
        issues.len(),
        if issues.len() == 1 { "" } else { "s" }
    ));
    output
}

/// Names laid out in columns, four to a row
pub fn names_text(names: &[&str]) -> String {
    let width = names.iter().map(|n| n.len()).max().unwrap_or(0) + 2;
    names
        .chunks(4)
        .map(|row| {
            row.iter()
                .map(|name| format!("{:<width$}", name, width = width))
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::IssueSeverity;

    #[test]
    fn test_issues_text() {
        assert_eq!(issues_text(&[]), "No issues found");
        let issues = vec![ProgramIssue {
            line: 3,
            message: "class 'A' cannot be defined in the sandbox".to_string(),
            severity: IssueSeverity::Error,
        }];
        assert_eq!(
            issues_text(&issues),
            "ERROR (line 3): class 'A' cannot be defined in the sandbox\n\n1 issue found"
        );
    }

    #[test]
    fn test_names_text_columns() {
        let text = names_text(&["abs", "all", "any", "bool", "bytes"]);
        assert_eq!(text, "abs    all    any    bool\nbytes");
    }
}
