//! JSON output formatting

use serde::Serialize;
use serde_json::json;

use crate::parser::Program;
use crate::sandbox::RunReport;
use crate::script::ProgramIssue;

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

pub fn report_json(report: &RunReport) -> String {
    pretty(report)
}

pub fn issues_json(issues: &[ProgramIssue]) -> String {
    pretty(&json!({ "issues": issues }))
}

pub fn program_json(program: &Program) -> String {
    pretty(program)
}

pub fn names_json(names: &[&str]) -> String {
    pretty(&json!({ "builtins": names }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use crate::script::IssueSeverity;

    #[test]
    fn test_report_json_fields() {
        let report = Sandbox::default().run("print(input())\n", "7\n");
        let value: serde_json::Value = serde_json::from_str(&report_json(&report)).unwrap();
        assert_eq!(value["stdout"], "7\n");
        assert_eq!(value["stderr"], "");
        assert_eq!(value["outcome"], "completed");
        assert!(value["started_at"].is_string());
    }

    #[test]
    fn test_issues_json() {
        let issues = vec![ProgramIssue {
            line: 1,
            message: "import of 'os' is not available in the sandbox".to_string(),
            severity: IssueSeverity::Error,
        }];
        let value: serde_json::Value = serde_json::from_str(&issues_json(&issues)).unwrap();
        assert_eq!(value["issues"][0]["severity"], "error");
        assert_eq!(value["issues"][0]["line"], 1);
    }
}
