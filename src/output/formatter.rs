//! Output formatting

use crate::output::human;
use crate::output::json;
use crate::parser::Program;
use crate::sandbox::RunReport;
use crate::script::ProgramIssue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Metadata line for a run; the captured streams are echoed separately
pub fn format_report(report: &RunReport, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => human::report_summary(report),
        OutputFormat::Json => json::report_json(report),
    }
}

pub fn format_issues(issues: &[ProgramIssue], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => human::issues_text(issues),
        OutputFormat::Json => json::issues_json(issues),
    }
}

pub fn format_program(program: &Program) -> String {
    json::program_json(program)
}

pub fn format_builtins(names: &[&str], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Human => human::names_text(names),
        OutputFormat::Json => json::names_json(names),
    }
}
