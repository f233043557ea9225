//! Static checks run before a program is executed
//!
//! Statements the sandbox always refuses (`import`, `class`, `with`) are
//! errors. Names that are read but neither defined anywhere in the program
//! nor reachable through the builtins table are warnings, since they can
//! only end in a `NameError`.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::parser::{
    Arg, Comprehension, DictItem, Expr, FStringPart, FunctionDef, Program, Stmt, StmtKind, Target,
};
use crate::security::allowlist;

/// A problem found in a program before running it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramIssue {
    pub line: usize,
    pub message: String,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ProgramIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            IssueSeverity::Error => "ERROR",
            IssueSeverity::Warning => "WARNING",
        };
        write!(f, "{} (line {}): {}", prefix, self.line, self.message)
    }
}

/// Validate a parsed program, returning issues in source order
pub fn validate_program(program: &Program) -> Vec<ProgramIssue> {
    let mut checker = Checker::default();
    checker.visit_block(&program.body);

    let reachable = allowlist::reachable_names();
    let mut issues = checker.issues;
    let mut reported = BTreeSet::new();
    for (name, line) in checker.uses {
        if checker.bound.contains(&name)
            || reachable.contains(&name.as_str())
            || name == "__name__"
            || !reported.insert(name.clone())
        {
            continue;
        }
        issues.push(ProgramIssue {
            line,
            message: format!("name '{}' is never defined and is not a builtin", name),
            severity: IssueSeverity::Warning,
        });
    }
    issues.sort_by_key(|issue| issue.line);
    issues
}

pub fn has_errors(issues: &[ProgramIssue]) -> bool {
    issues.iter().any(|i| i.severity == IssueSeverity::Error)
}

#[derive(Default)]
struct Checker {
    issues: Vec<ProgramIssue>,
    /// Every name bound anywhere in the program
    bound: BTreeSet<String>,
    /// Names read, with the line of the statement reading them
    uses: Vec<(String, usize)>,
}

impl Checker {
    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.issues.push(ProgramIssue {
            line,
            message: message.into(),
            severity: IssueSeverity::Error,
        });
    }

    fn visit_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => self.visit_expr(expr, line),
            StmtKind::Assign { targets, value } => {
                self.visit_expr(value, line);
                for target in targets {
                    self.visit_target(target, line);
                }
            }
            StmtKind::Yield { targets, value, .. } => {
                if let Some(value) = value {
                    self.visit_expr(value, line);
                }
                for target in targets {
                    self.visit_target(target, line);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_expr(value, line);
                if let Target::Name(name) = target {
                    self.uses.push((name.clone(), line));
                }
                self.visit_target(target, line);
            }
            StmtKind::AnnAssign { target, value } => {
                if let Some(value) = value {
                    self.visit_expr(value, line);
                }
                self.visit_target(target, line);
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.visit_expr(value, line);
                }
            }
            StmtKind::Raise { exc, cause } => {
                for expr in exc.iter().chain(cause) {
                    self.visit_expr(expr, line);
                }
            }
            StmtKind::Global(names) | StmtKind::Nonlocal(names) => {
                self.bound.extend(names.iter().cloned());
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.visit_target(target, line);
                }
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test, line);
                if let Some(msg) = msg {
                    self.visit_expr(msg, line);
                }
            }
            StmtKind::Import(modules) => self.error(
                line,
                format!("import of '{}' is not available in the sandbox", modules.join(", ")),
            ),
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    self.visit_expr(test, line);
                    self.visit_block(body);
                }
                self.visit_block(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test, line);
                self.visit_block(body);
                self.visit_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.visit_expr(iter, line);
                self.visit_target(target, line);
                self.visit_block(body);
                self.visit_block(orelse);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.visit_block(body);
                for handler in handlers {
                    if let Some(kind) = &handler.kind {
                        self.visit_expr(kind, handler.line);
                    }
                    if let Some(name) = &handler.name {
                        self.bound.insert(name.clone());
                    }
                    self.visit_block(&handler.body);
                }
                self.visit_block(orelse);
                self.visit_block(finalbody);
            }
            StmtKind::FunctionDef(def) => {
                self.bound.insert(def.name.clone());
                self.visit_function(def, line);
            }
            StmtKind::ClassDef { name, body } => {
                self.error(line, format!("class '{}' cannot be defined in the sandbox", name));
                self.bound.insert(name.clone());
                self.visit_block(body);
            }
            StmtKind::With { items, body } => {
                self.error(line, "'with' statements have no usable context managers");
                for (expr, target) in items {
                    self.visit_expr(expr, line);
                    if let Some(target) = target {
                        self.visit_target(target, line);
                    }
                }
                self.visit_block(body);
            }
        }
    }

    fn visit_function(&mut self, def: &FunctionDef, line: usize) {
        for decorator in &def.decorators {
            self.visit_expr(decorator, line);
        }
        let params = &def.params;
        for param in params.positional.iter().chain(&params.kwonly) {
            if let Some(default) = &param.default {
                self.visit_expr(default, line);
            }
        }
        self.bound
            .extend(params.names().into_iter().map(str::to_string));
        self.visit_block(&def.body);
    }

    fn visit_target(&mut self, target: &Target, line: usize) {
        match target {
            Target::Name(name) => {
                self.bound.insert(name.clone());
            }
            Target::Attribute { value, .. } => self.visit_expr(value, line),
            Target::Subscript { value, index } => {
                self.visit_expr(value, line);
                self.visit_expr(index, line);
            }
            Target::Sequence(items) => {
                for item in items {
                    self.visit_target(item, line);
                }
            }
            Target::Starred(inner) => self.visit_target(inner, line),
        }
    }

    fn visit_exprs<'a>(&mut self, exprs: impl IntoIterator<Item = &'a Expr>, line: usize) {
        for expr in exprs {
            self.visit_expr(expr, line);
        }
    }

    fn visit_expr(&mut self, expr: &Expr, line: usize) {
        match expr {
            Expr::Constant(_) => {}
            Expr::FString(parts) => self.visit_fstring(parts, line),
            Expr::Name(name) => self.uses.push((name.clone(), line)),
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                self.visit_exprs(items, line)
            }
            Expr::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            self.visit_expr(key, line);
                            self.visit_expr(value, line);
                        }
                        DictItem::Unpack(inner) => self.visit_expr(inner, line),
                    }
                }
            }
            Expr::Starred(inner) => self.visit_expr(inner, line),
            Expr::NamedExpr { name, value } => {
                self.visit_expr(value, line);
                self.bound.insert(name.clone());
            }
            Expr::BinOp { left, right, .. } => {
                self.visit_expr(left, line);
                self.visit_expr(right, line);
            }
            Expr::UnaryOp { operand, .. } => self.visit_expr(operand, line),
            Expr::BoolOp { values, .. } => self.visit_exprs(values, line),
            Expr::Compare { left, ops } => {
                self.visit_expr(left, line);
                self.visit_exprs(ops.iter().map(|(_, right)| right), line);
            }
            Expr::IfExp { test, body, orelse } => {
                self.visit_expr(test, line);
                self.visit_expr(body, line);
                self.visit_expr(orelse, line);
            }
            Expr::Lambda(def) => self.visit_function(def, line),
            Expr::Call { func, args } => {
                self.visit_expr(func, line);
                for arg in args {
                    match arg {
                        Arg::Positional(value)
                        | Arg::Keyword(_, value)
                        | Arg::Star(value)
                        | Arg::DoubleStar(value) => self.visit_expr(value, line),
                    }
                }
            }
            Expr::Attribute { value, .. } => self.visit_expr(value, line),
            Expr::Subscript { value, index } => {
                self.visit_expr(value, line);
                self.visit_expr(index, line);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part, line);
                }
            }
            Expr::ListComp { elt, generators }
            | Expr::SetComp { elt, generators }
            | Expr::GeneratorExp { elt, generators } => {
                self.visit_generators(generators, line);
                self.visit_expr(elt, line);
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.visit_generators(generators, line);
                self.visit_expr(key, line);
                self.visit_expr(value, line);
            }
        }
    }

    fn visit_generators(&mut self, generators: &[Comprehension], line: usize) {
        for generator in generators {
            self.visit_expr(&generator.iter, line);
            self.visit_target(&generator.target, line);
            self.visit_exprs(&generator.ifs, line);
        }
    }

    fn visit_fstring(&mut self, parts: &[FStringPart], line: usize) {
        for part in parts {
            if let FStringPart::Field { expr, spec, .. } = part {
                self.visit_expr(expr, line);
                self.visit_fstring(spec, line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn issues(source: &str) -> Vec<ProgramIssue> {
        validate_program(&parse_program(source).unwrap())
    }

    #[test]
    fn test_clean_program_has_no_issues() {
        let found = issues(
            "def grade(score):\n    return 'A' if score >= 90 else 'B'\n\
             n = int(input())\nprint(grade(n), [x * 2 for x in range(n)])\n",
        );
        assert!(found.is_empty(), "{:?}", found);
    }

    #[test]
    fn test_refused_statements_are_errors() {
        let found = issues("import os\nclass A:\n    pass\nwith x as y:\n    pass\n");
        let errors: Vec<_> = found
            .iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .map(|i| i.line)
            .collect();
        assert_eq!(errors, vec![1, 2, 4]);
        assert!(has_errors(&found));
        assert_eq!(
            found[0].to_string(),
            "ERROR (line 1): import of 'os' is not available in the sandbox"
        );
    }

    #[test]
    fn test_unknown_names_warn_once() {
        let found = issues("print(open('f'))\nopen('g')\ntry:\n    pass\nexcept ZeroDivisionError:\n    pass\n");
        assert!(!has_errors(&found));
        assert!(found.iter().any(|i| i.severity == IssueSeverity::Warning));
        let lines: Vec<_> = found.iter().map(|i| (i.line, i.message.as_str())).collect();
        assert_eq!(
            lines,
            vec![
                (1, "name 'open' is never defined and is not a builtin"),
                (5, "name 'ZeroDivisionError' is never defined and is not a builtin"),
            ]
        );
    }

    #[test]
    fn test_names_bound_anywhere_count() {
        let found = issues(
            "def f(a, *rest, key=None, **extra):\n    return a, rest, key, extra, later\n\
             later = 1\ntry:\n    f(1)\nexcept Exception as e:\n    print(e)\n\
             print([y for y in range(3)], (lambda q: q)(2))\n",
        );
        assert!(found.is_empty(), "{:?}", found);
    }

    #[test]
    fn test_generators_and_named_values_bind() {
        let found = issues(
            "def squares(n):\n    total = yield 0\n    for i in range(n):\n        yield i * i\n\
             while (chunk := len('ab')) > 5:\n    pass\nprint(list(squares(3)), chunk, total)\n",
        );
        assert!(found.is_empty(), "{:?}", found);
    }
}
