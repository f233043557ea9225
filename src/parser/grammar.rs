//! Pest grammar parser for learner programs
//!
//! Each logical line is parsed on its own; block structure is rebuilt from
//! indentation afterwards.

use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

use num_bigint::BigInt;
use pest::error::LineColLocation;
use pest::Parser;
use pest_derive::Parser;

use crate::parser::ast::*;
use crate::parser::error::SyntaxError;
use crate::parser::lines::{logical_lines, normalize_newlines, LogicalLine};

#[derive(Parser)]
#[grammar = "../grammar/python.pest"]
pub struct PythonParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;
type Result<T> = std::result::Result<T, SyntaxError>;

/// Parse a whole program into an AST
pub fn parse_program(source: &str) -> Result<Program> {
    let normalized = normalize_newlines(source);
    let physical: Vec<String> = normalized.split('\n').map(str::to_string).collect();

    let mut parsed = VecDeque::new();
    for logical in logical_lines(&normalized)? {
        parsed.push_back(parse_logical_line(&logical, &physical)?);
    }

    let mut blocks = BlockBuilder {
        lines: parsed,
        levels: vec![0],
        physical: &physical,
    };
    let body = blocks.program()?;
    check_placement(&body, Placement::default(), &physical)?;
    Ok(Program { body })
}

fn parse_logical_line(logical: &LogicalLine, physical: &[String]) -> Result<ParsedLine> {
    let builder = LineBuilder {
        lineno: logical.lineno,
        physical,
    };
    let mut pairs = PythonParser::parse(Rule::line, &logical.text)
        .map_err(|e| builder.pest_error(e))?;
    let line = pairs
        .next()
        .ok_or_else(|| builder.error_at(1, "invalid syntax"))?;
    let content = line
        .into_inner()
        .find(|p| p.as_rule() != Rule::EOI)
        .ok_or_else(|| builder.error_at(1, "invalid syntax"))?;

    let kind = match content.as_rule() {
        Rule::decorator => {
            let expr = builder.expr(first_child(&builder, content)?)?;
            LineKind::Decorator(expr)
        }
        Rule::compound_line => {
            let mut inner = content.into_inner();
            let header_pair = inner
                .next()
                .ok_or_else(|| builder.error_at(1, "invalid syntax"))?;
            let header = builder.header(header_pair)?;
            let inline = match inner.next() {
                Some(simple) => Some(builder.simple_line(simple)?),
                None => None,
            };
            LineKind::Header { header, inline }
        }
        Rule::simple_line => LineKind::Simple(builder.simple_line(content)?),
        _ => return Err(builder.error_at(1, "invalid syntax")),
    };

    Ok(ParsedLine {
        lineno: logical.lineno,
        indent: logical.indent,
        kind,
    })
}

/// Parse the expression inside an f-string replacement field
fn parse_fstring_expr(builder: &LineBuilder, source: &str, column: usize) -> Result<Expr> {
    let mut pairs = PythonParser::parse(Rule::fstring_expr, source)
        .map_err(|_| builder.error_at(column, "f-string: invalid syntax"))?;
    let entry = pairs
        .next()
        .ok_or_else(|| builder.error_at(column, "f-string: invalid syntax"))?;
    let list = entry
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr_list)
        .ok_or_else(|| builder.error_at(column, "f-string: invalid syntax"))?;
    builder.expr_list(list)
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_and
            | Rule::kw_as
            | Rule::kw_assert
            | Rule::kw_break
            | Rule::kw_class
            | Rule::kw_continue
            | Rule::kw_def
            | Rule::kw_del
            | Rule::kw_elif
            | Rule::kw_else
            | Rule::kw_except
            | Rule::kw_finally
            | Rule::kw_for
            | Rule::kw_from
            | Rule::kw_global
            | Rule::kw_if
            | Rule::kw_import
            | Rule::kw_in
            | Rule::kw_is
            | Rule::kw_lambda
            | Rule::kw_nonlocal
            | Rule::kw_not
            | Rule::kw_or
            | Rule::kw_pass
            | Rule::kw_raise
            | Rule::kw_return
            | Rule::kw_try
            | Rule::kw_while
            | Rule::kw_with
            | Rule::kw_yield
    )
}

/// Children of a pair with keyword tokens removed
fn children(pair: Pair) -> Vec<Pair> {
    pair.into_inner()
        .filter(|p| !is_keyword(p.as_rule()))
        .collect()
}

fn first_child<'i>(builder: &LineBuilder, pair: Pair<'i>) -> Result<Pair<'i>> {
    let column = builder.column(&pair);
    children(pair)
        .into_iter()
        .next()
        .ok_or_else(|| builder.error_at(column, "invalid syntax"))
}

// ============================================================================
// Line-level conversion
// ============================================================================

#[derive(Debug)]
enum Header {
    If(Expr),
    Elif(Expr),
    Else,
    While(Expr),
    For(Target, Expr),
    Try,
    Except(Option<Expr>, Option<String>),
    Finally,
    Def {
        name: String,
        params: Params,
    },
    Class(String),
    With(Vec<(Expr, Option<Target>)>),
}

impl Header {
    fn describe(&self) -> &'static str {
        match self {
            Header::If(_) => "'if' statement",
            Header::Elif(_) => "'elif' statement",
            Header::Else => "'else' statement",
            Header::While(_) => "'while' statement",
            Header::For(..) => "'for' statement",
            Header::Try => "'try' statement",
            Header::Except(..) => "'except' statement",
            Header::Finally => "'finally' statement",
            Header::Def { .. } => "function definition",
            Header::Class(_) => "class definition",
            Header::With(_) => "'with' statement",
        }
    }
}

#[derive(Debug)]
enum LineKind {
    Simple(Vec<Stmt>),
    Header {
        header: Header,
        inline: Option<Vec<Stmt>>,
    },
    Decorator(Expr),
}

#[derive(Debug)]
struct ParsedLine {
    lineno: usize,
    indent: usize,
    kind: LineKind,
}

/// Converts the pest pairs of one logical line into AST nodes
struct LineBuilder<'a> {
    lineno: usize,
    physical: &'a [String],
}

impl<'a> LineBuilder<'a> {
    fn line_text(&self, lineno: usize) -> &str {
        self.physical
            .get(lineno.saturating_sub(1))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn leading(&self, lineno: usize) -> usize {
        self.line_text(lineno)
            .chars()
            .take_while(|c| c.is_whitespace())
            .count()
    }

    fn column(&self, pair: &Pair) -> usize {
        pair.as_span().start_pos().line_col().1
    }

    /// Error at a column of the logical line's first physical line
    fn error_at(&self, column: usize, message: &str) -> SyntaxError {
        SyntaxError::new(
            message,
            self.lineno,
            self.leading(self.lineno) + column,
            self.line_text(self.lineno),
        )
    }

    fn error(&self, pair: &Pair, message: &str) -> SyntaxError {
        let (line, col) = pair.as_span().start_pos().line_col();
        let lineno = self.lineno + line - 1;
        let offset = if line == 1 {
            self.leading(lineno) + col
        } else {
            col
        };
        SyntaxError::new(message, lineno, offset, self.line_text(lineno))
    }

    fn pest_error(&self, err: pest::error::Error<Rule>) -> SyntaxError {
        let (line, col) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        let lineno = self.lineno + line - 1;
        let offset = if line == 1 {
            self.leading(lineno) + col
        } else {
            col
        };
        SyntaxError::new("invalid syntax", lineno, offset, self.line_text(lineno))
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        Stmt {
            line: self.lineno,
            kind,
        }
    }

    // ------------------------------------------------------------------
    // Headers
    // ------------------------------------------------------------------

    fn header(&self, pair: Pair) -> Result<Header> {
        let rule = pair.as_rule();
        let column = self.column(&pair);
        let parts = children(pair);
        let header = match rule {
            Rule::if_header => Header::If(self.expr(self.take(&parts, 0, column)?)?),
            Rule::elif_header => Header::Elif(self.expr(self.take(&parts, 0, column)?)?),
            Rule::else_header => Header::Else,
            Rule::while_header => Header::While(self.expr(self.take(&parts, 0, column)?)?),
            Rule::for_header => {
                let target = self.target_list(self.take(&parts, 0, column)?, "assign to")?;
                let iter = self.expr_list(self.take(&parts, 1, column)?)?;
                Header::For(target, iter)
            }
            Rule::try_header => Header::Try,
            Rule::except_header => {
                let kind = match parts.first() {
                    Some(p) => Some(self.expr(p.clone())?),
                    None => None,
                };
                let name = parts.get(1).map(|p| p.as_str().to_string());
                Header::Except(kind, name)
            }
            Rule::finally_header => Header::Finally,
            Rule::def_header => {
                let name = self.take(&parts, 0, column)?.as_str().to_string();
                let params = match parts.get(1) {
                    Some(p) if p.as_rule() == Rule::parameters => self.parameters(p.clone())?,
                    _ => Params::default(),
                };
                Header::Def { name, params }
            }
            Rule::class_header => {
                let name = self.take(&parts, 0, column)?.as_str().to_string();
                Header::Class(name)
            }
            Rule::with_header => {
                let mut items = Vec::new();
                for item in parts {
                    let mut inner = children(item).into_iter();
                    let expr = match inner.next() {
                        Some(p) => self.expr(p)?,
                        None => return Err(self.error_at(column, "invalid syntax")),
                    };
                    let target = match inner.next() {
                        Some(p) => Some(self.target(p, "assign to")?),
                        None => None,
                    };
                    items.push((expr, target));
                }
                Header::With(items)
            }
            _ => return Err(self.error_at(column, "invalid syntax")),
        };
        Ok(header)
    }

    fn take<'i>(&self, parts: &[Pair<'i>], index: usize, column: usize) -> Result<Pair<'i>> {
        parts
            .get(index)
            .cloned()
            .ok_or_else(|| self.error_at(column, "invalid syntax"))
    }

    fn parameters(&self, pair: Pair) -> Result<Params> {
        let mut params = Params::default();
        let mut after_star = false;
        let mut seen_default = false;
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for item in pair.into_inner() {
            let rule = item.as_rule();
            let item_pair = item.clone();
            let mut inner = item.into_inner();
            match rule {
                Rule::param | Rule::lambda_param => {
                    let name_pair = inner
                        .next()
                        .ok_or_else(|| self.error(&item_pair, "invalid syntax"))?;
                    let name = name_pair.as_str().to_string();
                    let mut default = None;
                    for rest in inner {
                        if rest.as_rule() == Rule::param_default {
                            default = Some(self.expr(first_child(self, rest)?)?);
                        }
                    }
                    self.check_duplicate(&item_pair, &mut seen, &name)?;
                    if after_star {
                        params.kwonly.push(Param { name, default });
                    } else {
                        if default.is_some() {
                            seen_default = true;
                        } else if seen_default {
                            return Err(self.error(
                                &item_pair,
                                "parameter without a default follows parameter with a default",
                            ));
                        }
                        params.positional.push(Param { name, default });
                    }
                }
                Rule::varargs_param | Rule::lambda_varargs => {
                    if after_star {
                        return Err(self.error(&item_pair, "* argument may appear only once"));
                    }
                    let name = inner
                        .next()
                        .map(|p| p.as_str().to_string())
                        .ok_or_else(|| self.error(&item_pair, "invalid syntax"))?;
                    self.check_duplicate(&item_pair, &mut seen, &name)?;
                    params.vararg = Some(name);
                    after_star = true;
                }
                Rule::bare_star => {
                    if after_star {
                        return Err(self.error(&item_pair, "* argument may appear only once"));
                    }
                    after_star = true;
                }
                Rule::kwargs_param | Rule::lambda_kwargs => {
                    let name = inner
                        .next()
                        .map(|p| p.as_str().to_string())
                        .ok_or_else(|| self.error(&item_pair, "invalid syntax"))?;
                    self.check_duplicate(&item_pair, &mut seen, &name)?;
                    params.kwarg = Some(name);
                }
                Rule::slash_marker => {}
                _ => return Err(self.error(&item_pair, "invalid syntax")),
            }
        }

        if after_star && params.vararg.is_none() && params.kwonly.is_empty() {
            return Err(self.error_at(1, "named arguments must follow bare *"));
        }
        Ok(params)
    }

    fn check_duplicate(&self, pair: &Pair, seen: &mut BTreeSet<String>, name: &str) -> Result<()> {
        if !seen.insert(name.to_string()) {
            return Err(self.error(
                pair,
                &format!("duplicate argument '{}' in function definition", name),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Simple statements
    // ------------------------------------------------------------------

    fn simple_line(&self, pair: Pair) -> Result<Vec<Stmt>> {
        pair.into_inner().map(|p| self.simple_stmt(p)).collect()
    }

    fn simple_stmt(&self, pair: Pair) -> Result<Stmt> {
        let rule = pair.as_rule();
        let column = self.column(&pair);
        let pair_copy = pair.clone();
        let parts = children(pair);

        let kind = match rule {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => match parts.first() {
                Some(p) => StmtKind::Return(Some(self.expr_list(p.clone())?)),
                None => StmtKind::Return(None),
            },
            Rule::raise_stmt => {
                let mut exc = None;
                let mut cause = None;
                for part in parts {
                    if part.as_rule() == Rule::raise_cause {
                        cause = Some(self.expr(first_child(self, part)?)?);
                    } else {
                        exc = Some(self.expr(part)?);
                    }
                }
                StmtKind::Raise { exc, cause }
            }
            Rule::global_stmt => StmtKind::Global(parts.iter().map(|p| p.as_str().to_string()).collect()),
            Rule::nonlocal_stmt => {
                StmtKind::Nonlocal(parts.iter().map(|p| p.as_str().to_string()).collect())
            }
            Rule::del_stmt => {
                let target = self.target_list(self.take(&parts, 0, column)?, "delete")?;
                let targets = match target {
                    Target::Sequence(items) => items,
                    other => vec![other],
                };
                StmtKind::Del(targets)
            }
            Rule::assert_stmt => {
                let test = self.expr(self.take(&parts, 0, column)?)?;
                let msg = match parts.get(1) {
                    Some(p) => Some(self.expr(p.clone())?),
                    None => None,
                };
                StmtKind::Assert { test, msg }
            }
            Rule::import_stmt => {
                let modules = parts
                    .into_iter()
                    .filter_map(|p| p.into_inner().find(|i| i.as_rule() == Rule::dotted_name))
                    .map(|p| p.as_str().to_string())
                    .collect();
                StmtKind::Import(modules)
            }
            Rule::from_import_stmt => {
                let module = self.take(&parts, 0, column)?.as_str().to_string();
                StmtKind::Import(vec![module])
            }
            Rule::assign_stmt => {
                let (value_pair, target_pairs) = parts
                    .split_last()
                    .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
                let targets = target_pairs
                    .iter()
                    .map(|p| self.target_list(p.clone(), "assign to"))
                    .collect::<Result<Vec<_>>>()?;
                if value_pair.as_rule() == Rule::yield_expr {
                    return Ok(self.stmt(self.yield_stmt(targets, value_pair.clone())?));
                }
                let value = self.expr_list(value_pair.clone())?;
                StmtKind::Assign { targets, value }
            }
            Rule::aug_assign_stmt => {
                let target_pair = self.take(&parts, 0, column)?;
                let target = self.single_target(target_pair.clone(), "assign to")?;
                if let Target::Starred(_) | Target::Sequence(_) = target {
                    return Err(self.error(
                        &target_pair,
                        "'tuple' is an illegal expression for augmented assignment",
                    ));
                }
                let op_pair = self.take(&parts, 1, column)?;
                let symbol = op_pair.as_str().trim_end_matches('=');
                let op = BinOp::from_symbol(symbol)
                    .ok_or_else(|| self.error(&op_pair, "invalid syntax"))?;
                let value = self.expr_list(self.take(&parts, 2, column)?)?;
                StmtKind::AugAssign { target, op, value }
            }
            Rule::ann_assign_stmt => {
                let target = self.single_target(self.take(&parts, 0, column)?, "assign to")?;
                let value = match parts.get(2) {
                    Some(p) => Some(self.expr_list(first_child(self, p.clone())?)?),
                    None => None,
                };
                StmtKind::AnnAssign { target, value }
            }
            Rule::expr_stmt => StmtKind::Expr(self.expr_list(self.take(&parts, 0, column)?)?),
            Rule::yield_stmt => self.yield_stmt(Vec::new(), self.take(&parts, 0, column)?)?,
            _ => return Err(self.error(&pair_copy, "invalid syntax")),
        };

        Ok(self.stmt(kind))
    }

    fn yield_stmt(&self, targets: Vec<Target>, pair: Pair) -> Result<StmtKind> {
        let (value, delegate) = match children(pair).into_iter().next() {
            Some(part) if part.as_rule() == Rule::yield_from => {
                (Some(self.expr(first_child(self, part)?)?), true)
            }
            Some(part) => (Some(self.expr_list(part)?), false),
            None => (None, false),
        };
        Ok(StmtKind::Yield {
            targets,
            value,
            delegate,
        })
    }

    // ------------------------------------------------------------------
    // Targets
    // ------------------------------------------------------------------

    fn target_list(&self, pair: Pair, verb: &str) -> Result<Target> {
        let pair_copy = pair.clone();
        let mut targets = Vec::new();
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::comma {
                trailing_comma = true;
            } else {
                targets.push(self.target(part, verb)?);
            }
        }
        if targets.len() == 1 && !trailing_comma {
            let target = targets.remove(0);
            if let Target::Starred(_) = target {
                return Err(self.error(
                    &pair_copy,
                    "starred assignment target must be in a list or tuple",
                ));
            }
            return Ok(target);
        }
        self.check_starred(&pair_copy, &targets)?;
        Ok(Target::Sequence(targets))
    }

    fn check_starred(&self, pair: &Pair, targets: &[Target]) -> Result<()> {
        let starred = targets
            .iter()
            .filter(|t| matches!(t, Target::Starred(_)))
            .count();
        if starred > 1 {
            return Err(self.error(pair, "multiple starred expressions in assignment"));
        }
        Ok(())
    }

    fn target(&self, pair: Pair, verb: &str) -> Result<Target> {
        let pair_copy = pair.clone();
        match pair.as_rule() {
            Rule::starred_target => {
                let inner = first_child(self, pair)?;
                Ok(Target::Starred(Box::new(self.target(inner, verb)?)))
            }
            Rule::paren_target => self.target_list(first_child(self, pair)?, verb),
            Rule::list_target => match self.target_list(first_child(self, pair)?, verb)? {
                Target::Sequence(items) => Ok(Target::Sequence(items)),
                single => Ok(Target::Sequence(vec![single])),
            },
            Rule::single_target => self.single_target(pair, verb),
            _ => Err(self.error(&pair_copy, "invalid syntax")),
        }
    }

    fn single_target(&self, pair: Pair, verb: &str) -> Result<Target> {
        let pair_copy = pair.clone();
        let primary = first_child(self, pair)?;
        let expr = self.expr(primary)?;
        self.expr_to_target(&pair_copy, expr, verb)
    }

    fn expr_to_target(&self, pair: &Pair, expr: Expr, verb: &str) -> Result<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Attribute { value, attr } => Ok(Target::Attribute { value: *value, attr }),
            Expr::Subscript { value, index } => Ok(Target::Subscript {
                value: *value,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => {
                let targets = items
                    .into_iter()
                    .map(|e| self.expr_to_target(pair, e, verb))
                    .collect::<Result<Vec<_>>>()?;
                self.check_starred(pair, &targets)?;
                Ok(Target::Sequence(targets))
            }
            Expr::Starred(inner) => Ok(Target::Starred(Box::new(
                self.expr_to_target(pair, *inner, verb)?,
            ))),
            other => {
                let what = match other {
                    Expr::Call { .. } => "function call",
                    Expr::Constant(Constant::None) => "None",
                    Expr::Constant(Constant::Bool(true)) => "True",
                    Expr::Constant(Constant::Bool(false)) => "False",
                    Expr::Constant(_) | Expr::FString(_) => "literal",
                    Expr::Lambda(_) => "lambda",
                    Expr::Dict(_) => "dict literal",
                    Expr::Set(_) => "set display",
                    Expr::ListComp { .. } => "list comprehension",
                    Expr::SetComp { .. } => "set comprehension",
                    Expr::DictComp { .. } => "dict comprehension",
                    Expr::GeneratorExp { .. } => "generator expression",
                    Expr::Compare { .. } => "comparison",
                    Expr::IfExp { .. } => "conditional expression",
                    _ => "expression",
                };
                Err(self.error(pair, &format!("cannot {} {}", verb, what)))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// An `expr_list`: a single expression, or a tuple when commas appear
    fn expr_list(&self, pair: Pair) -> Result<Expr> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            if part.as_rule() == Rule::comma {
                trailing_comma = true;
            } else {
                items.push(self.expr(part)?);
            }
        }
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Expr::Tuple(items))
    }

    fn expr(&self, pair: Pair) -> Result<Expr> {
        let rule = pair.as_rule();
        let pair_copy = pair.clone();
        match rule {
            Rule::expr | Rule::single_target => self.expr(first_child(self, pair)?),
            Rule::expr_list => self.expr_list(pair),
            Rule::named_expr => {
                let parts = children(pair);
                let name = self.take(&parts, 0, 1)?.as_str().to_string();
                let value = self.expr(self.take(&parts, 1, 1)?)?;
                Ok(Expr::NamedExpr {
                    name,
                    value: Box::new(value),
                })
            }
            Rule::star_expr => Ok(Expr::Starred(Box::new(
                self.expr(first_child(self, pair)?)?,
            ))),
            Rule::conditional => {
                let mut parts = children(pair).into_iter();
                let body = self.expr(parts.next().ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?)?;
                match (parts.next(), parts.next()) {
                    (Some(test), Some(orelse)) => Ok(Expr::IfExp {
                        test: Box::new(self.expr(test)?),
                        body: Box::new(body),
                        orelse: Box::new(self.expr(orelse)?),
                    }),
                    _ => Ok(body),
                }
            }
            Rule::lambda_expr => self.lambda(pair),
            Rule::or_test | Rule::and_test => {
                let op = if rule == Rule::or_test {
                    BoolOp::Or
                } else {
                    BoolOp::And
                };
                let mut values = children(pair)
                    .into_iter()
                    .map(|p| self.expr(p))
                    .collect::<Result<Vec<_>>>()?;
                if values.len() == 1 {
                    return Ok(values.remove(0));
                }
                Ok(Expr::BoolOp { op, values })
            }
            Rule::not_test => {
                let mut inner = pair.into_inner();
                let first = inner
                    .next()
                    .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
                if first.as_rule() == Rule::kw_not {
                    let operand = inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
                    return Ok(Expr::UnaryOp {
                        op: UnaryOp::Not,
                        operand: Box::new(self.expr(operand)?),
                    });
                }
                self.expr(first)
            }
            Rule::comparison => {
                let mut inner = pair.into_inner();
                let left = self.expr(
                    inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                let mut ops = Vec::new();
                while let Some(op_pair) = inner.next() {
                    let op = comparison_op(&op_pair);
                    let right = inner
                        .next()
                        .ok_or_else(|| self.error(&op_pair, "invalid syntax"))?;
                    ops.push((op, self.expr(right)?));
                }
                if ops.is_empty() {
                    return Ok(left);
                }
                Ok(Expr::Compare {
                    left: Box::new(left),
                    ops,
                })
            }
            Rule::bitor_expr | Rule::bitxor_expr | Rule::bitand_expr => {
                let op = match rule {
                    Rule::bitor_expr => BinOp::BitOr,
                    Rule::bitxor_expr => BinOp::BitXor,
                    _ => BinOp::BitAnd,
                };
                let mut operands = pair.into_inner();
                let mut left = self.expr(
                    operands
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                for right in operands {
                    left = Expr::BinOp {
                        left: Box::new(left),
                        op,
                        right: Box::new(self.expr(right)?),
                    };
                }
                Ok(left)
            }
            Rule::shift_expr | Rule::arith_expr | Rule::term => {
                let mut inner = pair.into_inner();
                let mut left = self.expr(
                    inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                while let Some(op_pair) = inner.next() {
                    let op = BinOp::from_symbol(op_pair.as_str())
                        .ok_or_else(|| self.error(&op_pair, "invalid syntax"))?;
                    let right = inner
                        .next()
                        .ok_or_else(|| self.error(&op_pair, "invalid syntax"))?;
                    left = Expr::BinOp {
                        left: Box::new(left),
                        op,
                        right: Box::new(self.expr(right)?),
                    };
                }
                Ok(left)
            }
            Rule::factor => {
                let mut inner = pair.into_inner();
                let first = inner
                    .next()
                    .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
                if first.as_rule() == Rule::unary_op {
                    let op = match first.as_str() {
                        "-" => UnaryOp::Neg,
                        "+" => UnaryOp::Pos,
                        _ => UnaryOp::Invert,
                    };
                    let operand = inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
                    return Ok(Expr::UnaryOp {
                        op,
                        operand: Box::new(self.expr(operand)?),
                    });
                }
                self.expr(first)
            }
            Rule::power => {
                let mut inner = pair.into_inner();
                let base = self.expr(
                    inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                match inner.next() {
                    Some(exponent) => Ok(Expr::BinOp {
                        left: Box::new(base),
                        op: BinOp::Pow,
                        right: Box::new(self.expr(exponent)?),
                    }),
                    None => Ok(base),
                }
            }
            Rule::primary => self.primary(pair),
            Rule::identifier => Ok(Expr::Name(pair.as_str().to_string())),
            Rule::none_lit => Ok(Expr::Constant(Constant::None)),
            Rule::true_lit => Ok(Expr::Constant(Constant::Bool(true))),
            Rule::false_lit => Ok(Expr::Constant(Constant::Bool(false))),
            Rule::ellipsis => Ok(Expr::Constant(Constant::Ellipsis)),
            Rule::number => self.number(pair),
            Rule::strings => self.strings(pair),
            Rule::empty_tuple => Ok(Expr::Tuple(Vec::new())),
            Rule::paren_group => self.expr(first_child(self, pair)?),
            Rule::genexp | Rule::list_comp | Rule::set_comp => {
                let mut inner = pair.into_inner();
                let elt = self.expr(
                    inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                let generators = self.comp_for(
                    inner
                        .next()
                        .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?,
                )?;
                let elt = Box::new(elt);
                Ok(match rule {
                    Rule::genexp => Expr::GeneratorExp { elt, generators },
                    Rule::list_comp => Expr::ListComp { elt, generators },
                    _ => Expr::SetComp { elt, generators },
                })
            }
            Rule::dict_comp => {
                let parts: Vec<Pair> = pair.into_inner().collect();
                if parts.len() != 3 {
                    return Err(self.error(&pair_copy, "invalid syntax"));
                }
                Ok(Expr::DictComp {
                    key: Box::new(self.expr(parts[0].clone())?),
                    value: Box::new(self.expr(parts[1].clone())?),
                    generators: self.comp_for(parts[2].clone())?,
                })
            }
            Rule::list_literal => Ok(Expr::List(
                pair.into_inner()
                    .map(|p| self.expr(p))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Rule::set_literal => Ok(Expr::Set(
                pair.into_inner()
                    .map(|p| self.expr(p))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Rule::empty_dict => Ok(Expr::Dict(Vec::new())),
            Rule::dict_literal => {
                let mut items = Vec::new();
                for item in pair.into_inner() {
                    match item.as_rule() {
                        Rule::dict_pair => {
                            let parts: Vec<Pair> = item.into_inner().collect();
                            if parts.len() != 2 {
                                return Err(self.error(&pair_copy, "invalid syntax"));
                            }
                            items.push(DictItem::Pair(
                                self.expr(parts[0].clone())?,
                                self.expr(parts[1].clone())?,
                            ));
                        }
                        _ => items.push(DictItem::Unpack(self.expr(first_child(self, item)?)?)),
                    }
                }
                Ok(Expr::Dict(items))
            }
            _ => Err(self.error(&pair_copy, "invalid syntax")),
        }
    }

    fn lambda(&self, pair: Pair) -> Result<Expr> {
        let pair_copy = pair.clone();
        let mut params = Params::default();
        let mut body_expr = None;
        for part in children(pair) {
            match part.as_rule() {
                Rule::lambda_params => params = self.parameters(part)?,
                _ => body_expr = Some(self.expr(part)?),
            }
        }
        let body_expr = body_expr.ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
        let body: Block = vec![self.stmt(StmtKind::Return(Some(body_expr)))].into();
        let names = ScopeNames::collect(&params, &body);
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            line: self.lineno,
            params,
            body,
            decorators: Vec::new(),
            locals: names.bound,
            globals: names.globals,
            nonlocals: names.nonlocals,
            generator: false,
        })))
    }

    fn comp_for(&self, pair: Pair) -> Result<Vec<Comprehension>> {
        let mut generators: Vec<Comprehension> = Vec::new();
        for clause in pair.into_inner() {
            let clause_copy = clause.clone();
            let parts = children(clause);
            match clause_copy.as_rule() {
                Rule::comp_for_clause => {
                    let target = self.target_list(self.take(&parts, 0, 1)?, "assign to")?;
                    let iter = self.expr(self.take(&parts, 1, 1)?)?;
                    generators.push(Comprehension {
                        target,
                        iter,
                        ifs: Vec::new(),
                    });
                }
                Rule::comp_if_clause => {
                    let condition = self.expr(self.take(&parts, 0, 1)?)?;
                    match generators.last_mut() {
                        Some(generator) => generator.ifs.push(condition),
                        None => return Err(self.error(&clause_copy, "invalid syntax")),
                    }
                }
                _ => return Err(self.error(&clause_copy, "invalid syntax")),
            }
        }
        Ok(generators)
    }

    fn primary(&self, pair: Pair) -> Result<Expr> {
        let pair_copy = pair.clone();
        let mut inner = pair.into_inner();
        let atom = inner
            .next()
            .ok_or_else(|| self.error(&pair_copy, "invalid syntax"))?;
        let mut expr = self.expr(atom)?;

        for trailer in inner {
            expr = match trailer.as_rule() {
                Rule::call => {
                    let args = match trailer.into_inner().next() {
                        Some(call_args) => self.call_args(call_args)?,
                        None => Vec::new(),
                    };
                    Expr::Call {
                        func: Box::new(expr),
                        args,
                    }
                }
                Rule::subscription => {
                    let list = first_child(self, trailer)?;
                    Expr::Subscript {
                        value: Box::new(expr),
                        index: Box::new(self.subscript_list(list)?),
                    }
                }
                Rule::attribute_ref => {
                    let name = first_child(self, trailer)?;
                    Expr::Attribute {
                        value: Box::new(expr),
                        attr: name.as_str().to_string(),
                    }
                }
                _ => return Err(self.error(&trailer, "invalid syntax")),
            };
        }
        Ok(expr)
    }

    fn call_args(&self, pair: Pair) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        for item in pair.into_inner() {
            let item_copy = item.clone();
            let arg = match item.as_rule() {
                Rule::genexp_arg => {
                    let parts: Vec<Pair> = item.into_inner().collect();
                    if parts.len() != 2 {
                        return Err(self.error(&item_copy, "invalid syntax"));
                    }
                    Arg::Positional(Expr::GeneratorExp {
                        elt: Box::new(self.expr(parts[0].clone())?),
                        generators: self.comp_for(parts[1].clone())?,
                    })
                }
                Rule::keyword_arg => {
                    let parts: Vec<Pair> = item.into_inner().collect();
                    if parts.len() != 2 {
                        return Err(self.error(&item_copy, "invalid syntax"));
                    }
                    seen_keyword = true;
                    Arg::Keyword(parts[0].as_str().to_string(), self.expr(parts[1].clone())?)
                }
                Rule::star_arg => Arg::Star(self.expr(first_child(self, item)?)?),
                Rule::kwargs_arg => {
                    seen_keyword = true;
                    Arg::DoubleStar(self.expr(first_child(self, item)?)?)
                }
                _ => {
                    if seen_keyword {
                        return Err(self.error(
                            &item_copy,
                            "positional argument follows keyword argument",
                        ));
                    }
                    Arg::Positional(self.expr(item)?)
                }
            };
            args.push(arg);
        }
        Ok(args)
    }

    fn subscript_list(&self, pair: Pair) -> Result<Expr> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::comma => trailing_comma = true,
                Rule::slice => items.push(self.slice(part)?),
                _ => items.push(self.expr(part)?),
            }
        }
        if items.len() == 1 && !trailing_comma {
            return Ok(items.remove(0));
        }
        Ok(Expr::Tuple(items))
    }

    fn slice(&self, pair: Pair) -> Result<Expr> {
        let mut lower = None;
        let mut upper = None;
        let mut step = None;
        for part in pair.into_inner() {
            let rule = part.as_rule();
            let value = match part.into_inner().next() {
                Some(inner) => Some(Box::new(self.expr(inner)?)),
                None => None,
            };
            match rule {
                Rule::slice_lower => lower = value,
                Rule::slice_upper => upper = value,
                _ => step = value,
            }
        }
        Ok(Expr::Slice { lower, upper, step })
    }

    // ------------------------------------------------------------------
    // Literals
    // ------------------------------------------------------------------

    fn number(&self, pair: Pair) -> Result<Expr> {
        let pair_copy = pair.clone();
        let inner = first_child(self, pair)?;
        let literal = inner.as_str().replace('_', "");
        match inner.as_rule() {
            Rule::imag_number => {
                let digits = &literal[..literal.len() - 1];
                let value: f64 = digits
                    .parse()
                    .map_err(|_| self.error(&pair_copy, "invalid imaginary literal"))?;
                Ok(Expr::Constant(Constant::Imaginary(value)))
            }
            Rule::float_number => {
                let value: f64 = literal
                    .parse()
                    .map_err(|_| self.error(&pair_copy, "invalid decimal literal"))?;
                Ok(Expr::Constant(Constant::Float(value)))
            }
            Rule::int_number => {
                let digits = first_child(self, inner)?;
                let (radix, text) = match digits.as_rule() {
                    Rule::hex_int => (16, &literal[2..]),
                    Rule::oct_int => (8, &literal[2..]),
                    Rule::bin_int => (2, &literal[2..]),
                    _ => (10, literal.as_str()),
                };
                if let Ok(value) = i64::from_str_radix(text, radix) {
                    return Ok(Expr::Constant(Constant::Int(value)));
                }
                let value = BigInt::parse_bytes(text.as_bytes(), radix)
                    .ok_or_else(|| self.error(&pair_copy, "invalid decimal literal"))?;
                Ok(Expr::Constant(Constant::Long(value)))
            }
            _ => Err(self.error(&pair_copy, "invalid syntax")),
        }
    }

    fn strings(&self, pair: Pair) -> Result<Expr> {
        let pair_copy = pair.clone();
        let mut any_bytes = false;
        let mut any_text = false;
        let mut any_fstring = false;
        let mut pieces: Vec<StringPiece> = Vec::new();

        for lit in pair.into_inner() {
            let lit_copy = lit.clone();
            let mut prefix = String::new();
            let mut body = None;
            for part in lit.into_inner() {
                match part.as_rule() {
                    Rule::string_prefix => prefix = part.as_str().to_ascii_lowercase(),
                    _ => body = Some(part),
                }
            }
            let body = body.ok_or_else(|| self.error(&lit_copy, "invalid syntax"))?;
            let quote_len = match body.as_rule() {
                Rule::triple_dq | Rule::triple_sq => 3,
                _ => 1,
            };
            let raw_text = body.as_str();
            let content = &raw_text[quote_len..raw_text.len() - quote_len];
            let raw = prefix.contains('r');

            if prefix.contains('b') {
                any_bytes = true;
                let bytes = decode_bytes(content, raw)
                    .map_err(|msg| self.error(&lit_copy, &msg))?;
                pieces.push(StringPiece::Bytes(bytes));
            } else if prefix.contains('f') {
                any_text = true;
                any_fstring = true;
                let column = self.column(&lit_copy);
                let parts = self.fstring(content, raw, column)?;
                pieces.push(StringPiece::Format(parts));
            } else {
                any_text = true;
                let text = decode_str(content, raw).map_err(|msg| self.error(&lit_copy, &msg))?;
                pieces.push(StringPiece::Text(text));
            }
        }

        if any_bytes && any_text {
            return Err(self.error(&pair_copy, "cannot mix bytes and nonbytes literals"));
        }

        if any_bytes {
            let mut bytes = Vec::new();
            for piece in pieces {
                if let StringPiece::Bytes(b) = piece {
                    bytes.extend(b);
                }
            }
            return Ok(Expr::Constant(Constant::Bytes(bytes)));
        }

        if !any_fstring {
            let mut text = String::new();
            for piece in pieces {
                if let StringPiece::Text(t) = piece {
                    text.push_str(&t);
                }
            }
            return Ok(Expr::Constant(Constant::Str(text)));
        }

        let mut parts: Vec<FStringPart> = Vec::new();
        for piece in pieces {
            match piece {
                StringPiece::Text(t) => push_literal(&mut parts, t),
                StringPiece::Format(fparts) => {
                    for part in fparts {
                        match part {
                            FStringPart::Literal(t) => push_literal(&mut parts, t),
                            field => parts.push(field),
                        }
                    }
                }
                StringPiece::Bytes(_) => {}
            }
        }
        Ok(Expr::FString(parts))
    }

    fn fstring(&self, content: &str, raw: bool, column: usize) -> Result<Vec<FStringPart>> {
        let chars: Vec<char> = content.chars().collect();
        let (parts, _) = self.fstring_parts(&chars, 0, raw, column, false)?;
        Ok(parts)
    }

    /// Parse literal text and replacement fields until the end of input, or
    /// until an unmatched `}` when parsing a nested format spec
    fn fstring_parts(
        &self,
        chars: &[char],
        start: usize,
        raw: bool,
        column: usize,
        in_spec: bool,
    ) -> Result<(Vec<FStringPart>, usize)> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = start;

        while i < chars.len() {
            let c = chars[i];
            match c {
                '{' if !in_spec && chars.get(i + 1) == Some(&'{') => {
                    literal.push('{');
                    i += 2;
                }
                '{' => {
                    self.flush_literal(&mut parts, &mut literal, raw, column)?;
                    let (field, next) = self.fstring_field(chars, i + 1, raw, column)?;
                    parts.push(field);
                    i = next;
                }
                '}' if in_spec => break,
                '}' if chars.get(i + 1) == Some(&'}') => {
                    literal.push('}');
                    i += 2;
                }
                '}' => {
                    return Err(self.error_at(column, "f-string: single '}' is not allowed"));
                }
                '\\' if !raw => {
                    literal.push('\\');
                    if let Some(&next) = chars.get(i + 1) {
                        literal.push(next);
                    }
                    i += 2;
                }
                _ => {
                    literal.push(c);
                    i += 1;
                }
            }
        }

        self.flush_literal(&mut parts, &mut literal, raw, column)?;
        Ok((parts, i))
    }

    fn flush_literal(
        &self,
        parts: &mut Vec<FStringPart>,
        literal: &mut String,
        raw: bool,
        column: usize,
    ) -> Result<()> {
        if literal.is_empty() {
            return Ok(());
        }
        let text = decode_str(literal, raw).map_err(|msg| self.error_at(column, &msg))?;
        push_literal(parts, text);
        literal.clear();
        Ok(())
    }

    fn fstring_field(
        &self,
        chars: &[char],
        start: usize,
        raw: bool,
        column: usize,
    ) -> Result<(FStringPart, usize)> {
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut i = start;

        loop {
            let c = *chars
                .get(i)
                .ok_or_else(|| self.error_at(column, "f-string: expecting '}'"))?;
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                '}' => break,
                '!' if depth == 0 && chars.get(i + 1) != Some(&'=') => break,
                ':' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }

        let expr_text: String = chars[start..i].iter().collect();
        let trimmed = expr_text.trim_end();
        let is_debug = trimmed.ends_with('=')
            && !["==", "!=", "<=", ">="]
                .iter()
                .any(|op| trimmed.ends_with(op));
        let (source, debug_text) = if is_debug {
            (
                trimmed[..trimmed.len() - 1].to_string(),
                Some(expr_text.clone()),
            )
        } else {
            (expr_text.clone(), None)
        };
        if source.trim().is_empty() {
            return Err(self.error_at(
                column,
                "f-string: valid expression required before '}'",
            ));
        }
        let expr = parse_fstring_expr(self, source.trim(), column)?;

        let mut conversion = None;
        if chars.get(i) == Some(&'!') {
            let conv = *chars
                .get(i + 1)
                .ok_or_else(|| self.error_at(column, "f-string: expecting '}'"))?;
            if !matches!(conv, 's' | 'r' | 'a') {
                return Err(self.error_at(
                    column,
                    "f-string: invalid conversion character: expected 's', 'r', or 'a'",
                ));
            }
            conversion = Some(conv);
            i += 2;
        }

        let mut spec = Vec::new();
        if chars.get(i) == Some(&':') {
            let (parts, next) = self.fstring_parts(chars, i + 1, raw, column, true)?;
            spec = parts;
            i = next;
        }

        if chars.get(i) != Some(&'}') {
            return Err(self.error_at(column, "f-string: expecting '}'"));
        }

        Ok((
            FStringPart::Field {
                expr: Box::new(expr),
                debug_text,
                conversion,
                spec,
            },
            i + 1,
        ))
    }
}

enum StringPiece {
    Text(String),
    Bytes(Vec<u8>),
    Format(Vec<FStringPart>),
}

fn push_literal(parts: &mut Vec<FStringPart>, text: String) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(existing)) = parts.last_mut() {
        existing.push_str(&text);
        return;
    }
    parts.push(FStringPart::Literal(text));
}

fn comparison_op(pair: &Pair) -> CmpOp {
    match pair.clone().into_inner().next().map(|p| p.as_rule()) {
        Some(Rule::not_in) => return CmpOp::NotIn,
        Some(Rule::is_not) => return CmpOp::IsNot,
        Some(Rule::kw_in) => return CmpOp::In,
        Some(Rule::kw_is) => return CmpOp::Is,
        _ => {}
    }
    match pair.as_str() {
        "==" => CmpOp::Eq,
        "!=" => CmpOp::NotEq,
        "<=" => CmpOp::LtE,
        ">=" => CmpOp::GtE,
        "<" => CmpOp::Lt,
        _ => CmpOp::Gt,
    }
}

// ============================================================================
// Escape decoding
// ============================================================================

enum Escaped {
    Char(u32),
    Skip,
    Literal(char),
}

/// Decode one escape sequence starting after the backslash
fn decode_escape(chars: &[char], i: &mut usize, unicode: bool) -> std::result::Result<Escaped, String> {
    let c = chars[*i];
    *i += 1;
    let simple = match c {
        '\n' => return Ok(Escaped::Skip),
        '\\' => '\\' as u32,
        '\'' => '\'' as u32,
        '"' => '"' as u32,
        'a' => 7,
        'b' => 8,
        'f' => 12,
        'n' => 10,
        'r' => 13,
        't' => 9,
        'v' => 11,
        '0'..='7' => {
            let mut value = c.to_digit(8).unwrap_or(0);
            let mut count = 1;
            while count < 3 {
                match chars.get(*i).and_then(|d| d.to_digit(8)) {
                    Some(d) => {
                        value = value * 8 + d;
                        *i += 1;
                        count += 1;
                    }
                    None => break,
                }
            }
            value
        }
        'x' => return read_hex(chars, i, 2, "\\xXX").map(Escaped::Char),
        'u' if unicode => return read_hex(chars, i, 4, "\\uXXXX").map(Escaped::Char),
        'U' if unicode => return read_hex(chars, i, 8, "\\UXXXXXXXX").map(Escaped::Char),
        'N' if unicode => return Err("\\N{...} escapes are not supported".to_string()),
        other => return Ok(Escaped::Literal(other)),
    };
    Ok(Escaped::Char(simple))
}

fn read_hex(chars: &[char], i: &mut usize, len: usize, form: &str) -> std::result::Result<u32, String> {
    let digits: String = chars.iter().skip(*i).take(len).collect();
    if digits.chars().count() != len || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "(unicode error) truncated {} escape",
            form
        ));
    }
    *i += len;
    u32::from_str_radix(&digits, 16).map_err(|e| e.to_string())
}

/// Decode the body of a `str` literal
pub fn decode_str(content: &str, raw: bool) -> std::result::Result<String, String> {
    if raw {
        return Ok(content.to_string());
    }
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '\\' || i >= chars.len() {
            out.push(c);
            continue;
        }
        match decode_escape(&chars, &mut i, true)? {
            Escaped::Char(code) => {
                let ch = char::from_u32(code)
                    .ok_or_else(|| "(unicode error) illegal Unicode character".to_string())?;
                out.push(ch);
            }
            Escaped::Skip => {}
            Escaped::Literal(other) => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// Decode the body of a `bytes` literal
pub fn decode_bytes(content: &str, raw: bool) -> std::result::Result<Vec<u8>, String> {
    if !content.is_ascii() {
        return Err("bytes can only contain ASCII literal characters".to_string());
    }
    if raw {
        return Ok(content.as_bytes().to_vec());
    }
    let chars: Vec<char> = content.chars().collect();
    let mut out = Vec::with_capacity(content.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '\\' || i >= chars.len() {
            out.push(c as u8);
            continue;
        }
        match decode_escape(&chars, &mut i, false)? {
            Escaped::Char(code) => out.push((code & 0xFF) as u8),
            Escaped::Skip => {}
            Escaped::Literal(other) => {
                out.push(b'\\');
                out.push(other as u8);
            }
        }
    }
    Ok(out)
}

// ============================================================================
// Block assembly
// ============================================================================

struct BlockBuilder<'a> {
    lines: VecDeque<ParsedLine>,
    /// Indentation widths of the enclosing blocks
    levels: Vec<usize>,
    physical: &'a [String],
}

impl<'a> BlockBuilder<'a> {
    fn text(&self, lineno: usize) -> &str {
        self.physical
            .get(lineno.saturating_sub(1))
            .map(String::as_str)
            .unwrap_or("")
    }

    fn invalid(&self, lineno: usize) -> SyntaxError {
        let text = self.text(lineno);
        let offset = text.len() - text.trim_start().len() + 1;
        SyntaxError::new("invalid syntax", lineno, offset, text)
    }

    fn program(&mut self) -> Result<Vec<Stmt>> {
        if let Some(first) = self.lines.front() {
            if first.indent > 0 {
                return Err(SyntaxError::indentation(
                    "unexpected indent",
                    first.lineno,
                    self.text(first.lineno),
                ));
            }
        }
        self.block(0)
    }

    fn block(&mut self, indent: usize) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while let Some(next) = self.lines.front() {
            if next.indent < indent {
                if !self.levels.contains(&next.indent) {
                    return Err(SyntaxError::indentation(
                        "unindent does not match any outer indentation level",
                        next.lineno,
                        self.text(next.lineno),
                    ));
                }
                break;
            }
            if next.indent > indent {
                return Err(SyntaxError::indentation(
                    "unexpected indent",
                    next.lineno,
                    self.text(next.lineno),
                ));
            }
            self.statement(indent, &mut body)?;
        }
        Ok(body)
    }

    fn peek_header(&self, indent: usize) -> Option<&Header> {
        match self.lines.front() {
            Some(ParsedLine {
                indent: line_indent,
                kind: LineKind::Header { header, .. },
                ..
            }) if *line_indent == indent => Some(header),
            _ => None,
        }
    }

    /// Take the next line, which the caller has just peeked as a header
    fn take_header(&mut self) -> Option<(usize, Header, Option<Vec<Stmt>>)> {
        match self.lines.pop_front() {
            Some(ParsedLine {
                lineno,
                kind: LineKind::Header { header, inline },
                ..
            }) => Some((lineno, header, inline)),
            _ => None,
        }
    }

    fn suite(
        &mut self,
        lineno: usize,
        indent: usize,
        header: &Header,
        inline: Option<Vec<Stmt>>,
    ) -> Result<Block> {
        if let Some(stmts) = inline {
            return Ok(stmts.into());
        }
        match self.lines.front() {
            Some(next) if next.indent > indent => {
                let inner = next.indent;
                self.levels.push(inner);
                let body = self.block(inner);
                self.levels.pop();
                body.map(Block::from)
            }
            next => {
                let error_line = next.map(|l| l.lineno).unwrap_or(lineno + 1);
                Err(SyntaxError::indentation(
                    format!(
                        "expected an indented block after {} on line {}",
                        header.describe(),
                        lineno
                    ),
                    error_line,
                    self.text(error_line),
                ))
            }
        }
    }

    fn statement(&mut self, indent: usize, body: &mut Vec<Stmt>) -> Result<()> {
        let line = match self.lines.pop_front() {
            Some(line) => line,
            None => return Ok(()),
        };
        let lineno = line.lineno;

        match line.kind {
            LineKind::Simple(stmts) => body.extend(stmts),
            LineKind::Decorator(expr) => {
                let mut decorators = vec![expr];
                loop {
                    let is_decorator = matches!(
                        self.lines.front(),
                        Some(ParsedLine { indent: i, kind: LineKind::Decorator(_), .. }) if *i == indent
                    );
                    if !is_decorator {
                        break;
                    }
                    if let Some(ParsedLine {
                        kind: LineKind::Decorator(expr),
                        ..
                    }) = self.lines.pop_front()
                    {
                        decorators.push(expr);
                    }
                }
                match self.peek_header(indent) {
                    Some(Header::Def { .. }) | Some(Header::Class(_)) => {}
                    _ => {
                        let next_line = self.lines.front().map(|l| l.lineno).unwrap_or(lineno);
                        return Err(self.invalid(next_line));
                    }
                }
                if let Some((def_line, header, inline)) = self.take_header() {
                    body.push(self.compound(def_line, indent, header, inline, decorators)?);
                }
            }
            LineKind::Header { header, inline } => {
                body.push(self.compound(lineno, indent, header, inline, Vec::new())?);
            }
        }
        Ok(())
    }

    fn compound(
        &mut self,
        lineno: usize,
        indent: usize,
        header: Header,
        inline: Option<Vec<Stmt>>,
        decorators: Vec<Expr>,
    ) -> Result<Stmt> {
        let suite = self.suite(lineno, indent, &header, inline)?;
        let kind = match header {
            Header::If(test) => {
                let mut branches = vec![(test, suite)];
                let mut orelse = Block::from(Vec::new());
                loop {
                    match self.peek_header(indent) {
                        Some(Header::Elif(_)) => {
                            if let Some((line, header, inline)) = self.take_header() {
                                let body = self.suite(line, indent, &header, inline)?;
                                if let Header::Elif(test) = header {
                                    branches.push((test, body));
                                }
                            }
                        }
                        Some(Header::Else) => {
                            orelse = self.else_suite(indent)?;
                            break;
                        }
                        _ => break,
                    }
                }
                StmtKind::If { branches, orelse }
            }
            Header::While(test) => {
                let orelse = self.optional_else(indent)?;
                StmtKind::While {
                    test,
                    body: suite,
                    orelse,
                }
            }
            Header::For(target, iter) => {
                let orelse = self.optional_else(indent)?;
                StmtKind::For {
                    target,
                    iter,
                    body: suite,
                    orelse,
                }
            }
            Header::Try => self.try_statement(lineno, indent, suite)?,
            Header::Def { name, params } => {
                let names = ScopeNames::collect(&params, &suite);
                StmtKind::FunctionDef(Rc::new(FunctionDef {
                    name,
                    line: lineno,
                    params,
                    body: suite,
                    decorators,
                    locals: names.bound,
                    globals: names.globals,
                    nonlocals: names.nonlocals,
                    generator: names.yields,
                }))
            }
            Header::Class(name) => StmtKind::ClassDef { name, body: suite },
            Header::With(items) => StmtKind::With { items, body: suite },
            Header::Elif(_) | Header::Else | Header::Except(..) | Header::Finally => {
                return Err(self.invalid(lineno));
            }
        };
        Ok(Stmt { line: lineno, kind })
    }

    fn else_suite(&mut self, indent: usize) -> Result<Block> {
        match self.take_header() {
            Some((line, header, inline)) => self.suite(line, indent, &header, inline),
            None => Ok(Block::from(Vec::new())),
        }
    }

    fn optional_else(&mut self, indent: usize) -> Result<Block> {
        if let Some(Header::Else) = self.peek_header(indent) {
            return self.else_suite(indent);
        }
        Ok(Block::from(Vec::new()))
    }

    fn try_statement(&mut self, lineno: usize, indent: usize, body: Block) -> Result<StmtKind> {
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while let Some(Header::Except(..)) = self.peek_header(indent) {
            if let Some((line, header, inline)) = self.take_header() {
                let handler_body = self.suite(line, indent, &header, inline)?;
                if let Some(previous) = handlers.last() {
                    if previous.kind.is_none() {
                        return Err(SyntaxError::new(
                            "default 'except:' must be last",
                            previous.line,
                            1,
                            self.text(previous.line),
                        ));
                    }
                }
                if let Header::Except(kind, name) = header {
                    handlers.push(ExceptHandler {
                        line,
                        kind,
                        name,
                        body: handler_body,
                    });
                }
            }
        }

        let mut orelse = Block::from(Vec::new());
        if let Some(Header::Else) = self.peek_header(indent) {
            if handlers.is_empty() {
                let line = self.lines.front().map(|l| l.lineno).unwrap_or(lineno);
                return Err(self.invalid(line));
            }
            orelse = self.else_suite(indent)?;
        }

        let mut finalbody = Block::from(Vec::new());
        if let Some(Header::Finally) = self.peek_header(indent) {
            finalbody = self.else_suite(indent)?;
        }

        if handlers.is_empty() && finalbody.is_empty() {
            let error_line = self.lines.front().map(|l| l.lineno).unwrap_or(lineno + 1);
            return Err(SyntaxError::new(
                "expected 'except' or 'finally' block",
                error_line,
                1,
                self.text(error_line),
            ));
        }

        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }
}

// ============================================================================
// Placement checks
// ============================================================================

/// Where a statement sits, for checks the reference interpreter makes at
/// compile time
#[derive(Debug, Clone, Copy, Default)]
struct Placement {
    in_function: bool,
    in_loop: bool,
}

fn check_placement(body: &[Stmt], placement: Placement, physical: &[String]) -> Result<()> {
    let error = |stmt: &Stmt, message: &str| {
        let text = physical
            .get(stmt.line.saturating_sub(1))
            .map(String::as_str)
            .unwrap_or("");
        let offset = text.len() - text.trim_start().len() + 1;
        SyntaxError::new(message, stmt.line, offset, text)
    };

    for stmt in body {
        match &stmt.kind {
            StmtKind::Return(_) if !placement.in_function => {
                return Err(error(stmt, "'return' outside function"));
            }
            StmtKind::Break if !placement.in_loop => {
                return Err(error(stmt, "'break' outside loop"));
            }
            StmtKind::Continue if !placement.in_loop => {
                return Err(error(stmt, "'continue' not properly in loop"));
            }
            StmtKind::Nonlocal(_) if !placement.in_function => {
                return Err(error(stmt, "nonlocal declaration not allowed at module level"));
            }
            StmtKind::Yield { .. } if !placement.in_function => {
                return Err(error(stmt, "'yield' outside function"));
            }
            StmtKind::If { branches, orelse } => {
                for (_, branch) in branches {
                    check_placement(branch, placement, physical)?;
                }
                check_placement(orelse, placement, physical)?;
            }
            StmtKind::While { body, orelse, .. } | StmtKind::For { body, orelse, .. } => {
                let looped = Placement {
                    in_loop: true,
                    ..placement
                };
                check_placement(body, looped, physical)?;
                check_placement(orelse, placement, physical)?;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                check_placement(body, placement, physical)?;
                for handler in handlers {
                    check_placement(&handler.body, placement, physical)?;
                }
                check_placement(orelse, placement, physical)?;
                check_placement(finalbody, placement, physical)?;
            }
            StmtKind::FunctionDef(def) => {
                let inside = Placement {
                    in_function: true,
                    in_loop: false,
                };
                check_placement(&def.body, inside, physical)?;
            }
            StmtKind::ClassDef { body, .. } => {
                let inside = Placement {
                    in_function: false,
                    in_loop: false,
                };
                check_placement(body, inside, physical)?;
            }
            StmtKind::With { body, .. } => check_placement(body, placement, physical)?,
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(source: &str) -> StmtKind {
        let program = parse_program(source).unwrap();
        assert_eq!(program.body.len(), 1, "expected one statement");
        program.body.into_iter().next().unwrap().kind
    }

    #[test]
    fn test_parse_assignment_and_call() {
        let program = parse_program("x = int(input().strip())\nprint(x)").unwrap();
        assert_eq!(program.body.len(), 2);
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert!(matches!(targets[0], Target::Name(ref n) if n == "x"));
                assert!(matches!(value, Expr::Call { .. }));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_if_elif_else_chain() {
        let source = "if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n";
        match parse_one(source) {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
            }
            other => panic!("Expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_try_except_finally() {
        let source = "try:\n    x = 1\nexcept ValueError as e:\n    pass\nexcept:\n    pass\nfinally:\n    y = 2\n";
        match parse_one(source) {
            StmtKind::Try {
                handlers,
                finalbody,
                ..
            } => {
                assert_eq!(handlers.len(), 2);
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert!(handlers[1].kind.is_none());
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("Expected try statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_function_collects_locals() {
        let source = "def f(a, b=2, *rest, key=None, **extra):\n    global g\n    total = a + b\n    for i in rest:\n        total += i\n    g = total\n    return total\n";
        match parse_one(source) {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.params.positional.len(), 2);
                assert_eq!(def.params.vararg.as_deref(), Some("rest"));
                assert_eq!(def.params.kwonly.len(), 1);
                assert_eq!(def.params.kwarg.as_deref(), Some("extra"));
                assert!(def.locals.contains("total"));
                assert!(def.locals.contains("i"));
                assert!(!def.locals.contains("g"));
                assert!(def.globals.contains("g"));
            }
            other => panic!("Expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        match parse_one("x = 1 + 2 * 3 ** 2") {
            StmtKind::Assign { value, .. } => match value {
                Expr::BinOp { op, right, .. } => {
                    assert_eq!(op, BinOp::Add);
                    assert!(matches!(*right, Expr::BinOp { op: BinOp::Mul, .. }));
                }
                other => panic!("Expected addition, got {:?}", other),
            },
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_comparison_and_membership() {
        match parse_one("ok = 0 <= score <= 100 and name not in seen") {
            StmtKind::Assign { value, .. } => match value {
                Expr::BoolOp { op, values } => {
                    assert_eq!(op, BoolOp::And);
                    assert!(matches!(&values[0], Expr::Compare { ops, .. } if ops.len() == 2));
                    assert!(matches!(&values[1], Expr::Compare { ops, .. } if ops[0].0 == CmpOp::NotIn));
                }
                other => panic!("Expected boolean operation, got {:?}", other),
            },
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_tuple_unpacking_with_star() {
        match parse_one("first, *rest = items") {
            StmtKind::Assign { targets, .. } => match &targets[0] {
                Target::Sequence(items) => {
                    assert_eq!(items.len(), 2);
                    assert!(matches!(items[1], Target::Starred(_)));
                }
                other => panic!("Expected sequence target, got {:?}", other),
            },
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_comprehensions_and_lambda() {
        assert!(matches!(
            parse_one("squares = [n * n for n in range(10) if n % 2 == 0]"),
            StmtKind::Assign { value: Expr::ListComp { .. }, .. }
        ));
        assert!(matches!(
            parse_one("lookup = {k: v for k, v in pairs}"),
            StmtKind::Assign { value: Expr::DictComp { .. }, .. }
        ));
        assert!(matches!(
            parse_one("total = sum(x for x in data)"),
            StmtKind::Assign { value: Expr::Call { .. }, .. }
        ));
        assert!(matches!(
            parse_one("key = lambda pair: pair[1]"),
            StmtKind::Assign { value: Expr::Lambda(_), .. }
        ));
    }

    #[test]
    fn test_slices() {
        match parse_one("tail = items[1:]") {
            StmtKind::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(*index, Expr::Slice { lower: Some(_), upper: None, step: None }));
            }
            other => panic!("Expected subscript, got {:?}", other),
        }
        match parse_one("rev = items[::-1]") {
            StmtKind::Assign { value: Expr::Subscript { index, .. }, .. } => {
                assert!(matches!(*index, Expr::Slice { lower: None, upper: None, step: Some(_) }));
            }
            other => panic!("Expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_fstring_fields() {
        match parse_one("msg = f'{name!r:>10} has {count=} items {{ok}}'") {
            StmtKind::Assign { value: Expr::FString(parts), .. } => {
                assert_eq!(parts.len(), 4);
                match &parts[0] {
                    FStringPart::Field { conversion, spec, .. } => {
                        assert_eq!(*conversion, Some('r'));
                        assert!(matches!(&spec[0], FStringPart::Literal(s) if s == ">10"));
                    }
                    other => panic!("Expected field, got {:?}", other),
                }
                match &parts[2] {
                    FStringPart::Field { debug_text, .. } => {
                        assert_eq!(debug_text.as_deref(), Some("count="));
                    }
                    other => panic!("Expected debug field, got {:?}", other),
                }
                assert!(matches!(&parts[3], FStringPart::Literal(s) if s == " items {ok}"));
            }
            other => panic!("Expected f-string, got {:?}", other),
        }
    }

    #[test]
    fn test_string_escapes_and_concatenation() {
        match parse_one("s = 'a\\tb' \"c\\n\" r'\\d'") {
            StmtKind::Assign { value: Expr::Constant(Constant::Str(s)), .. } => {
                assert_eq!(s, "a\tbc\n\\d");
            }
            other => panic!("Expected string constant, got {:?}", other),
        }
    }

    #[test]
    fn test_numbers() {
        assert!(matches!(
            parse_one("n = 0x1F"),
            StmtKind::Assign { value: Expr::Constant(Constant::Int(31)), .. }
        ));
        assert!(matches!(
            parse_one("n = 1_000"),
            StmtKind::Assign { value: Expr::Constant(Constant::Int(1000)), .. }
        ));
        assert!(matches!(
            parse_one("n = 2.5e3"),
            StmtKind::Assign { value: Expr::Constant(Constant::Float(f)), .. } if f == 2500.0
        ));
        assert!(matches!(
            parse_one("n = 3j"),
            StmtKind::Assign { value: Expr::Constant(Constant::Imaginary(f)), .. } if f == 3.0
        ));
        match parse_one("n = 0x1_0000_0000_0000_0000") {
            StmtKind::Assign { value: Expr::Constant(Constant::Long(n)), .. } => {
                assert_eq!(n.to_string(), "18446744073709551616");
            }
            other => panic!("Expected wide int constant, got {:?}", other),
        }
    }

    #[test]
    fn test_single_line_suite() {
        match parse_one("if x: print(1); print(2)") {
            StmtKind::If { branches, .. } => assert_eq!(branches[0].1.len(), 2),
            other => panic!("Expected if statement, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse_program("x = 1\ny = = 2\n").unwrap_err();
        assert_eq!(err.lineno, 2);
        assert_eq!(err.message, "invalid syntax");
    }

    #[test]
    fn test_indentation_errors() {
        let err = parse_program("if x:\nprint(1)\n").unwrap_err();
        assert_eq!(err.kind, crate::parser::SyntaxErrorKind::Indentation);
        assert!(err.message.contains("expected an indented block after 'if' statement on line 1"));

        let err = parse_program("x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(err.message, "unexpected indent");

        let err = parse_program("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert_eq!(err.message, "unindent does not match any outer indentation level");
    }

    #[test]
    fn test_placement_errors() {
        let err = parse_program("print(1)\nbreak\n").unwrap_err();
        assert_eq!(err.message, "'break' outside loop");
        assert_eq!(err.lineno, 2);
        let err = parse_program("return 5\n").unwrap_err();
        assert_eq!(err.message, "'return' outside function");
        let err = parse_program("for i in range(3):\n    yield i\n").unwrap_err();
        assert_eq!(err.message, "'yield' outside function");
    }

    #[test]
    fn test_yield_marks_generator() {
        let source = "def gen(n):\n    for i in range(n):\n        yield i*i\n    got = yield\n    yield from other()\n";
        match parse_one(source) {
            StmtKind::FunctionDef(def) => {
                assert!(def.generator);
                assert!(def.locals.contains("got"));
                match &def.body[2].kind {
                    StmtKind::Yield { delegate, .. } => assert!(*delegate),
                    other => panic!("Expected yield from, got {:?}", other),
                }
            }
            other => panic!("Expected function definition, got {:?}", other),
        }
        // A yield in a nested function does not make the outer one a generator
        match parse_one("def outer():\n    def inner():\n        yield 1\n    return inner\n") {
            StmtKind::FunctionDef(def) => assert!(!def.generator),
            other => panic!("Expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_named_expressions() {
        match parse_one("while (line := input()) != 'end':\n    pass\n") {
            StmtKind::While { test, .. } => match test {
                Expr::Compare { left, .. } => {
                    assert!(matches!(*left, Expr::NamedExpr { ref name, .. } if name == "line"))
                }
                other => panic!("Expected comparison, got {:?}", other),
            },
            other => panic!("Expected while loop, got {:?}", other),
        }
        assert!(parse_program("if n := len(a):\n    print(n)\n").is_ok());
        assert!(parse_program("print(y := 5, [z for x in a if (z := x)])\n").is_ok());
        match parse_one("def f(a):\n    return [y for x in a if (y := x * 2) > 1]\n") {
            StmtKind::FunctionDef(def) => assert!(def.locals.contains("y")),
            other => panic!("Expected function definition, got {:?}", other),
        }
    }

    #[test]
    fn test_cannot_assign_to_call() {
        let err = parse_program("f() = 3\n").unwrap_err();
        assert_eq!(err.message, "cannot assign to function call");
    }

    #[test]
    fn test_keywords_are_not_identifiers() {
        assert!(parse_program("class = 3\n").is_err());
        assert!(parse_program("classes = 3\nimported = 1\n").is_ok());
    }

    #[test]
    fn test_imports_parse() {
        match parse_one("import os.path, sys") {
            StmtKind::Import(modules) => assert_eq!(modules, vec!["os.path", "sys"]),
            other => panic!("Expected import, got {:?}", other),
        }
        match parse_one("from math import sqrt") {
            StmtKind::Import(modules) => assert_eq!(modules, vec!["math"]),
            other => panic!("Expected import, got {:?}", other),
        }
    }
}
