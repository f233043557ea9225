//! Abstract Syntax Tree definitions for learner programs

use std::collections::BTreeSet;
use std::rc::Rc;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// A parsed program is a sequence of statements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// The statements of one suite, shared so a suspended generator can hold its place
pub type Block = Rc<[Stmt]>;

/// A statement with the line it starts on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    /// `yield value` or `yield from value`, alone or as `target = yield value`
    Yield {
        targets: Vec<Target>,
        value: Option<Expr>,
        delegate: bool,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    /// `x: int = 5`; the annotation is not evaluated
    AnnAssign {
        target: Target,
        value: Option<Expr>,
    },
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Del(Vec<Target>),
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    /// Module names named by `import` or `from ... import`
    Import(Vec<String>),
    If {
        branches: Vec<(Expr, Block)>,
        orelse: Block,
    },
    While {
        test: Expr,
        body: Block,
        orelse: Block,
    },
    For {
        target: Target,
        iter: Expr,
        body: Block,
        orelse: Block,
    },
    Try {
        body: Block,
        handlers: Vec<ExceptHandler>,
        orelse: Block,
        finalbody: Block,
    },
    FunctionDef(Rc<FunctionDef>),
    ClassDef {
        name: String,
        body: Block,
    },
    With {
        items: Vec<(Expr, Option<Target>)>,
        body: Block,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptHandler {
    pub line: usize,
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Block,
}

/// A `def` or `lambda`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub line: usize,
    pub params: Params,
    pub body: Block,
    pub decorators: Vec<Expr>,
    /// Names bound inside the body; these are local to every call
    pub locals: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    pub nonlocals: BTreeSet<String>,
    /// The body contains `yield`, so calling it builds a generator
    pub generator: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {
    pub positional: Vec<Param>,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
}

impl Params {
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.positional.iter().map(|p| p.name.as_str()).collect();
        names.extend(self.vararg.as_deref());
        names.extend(self.kwonly.iter().map(|p| p.name.as_str()));
        names.extend(self.kwarg.as_deref());
        names
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
}

/// Assignment targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Target {
    Name(String),
    Attribute { value: Expr, attr: String },
    Subscript { value: Expr, index: Expr },
    Sequence(Vec<Target>),
    Starred(Box<Target>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Constant(Constant),
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    /// `name := value`
    NamedExpr {
        name: String,
        value: Box<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    /// Integer literal outside the `i64` range
    Long(BigInt),
    Float(f64),
    /// Imaginary literal such as `2j`
    Imaginary(f64),
    Str(String),
    Bytes(Vec<u8>),
    Ellipsis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<Expr>,
        /// Source text of the expression, echoed by the `{expr=}` form
        debug_text: Option<String>,
        conversion: Option<char>,
        spec: Vec<FStringPart>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
    Star(Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

/// One `for ... in ... if ...` clause of a comprehension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::MatMul => "@",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<BinOp> {
        let op = match symbol {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            "*" => BinOp::Mul,
            "@" => BinOp::MatMul,
            "/" => BinOp::Div,
            "//" => BinOp::FloorDiv,
            "%" => BinOp::Mod,
            "**" => BinOp::Pow,
            "<<" => BinOp::LShift,
            ">>" => BinOp::RShift,
            "|" => BinOp::BitOr,
            "^" => BinOp::BitXor,
            "&" => BinOp::BitAnd,
            _ => return None,
        };
        Some(op)
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
        };
        write!(f, "{}", symbol)
    }
}

// ============================================================================
// Scope analysis
// ============================================================================

/// Names a function body binds, plus its `global`/`nonlocal` declarations
#[derive(Debug, Default)]
pub struct ScopeNames {
    pub bound: BTreeSet<String>,
    pub globals: BTreeSet<String>,
    pub nonlocals: BTreeSet<String>,
    /// The body yields, directly rather than in a nested function
    pub yields: bool,
}

impl ScopeNames {
    /// Collect the names bound directly in `body` (nested functions are opaque)
    pub fn collect(params: &Params, body: &[Stmt]) -> ScopeNames {
        let mut names = ScopeNames::default();
        for name in params.names() {
            names.bound.insert(name.to_string());
        }
        names.visit_block(body);
        for name in names.globals.iter().chain(names.nonlocals.iter()) {
            names.bound.remove(name);
        }
        names
    }

    fn visit_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(value) => self.visit_expr(value),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.visit_target(target);
                }
                self.visit_expr(value);
            }
            StmtKind::Yield { targets, value, .. } => {
                self.yields = true;
                for target in targets {
                    self.visit_target(target);
                }
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.visit_target(target);
                self.visit_expr(value);
            }
            StmtKind::AnnAssign { target, value } => {
                self.visit_target(target);
                if let Some(value) = value {
                    self.visit_expr(value);
                }
            }
            StmtKind::Return(Some(value)) => self.visit_expr(value),
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test);
                if let Some(msg) = msg {
                    self.visit_expr(msg);
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.visit_target(target);
                }
            }
            StmtKind::Global(names) => self.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => self.nonlocals.extend(names.iter().cloned()),
            StmtKind::Import(modules) => {
                for module in modules {
                    let root = module.split('.').next().unwrap_or(module);
                    self.bound.insert(root.to_string());
                }
            }
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    self.visit_expr(test);
                    self.visit_block(body);
                }
                self.visit_block(orelse);
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_block(body);
                self.visit_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.visit_target(target);
                self.visit_expr(iter);
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
            }
            StmtKind::ClassDef { name, .. } => {
                self.bound.insert(name.clone());
            }
            StmtKind::With { items, body } => {
                for (_, target) in items {
                    if let Some(target) = target {
                        self.visit_target(target);
                    }
                }
                self.visit_block(body);
            }
            _ => {}
        }
    }

    fn visit_target(&mut self, target: &Target) {
        match target {
            Target::Name(name) => {
                self.bound.insert(name.clone());
            }
            Target::Sequence(items) => {
                for item in items {
                    self.visit_target(item);
                }
            }
            Target::Starred(inner) => self.visit_target(inner),
            Target::Attribute { .. } | Target::Subscript { .. } => {}
        }
    }

    /// Find `:=` bindings; those inside comprehensions bind here too
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::NamedExpr { name, value } => {
                self.bound.insert(name.clone());
                self.visit_expr(value);
            }
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                items.iter().for_each(|item| self.visit_expr(item))
            }
            Expr::BoolOp { values, .. } => values.iter().for_each(|value| self.visit_expr(value)),
            Expr::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            self.visit_expr(key);
                            self.visit_expr(value);
                        }
                        DictItem::Unpack(value) => self.visit_expr(value),
                    }
                }
            }
            Expr::Starred(value) | Expr::UnaryOp { operand: value, .. } | Expr::Attribute { value, .. } => {
                self.visit_expr(value)
            }
            Expr::BinOp { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::Compare { left, ops } => {
                self.visit_expr(left);
                ops.iter().for_each(|(_, right)| self.visit_expr(right));
            }
            Expr::IfExp { test, body, orelse } => {
                self.visit_expr(test);
                self.visit_expr(body);
                self.visit_expr(orelse);
            }
            Expr::Call { func, args } => {
                self.visit_expr(func);
                for arg in args {
                    match arg {
                        Arg::Positional(value)
                        | Arg::Keyword(_, value)
                        | Arg::Star(value)
                        | Arg::DoubleStar(value) => self.visit_expr(value),
                    }
                }
            }
            Expr::Subscript { value, index } => {
                self.visit_expr(value);
                self.visit_expr(index);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part);
                }
            }
            Expr::ListComp { elt, generators }
            | Expr::SetComp { elt, generators }
            | Expr::GeneratorExp { elt, generators } => {
                self.visit_expr(elt);
                self.visit_comprehension(generators);
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.visit_expr(key);
                self.visit_expr(value);
                self.visit_comprehension(generators);
            }
            Expr::FString(parts) => self.visit_fstring(parts),
            Expr::Constant(_) | Expr::Name(_) | Expr::Lambda(_) => {}
        }
    }

    fn visit_comprehension(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.visit_expr(&generator.iter);
            generator.ifs.iter().for_each(|test| self.visit_expr(test));
        }
    }

    fn visit_fstring(&mut self, parts: &[FStringPart]) {
        for part in parts {
            if let FStringPart::Field { expr, spec, .. } = part {
                self.visit_expr(expr);
                self.visit_fstring(spec);
            }
        }
    }
}
