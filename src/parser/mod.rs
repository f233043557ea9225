//! Parser for the Python subset accepted by the sandbox

pub mod ast;
pub mod error;
pub mod grammar;
pub mod lines;

pub use ast::*;
pub use error::{SyntaxError, SyntaxErrorKind};
pub use grammar::parse_program;
