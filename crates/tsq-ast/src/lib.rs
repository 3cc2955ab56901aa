//! TSQ AST - parser and AST types

pub mod ast;
mod parser;
mod to_ir;

pub use ast::*;
pub use parser::{parse, ParseError};

use std::collections::BTreeSet;

/// Parse and lower in one step.
pub fn parse_program(
    source: &str,
    declared: &BTreeSet<String>,
) -> Result<tsq_ir::semantic::Program, ParseError> {
    parse(source)?.to_ir(declared)
}
