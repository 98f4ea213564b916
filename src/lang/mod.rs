//! Front-end for the rule language.
//!
//! Source text flows through the [`lexer`] into the recursive-descent
//! [`parser`], which resolves function names against a
//! [`FunctionRegistry`](crate::functions::FunctionRegistry), infers static
//! types and produces [`Rule`] and [`Pipeline`] trees. Problems are never
//! thrown: every recoverable syntax or semantic error is collected into a
//! [`Diagnostics`] set so editors can show them all at once.

/// Abstract syntax tree for rules and pipelines.
pub mod ast;
/// Source positions, parse errors and the aggregated diagnostics set.
pub mod diagnostics;
/// Tokenizer for rule-language source text.
pub mod lexer;
/// Parser, name resolution and static type checks.
pub mod parser;
/// Runtime values and their static types.
pub mod value;

pub use ast::{
    BinaryOp, Declaration, Expression, ExpressionKind, Fingerprint, FunctionCall, MatchPolicy,
    Pipeline, Rule, Stage, Statement, UnaryOp,
};
pub use diagnostics::{Diagnostics, ParseError, ParseErrorKind, Position};
pub use parser::{
    MAX_NESTING, ParseOutcome, parse, parse_pipeline, parse_rule, parse_with_diagnostics,
};
pub use value::{Value, ValueType};
