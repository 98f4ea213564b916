//! Rulepipe – a rule language and interpreter for log message pipelines
//!
//! This crate implements:
//! - A small rule language (`rule ... when ... then ... end`) with a parser
//!   that reports every diagnostic at once
//! - A pluggable, typed function registry with an error sentinel for
//!   unresolved names
//! - A stage/pipeline interpreter with all/either/pass match policies and
//!   per-rule fault isolation
//! - A concurrent cache that compiles hot rules to closures
//! - A simulator that records a human-readable trace of every transition

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Functions callable from rule expressions
pub mod functions;
/// Rule language front-end
pub mod lang;
/// Evaluation, interpretation and deployment
pub mod runtime;

// Re-export key types for convenience
pub use functions::{Function, FunctionCatalog, FunctionRegistry};
pub use lang::{Diagnostics, Pipeline, Rule, Value};
pub use runtime::{
    InterpreterConfig, Message, PipelineInterpreter, PipelineSet, ProcessingReport, Simulator,
};

/// Current version of the rulepipe crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
