//! Functions callable from rule expressions.
//!
//! A [`Function`] declares its signature through a [`FunctionDescriptor`] and
//! is invoked with [`FunctionArgs`] already bound to parameter names. The
//! parser resolves call sites against a [`FunctionRegistry`] snapshot;
//! unknown names resolve to the [`ErrorFunction`] sentinel.

pub mod builtins;
mod function;
mod registry;

pub use function::{FnFunction, Function, FunctionArgs, FunctionDescriptor, ParameterDescriptor};
pub use registry::{ErrorFunction, FunctionCatalog, FunctionRegistry};
