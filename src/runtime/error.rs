//! Error types for rule evaluation, compilation and deployment
//!
//! Domain errors are thiserror enums. None of them ever escapes a message
//! run: the interpreter turns [`EvalError`] into a per-rule fault and
//! [`CompileError`] into an interpreted fallback.

use thiserror::Error;

use crate::lang::{Diagnostics, Value, ValueType};

/// A fault raised while evaluating a condition or executing a statement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// The rule calls a function the registry did not know at parse time.
    #[error("function '{name}' is not defined")]
    UnresolvedFunction {
        /// Name used at the call site.
        name: String,
    },

    /// A value had the wrong runtime type.
    #[error("expected {expected}, found {actual}")]
    TypeMismatch {
        /// Required type.
        expected: ValueType,
        /// Description of the value found.
        actual: String,
    },

    /// Arithmetic on a null value.
    #[error("null operand for '{operator}'")]
    NullOperand {
        /// Operator symbol.
        operator: String,
    },

    /// Integer or float division (or remainder) by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Integer arithmetic overflowed.
    #[error("integer overflow in '{operator}'")]
    Overflow {
        /// Operator symbol.
        operator: String,
    },

    /// List index outside the list.
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// List length.
        len: usize,
    },

    /// A required function argument was absent or null.
    #[error("missing required argument '{param}' for function '{function}'")]
    MissingArgument {
        /// Function name.
        function: String,
        /// Parameter name.
        param: String,
    },

    /// A variable was read before any binding.
    #[error("variable '{0}' is not bound")]
    UndefinedVariable(String),

    /// A function reported a failure of its own.
    #[error("{name}: {message}")]
    Function {
        /// Function name.
        name: String,
        /// Failure description.
        message: String,
    },

    /// A function panicked.
    #[error("panic during evaluation: {0}")]
    Panic(String),
}

impl EvalError {
    /// Type mismatch against a concrete value.
    pub fn type_mismatch(expected: ValueType, actual: &Value) -> Self {
        let actual = match actual {
            Value::Null => "null".to_string(),
            other => other.value_type().to_string(),
        };
        EvalError::TypeMismatch { expected, actual }
    }
}

/// Result alias for evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Why a rule could not be compiled; the rule stays interpreted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// The rule calls a function that did not resolve.
    #[error("rule calls unresolved function '{name}'")]
    UnresolvedFunction {
        /// Name used at the call site.
        name: String,
    },

    /// An expression nests deeper than the configured limit.
    #[error("expression depth {depth} exceeds limit {max}")]
    TooDeep {
        /// Measured depth.
        depth: usize,
        /// Configured limit.
        max: usize,
    },
}

/// Result alias for compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Diagnostics for one source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDiagnostics {
    /// Label of the source (file name or caller-chosen id).
    pub source: String,
    /// Everything wrong with it.
    pub diagnostics: Diagnostics,
}

/// Why a pipeline set could not be built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// One or more sources have diagnostics, duplicate declarations
    /// included.
    #[error("{} source(s) failed to parse", .0.len())]
    Invalid(Vec<SourceDiagnostics>),
}

/// Result alias for deployment.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_names_null_explicitly() {
        let err = EvalError::type_mismatch(ValueType::Boolean, &Value::Null);
        assert_eq!(err.to_string(), "expected boolean, found null");
    }
}
