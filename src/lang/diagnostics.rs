use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::value::ValueType;

/// One-based line/column location inside rule source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Line number, starting at 1.
    pub line: u32,
    /// Column number (in characters), starting at 1.
    pub column: u32,
}

impl Position {
    /// Construct a position.
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The different problems the front-end reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    /// Malformed token stream or unexpected token.
    Syntax(String),
    /// Call to a function the registry does not know.
    UndeclaredFunction {
        /// Name used at the call site.
        name: String,
    },
    /// Reference to a variable with no preceding `let` in the same rule.
    UndeclaredVariable {
        /// Variable name.
        name: String,
    },
    /// Argument count does not fit the function's parameter list.
    WrongNumberOfArgs {
        /// Function name.
        function: String,
        /// Number of arguments supplied.
        given: usize,
    },
    /// A required parameter was not supplied by name.
    MissingRequiredParam {
        /// Function name.
        function: String,
        /// Parameter name.
        param: String,
    },
    /// A named argument does not match any parameter.
    UnknownParameter {
        /// Function name.
        function: String,
        /// Argument name used at the call site.
        param: String,
    },
    /// Positional call to a function whose optional parameters precede required ones.
    OptionalParametersMustBeNamed {
        /// Function name.
        function: String,
    },
    /// Argument expression type does not fit the declared parameter type.
    IncompatibleArgumentType {
        /// Function name.
        function: String,
        /// Parameter name.
        param: String,
        /// Declared parameter type.
        expected: ValueType,
        /// Inferred argument type.
        actual: ValueType,
    },
    /// Operands of a binary operator have different types.
    IncompatibleTypes {
        /// Operator symbol.
        operator: String,
        /// Left operand type.
        left: ValueType,
        /// Right operand type.
        right: ValueType,
    },
    /// An expression has the wrong type for its position.
    IncompatibleType {
        /// Expected type.
        expected: ValueType,
        /// Inferred type.
        actual: ValueType,
    },
    /// Indexed access on a value that cannot be indexed.
    NonIndexableType {
        /// Type of the indexed expression.
        actual: ValueType,
    },
    /// Index type does not fit the indexed collection.
    IncompatibleIndexType {
        /// Expected index type.
        expected: ValueType,
        /// Inferred index type.
        actual: ValueType,
    },
    /// Operator is not defined for the operand types.
    InvalidOperation(String),
    /// A condition calls a function that mutates state.
    SideEffectInCondition {
        /// Function name.
        function: String,
    },
    /// A pipeline declares the same stage number twice.
    DuplicateStage {
        /// Pipeline name.
        pipeline: String,
        /// Repeated stage number.
        stage: i32,
    },
    /// A pipeline skips a stage number.
    NonContiguousStages {
        /// Pipeline name.
        pipeline: String,
        /// Stage number expected next.
        expected: i32,
        /// Stage number found.
        found: i32,
    },
    /// A pipeline without stages.
    EmptyPipeline {
        /// Pipeline name.
        pipeline: String,
    },
    /// Expressions nest deeper than the parser accepts.
    NestingTooDeep {
        /// Maximum nesting depth.
        limit: usize,
    },
    /// A rule name already declared by an earlier source or declaration.
    DuplicateRule {
        /// Rule name.
        name: String,
    },
    /// A pipeline name already declared by an earlier source or declaration.
    DuplicatePipeline {
        /// Pipeline name.
        name: String,
    },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::Syntax(message) => write!(f, "syntax error: {}", message),
            ParseErrorKind::UndeclaredFunction { name } => {
                write!(f, "unknown function '{}'", name)
            }
            ParseErrorKind::UndeclaredVariable { name } => {
                write!(f, "undeclared variable '{}'", name)
            }
            ParseErrorKind::WrongNumberOfArgs { function, given } => write!(
                f,
                "wrong number of arguments for function '{}': {} given",
                function, given
            ),
            ParseErrorKind::MissingRequiredParam { function, param } => write!(
                f,
                "missing required parameter '{}' of function '{}'",
                param, function
            ),
            ParseErrorKind::UnknownParameter { function, param } => {
                write!(f, "function '{}' has no parameter '{}'", function, param)
            }
            ParseErrorKind::OptionalParametersMustBeNamed { function } => write!(
                f,
                "function '{}' has optional parameters before required ones, arguments must be named",
                function
            ),
            ParseErrorKind::IncompatibleArgumentType {
                function,
                param,
                expected,
                actual,
            } => write!(
                f,
                "parameter '{}' of function '{}' expects {}, found {}",
                param, function, expected, actual
            ),
            ParseErrorKind::IncompatibleTypes {
                operator,
                left,
                right,
            } => write!(
                f,
                "incompatible types {} and {} for operator '{}'",
                left, right, operator
            ),
            ParseErrorKind::IncompatibleType { expected, actual } => {
                write!(f, "expected {}, found {}", expected, actual)
            }
            ParseErrorKind::NonIndexableType { actual } => {
                write!(f, "values of type {} cannot be indexed", actual)
            }
            ParseErrorKind::IncompatibleIndexType { expected, actual } => {
                write!(f, "index must be {}, found {}", expected, actual)
            }
            ParseErrorKind::InvalidOperation(message) => write!(f, "invalid operation: {}", message),
            ParseErrorKind::SideEffectInCondition { function } => write!(
                f,
                "function '{}' modifies state and cannot be used in a condition",
                function
            ),
            ParseErrorKind::DuplicateStage { pipeline, stage } => {
                write!(f, "pipeline '{}' declares stage {} twice", pipeline, stage)
            }
            ParseErrorKind::NonContiguousStages {
                pipeline,
                expected,
                found,
            } => write!(
                f,
                "pipeline '{}' skips from stage {} to stage {}",
                pipeline,
                expected - 1,
                found
            ),
            ParseErrorKind::EmptyPipeline { pipeline } => {
                write!(f, "pipeline '{}' declares no stages", pipeline)
            }
            ParseErrorKind::NestingTooDeep { limit } => {
                write!(f, "expression nests deeper than {} levels", limit)
            }
            ParseErrorKind::DuplicateRule { name } => {
                write!(f, "rule '{}' is declared more than once", name)
            }
            ParseErrorKind::DuplicatePipeline { name } => {
                write!(f, "pipeline '{}' is declared more than once", name)
            }
        }
    }
}

/// A single diagnostic: where it happened and what went wrong.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{position}: {kind}")]
pub struct ParseError {
    /// Location of the offending token.
    pub position: Position,
    /// Error classification.
    pub kind: ParseErrorKind,
}

impl ParseError {
    /// Construct a diagnostic.
    pub fn new(position: Position, kind: ParseErrorKind) -> Self {
        Self { position, kind }
    }

    /// Convenience constructor for syntax errors.
    pub fn syntax(position: Position, message: impl Into<String>) -> Self {
        Self::new(position, ParseErrorKind::Syntax(message.into()))
    }

    /// Human readable message without the position prefix.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

/// Non-empty, position-ordered set of diagnostics returned when parsing fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    errors: Vec<ParseError>,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [single] => write!(f, "{}", single),
            [first, rest @ ..] => write!(f, "{} (and {} more)", first, rest.len()),
            [] => write!(f, "no diagnostics"),
        }
    }
}

impl std::error::Error for Diagnostics {}

impl Diagnostics {
    /// Build a diagnostics set; returns `None` when there is nothing to report.
    pub fn from_errors(mut errors: Vec<ParseError>) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        errors.sort_by_key(|error| error.position);
        errors.dedup();
        Some(Self { errors })
    }

    /// Diagnostics in source order.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    /// Number of diagnostics (always at least one).
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over the diagnostics in source order.
    pub fn iter(&self) -> impl Iterator<Item = &ParseError> {
        self.errors.iter()
    }

    /// Consume the set, returning the ordered diagnostics.
    pub fn into_errors(self) -> Vec<ParseError> {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_sorted_and_deduplicated() {
        let late = ParseError::syntax(Position::new(3, 1), "late");
        let early = ParseError::syntax(Position::new(1, 4), "early");
        let diagnostics =
            Diagnostics::from_errors(vec![late.clone(), early.clone(), late.clone()]).unwrap();
        assert_eq!(diagnostics.errors(), &[early, late]);
    }

    #[test]
    fn empty_error_list_is_not_a_failure() {
        assert!(Diagnostics::from_errors(Vec::new()).is_none());
    }

    #[test]
    fn display_includes_position() {
        let error = ParseError::new(
            Position::new(2, 7),
            ParseErrorKind::UndeclaredFunction {
                name: "bogus".into(),
            },
        );
        assert_eq!(error.to_string(), "2:7: unknown function 'bogus'");
    }
}
