//! Function catalog and registry snapshots
//!
//! Plugins register functions into the global [`FunctionCatalog`] during a
//! load phase. Parsers and interpreters work against a [`FunctionRegistry`],
//! an immutable snapshot that is shared between threads without locking.
//! Reconfiguration takes a new snapshot; existing ones are never mutated.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::builtins;
use super::function::{Function, FunctionArgs, FunctionDescriptor};
use crate::lang::{Value, ValueType};
use crate::runtime::{EvalError, EvalResult, EvaluationContext};

type FunctionMap = HashMap<String, Arc<dyn Function>>;

/// Global, mutable catalog of functions.
pub struct FunctionCatalog {
    functions: RwLock<FunctionMap>,
}

static CATALOG: OnceLock<FunctionCatalog> = OnceLock::new();

impl FunctionCatalog {
    /// Catalog preloaded with the built-in functions.
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(index(builtins::all())),
        }
    }

    /// Access the global catalog singleton.
    pub fn global() -> &'static Self {
        CATALOG.get_or_init(FunctionCatalog::new)
    }

    /// Register a function, returning the one it replaced.
    pub fn register(&self, function: Arc<dyn Function>) -> Option<Arc<dyn Function>> {
        let name = function.descriptor().name.clone();
        tracing::debug!(function = %name, "registering function");
        self.functions.write().insert(name, function)
    }

    /// Replace the whole catalog contents at once.
    pub fn replace_all(&self, functions: impl IntoIterator<Item = Arc<dyn Function>>) {
        let fresh = index(functions);
        tracing::debug!(count = fresh.len(), "replacing function catalog");
        *self.functions.write() = fresh;
    }

    /// Whether a function is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Produce an immutable snapshot for parsers and interpreters.
    pub fn snapshot(&self) -> FunctionRegistry {
        FunctionRegistry {
            functions: Arc::new(self.functions.read().clone()),
        }
    }
}

impl Default for FunctionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn index(functions: impl IntoIterator<Item = Arc<dyn Function>>) -> FunctionMap {
    functions
        .into_iter()
        .map(|function| (function.descriptor().name.clone(), function))
        .collect()
}

/// Immutable name-to-function lookup.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: Arc<FunctionMap>,
}

impl FunctionRegistry {
    /// Registry without any function.
    pub fn empty() -> Self {
        Self {
            functions: Arc::new(HashMap::new()),
        }
    }

    /// Registry with only the built-in functions.
    pub fn builtin() -> Self {
        Self::from_functions(builtins::all())
    }

    /// Registry over an explicit function set.
    pub fn from_functions(functions: impl IntoIterator<Item = Arc<dyn Function>>) -> Self {
        Self {
            functions: Arc::new(index(functions)),
        }
    }

    /// Copy of this registry with `function` added or replaced.
    pub fn with(&self, function: Arc<dyn Function>) -> Self {
        let mut functions = (*self.functions).clone();
        functions.insert(function.descriptor().name.clone(), function);
        Self {
            functions: Arc::new(functions),
        }
    }

    /// Function registered under `name`.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    /// Function registered under `name`, or the [`ErrorFunction`] sentinel.
    pub fn resolve_or_error(&self, name: &str) -> Arc<dyn Function> {
        self.resolve(name).unwrap_or_else(ErrorFunction::instance)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Stand-in for calls to unknown functions.
///
/// Evaluating it always yields [`EvalError::UnresolvedFunction`], so a rule
/// holding one degrades to a rule-local fault.
pub struct ErrorFunction {
    descriptor: FunctionDescriptor,
}

static ERROR_FUNCTION: OnceLock<Arc<dyn Function>> = OnceLock::new();

impl ErrorFunction {
    /// Reserved descriptor name.
    pub const NAME: &'static str = "__unresolved__";

    /// The shared sentinel instance.
    pub fn instance() -> Arc<dyn Function> {
        ERROR_FUNCTION
            .get_or_init(|| {
                Arc::new(ErrorFunction {
                    descriptor: FunctionDescriptor::new(Self::NAME, ValueType::Any),
                })
            })
            .clone()
    }
}

impl Function for ErrorFunction {
    fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    fn evaluate(
        &self,
        args: &FunctionArgs,
        _context: &mut EvaluationContext<'_>,
    ) -> EvalResult<Value> {
        Err(EvalError::UnresolvedFunction {
            name: args.function().to_string(),
        })
    }
}
