use std::fmt;
use std::sync::Arc;

use crate::lang::{Value, ValueType};
use crate::runtime::{EvalError, EvalResult, EvaluationContext};

/// A callable usable from rule expressions.
///
/// Implementations must signal failure through the returned `Err` rather
/// than panicking; the interpreter still catches panics, but only at rule
/// granularity.
pub trait Function: Send + Sync {
    /// Name, parameters and return type.
    fn descriptor(&self) -> &FunctionDescriptor;

    /// Invoke the function with bound arguments.
    fn evaluate(&self, args: &FunctionArgs, context: &mut EvaluationContext<'_>)
    -> EvalResult<Value>;
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    /// Parameter name, used by named arguments.
    pub name: String,
    /// Accepted static type.
    pub ty: ValueType,
    /// Whether the caller may omit it.
    pub optional: bool,
    /// Value used when an optional parameter is omitted.
    pub default: Option<Value>,
    /// Free-form documentation.
    pub description: String,
}

impl ParameterDescriptor {
    /// A parameter every call must supply.
    pub fn required(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
            default: None,
            description: String::new(),
        }
    }

    /// A parameter callers may omit.
    pub fn optional(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            optional: true,
            ..Self::required(name, ty)
        }
    }

    /// Set the default for an omitted optional parameter.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Attach documentation.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }
}

/// Static signature of a [`Function`].
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    /// Registry key.
    pub name: String,
    /// Parameters in positional order.
    pub params: Vec<ParameterDescriptor>,
    /// Declared result type.
    pub return_type: ValueType,
    /// False for functions that mutate the message or context.
    pub pure: bool,
    /// Free-form documentation.
    pub description: String,
}

impl FunctionDescriptor {
    /// Start a descriptor for a pure function without parameters.
    pub fn new(name: impl Into<String>, return_type: ValueType) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            return_type,
            pure: true,
            description: String::new(),
        }
    }

    /// Append a parameter.
    pub fn with_param(mut self, param: ParameterDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Mark the function as side-effecting (rejected inside conditions).
    pub fn impure(mut self) -> Self {
        self.pure = false;
        self
    }

    /// Attach documentation.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Look up a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.params.iter().find(|param| param.name == name)
    }

    /// Number of parameters that must be supplied.
    pub fn required_count(&self) -> usize {
        self.params.iter().filter(|param| !param.optional).count()
    }

    /// Whether an optional parameter precedes a required one, which makes
    /// partial positional calls ambiguous.
    pub fn has_optional_before_required(&self) -> bool {
        let mut seen_optional = false;
        for param in &self.params {
            if param.optional {
                seen_optional = true;
            } else if seen_optional {
                return true;
            }
        }
        false
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, param) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", param.name, param.ty)?;
            if param.optional {
                f.write_str("?")?;
            }
        }
        write!(f, ") -> {}", self.return_type)
    }
}

/// Arguments bound to a function's parameters for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionArgs {
    function: String,
    values: Vec<(String, Value)>,
}

impl FunctionArgs {
    /// Empty argument set for `function`.
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            values: Vec::new(),
        }
    }

    /// Bind evaluated call-site arguments, filling defaults and checking
    /// that every required parameter received a value.
    ///
    /// `function` is the name used at the call site.
    pub fn bind(
        function: &str,
        descriptor: &FunctionDescriptor,
        supplied: Vec<(String, Value)>,
    ) -> EvalResult<Self> {
        let mut args = Self {
            function: function.to_string(),
            values: supplied,
        };
        for param in &descriptor.params {
            if args.contains(&param.name) {
                continue;
            }
            match (&param.default, param.optional) {
                (Some(default), _) => args.insert(param.name.clone(), default.clone()),
                (None, true) => {}
                (None, false) => {
                    return Err(EvalError::MissingArgument {
                        function: args.function,
                        param: param.name.clone(),
                    });
                }
            }
        }
        Ok(args)
    }

    /// Name of the invoked function.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Add or replace a binding.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.values.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(key, _)| key == name)
    }

    /// Value bound to `name`; `None` when absent or null.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_null())
    }

    /// Value bound to `name`, failing when absent or null.
    pub fn required(&self, name: &str) -> EvalResult<&Value> {
        self.get(name).ok_or_else(|| EvalError::MissingArgument {
            function: self.function.clone(),
            param: name.to_string(),
        })
    }

    /// String bound to `name`, failing when absent or of another type.
    pub fn required_string(&self, name: &str) -> EvalResult<&str> {
        let value = self.required(name)?;
        value
            .as_str()
            .ok_or_else(|| EvalError::type_mismatch(ValueType::String, value))
    }

    /// Optional boolean flag.
    pub fn optional_bool(&self, name: &str) -> EvalResult<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Boolean(flag)) => Ok(Some(*flag)),
            Some(other) => Err(EvalError::type_mismatch(ValueType::Boolean, other)),
        }
    }

    /// Bindings in call-site order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of bound arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no argument is bound.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type FunctionBody =
    dyn Fn(&FunctionArgs, &mut EvaluationContext<'_>) -> EvalResult<Value> + Send + Sync;

/// [`Function`] backed by a closure; the usual way to register plugins.
pub struct FnFunction {
    descriptor: FunctionDescriptor,
    body: Box<FunctionBody>,
}

impl FnFunction {
    /// Wrap a closure with its descriptor.
    pub fn new<F>(descriptor: FunctionDescriptor, body: F) -> Self
    where
        F: Fn(&FunctionArgs, &mut EvaluationContext<'_>) -> EvalResult<Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            descriptor,
            body: Box::new(body),
        }
    }

    /// Wrap and share.
    pub fn shared<F>(descriptor: FunctionDescriptor, body: F) -> Arc<dyn Function>
    where
        F: Fn(&FunctionArgs, &mut EvaluationContext<'_>) -> EvalResult<Value>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self::new(descriptor, body))
    }
}

impl Function for FnFunction {
    fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    fn evaluate(
        &self,
        args: &FunctionArgs,
        context: &mut EvaluationContext<'_>,
    ) -> EvalResult<Value> {
        (self.body)(args, context)
    }
}

impl fmt::Debug for FnFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFunction")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
