//! Per-run evaluation state and rule faults

use serde::Serialize;
use std::collections::HashMap;

use super::error::{EvalError, EvalResult};
use super::message::Message;
use crate::lang::{Value, ValueType};

/// Which half of a rule raised a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultPhase {
    /// The `when` expression.
    Condition,
    /// The `then` statements.
    Execution,
}

/// A fault isolated to one rule of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFault {
    /// Pipeline being run.
    pub pipeline: String,
    /// Stage number.
    pub stage: i32,
    /// Rule name.
    pub rule: String,
    /// Condition or execution.
    pub phase: FaultPhase,
    /// What went wrong.
    #[serde(serialize_with = "display")]
    pub error: EvalError,
}

fn display<S: serde::Serializer>(error: &EvalError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// State of one pipeline run over one message.
///
/// Owns nothing shared: the message is borrowed mutably for the length of
/// the run, so a context can never be used for two messages or by two
/// threads at once.
#[derive(Debug)]
pub struct EvaluationContext<'m> {
    message: &'m mut Message,
    bindings: HashMap<String, (ValueType, Value)>,
    faults: Vec<RuleFault>,
}

impl<'m> EvaluationContext<'m> {
    /// Start a run over `message`.
    pub fn new(message: &'m mut Message) -> Self {
        Self {
            message,
            bindings: HashMap::new(),
            faults: Vec::new(),
        }
    }

    /// Message under evaluation.
    pub fn message(&self) -> &Message {
        &*self.message
    }

    /// Mutable access for statements.
    pub fn message_mut(&mut self) -> &mut Message {
        &mut *self.message
    }

    /// Bind `name`, shadowing any earlier binding.
    pub fn define(&mut self, name: impl Into<String>, ty: ValueType, value: Value) {
        self.bindings.insert(name.into(), (ty, value));
    }

    /// Value bound to `name`.
    pub fn lookup(&self, name: &str) -> EvalResult<&Value> {
        self.bindings
            .get(name)
            .map(|(_, value)| value)
            .ok_or_else(|| EvalError::UndefinedVariable(name.to_string()))
    }

    /// Declared type of a binding.
    pub fn binding_type(&self, name: &str) -> Option<ValueType> {
        self.bindings.get(name).map(|(ty, _)| *ty)
    }

    /// Record a rule fault.
    pub fn record_fault(&mut self, fault: RuleFault) {
        self.faults.push(fault);
    }

    /// Faults recorded so far.
    pub fn faults(&self) -> &[RuleFault] {
        &self.faults
    }

    /// Finish the run, returning its faults.
    pub fn into_faults(self) -> Vec<RuleFault> {
        self.faults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_shadow() {
        let mut message = Message::new();
        let mut context = EvaluationContext::new(&mut message);
        context.define("x", ValueType::Long, Value::Long(1));
        context.define("x", ValueType::String, Value::from("s"));
        assert_eq!(context.lookup("x").unwrap(), &Value::from("s"));
        assert_eq!(context.binding_type("x"), Some(ValueType::String));
        assert!(matches!(
            context.lookup("y"),
            Err(EvalError::UndefinedVariable(_))
        ));
    }
}
