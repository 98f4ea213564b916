//! Tree-walking evaluation of expressions and statements

use std::collections::BTreeMap;

use super::context::EvaluationContext;
use super::error::EvalResult;
use super::ops;
use crate::functions::{Function, FunctionArgs};
use crate::lang::{BinaryOp, Expression, ExpressionKind, Statement, Value};

/// Evaluate an expression by walking the tree.
pub fn evaluate(expr: &Expression, context: &mut EvaluationContext<'_>) -> EvalResult<Value> {
    match &expr.kind {
        ExpressionKind::Literal(value) => Ok(value.clone()),
        ExpressionKind::Array(items) => items
            .iter()
            .map(|item| evaluate(item, context))
            .collect::<EvalResult<Vec<_>>>()
            .map(Value::List),
        ExpressionKind::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(value, context)?);
            }
            Ok(Value::Map(map))
        }
        ExpressionKind::Variable(name) => context.lookup(name).cloned(),
        ExpressionKind::Field(name) => Ok(context
            .message()
            .get_field(name)
            .cloned()
            .unwrap_or_default()),
        ExpressionKind::FieldAccess { object, field } => {
            let object = evaluate(object, context)?;
            ops::field_access(&object, field)
        }
        ExpressionKind::Index { object, index } => {
            let object = evaluate(object, context)?;
            let index = evaluate(index, context)?;
            ops::index(&object, &index)
        }
        ExpressionKind::Unary { op, operand } => {
            let operand = evaluate(operand, context)?;
            ops::unary(*op, &operand)
        }
        ExpressionKind::Binary { op, left, right } => match op {
            BinaryOp::And | BinaryOp::Or => {
                let left = ops::truthy(&evaluate(left, context)?)?;
                if left == (*op == BinaryOp::Or) {
                    return Ok(Value::Boolean(left));
                }
                let right = ops::truthy(&evaluate(right, context)?)?;
                Ok(Value::Boolean(right))
            }
            _ => {
                let left = evaluate(left, context)?;
                let right = evaluate(right, context)?;
                ops::binary(*op, &left, &right)
            }
        },
        ExpressionKind::Call(call) => {
            let mut supplied = Vec::with_capacity(call.args.len());
            for (param, arg) in &call.args {
                supplied.push((param.clone(), evaluate(arg, context)?));
            }
            invoke(call.function.as_ref(), &call.name, supplied, context)
        }
    }
}

/// Bind evaluated arguments and call `function`.
///
/// `name` is the call-site name, which differs from the descriptor name
/// only for the error sentinel.
pub fn invoke(
    function: &dyn Function,
    name: &str,
    supplied: Vec<(String, Value)>,
    context: &mut EvaluationContext<'_>,
) -> EvalResult<Value> {
    let args = FunctionArgs::bind(name, function.descriptor(), supplied)?;
    function.evaluate(&args, context)
}

/// Evaluate a rule condition.
pub fn evaluate_condition(
    expr: &Expression,
    context: &mut EvaluationContext<'_>,
) -> EvalResult<bool> {
    ops::truthy(&evaluate(expr, context)?)
}

/// Run one statement.
pub fn execute_statement(
    statement: &Statement,
    context: &mut EvaluationContext<'_>,
) -> EvalResult<()> {
    match statement {
        Statement::FunctionCall(expr) => {
            evaluate(expr, context)?;
        }
        Statement::VarAssign {
            name, ty, value, ..
        } => {
            let value = evaluate(value, context)?;
            context.define(name.clone(), *ty, value);
        }
    }
    Ok(())
}

/// Run statements in order, stopping at the first fault.
pub fn execute_statements(
    statements: &[Statement],
    context: &mut EvaluationContext<'_>,
) -> EvalResult<()> {
    statements
        .iter()
        .try_for_each(|statement| execute_statement(statement, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::runtime::EvalError;
    use crate::lang::parse_rule;
    use crate::runtime::Message;

    fn run(source: &str, message: &mut Message) -> EvalResult<bool> {
        let rule = parse_rule(source, &FunctionRegistry::builtin()).unwrap();
        let mut context = EvaluationContext::new(message);
        let matched = evaluate_condition(&rule.when, &mut context)?;
        if matched {
            execute_statements(&rule.then, &mut context)?;
        }
        Ok(matched)
    }

    #[test]
    fn and_short_circuits_before_faulting_operand() {
        let mut message = Message::new();
        let matched = run(
            r#"rule "r" when false && $message.missing + 1 > 0 then end"#,
            &mut message,
        );
        assert_eq!(matched, Ok(false));
    }

    #[test]
    fn let_bindings_feed_later_statements() {
        let mut message = Message::new().with_field("n", 20i64);
        run(
            r#"
            rule "r"
            when $message.n > 10
            then
              let doubled = $message.n * 2;
              set_field("doubled", doubled);
            end
            "#,
            &mut message,
        )
        .unwrap();
        assert_eq!(message.get_field("doubled"), Some(&Value::Long(40)));
    }

    #[test]
    fn unresolved_call_faults_with_call_site_name() {
        let registry = FunctionRegistry::builtin();
        let outcome = crate::lang::parse_with_diagnostics(
            r#"rule "r" when true then bogus(1); end"#,
            &registry,
        );
        let rule = outcome.rules().next().unwrap();
        let mut message = Message::new();
        let mut context = EvaluationContext::new(&mut message);
        assert_eq!(
            execute_statements(&rule.then, &mut context),
            Err(EvalError::UnresolvedFunction {
                name: "bogus".into()
            })
        );
    }

    #[test]
    fn map_and_list_access() {
        let mut message = Message::new();
        let matched = run(
            r#"rule "r" when {a: [1, 2, 3]}.a[2] == 3 then end"#,
            &mut message,
        );
        assert_eq!(matched, Ok(true));
    }
}
