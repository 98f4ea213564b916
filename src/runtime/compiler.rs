//! Closure compiler for rules.
//!
//! Each expression node becomes a boxed closure that captures its already
//! compiled children, so a compiled rule runs without matching on AST
//! nodes. Sub-trees made only of literals and operators are evaluated once
//! at compile time when that evaluation succeeds; when it would fault, the
//! node is compiled normally so the fault surfaces at run time exactly as in
//! the tree walker. All operator semantics come from [`ops`](super::ops).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::context::EvaluationContext;
use super::error::{CompileError, CompileResult, EvalResult};
use super::eval;
use super::message::Message;
use super::ops;
use crate::lang::{BinaryOp, Expression, ExpressionKind, Fingerprint, Rule, Statement, Value};

type ExprFn = Box<dyn Fn(&mut EvaluationContext<'_>) -> EvalResult<Value> + Send + Sync>;
type StmtFn = Box<dyn Fn(&mut EvaluationContext<'_>) -> EvalResult<()> + Send + Sync>;

fn expr_fn<F>(body: F) -> ExprFn
where
    F: Fn(&mut EvaluationContext<'_>) -> EvalResult<Value> + Send + Sync + 'static,
{
    Box::new(body)
}

fn stmt_fn<F>(body: F) -> StmtFn
where
    F: Fn(&mut EvaluationContext<'_>) -> EvalResult<()> + Send + Sync + 'static,
{
    Box::new(body)
}

/// A rule compiled to closures.
pub struct CompiledRule {
    fingerprint: Fingerprint,
    when: ExprFn,
    then: Vec<StmtFn>,
    folded: usize,
}

impl CompiledRule {
    /// Evaluate the condition.
    pub fn condition(&self, context: &mut EvaluationContext<'_>) -> EvalResult<bool> {
        ops::truthy(&(self.when)(context)?)
    }

    /// Run the statements in order, stopping at the first fault.
    pub fn execute(&self, context: &mut EvaluationContext<'_>) -> EvalResult<()> {
        self.then.iter().try_for_each(|statement| statement(context))
    }

    /// Identity of the source rule's semantics.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Number of constant sub-trees evaluated at compile time.
    pub fn folded_constants(&self) -> usize {
        self.folded
    }
}

impl fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRule")
            .field("fingerprint", &self.fingerprint)
            .field("statements", &self.then.len())
            .field("folded", &self.folded)
            .finish()
    }
}

/// Translates rules into [`CompiledRule`]s.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    max_depth: usize,
}

impl RuleCompiler {
    /// Compiler refusing expressions deeper than `max_depth`.
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Compile a rule, or explain why it has to stay interpreted.
    pub fn compile(&self, rule: &Rule) -> CompileResult<CompiledRule> {
        let expressions =
            std::iter::once(&rule.when).chain(rule.then.iter().map(Statement::expression));
        for expr in expressions {
            let depth = expr.depth();
            if depth > self.max_depth {
                return Err(CompileError::TooDeep {
                    depth,
                    max: self.max_depth,
                });
            }
            if let Some(name) = first_unresolved(expr) {
                return Err(CompileError::UnresolvedFunction { name });
            }
        }

        let mut folded = 0;
        let when = self.expression(&rule.when, &mut folded);
        let then = rule
            .then
            .iter()
            .map(|statement| self.statement(statement, &mut folded))
            .collect();

        Ok(CompiledRule {
            fingerprint: rule.fingerprint(),
            when,
            then,
            folded,
        })
    }

    fn statement(&self, statement: &Statement, folded: &mut usize) -> StmtFn {
        match statement {
            Statement::FunctionCall(expr) => {
                let call = self.expression(expr, folded);
                stmt_fn(move |context| call(context).map(|_| ()))
            }
            Statement::VarAssign {
                name, ty, value, ..
            } => {
                let value = self.expression(value, folded);
                let (name, ty) = (name.clone(), *ty);
                stmt_fn(move |context| {
                    let bound = value(context)?;
                    context.define(name.clone(), ty, bound);
                    Ok(())
                })
            }
        }
    }

    fn expression(&self, expr: &Expression, folded: &mut usize) -> ExprFn {
        if !matches!(expr.kind, ExpressionKind::Literal(_)) && is_constant(expr) {
            if let Some(value) = fold(expr) {
                *folded += 1;
                return expr_fn(move |_| Ok(value.clone()));
            }
        }

        match &expr.kind {
            ExpressionKind::Literal(value) => {
                let value = value.clone();
                expr_fn(move |_| Ok(value.clone()))
            }
            ExpressionKind::Array(items) => {
                let items: Vec<ExprFn> = items
                    .iter()
                    .map(|item| self.expression(item, folded))
                    .collect();
                expr_fn(move |context| {
                    let mut values = Vec::with_capacity(items.len());
                    for item in &items {
                        values.push(item(context)?);
                    }
                    Ok(Value::List(values))
                })
            }
            ExpressionKind::Map(entries) => {
                let entries: Vec<(String, ExprFn)> = entries
                    .iter()
                    .map(|(key, value)| (key.clone(), self.expression(value, folded)))
                    .collect();
                expr_fn(move |context| {
                    let mut map = BTreeMap::new();
                    for (key, value) in &entries {
                        map.insert(key.clone(), value(context)?);
                    }
                    Ok(Value::Map(map))
                })
            }
            ExpressionKind::Variable(name) => {
                let name = name.clone();
                expr_fn(move |context| context.lookup(&name).cloned())
            }
            ExpressionKind::Field(name) => {
                let name = name.clone();
                expr_fn(move |context| {
                    Ok(context
                        .message()
                        .get_field(&name)
                        .cloned()
                        .unwrap_or_default())
                })
            }
            ExpressionKind::FieldAccess { object, field } => {
                let object = self.expression(object, folded);
                let field = field.clone();
                expr_fn(move |context| ops::field_access(&object(context)?, &field))
            }
            ExpressionKind::Index { object, index } => {
                let object = self.expression(object, folded);
                let index = self.expression(index, folded);
                expr_fn(move |context| {
                    let object = object(context)?;
                    let index = index(context)?;
                    ops::index(&object, &index)
                })
            }
            ExpressionKind::Unary { op, operand } => {
                let operand = self.expression(operand, folded);
                let op = *op;
                expr_fn(move |context| ops::unary(op, &operand(context)?))
            }
            ExpressionKind::Binary { op, left, right } => {
                let left = self.expression(left, folded);
                let right = self.expression(right, folded);
                match *op {
                    BinaryOp::And => expr_fn(move |context| {
                        if !ops::truthy(&left(context)?)? {
                            return Ok(Value::Boolean(false));
                        }
                        Ok(Value::Boolean(ops::truthy(&right(context)?)?))
                    }),
                    BinaryOp::Or => expr_fn(move |context| {
                        if ops::truthy(&left(context)?)? {
                            return Ok(Value::Boolean(true));
                        }
                        Ok(Value::Boolean(ops::truthy(&right(context)?)?))
                    }),
                    op => expr_fn(move |context| {
                        let left = left(context)?;
                        let right = right(context)?;
                        ops::binary(op, &left, &right)
                    }),
                }
            }
            ExpressionKind::Call(call) => {
                let function = Arc::clone(&call.function);
                let name = call.name.clone();
                let args: Vec<(String, ExprFn)> = call
                    .args
                    .iter()
                    .map(|(param, arg)| (param.clone(), self.expression(arg, folded)))
                    .collect();
                expr_fn(move |context| {
                    let mut supplied = Vec::with_capacity(args.len());
                    for (param, arg) in &args {
                        supplied.push((param.clone(), arg(context)?));
                    }
                    eval::invoke(function.as_ref(), &name, supplied, context)
                })
            }
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(64)
    }
}

fn first_unresolved(expr: &Expression) -> Option<String> {
    if let ExpressionKind::Call(call) = &expr.kind {
        if !call.resolved {
            return Some(call.name.clone());
        }
    }
    expr.children().into_iter().find_map(first_unresolved)
}

/// Whether the tree reads nothing from the context.
fn is_constant(expr: &Expression) -> bool {
    match &expr.kind {
        ExpressionKind::Variable(_) | ExpressionKind::Field(_) | ExpressionKind::Call(_) => false,
        _ => expr.children().into_iter().all(is_constant),
    }
}

/// Evaluate a constant tree against a scratch context.
fn fold(expr: &Expression) -> Option<Value> {
    let mut scratch = Message::new();
    let mut context = EvaluationContext::new(&mut scratch);
    eval::evaluate(expr, &mut context).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::FunctionRegistry;
    use crate::lang::{parse_rule, parse_with_diagnostics};
    use crate::runtime::EvalError;

    fn rule(source: &str) -> Rule {
        parse_rule(source, &FunctionRegistry::builtin()).unwrap()
    }

    #[test]
    fn folds_constant_subtrees() {
        let compiled = RuleCompiler::default()
            .compile(&rule(
                r#"rule "r" when $message.n > 2 * 3 + 1 then set_field("k", [1 + 1, "a"]); end"#,
            ))
            .unwrap();
        assert_eq!(compiled.folded_constants(), 2);

        let mut message = Message::new().with_field("n", 8i64);
        let mut context = EvaluationContext::new(&mut message);
        assert_eq!(compiled.condition(&mut context), Ok(true));
        compiled.execute(&mut context).unwrap();
        assert_eq!(
            message.get_field("k"),
            Some(&Value::List(vec![Value::Long(2), Value::from("a")]))
        );
    }

    #[test]
    fn faulting_constants_are_not_folded() {
        let compiled = RuleCompiler::default()
            .compile(&rule(r#"rule "r" when 1 / 0 == 1 then end"#))
            .unwrap();
        assert_eq!(compiled.folded_constants(), 0);
        let mut message = Message::new();
        let mut context = EvaluationContext::new(&mut message);
        assert_eq!(
            compiled.condition(&mut context),
            Err(EvalError::DivisionByZero)
        );
    }

    #[test]
    fn unresolved_functions_are_not_compiled() {
        let outcome = parse_with_diagnostics(
            r#"rule "r" when true then bogus(); end"#,
            &FunctionRegistry::builtin(),
        );
        let rule = outcome.rules().next().unwrap();
        assert_eq!(
            RuleCompiler::default().compile(rule).unwrap_err(),
            CompileError::UnresolvedFunction {
                name: "bogus".into()
            }
        );
    }

    #[test]
    fn depth_limit() {
        let deep = rule(r#"rule "r" when ((((1 + $message.x) + 1) + 1) + 1) > 0 then end"#);
        assert!(matches!(
            RuleCompiler::new(3).compile(&deep),
            Err(CompileError::TooDeep { max: 3, .. })
        ));
        assert!(RuleCompiler::new(16).compile(&deep).is_ok());
    }
}
