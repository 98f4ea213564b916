use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::diagnostics::Position;
use super::value::{Value, ValueType, quote_identifier, quote_key, quote_string};
use crate::functions::Function;

/// Prefix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Boolean negation (`not`, `!`).
    Not,
    /// Arithmetic negation (`-`).
    Negate,
    /// Arithmetic identity (`+`).
    Plus,
}

/// Infix operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Short-circuit conjunction.
    And,
    /// Short-circuit disjunction.
    Or,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Addition or string concatenation.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
}

impl BinaryOp {
    /// Canonical source symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 7,
        }
    }

    /// Whether the operator yields a boolean from a comparison.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Whether the operator is arithmetic.
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

const NOT_PRECEDENCE: u8 = 3;
const SIGN_PRECEDENCE: u8 = 8;
const POSTFIX_PRECEDENCE: u8 = 9;
const ATOM_PRECEDENCE: u8 = 10;

/// A resolved function call.
///
/// Arguments are stored in call-site order, keyed by the parameter they bind
/// to. Calls to unknown functions keep their shape but point at the
/// [`ErrorFunction`](crate::functions::ErrorFunction) and are flagged
/// `resolved == false`.
#[derive(Clone)]
pub struct FunctionCall {
    /// Name as written at the call site.
    pub name: String,
    /// Implementation the name resolved to.
    pub function: Arc<dyn Function>,
    /// Arguments as `(parameter name, expression)` pairs.
    pub args: Vec<(String, Expression)>,
    /// Whether the call site used `name: value` syntax.
    pub named: bool,
    /// False when the registry had no function under `name`.
    pub resolved: bool,
}

impl fmt::Debug for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCall")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("named", &self.named)
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl FunctionCall {
    /// Argument bound to `param`, if supplied.
    pub fn arg(&self, param: &str) -> Option<&Expression> {
        self.args
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, expr)| expr)
    }
}

/// Shape of an expression node.
#[derive(Debug, Clone)]
pub enum ExpressionKind {
    /// Constant value.
    Literal(Value),
    /// `[a, b, ...]`
    Array(Vec<Expression>),
    /// `{key: value, ...}`
    Map(Vec<(String, Expression)>),
    /// Reference to a `let` binding.
    Variable(String),
    /// `$message.field`
    Field(String),
    /// `expr.field` on a map value.
    FieldAccess {
        /// Map-valued expression.
        object: Box<Expression>,
        /// Key to read.
        field: String,
    },
    /// `expr[index]` on a list or map value.
    Index {
        /// Indexed expression.
        object: Box<Expression>,
        /// Index expression.
        index: Box<Expression>,
    },
    /// Prefix operator application.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expression>,
    },
    /// Infix operator application.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expression>,
        /// Right operand.
        right: Box<Expression>,
    },
    /// Function invocation.
    Call(FunctionCall),
}

/// Typed expression node.
#[derive(Debug, Clone)]
pub struct Expression {
    /// Node shape.
    pub kind: ExpressionKind,
    /// Statically inferred result type.
    pub ty: ValueType,
    /// Where the node starts in the source.
    pub position: Position,
    height: usize,
}

impl Expression {
    /// Construct a node.
    pub fn new(kind: ExpressionKind, ty: ValueType, position: Position) -> Self {
        let mut node = Self {
            kind,
            ty,
            position,
            height: 1,
        };
        node.height = 1 + node
            .children()
            .into_iter()
            .map(|child| child.height)
            .max()
            .unwrap_or(0);
        node
    }

    /// Literal node with the value's own type.
    pub fn literal(value: Value, position: Position) -> Self {
        let ty = match value.value_type() {
            ValueType::Void => ValueType::Any,
            other => other,
        };
        Self::new(ExpressionKind::Literal(value), ty, position)
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExpressionKind::Literal(_) | ExpressionKind::Variable(_) | ExpressionKind::Field(_) => {
                Vec::new()
            }
            ExpressionKind::Array(items) => items.iter().collect(),
            ExpressionKind::Map(entries) => entries.iter().map(|(_, expr)| expr).collect(),
            ExpressionKind::FieldAccess { object, .. } => vec![object],
            ExpressionKind::Index { object, index } => vec![object, index],
            ExpressionKind::Unary { operand, .. } => vec![operand],
            ExpressionKind::Binary { left, right, .. } => vec![left, right],
            ExpressionKind::Call(call) => call.args.iter().map(|(_, expr)| expr).collect(),
        }
    }

    /// Height of the tree rooted at this node, recorded at construction.
    pub fn depth(&self) -> usize {
        self.height
    }

    /// Whether any call in the tree satisfies `pred`.
    pub fn any_call(&self, pred: &dyn Fn(&FunctionCall) -> bool) -> bool {
        if let ExpressionKind::Call(call) = &self.kind {
            if pred(call) {
                return true;
            }
        }
        self.children().into_iter().any(|child| child.any_call(pred))
    }

    fn precedence(&self) -> u8 {
        match &self.kind {
            ExpressionKind::Binary { op, .. } => op.precedence(),
            ExpressionKind::Unary { op: UnaryOp::Not, .. } => NOT_PRECEDENCE,
            ExpressionKind::Unary { .. } => SIGN_PRECEDENCE,
            ExpressionKind::Literal(Value::Long(num)) if *num < 0 => SIGN_PRECEDENCE,
            ExpressionKind::Literal(Value::Double(num)) if num.is_sign_negative() => SIGN_PRECEDENCE,
            ExpressionKind::FieldAccess { .. } | ExpressionKind::Index { .. } => POSTFIX_PRECEDENCE,
            _ => ATOM_PRECEDENCE,
        }
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExpressionKind::Literal(value) => f.write_str(&value.to_literal()),
            ExpressionKind::Array(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            ExpressionKind::Map(entries) => {
                f.write_str("{")?;
                for (idx, (key, value)) in entries.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", quote_key(key), value)?;
                }
                f.write_str("}")
            }
            ExpressionKind::Variable(name) => f.write_str(name),
            ExpressionKind::Field(name) => write!(f, "$message.{}", quote_identifier(name)),
            ExpressionKind::FieldAccess { object, field } => {
                object.fmt_operand(f, POSTFIX_PRECEDENCE)?;
                write!(f, ".{}", quote_identifier(field))
            }
            ExpressionKind::Index { object, index } => {
                object.fmt_operand(f, POSTFIX_PRECEDENCE)?;
                write!(f, "[{}]", index)
            }
            ExpressionKind::Unary { op, operand } => match op {
                UnaryOp::Not => {
                    f.write_str("not ")?;
                    operand.fmt_operand(f, NOT_PRECEDENCE)
                }
                UnaryOp::Negate | UnaryOp::Plus => {
                    f.write_str(if *op == UnaryOp::Negate { "-" } else { "+" })?;
                    // keep `- -x` from rendering as `--x`
                    if operand.precedence() == SIGN_PRECEDENCE {
                        write!(f, "({})", operand)
                    } else {
                        operand.fmt_operand(f, SIGN_PRECEDENCE)
                    }
                }
            },
            ExpressionKind::Binary { op, left, right } => {
                let prec = op.precedence();
                left.fmt_operand(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f, prec + 1)
            }
            ExpressionKind::Call(call) => {
                write!(f, "{}(", call.name)?;
                for (idx, (param, arg)) in call.args.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    if call.named {
                        write!(f, "{}: ", quote_identifier(param))?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One `then` statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Function call evaluated for its side effect.
    FunctionCall(Expression),
    /// `let name = value;`
    VarAssign {
        /// Bound name.
        name: String,
        /// Static type of the bound value.
        ty: ValueType,
        /// Value expression.
        value: Expression,
        /// Position of the `let` keyword.
        position: Position,
    },
}

impl Statement {
    /// Expression evaluated by the statement.
    pub fn expression(&self) -> &Expression {
        match self {
            Statement::FunctionCall(expr) => expr,
            Statement::VarAssign { value, .. } => value,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::FunctionCall(expr) => write!(f, "{};", expr),
            Statement::VarAssign { name, value, .. } => write!(f, "let {} = {};", name, value),
        }
    }
}

/// Content hash of a rule's condition and statements.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash arbitrary canonical text.
    pub fn of(text: &str) -> Self {
        Fingerprint(*blake3::hash(text.as_bytes()).as_bytes())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight bytes in hex, for logs.
    pub fn short(&self) -> String {
        self.0[..8].iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

/// A named condition with the statements it guards.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule name, unique within a pipeline set.
    pub name: String,
    /// Boolean condition.
    pub when: Expression,
    /// Actions run when the condition holds.
    pub then: Vec<Statement>,
    /// Position of the `rule` keyword.
    pub position: Position,
    fingerprint: Fingerprint,
    cache_key: Fingerprint,
}

impl Rule {
    /// Build a rule and compute its fingerprint.
    pub fn new(
        name: impl Into<String>,
        when: Expression,
        then: Vec<Statement>,
        position: Position,
    ) -> Self {
        let fingerprint = Fingerprint::of(&render_body(&when, &then));
        let mut hasher = blake3::Hasher::new();
        hasher.update(fingerprint.as_bytes());
        hash_functions(&when, &mut hasher);
        for statement in &then {
            hash_functions(statement.expression(), &mut hasher);
        }
        Self {
            name: name.into(),
            when,
            then,
            position,
            fingerprint,
            cache_key: Fingerprint(*hasher.finalize().as_bytes()),
        }
    }

    /// Rule that never matches, used for dangling pipeline references.
    pub fn always_false(name: impl Into<String>) -> Self {
        let when = Expression::literal(Value::Boolean(false), Position::default());
        Self::new(name, when, Vec::new(), Position::default())
    }

    /// Identity of the rule's source text, independent of its name.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The fingerprint combined with the identity of every function
    /// implementation the body resolved to.
    ///
    /// Identical text parsed against different registries gets different
    /// keys, so compiled code never outlives the functions it was built
    /// against.
    pub fn cache_key(&self) -> Fingerprint {
        self.cache_key
    }
}

fn hash_functions(expr: &Expression, hasher: &mut blake3::Hasher) {
    if let ExpressionKind::Call(call) = &expr.kind {
        let address = Arc::as_ptr(&call.function) as *const () as usize;
        hasher.update(call.name.as_bytes());
        hasher.update(&address.to_le_bytes());
    }
    for child in expr.children() {
        hash_functions(child, hasher);
    }
}

fn render_body(when: &Expression, then: &[Statement]) -> String {
    let mut out = format!("when {}\nthen\n", when);
    for statement in then {
        out.push_str("  ");
        out.push_str(&statement.to_string());
        out.push('\n');
    }
    out
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rule {}\n{}end",
            quote_string(&self.name),
            render_body(&self.when, &self.then)
        )
    }
}

/// How a stage decides whether the pipeline continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Every rule must match.
    #[default]
    All,
    /// At least one rule must match.
    Either,
    /// Continue regardless of matches.
    Pass,
}

impl MatchPolicy {
    /// Apply the policy to the number of matched rules out of `total`.
    pub fn satisfied(self, matched: usize, total: usize) -> bool {
        match self {
            MatchPolicy::All => matched == total,
            MatchPolicy::Either => total == 0 || matched > 0,
            MatchPolicy::Pass => true,
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchPolicy::All => "all",
            MatchPolicy::Either => "either",
            MatchPolicy::Pass => "pass",
        })
    }
}

/// An ordered group of rules inside a pipeline.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage ordinal.
    pub number: i32,
    /// Continuation policy.
    pub policy: MatchPolicy,
    /// Rule names as written in the pipeline source.
    pub rule_refs: Vec<String>,
    /// Rules bound to `rule_refs`; empty until the pipeline is resolved.
    pub rules: Vec<Arc<Rule>>,
    /// Position of the `stage` keyword.
    pub position: Position,
}

/// A named, ordered sequence of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name.
    pub name: String,
    /// Stages sorted by number.
    pub stages: Vec<Stage>,
    /// Position of the `pipeline` keyword.
    pub position: Position,
}

impl Pipeline {
    /// Bind every stage's rule references using `lookup`.
    pub fn resolve(&mut self, mut lookup: impl FnMut(&str) -> Arc<Rule>) {
        for stage in &mut self.stages {
            stage.rules = stage.rule_refs.iter().map(|name| lookup(name)).collect();
        }
    }

    /// Whether every stage has its rules bound.
    pub fn is_resolved(&self) -> bool {
        self.stages
            .iter()
            .all(|stage| stage.rules.len() == stage.rule_refs.len())
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline {}", quote_string(&self.name))?;
        for stage in &self.stages {
            writeln!(f, "stage {} match {}", stage.number, stage.policy)?;
            for name in &stage.rule_refs {
                writeln!(f, "  rule {};", quote_string(name))?;
            }
        }
        f.write_str("end")
    }
}

/// Top-level item of a source unit.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// `rule ... end`
    Rule(Rule),
    /// `pipeline ... end`
    Pipeline(Pipeline),
}

impl Declaration {
    /// Declared name.
    pub fn name(&self) -> &str {
        match self {
            Declaration::Rule(rule) => &rule.name,
            Declaration::Pipeline(pipeline) => &pipeline.name,
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Declaration::Rule(rule) => write!(f, "{}", rule),
            Declaration::Pipeline(pipeline) => write!(f, "{}", pipeline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(value: impl Into<Value>) -> Expression {
        Expression::literal(value.into(), Position::default())
    }

    fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
        Expression::new(
            ExpressionKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            ValueType::Any,
            Position::default(),
        )
    }

    #[test]
    fn rendering_parenthesizes_by_precedence() {
        let sum = binary(BinaryOp::Add, lit(1i64), lit(2i64));
        let product = binary(BinaryOp::Mul, sum, lit(3i64));
        assert_eq!(product.to_string(), "(1 + 2) * 3");

        let nested = binary(
            BinaryOp::Sub,
            lit(10i64),
            binary(BinaryOp::Sub, lit(4i64), lit(3i64)),
        );
        assert_eq!(nested.to_string(), "10 - (4 - 3)");
    }

    #[test]
    fn fingerprint_ignores_rule_name() {
        let first = Rule::new("a", lit(true), Vec::new(), Position::default());
        let second = Rule::new("b", lit(true), Vec::new(), Position::default());
        let third = Rule::new("a", lit(false), Vec::new(), Position::default());
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_ne!(first.fingerprint(), third.fingerprint());
        assert_eq!(first.cache_key(), second.cache_key());
    }

    #[test]
    fn policies() {
        assert!(MatchPolicy::All.satisfied(2, 2));
        assert!(!MatchPolicy::All.satisfied(1, 2));
        assert!(MatchPolicy::Either.satisfied(1, 2));
        assert!(!MatchPolicy::Either.satisfied(0, 2));
        assert!(MatchPolicy::Pass.satisfied(0, 2));
        assert!(MatchPolicy::All.satisfied(0, 0));
    }

    #[test]
    fn depth_counts_nesting() {
        let expr = binary(BinaryOp::Add, lit(1i64), binary(BinaryOp::Add, lit(2i64), lit(3i64)));
        assert_eq!(expr.depth(), 3);
    }
}
