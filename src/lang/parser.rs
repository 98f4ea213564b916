use std::collections::HashMap;

use super::ast::{
    BinaryOp, Declaration, Expression, ExpressionKind, FunctionCall, MatchPolicy, Pipeline, Rule,
    Stage, Statement, UnaryOp,
};
use super::diagnostics::{Diagnostics, ParseError, ParseErrorKind, Position};
use super::lexer::{Token, TokenKind, tokenize};
use super::value::{Value, ValueType};
use crate::functions::{ErrorFunction, FunctionRegistry};

const RESERVED: &[&str] = &[
    "rule", "when", "then", "end", "let", "pipeline", "stage", "match", "and", "or", "not", "true",
    "false",
];

/// Deepest expression nesting the parser builds. Keeps the recursive
/// renderer and evaluator well inside a thread's stack.
pub const MAX_NESTING: usize = 128;

/// Everything a parse produced: the declarations that could be built plus
/// every diagnostic, in source order.
///
/// Declarations are returned even when diagnostics exist so tooling can show
/// the structure of a broken source; such declarations are not installable.
#[derive(Debug)]
pub struct ParseOutcome {
    /// Parsed rules and pipelines in source order.
    pub declarations: Vec<Declaration>,
    /// Diagnostics sorted by position.
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    /// Whether the source parsed without diagnostics.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Rules declared in the source.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.declarations.iter().filter_map(|decl| match decl {
            Declaration::Rule(rule) => Some(rule),
            Declaration::Pipeline(_) => None,
        })
    }

    /// Pipelines declared in the source.
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.declarations.iter().filter_map(|decl| match decl {
            Declaration::Pipeline(pipeline) => Some(pipeline),
            Declaration::Rule(_) => None,
        })
    }

    /// Declarations when clean, the diagnostics otherwise.
    pub fn into_result(self) -> Result<Vec<Declaration>, Diagnostics> {
        match Diagnostics::from_errors(self.errors) {
            Some(diagnostics) => Err(diagnostics),
            None => Ok(self.declarations),
        }
    }
}

/// Parse a source unit, always returning whatever could be built.
pub fn parse_with_diagnostics(source: &str, registry: &FunctionRegistry) -> ParseOutcome {
    let (tokens, lex_errors) = tokenize(source);
    let mut parser = Parser::new(tokens, registry);
    parser.errors.extend(lex_errors);
    let declarations = parser.parse_declarations();
    let mut errors = parser.errors;
    errors.sort_by_key(|error| error.position);
    errors.dedup();
    ParseOutcome {
        declarations,
        errors,
    }
}

/// Parse a source unit into declarations or the full set of diagnostics.
pub fn parse(source: &str, registry: &FunctionRegistry) -> Result<Vec<Declaration>, Diagnostics> {
    parse_with_diagnostics(source, registry).into_result()
}

/// Parse a source unit that must contain exactly one rule.
pub fn parse_rule(source: &str, registry: &FunctionRegistry) -> Result<Rule, Diagnostics> {
    let mut rules = Vec::new();
    for decl in parse(source, registry)? {
        match decl {
            Declaration::Rule(rule) => rules.push(rule),
            Declaration::Pipeline(pipeline) => {
                return Err(single(pipeline.position, "expected a rule, found a pipeline"));
            }
        }
    }
    match rules.len() {
        1 => Ok(rules.remove(0)),
        0 => Err(single(Position::new(1, 1), "expected a rule declaration")),
        _ => Err(single(rules[1].position, "expected a single rule declaration")),
    }
}

/// Parse a source unit that must contain exactly one pipeline.
pub fn parse_pipeline(source: &str, registry: &FunctionRegistry) -> Result<Pipeline, Diagnostics> {
    let mut pipelines = Vec::new();
    for decl in parse(source, registry)? {
        match decl {
            Declaration::Pipeline(pipeline) => pipelines.push(pipeline),
            Declaration::Rule(rule) => {
                return Err(single(rule.position, "expected a pipeline, found a rule"));
            }
        }
    }
    match pipelines.len() {
        1 => Ok(pipelines.remove(0)),
        0 => Err(single(Position::new(1, 1), "expected a pipeline declaration")),
        _ => Err(single(
            pipelines[1].position,
            "expected a single pipeline declaration",
        )),
    }
}

fn single(position: Position, message: &str) -> Diagnostics {
    Diagnostics::from_errors(vec![ParseError::syntax(position, message)])
        .unwrap_or_else(|| unreachable!("one error was supplied"))
}

/// Marker for a syntax error that has already been recorded; the caller
/// resynchronizes the token stream.
struct Recover;

type ParseResult<T> = std::result::Result<T, Recover>;

struct Parser<'r> {
    tokens: Vec<Token>,
    index: usize,
    registry: &'r FunctionRegistry,
    errors: Vec<ParseError>,
    scope: HashMap<String, ValueType>,
    in_condition: bool,
    depth: usize,
}

impl<'r> Parser<'r> {
    fn new(tokens: Vec<Token>, registry: &'r FunctionRegistry) -> Self {
        Self {
            tokens,
            index: 0,
            registry,
            errors: Vec::new(),
            scope: HashMap::new(),
            in_condition: false,
            depth: 0,
        }
    }

    // ---- token helpers ----

    fn current(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.index.min(last)]
    }

    fn kind(&self) -> &TokenKind {
        &self.current().kind
    }

    fn kind_at(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.index + offset).min(last)].kind
    }

    fn position(&self) -> Position {
        self.current().position
    }

    fn eof(&self) -> bool {
        matches!(self.kind(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !self.eof() {
            self.index += 1;
        }
        token
    }

    fn at_keyword(&self, word: &str) -> bool {
        self.kind().is_keyword(word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.kind() == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&mut self, position: Position, kind: ParseErrorKind) {
        self.errors.push(ParseError::new(position, kind));
    }

    fn syntax_error<T>(&mut self, expected: &str) -> ParseResult<T> {
        let message = format!("expected {}, found {}", expected, self.kind());
        let position = self.position();
        self.errors.push(ParseError::syntax(position, message));
        Err(Recover)
    }

    /// Run `parse` one nesting level deeper, rejecting input that nests
    /// past [`MAX_NESTING`] either in the parser or in the built tree.
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> ParseResult<Expression>,
    ) -> ParseResult<Expression> {
        if self.depth >= MAX_NESTING {
            let position = self.position();
            return self.too_deep(position);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        let expr = result?;
        self.check_depth(&expr)?;
        Ok(expr)
    }

    fn check_depth(&mut self, expr: &Expression) -> ParseResult<()> {
        if expr.depth() > MAX_NESTING {
            return self.too_deep(expr.position);
        }
        Ok(())
    }

    fn too_deep<T>(&mut self, position: Position) -> ParseResult<T> {
        self.error(
            position,
            ParseErrorKind::NestingTooDeep { limit: MAX_NESTING },
        );
        Err(Recover)
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            self.syntax_error(expected)
        }
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            self.syntax_error(&format!("'{}'", word))
        }
    }

    fn expect_string(&mut self, expected: &str) -> ParseResult<String> {
        match self.kind().clone() {
            TokenKind::Str(text) => {
                self.advance();
                Ok(text)
            }
            _ => self.syntax_error(expected),
        }
    }

    fn expect_name(&mut self, expected: &str) -> ParseResult<String> {
        match self.kind().clone() {
            TokenKind::Ident(name) | TokenKind::QuotedIdent(name) => {
                self.advance();
                Ok(name)
            }
            _ => self.syntax_error(expected),
        }
    }

    /// `pipeline`, or `rule "name" when`, starts a new top-level declaration.
    fn at_declaration_start(&self) -> bool {
        if self.at_keyword("pipeline") {
            return true;
        }
        self.at_keyword("rule")
            && matches!(self.kind_at(1), TokenKind::Str(_))
            && self.kind_at(2).is_keyword("when")
    }

    fn sync_to_declaration(&mut self) {
        while !self.eof() && !self.at_declaration_start() {
            if self.eat_keyword("end") {
                return;
            }
            self.advance();
        }
    }

    fn sync_to_statement_end(&mut self) {
        while !self.eof() && !self.at_keyword("end") && !self.at_declaration_start() {
            if self.eat(&TokenKind::Semicolon) {
                return;
            }
            self.advance();
        }
    }

    // ---- declarations ----

    fn parse_declarations(&mut self) -> Vec<Declaration> {
        let mut declarations = Vec::new();
        while !self.eof() {
            let result = if self.at_keyword("rule") {
                self.parse_rule_decl().map(Declaration::Rule)
            } else if self.at_keyword("pipeline") {
                self.parse_pipeline_decl().map(Declaration::Pipeline)
            } else {
                let outcome = self.syntax_error("'rule' or 'pipeline'");
                self.advance();
                outcome
            };
            match result {
                Ok(decl) => declarations.push(decl),
                Err(Recover) => self.sync_to_declaration(),
            }
        }
        declarations
    }

    fn parse_rule_decl(&mut self) -> ParseResult<Rule> {
        let position = self.position();
        self.expect_keyword("rule")?;
        let name = self.expect_string("rule name string")?;
        self.expect_keyword("when")?;

        self.scope.clear();
        self.in_condition = true;
        let when = match self.parse_expression() {
            Ok(expr) => {
                if !ValueType::Boolean.accepts(expr.ty) {
                    self.error(
                        expr.position,
                        ParseErrorKind::IncompatibleType {
                            expected: ValueType::Boolean,
                            actual: expr.ty,
                        },
                    );
                }
                expr
            }
            Err(Recover) => {
                while !self.eof() && !self.at_keyword("then") && !self.at_keyword("end") {
                    self.advance();
                }
                Expression::literal(Value::Boolean(false), position)
            }
        };
        self.in_condition = false;

        self.expect_keyword("then")?;
        let mut then = Vec::new();
        while !self.eof() && !self.at_keyword("end") && !self.at_declaration_start() {
            match self.parse_statement() {
                Ok(statement) => then.push(statement),
                Err(Recover) => self.sync_to_statement_end(),
            }
        }
        self.expect_keyword("end")?;
        self.scope.clear();

        Ok(Rule::new(name, when, then, position))
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        let position = self.position();
        let statement = if self.eat_keyword("let") {
            let name_position = self.position();
            let name = self.expect_name("variable name")?;
            if is_reserved(&name) {
                self.errors.push(ParseError::syntax(
                    name_position,
                    format!("'{}' is a reserved word", name),
                ));
            }
            self.expect(TokenKind::Assign, "'='")?;
            let value = self.parse_expression()?;
            let ty = value.ty;
            self.scope.insert(name.clone(), ty);
            Statement::VarAssign {
                name,
                ty,
                value,
                position,
            }
        } else {
            let expr = self.parse_expression()?;
            if !matches!(expr.kind, ExpressionKind::Call(_)) {
                self.errors.push(ParseError::syntax(
                    expr.position,
                    "only function calls and 'let' assignments are allowed as statements",
                ));
            }
            Statement::FunctionCall(expr)
        };
        if !self.eat(&TokenKind::Semicolon) && !self.at_keyword("end") {
            return self.syntax_error("';'");
        }
        Ok(statement)
    }

    fn parse_pipeline_decl(&mut self) -> ParseResult<Pipeline> {
        let position = self.position();
        self.expect_keyword("pipeline")?;
        let name = self.expect_string("pipeline name string")?;

        let mut stages: Vec<Stage> = Vec::new();
        while self.at_keyword("stage") {
            stages.push(self.parse_stage()?);
        }
        self.expect_keyword("end")?;

        if stages.is_empty() {
            self.error(
                position,
                ParseErrorKind::EmptyPipeline {
                    pipeline: name.clone(),
                },
            );
        }
        stages.sort_by_key(|stage| stage.number);
        for pair in stages.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.number == next.number {
                self.error(
                    next.position,
                    ParseErrorKind::DuplicateStage {
                        pipeline: name.clone(),
                        stage: next.number,
                    },
                );
            } else if next.number != prev.number.saturating_add(1) {
                self.error(
                    next.position,
                    ParseErrorKind::NonContiguousStages {
                        pipeline: name.clone(),
                        expected: prev.number.saturating_add(1),
                        found: next.number,
                    },
                );
            }
        }

        Ok(Pipeline {
            name,
            stages,
            position,
        })
    }

    fn parse_stage(&mut self) -> ParseResult<Stage> {
        let position = self.position();
        self.expect_keyword("stage")?;
        let negative = self.eat(&TokenKind::Minus);
        let number = match *self.kind() {
            TokenKind::Int(num) => {
                self.advance();
                let signed = if negative { -num } else { num };
                match i32::try_from(signed) {
                    Ok(number) => number,
                    Err(_) => {
                        self.errors.push(ParseError::syntax(
                            position,
                            format!("stage number {} out of range", signed),
                        ));
                        0
                    }
                }
            }
            _ => return self.syntax_error("stage number"),
        };
        self.expect_keyword("match")?;
        let policy = if self.eat_keyword("all") {
            MatchPolicy::All
        } else if self.eat_keyword("either") || self.eat_keyword("any") {
            MatchPolicy::Either
        } else if self.eat_keyword("pass") {
            MatchPolicy::Pass
        } else {
            return self.syntax_error("'all', 'either' or 'pass'");
        };

        let mut rule_refs = Vec::new();
        while self.at_keyword("rule") {
            self.advance();
            rule_refs.push(self.expect_string("rule name string")?);
            self.eat(&TokenKind::Semicolon);
        }

        Ok(Stage {
            number,
            policy,
            rule_refs,
            rules: Vec::new(),
            position,
        })
    }

    // ---- expressions ----

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.nested(Self::parse_or)
    }

    fn parse_or(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_and()?;
        loop {
            if !(self.eat_keyword("or") || self.eat(&TokenKind::OrOr)) {
                return Ok(left);
            }
            let right = self.parse_and()?;
            left = self.logical(BinaryOp::Or, left, right);
            self.check_depth(&left)?;
        }
    }

    fn parse_and(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_not()?;
        loop {
            if !(self.eat_keyword("and") || self.eat(&TokenKind::AndAnd)) {
                return Ok(left);
            }
            let right = self.parse_not()?;
            left = self.logical(BinaryOp::And, left, right);
            self.check_depth(&left)?;
        }
    }

    fn parse_not(&mut self) -> ParseResult<Expression> {
        let position = self.position();
        if self.eat_keyword("not") || self.eat(&TokenKind::Bang) {
            let operand = self.nested(Self::parse_not)?;
            self.expect_boolean(&operand);
            return Ok(Expression::new(
                ExpressionKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                ValueType::Boolean,
                position,
            ));
        }
        self.parse_equality()
    }

    fn parse_equality(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_comparison()?;
        loop {
            let position = self.position();
            let op = match self.kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = self.comparison(op, left, right, position);
            self.check_depth(&left)?;
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_additive()?;
        loop {
            let position = self.position();
            let op = match self.kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = self.comparison(op, left, right, position);
            self.check_depth(&left)?;
        }
    }

    fn parse_additive(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let position = self.position();
            let op = match self.kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.arithmetic(op, left, right, position);
            self.check_depth(&left)?;
        }
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expression> {
        let mut left = self.parse_unary()?;
        loop {
            let position = self.position();
            let op = match self.kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.arithmetic(op, left, right, position);
            self.check_depth(&left)?;
        }
    }

    fn parse_unary(&mut self) -> ParseResult<Expression> {
        let position = self.position();
        let op = match self.kind() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Plus => UnaryOp::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance();

        // `-5` is a literal, not a negation node
        if op == UnaryOp::Negate {
            match *self.kind() {
                TokenKind::Int(num) => {
                    self.advance();
                    return self.parse_postfix_tail(Expression::literal(
                        Value::Long(num.wrapping_neg()),
                        position,
                    ));
                }
                TokenKind::Float(num) => {
                    self.advance();
                    return self
                        .parse_postfix_tail(Expression::literal(Value::Double(-num), position));
                }
                _ => {}
            }
        }

        let operand = self.nested(Self::parse_unary)?;
        if operand.ty.is_known() && !operand.ty.is_numeric() {
            self.error(
                position,
                ParseErrorKind::InvalidOperation(format!(
                    "unary '{}' is not defined for {}",
                    if op == UnaryOp::Negate { "-" } else { "+" },
                    operand.ty
                )),
            );
        }
        let ty = if operand.ty.is_numeric() {
            operand.ty
        } else {
            ValueType::Any
        };
        Ok(Expression::new(
            ExpressionKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
            position,
        ))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let primary = self.parse_primary()?;
        self.parse_postfix_tail(primary)
    }

    fn parse_postfix_tail(&mut self, mut expr: Expression) -> ParseResult<Expression> {
        loop {
            let position = self.position();
            if self.eat(&TokenKind::Dot) {
                let field = self.expect_name("field name")?;
                if !matches!(expr.ty, ValueType::Map | ValueType::Any) {
                    self.error(position, ParseErrorKind::NonIndexableType { actual: expr.ty });
                }
                let start = expr.position;
                expr = Expression::new(
                    ExpressionKind::FieldAccess {
                        object: Box::new(expr),
                        field,
                    },
                    ValueType::Any,
                    start,
                );
                self.check_depth(&expr)?;
            } else if self.eat(&TokenKind::LBracket) {
                let index = self.parse_expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                self.check_index(&expr, &index, position);
                let start = expr.position;
                expr = Expression::new(
                    ExpressionKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    ValueType::Any,
                    start,
                );
                self.check_depth(&expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let position = self.position();
        match self.kind().clone() {
            TokenKind::Int(num) => {
                self.advance();
                Ok(Expression::literal(Value::Long(num), position))
            }
            TokenKind::Float(num) => {
                self.advance();
                Ok(Expression::literal(Value::Double(num), position))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expression::literal(Value::String(text), position))
            }
            TokenKind::LParen => {
                self.advance();
                let mut inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                inner.position = position;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        if self.eat(&TokenKind::RBracket) {
                            break;
                        }
                        self.expect(TokenKind::Comma, "',' or ']'")?;
                    }
                }
                Ok(Expression::new(
                    ExpressionKind::Array(items),
                    ValueType::List,
                    position,
                ))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        let key = match self.kind().clone() {
                            TokenKind::Ident(name)
                            | TokenKind::QuotedIdent(name)
                            | TokenKind::Str(name) => {
                                self.advance();
                                name
                            }
                            _ => return self.syntax_error("map key"),
                        };
                        self.expect(TokenKind::Colon, "':'")?;
                        entries.push((key, self.parse_expression()?));
                        if self.eat(&TokenKind::RBrace) {
                            break;
                        }
                        self.expect(TokenKind::Comma, "',' or '}'")?;
                    }
                }
                Ok(Expression::new(
                    ExpressionKind::Map(entries),
                    ValueType::Map,
                    position,
                ))
            }
            TokenKind::Dollar => {
                self.advance();
                if !matches!(self.kind(), TokenKind::Ident(name) if name.eq_ignore_ascii_case("message"))
                {
                    return self.syntax_error("'message' after '$'");
                }
                self.advance();
                self.expect(TokenKind::Dot, "'.'")?;
                let field = self.expect_name("field name")?;
                Ok(Expression::new(
                    ExpressionKind::Field(field),
                    ValueType::Any,
                    position,
                ))
            }
            TokenKind::Ident(name) => {
                if name.eq_ignore_ascii_case("true") || name.eq_ignore_ascii_case("false") {
                    self.advance();
                    let flag = name.eq_ignore_ascii_case("true");
                    return Ok(Expression::literal(Value::Boolean(flag), position));
                }
                if matches!(self.kind_at(1), TokenKind::LParen) {
                    return self.parse_call(name, position);
                }
                if is_reserved(&name) {
                    return self.syntax_error("expression");
                }
                self.advance();
                let ty = match self.scope.get(&name) {
                    Some(ty) => *ty,
                    None => {
                        self.error(
                            position,
                            ParseErrorKind::UndeclaredVariable { name: name.clone() },
                        );
                        ValueType::Any
                    }
                };
                Ok(Expression::new(ExpressionKind::Variable(name), ty, position))
            }
            _ => self.syntax_error("expression"),
        }
    }

    fn parse_call(&mut self, name: String, position: Position) -> ParseResult<Expression> {
        self.advance();
        self.expect(TokenKind::LParen, "'('")?;

        let mut raw_args: Vec<(Option<String>, Expression)> = Vec::new();
        if !self.eat(&TokenKind::RParen) {
            loop {
                let arg_name = if matches!(self.kind_at(1), TokenKind::Colon) {
                    match self.kind().clone() {
                        TokenKind::Ident(arg) | TokenKind::QuotedIdent(arg) => {
                            self.advance();
                            self.advance();
                            Some(arg)
                        }
                        _ => None,
                    }
                } else {
                    None
                };
                raw_args.push((arg_name, self.parse_expression()?));
                if self.eat(&TokenKind::RParen) {
                    break;
                }
                self.expect(TokenKind::Comma, "',' or ')'")?;
            }
        }

        let named_count = raw_args.iter().filter(|(name, _)| name.is_some()).count();
        let named = named_count > 0;
        if named && named_count != raw_args.len() {
            self.errors.push(ParseError::syntax(
                position,
                format!(
                    "function '{}' mixes positional and named arguments",
                    name
                ),
            ));
        }

        Ok(self.resolve_call(name, named, raw_args, position))
    }

    fn resolve_call(
        &mut self,
        name: String,
        named: bool,
        raw_args: Vec<(Option<String>, Expression)>,
        position: Position,
    ) -> Expression {
        let Some(function) = self.registry.resolve(&name) else {
            self.error(
                position,
                ParseErrorKind::UndeclaredFunction { name: name.clone() },
            );
            let args = raw_args
                .into_iter()
                .enumerate()
                .map(|(idx, (arg_name, expr))| (arg_name.unwrap_or_else(|| idx.to_string()), expr))
                .collect();
            let call = FunctionCall {
                name,
                function: ErrorFunction::instance(),
                args,
                named,
                resolved: false,
            };
            return Expression::new(ExpressionKind::Call(call), ValueType::Any, position);
        };

        let descriptor = function.descriptor().clone();
        let mut args: Vec<(String, Expression)> = Vec::with_capacity(raw_args.len());

        if named {
            for (idx, (arg_name, expr)) in raw_args.into_iter().enumerate() {
                let arg_name = arg_name.unwrap_or_else(|| idx.to_string());
                if descriptor.parameter(&arg_name).is_none() {
                    self.error(
                        expr.position,
                        ParseErrorKind::UnknownParameter {
                            function: name.clone(),
                            param: arg_name.clone(),
                        },
                    );
                }
                args.push((arg_name, expr));
            }
            for param in descriptor.params.iter().filter(|param| !param.optional) {
                if !args.iter().any(|(arg_name, _)| arg_name == &param.name) {
                    self.error(
                        position,
                        ParseErrorKind::MissingRequiredParam {
                            function: name.clone(),
                            param: param.name.clone(),
                        },
                    );
                }
            }
        } else {
            let given = raw_args.len();
            if given > descriptor.params.len() || given < descriptor.required_count() {
                self.error(
                    position,
                    ParseErrorKind::WrongNumberOfArgs {
                        function: name.clone(),
                        given,
                    },
                );
            } else if descriptor.has_optional_before_required() && given < descriptor.params.len()
            {
                self.error(
                    position,
                    ParseErrorKind::OptionalParametersMustBeNamed {
                        function: name.clone(),
                    },
                );
            }
            for (idx, (_, expr)) in raw_args.into_iter().enumerate() {
                let param_name = descriptor
                    .params
                    .get(idx)
                    .map(|param| param.name.clone())
                    .unwrap_or_else(|| idx.to_string());
                args.push((param_name, expr));
            }
        }

        for (param_name, expr) in &args {
            if let Some(param) = descriptor.parameter(param_name) {
                if !param.ty.accepts(expr.ty) {
                    self.error(
                        expr.position,
                        ParseErrorKind::IncompatibleArgumentType {
                            function: name.clone(),
                            param: param_name.clone(),
                            expected: param.ty,
                            actual: expr.ty,
                        },
                    );
                }
            }
        }

        if self.in_condition && !descriptor.pure {
            self.error(
                position,
                ParseErrorKind::SideEffectInCondition {
                    function: name.clone(),
                },
            );
        }

        let call = FunctionCall {
            name,
            function,
            args,
            named,
            resolved: true,
        };
        Expression::new(
            ExpressionKind::Call(call),
            descriptor.return_type,
            position,
        )
    }

    // ---- static checks ----

    fn expect_boolean(&mut self, expr: &Expression) {
        if !ValueType::Boolean.accepts(expr.ty) {
            self.error(
                expr.position,
                ParseErrorKind::IncompatibleType {
                    expected: ValueType::Boolean,
                    actual: expr.ty,
                },
            );
        }
    }

    fn logical(&mut self, op: BinaryOp, left: Expression, right: Expression) -> Expression {
        self.expect_boolean(&left);
        self.expect_boolean(&right);
        binary(op, left, right, ValueType::Boolean)
    }

    fn comparison(
        &mut self,
        op: BinaryOp,
        left: Expression,
        right: Expression,
        position: Position,
    ) -> Expression {
        let (lt, rt) = (left.ty, right.ty);
        if lt.is_known() && rt.is_known() {
            let numeric = lt.is_numeric() && rt.is_numeric();
            if lt != rt && !numeric {
                self.error(
                    position,
                    ParseErrorKind::IncompatibleTypes {
                        operator: op.symbol().to_string(),
                        left: lt,
                        right: rt,
                    },
                );
            } else if !matches!(op, BinaryOp::Eq | BinaryOp::Ne)
                && !numeric
                && lt != ValueType::String
            {
                self.error(
                    position,
                    ParseErrorKind::InvalidOperation(format!(
                        "'{}' is not defined for {}",
                        op.symbol(),
                        lt
                    )),
                );
            }
        }
        binary(op, left, right, ValueType::Boolean)
    }

    fn arithmetic(
        &mut self,
        op: BinaryOp,
        left: Expression,
        right: Expression,
        position: Position,
    ) -> Expression {
        let (lt, rt) = (left.ty, right.ty);
        let ty = if lt.is_numeric() && rt.is_numeric() {
            if lt == ValueType::Long && rt == ValueType::Long {
                ValueType::Long
            } else {
                ValueType::Double
            }
        } else if op == BinaryOp::Add && lt == ValueType::String && rt == ValueType::String {
            ValueType::String
        } else if lt.is_known() && rt.is_known() {
            if lt != rt && !(lt.is_numeric() && rt.is_numeric()) {
                self.error(
                    position,
                    ParseErrorKind::IncompatibleTypes {
                        operator: op.symbol().to_string(),
                        left: lt,
                        right: rt,
                    },
                );
            } else {
                self.error(
                    position,
                    ParseErrorKind::InvalidOperation(format!(
                        "'{}' is not defined for {}",
                        op.symbol(),
                        lt
                    )),
                );
            }
            ValueType::Any
        } else {
            ValueType::Any
        };
        binary(op, left, right, ty)
    }

    fn check_index(&mut self, object: &Expression, index: &Expression, position: Position) {
        let expected = match object.ty {
            ValueType::List => ValueType::Long,
            ValueType::Map => ValueType::String,
            ValueType::Any => return,
            other => {
                self.error(position, ParseErrorKind::NonIndexableType { actual: other });
                return;
            }
        };
        if !expected.accepts(index.ty) {
            self.error(
                index.position,
                ParseErrorKind::IncompatibleIndexType {
                    expected,
                    actual: index.ty,
                },
            );
        }
    }
}

fn binary(op: BinaryOp, left: Expression, right: Expression, ty: ValueType) -> Expression {
    let position = left.position;
    Expression::new(
        ExpressionKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        ty,
        position,
    )
}

fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|word| word.eq_ignore_ascii_case(name))
}
