use std::fmt;

use super::diagnostics::{ParseError, Position};

/// Token classes produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Bare identifier or keyword.
    Ident(String),
    /// Backtick-quoted identifier.
    QuotedIdent(String),
    /// String literal with escapes resolved.
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// `$`
    Dollar,
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `.`
    Dot,
    /// `=`
    Assign,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `!`
    Bang,
    /// `&&`
    AndAnd,
    /// `||`
    OrOr,
    /// End of input.
    Eof,
}

impl TokenKind {
    /// Whether this is the identifier `word`, ignoring ASCII case.
    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(self, TokenKind::Ident(name) if name.eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "'{}'", name),
            TokenKind::QuotedIdent(name) => write!(f, "'`{}`'", name),
            TokenKind::Str(_) => f.write_str("string literal"),
            TokenKind::Int(num) => write!(f, "'{}'", num),
            TokenKind::Float(num) => write!(f, "'{}'", num),
            TokenKind::Eof => f.write_str("end of input"),
            other => {
                let symbol = match other {
                    TokenKind::Dollar => "$",
                    TokenKind::LParen => "(",
                    TokenKind::RParen => ")",
                    TokenKind::LBracket => "[",
                    TokenKind::RBracket => "]",
                    TokenKind::LBrace => "{",
                    TokenKind::RBrace => "}",
                    TokenKind::Comma => ",",
                    TokenKind::Colon => ":",
                    TokenKind::Semicolon => ";",
                    TokenKind::Dot => ".",
                    TokenKind::Assign => "=",
                    TokenKind::EqEq => "==",
                    TokenKind::NotEq => "!=",
                    TokenKind::Lt => "<",
                    TokenKind::Le => "<=",
                    TokenKind::Gt => ">",
                    TokenKind::Ge => ">=",
                    TokenKind::Plus => "+",
                    TokenKind::Minus => "-",
                    TokenKind::Star => "*",
                    TokenKind::Slash => "/",
                    TokenKind::Percent => "%",
                    TokenKind::Bang => "!",
                    TokenKind::AndAnd => "&&",
                    TokenKind::OrOr => "||",
                    _ => "?",
                };
                write!(f, "'{}'", symbol)
            }
        }
    }
}

/// A token and where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token class and payload.
    pub kind: TokenKind,
    /// Start position.
    pub position: Position,
}

/// Split `source` into tokens.
///
/// Never fails: malformed input produces diagnostics and the scanner resumes
/// at the next character. The token list always ends with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<ParseError>) {
    let mut lexer = Lexer::new(source);
    lexer.run();
    (lexer.tokens, lexer.errors)
}

struct Lexer {
    chars: Vec<char>,
    index: usize,
    line: u32,
    column: u32,
    tokens: Vec<Token>,
    errors: Vec<ParseError>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            index: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn current(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current()?;
        self.index += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn push(&mut self, kind: TokenKind, position: Position) {
        self.tokens.push(Token { kind, position });
    }

    fn error(&mut self, position: Position, message: impl Into<String>) {
        self.errors.push(ParseError::syntax(position, message));
    }

    fn run(&mut self) {
        loop {
            self.skip_trivia();
            let start = self.position();
            let Some(ch) = self.current() else {
                self.push(TokenKind::Eof, start);
                return;
            };

            if ch.is_ascii_alphabetic() || ch == '_' {
                let ident = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                self.push(TokenKind::Ident(ident), start);
                continue;
            }
            if ch.is_ascii_digit() {
                self.lex_number(start);
                continue;
            }

            self.advance();
            let kind = match ch {
                '"' => match self.lex_string(start) {
                    Some(text) => TokenKind::Str(text),
                    None => continue,
                },
                '`' => match self.lex_quoted_ident(start) {
                    Some(name) => TokenKind::QuotedIdent(name),
                    None => continue,
                },
                '$' => TokenKind::Dollar,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                '.' => TokenKind::Dot,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' => self.pick('=', TokenKind::EqEq, TokenKind::Assign),
                '!' => self.pick('=', TokenKind::NotEq, TokenKind::Bang),
                '<' => self.pick('=', TokenKind::Le, TokenKind::Lt),
                '>' => self.pick('=', TokenKind::Ge, TokenKind::Gt),
                '&' if self.current() == Some('&') => {
                    self.advance();
                    TokenKind::AndAnd
                }
                '|' if self.current() == Some('|') => {
                    self.advance();
                    TokenKind::OrOr
                }
                other => {
                    self.error(start, format!("unexpected character '{}'", other));
                    continue;
                }
            };
            self.push(kind, start);
        }
    }

    fn pick(&mut self, next: char, matched: TokenKind, single: TokenKind) -> TokenKind {
        if self.current() == Some(next) {
            self.advance();
            matched
        } else {
            single
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(ch) = self.current() {
            if !pred(ch) {
                break;
            }
            out.push(ch);
            self.advance();
        }
        out
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.current(), self.peek()) {
                (Some(ch), _) if ch.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.advance() {
                        if ch == '\n' {
                            break;
                        }
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.position();
                    self.advance();
                    self.advance();
                    let mut closed = false;
                    while let Some(ch) = self.advance() {
                        if ch == '*' && self.current() == Some('/') {
                            self.advance();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        self.error(start, "unterminated block comment");
                    }
                }
                _ => return,
            }
        }
    }

    fn lex_number(&mut self, start: Position) {
        let mut text = self.take_while(|c| c.is_ascii_digit());
        let mut is_float = false;

        if self.current() == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            text.push('.');
            text.push_str(&self.take_while(|c| c.is_ascii_digit()));
        }
        if matches!(self.current(), Some('e' | 'E')) {
            let sign = self.peek();
            let digit_after_sign = self.chars.get(self.index + 2).is_some_and(|c| c.is_ascii_digit());
            let has_exponent = match sign {
                Some(c) if c.is_ascii_digit() => true,
                Some('+' | '-') => digit_after_sign,
                _ => false,
            };
            if has_exponent {
                is_float = true;
                text.push('e');
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current() {
                    text.push(sign);
                    self.advance();
                }
                text.push_str(&self.take_while(|c| c.is_ascii_digit()));
            }
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(num) if num.is_finite() => self.push(TokenKind::Float(num), start),
                Ok(_) => {
                    self.error(start, format!("number literal '{}' out of range", text));
                    self.push(TokenKind::Float(0.0), start);
                }
                Err(_) => self.error(start, format!("invalid number '{}'", text)),
            }
        } else {
            match text.parse::<i64>() {
                Ok(num) => self.push(TokenKind::Int(num), start),
                Err(_) => {
                    self.error(start, format!("integer literal '{}' out of range", text));
                    self.push(TokenKind::Int(0), start);
                }
            }
        }
    }

    fn lex_string(&mut self, start: Position) -> Option<String> {
        let mut out = String::new();
        loop {
            let escape_at = self.position();
            match self.advance() {
                None => {
                    self.error(start, "unterminated string literal");
                    return None;
                }
                Some('"') => return Some(out),
                Some('\\') => match self.advance() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('u') => match self.lex_unicode_escape() {
                        Some(ch) => out.push(ch),
                        None => self.error(escape_at, "invalid unicode escape"),
                    },
                    Some(other) => {
                        self.error(escape_at, format!("unknown escape '\\{}'", other));
                    }
                    None => {
                        self.error(start, "unterminated string literal");
                        return None;
                    }
                },
                Some(ch) => out.push(ch),
            }
        }
    }

    fn lex_unicode_escape(&mut self) -> Option<char> {
        if self.current() != Some('{') {
            return None;
        }
        self.advance();
        let digits = self.take_while(|c| c.is_ascii_hexdigit());
        if self.current() != Some('}') {
            return None;
        }
        self.advance();
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
    }

    fn lex_quoted_ident(&mut self, start: Position) -> Option<String> {
        let mut out = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => {
                    self.error(start, "unterminated quoted identifier");
                    return None;
                }
                Some('`') if self.current() == Some('`') => {
                    self.advance();
                    out.push('`');
                }
                Some('`') => return Some(out),
                Some(ch) => out.push(ch),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        tokens.into_iter().map(|token| token.kind).collect()
    }

    #[test]
    fn operators_and_literals() {
        assert_eq!(
            kinds("a >= 1.5e3 && !b != \"x\\n\""),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ge,
                TokenKind::Float(1500.0),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Ident("b".into()),
                TokenKind::NotEq,
                TokenKind::Str("x\n".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_positions_tracked() {
        let (tokens, _) = tokenize("// header\n/* block\n */ $message.`odd name`");
        assert_eq!(tokens[0].kind, TokenKind::Dollar);
        assert_eq!(tokens[0].position, Position::new(3, 5));
        assert_eq!(tokens[3].kind, TokenKind::QuotedIdent("odd name".into()));
    }

    #[test]
    fn member_access_on_integer_is_not_a_float() {
        assert_eq!(
            kinds("1.x"),
            vec![
                TokenKind::Int(1),
                TokenKind::Dot,
                TokenKind::Ident("x".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn bad_input_is_reported_and_skipped() {
        let (tokens, errors) = tokenize("a # b \"open");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].position, Position::new(1, 3));
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn doubled_backtick_escapes_inside_quoted_identifiers() {
        assert_eq!(
            kinds("`a``b`"),
            vec![TokenKind::QuotedIdent("a`b".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn infinite_float_literals_are_rejected() {
        let (tokens, errors) = tokenize("1e999");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message().contains("out of range"));
        assert_eq!(tokens[0].kind, TokenKind::Float(0.0));
    }
}
