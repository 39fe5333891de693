//! Expression parser
//!
//! Tokenizes factor expression text and builds an [`Expr`] by recursive
//! descent. Grammar (left-associative, usual precedence):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | '$' IDENT | IDENT '(' args ')' | '(' expr ')'
//! args    := expr (',' expr)*
//! ```
//!
//! Text longer than the configured character limit is rejected before any
//! tokenizing happens, which bounds worst-case parse time.

use thiserror::Error;

use crate::ast::Expr;
use crate::lint;
use crate::ops::{BinaryOp, Feature, Operator, ParamKind};

/// Errors produced while turning text into an AST
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Expression is empty")]
    Empty,

    #[error("Expression length {length} exceeds limit of {limit} characters")]
    TooLong { length: usize, limit: usize },

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown base feature: ${0}")]
    UnknownFeature(String),

    #[error("Syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("{operator} expects {expected} arguments, found {found}")]
    Arity {
        operator: String,
        expected: usize,
        found: usize,
    },

    #[error("{operator} argument {index}: {reason}")]
    InvalidParameter {
        operator: String,
        index: usize,
        reason: String,
    },
}

impl ParseError {
    fn syntax(position: usize, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Field(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, ParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            // optional exponent: 1e-5, 2E3
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            // overflowing literals parse to infinity, which has no literal form
            let value = literal
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| ParseError::syntax(offset, format!("invalid number '{}'", literal)))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                offset,
            });
        } else if c == '$' {
            i += 1;
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            if start == i {
                return Err(ParseError::syntax(offset, "expected field name after '$'"));
            }
            let name: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Field(name),
                offset,
            });
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
            tokens.push(Spanned {
                token: Token::Ident(name),
                offset,
            });
        } else {
            return Err(ParseError::syntax(offset, format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

/// Factor expression parser with a bounded input length
#[derive(Debug, Clone)]
pub struct ExpressionParser {
    max_chars: usize,
    max_depth: usize,
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self {
            max_chars: crate::DEFAULT_MAX_EXPRESSION_CHARS,
            max_depth: crate::DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl ExpressionParser {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            ..Self::default()
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Parse `text` into an AST
    pub fn parse(&self, text: &str) -> Result<Expr, ParseError> {
        let length = text.chars().count();
        if length > self.max_chars {
            return Err(ParseError::TooLong {
                length,
                limit: self.max_chars,
            });
        }
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        lint::lint(text)?;

        let tokens = tokenize(text)?;
        let mut state = ParserState {
            tokens: &tokens,
            pos: 0,
            depth: 0,
            max_depth: self.max_depth,
            end: text.len(),
        };
        let expr = state.expr()?;
        if let Some(extra) = state.peek() {
            return Err(ParseError::syntax(extra.offset, "unexpected trailing input"));
        }
        Ok(expr)
    }
}

/// Parse with the default limits
pub fn parse(text: &str) -> Result<Expr, ParseError> {
    ExpressionParser::default().parse(text)
}

struct ParserState<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    depth: usize,
    max_depth: usize,
    end: usize,
}

impl<'a> ParserState<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Spanned> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.offset).unwrap_or(self.end)
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(spanned) if spanned.token == expected => Ok(()),
            Some(spanned) => Err(ParseError::syntax(spanned.offset, format!("expected {}", what))),
            None => Err(ParseError::syntax(self.end, format!("expected {}, found end of input", what))),
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ParseError::syntax(
                self.offset(),
                format!("nesting deeper than {}", self.max_depth),
            ));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.enter()?;
        let mut lhs = self.term()?;
        while let Some(spanned) = self.peek() {
            let op = match spanned.token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(spanned) = self.peek() {
            let op = match spanned.token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if matches!(self.peek().map(|s| &s.token), Some(Token::Minus)) {
            self.pos += 1;
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            // negative constants stay a single literal leaf
            return Ok(match operand {
                Expr::Literal(value) => Expr::Literal(-value),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(spanned) = self.next() else {
            return Err(ParseError::syntax(self.end, "unexpected end of input"));
        };

        match &spanned.token {
            Token::Number(value) => Ok(Expr::Literal(*value)),
            Token::Field(name) => Feature::from_name(name)
                .map(Expr::Feature)
                .ok_or_else(|| ParseError::UnknownFeature(name.clone())),
            Token::Ident(name) => {
                let op = Operator::from_name(name)
                    .ok_or_else(|| ParseError::UnknownOperator(name.clone()))?;
                self.call(op)
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            _ => Err(ParseError::syntax(spanned.offset, "expected an operand")),
        }
    }

    fn call(&mut self, op: Operator) -> Result<Expr, ParseError> {
        self.expect(Token::LParen, &format!("'(' after {}", op))?;

        let mut args = Vec::new();
        if matches!(self.peek().map(|s| &s.token), Some(Token::RParen)) {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expr()?);
                match self.next() {
                    Some(Spanned {
                        token: Token::Comma,
                        ..
                    }) => continue,
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => break,
                    Some(other) => {
                        return Err(ParseError::syntax(other.offset, "expected ',' or ')'"))
                    }
                    None => {
                        return Err(ParseError::syntax(self.end, "unclosed argument list"))
                    }
                }
            }
        }

        check_signature(op, &args)?;
        Ok(Expr::call(op, args))
    }
}

fn check_signature(op: Operator, args: &[Expr]) -> Result<(), ParseError> {
    let params = op.params();
    if params.len() != args.len() {
        return Err(ParseError::Arity {
            operator: op.name().to_string(),
            expected: params.len(),
            found: args.len(),
        });
    }

    for (index, (kind, arg)) in params.iter().zip(args).enumerate() {
        let invalid = |reason: &str| ParseError::InvalidParameter {
            operator: op.name().to_string(),
            index,
            reason: reason.to_string(),
        };
        match kind {
            ParamKind::Series => {}
            ParamKind::Window => match arg {
                Expr::Literal(value) if *value >= 1.0 && value.fract() == 0.0 => {}
                Expr::Literal(_) => return Err(invalid("window must be a positive integer")),
                _ => return Err(invalid("window must be a numeric literal")),
            },
            ParamKind::Scalar => {
                if !matches!(arg, Expr::Literal(value) if value.is_finite()) {
                    return Err(invalid("expected a numeric literal"));
                }
            }
        }
    }
    Ok(())
}
