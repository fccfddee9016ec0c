//! Condition expression evaluation.
//!
//! Tasks may carry a small boolean expression deciding whether they run,
//! e.g. `platform.is_linux && env.CI == "true"`. The grammar is
//! deliberately tiny: literals, dotted identifiers, comparisons, boolean
//! operators, parentheses. Expressions are parsed at pre-flight; evaluation
//! is total and never fails at runtime, with unresolved identifiers
//! evaluating to the empty string.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// A value produced during evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    /// Truthiness: `false`, `0`, and the empty string are falsy.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Context supplying identifier values during evaluation.
///
/// Implementations must be total: unknown paths yield `Value::Str("")`.
pub trait ConditionContext {
    fn lookup(&self, path: &[String]) -> Value;
}

/// Comparison and boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(Vec<String>),
    Not(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate against a context. Total: never errors.
    pub fn eval(&self, ctx: &dyn ConditionContext) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Ident(path) => ctx.lookup(path),
            Expr::Not(inner) => Value::Bool(!inner.eval(ctx).truthy()),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::And => Value::Bool(lhs.eval(ctx).truthy() && rhs.eval(ctx).truthy()),
                BinOp::Or => Value::Bool(lhs.eval(ctx).truthy() || rhs.eval(ctx).truthy()),
                _ => Value::Bool(compare(*op, &lhs.eval(ctx), &rhs.eval(ctx))),
            },
        }
    }

    /// Evaluate to a boolean via truthiness.
    pub fn eval_bool(&self, ctx: &dyn ConditionContext) -> bool {
        self.eval(ctx).truthy()
    }
}

fn compare(op: BinOp, lhs: &Value, rhs: &Value) -> bool {
    // Numeric comparison when both sides coerce to numbers, string
    // comparison otherwise. Booleans compare by truthiness for equality
    // and by their string form for ordering.
    match op {
        BinOp::Eq | BinOp::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Bool(a), b) | (b, Value::Bool(a)) => *a == b.truthy(),
                _ => match (lhs.as_number(), rhs.as_number()) {
                    (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
                    _ => lhs.to_string() == rhs.to_string(),
                },
            };
            if op == BinOp::Eq { equal } else { !equal }
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(lhs.to_string().cmp(&rhs.to_string())),
            };
            match (op, ordering) {
                (BinOp::Lt, Some(std::cmp::Ordering::Less)) => true,
                (BinOp::Le, Some(o)) => o != std::cmp::Ordering::Greater,
                (BinOp::Gt, Some(std::cmp::Ordering::Greater)) => true,
                (BinOp::Ge, Some(o)) => o != std::cmp::Ordering::Less,
                _ => false,
            }
        }
        BinOp::And | BinOp::Or => unreachable!("handled in eval"),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Num(f64),
    Str(String),
    True,
    False,
    Dot,
    LParen,
    RParen,
    Bang,
    AndAnd,
    OrOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '&' => {
                chars.next();
                if chars.next() == Some('&') {
                    tokens.push(Token::AndAnd);
                } else {
                    return Err("expected '&&'".to_string());
                }
            }
            '|' => {
                chars.next();
                if chars.next() == Some('|') {
                    tokens.push(Token::OrOr);
                } else {
                    return Err("expected '||'".to_string());
                }
            }
            '=' => {
                chars.next();
                if chars.next() == Some('=') {
                    tokens.push(Token::Eq);
                } else {
                    return Err("expected '=='".to_string());
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        // A digit followed by '.' then a non-digit is a
                        // number adjoining a field access; stop before it.
                        if ch == '.' {
                            let mut ahead = chars.clone();
                            ahead.next();
                            if !ahead.peek().is_some_and(char::is_ascii_digit) {
                                break;
                            }
                        }
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = num
                    .parse()
                    .map_err(|_| format!("invalid number literal '{num}'"))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" => tokens.push(Token::True),
                    "false" => tokens.push(Token::False),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // or := and ('||' and)*
    fn parse_or(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // and := cmp ('&&' cmp)*
    fn parse_and(&mut self) -> std::result::Result<Expr, String> {
        let mut lhs = self.parse_cmp()?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // cmp := unary (op unary)?
    fn parse_cmp(&mut self) -> std::result::Result<Expr, String> {
        let lhs = self.parse_unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_unary()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    // unary := '!' unary | primary
    fn parse_unary(&mut self) -> std::result::Result<Expr, String> {
        if self.eat(&Token::Bang) {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> std::result::Result<Expr, String> {
        match self.next() {
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Num(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while self.eat(&Token::Dot) {
                    match self.next() {
                        Some(Token::Ident(part)) => path.push(part),
                        _ => return Err("expected identifier after '.'".to_string()),
                    }
                }
                Ok(Expr::Ident(path))
            }
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err("expected ')'".to_string())
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse a condition expression.
///
/// # Errors
///
/// Returns [`Error::Condition`] on any lexical or syntactic problem; a
/// parsed expression can always be evaluated.
pub fn parse(input: &str) -> Result<Expr> {
    let fail = |message: String| Error::Condition {
        expr: input.to_string(),
        message,
    };

    let tokens = lex(input).map_err(fail)?;
    if tokens.is_empty() {
        return Err(fail("empty expression".to_string()));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or().map_err(fail)?;
    if parser.pos != parser.tokens.len() {
        return Err(fail(format!(
            "trailing tokens after expression (at token {})",
            parser.pos
        )));
    }
    Ok(expr)
}

/// Context backed by the host system: platform flags, process environment,
/// and lazily probed toolchain versions.
#[derive(Default)]
pub struct SystemContext {
    toolchain_versions: Mutex<HashMap<String, String>>,
}

impl SystemContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First line of `<tool> --version`, cached per tool, empty on failure.
    fn toolchain_version(&self, tool: &str) -> String {
        let mut cache = match self.toolchain_versions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(version) = cache.get(tool) {
            return version.clone();
        }

        let version = std::process::Command::new(tool)
            .arg("--version")
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| {
                String::from_utf8(out.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
            })
            .unwrap_or_default();

        cache.insert(tool.to_string(), version.clone());
        version
    }
}

impl ConditionContext for SystemContext {
    fn lookup(&self, path: &[String]) -> Value {
        match path {
            [root, field] if root == "platform" => Value::Bool(match field.as_str() {
                "is_linux" => cfg!(target_os = "linux"),
                "is_macos" => cfg!(target_os = "macos"),
                "is_windows" => cfg!(windows),
                "is_unix" => cfg!(unix),
                _ => false,
            }),
            [root, name] if root == "env" => {
                Value::Str(std::env::var(name).unwrap_or_default())
            }
            [root, tool, field] if root == "toolchain" && field == "version" => {
                Value::Str(self.toolchain_version(tool))
            }
            _ => Value::Str(String::new()),
        }
    }
}
