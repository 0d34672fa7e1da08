//! A total-function boolean expression evaluator.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr       := or
//! or         := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := "!" unary | comparison
//! comparison := primary (("==" | "!=" | ">=" | "<=" | ">" | "<") primary)?
//! primary    := number | string | "true" | "false" | "null"
//!             | identifier ("." identifier)*
//!             | "(" expr ")"
//! ```
//!
//! Identifiers resolve against the caller-supplied environment only;
//! there is no way to call a function, read a file, or loop.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    Op(&'static str),
    LParen,
    RParen,
    Dot,
    Eof,
}

#[derive(Debug)]
pub struct ExprError(String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ExprError {}

fn tokenize(src: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("!="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("!"));
                    i += 1;
                }
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(">="));
                    i += 2;
                } else {
                    tokens.push(Token::Op(">"));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op("<="));
                    i += 2;
                } else {
                    tokens.push(Token::Op("<"));
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(ExprError("unterminated string literal".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| ExprError(format!("bad number '{text}'")))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "and" => Token::Op("&&"),
                    "or" => Token::Op("||"),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ExprError(format!("unexpected character '{other}'"))),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn expect_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Token::Op(o) if *o == op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_expr(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        self.parse_or(env)
    }

    fn parse_or(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        let mut left = self.parse_and(env)?;
        while self.expect_op("||") {
            let right = self.parse_and(env)?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        let mut left = self.parse_unary(env)?;
        while self.expect_op("&&") {
            let right = self.parse_unary(env)?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        if self.expect_op("!") {
            let v = self.parse_unary(env)?;
            return Ok(Value::Bool(!truthy(&v)));
        }
        self.parse_comparison(env)
    }

    fn parse_comparison(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        let left = self.parse_primary(env)?;
        for op in ["==", "!=", ">=", "<=", ">", "<"] {
            if self.expect_op(op) {
                let right = self.parse_primary(env)?;
                return Ok(Value::Bool(compare(op, &left, &right)));
            }
        }
        Ok(left)
    }

    fn parse_primary(&mut self, env: &serde_json::Map<String, Value>) -> Result<Value, ExprError> {
        match self.advance() {
            Token::Number(n) => Ok(Value::from(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::True => Ok(Value::Bool(true)),
            Token::False => Ok(Value::Bool(false)),
            Token::Null => Ok(Value::Null),
            Token::LParen => {
                let v = self.parse_expr(env)?;
                if !matches!(self.advance(), Token::RParen) {
                    return Err(ExprError("expected ')'".into()));
                }
                Ok(v)
            }
            Token::Ident(name) => {
                let mut path = vec![name];
                while matches!(self.peek(), Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Token::Ident(part) => path.push(part),
                        _ => return Err(ExprError("expected identifier after '.'".into())),
                    }
                }
                Ok(resolve_path(env, &path))
            }
            other => Err(ExprError(format!("unexpected token {other:?}"))),
        }
    }
}

fn resolve_path(env: &serde_json::Map<String, Value>, path: &[String]) -> Value {
    let mut current = env.get(&path[0]).cloned().unwrap_or(Value::Null);
    for part in &path[1..] {
        current = match &current {
            Value::Object(map) => map.get(part).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    current
}

/// JS-like truthiness: `false`, `null`, `0`, `""`, and missing values are
/// falsy; everything else is truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> bool {
    match op {
        "==" => values_equal(left, right),
        "!=" => !values_equal(left, right),
        _ => {
            let (Some(l), Some(r)) = (as_number(left), as_number(right)) else {
                return false;
            };
            match op {
                ">" => l > r,
                "<" => l < r,
                ">=" => l >= r,
                "<=" => l <= r,
                _ => unreachable!(),
            }
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

/// Parse and evaluate `expression` against `env`, returning its
/// truthiness. The only failure mode is a malformed expression.
pub fn evaluate_boolean(expression: &str, env: &serde_json::Map<String, Value>) -> Result<bool, ExprError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.parse_expr(env)?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(ExprError(format!("unexpected trailing token {:?}", parser.peek())));
    }
    Ok(truthy(&value))
}
