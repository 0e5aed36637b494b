//! Guard expression evaluation for conditional step execution.
//!
//! Guards are simple boolean predicates over context values: equality,
//! presence, negation, and `&&`/`||` combinations. They have no side effects
//! and are advisory filters: any parse or evaluation problem is reported to
//! the runner, which treats the guard as false and skips the step.

use serde_json::Value;
use thiserror::Error;

use super::context::ContextSnapshot;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("parse error in guard '{expression}': {message}")]
    Parse {
        expression: String,
        message: String,
    },

    #[error("guard references missing context key '{0}'")]
    MissingKey(String),
}

/// Evaluate a guard expression against a context snapshot.
pub fn evaluate(expression: &str, context: &ContextSnapshot) -> Result<bool, GuardError> {
    let tokens = tokenize(expression).map_err(|message| GuardError::Parse {
        expression: expression.to_string(),
        message,
    })?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let expr = parser.parse_expr().map_err(|message| GuardError::Parse {
        expression: expression.to_string(),
        message,
    })?;
    if parser.pos != tokens.len() {
        return Err(GuardError::Parse {
            expression: expression.to_string(),
            message: format!("unexpected trailing input at token {}", parser.pos),
        });
    }
    eval_bool(&expr, context)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    True,
    False,
    Null,
    Eq,
    Ne,
    Not,
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
enum Expr {
    Var(String),
    Literal(Value),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err("single '=' is not a valid operator, use '=='".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    tokens.push(Token::Not);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err("single '&' is not a valid operator, use '&&'".to_string());
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err("single '|' is not a valid operator, use '||'".to_string());
                }
            }
            '\'' | '"' => {
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
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric()
                        || chars[i] == '_'
                        || chars[i] == '.'
                        || chars[i] == '-')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // or := and ("||" and)*
    fn parse_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // and := unary ("&&" unary)*
    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // unary := "!" unary | comparison
    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    // comparison := primary (("==" | "!=") primary)?
    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_primary()?;
        match self.peek() {
            Some(Token::Eq) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Eq(Box::new(left), Box::new(right)))
            }
            Some(Token::Ne) => {
                self.advance();
                let right = self.parse_primary()?;
                Ok(Expr::Ne(Box::new(left), Box::new(right)))
            }
            _ => Ok(left),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err("expected closing ')'".to_string()),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Var(name.clone())),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s.clone()))),
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            other => Err(format!("expected a value, found {other:?}")),
        }
    }
}

fn eval_bool(expr: &Expr, context: &ContextSnapshot) -> Result<bool, GuardError> {
    match expr {
        // A bare identifier is a presence + truthiness check.
        Expr::Var(name) => Ok(context.get(name).map(truthy).unwrap_or(false)),
        Expr::Literal(value) => Ok(truthy(value)),
        Expr::Not(inner) => Ok(!eval_bool(inner, context)?),
        Expr::And(left, right) => Ok(eval_bool(left, context)? && eval_bool(right, context)?),
        Expr::Or(left, right) => Ok(eval_bool(left, context)? || eval_bool(right, context)?),
        Expr::Eq(left, right) => {
            let l = eval_value(left, context)?;
            let r = eval_value(right, context)?;
            Ok(loosely_equal(&l, &r))
        }
        Expr::Ne(left, right) => {
            let l = eval_value(left, context)?;
            let r = eval_value(right, context)?;
            Ok(!loosely_equal(&l, &r))
        }
    }
}

fn eval_value(expr: &Expr, context: &ContextSnapshot) -> Result<Value, GuardError> {
    match expr {
        Expr::Var(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| GuardError::MissingKey(name.clone())),
        Expr::Literal(value) => Ok(value.clone()),
        other => Ok(Value::Bool(eval_bool(other, context)?)),
    }
}

/// Truthiness rules for context values used in boolean position.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Equality with coercion between strings and scalar representations, so
/// `status == 'Healthy'` and `replicas == 3` both behave as operators expect.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    comparable(left) == comparable(right)
}

fn comparable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // Normalize whole floats so a literal `3` matches a context `3`
        // regardless of integer/float representation.
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
