//! Script expression evaluation
//!
//! A small expression language over the top-level keys of a response body:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := cmp ( ( "==" | "===" | "!=" | "!==" ) cmp )*
//! cmp     := unary ( ( "<" | "<=" | ">" | ">=" ) unary )*
//! unary   := ( "!" | "-" ) unary | postfix
//! postfix := primary ( "." ident | "[" expr "]" )*
//! primary := number | string | true | false | null | ident | "(" expr ")"
//! ```
//!
//! `&&` and `||` return one of their operands, and `.length` reads the size
//! of an array or string. Only a final `true` counts as a passing assertion.

use serde_json::{Number, Value};
use thiserror::Error;

use super::{EvaluatorKind, ExpressionEvaluator, Object};
use crate::common::{Error, Result};
use crate::scenario::cache::Cache;
use crate::scenario::model::Expression;
use crate::scenario::template;

/// Why a script could not produce a value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("{0} is not defined")]
    Undefined(String),

    #[error("cannot read property '{0}' of null")]
    NullAccess(String),

    #[error("cannot negate {0}")]
    BadNegation(String),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("expression has more than {0} tokens")]
    TooLong(usize),
}

/// Nesting limit for parentheses, brackets and unary operators
const MAX_DEPTH: usize = 128;

/// Token limit; also bounds the length of `&&`/`||` chains
const MAX_TOKENS: usize = 4096;

/// Evaluator for [`Expression::Script`]
///
/// Placeholders in the script text are resolved against the cache before
/// parsing. Every failure counts as `false`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptEvaluator;

impl ExpressionEvaluator for ScriptEvaluator {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Script
    }

    fn check(&self, expression: &Expression, body: &Object, cache: &Cache) -> Result<bool> {
        let source = match expression {
            Expression::Script(source) => template::resolve(source, cache),
            Expression::Rule(rule) => {
                return Err(Error::evaluator(format!(
                    "rule '{}' given to the script evaluator",
                    rule
                )))
            }
        };

        match evaluate(&source, body) {
            Ok(Value::Bool(result)) => Ok(result),
            Ok(other) => {
                tracing::debug!(script = %source, result = %other, "Script result is not a boolean");
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(script = %source, error = %e, "Script evaluation failed");
                Ok(false)
            }
        }
    }
}

/// Evaluate `source` with every key of `body` bound as a variable
pub fn evaluate(source: &str, body: &Object) -> std::result::Result<Value, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(ScriptError::UnexpectedToken(token.describe()));
    }
    eval(&expr, body)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    Minus,
    And,
    Or,
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("'{}'", s),
            Token::Ident(name) => name.clone(),
            other => format!("{:?}", other),
        }
    }
}

fn tokenize(source: &str) -> std::result::Result<Vec<Token>, ScriptError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if tokens.len() >= MAX_TOKENS {
            return Err(ScriptError::TooLong(MAX_TOKENS));
        }
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // `1.length` is not a number, stop before a trailing dot
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ScriptError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(n));
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(ScriptError::UnterminatedString);
                    };
                    i += 1;
                    match ch {
                        ch if ch == quote => break,
                        '\\' => {
                            let escaped = chars.get(i).copied().ok_or(ScriptError::UnterminatedString)?;
                            i += 1;
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        ch => text.push(ch),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' | '!' if next == Some('=') => {
                let strict = chars.get(i + 2) == Some(&'=');
                tokens.push(match (c, strict) {
                    ('=', true) => Token::StrictEq,
                    ('=', false) => Token::Eq,
                    (_, true) => Token::StrictNe,
                    (_, false) => Token::Ne,
                });
                i += if strict { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let inclusive = next == Some('=');
                tokens.push(match (c, inclusive) {
                    ('<', false) => Token::Lt,
                    ('<', true) => Token::Le,
                    (_, false) => Token::Gt,
                    (_, true) => Token::Ge,
                });
                i += if inclusive { 2 } else { 1 };
            }
            other => return Err(ScriptError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Eq,
    StrictEq,
    Ne,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Variable(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

type ParseResult = std::result::Result<Expr, ScriptError>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
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

    fn expect(&mut self, expected: &Token) -> std::result::Result<(), ScriptError> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(ScriptError::UnexpectedToken(token.describe())),
            None => Err(ScriptError::UnexpectedEnd),
        }
    }

    fn expression(&mut self) -> ParseResult {
        self.or()
    }

    /// Run `parse` one nesting level down
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult) -> ParseResult {
        if self.depth >= MAX_DEPTH {
            return Err(ScriptError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> ParseResult {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> ParseResult {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            left = Expr::And(Box::new(left), Box::new(self.equality()?));
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::StrictEq) => BinaryOp::StrictEq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::StrictNe) => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.comparison()?));
        }
    }

    fn comparison(&mut self) -> ParseResult {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            left = Expr::Binary(op, Box::new(left), Box::new(self.unary()?));
        }
    }

    fn unary(&mut self) -> ParseResult {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> ParseResult {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    Some(token) => return Err(ScriptError::UnexpectedToken(token.describe())),
                    None => return Err(ScriptError::UnexpectedEnd),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.nested(Self::expression)?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ParseResult {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Variable(name),
            }),
            Some(Token::LParen) => {
                let inner = self.nested(Self::expression)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(ScriptError::UnexpectedToken(token.describe())),
            None => Err(ScriptError::UnexpectedEnd),
        }
    }
}

fn eval(expr: &Expr, scope: &Object) -> std::result::Result<Value, ScriptError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::Undefined(name.clone())),
        Expr::Member(target, name) => {
            let target = eval(target, scope)?;
            member(&target, name)
        }
        Expr::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => Ok(array_index(n)
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or(Value::Null)),
                (_, Value::String(key)) => member(&target, key),
                (Value::Null, other) => Err(ScriptError::NullAccess(other.to_string())),
                _ => Ok(Value::Null),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::Neg(inner) => match eval(inner, scope)? {
            Value::Number(n) => Ok(number(-n.as_f64().unwrap_or(f64::NAN))),
            other => Err(ScriptError::BadNegation(other.to_string())),
        },
        Expr::And(left, right) => {
            let left = eval(left, scope)?;
            if truthy(&left) {
                eval(right, scope)
            } else {
                Ok(left)
            }
        }
        Expr::Or(left, right) => {
            let left = eval(left, scope)?;
            if truthy(&left) {
                Ok(left)
            } else {
                eval(right, scope)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            Ok(Value::Bool(binary(*op, &left, &right)))
        }
    }
}

fn member(target: &Value, name: &str) -> std::result::Result<Value, ScriptError> {
    match target {
        Value::Null => Err(ScriptError::NullAccess(name.to_string())),
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        _ => Ok(Value::Null),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::StrictEq => strict_equals(left, right),
        BinaryOp::StrictNe => !strict_equals(left, right),
        BinaryOp::Eq => loose_equals(left, right),
        BinaryOp::Ne => !loose_equals(left, right),
        BinaryOp::Lt => compare(left, right).is_some_and(|o| o.is_lt()),
        BinaryOp::Le => compare(left, right).is_some_and(|o| o.is_le()),
        BinaryOp::Gt => compare(left, right).is_some_and(|o| o.is_gt()),
        BinaryOp::Ge => compare(left, right).is_some_and(|o| o.is_ge()),
    }
}

fn strict_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (a, b) => a == b,
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            to_number(left) == to_number(right)
        }
        (Value::Bool(_), _) | (_, Value::Bool(_)) if left.is_number() || right.is_number() => {
            to_number(left) == to_number(right)
        }
        _ => strict_equals(left, right),
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => to_number(left)?.partial_cmp(&to_number(right)?),
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Whole numbers become JSON integers
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn array_index(n: &Number) -> Option<usize> {
    match n.as_u64() {
        Some(i) => usize::try_from(i).ok(),
        None => n
            .as_f64()
            .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= usize::MAX as f64)
            .map(|f| f as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Object {
        value.as_object().cloned().unwrap()
    }

    fn is_true(source: &str, body: &Object) -> bool {
        matches!(evaluate(source, body), Ok(Value::Bool(true)))
    }

    #[test]
    fn test_simple_comparisons() {
        let cases = [
            (json!({"name": "Mr. Brother"}), r#"name === "Mr. Brother""#, true),
            (json!({"age": 10}), "age >= 10", true),
            (json!({"name": "John", "age": 10}), r#"name === "John" && age >= 10"#, true),
            (json!({"person": {"name": "John", "age": 10}}), r#"person.name === "John" && person.age >= 10"#, true),
            (json!({"idToken": "abc"}), "idToken != ''", true),
            (json!({"idToken": ""}), "idToken != ''", false),
            (json!({"userId": 1, "id": 2}), "userId && userId === 1", true),
            (json!({"userId": 1, "id": 2}), "id && id === 3", false),
        ];
        for (body, source, want) in cases {
            assert_eq!(is_true(source, &object(body)), want, "{}", source);
        }
    }

    #[test]
    fn test_logical_operators_return_operands() {
        let body = object(json!({"a": 0, "b": "x"}));
        assert_eq!(evaluate("a && b", &body), Ok(json!(0)));
        assert_eq!(evaluate("a || b", &body), Ok(json!("x")));
        assert!(!is_true("a || b", &body));
        assert!(is_true("!a", &body));
    }

    #[test]
    fn test_arrays_and_length() {
        let body = object(json!({"data": [{"id": 5}, {"id": 6}], "title": "abc"}));
        assert!(is_true("data.length === 2", &body));
        assert!(is_true("data[1].id === 6", &body));
        assert!(is_true("data[9] === null", &body));
        assert!(is_true("title.length == 3", &body));
        assert!(is_true(r#"data[0]["id"] > 4"#, &body));
    }

    #[test]
    fn test_integer_literals_index_arrays() {
        let body = object(json!({"data": [{"id": 5}, {"id": 6}], "idx": 1.0}));
        assert_eq!(evaluate("data[1]", &body), Ok(json!({"id": 6})));
        assert_eq!(evaluate("data[0].id", &body), Ok(json!(5)));
        assert_eq!(evaluate("data[idx].id", &body), Ok(json!(6)));
        assert_eq!(evaluate("data[0.5]", &body), Ok(Value::Null));
        assert_eq!(evaluate("data[-1]", &body), Ok(Value::Null));
        assert_eq!(evaluate("2", &body), Ok(json!(2)));
        assert_eq!(evaluate("-2", &body), Ok(json!(-2)));
        assert_eq!(evaluate("1.5", &body), Ok(json!(1.5)));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let body = object(json!({"id": 1}));
        let parens = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert_eq!(evaluate(&parens, &body), Err(ScriptError::TooDeep(MAX_DEPTH)));
        let nots = format!("{}true", "!".repeat(1000));
        assert_eq!(evaluate(&nots, &body), Err(ScriptError::TooDeep(MAX_DEPTH)));
        let brackets = format!("id{}", "[0".repeat(200));
        assert_eq!(evaluate(&brackets, &body), Err(ScriptError::TooDeep(MAX_DEPTH)));
        let shallow = format!("{}id === 1{}", "(".repeat(50), ")".repeat(50));
        assert_eq!(evaluate(&shallow, &body), Ok(Value::Bool(true)));

        let chain = vec!["id"; 10_000].join(" && ");
        assert_eq!(evaluate(&chain, &body), Err(ScriptError::TooLong(MAX_TOKENS)));
    }

    #[test]
    fn test_hostile_input_checks_false() {
        let body = object(json!({"id": 1}));
        let cache = Cache::new();
        for source in ["(".repeat(100_000), "!".repeat(100_000), "-".repeat(100_000)] {
            let expression = Expression::Script(source);
            assert!(!ScriptEvaluator.check(&expression, &body, &cache).unwrap());
        }
    }

    #[test]
    fn test_loose_and_strict_equality() {
        let body = object(json!({"id": 1, "code": "1"}));
        assert!(is_true("id == code", &body));
        assert!(!is_true("id === code", &body));
        assert!(is_true("id !== code", &body));
        assert!(is_true("-id < 0", &body));
        assert!(is_true("(id === 1) && !(code === 2)", &body));
    }

    #[test]
    fn test_failures_are_errors_not_panics() {
        let body = object(json!({"id": 1, "nothing": null}));
        assert_eq!(
            evaluate("missing === 1", &body),
            Err(ScriptError::Undefined("missing".to_string()))
        );
        assert_eq!(evaluate("id ===", &body), Err(ScriptError::UnexpectedEnd));
        assert!(matches!(evaluate("id @ 1", &body), Err(ScriptError::UnexpectedChar('@', 3))));
        assert_eq!(evaluate("'open", &body), Err(ScriptError::UnterminatedString));
        assert!(matches!(evaluate("nothing.field", &body), Err(ScriptError::NullAccess(_))));
        assert!(matches!(evaluate("id id", &body), Err(ScriptError::UnexpectedToken(_))));
    }

    #[test]
    fn test_evaluator_degrades_failures_to_false() {
        let body = object(json!({"id": 1}));
        let cache = Cache::new();
        let check = |source: &str| {
            ScriptEvaluator
                .check(&Expression::Script(source.to_string()), &body, &cache)
                .unwrap()
        };
        assert!(check("id === 1"));
        assert!(!check("id"));
        assert!(!check("undefinedVar"));
        assert!(!check("((("));
    }

    #[test]
    fn test_placeholders_resolved_before_parsing() {
        let mut cache = Cache::new();
        cache.insert("list", br#"{"data": [{"id": "apt-9"}]}"#.to_vec());
        let body = object(json!({"id": "apt-9"}));
        let expression = Expression::Script("id === '{list.data.[0].id}'".to_string());
        assert!(ScriptEvaluator.check(&expression, &body, &cache).unwrap());
    }
}
