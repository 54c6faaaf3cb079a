//! Structured rule evaluation
//!
//! [`RuleEvaluator`] interpolates the rule value, asks a [`RuleEngine`] to
//! compile the rule and runs it against the body. Operator semantics live
//! entirely in the engine.

use std::str::FromStr;

use regex::Regex;
use serde_json::Value;

use super::{EvaluatorKind, ExpressionEvaluator, Object};
use crate::common::{Error, Result};
use crate::scenario::cache::{self, Cache};
use crate::scenario::model::{Expression, Rule};
use crate::scenario::template;

/// Builds executable rules from `(prop, operator, value, description)`
pub trait RuleEngine: Send + Sync {
    fn compile(
        &self,
        prop: &str,
        operator: &str,
        value: &str,
        description: &str,
    ) -> Result<Box<dyn CompiledRule>>;
}

/// A rule ready to be checked against an object
pub trait CompiledRule: Send + Sync {
    fn evaluate(&self, object: &Object) -> bool;
}

/// Evaluator for [`Expression::Rule`]
#[derive(Debug, Default)]
pub struct RuleEvaluator<E = BasicRuleEngine> {
    engine: E,
}

impl<E: RuleEngine> RuleEvaluator<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }
}

impl<E: RuleEngine> ExpressionEvaluator for RuleEvaluator<E> {
    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Rules
    }

    fn check(&self, expression: &Expression, body: &Object, cache: &Cache) -> Result<bool> {
        let rule: &Rule = match expression {
            Expression::Rule(rule) => rule,
            Expression::Script(source) => {
                return Err(Error::evaluator(format!(
                    "script expression '{}' given to the rule evaluator",
                    source
                )))
            }
        };

        let value = template::resolve(&rule.value, cache);
        let compiled = self
            .engine
            .compile(&rule.prop, &rule.operator, &value, &rule.description)?;
        Ok(compiled.evaluate(body))
    }
}

/// Comparison operators understood by [`BasicRuleEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Exists,
    NotExists,
    Matches,
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" | "==" | "===" => Operator::Eq,
            "ne" | "!=" | "!==" => Operator::Ne,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "exists" => Operator::Exists,
            "not_exists" => Operator::NotExists,
            "matches" => Operator::Matches,
            other => {
                return Err(Error::evaluator(format!("unknown operator '{}'", other)));
            }
        };
        Ok(op)
    }
}

/// Default rule engine
///
/// The rule value is read as JSON when it parses (`1`, `true`, `null`),
/// otherwise as a plain string.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicRuleEngine;

impl RuleEngine for BasicRuleEngine {
    fn compile(
        &self,
        prop: &str,
        operator: &str,
        value: &str,
        _description: &str,
    ) -> Result<Box<dyn CompiledRule>> {
        let operator: Operator = operator.parse()?;
        let pattern = match operator {
            Operator::Matches => Some(
                Regex::new(value)
                    .map_err(|e| Error::evaluator(format!("invalid pattern '{}': {}", value, e)))?,
            ),
            _ => None,
        };

        Ok(Box::new(BasicRule {
            path: cache::split_path(prop).into_iter().map(str::to_string).collect(),
            operator,
            raw: value.to_string(),
            expected: serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string())),
            pattern,
        }))
    }
}

struct BasicRule {
    path: Vec<String>,
    operator: Operator,
    raw: String,
    expected: Value,
    pattern: Option<Regex>,
}

impl CompiledRule for BasicRule {
    fn evaluate(&self, object: &Object) -> bool {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        let Some((first, rest)) = path.split_first() else {
            return false;
        };
        let actual = object
            .get(*first)
            .and_then(|root| cache::value_at(root, rest));

        match (self.operator, actual) {
            (Operator::Exists, found) => found.is_some(),
            (Operator::NotExists, found) => found.is_none(),
            (_, None) => false,
            (Operator::Eq, Some(actual)) => self.equals(actual),
            (Operator::Ne, Some(actual)) => !self.equals(actual),
            (Operator::Gt, Some(actual)) => self.compare(actual).is_some_and(|o| o.is_gt()),
            (Operator::Gte, Some(actual)) => self.compare(actual).is_some_and(|o| o.is_ge()),
            (Operator::Lt, Some(actual)) => self.compare(actual).is_some_and(|o| o.is_lt()),
            (Operator::Lte, Some(actual)) => self.compare(actual).is_some_and(|o| o.is_le()),
            (Operator::Contains, Some(actual)) => self.contains(actual),
            (Operator::NotContains, Some(actual)) => !self.contains(actual),
            (Operator::Matches, Some(actual)) => match (&self.pattern, cache::coerce_to_string(actual)) {
                (Some(pattern), Some(text)) => pattern.is_match(&text),
                _ => false,
            },
        }
    }
}

impl BasicRule {
    fn equals(&self, actual: &Value) -> bool {
        match actual {
            Value::String(s) => *s == self.raw || *actual == self.expected,
            Value::Number(n) => self.expected.as_f64().is_some_and(|e| n.as_f64() == Some(e)),
            other => *other == self.expected,
        }
    }

    fn compare(&self, actual: &Value) -> Option<std::cmp::Ordering> {
        match (actual, &self.expected) {
            (Value::String(a), Value::String(e)) => Some(a.as_str().cmp(e.as_str())),
            (a, e) => a.as_f64()?.partial_cmp(&e.as_f64()?),
        }
    }

    fn contains(&self, actual: &Value) -> bool {
        match actual {
            Value::String(s) => s.contains(self.raw.as_str()),
            Value::Array(items) => items
                .iter()
                .any(|item| item == &self.expected || item.as_str() == Some(self.raw.as_str())),
            Value::Object(map) => map.contains_key(&self.raw),
            _ => false,
        }
    }
}
