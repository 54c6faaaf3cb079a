//! Response body assertions
//!
//! An engine evaluates exactly one expression representation: structured
//! rules or script expressions. The case pipeline only sees the
//! [`ExpressionEvaluator`] trait.

mod rules;
mod script;

pub use rules::{BasicRuleEngine, CompiledRule, Operator, RuleEngine, RuleEvaluator};
pub use script::{evaluate as evaluate_script, ScriptError, ScriptEvaluator};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::cache::Cache;
use super::model::Expression;
use crate::common::Result;

/// Parsed JSON object an expression is evaluated against
pub type Object = Map<String, Value>;

/// Expression representation an engine is configured for
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    /// Boolean script expressions
    #[default]
    Script,
    /// Structured `{prop, operator, value}` rules
    Rules,
}

impl std::fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluatorKind::Script => write!(f, "script"),
            EvaluatorKind::Rules => write!(f, "rules"),
        }
    }
}

/// Evaluates single expressions against a parsed body
pub trait ExpressionEvaluator: Send + Sync {
    /// The representation this evaluator accepts
    fn kind(&self) -> EvaluatorKind;

    /// Evaluate one expression
    ///
    /// Returns `Err` only when the evaluator itself cannot be built for the
    /// expression. An expression that runs and fails is `Ok(false)`.
    fn check(&self, expression: &Expression, body: &Object, cache: &Cache) -> Result<bool>;
}

/// Outcome of evaluating an expression list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// First failing expression; later ones were not evaluated
    Fail { index: usize, expression: String },
}

/// Evaluate `expressions` in order, stopping at the first false one
pub fn evaluate_all(
    evaluator: &dyn ExpressionEvaluator,
    expressions: &[Expression],
    body: &Object,
    cache: &Cache,
) -> Result<Verdict> {
    for (index, expression) in expressions.iter().enumerate() {
        if !evaluator.check(expression, body, cache)? {
            return Ok(Verdict::Fail {
                index,
                expression: expression.to_string(),
            });
        }
    }
    Ok(Verdict::Pass)
}

/// Build the shipped evaluator for `kind`
pub fn for_kind(kind: EvaluatorKind) -> Box<dyn ExpressionEvaluator> {
    match kind {
        EvaluatorKind::Script => Box::new(ScriptEvaluator),
        EvaluatorKind::Rules => Box::new(RuleEvaluator::new(BasicRuleEngine)),
    }
}
