//! Scenario definition types
//!
//! Defines the data structures for (de)serializing test scenario documents.
//! The same types are used when building scenarios directly in code.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::evaluator::EvaluatorKind;

/// A single test case: one request, its expectation, and what to do with
/// the response afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// Execution order within the scenario (ascending, stable for ties)
    pub order: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub request: Request,
    pub expect: Expect,
    #[serde(default)]
    pub pipeline: Pipeline,
}

impl TestCase {
    /// Create a case with the given order, name and request, expecting
    /// `200 OK` and nothing else
    pub fn new(order: u32, name: impl Into<String>, request: Request) -> Self {
        Self {
            order,
            name: name.into(),
            description: String::new(),
            request,
            expect: Expect::status(200),
            pipeline: Pipeline::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// Outbound request template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// URL, may contain `{key.path}` placeholders
    pub url: String,
    /// HTTP method; an empty method is sent as GET
    #[serde(default)]
    pub method: String,
    /// Header values may contain placeholders
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: BTreeMap::new(),
            payload: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Method as sent on the wire
    pub fn effective_method(&self) -> String {
        match self.method.trim() {
            "" => "GET".to_string(),
            method => method.to_ascii_uppercase(),
        }
    }
}

/// Request body
///
/// Structured payloads are sent as JSON and have placeholders resolved in
/// their string leaves. Raw payloads are sent verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Structured(Map<String, Value>),
    Raw(String),
}

impl Payload {
    /// Build a structured payload from a JSON object value
    ///
    /// Non-object values are wrapped as raw JSON text.
    pub fn json(value: Value) -> Self {
        match value {
            Value::Object(map) => Payload::Structured(map),
            other => Payload::Raw(other.to_string()),
        }
    }

    pub fn raw(body: impl Into<String>) -> Self {
        Payload::Raw(body.into())
    }
}

/// Response expectation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expect {
    pub status_code: u16,
    /// Dot path of the sub-object the expressions are evaluated against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_object: Option<String>,
    #[serde(default)]
    pub evaluate: Vec<Expression>,
}

impl Expect {
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code,
            evaluation_object: None,
            evaluate: Vec::new(),
        }
    }

    pub fn with_evaluation_object(mut self, path: impl Into<String>) -> Self {
        self.evaluation_object = Some(path.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<Expression>) -> Self {
        self.evaluate.push(expression.into());
        self
    }

    /// The projection path, treating an empty string as unset
    pub fn projection(&self) -> Option<&str> {
        self.evaluation_object.as_deref().filter(|path| !path.is_empty())
    }
}

/// One assertion unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    /// Boolean expression over the top-level keys of the body
    Script(String),
    /// Structured rule handed to a rule engine
    Rule(Rule),
}

impl Expression {
    /// Which evaluator this representation belongs to
    pub fn kind(&self) -> EvaluatorKind {
        match self {
            Expression::Script(_) => EvaluatorKind::Script,
            Expression::Rule(_) => EvaluatorKind::Rules,
        }
    }
}

impl From<&str> for Expression {
    fn from(source: &str) -> Self {
        Expression::Script(source.to_string())
    }
}

impl From<String> for Expression {
    fn from(source: String) -> Self {
        Expression::Script(source)
    }
}

impl From<Rule> for Expression {
    fn from(rule: Rule) -> Self {
        Expression::Rule(rule)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Script(source) => write!(f, "{}", source),
            Expression::Rule(rule) => write!(f, "{}", rule),
        }
    }
}

/// Structured assertion rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Dot path of the subject inside the evaluated object
    pub prop: String,
    pub operator: String,
    /// Comparison value; placeholders are resolved before evaluation
    #[serde(default, deserialize_with = "scalar_to_string")]
    pub value: String,
    #[serde(default)]
    pub description: String,
}

impl Rule {
    pub fn new(prop: impl Into<String>, operator: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            operator: operator.into(),
            value: value.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.prop, self.operator, self.value)?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

/// Accept `value: 1` as well as `value: "1"` in documents
fn scalar_to_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Ok(other.to_string()),
    }
}

/// Post-processing directive for a case
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Store the raw response body in the scenario cache on success
    #[serde(default)]
    pub cache: bool,
    #[serde(default)]
    pub cache_as: String,
    #[serde(default)]
    pub on_failure: OnFailure,
}

impl Pipeline {
    /// Cache the response under `key` on success
    pub fn cache_as(key: impl Into<String>) -> Self {
        Self {
            cache: true,
            cache_as: key.into(),
            on_failure: OnFailure::default(),
        }
    }

    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }
}

/// What the scenario does after a case fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Stop the whole run
    #[default]
    Exit,
    /// Abandon the case and continue with the next one
    Fallthrough,
}

impl fmt::Display for OnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnFailure::Exit => write!(f, "exit"),
            OnFailure::Fallthrough => write!(f, "fallthrough"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_case_from_yaml() {
        let yaml = r#"
order: 2
name: Get Post
request:
  url: "http://localhost/posts/{case1.id}"
  method: GET
  headers:
    Authorization: "Bearer {auth.token}"
expect:
  status_code: 200
  evaluation_object: data
  evaluate:
    - "id === 1"
pipeline:
  cache: true
  cache_as: post
  on_failure: fallthrough
"#;
        let case: TestCase = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(case.order, 2);
        assert_eq!(case.request.headers["Authorization"], "Bearer {auth.token}");
        assert_eq!(case.expect.projection(), Some("data"));
        assert_eq!(case.expect.evaluate, vec![Expression::Script("id === 1".into())]);
        assert_eq!(case.pipeline.on_failure, OnFailure::Fallthrough);
        assert!(case.pipeline.cache);
    }

    #[test]
    fn test_rule_expression_accepts_numeric_value() {
        let expect: Expect = serde_json::from_value(json!({
            "status_code": 200,
            "evaluate": [{"prop": "userId", "operator": "eq", "value": 1}]
        }))
        .unwrap();
        match &expect.evaluate[0] {
            Expression::Rule(rule) => {
                assert_eq!(rule.value, "1");
                assert_eq!(rule.description, "");
            }
            other => panic!("expected rule, got {:?}", other),
        }
        assert_eq!(expect.evaluate[0].kind(), EvaluatorKind::Rules);
    }

    #[test]
    fn test_payload_variants() {
        let structured: Payload = serde_json::from_value(json!({"user": {"name": "{a.name}"}})).unwrap();
        assert!(matches!(structured, Payload::Structured(_)));

        let raw: Payload = serde_json::from_value(json!("name=bob")).unwrap();
        assert_eq!(raw, Payload::raw("name=bob"));

        assert_eq!(Payload::json(json!([1, 2])), Payload::raw("[1,2]"));
    }

    #[test]
    fn test_pipeline_defaults_to_exit_without_cache() {
        let pipeline: Pipeline = serde_json::from_value(json!({})).unwrap();
        assert!(!pipeline.cache);
        assert_eq!(pipeline.on_failure, OnFailure::Exit);
    }

    #[test]
    fn test_unknown_on_failure_is_rejected() {
        let result: Result<Pipeline, _> = serde_json::from_value(json!({"on_failure": "retry"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_evaluation_object_is_unset() {
        let expect = Expect::status(200).with_evaluation_object("");
        assert_eq!(expect.projection(), None);
    }
}
