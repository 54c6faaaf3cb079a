//! Single test case execution
//!
//! A case moves through fixed stages and stops at the first failing one.
//! Whatever happens, exactly one [`TestResult`] comes out; errors never
//! leave this module.

use std::fmt;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::cache::{self, Cache};
use super::engine::Engine;
use super::evaluator::{self, Object, Verdict};
use super::model::{Payload, Request, TestCase};
use super::progress::Progress;
use super::result::TestResult;
use super::template;
use super::transport::{millis, OutboundRequest};
use crate::common::{Error, Result};

/// Pipeline stage a case failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Dispatch,
    AssertStatus,
    ReadBody,
    AssertBody,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Build => "build",
            Stage::Dispatch => "dispatch",
            Stage::AssertStatus => "assert-status",
            Stage::ReadBody => "read-body",
            Stage::AssertBody => "assert-body",
        };
        f.write_str(name)
    }
}

/// Why a case did not succeed
#[derive(Debug)]
pub struct CaseFailure {
    pub stage: Stage,
    pub error: Error,
}

impl CaseFailure {
    fn at(stage: Stage, error: Error) -> Self {
        Self { stage, error }
    }
}

/// Result of one case plus the failure that ended it, if any
#[derive(Debug)]
pub struct CaseReport {
    pub result: TestResult,
    pub failure: Option<CaseFailure>,
}

impl CaseReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Where a case sits in the run, for result records and progress lines
#[derive(Debug, Clone, Copy)]
pub struct CaseContext<'a> {
    pub scenario_name: &'a str,
    /// 1-based position in execution order
    pub position: usize,
}

/// Run one case to completion
///
/// On success the raw body is cached under `cache_as` when the case asks
/// for it. The cache is left untouched on failure.
pub async fn execute_case(
    case: &TestCase,
    ctx: CaseContext<'_>,
    cache: &mut Cache,
    engine: &Engine,
    progress: &mut Progress<'_>,
) -> CaseReport {
    let n = ctx.position;
    progress.line(format_args!(
        "{}. Test case: name={} desc={} onfail={}",
        n, case.name, case.description, case.pipeline.on_failure
    ));

    let mut result = TestResult::begin(ctx.scenario_name, case);

    match run_stages(case, n, cache, engine, progress, &mut result).await {
        Ok(body) => {
            if case.pipeline.cache {
                debug!(key = %case.pipeline.cache_as, bytes = body.len(), "Caching response body");
                cache.insert(case.pipeline.cache_as.clone(), body);
            }
            let message = format!("{}. Success", n);
            progress.line(&message);
            info!(case = %case.name, order = case.order, "Test case passed");
            result.succeed(message);
            CaseReport {
                result,
                failure: None,
            }
        }
        Err(failure) => {
            let message = format!("{}. {}", n, failure.error);
            progress.line(&message);
            warn!(
                case = %case.name,
                order = case.order,
                stage = %failure.stage,
                kind = failure.error.kind(),
                "Test case failed"
            );
            result.fail(message);
            CaseReport {
                result,
                failure: Some(failure),
            }
        }
    }
}

/// Build through AssertBody; returns the raw body for caching
async fn run_stages(
    case: &TestCase,
    n: usize,
    cache: &Cache,
    engine: &Engine,
    progress: &mut Progress<'_>,
    result: &mut TestResult,
) -> std::result::Result<Vec<u8>, CaseFailure> {
    // Build
    let request =
        build_request(&case.request, cache).map_err(|e| CaseFailure::at(Stage::Build, e))?;
    result.request_method = request.method.clone();
    result.request_url = request.url.clone();
    debug!(method = %request.method, url = %request.url, "Request built");
    progress.line(format_args!("{}. Request: {} {}", n, request.method, request.url));

    // Dispatch
    let start = Instant::now();
    let dispatched = match engine.transport().send(&request).await {
        Ok(dispatched) => dispatched,
        Err(e) => {
            result.timing_total = millis(start.elapsed());
            return Err(CaseFailure::at(Stage::Dispatch, e));
        }
    };
    let mut timing = dispatched.timing;
    result.response_code = dispatched.status;
    result.response_size = dispatched.content_length.unwrap_or_default();
    result.record_timing(&timing);
    debug!(status = dispatched.status, first_byte_ms = timing.first_byte_ms, "Response received");

    // AssertStatus
    if dispatched.status != case.expect.status_code {
        return Err(CaseFailure::at(
            Stage::AssertStatus,
            Error::status_mismatch(case.expect.status_code, dispatched.status),
        ));
    }

    // ReadBody
    let drained = dispatched.body.read_all().await;
    timing.total_ms = millis(start.elapsed());
    result.record_timing(&timing);
    let body = drained.map_err(|e| CaseFailure::at(Stage::ReadBody, e))?;
    if dispatched.content_length.is_none() {
        result.response_size = body.len() as u64;
    }
    debug!(bytes = body.len(), total_ms = timing.total_ms, "Response body read");
    progress.line(format_args!(
        "{}. Got response body: {}",
        n,
        String::from_utf8_lossy(&body)
    ));

    // AssertBody: the body must parse even with nothing to evaluate
    let object = parse_body(&body, case.expect.projection())
        .map_err(|e| CaseFailure::at(Stage::AssertBody, e))?;
    let verdict = evaluator::evaluate_all(engine.evaluator(), &case.expect.evaluate, &object, cache)
        .map_err(|e| CaseFailure::at(Stage::AssertBody, e))?;
    match verdict {
        Verdict::Pass => Ok(body),
        Verdict::Fail { index, expression } => Err(CaseFailure::at(
            Stage::AssertBody,
            Error::Expectation(format!(
                "Expression {} evaluated to false: {}",
                index + 1,
                expression
            )),
        )),
    }
}

/// Interpolate a request template and check it can be sent
pub fn build_request(request: &Request, cache: &Cache) -> Result<OutboundRequest> {
    let method = request.effective_method();
    let missing = template::unresolved(&request.url, cache);
    if !missing.is_empty() {
        debug!(tokens = ?missing, "URL placeholders resolve to empty strings");
    }
    let url = template::resolve(&request.url, cache);
    let mut headers = template::resolve_headers(&request.headers, cache);

    let body = match &request.payload {
        None => None,
        Some(Payload::Raw(raw)) => Some(raw.clone().into_bytes()),
        Some(Payload::Structured(map)) => {
            let resolved = template::resolve_payload(map, cache);
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            Some(serde_json::to_vec(&resolved).map_err(|e| Error::build(e.to_string()))?)
        }
    };

    let outbound = OutboundRequest {
        method,
        url,
        headers,
        body,
    };
    outbound.validate()?;
    Ok(outbound)
}

/// Parse a response body and select the object expressions run against
fn parse_body(body: &[u8], projection: Option<&str>) -> Result<Object> {
    let root: Value = serde_json::from_slice(body).map_err(|e| Error::Parse(e.to_string()))?;

    let target = match projection {
        Some(path) => cache::value_at(&root, &cache::split_path(path)).ok_or_else(|| {
            Error::Parse(format!("evaluation object '{}' not found in response body", path))
        })?,
        None => &root,
    };

    match target {
        Value::Object(map) => Ok(map.clone()),
        other => Err(Error::Parse(format!(
            "expected a JSON object, got {}",
            json_type(other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache_with(key: &str, body: Value) -> Cache {
        let mut cache = Cache::new();
        cache.insert(key, serde_json::to_vec(&body).unwrap());
        cache
    }

    #[test]
    fn test_build_interpolates_all_parts() {
        let cache = cache_with("login", json!({"token": "abc", "user": {"id": 7}}));
        let request = Request::post("http://api/users/{login.user.id}/posts")
            .with_header("Authorization", "Bearer {login.token}")
            .with_payload(Payload::json(json!({"owner": "{login.user.id}", "tags": ["{login.token}"]})));

        let built = build_request(&request, &cache).unwrap();
        assert_eq!(built.url, "http://api/users/7/posts");
        assert_eq!(built.headers["Authorization"], "Bearer abc");
        assert_eq!(built.headers["Content-Type"], "application/json");

        let sent: Value = serde_json::from_slice(built.body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, json!({"owner": "7", "tags": ["{login.token}"]}));
    }

    #[test]
    fn test_build_keeps_explicit_content_type_and_raw_body() {
        let request = Request::post("http://api/upload")
            .with_header("content-type", "text/plain")
            .with_payload(Payload::raw("hello {x.y}"));
        let built = build_request(&request, &Cache::new()).unwrap();
        assert_eq!(built.headers.len(), 1);
        assert_eq!(built.body.as_deref(), Some(&b"hello {x.y}"[..]));
    }

    #[test]
    fn test_build_defaults_method() {
        let built = build_request(&Request::new("", "http://api/"), &Cache::new()).unwrap();
        assert_eq!(built.method, "GET");
        let built = build_request(&Request::new("patch", "http://api/"), &Cache::new()).unwrap();
        assert_eq!(built.method, "PATCH");
    }

    #[test]
    fn test_build_rejects_unresolvable_url() {
        let err = build_request(&Request::get("{missing.host}/users"), &Cache::new()).unwrap_err();
        assert_eq!(err.kind(), "BuildError");
    }

    #[test]
    fn test_parse_body_projection() {
        let body = br#"{"data": {"items": [{"id": 1}]}, "ok": true}"#;
        let object = parse_body(body, Some("data.items.[0]")).unwrap();
        assert_eq!(object["id"], 1);

        let err = parse_body(body, Some("data.missing")).unwrap_err();
        assert_eq!(err.kind(), "ParseError");
        let err = parse_body(body, Some("data.items")).unwrap_err();
        assert!(err.to_string().contains("an array"));
        assert_eq!(parse_body(b"not json", None).unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::AssertStatus.to_string(), "assert-status");
    }
}
