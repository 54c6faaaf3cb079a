//! Test result records
//!
//! A result is flat on purpose: one row per case, every field a scalar, so
//! results can be dumped as JSON lines or loaded into a table as-is.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::model::TestCase;
use super::transport::Timing;

/// Outcome of one executed case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Unix time in nanoseconds when the case started
    pub timestamp: i64,
    pub scenario_name: String,
    pub test_case_order: u32,
    pub test_case_name: String,
    pub request_method: String,
    pub request_url: String,
    pub response_code: u16,
    pub response_size: u64,
    pub timing_dns: f64,
    pub timing_handshake: f64,
    pub timing_connected: f64,
    pub timing_first_byte: f64,
    pub timing_total: f64,
    pub success: bool,
    pub expected_code: u16,
    pub message: String,
}

impl TestResult {
    /// Start a result for `case`, not yet successful
    pub fn begin(scenario_name: &str, case: &TestCase) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();

        Self {
            timestamp,
            scenario_name: scenario_name.to_string(),
            test_case_order: case.order,
            test_case_name: case.name.clone(),
            request_method: case.request.method.clone(),
            request_url: case.request.url.clone(),
            response_code: 0,
            response_size: 0,
            timing_dns: 0.0,
            timing_handshake: 0.0,
            timing_connected: 0.0,
            timing_first_byte: 0.0,
            timing_total: 0.0,
            success: false,
            expected_code: case.expect.status_code,
            message: String::new(),
        }
    }

    pub fn record_timing(&mut self, timing: &Timing) {
        self.timing_dns = timing.dns_ms;
        self.timing_handshake = timing.tls_handshake_ms;
        self.timing_connected = timing.connect_ms;
        self.timing_first_byte = timing.first_byte_ms;
        self.timing_total = timing.total_ms;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.message = message.into();
    }

    pub fn succeed(&mut self, message: impl Into<String>) {
        self.success = true;
        self.message = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::model::{Expect, Request};

    #[test]
    fn test_begin_copies_case_fields() {
        let case = TestCase::new(3, "Create", Request::post("http://x/items"))
            .with_expect(Expect::status(201));
        let result = TestResult::begin("Smoke", &case);
        assert_eq!(result.scenario_name, "Smoke");
        assert_eq!(result.test_case_order, 3);
        assert_eq!(result.test_case_name, "Create");
        assert_eq!(result.request_method, "POST");
        assert_eq!(result.expected_code, 201);
        assert!(!result.success);
        assert!(result.timestamp > 0);
    }

    #[test]
    fn test_record_timing() {
        let case = TestCase::new(1, "c", Request::get("http://x/"));
        let mut result = TestResult::begin("s", &case);
        result.record_timing(&Timing {
            dns_ms: 1.0,
            connect_ms: 2.0,
            tls_handshake_ms: 3.0,
            first_byte_ms: 4.0,
            total_ms: 5.0,
        });
        assert_eq!(
            (
                result.timing_dns,
                result.timing_connected,
                result.timing_handshake,
                result.timing_first_byte,
                result.timing_total
            ),
            (1.0, 2.0, 3.0, 4.0, 5.0)
        );
    }

    #[test]
    fn test_serializes_flat() {
        let case = TestCase::new(1, "c", Request::get("http://x/"));
        let value = serde_json::to_value(TestResult::begin("s", &case)).unwrap();
        assert!(value.as_object().unwrap().values().all(|v| !v.is_object() && !v.is_array()));
        assert_eq!(value["expected_code"], 200);
    }
}
