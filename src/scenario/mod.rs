//! HTTP test scenario engine
//!
//! A [`Scenario`] is an ordered list of [`TestCase`]s. Each case sends one
//! request, checks the status code and optionally the response body, and
//! may cache the body so later cases can reference it through `{key.path}`
//! placeholders.

pub mod cache;
pub mod document;
pub mod engine;
pub mod evaluator;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod result;
pub mod runner;
pub mod template;
pub mod transport;

pub use cache::Cache;
pub use document::Format;
pub use engine::Engine;
pub use evaluator::{EvaluatorKind, ExpressionEvaluator};
pub use model::{Expect, Expression, OnFailure, Payload, Pipeline, Request, Rule, TestCase};
pub use result::TestResult;
pub use runner::{RunOutcome, Scenario};
pub use transport::{Dispatched, HttpTransport, OutboundRequest, ResponseBody, Timing, Transport};
