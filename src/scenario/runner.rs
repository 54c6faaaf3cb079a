//! Scenario controller
//!
//! A scenario owns its cases, kept sorted by `order`, and the response
//! cache shared between them. Cases run strictly one after another.

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::cache::Cache;
use super::engine::Engine;
use super::model::{OnFailure, TestCase};
use super::pipeline::{execute_case, CaseContext};
use super::progress::Progress;
use super::result::TestResult;

/// An ordered list of test cases plus the cache they share
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ScenarioDocument")]
pub struct Scenario {
    id: String,
    name: String,
    description: String,
    environment: String,
    cases: Vec<TestCase>,
    #[serde(skip)]
    cache: Cache,
}

/// Wire shape of a scenario; cases may appear in any order
#[derive(Deserialize)]
struct ScenarioDocument {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    environment: String,
    #[serde(default)]
    cases: Vec<TestCase>,
}

impl From<ScenarioDocument> for Scenario {
    fn from(doc: ScenarioDocument) -> Self {
        let mut scenario = Scenario {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            environment: doc.environment,
            cases: doc.cases,
            cache: Cache::new(),
        };
        scenario.sort_cases();
        scenario
    }
}

/// What a scenario run produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    /// One result per executed case, in execution order
    pub results: Vec<TestResult>,
    /// Set when a failing case with `on_failure: exit` stopped the run
    pub aborted: Option<String>,
}

impl RunOutcome {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    /// True when every executed case passed and the run was not cut short
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.failed() == 0
    }
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.add_case(case);
        self
    }

    /// Add a case, keeping cases sorted by `order`
    ///
    /// Cases with equal `order` keep their insertion order.
    pub fn add_case(&mut self, case: TestCase) {
        self.cases.push(case);
        self.sort_cases();
    }

    fn sort_cases(&mut self) {
        self.cases.sort_by_key(|case| case.order);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Cases in execution order
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Mutable cache access, e.g. to seed values before a run
    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    /// Drop every cached response
    pub fn reset_cache(&mut self) {
        self.cache.clear();
    }

    /// Run every case in order, writing progress lines to `sink`
    ///
    /// Never fails: case errors end up in the results. The cache is kept
    /// after the run, so a second run sees the first run's responses
    /// unless [`Scenario::reset_cache`] is called in between.
    pub async fn run(&mut self, engine: &Engine, sink: &mut dyn Write) -> RunOutcome {
        let mut progress = Progress::new(sink);
        progress.line(format_args!(
            "Start running test scenario: name={} env={} desc={} cases={}",
            self.name,
            self.environment,
            self.description,
            self.cases.len()
        ));
        info!(
            scenario = %self.name,
            cases = self.cases.len(),
            evaluator = %engine.evaluator().kind(),
            "Running scenario"
        );

        let mut outcome = RunOutcome::default();

        for (index, case) in self.cases.iter().enumerate() {
            let ctx = CaseContext {
                scenario_name: &self.name,
                position: index + 1,
            };
            let report = execute_case(case, ctx, &mut self.cache, engine, &mut progress).await;
            outcome.results.push(report.result);

            let Some(failure) = report.failure else {
                continue;
            };
            if case.pipeline.on_failure == OnFailure::Exit {
                let reason = format!(
                    "Test case {} ({}) failed: {}",
                    index + 1,
                    case.name,
                    failure.error
                );
                warn!(scenario = %self.name, remaining = self.cases.len() - index - 1, "{}", reason);
                outcome.aborted = Some(reason);
                return outcome;
            }
        }

        info!(
            scenario = %self.name,
            passed = outcome.passed(),
            failed = outcome.failed(),
            "Scenario finished"
        );
        outcome
    }
}
