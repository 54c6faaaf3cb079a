//! Transport and evaluator bundle used to run scenarios

use super::evaluator::{self, ExpressionEvaluator};
use super::transport::{HttpTransport, Transport};
use crate::common::config::Config;
use crate::common::Result;

/// Collaborators a scenario run needs
pub struct Engine {
    transport: Box<dyn Transport>,
    evaluator: Box<dyn ExpressionEvaluator>,
}

impl Engine {
    pub fn new(
        transport: impl Transport + 'static,
        evaluator: impl ExpressionEvaluator + 'static,
    ) -> Self {
        Self::from_parts(Box::new(transport), Box::new(evaluator))
    }

    pub fn from_parts(
        transport: Box<dyn Transport>,
        evaluator: Box<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            transport,
            evaluator,
        }
    }

    /// Build the HTTP transport and the configured evaluator
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::from_config(&config.http)?;
        Ok(Self::from_parts(
            Box::new(transport),
            evaluator::for_kind(config.engine.evaluator),
        ))
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("evaluator", &self.evaluator.kind())
            .finish_non_exhaustive()
    }
}
