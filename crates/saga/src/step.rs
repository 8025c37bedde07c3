//! Saga step definition and submission-time validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SagaError};

/// Step timeout applied when a step does not set one.
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Retry budget applied when a step does not set one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Prefix that turns a forward operation name into its compensation.
pub const COMPENSATE_PREFIX: &str = "compensate_";

/// One call to a collaborator service.
///
/// Immutable once the saga starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub payload: Value,
    /// Payload for the compensating call. Steps without one are not
    /// compensated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensate: Option<Value>,
    /// Zero means unset.
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Retries already consumed before submission.
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl SagaStep {
    /// Creates a step with default timeout and retry budget.
    pub fn new(service: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            payload,
            compensate: None,
            timeout_seconds: 0,
            retry_count: 0,
            max_retries: None,
        }
    }

    /// Sets the compensation payload.
    pub fn with_compensation(mut self, payload: Value) -> Self {
        self.compensate = Some(payload);
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        let seconds = match self.timeout_seconds {
            0 => DEFAULT_STEP_TIMEOUT_SECS,
            s => s,
        };
        Duration::from_secs(seconds)
    }

    /// Retries still available for this step.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .saturating_sub(self.retry_count)
    }

    /// Builds the compensating call for this step, if it has one.
    ///
    /// The compensation runs against the same service with the same timeout
    /// and is never retried.
    pub fn compensation_step(&self) -> Option<SagaStep> {
        let payload = self.compensate.clone()?;
        Some(SagaStep {
            service: self.service.clone(),
            operation: format!("{COMPENSATE_PREFIX}{}", self.operation),
            payload,
            compensate: None,
            timeout_seconds: self.timeout_seconds,
            retry_count: 0,
            max_retries: Some(0),
        })
    }
}

/// Validates submitted steps and fills in defaults.
///
/// Rejects an empty step list, any step with an empty service or
/// operation, and forward steps naming a compensation operation directly.
pub fn prepare_steps(mut steps: Vec<SagaStep>) -> Result<Vec<SagaStep>> {
    if steps.is_empty() {
        return Err(SagaError::Validation(
            "saga must have at least one step".to_string(),
        ));
    }

    for (index, step) in steps.iter_mut().enumerate() {
        if step.service.trim().is_empty() {
            return Err(SagaError::Validation(format!(
                "step {index}: service is required"
            )));
        }
        if step.operation.trim().is_empty() {
            return Err(SagaError::Validation(format!(
                "step {index}: operation is required"
            )));
        }
        if step.operation.starts_with(COMPENSATE_PREFIX) {
            return Err(SagaError::Validation(format!(
                "step {index}: {} operations only run as compensation",
                step.operation
            )));
        }

        if step.timeout_seconds == 0 {
            step.timeout_seconds = DEFAULT_STEP_TIMEOUT_SECS;
        }
        step.max_retries.get_or_insert(DEFAULT_MAX_RETRIES);
    }

    Ok(steps)
}
