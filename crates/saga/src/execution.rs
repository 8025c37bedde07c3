//! Saga and execution models, and their storage rows.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use state_store::{ExecutionRecord, SagaRecord};

use crate::error::{Result, SagaError};
use crate::state::{SagaStatus, StepStatus};
use crate::step::SagaStep;

/// A submitted saga.
///
/// Mutated only by the task executing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: SagaId,
    pub saga_type: String,
    pub status: SagaStatus,
    pub steps: Vec<SagaStep>,
    /// Index of the step being executed; -1 before the first step.
    pub current_step: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Saga {
    pub(crate) fn new(saga_type: String, steps: Vec<SagaStep>) -> Self {
        let now = Utc::now();
        Self {
            id: SagaId::new(),
            saga_type,
            status: SagaStatus::Pending,
            steps,
            current_step: -1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_record(&self) -> Result<SagaRecord> {
        Ok(SagaRecord {
            id: self.id.clone(),
            saga_type: self.saga_type.clone(),
            status: self.status.as_str().to_string(),
            steps: serde_json::to_value(&self.steps)?,
            current_step: self.current_step,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<SagaRecord> for Saga {
    type Error = SagaError;

    fn try_from(record: SagaRecord) -> Result<Self> {
        Ok(Saga {
            status: record.status.parse()?,
            steps: serde_json::from_value(record.steps)?,
            id: record.id,
            saga_type: record.saga_type,
            current_step: record.current_step,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Outcome of one forward step or one compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Index of the forward step, also for compensations.
    pub step_index: usize,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of tries made, including the first.
    pub attempts: u32,
}

impl StepResult {
    pub(crate) fn from_outcome(
        step_index: usize,
        outcome: Result<Value>,
        duration_ms: u64,
        attempts: u32,
    ) -> Self {
        let (status, result, error) = match outcome {
            Ok(value) => (StepStatus::Succeeded, Some(value), None),
            Err(e) => (StepStatus::Failed, None, Some(e.to_string())),
        };
        Self {
            step_index,
            status,
            result,
            error,
            executed_at: Utc::now(),
            duration_ms,
            attempts,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

/// Durable mirror of a saga's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaExecution {
    pub saga_id: SagaId,
    pub status: SagaStatus,
    pub current_step: i32,
    /// Forward results keyed by step index.
    pub step_results: BTreeMap<usize, StepResult>,
    /// Compensation results in execution order (highest step index first).
    pub compensation_results: Vec<StepResult>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaExecution {
    pub(crate) fn for_saga(saga: &Saga) -> Self {
        Self {
            saga_id: saga.id.clone(),
            status: saga.status,
            current_step: saga.current_step,
            step_results: BTreeMap::new(),
            compensation_results: Vec::new(),
            metadata: Map::new(),
            created_at: saga.created_at,
            updated_at: saga.updated_at,
        }
    }

    /// Returns true if the saga ended because it was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.metadata.get("cancelled") == Some(&Value::Bool(true))
    }

    pub fn to_record(&self) -> Result<ExecutionRecord> {
        Ok(ExecutionRecord {
            saga_id: self.saga_id.clone(),
            status: self.status.as_str().to_string(),
            current_step: self.current_step,
            step_results: serde_json::to_value(&self.step_results)?,
            compensation_results: serde_json::to_value(&self.compensation_results)?,
            metadata: Value::Object(self.metadata.clone()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl TryFrom<ExecutionRecord> for SagaExecution {
    type Error = SagaError;

    fn try_from(record: ExecutionRecord) -> Result<Self> {
        let metadata = match record.metadata {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => {
                return Err(SagaError::InvalidRecord(format!(
                    "execution {} metadata is not an object: {other}",
                    record.saga_id
                )));
            }
        };
        let compensation_results = match record.compensation_results {
            Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };

        Ok(SagaExecution {
            status: record.status.parse()?,
            step_results: serde_json::from_value(record.step_results)?,
            compensation_results,
            saga_id: record.saga_id,
            current_step: record.current_step,
            metadata,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
