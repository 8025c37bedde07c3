//! Envelopes published on the `saga-events` channel.

use chrono::Utc;
use common::SagaId;
use serde::{Deserialize, Serialize};

use crate::execution::{Saga, SagaExecution};
use crate::state::SagaStatus;

/// Events emitted by the saga coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SagaEvent {
    /// A saga reached a terminal status.
    SagaCompleted(SagaCompletedData),
}

/// Data for the saga_completed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    pub saga_id: SagaId,
    pub saga_type: String,
    /// `completed` or `failed`.
    pub status: SagaStatus,
    /// Number of forward steps in the saga.
    pub steps: usize,
    /// Whole seconds since the saga was created.
    pub duration: i64,
}

impl SagaEvent {
    /// Creates a saga_completed event for a saga that reached a terminal status.
    pub fn saga_completed(saga: &Saga, execution: &SagaExecution) -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            saga_id: saga.id.clone(),
            saga_type: saga.saga_type.clone(),
            status: saga.status,
            steps: saga.steps.len(),
            duration: (Utc::now() - execution.created_at).num_seconds(),
        })
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaCompleted(_) => "saga_completed",
        }
    }
}
