//! Collaborator service traits and in-memory implementations for saga steps.

pub mod gameplay;
pub mod inventory;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

pub use gameplay::{GameplayOperation, GameplayService, InMemoryGameplayService};
pub use inventory::{InMemoryInventoryService, InventoryOperation, InventoryService};
pub use user::{InMemoryUserService, UserOperation, UserService};

#[derive(Debug, Default)]
struct FaultState {
    calls: Vec<String>,
    fail_all: bool,
    failures_remaining: u32,
    delay: Option<Duration>,
}

/// Failure and latency injection shared by the in-memory services.
///
/// Every call is recorded, including calls that fail.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    state: Arc<RwLock<FaultState>>,
}

impl FaultInjector {
    /// Makes every call fail with a transient service error.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail_all = fail;
    }

    /// Makes the next `count` calls fail with a transient service error.
    pub async fn fail_next(&self, count: u32) {
        self.state.write().await.failures_remaining = count;
    }

    /// Delays every call by `delay` before it runs.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().await.delay = delay;
    }

    /// Operations called so far, oldest first.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    /// Number of calls made to `operation`.
    pub async fn call_count(&self, operation: &str) -> usize {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    pub(crate) async fn enter(&self, service: &str, operation: &str) -> Result<()> {
        let delay = {
            let mut state = self.state.write().await;
            state.calls.push(operation.to_string());

            if state.fail_all {
                return Err(unavailable(service));
            }
            if state.failures_remaining > 0 {
                state.failures_remaining -= 1;
                return Err(unavailable(service));
            }
            state.delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

fn unavailable(service: &str) -> SagaError {
    SagaError::Service {
        service: service.to_string(),
        reason: "service unavailable".to_string(),
    }
}

pub(crate) fn str_field<'a>(service: &str, payload: &'a Value, name: &str) -> Result<&'a str> {
    payload
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SagaError::InvalidPayload {
            service: service.to_string(),
            reason: format!("missing string field '{name}'"),
        })
}

pub(crate) fn i64_field(service: &str, payload: &Value, name: &str) -> Result<i64> {
    payload
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| SagaError::InvalidPayload {
            service: service.to_string(),
            reason: format!("missing integer field '{name}'"),
        })
}
