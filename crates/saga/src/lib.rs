//! Saga coordination for multi-service synchronization.
//!
//! A saga is an ordered list of steps, each a call to one of the
//! collaborator services (user, inventory, gameplay). Steps run one at a
//! time on a task owned by the saga. If a step fails, the steps that
//! already succeeded are compensated in reverse order, using the
//! compensation payload each step was submitted with.

pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod execution;
pub mod services;
pub mod state;
pub mod step;

pub use common::SagaId;
pub use coordinator::{CoordinatorConfig, DEFAULT_RETRY_BACKOFF, SagaCoordinator};
pub use dispatch::{Dispatcher, ServiceCall, ServiceOperation};
pub use error::{Result, SagaError};
pub use events::{SagaCompletedData, SagaEvent};
pub use execution::{Saga, SagaExecution, StepResult};
pub use services::{
    FaultInjector, GameplayOperation, GameplayService, InMemoryGameplayService,
    InMemoryInventoryService, InMemoryUserService, InventoryOperation, InventoryService,
    UserOperation, UserService,
};
pub use state::{SagaStatus, StepStatus};
pub use step::{DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT_SECS, SagaStep};
