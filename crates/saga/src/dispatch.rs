//! Fixed dispatch table from (service, operation) to collaborator calls.

use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::services::{
    GameplayOperation, GameplayService, InventoryOperation, InventoryService, UserOperation,
    UserService, gameplay, inventory, user,
};
use crate::step::{COMPENSATE_PREFIX, SagaStep};

/// A whitelisted service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOperation {
    User(UserOperation),
    Inventory(InventoryOperation),
    Gameplay(GameplayOperation),
}

/// A parsed step call: the operation and whether it is its compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceCall {
    pub operation: ServiceOperation,
    pub compensation: bool,
}

impl ServiceCall {
    /// Looks a (service, operation) pair up in the dispatch table.
    ///
    /// `compensate_<op>` is accepted for every whitelisted `<op>`.
    pub fn parse(service: &str, operation: &str) -> Result<Self> {
        let (name, compensation) = match operation.strip_prefix(COMPENSATE_PREFIX) {
            Some(forward) => (forward, true),
            None => (operation, false),
        };

        let unknown_operation = || SagaError::UnknownOperation {
            service: service.to_string(),
            operation: operation.to_string(),
        };

        let operation = match service {
            user::SERVICE_NAME => {
                ServiceOperation::User(UserOperation::parse(name).ok_or_else(unknown_operation)?)
            }
            inventory::SERVICE_NAME => ServiceOperation::Inventory(
                InventoryOperation::parse(name).ok_or_else(unknown_operation)?,
            ),
            gameplay::SERVICE_NAME => ServiceOperation::Gameplay(
                GameplayOperation::parse(name).ok_or_else(unknown_operation)?,
            ),
            other => return Err(SagaError::UnknownService(other.to_string())),
        };

        Ok(Self {
            operation,
            compensation,
        })
    }
}

/// Routes saga steps to the collaborator services.
pub struct Dispatcher<U, I, G>
where
    U: UserService,
    I: InventoryService,
    G: GameplayService,
{
    users: U,
    inventory: I,
    gameplay: G,
}

impl<U, I, G> Dispatcher<U, I, G>
where
    U: UserService,
    I: InventoryService,
    G: GameplayService,
{
    pub fn new(users: U, inventory: I, gameplay: G) -> Self {
        Self {
            users,
            inventory,
            gameplay,
        }
    }

    /// Runs one step against its service.
    ///
    /// Steps outside the table fail with `UnknownService` or
    /// `UnknownOperation` without calling anything.
    pub async fn dispatch(&self, step: &SagaStep) -> Result<Value> {
        let call = ServiceCall::parse(&step.service, &step.operation)?;
        let payload = &step.payload;

        match (call.operation, call.compensation) {
            (ServiceOperation::User(op), true) => self.users.compensate(op, payload).await,
            (ServiceOperation::User(op), false) => match op {
                UserOperation::CreateUser => self.users.create_user(payload).await,
                UserOperation::UpdateUser => self.users.update_user(payload).await,
                UserOperation::DeleteUser => self.users.delete_user(payload).await,
            },
            (ServiceOperation::Inventory(op), true) => {
                self.inventory.compensate(op, payload).await
            }
            (ServiceOperation::Inventory(op), false) => match op {
                InventoryOperation::AddItem => self.inventory.add_item(payload).await,
                InventoryOperation::RemoveItem => self.inventory.remove_item(payload).await,
                InventoryOperation::UpdateQuantity => {
                    self.inventory.update_quantity(payload).await
                }
            },
            (ServiceOperation::Gameplay(op), true) => self.gameplay.compensate(op, payload).await,
            (ServiceOperation::Gameplay(op), false) => match op {
                GameplayOperation::UpdatePlayerStats => {
                    self.gameplay.update_player_stats(payload).await
                }
                GameplayOperation::SyncAchievements => {
                    self.gameplay.sync_achievements(payload).await
                }
                GameplayOperation::UpdateQuestProgress => {
                    self.gameplay.update_quest_progress(payload).await
                }
            },
        }
    }
}
