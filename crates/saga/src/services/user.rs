//! User service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::{FaultInjector, str_field};
use crate::error::{Result, SagaError};

/// Dispatch-table name of the user service.
pub const SERVICE_NAME: &str = "user-service";

/// Operations the user service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserOperation {
    CreateUser,
    UpdateUser,
    DeleteUser,
}

impl UserOperation {
    pub const ALL: [UserOperation; 3] = [
        UserOperation::CreateUser,
        UserOperation::UpdateUser,
        UserOperation::DeleteUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UserOperation::CreateUser => "create_user",
            UserOperation::UpdateUser => "update_user",
            UserOperation::DeleteUser => "delete_user",
        }
    }

    pub fn parse(operation: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == operation)
    }
}

/// Trait for user account operations.
///
/// Payloads are JSON objects keyed by `user_id`.
#[async_trait]
pub trait UserService: Send + Sync {
    async fn create_user(&self, payload: &Value) -> Result<Value>;

    async fn update_user(&self, payload: &Value) -> Result<Value>;

    async fn delete_user(&self, payload: &Value) -> Result<Value>;

    /// Undoes a previous `operation` using the step's compensation payload.
    async fn compensate(&self, operation: UserOperation, payload: &Value) -> Result<Value>;
}

/// In-memory user service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserService {
    users: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
    faults: FaultInjector,
}

impl InMemoryUserService {
    /// Creates a new in-memory user service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection and call log.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns the number of users.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    /// Returns a user's record.
    pub async fn user(&self, user_id: &str) -> Option<Map<String, Value>> {
        self.users.read().await.get(user_id).cloned()
    }
}

fn user_record(payload: &Value) -> Map<String, Value> {
    payload.as_object().cloned().unwrap_or_default()
}

fn rejected(reason: String) -> SagaError {
    SagaError::Rejected {
        service: SERVICE_NAME.to_string(),
        reason,
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn create_user(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, UserOperation::CreateUser.as_str())
            .await?;
        let user_id = str_field(SERVICE_NAME, payload, "user_id")?;

        let mut users = self.users.write().await;
        if users.contains_key(user_id) {
            return Err(rejected(format!("user {user_id} already exists")));
        }
        users.insert(user_id.to_string(), user_record(payload));

        Ok(json!({"user_id": user_id}))
    }

    async fn update_user(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, UserOperation::UpdateUser.as_str())
            .await?;
        let user_id = str_field(SERVICE_NAME, payload, "user_id")?;

        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| rejected(format!("user {user_id} not found")))?;
        let previous = user.clone();
        user.extend(user_record(payload));

        Ok(json!({"user_id": user_id, "previous": previous}))
    }

    async fn delete_user(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, UserOperation::DeleteUser.as_str())
            .await?;
        let user_id = str_field(SERVICE_NAME, payload, "user_id")?;

        self.users
            .write()
            .await
            .remove(user_id)
            .ok_or_else(|| rejected(format!("user {user_id} not found")))?;

        Ok(json!({"user_id": user_id, "deleted": true}))
    }

    async fn compensate(&self, operation: UserOperation, payload: &Value) -> Result<Value> {
        let name = format!("compensate_{}", operation.as_str());
        self.faults.enter(SERVICE_NAME, &name).await?;
        let user_id = str_field(SERVICE_NAME, payload, "user_id")?;

        let mut users = self.users.write().await;
        match operation {
            UserOperation::CreateUser => {
                users.remove(user_id);
            }
            // The compensation payload is the record to restore.
            UserOperation::UpdateUser | UserOperation::DeleteUser => {
                users.insert(user_id.to_string(), user_record(payload));
            }
        }

        Ok(json!({"user_id": user_id, "compensated": operation.as_str()}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_update_delete() {
        let service = InMemoryUserService::new();

        service
            .create_user(&json!({"user_id": "u1", "name": "Ana"}))
            .await
            .unwrap();
        assert_eq!(service.user_count().await, 1);

        let updated = service
            .update_user(&json!({"user_id": "u1", "name": "Ana Maria"}))
            .await
            .unwrap();
        assert_eq!(updated["previous"]["name"], "Ana");
        assert_eq!(service.user("u1").await.unwrap()["name"], "Ana Maria");

        service.delete_user(&json!({"user_id": "u1"})).await.unwrap();
        assert_eq!(service.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let service = InMemoryUserService::new();
        service.create_user(&json!({"user_id": "u1"})).await.unwrap();

        let result = service.create_user(&json!({"user_id": "u1"})).await;
        assert!(matches!(result, Err(SagaError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_missing_user_id() {
        let service = InMemoryUserService::new();
        let result = service.create_user(&json!({"name": "nobody"})).await;
        assert!(matches!(result, Err(SagaError::InvalidPayload { .. })));
    }

    #[tokio::test]
    async fn test_compensations() {
        let service = InMemoryUserService::new();
        service
            .create_user(&json!({"user_id": "u1", "name": "Ana"}))
            .await
            .unwrap();
        service
            .update_user(&json!({"user_id": "u1", "name": "Bea"}))
            .await
            .unwrap();

        service
            .compensate(
                UserOperation::UpdateUser,
                &json!({"user_id": "u1", "name": "Ana"}),
            )
            .await
            .unwrap();
        assert_eq!(service.user("u1").await.unwrap()["name"], "Ana");

        service
            .compensate(UserOperation::CreateUser, &json!({"user_id": "u1"}))
            .await
            .unwrap();
        assert!(service.user("u1").await.is_none());
        assert_eq!(
            service.faults().calls().await,
            vec![
                "create_user",
                "update_user",
                "compensate_update_user",
                "compensate_create_user"
            ]
        );
    }

    #[test]
    fn test_parse_operations() {
        assert_eq!(
            UserOperation::parse("delete_user"),
            Some(UserOperation::DeleteUser)
        );
        assert_eq!(UserOperation::parse("add_item"), None);
    }
}
