//! Inventory service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use super::{FaultInjector, i64_field, str_field};
use crate::error::{Result, SagaError};

/// Dispatch-table name of the inventory service.
pub const SERVICE_NAME: &str = "inventory-service";

/// Operations the inventory service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InventoryOperation {
    AddItem,
    RemoveItem,
    UpdateQuantity,
}

impl InventoryOperation {
    pub const ALL: [InventoryOperation; 3] = [
        InventoryOperation::AddItem,
        InventoryOperation::RemoveItem,
        InventoryOperation::UpdateQuantity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryOperation::AddItem => "add_item",
            InventoryOperation::RemoveItem => "remove_item",
            InventoryOperation::UpdateQuantity => "update_quantity",
        }
    }

    pub fn parse(operation: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == operation)
    }
}

/// Trait for player inventory operations.
///
/// Payloads carry `player_id`, `item_id` and `quantity`.
#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn add_item(&self, payload: &Value) -> Result<Value>;

    async fn remove_item(&self, payload: &Value) -> Result<Value>;

    async fn update_quantity(&self, payload: &Value) -> Result<Value>;

    /// Undoes a previous `operation` using the step's compensation payload.
    async fn compensate(&self, operation: InventoryOperation, payload: &Value) -> Result<Value>;
}

struct ItemRef<'a> {
    player_id: &'a str,
    item_id: &'a str,
    quantity: i64,
}

impl<'a> ItemRef<'a> {
    fn parse(payload: &'a Value) -> Result<Self> {
        let quantity = i64_field(SERVICE_NAME, payload, "quantity")?;
        if quantity < 0 {
            return Err(SagaError::InvalidPayload {
                service: SERVICE_NAME.to_string(),
                reason: format!("quantity must not be negative, got {quantity}"),
            });
        }
        Ok(Self {
            player_id: str_field(SERVICE_NAME, payload, "player_id")?,
            item_id: str_field(SERVICE_NAME, payload, "item_id")?,
            quantity,
        })
    }

    fn key(&self) -> (String, String) {
        (self.player_id.to_string(), self.item_id.to_string())
    }

    fn response(&self, quantity: i64) -> Value {
        json!({"player_id": self.player_id, "item_id": self.item_id, "quantity": quantity})
    }
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    holdings: Arc<RwLock<HashMap<(String, String), i64>>>,
    faults: FaultInjector,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection and call log.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns how many of an item a player holds.
    pub async fn quantity(&self, player_id: &str, item_id: &str) -> i64 {
        self.holdings
            .read()
            .await
            .get(&(player_id.to_string(), item_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    async fn adjust(&self, item: &ItemRef<'_>, delta: i64) -> Result<i64> {
        let mut holdings = self.holdings.write().await;
        let key = item.key();
        let current = holdings.get(&key).copied().unwrap_or(0);
        let next = current + delta;
        if next < 0 {
            return Err(SagaError::Rejected {
                service: SERVICE_NAME.to_string(),
                reason: format!(
                    "player {} holds {current} of {}, cannot remove {}",
                    item.player_id, item.item_id, -delta
                ),
            });
        }
        if next == 0 {
            holdings.remove(&key);
        } else {
            holdings.insert(key, next);
        }
        Ok(next)
    }

    async fn set(&self, item: &ItemRef<'_>) -> i64 {
        let mut holdings = self.holdings.write().await;
        let key = item.key();
        let previous = if item.quantity == 0 {
            holdings.remove(&key)
        } else {
            holdings.insert(key, item.quantity)
        };
        previous.unwrap_or(0)
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn add_item(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, InventoryOperation::AddItem.as_str())
            .await?;
        let item = ItemRef::parse(payload)?;
        let quantity = self.adjust(&item, item.quantity).await?;
        Ok(item.response(quantity))
    }

    async fn remove_item(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, InventoryOperation::RemoveItem.as_str())
            .await?;
        let item = ItemRef::parse(payload)?;
        let quantity = self.adjust(&item, -item.quantity).await?;
        Ok(item.response(quantity))
    }

    async fn update_quantity(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, InventoryOperation::UpdateQuantity.as_str())
            .await?;
        let item = ItemRef::parse(payload)?;
        let previous = self.set(&item).await;
        let mut response = item.response(item.quantity);
        response["previous"] = json!(previous);
        Ok(response)
    }

    async fn compensate(&self, operation: InventoryOperation, payload: &Value) -> Result<Value> {
        let name = format!("compensate_{}", operation.as_str());
        self.faults.enter(SERVICE_NAME, &name).await?;
        let item = ItemRef::parse(payload)?;

        let quantity = match operation {
            InventoryOperation::AddItem => {
                let held = self.quantity(item.player_id, item.item_id).await;
                self.adjust(&item, -item.quantity.min(held)).await?
            }
            InventoryOperation::RemoveItem => self.adjust(&item, item.quantity).await?,
            InventoryOperation::UpdateQuantity => {
                self.set(&item).await;
                item.quantity
            }
        };
        Ok(item.response(quantity))
    }
}
