//! Gameplay service trait and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use super::{FaultInjector, i64_field, str_field};
use crate::error::{Result, SagaError};

/// Dispatch-table name of the gameplay service.
pub const SERVICE_NAME: &str = "gameplay-service";

/// Operations the gameplay service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameplayOperation {
    UpdatePlayerStats,
    SyncAchievements,
    UpdateQuestProgress,
}

impl GameplayOperation {
    pub const ALL: [GameplayOperation; 3] = [
        GameplayOperation::UpdatePlayerStats,
        GameplayOperation::SyncAchievements,
        GameplayOperation::UpdateQuestProgress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameplayOperation::UpdatePlayerStats => "update_player_stats",
            GameplayOperation::SyncAchievements => "sync_achievements",
            GameplayOperation::UpdateQuestProgress => "update_quest_progress",
        }
    }

    pub fn parse(operation: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == operation)
    }
}

/// Trait for player progression operations.
#[async_trait]
pub trait GameplayService: Send + Sync {
    /// Merges `stats` into the player's stats.
    async fn update_player_stats(&self, payload: &Value) -> Result<Value>;

    /// Adds `achievements` to the player's unlocked set.
    async fn sync_achievements(&self, payload: &Value) -> Result<Value>;

    /// Sets `progress` (0..=100) for `quest_id`.
    async fn update_quest_progress(&self, payload: &Value) -> Result<Value>;

    /// Undoes a previous `operation` using the step's compensation payload.
    async fn compensate(&self, operation: GameplayOperation, payload: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Default)]
struct PlayerProgress {
    stats: Map<String, Value>,
    achievements: BTreeSet<String>,
    quests: HashMap<String, i64>,
}

fn invalid(reason: impl Into<String>) -> SagaError {
    SagaError::InvalidPayload {
        service: SERVICE_NAME.to_string(),
        reason: reason.into(),
    }
}

fn stats_field(payload: &Value) -> Result<Map<String, Value>> {
    payload
        .get("stats")
        .and_then(Value::as_object)
        .cloned()
        .ok_or_else(|| invalid("missing object field 'stats'"))
}

fn achievements_field(payload: &Value) -> Result<Vec<String>> {
    let list = payload
        .get("achievements")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing array field 'achievements'"))?;
    list.iter()
        .map(|a| {
            a.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid("achievements must be strings"))
        })
        .collect()
}

fn progress_field(payload: &Value) -> Result<i64> {
    let progress = i64_field(SERVICE_NAME, payload, "progress")?;
    if !(0..=100).contains(&progress) {
        return Err(invalid(format!("progress must be 0..=100, got {progress}")));
    }
    Ok(progress)
}

/// In-memory gameplay service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGameplayService {
    players: Arc<RwLock<HashMap<String, PlayerProgress>>>,
    faults: FaultInjector,
}

impl InMemoryGameplayService {
    /// Creates a new in-memory gameplay service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection and call log.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Returns a player's stats.
    pub async fn stats(&self, player_id: &str) -> Map<String, Value> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|p| p.stats.clone())
            .unwrap_or_default()
    }

    /// Returns a player's unlocked achievements in name order.
    pub async fn achievements(&self, player_id: &str) -> Vec<String> {
        self.players
            .read()
            .await
            .get(player_id)
            .map(|p| p.achievements.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a player's progress on a quest.
    pub async fn quest_progress(&self, player_id: &str, quest_id: &str) -> Option<i64> {
        self.players
            .read()
            .await
            .get(player_id)
            .and_then(|p| p.quests.get(quest_id).copied())
    }
}

#[async_trait]
impl GameplayService for InMemoryGameplayService {
    async fn update_player_stats(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, GameplayOperation::UpdatePlayerStats.as_str())
            .await?;
        let player_id = str_field(SERVICE_NAME, payload, "player_id")?;
        let stats = stats_field(payload)?;

        let mut players = self.players.write().await;
        let player = players.entry(player_id.to_string()).or_default();
        let previous = player.stats.clone();
        player.stats.extend(stats);

        Ok(json!({"player_id": player_id, "stats": player.stats, "previous": previous}))
    }

    async fn sync_achievements(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, GameplayOperation::SyncAchievements.as_str())
            .await?;
        let player_id = str_field(SERVICE_NAME, payload, "player_id")?;
        let achievements = achievements_field(payload)?;

        let mut players = self.players.write().await;
        let player = players.entry(player_id.to_string()).or_default();
        let added: Vec<String> = achievements
            .into_iter()
            .filter(|a| player.achievements.insert(a.clone()))
            .collect();

        Ok(json!({"player_id": player_id, "added": added}))
    }

    async fn update_quest_progress(&self, payload: &Value) -> Result<Value> {
        self.faults
            .enter(SERVICE_NAME, GameplayOperation::UpdateQuestProgress.as_str())
            .await?;
        let player_id = str_field(SERVICE_NAME, payload, "player_id")?;
        let quest_id = str_field(SERVICE_NAME, payload, "quest_id")?;
        let progress = progress_field(payload)?;

        let mut players = self.players.write().await;
        let player = players.entry(player_id.to_string()).or_default();
        let previous = player.quests.insert(quest_id.to_string(), progress);

        Ok(json!({
            "player_id": player_id,
            "quest_id": quest_id,
            "progress": progress,
            "previous": previous,
        }))
    }

    async fn compensate(&self, operation: GameplayOperation, payload: &Value) -> Result<Value> {
        let name = format!("compensate_{}", operation.as_str());
        self.faults.enter(SERVICE_NAME, &name).await?;
        let player_id = str_field(SERVICE_NAME, payload, "player_id")?;

        let mut players = self.players.write().await;
        let player = players.entry(player_id.to_string()).or_default();
        match operation {
            // The compensation payload carries the stats to restore.
            GameplayOperation::UpdatePlayerStats => {
                player.stats = stats_field(payload)?;
            }
            GameplayOperation::SyncAchievements => {
                for achievement in achievements_field(payload)? {
                    player.achievements.remove(&achievement);
                }
            }
            GameplayOperation::UpdateQuestProgress => {
                let quest_id = str_field(SERVICE_NAME, payload, "quest_id")?;
                player
                    .quests
                    .insert(quest_id.to_string(), progress_field(payload)?);
            }
        }

        Ok(json!({"player_id": player_id, "compensated": operation.as_str()}))
    }
}
