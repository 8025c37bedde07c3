use serde::{Deserialize, Serialize};

/// The kind of state a (key, category) pair holds.
///
/// Categories drive conflict classification, criticality, and priority.
/// Unknown categories are carried through as [`Category::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    UserInventory,
    GameState,
    UserProfile,
    GameAchievements,
    Other(String),
}

impl Category {
    /// Returns the category name as stored and published.
    pub fn as_str(&self) -> &str {
        match self {
            Category::UserInventory => "user_inventory",
            Category::GameState => "game_state",
            Category::UserProfile => "user_profile",
            Category::GameAchievements => "game_achievements",
            Category::Other(name) => name,
        }
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        match name {
            "user_inventory" => Category::UserInventory,
            "game_state" => Category::GameState,
            "user_profile" => Category::UserProfile,
            "game_achievements" => Category::GameAchievements,
            other => Category::Other(other.to_string()),
        }
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Category::from(name.as_str())
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
