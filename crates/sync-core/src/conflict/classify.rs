//! Category-aware conflict classification, criticality, and priority.

use crate::conflict::ConflictType;
use crate::state::{Category, StatePayload};

const BASE_PRIORITY: u8 = 5;
const MIN_PRIORITY: u8 = 1;
const MAX_PRIORITY: u8 = 10;

/// Classifies how `old` and `new` diverge for a category.
///
/// Callers only classify states that already compare unequal.
pub fn classify(category: &Category, old: &StatePayload, new: &StatePayload) -> ConflictType {
    match category {
        Category::UserInventory => {
            if !old.is_record() || !new.is_record() {
                return ConflictType::DataInconsistency;
            }
            if old.field_differs(new, "currency") || old.field_differs(new, "items") {
                ConflictType::ConcurrentModification
            } else {
                ConflictType::DataInconsistency
            }
        }
        Category::GameState => {
            if !old.is_record() || !new.is_record() {
                return ConflictType::DataInconsistency;
            }
            if old.field_differs(new, "level") {
                ConflictType::VersionConflict
            } else {
                ConflictType::ConcurrentModification
            }
        }
        Category::UserProfile => {
            if !old.is_record() || !new.is_record() {
                return ConflictType::DataInconsistency;
            }
            // Usernames never change through sync.
            if old.field_differs(new, "username") {
                ConflictType::BusinessRuleViolation
            } else {
                ConflictType::ConcurrentModification
            }
        }
        Category::GameAchievements | Category::Other(_) => ConflictType::ConcurrentModification,
    }
}

/// Returns true if a conflict must be persisted and resolved rather than
/// silently accepted as last-write-wins.
pub fn is_critical(conflict_type: ConflictType, category: &Category) -> bool {
    match conflict_type {
        ConflictType::BusinessRuleViolation
        | ConflictType::SchemaMismatch
        | ConflictType::DataInconsistency => true,
        ConflictType::VersionConflict => {
            matches!(category, Category::UserProfile | Category::GameState)
        }
        ConflictType::ConcurrentModification => {
            matches!(
                category,
                Category::UserInventory | Category::GameAchievements
            )
        }
    }
}

/// Computes the 1..=10 priority of a conflict.
pub fn priority(conflict_type: ConflictType, category: &Category) -> u8 {
    let type_bonus = match conflict_type {
        ConflictType::BusinessRuleViolation => 3,
        ConflictType::SchemaMismatch => 4,
        ConflictType::VersionConflict => 2,
        ConflictType::ConcurrentModification | ConflictType::DataInconsistency => 0,
    };
    let category_bonus = match category {
        Category::UserProfile => 2,
        Category::UserInventory | Category::GameAchievements => 1,
        Category::GameState | Category::Other(_) => 0,
    };

    (BASE_PRIORITY + type_bonus + category_bonus).clamp(MIN_PRIORITY, MAX_PRIORITY)
}

/// Coarse severity label recorded in conflict metadata.
pub fn severity(priority: u8) -> &'static str {
    match priority {
        0..=4 => "low",
        5..=7 => "medium",
        _ => "high",
    }
}
