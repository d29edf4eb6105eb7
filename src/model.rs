// Records persisted as JSON blobs in the key-value store.
// Field names are camelCase on the wire so exported backups stay readable
// by the web client.

use serde::{Deserialize, Serialize};
use spacetimedb::SpacetimeType;

use crate::error::{ApiError, ApiResult};

// ==================== SCORE SNAPSHOT ====================

/// One per user per calendar day. Counters are running totals; a save for
/// the same day replaces the previous snapshot entirely.
#[derive(SpacetimeType, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub user_id: String,

    /// YYYY-MM-DD (UTC), the partition key
    pub date: String,

    pub literacy_correct: u32,
    pub literacy_total: u32,
    pub numeracy_correct: u32,
    pub numeracy_total: u32,

    /// Seconds played, cumulative for the day
    pub time_spent: u32,

    /// Client-reported aggregate, stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_score: Option<u32>,
}

impl ScoreSnapshot {
    /// Zeroed snapshot returned when nothing was saved for the day
    pub fn empty(user_id: &str, date: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: date.to_string(),
            literacy_correct: 0,
            literacy_total: 0,
            numeracy_correct: 0,
            numeracy_total: 0,
            time_spent: 0,
            total_score: None,
        }
    }

    pub fn total_correct(&self) -> u64 {
        self.literacy_correct as u64 + self.numeracy_correct as u64
    }

    pub fn total_questions(&self) -> u64 {
        self.literacy_total as u64 + self.numeracy_total as u64
    }
}

// ==================== ACTIVITY RECORD ====================

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Literacy,
    Numeracy,
}

impl ActivityType {
    pub fn parse(value: &str) -> ApiResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "literacy" => Ok(ActivityType::Literacy),
            "numeracy" => Ok(ActivityType::Numeracy),
            other => Err(ApiError::bad_request(format!(
                "type must be literacy or numeracy, got '{}'",
                other
            ))),
        }
    }
}

/// One completed game activity. Append-only: never rewritten once stored.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub user_id: String,
    pub activity_id: String,
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub correct: u32,
    pub total: u32,
    /// Seconds
    pub duration: u32,
    /// ISO-8601 timestamp of the write
    pub date: String,
    pub accuracy: f64,
}

/// Percentage of correct answers, 0 when nothing was answered
pub fn accuracy_percent(correct: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        correct as f64 * 100.0 / total as f64
    }
}

// ==================== USER PROFILE ====================

#[derive(SpacetimeType, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    /// ISO-8601
    pub last_active: String,
    /// ISO-8601
    pub created_at: String,
}

impl UserProfile {
    /// Name shown on leaderboards; falls back to the email's local part
    pub fn display_name(&self) -> String {
        if !self.name.trim().is_empty() {
            return self.name.clone();
        }
        match self.email.split('@').next() {
            Some(local) if !local.is_empty() => local.to_string(),
            _ => "Student".to_string(),
        }
    }
}

// ==================== PROGRESSION STATE ====================

/// Per-user, per-game mastery tier
#[derive(SpacetimeType, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    /// 1-10
    pub level: u8,
    /// Stages completed at the current level (resets on level-up)
    pub stages_completed: u32,
    /// Questions answered correctly at the current level
    pub correct: u32,
    /// Questions answered at the current level
    pub total: u32,
    /// Levels the student can pick, sorted ascending
    pub unlocked_levels: Vec<u8>,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            level: 1,
            stages_completed: 0,
            correct: 0,
            total: 0,
            unlocked_levels: vec![1],
        }
    }
}

/// Stored wrapper so a prefix scan can recover the game id without parsing keys
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredProgression {
    pub user_id: String,
    pub game_id: String,
    #[serde(flatten)]
    pub state: ProgressionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_wire_format() {
        let snapshot = ScoreSnapshot {
            literacy_correct: 4,
            literacy_total: 10,
            ..ScoreSnapshot::empty("u1", "2026-10-14")
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["literacyCorrect"], 4);
        assert_eq!(json["date"], "2026-10-14");
        assert!(json.get("totalScore").is_none());
    }

    #[test]
    fn test_activity_type_parse() {
        assert_eq!(ActivityType::parse("Literacy").unwrap(), ActivityType::Literacy);
        assert_eq!(ActivityType::parse(" numeracy ").unwrap(), ActivityType::Numeracy);
        assert!(matches!(ActivityType::parse("science"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_accuracy_percent() {
        assert_eq!(accuracy_percent(0, 0), 0.0);
        assert_eq!(accuracy_percent(80, 100), 80.0);
        assert_eq!(accuracy_percent(1, 3), 100.0 / 3.0);
    }

    #[test]
    fn test_stored_progression_is_flat() {
        let stored = StoredProgression {
            user_id: "u1".to_string(),
            game_id: "word-builder".to_string(),
            state: ProgressionState::default(),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["gameId"], "word-builder");
        assert_eq!(json["level"], 1);
        assert_eq!(json["unlockedLevels"], serde_json::json!([1]));

        let back: StoredProgression = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_display_name_fallback() {
        let mut profile = UserProfile {
            user_id: "u1".to_string(),
            email: "maya@example.org".to_string(),
            name: String::new(),
            is_premium: false,
            subscription_id: None,
            subscription_status: None,
            last_active: String::new(),
            created_at: String::new(),
        };
        assert_eq!(profile.display_name(), "maya");
        profile.name = "Maya K".to_string();
        assert_eq!(profile.display_name(), "Maya K");
    }
}
