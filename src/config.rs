// Scoring tunables. Stored as the singleton scoring_config row (seeded in
// init, replaced by update_scoring_config); these are the seed values.

use crate::error::{ApiError, ApiResult};
use crate::ScoringConfig;

/// Primary key of the singleton row
pub const SCORING_CONFIG_ID: u32 = 1;

/// Highest level any game can reach
pub const MAX_LEVEL_CAP: u8 = 10;

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            id: SCORING_CONFIG_ID,
            stages_per_level: 50,
            level_up_accuracy: 77,
            max_level: MAX_LEVEL_CAP,
            usage_target_secs: 2 * 60 * 60,
            games_target: 13,
            streak_target_days: 30,
            leaderboard_size: 5,
            weekly_leaderboard_size: 10,
            enforce_level_gate: true,
        }
    }
}

impl ScoringConfig {
    /// Reject values that would divide by zero or break the level range
    pub fn validate(&self) -> ApiResult<()> {
        if self.max_level == 0 || self.max_level > MAX_LEVEL_CAP {
            return Err(ApiError::bad_request(format!(
                "max_level must be within 1..={}",
                MAX_LEVEL_CAP
            )));
        }
        if self.level_up_accuracy > 100 {
            return Err(ApiError::bad_request("level_up_accuracy is a percentage (0-100)"));
        }
        if self.usage_target_secs == 0 || self.games_target == 0 || self.streak_target_days == 0 {
            return Err(ApiError::bad_request("score targets must be positive"));
        }
        if self.leaderboard_size == 0 || self.weekly_leaderboard_size == 0 {
            return Err(ApiError::bad_request("leaderboard sizes must be positive"));
        }
        Ok(())
    }
}
