//! Per-game progression: level, stages at level, accuracy at level, and the
//! level-up gate (enough stages at enough accuracy).

use std::cmp::Ordering;

use spacetimedb::SpacetimeType;

use crate::error::{ApiError, ApiResult};
use crate::identity::{short_id, validate_user_id, Caller};
use crate::model::{ProgressionState, StoredProgression};
use crate::store::{get_json, keys, put_json, scan_json, KeyValueStore, ReadStore};
use crate::ScoringConfig;

// ==================== LEVEL RULES ====================

impl ProgressionState {
    /// round(correct / total * 100), 0 before any question at this level
    pub fn accuracy_at_level(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.correct as f64 * 100.0 / self.total as f64).round() as u32
    }

    /// Stage count and raw (unrounded) accuracy both meet the gate
    pub fn is_eligible(&self, config: &ScoringConfig) -> bool {
        self.total > 0
            && self.stages_completed >= config.stages_per_level
            && self.correct as u64 * 100 >= config.level_up_accuracy as u64 * self.total as u64
    }

    /// Add one finished stage. Advances (and resets the level counters) when
    /// the gate is met below the max level. Returns whether it leveled up.
    pub fn record_stage(&mut self, correct: u32, total: u32, config: &ScoringConfig) -> bool {
        self.stages_completed = self.stages_completed.saturating_add(1);
        self.correct = self.correct.saturating_add(correct);
        self.total = self.total.saturating_add(total);

        if self.level >= config.max_level || !self.is_eligible(config) {
            return false;
        }

        self.level += 1;
        self.stages_completed = 0;
        self.correct = 0;
        self.total = 0;
        if !self.unlocked_levels.contains(&self.level) {
            self.unlocked_levels.push(self.level);
            self.unlocked_levels.sort_unstable();
        }
        true
    }
}

/// Rules every stored state satisfies, whoever writes it
pub fn check_shape(next: &ProgressionState, config: &ScoringConfig) -> ApiResult<()> {
    if next.level == 0 || next.level > config.max_level {
        return Err(ApiError::bad_request(format!(
            "level {} outside 1..={}",
            next.level, config.max_level
        )));
    }
    if next.correct > next.total {
        return Err(ApiError::bad_request("correct cannot exceed total"));
    }
    if !next.unlocked_levels.contains(&next.level) {
        return Err(ApiError::bad_request("unlockedLevels must contain the current level"));
    }
    if next.unlocked_levels.iter().any(|l| *l == 0 || *l > next.level) {
        return Err(ApiError::bad_request("unlockedLevels cannot exceed the current level"));
    }
    Ok(())
}

/// Validate a client-submitted state against what is stored.
/// Levels only move up, one at a time, and only out of an eligible state
/// with the counters reset. Within a level, counters only grow by what one
/// finished stage can add.
pub fn check_transition(
    prev: &ProgressionState,
    next: &ProgressionState,
    config: &ScoringConfig,
) -> ApiResult<()> {
    check_shape(next, config)?;
    if let Some(lost) = prev.unlocked_levels.iter().find(|l| !next.unlocked_levels.contains(l)) {
        return Err(ApiError::bad_request(format!("unlocked level {} cannot be removed", lost)));
    }

    match next.level.cmp(&prev.level) {
        Ordering::Less => Err(ApiError::bad_request(format!(
            "level cannot go down from {} to {}",
            prev.level, next.level
        ))),
        Ordering::Equal => check_progress(prev, next),
        Ordering::Greater if next.level == prev.level + 1 => {
            if !prev.is_eligible(config) {
                return Err(ApiError::bad_request(format!(
                    "level {} not earned: {} stages at {}% (needs {} at {}%)",
                    next.level,
                    prev.stages_completed,
                    prev.accuracy_at_level(),
                    config.stages_per_level,
                    config.level_up_accuracy
                )));
            }
            if next.stages_completed != 0 || next.correct != 0 || next.total != 0 {
                return Err(ApiError::bad_request("level counters must reset on level-up"));
            }
            Ok(())
        }
        Ordering::Greater => Err(ApiError::bad_request(format!(
            "cannot skip from level {} to {}",
            prev.level, next.level
        ))),
    }
}

/// Same-level save: counters never shrink, at most one new stage per save,
/// and new answers only arrive with that stage
fn check_progress(prev: &ProgressionState, next: &ProgressionState) -> ApiResult<()> {
    if next.stages_completed < prev.stages_completed || next.correct < prev.correct || next.total < prev.total {
        return Err(ApiError::bad_request("level counters cannot go down"));
    }
    let stages = next.stages_completed - prev.stages_completed;
    let answered = next.total - prev.total;
    let correct = next.correct - prev.correct;

    if stages > 1 {
        return Err(ApiError::bad_request(format!(
            "one stage per save, got {} new stages",
            stages
        )));
    }
    if stages == 0 && answered > 0 {
        return Err(ApiError::bad_request("answers must come with a finished stage"));
    }
    if correct > answered {
        return Err(ApiError::bad_request(format!(
            "{} new correct answers for {} new questions",
            correct, answered
        )));
    }
    Ok(())
}

// ==================== OPERATIONS ====================

/// Stored state, or the level-1 default when the game was never played
pub fn get_progression<S>(store: &S, user_id: &str, game_id: &str) -> ApiResult<ProgressionState>
where
    S: ReadStore + ?Sized,
{
    let key = keys::progression(user_id, game_id);
    match get_json::<StoredProgression, _>(store, &key)? {
        Some(record) if record.user_id == user_id && record.game_id == game_id => Ok(record.state),
        Some(record) => Err(ApiError::upstream(
            format!("{} holds another record", key),
            format!("user:{} game:{}", short_id(&record.user_id), record.game_id),
        )),
        None => Ok(ProgressionState::default()),
    }
}

/// Overwrite the stored state with the submitted one. Every save must be
/// well-formed; with the level gate enabled, non-admin submissions must
/// also be a legal transition.
pub fn save_progression<S>(
    store: &S,
    caller: &Caller,
    config: &ScoringConfig,
    user_id: &str,
    game_id: &str,
    state: ProgressionState,
) -> ApiResult<()>
where
    S: KeyValueStore + ?Sized,
{
    require_ids(user_id, game_id)?;
    caller.require_owner_or_admin(user_id)?;
    check_shape(&state, config)?;

    if config.enforce_level_gate && !caller.is_admin() {
        let prev = get_progression(store, user_id, game_id)?;
        check_transition(&prev, &state, config)?;
    }

    log::info!(
        "[PROGRESSION] save user:{} game:{} level:{} stages:{} accuracy:{}%",
        short_id(user_id),
        game_id,
        state.level,
        state.stages_completed,
        state.accuracy_at_level()
    );

    let record = StoredProgression {
        user_id: user_id.to_string(),
        game_id: game_id.to_string(),
        state,
    };
    put_json(store, &keys::progression(user_id, game_id), &record)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub state: ProgressionState,
    pub leveled_up: bool,
}

/// Server-authoritative progress: apply one finished stage for the caller
pub fn record_stage<S>(
    store: &S,
    caller: &Caller,
    config: &ScoringConfig,
    game_id: &str,
    correct: u32,
    total: u32,
) -> ApiResult<StageOutcome>
where
    S: KeyValueStore + ?Sized,
{
    require_ids(&caller.user_id, game_id)?;
    if correct > total {
        return Err(ApiError::bad_request("correct cannot exceed total"));
    }

    let mut state = get_progression(store, &caller.user_id, game_id)?;
    let leveled_up = state.record_stage(correct, total, config);

    if leveled_up {
        log::info!(
            "[PROGRESSION] level up user:{} game:{} level:{}",
            short_id(&caller.user_id),
            game_id,
            state.level
        );
    } else {
        log::debug!(
            "[PROGRESSION] stage user:{} game:{} level:{} stages:{} accuracy:{}%",
            short_id(&caller.user_id),
            game_id,
            state.level,
            state.stages_completed,
            state.accuracy_at_level()
        );
    }

    let record = StoredProgression {
        user_id: caller.user_id.clone(),
        game_id: game_id.to_string(),
        state: state.clone(),
    };
    put_json(store, &keys::progression(&caller.user_id, game_id), &record)?;

    Ok(StageOutcome { state, leveled_up })
}

/// Drop stored state so the next read returns the default. Admin-only at
/// the reducer boundary.
pub fn reset_progression<S>(store: &S, user_id: &str, game_id: &str) -> ApiResult<bool>
where
    S: KeyValueStore + ?Sized,
{
    require_ids(user_id, game_id)?;
    store.delete(&keys::progression(user_id, game_id))
}

/// Every stored game state for a user, ordered by game id
pub fn list_progression<S>(store: &S, user_id: &str) -> ApiResult<Vec<StoredProgression>>
where
    S: ReadStore + ?Sized,
{
    let mut records: Vec<StoredProgression> = scan_json(store, &keys::progression_of(user_id))?;
    records.retain(|r| r.user_id == user_id);
    records.sort_by(|a, b| a.game_id.cmp(&b.game_id));
    Ok(records)
}

// -------------------- Dashboard reads --------------------

pub fn current_level<S: ReadStore + ?Sized>(store: &S, user_id: &str, game_id: &str) -> ApiResult<u8> {
    Ok(get_progression(store, user_id, game_id)?.level)
}

pub fn stages_completed<S: ReadStore + ?Sized>(store: &S, user_id: &str, game_id: &str) -> ApiResult<u32> {
    Ok(get_progression(store, user_id, game_id)?.stages_completed)
}

pub fn accuracy_at_current_level<S: ReadStore + ?Sized>(
    store: &S,
    user_id: &str,
    game_id: &str,
) -> ApiResult<u32> {
    Ok(get_progression(store, user_id, game_id)?.accuracy_at_level())
}

/// Row of the my_progression view
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct ProgressionView {
    pub game_id: String,
    pub level: u8,
    pub stages_completed: u32,
    pub correct: u32,
    pub total: u32,
    pub unlocked_levels: Vec<u8>,
    pub accuracy: u32,
    pub eligible_for_level_up: bool,
}

impl ProgressionView {
    pub fn new(record: StoredProgression, config: &ScoringConfig) -> Self {
        let accuracy = record.state.accuracy_at_level();
        let eligible_for_level_up =
            record.state.level < config.max_level && record.state.is_eligible(config);
        Self {
            game_id: record.game_id,
            level: record.state.level,
            stages_completed: record.state.stages_completed,
            correct: record.state.correct,
            total: record.state.total,
            unlocked_levels: record.state.unlocked_levels,
            accuracy,
            eligible_for_level_up,
        }
    }
}

fn require_ids(user_id: &str, game_id: &str) -> ApiResult<()> {
    validate_user_id(user_id)?;
    if game_id.trim().is_empty() {
        return Err(ApiError::bad_request("gameId is required"));
    }
    Ok(())
}
