//! Score persistence: daily snapshots and the activity log.

use serde::Deserialize;

use crate::calendar::Clock;
use crate::error::{ApiError, ApiResult};
use crate::identity::{short_id, validate_user_id, Caller};
use crate::model::{accuracy_percent, ActivityRecord, ActivityType, ScoreSnapshot};
use crate::profile::touch_profile;
use crate::store::{get_json, keys, put_json, scan_json, KeyValueStore, ReadStore};

/// Body of a score sync: the caller's running totals for today
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSync {
    pub literacy_correct: u32,
    pub literacy_total: u32,
    pub numeracy_correct: u32,
    pub numeracy_total: u32,
    pub time_spent: u32,
    pub total_score: Option<u32>,
    /// JSON array of activities finished since the last sync
    pub activity_log: Option<String>,
}

/// One finished activity as sent by the client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityInput {
    pub activity_id: String,
    #[serde(default)]
    pub game_name: String,
    pub game_id: String,
    pub correct: u32,
    pub total: u32,
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default)]
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub snapshot: ScoreSnapshot,
    pub activities_logged: usize,
}

fn check_counts(subject: &str, correct: u32, total: u32) -> ApiResult<()> {
    if correct > total {
        return Err(ApiError::bad_request(format!(
            "{} correct ({}) cannot exceed total ({})",
            subject, correct, total
        )));
    }
    Ok(())
}

fn build_activity(caller: &Caller, clock: &Clock, input: ActivityInput) -> ApiResult<ActivityRecord> {
    validate_user_id(&caller.user_id)?;
    if input.activity_id.trim().is_empty() {
        return Err(ApiError::bad_request("activityId is required"));
    }
    if input.game_id.trim().is_empty() {
        return Err(ApiError::bad_request("gameId is required"));
    }
    check_counts("activity", input.correct, input.total)?;
    let activity_type = ActivityType::parse(&input.activity_type)?;

    Ok(ActivityRecord {
        user_id: caller.user_id.clone(),
        accuracy: accuracy_percent(input.correct as u64, input.total as u64),
        activity_id: input.activity_id,
        game_id: input.game_id,
        game_name: input.game_name,
        activity_type,
        correct: input.correct,
        total: input.total,
        duration: input.duration,
        date: clock.now_iso(),
    })
}

/// Append-only: an id that already exists keeps its first record
fn append_activity<S>(store: &S, record: &ActivityRecord) -> ApiResult<bool>
where
    S: KeyValueStore + ?Sized,
{
    let key = keys::activity(&record.user_id, &record.activity_id);
    match get_json::<ActivityRecord, _>(store, &key)? {
        Some(existing) if existing.user_id == record.user_id && existing.activity_id == record.activity_id => {
            log::debug!("[SCORES] activity already logged key={}", key);
            Ok(false)
        }
        Some(existing) => Err(ApiError::upstream(
            format!("{} holds another record", key),
            format!("user:{} activity:{}", short_id(&existing.user_id), existing.activity_id),
        )),
        None => {
            put_json(store, &key, record)?;
            Ok(true)
        }
    }
}

fn parse_activity_log(raw: &str) -> ApiResult<Vec<ActivityInput>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| ApiError::bad_request(format!("activityLog is not a valid activity array: {}", e)))
}

/// Overwrite today's snapshot for the caller, append any logged
/// activities, then refresh the profile
pub fn sync_scores<S>(store: &S, caller: &Caller, clock: &Clock, sync: ScoreSync) -> ApiResult<SyncOutcome>
where
    S: KeyValueStore + ?Sized,
{
    validate_user_id(&caller.user_id)?;
    check_counts("literacy", sync.literacy_correct, sync.literacy_total)?;
    check_counts("numeracy", sync.numeracy_correct, sync.numeracy_total)?;

    // Validate the whole batch before anything is written
    let activities = match sync.activity_log.as_deref() {
        Some(raw) => parse_activity_log(raw)?
            .into_iter()
            .map(|input| build_activity(caller, clock, input))
            .collect::<ApiResult<Vec<_>>>()?,
        None => Vec::new(),
    };

    let snapshot = ScoreSnapshot {
        user_id: caller.user_id.clone(),
        date: clock.today_key(),
        literacy_correct: sync.literacy_correct,
        literacy_total: sync.literacy_total,
        numeracy_correct: sync.numeracy_correct,
        numeracy_total: sync.numeracy_total,
        time_spent: sync.time_spent,
        total_score: sync.total_score,
    };
    put_json(store, &keys::score(&caller.user_id, &snapshot.date), &snapshot)?;

    let mut activities_logged = 0;
    for record in &activities {
        if append_activity(store, record)? {
            activities_logged += 1;
        }
    }

    touch_profile(store, caller, clock)?;

    log::info!(
        "[SCORES] sync user:{} date:{} literacy:{}/{} numeracy:{}/{} time:{}s activities:{}",
        short_id(&caller.user_id),
        snapshot.date,
        snapshot.literacy_correct,
        snapshot.literacy_total,
        snapshot.numeracy_correct,
        snapshot.numeracy_total,
        snapshot.time_spent,
        activities_logged
    );

    Ok(SyncOutcome {
        snapshot,
        activities_logged,
    })
}

/// Append one activity for the caller. Returns false when the id was
/// already logged.
pub fn log_activity<S>(store: &S, caller: &Caller, clock: &Clock, input: ActivityInput) -> ApiResult<bool>
where
    S: KeyValueStore + ?Sized,
{
    let record = build_activity(caller, clock, input)?;
    let appended = append_activity(store, &record)?;
    if appended {
        log::info!(
            "[SCORES] activity user:{} game:{} {}/{} in {}s",
            short_id(&caller.user_id),
            record.game_id,
            record.correct,
            record.total,
            record.duration
        );
    }
    Ok(appended)
}

/// Every snapshot of a user, newest date first
pub fn list_scores<S>(store: &S, user_id: &str) -> ApiResult<Vec<ScoreSnapshot>>
where
    S: ReadStore + ?Sized,
{
    let mut snapshots: Vec<ScoreSnapshot> = scan_json(store, &keys::scores_of(user_id))?;
    snapshots.retain(|s| s.user_id == user_id);
    snapshots.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(snapshots)
}

/// Today's snapshot, zeroed when nothing was synced yet
pub fn today_score<S>(store: &S, user_id: &str, clock: &Clock) -> ApiResult<ScoreSnapshot>
where
    S: ReadStore + ?Sized,
{
    let today = clock.today_key();
    let stored: Option<ScoreSnapshot> = get_json(store, &keys::score(user_id, &today))?;
    Ok(stored.unwrap_or_else(|| ScoreSnapshot::empty(user_id, &today)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;
    use crate::identity::fixed::student;
    use crate::profile::get_profile;
    use crate::store::memory::MemoryStore;

    fn clock(date: &str) -> Clock {
        Clock::on(parse_date(date).unwrap())
    }

    fn sync(lit: (u32, u32), num: (u32, u32), time_spent: u32) -> ScoreSync {
        ScoreSync {
            literacy_correct: lit.0,
            literacy_total: lit.1,
            numeracy_correct: num.0,
            numeracy_total: num.1,
            time_spent,
            ..ScoreSync::default()
        }
    }

    fn input(id: &str, game: &str) -> ActivityInput {
        ActivityInput {
            activity_id: id.to_string(),
            game_name: "Math Dash".to_string(),
            game_id: game.to_string(),
            correct: 3,
            total: 4,
            activity_type: "numeracy".to_string(),
            duration: 45,
        }
    }

    #[test]
    fn test_same_day_sync_overwrites() {
        let store = MemoryStore::new();
        let kid = student("u1");
        let today = clock("2026-10-14");

        sync_scores(&store, &kid, &today, sync((2, 5), (1, 3), 120)).unwrap();
        sync_scores(&store, &kid, &today, sync((4, 10), (3, 6), 300)).unwrap();

        let snapshot = today_score(&store, "u1", &today).unwrap();
        assert_eq!(snapshot.literacy_correct, 4);
        assert_eq!(snapshot.numeracy_total, 6);
        assert_eq!(snapshot.time_spent, 300, "replaced, not added");
        assert_eq!(list_scores(&store, "u1").unwrap().len(), 1);
    }

    #[test]
    fn test_sync_touches_profile() {
        let store = MemoryStore::new();
        sync_scores(&store, &student("u1"), &clock("2026-10-14"), sync((1, 1), (0, 0), 10)).unwrap();
        let profile = get_profile(&store, "u1").unwrap().unwrap();
        assert_eq!(profile.last_active, "2026-10-14T00:00:00.000Z");
        assert_eq!(profile.email, "u1@school.example");
    }

    #[test]
    fn test_sync_rejects_impossible_counts_without_writing() {
        let store = MemoryStore::new();
        let result = sync_scores(&store, &student("u1"), &clock("2026-10-14"), sync((6, 5), (0, 0), 10));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let bad_log = ScoreSync {
            activity_log: Some(r#"[{"activityId":"a1"}]"#.to_string()),
            ..sync((1, 1), (0, 0), 10)
        };
        let result = sync_scores(&store, &student("u1"), &clock("2026-10-14"), bad_log);
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_sync_appends_activity_log() {
        let store = MemoryStore::new();
        let kid = student("u1");
        let with_log = ScoreSync {
            activity_log: Some(
                r#"[
                    {"activityId":"a1","gameId":"math-dash","gameName":"Math Dash","correct":3,"total":4,"type":"numeracy","duration":40},
                    {"activityId":"a2","gameId":"spell-it","correct":5,"total":5,"type":"literacy"}
                ]"#
                .to_string(),
            ),
            ..sync((5, 5), (3, 4), 90)
        };
        let outcome = sync_scores(&store, &kid, &clock("2026-10-14"), with_log.clone()).unwrap();
        assert_eq!(outcome.activities_logged, 2);

        // Replaying the same log appends nothing
        let replay = sync_scores(&store, &kid, &clock("2026-10-14"), with_log).unwrap();
        assert_eq!(replay.activities_logged, 0);

        let raw = store.raw(&keys::activity("u1", "a1")).unwrap();
        let record: ActivityRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.accuracy, 75.0);
        assert_eq!(record.activity_type, ActivityType::Numeracy);
    }

    #[test]
    fn test_activity_records_are_immutable() {
        let store = MemoryStore::new();
        let kid = student("u1");
        assert!(log_activity(&store, &kid, &clock("2026-10-14"), input("a1", "math-dash")).unwrap());

        let mut changed = input("a1", "other-game");
        changed.correct = 0;
        assert!(!log_activity(&store, &kid, &clock("2026-10-15"), changed).unwrap());

        let raw = store.raw(&keys::activity("u1", "a1")).unwrap();
        let record: ActivityRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.game_id, "math-dash");
        assert_eq!(record.date, "2026-10-14T00:00:00.000Z");
    }

    #[test]
    fn test_activity_keys_are_not_shared_across_users() {
        let store = MemoryStore::new();
        let today = clock("2026-10-14");
        assert_eq!(keys::activity("a", "b_x"), keys::activity("a_b", "x"));

        assert!(log_activity(&store, &student("a"), &today, input("b_x", "math-dash")).unwrap());
        let result = log_activity(&store, &student("a_b"), &today, input("x", "math-dash"));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        let result = sync_scores(&store, &student("a_b"), &today, sync((1, 1), (0, 0), 10));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        // A record under the caller's key that belongs to someone else is not
        // mistaken for an earlier log of the same activity
        let mut foreign: ActivityRecord = serde_json::from_str(&store.raw(&keys::activity("a", "b_x")).unwrap()).unwrap();
        foreign.user_id = "legacy".to_string();
        put_json(&store, &keys::activity("a", "y"), &foreign).unwrap();
        let result = log_activity(&store, &student("a"), &today, input("y", "math-dash"));
        assert!(matches!(result, Err(ApiError::Upstream { .. })));
    }

    #[test]
    fn test_log_activity_validation() {
        let store = MemoryStore::new();
        let kid = student("u1");
        let today = clock("2026-10-14");

        let mut no_id = input("", "math-dash");
        assert_eq!(
            log_activity(&store, &kid, &today, no_id.clone()),
            Err(ApiError::bad_request("activityId is required"))
        );
        no_id.activity_id = "a1".to_string();
        no_id.activity_type = "art".to_string();
        assert!(matches!(log_activity(&store, &kid, &today, no_id), Err(ApiError::BadRequest(_))));

        let mut too_many = input("a2", "math-dash");
        too_many.correct = 9;
        assert!(matches!(log_activity(&store, &kid, &today, too_many), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_list_scores_newest_first() {
        let store = MemoryStore::new();
        let kid = student("u1");
        for date in ["2026-10-12", "2026-10-14", "2026-10-13"] {
            sync_scores(&store, &kid, &clock(date), sync((1, 1), (1, 1), 60)).unwrap();
        }
        let dates: Vec<String> = list_scores(&store, "u1").unwrap().into_iter().map(|s| s.date).collect();
        assert_eq!(dates, vec!["2026-10-14", "2026-10-13", "2026-10-12"]);
    }

    #[test]
    fn test_store_outage_surfaces_upstream() {
        let store = MemoryStore::new();
        store.fail_with("connection reset");
        let result = sync_scores(&store, &student("u1"), &clock("2026-10-14"), sync((1, 1), (1, 1), 60));
        assert!(matches!(result, Err(ApiError::Upstream { .. })));
        assert!(matches!(list_scores(&store, "u1"), Err(ApiError::Upstream { .. })));
    }

    #[test]
    fn test_today_score_defaults_to_zero() {
        let store = MemoryStore::new();
        let snapshot = today_score(&store, "u1", &clock("2026-10-16")).unwrap();
        assert_eq!(snapshot, ScoreSnapshot::empty("u1", "2026-10-16"));
    }
}
