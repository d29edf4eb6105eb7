//! Leaderboards, recomputed from stored records on every read.
//!
//! All-time: composite of usage, accuracy, breadth and streak (25% each).
//! Weekly: correct answers from each user's latest snapshot since Monday
//! 00:00 UTC. Snapshots are running totals, so the latest one in the
//! window already covers the whole week and earlier ones are discarded.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::NaiveDate;
use spacetimedb::SpacetimeType;

use crate::calendar::{format_date, parse_date, week_start};
use crate::error::ApiResult;
use crate::model::{accuracy_percent, ActivityRecord, ScoreSnapshot, UserProfile};
use crate::store::{get_json, keys, scan_json, ReadStore};
use crate::ScoringConfig;

// ==================== ALL-TIME ====================

/// Raw engagement totals for one user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Engagement {
    pub total_time_spent: u64,
    pub total_correct: u64,
    pub total_questions: u64,
    pub games_played: u32,
    pub consecutive_days: u32,
}

/// Sub-scores in [0, 100] and the weighted composite, all unrounded
#[derive(Debug, Clone, PartialEq)]
pub struct Breakdown {
    pub usage: f64,
    pub accuracy: f64,
    pub games: f64,
    pub streak: f64,
    pub composite: f64,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct CompositeEntry {
    pub user_id: String,
    pub name: String,
    pub usage_score: f64,
    pub accuracy_score: f64,
    pub games_score: f64,
    pub streak_score: f64,
    pub composite_score: f64,
    pub total_time_spent: u64,
    pub total_correct: u64,
    pub total_questions: u64,
    pub games_played: u32,
    pub consecutive_days: u32,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent_of(value: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    (value * 100.0 / target).clamp(0.0, 100.0)
}

/// Days in a row with a snapshot, walking back from `today`.
/// The walk stops at the first missing day, today included.
pub fn consecutive_days(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut streak = 0;
    let mut day = today;
    while dates.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}

pub fn engagement(snapshots: &[ScoreSnapshot], activities: &[ActivityRecord], today: NaiveDate) -> Engagement {
    let dates: BTreeSet<NaiveDate> = snapshots.iter().filter_map(|s| parse_date(&s.date)).collect();
    let games: HashSet<&str> = activities.iter().map(|a| a.game_id.as_str()).collect();

    Engagement {
        total_time_spent: snapshots.iter().map(|s| s.time_spent as u64).sum(),
        total_correct: snapshots.iter().map(|s| s.total_correct()).sum(),
        total_questions: snapshots.iter().map(|s| s.total_questions()).sum(),
        games_played: games.len() as u32,
        consecutive_days: consecutive_days(&dates, today),
    }
}

pub fn breakdown(engagement: &Engagement, config: &ScoringConfig) -> Breakdown {
    let usage = percent_of(engagement.total_time_spent as f64, config.usage_target_secs as f64);
    let accuracy = accuracy_percent(engagement.total_correct, engagement.total_questions).clamp(0.0, 100.0);
    let games = percent_of(engagement.games_played as f64, config.games_target as f64);
    let streak = percent_of(engagement.consecutive_days as f64, config.streak_target_days as f64);

    Breakdown {
        usage,
        accuracy,
        games,
        streak,
        composite: 0.25 * (usage + accuracy + games + streak),
    }
}

/// Top users by composite score; zero scores are left off
pub fn all_time<S>(store: &S, config: &ScoringConfig, today: NaiveDate) -> ApiResult<Vec<CompositeEntry>>
where
    S: ReadStore + ?Sized,
{
    let profiles: Vec<UserProfile> = scan_json(store, &keys::all_profiles())?;

    let mut entries = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let mut snapshots: Vec<ScoreSnapshot> = scan_json(store, &keys::scores_of(&profile.user_id))?;
        snapshots.retain(|s| s.user_id == profile.user_id);
        let mut activities: Vec<ActivityRecord> = scan_json(store, &keys::activities_of(&profile.user_id))?;
        activities.retain(|a| a.user_id == profile.user_id);

        let totals = engagement(&snapshots, &activities, today);
        let scores = breakdown(&totals, config);
        let composite_score = round1(scores.composite);
        if composite_score <= 0.0 {
            continue;
        }

        entries.push(CompositeEntry {
            name: profile.display_name(),
            user_id: profile.user_id,
            usage_score: round1(scores.usage),
            accuracy_score: round1(scores.accuracy),
            games_score: round1(scores.games),
            streak_score: round1(scores.streak),
            composite_score,
            total_time_spent: totals.total_time_spent,
            total_correct: totals.total_correct,
            total_questions: totals.total_questions,
            games_played: totals.games_played,
            consecutive_days: totals.consecutive_days,
        });
    }

    // Stable: equal scores keep profile (key) order
    entries.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
    entries.truncate(config.leaderboard_size as usize);

    log::debug!("[LEADERBOARD] all-time entries:{}", entries.len());
    Ok(entries)
}

// ==================== WEEKLY ====================

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct WeeklyEntry {
    pub rank: u32,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub weekly_score: u32,
    pub literacy_correct: u32,
    pub literacy_total: u32,
    pub numeracy_correct: u32,
    pub numeracy_total: u32,
    /// Date of the snapshot the score came from
    pub date: String,
    pub week_start: String,
}

/// Latest-wins reduction: per user, the single latest-dated snapshot on or
/// after `week_start`. Earlier snapshots are dropped, never summed.
pub fn latest_in_window(
    snapshots: impl IntoIterator<Item = ScoreSnapshot>,
    week_start: NaiveDate,
) -> BTreeMap<String, ScoreSnapshot> {
    let mut latest: BTreeMap<String, (NaiveDate, ScoreSnapshot)> = BTreeMap::new();
    for snapshot in snapshots {
        let Some(date) = parse_date(&snapshot.date) else {
            log::warn!("[LEADERBOARD] skip snapshot with bad date user:{} date:{}", snapshot.user_id, snapshot.date);
            continue;
        };
        if date < week_start {
            continue;
        }
        match latest.get(&snapshot.user_id) {
            Some((kept, _)) if *kept >= date => {}
            _ => {
                latest.insert(snapshot.user_id.clone(), (date, snapshot));
            }
        }
    }
    latest.into_iter().map(|(user, (_, snapshot))| (user, snapshot)).collect()
}

/// Weekly top list, ranked 1..N by strict score order
pub fn weekly<S>(store: &S, config: &ScoringConfig, today: NaiveDate) -> ApiResult<Vec<WeeklyEntry>>
where
    S: ReadStore + ?Sized,
{
    let start = week_start(today);
    let start_key = format_date(start);
    let snapshots: Vec<ScoreSnapshot> = scan_json(store, &keys::all_scores())?;

    let mut scored = Vec::new();
    for (user_id, snapshot) in latest_in_window(snapshots, start) {
        let weekly_score = snapshot.literacy_correct.saturating_add(snapshot.numeracy_correct);
        if weekly_score == 0 {
            continue;
        }
        let Some(profile) = get_json::<UserProfile, _>(store, &keys::profile(&user_id))? else {
            continue;
        };
        scored.push((weekly_score, profile, snapshot));
    }

    // Ties fall back to user id (map order) for a deterministic board
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.truncate(config.weekly_leaderboard_size as usize);

    let entries: Vec<WeeklyEntry> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (weekly_score, profile, snapshot))| WeeklyEntry {
            rank: i as u32 + 1,
            name: profile.display_name(),
            user_id: profile.user_id,
            email: profile.email,
            weekly_score,
            literacy_correct: snapshot.literacy_correct,
            literacy_total: snapshot.literacy_total,
            numeracy_correct: snapshot.numeracy_correct,
            numeracy_total: snapshot.numeracy_total,
            date: snapshot.date,
            week_start: start_key.clone(),
        })
        .collect();

    log::debug!("[LEADERBOARD] weekly week_start:{} entries:{}", start_key, entries.len());
    Ok(entries)
}
