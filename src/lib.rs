use spacetimedb::{
    ReducerContext, ViewContext, Identity, Table, Timestamp, ScheduleAt,
    table, reducer, view,
};

pub mod calendar;
pub mod config;
pub mod error;
pub mod identity;
pub mod leaderboard;
pub mod model;
pub mod profile;
pub mod progression;
pub mod scores;
pub mod store;

// Bulk restore reducer for disaster recovery
mod restore;

use calendar::{parse_date, Clock};
use config::SCORING_CONFIG_ID;
use error::{ApiError, ApiResult, Reply};
use identity::{short_id, Caller, IdentityResolver, Role};
use leaderboard::{CompositeEntry, WeeklyEntry};
use model::{ProgressionState, ScoreSnapshot, UserProfile};
use progression::ProgressionView;
use scores::{ActivityInput, ScoreSync};
use store::{keys, KeyValueStore, ReadStore};

// ==================== CONSTANTS ====================

/// Primary key of the singleton calendar_day row
const CALENDAR_DAY_ID: u32 = 1;

/// How often calendar_tick rolls the calendar row over
const CALENDAR_TICK_SECS: u64 = 60;

// ==================== TABLES ====================

/// Session links ephemeral connection to a verified user
/// PRIVATE: written only by the gateway through create_session
#[table(name = session)]
pub struct Session {
    #[primary_key]
    pub connection_id: Identity,

    /// Stable user ID from the verified bearer token
    #[index(btree)]
    pub user_id: String,

    pub email: String,

    pub name: String,

    /// Capability claim from the token
    pub role: Role,

    /// When this session was created
    pub connected_at: Timestamp,
}

impl Session {
    fn caller(self) -> Caller {
        Caller {
            user_id: self.user_id,
            email: self.email,
            name: self.name,
            role: self.role,
        }
    }
}

/// Authorized identities that can call gateway and admin reducers
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

/// String-keyed JSON blobs: scores, activities, profiles, progression
/// PRIVATE: clients read through the views below
#[table(name = kv_entry)]
#[derive(Clone)]
pub struct KvEntry {
    #[primary_key]
    pub key: String,

    /// Key namespace (user_scores, activity, ...) so prefix scans are index seeks
    #[index(btree)]
    pub namespace: String,

    /// JSON document
    pub value: String,

    pub updated_at: Timestamp,
}

/// Scoring tunables, singleton row (defaults in config.rs)
#[table(name = scoring_config, public)]
#[derive(Clone, Debug, PartialEq)]
pub struct ScoringConfig {
    #[primary_key]
    pub id: u32,

    /// Stages at the current level before a level-up is possible
    pub stages_per_level: u32,

    /// Minimum accuracy (%) at the current level for a level-up
    pub level_up_accuracy: u32,

    pub max_level: u8,

    /// Seconds of play that earn the full usage score
    pub usage_target_secs: u32,

    /// Distinct games that earn the full breadth score
    pub games_target: u32,

    /// Consecutive days that earn the full streak score
    pub streak_target_days: u32,

    pub leaderboard_size: u32,

    pub weekly_leaderboard_size: u32,

    /// Reject progression saves that skip or regress levels
    pub enforce_level_gate: bool,
}

/// Current UTC day and week, the only notion of "today" views have
#[table(name = calendar_day, public)]
pub struct CalendarDay {
    #[primary_key]
    pub id: u32,

    /// YYYY-MM-DD
    pub today: String,

    /// Monday of the current week, YYYY-MM-DD
    pub week_start: String,

    pub updated_at: Timestamp,
}

/// Schedule table for the calendar rollover
#[table(name = calendar_schedule, scheduled(calendar_tick))]
pub struct CalendarSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    pub scheduled_at: ScheduleAt,
}

// ==================== STORE & IDENTITY ADAPTERS ====================

/// KeyValueStore over kv_entry for reducers
pub struct TableStore<'a>(pub &'a ReducerContext);

impl ReadStore for TableStore<'_> {
    fn get(&self, key: &str) -> ApiResult<Option<String>> {
        Ok(self.0.db.kv_entry().key().find(&key.to_string()).map(|e| e.value))
    }

    fn scan_prefix(&self, prefix: &str) -> ApiResult<Vec<(String, String)>> {
        let mut found = Vec::new();
        for namespace in keys::scan_namespaces(prefix) {
            let namespace = namespace.to_string();
            found.extend(
                self.0.db.kv_entry()
                    .namespace()
                    .filter(&namespace)
                    .filter(|e| e.key.starts_with(prefix))
                    .map(|e| (e.key, e.value)),
            );
        }
        found.sort();
        Ok(found)
    }
}

impl KeyValueStore for TableStore<'_> {
    fn set(&self, key: &str, value: String) -> ApiResult<()> {
        let entry = KvEntry {
            key: key.to_string(),
            namespace: keys::namespace_of(key).to_string(),
            value,
            updated_at: self.0.timestamp,
        };
        let table = self.0.db.kv_entry();
        if table.key().find(&entry.key).is_some() {
            table.key().update(entry);
        } else {
            table.insert(entry);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> ApiResult<bool> {
        Ok(self.0.db.kv_entry().key().delete(&key.to_string()))
    }
}

/// Read-only store over kv_entry for views
pub struct ViewStore<'a>(pub &'a ViewContext);

impl ReadStore for ViewStore<'_> {
    fn get(&self, key: &str) -> ApiResult<Option<String>> {
        Ok(self.0.db.kv_entry().key().find(&key.to_string()).map(|e| e.value))
    }

    fn scan_prefix(&self, prefix: &str) -> ApiResult<Vec<(String, String)>> {
        let mut found = Vec::new();
        for namespace in keys::scan_namespaces(prefix) {
            let namespace = namespace.to_string();
            found.extend(
                self.0.db.kv_entry()
                    .namespace()
                    .filter(&namespace)
                    .filter(|e| e.key.starts_with(prefix))
                    .map(|e| (e.key, e.value)),
            );
        }
        found.sort();
        Ok(found)
    }
}

/// Resolves the caller from the session the gateway created
pub struct SessionResolver<'a>(pub &'a ReducerContext);

impl IdentityResolver for SessionResolver<'_> {
    fn resolve(&self) -> Option<Caller> {
        self.0.db.session().connection_id().find(&self.0.sender).map(Session::caller)
    }
}

pub struct ViewSessionResolver<'a>(pub &'a ViewContext);

impl IdentityResolver for ViewSessionResolver<'_> {
    fn resolve(&self) -> Option<Caller> {
        self.0.db.session().connection_id().find(self.0.sender).map(Session::caller)
    }
}

// ==================== HELPERS ====================

fn is_worker(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

/// Gateway-only operations
fn require_worker(ctx: &ReducerContext) -> ApiResult<()> {
    if is_worker(ctx) {
        Ok(())
    } else {
        Err(ApiError::forbidden("only the gateway can call this"))
    }
}

/// Authorized workers, or sessions carrying the Admin role
pub(crate) fn require_admin(ctx: &ReducerContext) -> ApiResult<()> {
    if is_worker(ctx) {
        return Ok(());
    }
    match SessionResolver(ctx).resolve() {
        Some(caller) if caller.is_admin() => Ok(()),
        Some(caller) => Err(ApiError::forbidden(format!(
            "{} is not an admin",
            short_id(&caller.user_id)
        ))),
        None => Err(ApiError::Unauthorized),
    }
}

fn load_config(ctx: &ReducerContext) -> ScoringConfig {
    ctx.db.scoring_config().id().find(SCORING_CONFIG_ID).unwrap_or_default()
}

fn view_config(ctx: &ViewContext) -> ScoringConfig {
    ctx.db.scoring_config().id().find(SCORING_CONFIG_ID).unwrap_or_default()
}

/// Clock for this transaction; rolls the calendar_day row when the UTC
/// date changed since the last write
fn refresh_calendar(ctx: &ReducerContext) -> Clock {
    let clock = Clock::from_timestamp(ctx.timestamp);
    let today = clock.today_key();
    let day = CalendarDay {
        id: CALENDAR_DAY_ID,
        today: today.clone(),
        week_start: calendar::format_date(clock.week_start()),
        updated_at: ctx.timestamp,
    };

    let table = ctx.db.calendar_day();
    match table.id().find(CALENDAR_DAY_ID) {
        Some(row) if row.today == today => {}
        Some(row) => {
            log::info!("[CALENDAR] {} -> {} week:{}", row.today, day.today, day.week_start);
            table.id().update(day);
        }
        None => {
            log::info!("[CALENDAR] started {} week:{}", day.today, day.week_start);
            table.insert(day);
        }
    }
    clock
}

/// Today as last recorded by a reducer; None before the first tick
fn view_clock(ctx: &ViewContext) -> Option<Clock> {
    let row = ctx.db.calendar_day().id().find(CALENDAR_DAY_ID)?;
    parse_date(&row.today).map(Clock::on)
}

/// Views never fail: failed reads render as the empty state
fn or_empty<T: Default>(tag: &str, result: ApiResult<T>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("[{}] view read failed: {}", tag, e);
        T::default()
    })
}

// ==================== VIEWS ====================

/// Caller's daily snapshots, newest first
#[view(name = my_scores, public)]
fn my_scores(ctx: &ViewContext) -> Vec<ScoreSnapshot> {
    let Some(caller) = ViewSessionResolver(ctx).resolve() else {
        return vec![];
    };
    or_empty("SCORES", scores::list_scores(&ViewStore(ctx), &caller.user_id))
}

/// Caller's snapshot for today (zeros when nothing synced yet)
#[view(name = my_score_today, public)]
fn my_score_today(ctx: &ViewContext) -> Option<ScoreSnapshot> {
    let caller = ViewSessionResolver(ctx).resolve()?;
    let clock = view_clock(ctx)?;
    scores::today_score(&ViewStore(ctx), &caller.user_id, &clock)
        .map_err(|e| log::warn!("[SCORES] view read failed: {}", e))
        .ok()
}

/// Top users by composite engagement score. Open to every connection.
#[view(name = all_time_leaderboard, public)]
fn all_time_leaderboard(ctx: &ViewContext) -> Vec<CompositeEntry> {
    let Some(clock) = view_clock(ctx) else {
        return vec![];
    };
    let config = view_config(ctx);
    or_empty("LEADERBOARD", leaderboard::all_time(&ViewStore(ctx), &config, clock.today()))
}

/// This week's top users; requires a session
#[view(name = weekly_leaderboard, public)]
fn weekly_leaderboard(ctx: &ViewContext) -> Vec<WeeklyEntry> {
    if ViewSessionResolver(ctx).resolve().is_none() {
        return vec![];
    }
    let Some(clock) = view_clock(ctx) else {
        return vec![];
    };
    let config = view_config(ctx);
    or_empty("LEADERBOARD", leaderboard::weekly(&ViewStore(ctx), &config, clock.today()))
}

/// Caller's stored progression per game. Games never played are absent;
/// clients render the level-1 default for them.
#[view(name = my_progression, public)]
fn my_progression(ctx: &ViewContext) -> Vec<ProgressionView> {
    let Some(caller) = ViewSessionResolver(ctx).resolve() else {
        return vec![];
    };
    let config = view_config(ctx);
    or_empty("PROGRESSION", progression::list_progression(&ViewStore(ctx), &caller.user_id))
        .into_iter()
        .map(|record| ProgressionView::new(record, &config))
        .collect()
}

#[view(name = my_profile, public)]
fn my_profile(ctx: &ViewContext) -> Option<UserProfile> {
    let caller = ViewSessionResolver(ctx).resolve()?;
    profile::get_profile(&ViewStore(ctx), &caller.user_id)
        .map_err(|e| log::warn!("[PROFILE] view read failed: {}", e))
        .ok()
        .flatten()
}

// ==================== REDUCERS ====================

/// Create a verified session for a client identity
/// Called by the gateway AFTER verifying the bearer token
#[reducer]
pub fn create_session(
    ctx: &ReducerContext,
    client_identity: String,
    user_id: String,
    email: String,
    name: String,
    role: Role,
) -> Result<(), String> {
    require_worker(ctx).reply("SESSION")?;
    identity::validate_user_id(&user_id).reply("SESSION")?;
    let identity = Identity::from_hex(&client_identity)
        .map_err(|e| ApiError::bad_request(format!("invalid identity hex: {}", e)).into_reply("SESSION"))?;

    // Delete stale sessions: same user (unclean reconnect) OR same connection_id (prevents PK conflict)
    let stale_sessions: Vec<_> = ctx.db.session()
        .iter()
        .filter(|s| s.user_id == user_id || s.connection_id == identity)
        .map(|s| s.connection_id)
        .collect();
    for conn_id in stale_sessions {
        ctx.db.session().connection_id().delete(&conn_id);
    }

    log::info!(
        "[SESSION] created user:{} ws:{} role:{:?}",
        short_id(&user_id),
        short_id(&client_identity),
        role
    );

    ctx.db.session().insert(Session {
        connection_id: identity,
        user_id,
        email,
        name,
        role,
        connected_at: ctx.timestamp,
    });
    Ok(())
}

#[reducer(client_disconnected)]
pub fn on_disconnect(ctx: &ReducerContext) {
    if let Some(session) = ctx.db.session().connection_id().find(&ctx.sender) {
        let session_secs = ctx.timestamp.duration_since(session.connected_at)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        log::info!(
            "[SESSION] closed user:{} session_min:{:.1}",
            short_id(&session.user_id),
            session_secs as f32 / 60.0
        );
        ctx.db.session().connection_id().delete(&ctx.sender);
    }
}

/// Overwrite today's snapshot for the caller (cumulative totals for the day)
#[reducer]
#[allow(clippy::too_many_arguments)]
pub fn sync_scores(
    ctx: &ReducerContext,
    literacy_correct: u32,
    literacy_total: u32,
    numeracy_correct: u32,
    numeracy_total: u32,
    time_spent: u32,
    total_score: Option<u32>,
    activity_log: Option<String>,
) -> Result<(), String> {
    let caller = SessionResolver(ctx).require().reply("SCORES")?;
    let clock = refresh_calendar(ctx);
    let sync = ScoreSync {
        literacy_correct,
        literacy_total,
        numeracy_correct,
        numeracy_total,
        time_spent,
        total_score,
        activity_log,
    };
    scores::sync_scores(&TableStore(ctx), &caller, &clock, sync).reply("SCORES")?;
    Ok(())
}

#[reducer]
#[allow(clippy::too_many_arguments)]
pub fn log_activity(
    ctx: &ReducerContext,
    activity_id: String,
    game_name: String,
    game_id: String,
    correct: u32,
    total: u32,
    activity_type: String,
    duration: u32,
) -> Result<(), String> {
    let caller = SessionResolver(ctx).require().reply("SCORES")?;
    let clock = refresh_calendar(ctx);
    let input = ActivityInput {
        activity_id,
        game_name,
        game_id,
        correct,
        total,
        activity_type,
        duration,
    };
    scores::log_activity(&TableStore(ctx), &caller, &clock, input).reply("SCORES")?;
    Ok(())
}

/// Client-submitted progression state for one game
#[reducer]
pub fn save_progression(
    ctx: &ReducerContext,
    user_id: String,
    game_id: String,
    state: ProgressionState,
) -> Result<(), String> {
    let caller = SessionResolver(ctx).require().reply("PROGRESSION")?;
    refresh_calendar(ctx);
    let config = load_config(ctx);
    progression::save_progression(&TableStore(ctx), &caller, &config, &user_id, &game_id, state)
        .reply("PROGRESSION")
}

/// Apply one finished stage to the caller's progression
#[reducer]
pub fn record_stage(ctx: &ReducerContext, game_id: String, correct: u32, total: u32) -> Result<(), String> {
    let caller = SessionResolver(ctx).require().reply("PROGRESSION")?;
    refresh_calendar(ctx);
    let config = load_config(ctx);
    progression::record_stage(&TableStore(ctx), &caller, &config, &game_id, correct, total)
        .reply("PROGRESSION")?;
    Ok(())
}

/// Payment-provider webhook outcome, forwarded by the gateway
#[reducer]
pub fn apply_subscription_event(
    ctx: &ReducerContext,
    user_id: String,
    status: String,
    subscription_id: Option<String>,
) -> Result<(), String> {
    require_admin(ctx).reply("PROFILE")?;
    let clock = refresh_calendar(ctx);
    profile::apply_subscription_event(&TableStore(ctx), &clock, &user_id, &status, subscription_id)
        .reply("PROFILE")?;
    Ok(())
}

/// Admin: reset a user's progression for one game back to level 1
#[reducer]
pub fn admin_reset_progression(ctx: &ReducerContext, user_id: String, game_id: String) -> Result<(), String> {
    require_admin(ctx).reply("ADMIN")?;
    let removed = progression::reset_progression(&TableStore(ctx), &user_id, &game_id).reply("ADMIN")?;
    log::info!(
        "[ADMIN] reset progression user:{} game:{} existed:{}",
        short_id(&user_id),
        game_id,
        removed
    );
    Ok(())
}

/// Admin: replace the scoring tunables
#[reducer]
#[allow(clippy::too_many_arguments)]
pub fn update_scoring_config(
    ctx: &ReducerContext,
    stages_per_level: u32,
    level_up_accuracy: u32,
    max_level: u8,
    usage_target_secs: u32,
    games_target: u32,
    streak_target_days: u32,
    leaderboard_size: u32,
    weekly_leaderboard_size: u32,
    enforce_level_gate: bool,
) -> Result<(), String> {
    require_admin(ctx).reply("ADMIN")?;
    let config = ScoringConfig {
        id: SCORING_CONFIG_ID,
        stages_per_level,
        level_up_accuracy,
        max_level,
        usage_target_secs,
        games_target,
        streak_target_days,
        leaderboard_size,
        weekly_leaderboard_size,
        enforce_level_gate,
    };
    config.validate().reply("ADMIN")?;

    log::info!("[ADMIN] scoring config updated: {:?}", config);
    if ctx.db.scoring_config().id().find(SCORING_CONFIG_ID).is_some() {
        ctx.db.scoring_config().id().update(config);
    } else {
        ctx.db.scoring_config().insert(config);
    }
    Ok(())
}

/// Scheduled: keep calendar_day current for the views
#[reducer]
pub fn calendar_tick(ctx: &ReducerContext, _schedule: CalendarSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call calendar_tick", ctx.sender);
        return;
    }
    refresh_calendar(ctx);
}

/// Initialize module - authorize the owner, seed config, start the calendar
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    if ctx.db.scoring_config().id().find(SCORING_CONFIG_ID).is_none() {
        ctx.db.scoring_config().insert(ScoringConfig::default());
    }

    // Check if scheduler already exists to avoid duplicates on hot-reload
    if ctx.db.calendar_schedule().iter().count() == 0 {
        ctx.db.calendar_schedule().insert(CalendarSchedule {
            id: 0, // auto_inc will handle this
            scheduled_at: ScheduleAt::Interval(std::time::Duration::from_secs(CALENDAR_TICK_SECS).into()),
        });
    }

    refresh_calendar(ctx);
    log::info!("CAN|EDU scoring module initialized");
}
