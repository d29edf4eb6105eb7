// User profiles: touched on every score sync, flipped by subscription
// webhook outcomes forwarded from the gateway.

use crate::calendar::Clock;
use crate::error::{ApiError, ApiResult};
use crate::identity::{short_id, validate_user_id, Caller};
use crate::model::UserProfile;
use crate::store::{get_json, keys, put_json, KeyValueStore, ReadStore};

/// Subscription statuses that grant premium games
const PREMIUM_STATUSES: &[&str] = &["active", "trialing"];

pub fn get_profile<S>(store: &S, user_id: &str) -> ApiResult<Option<UserProfile>>
where
    S: ReadStore + ?Sized,
{
    let key = keys::profile(user_id);
    match get_json::<UserProfile, _>(store, &key)? {
        Some(profile) if profile.user_id != user_id => Err(ApiError::upstream(
            format!("{} holds another profile", key),
            format!("user:{}", short_id(&profile.user_id)),
        )),
        found => Ok(found),
    }
}

fn new_profile(user_id: &str, clock: &Clock) -> UserProfile {
    let now = clock.now_iso();
    UserProfile {
        user_id: user_id.to_string(),
        email: String::new(),
        name: String::new(),
        is_premium: false,
        subscription_id: None,
        subscription_status: None,
        last_active: now.clone(),
        created_at: now,
    }
}

/// Upsert the caller's profile: refresh lastActive and identity fields
pub fn touch_profile<S>(store: &S, caller: &Caller, clock: &Clock) -> ApiResult<UserProfile>
where
    S: KeyValueStore + ?Sized,
{
    let existing = get_profile(store, &caller.user_id)?;
    let is_new = existing.is_none();
    let mut profile = existing.unwrap_or_else(|| new_profile(&caller.user_id, clock));

    profile.last_active = clock.now_iso();
    if !caller.name.trim().is_empty() {
        profile.name = caller.name.clone();
    }
    if !caller.email.trim().is_empty() {
        profile.email = caller.email.clone();
    }

    put_json(store, &keys::profile(&caller.user_id), &profile)?;
    if is_new {
        log::info!("[PROFILE] created user:{}", short_id(&caller.user_id));
    }
    Ok(profile)
}

pub fn is_premium_status(status: &str) -> bool {
    PREMIUM_STATUSES.contains(&status)
}

/// Record a payment-provider subscription outcome for a user
pub fn apply_subscription_event<S>(
    store: &S,
    clock: &Clock,
    user_id: &str,
    status: &str,
    subscription_id: Option<String>,
) -> ApiResult<UserProfile>
where
    S: KeyValueStore + ?Sized,
{
    validate_user_id(user_id)?;
    let status = status.trim().to_ascii_lowercase();
    if status.is_empty() {
        return Err(ApiError::bad_request("subscription status is required"));
    }

    let mut profile = get_profile(store, user_id)?.unwrap_or_else(|| new_profile(user_id, clock));
    let was_premium = profile.is_premium;

    profile.is_premium = is_premium_status(&status);
    profile.subscription_status = Some(status.clone());
    if subscription_id.is_some() {
        profile.subscription_id = subscription_id;
    }
    put_json(store, &keys::profile(user_id), &profile)?;

    log::info!(
        "[PROFILE] subscription user:{} status:{} premium:{}→{}",
        short_id(user_id),
        status,
        was_premium,
        profile.is_premium
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;
    use crate::identity::fixed::student;
    use crate::store::memory::MemoryStore;

    fn clock(date: &str) -> Clock {
        Clock::on(parse_date(date).unwrap())
    }

    #[test]
    fn test_touch_creates_then_updates() {
        let store = MemoryStore::new();
        let kid = student("u1");

        let created = touch_profile(&store, &kid, &clock("2026-10-14")).unwrap();
        assert_eq!(created.created_at, "2026-10-14T00:00:00.000Z");
        assert_eq!(created.name, "Student u1");
        assert!(!created.is_premium);

        let renamed = crate::identity::Caller {
            name: "Ana".to_string(),
            ..kid
        };
        let updated = touch_profile(&store, &renamed, &clock("2026-10-16")).unwrap();
        assert_eq!(updated.created_at, "2026-10-14T00:00:00.000Z");
        assert_eq!(updated.last_active, "2026-10-16T00:00:00.000Z");
        assert_eq!(updated.name, "Ana");
    }

    #[test]
    fn test_subscription_events_toggle_premium() {
        let store = MemoryStore::new();
        let today = clock("2026-10-16");

        let active = apply_subscription_event(&store, &today, "u1", "Active", Some("sub_123".to_string())).unwrap();
        assert!(active.is_premium);
        assert_eq!(active.subscription_status.as_deref(), Some("active"));

        let canceled = apply_subscription_event(&store, &today, "u1", "canceled", None).unwrap();
        assert!(!canceled.is_premium);
        assert_eq!(canceled.subscription_id.as_deref(), Some("sub_123"));

        let stored = get_profile(&store, "u1").unwrap().unwrap();
        assert_eq!(stored, canceled);
    }

    #[test]
    fn test_subscription_event_requires_fields() {
        let store = MemoryStore::new();
        let today = clock("2026-10-16");
        assert!(matches!(
            apply_subscription_event(&store, &today, "", "active", None),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            apply_subscription_event(&store, &today, "u1", "  ", None),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            apply_subscription_event(&store, &today, "a_b", "active", None),
            Err(ApiError::BadRequest(_))
        ));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_profile_for_another_user_is_not_a_hit() {
        let store = MemoryStore::new();
        let today = clock("2026-10-16");
        let mut other = apply_subscription_event(&store, &today, "u2", "active", None).unwrap();
        other.user_id = "legacy".to_string();
        crate::store::put_json(&store, &keys::profile("u1"), &other).unwrap();

        assert!(matches!(get_profile(&store, "u1"), Err(ApiError::Upstream { .. })));
        assert!(touch_profile(&store, &student("u1"), &today).is_err());
    }
}
