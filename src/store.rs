//! Key-value persistence seam.
//!
//! Every record lives under a flat string key whose leading segment is its
//! namespace (`user_scores`, `activity`, `user_profile`, `progression`).
//! Prefix scan is the only query primitive. The module backs these traits
//! with the `kv_entry` table; tests use [`memory::MemoryStore`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};

/// Read half of the store, the only part a view can use
pub trait ReadStore {
    fn get(&self, key: &str) -> ApiResult<Option<String>>;

    /// All entries whose key starts with `prefix`, ordered by key
    fn scan_prefix(&self, prefix: &str) -> ApiResult<Vec<(String, String)>>;
}

/// Full store, available to reducers
pub trait KeyValueStore: ReadStore {
    /// Last write wins; no merge with the previous value
    fn set(&self, key: &str, value: String) -> ApiResult<()>;

    /// Returns whether an entry was removed
    fn delete(&self, key: &str) -> ApiResult<bool>;
}

// ==================== KEY LAYOUT ====================

pub mod keys {
    pub const SCORES: &str = "user_scores";
    pub const ACTIVITY: &str = "activity";
    pub const PROFILE: &str = "user_profile";
    pub const PROGRESSION: &str = "progression";

    pub const NAMESPACES: [&str; 4] = [SCORES, ACTIVITY, PROFILE, PROGRESSION];

    pub fn score(user_id: &str, date: &str) -> String {
        format!("{}_{}_{}", SCORES, user_id, date)
    }

    pub fn scores_of(user_id: &str) -> String {
        format!("{}_{}_", SCORES, user_id)
    }

    pub fn all_scores() -> String {
        format!("{}_", SCORES)
    }

    pub fn activity(user_id: &str, activity_id: &str) -> String {
        format!("{}_{}_{}", ACTIVITY, user_id, activity_id)
    }

    pub fn activities_of(user_id: &str) -> String {
        format!("{}_{}_", ACTIVITY, user_id)
    }

    pub fn profile(user_id: &str) -> String {
        format!("{}_{}", PROFILE, user_id)
    }

    pub fn all_profiles() -> String {
        format!("{}_", PROFILE)
    }

    pub fn progression(user_id: &str, game_id: &str) -> String {
        format!("{}_{}_{}", PROGRESSION, user_id, game_id)
    }

    pub fn progression_of(user_id: &str) -> String {
        format!("{}_{}_", PROGRESSION, user_id)
    }

    /// Namespace owning a key (or a prefix that reaches past the namespace),
    /// "" for anything outside the known layout
    pub fn namespace_of(key: &str) -> &'static str {
        NAMESPACES
            .iter()
            .find(|ns| key.len() > ns.len() && key.starts_with(*ns) && key.as_bytes()[ns.len()] == b'_')
            .copied()
            .unwrap_or("")
    }

    /// Namespaces a prefix scan has to visit
    pub fn scan_namespaces(prefix: &str) -> Vec<&'static str> {
        match namespace_of(prefix) {
            "" => NAMESPACES
                .iter()
                .copied()
                .filter(|ns| ns.starts_with(prefix) || prefix.starts_with(*ns))
                .chain(std::iter::once(""))
                .collect(),
            ns => vec![ns],
        }
    }
}

// ==================== TYPED ACCESS ====================

pub fn get_json<T, S>(store: &S, key: &str) -> ApiResult<Option<T>>
where
    T: DeserializeOwned,
    S: ReadStore + ?Sized,
{
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ApiError::upstream(format!("decode {}", key), e)),
        None => Ok(None),
    }
}

pub fn put_json<T, S>(store: &S, key: &str, value: &T) -> ApiResult<()>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value)
        .map_err(|e| ApiError::upstream(format!("encode {}", key), e))?;
    store.set(key, raw)
}

/// Decode every entry under a prefix. Undecodable entries are skipped with a
/// warning so one corrupt blob cannot blank a whole leaderboard.
pub fn scan_json<T, S>(store: &S, prefix: &str) -> ApiResult<Vec<T>>
where
    T: DeserializeOwned,
    S: ReadStore + ?Sized,
{
    let entries = store.scan_prefix(prefix)?;
    let mut decoded = Vec::with_capacity(entries.len());
    for (key, raw) in entries {
        match serde_json::from_str(&raw) {
            Ok(value) => decoded.push(value),
            Err(e) => log::warn!("[STORE] skip undecodable entry key={} err={}", key, e),
        }
    }
    Ok(decoded)
}

// ==================== IN-MEMORY FAKE ====================

#[cfg(test)]
pub mod memory {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::{KeyValueStore, ReadStore};
    use crate::error::{ApiError, ApiResult};

    /// Ordered in-memory store with an optional injected outage
    #[derive(Default)]
    pub struct MemoryStore {
        entries: RefCell<BTreeMap<String, String>>,
        outage: RefCell<Option<String>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every following call fails with `ApiError::Upstream`
        pub fn fail_with(&self, cause: &str) {
            *self.outage.borrow_mut() = Some(cause.to_string());
        }

        pub fn len(&self) -> usize {
            self.entries.borrow().len()
        }

        pub fn raw(&self, key: &str) -> Option<String> {
            self.entries.borrow().get(key).cloned()
        }

        fn check(&self) -> ApiResult<()> {
            match self.outage.borrow().as_ref() {
                Some(cause) => Err(ApiError::upstream("store unavailable", cause)),
                None => Ok(()),
            }
        }
    }

    impl ReadStore for MemoryStore {
        fn get(&self, key: &str) -> ApiResult<Option<String>> {
            self.check()?;
            Ok(self.entries.borrow().get(key).cloned())
        }

        fn scan_prefix(&self, prefix: &str) -> ApiResult<Vec<(String, String)>> {
            self.check()?;
            Ok(self
                .entries
                .borrow()
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }
    }

    impl KeyValueStore for MemoryStore {
        fn set(&self, key: &str, value: String) -> ApiResult<()> {
            self.check()?;
            self.entries.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }

        fn delete(&self, key: &str) -> ApiResult<bool> {
            self.check()?;
            Ok(self.entries.borrow_mut().remove(key).is_some())
        }
    }
}
