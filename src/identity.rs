// Caller resolution.
// The gateway verifies the bearer token and records a session for the
// connection identity; handlers only ever see the resolved Caller.

use spacetimedb::SpacetimeType;

use crate::error::{ApiError, ApiResult};

/// Capability claim carried on the session, set by the gateway from the
/// verified token. Replaces any guessing from email content.
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Admin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners may touch their own records; admins may touch anyone's
    pub fn require_owner_or_admin(&self, user_id: &str) -> ApiResult<()> {
        if self.user_id == user_id || self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "{} cannot modify records of another user",
                short_id(&self.user_id)
            )))
        }
    }
}

/// Resolves the identity behind the current request
pub trait IdentityResolver {
    fn resolve(&self) -> Option<Caller>;

    fn require(&self) -> ApiResult<Caller> {
        self.resolve().ok_or(ApiError::Unauthorized)
    }
}

/// User ids form the key segment right after the namespace and `_` is the
/// key separator, so an id may not contain one (auth ids are UUIDs)
pub fn validate_user_id(user_id: &str) -> ApiResult<()> {
    if user_id.trim().is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }
    if user_id.contains('_') {
        return Err(ApiError::bad_request(format!("userId cannot contain '_': {}", user_id)));
    }
    Ok(())
}

/// First 8 chars of an id, for logs
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}
