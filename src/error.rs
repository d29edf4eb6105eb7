use thiserror::Error;

/// Failure taxonomy for every request handled by the module.
/// Nothing is retried locally; the caller re-issues the request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// No session resolves for the calling identity
    #[error("Unauthorized: no session for caller")]
    Unauthorized,

    /// Caller lacks the capability (admin/gateway, or another user's data)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid fields
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Store read/write or decode failure, with the underlying cause
    #[error("Upstream failure: {message} (cause: {cause})")]
    Upstream { message: String, cause: String },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn upstream(message: impl Into<String>, cause: impl ToString) -> Self {
        ApiError::Upstream {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    /// Client errors are logged at warn, upstream failures at error
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ApiError::Upstream { .. })
    }

    /// Log once and render the message returned from a reducer
    pub fn into_reply(self, tag: &str) -> String {
        if self.is_client_error() {
            log::warn!("[{}] rejected: {}", tag, self);
        } else {
            log::error!("[{}] failed: {}", tag, self);
        }
        self.to_string()
    }
}

/// Reducer boundary: `ApiResult<T>` into the `Result<T, String>` reducers return
pub trait Reply<T> {
    fn reply(self, tag: &str) -> Result<T, String>;
}

impl<T> Reply<T> for ApiResult<T> {
    fn reply(self, tag: &str) -> Result<T, String> {
        self.map_err(|e| e.into_reply(tag))
    }
}
