//! Wire and session type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access/refresh token pair as returned by the login and refresh endpoints.
///
/// `token_type`, `expires_in` and `role` are informational and tolerated as
/// absent so older backends keep working.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Authenticated user profile (`GET /api/auth/me`).
#[derive(Debug, Clone, Deserialize)]
pub struct UserRead {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub created_at: String,
    pub role: Role,
}

/// User role attached by the backend; read-only on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Demo,
    Common,
    Premium,
}

/// Session status driving routing decisions in the embedding UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Checking,
    Authenticated,
    Unauthenticated,
}

/// Categorized reason for a failed authorization cycle, reported through
/// [`SessionHooks::on_unauthorized`](crate::api_client::SessionHooks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnauthorizedReason {
    /// No persisted refresh token was available when a refresh was needed.
    NoToken,
    /// Refresh succeeded but the retried request was still rejected.
    Unauthorized,
    /// The refresh call itself failed with a non-429 error.
    RefreshFailed,
    /// The refresh endpoint answered 429.
    RefreshRateLimited,
    /// 403 on a regular request; the session itself stays valid.
    Forbidden,
}

impl fmt::Display for UnauthorizedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnauthorizedReason::NoToken => "no_token",
            UnauthorizedReason::Unauthorized => "unauthorized",
            UnauthorizedReason::RefreshFailed => "refresh_failed",
            UnauthorizedReason::RefreshRateLimited => "refresh_rate_limited",
            UnauthorizedReason::Forbidden => "forbidden",
        };
        f.write_str(s)
    }
}

/// One-shot UI notice emitted by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    SessionExpired,
    RateLimited,
    Forbidden,
}
