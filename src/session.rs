//! Session state machine
//!
//! Owns the in-memory access token, user profile and role, and drives the
//! `checking -> authenticated | unauthenticated` status the embedding UI
//! routes on. Wired into [`ApiClient`] as its [`SessionHooks`] observer, so
//! every authorization outcome the coordinator reports lands here.

use crate::api_client::{ApiClient, ConfigureOptions, SessionHooks};
use crate::error::{ClientError, Result};
use crate::token_store::TokenStore;
use crate::types::{Notice, Role, SessionStatus, UnauthorizedReason, UserRead};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const MSG_SESSION_EXPIRED: &str = "Session expired. Please log in again.";
const MSG_RATE_LIMITED: &str = "Too many requests. Please try again later.";
const MSG_FORBIDDEN: &str = "You do not have permission for this action.";

#[derive(Default)]
struct SessionState {
    access_token: Option<String>,
    user: Option<UserRead>,
    role: Option<Role>,
    error: Option<String>,
}

struct SessionInner {
    store: Arc<dyn TokenStore>,
    state: RwLock<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    notice_tx: broadcast::Sender<Notice>,
}

impl SessionInner {
    fn set_status(&self, status: SessionStatus) {
        debug!(status = ?status, "session status");
        self.status_tx.send_replace(status);
    }

    fn set_error(&self, message: impl Into<String>) {
        self.state.write().unwrap().error = Some(message.into());
    }

    fn set_access_token(&self, token: Option<String>) {
        self.state.write().unwrap().access_token = token;
    }

    fn notify(&self, notice: Notice) {
        // Nobody listening is fine; notices are fire-and-forget
        let _ = self.notice_tx.send(notice);
    }

    /// Hard reset: drop tokens, profile and role, land in `Unauthenticated`.
    /// The last error text is kept so the UI can still show it.
    async fn reset_unauthenticated(&self) {
        self.store.clear().await;
        {
            let mut state = self.state.write().unwrap();
            state.access_token = None;
            state.user = None;
            state.role = None;
        }
        self.set_status(SessionStatus::Unauthenticated);
    }
}

#[async_trait]
impl SessionHooks for SessionInner {
    fn access_token(&self) -> Option<String> {
        self.state.read().unwrap().access_token.clone()
    }

    async fn on_token_refreshed(&self, access: &str, _refresh: &str) {
        // Status is untouched: a refresh only replaces the access token
        self.set_access_token(Some(access.to_string()));
    }

    async fn on_unauthorized(&self, reason: UnauthorizedReason) {
        warn!(reason = %reason, "session received unauthorized");
        match reason {
            UnauthorizedReason::Forbidden => {
                // Session stays valid; the action was denied by role/ACL
                self.set_error(MSG_FORBIDDEN);
                self.notify(Notice::Forbidden);
            }
            UnauthorizedReason::RefreshRateLimited => {
                self.set_error(MSG_RATE_LIMITED);
                self.notify(Notice::RateLimited);
                self.reset_unauthenticated().await;
            }
            UnauthorizedReason::RefreshFailed
            | UnauthorizedReason::Unauthorized
            | UnauthorizedReason::NoToken => {
                self.set_error(MSG_SESSION_EXPIRED);
                self.notify(Notice::SessionExpired);
                self.reset_unauthenticated().await;
            }
        }
    }
}

/// Client-side authentication session.
///
/// Cheap to clone; all clones share the same state. Create with
/// [`Session::attach`], which installs the session as the client's hooks.
#[derive(Clone)]
pub struct Session {
    client: Arc<ApiClient>,
    inner: Arc<SessionInner>,
}

impl Session {
    /// Build a session on top of `client` and register it as the client's
    /// [`SessionHooks`] observer. Status starts as `Checking` until
    /// [`bootstrap`](Session::bootstrap) settles it.
    pub fn attach(client: Arc<ApiClient>) -> Session {
        let (status_tx, _) = watch::channel(SessionStatus::Checking);
        let (notice_tx, _) = broadcast::channel(16);
        let inner = Arc::new(SessionInner {
            store: client.token_store(),
            state: RwLock::new(SessionState::default()),
            status_tx,
            notice_tx,
        });
        client.configure(ConfigureOptions {
            hooks: Some(Arc::clone(&inner) as Arc<dyn SessionHooks>),
            ..Default::default()
        });
        Session { client, inner }
    }

    /// Restore a previous session on process start.
    ///
    /// No stored refresh token settles to `Unauthenticated` without any
    /// network call. Otherwise one explicit refresh cycle runs; on success
    /// the profile is loaded and the session becomes `Authenticated`.
    pub async fn bootstrap(&self) {
        self.inner.set_status(SessionStatus::Checking);
        self.clear_error();

        if self.inner.store.get().await.is_none() {
            self.inner.reset_unauthenticated().await;
            return;
        }

        if self.refresh().await {
            self.load_me().await;
            self.inner.set_status(SessionStatus::Authenticated);
            return;
        }

        self.inner.reset_unauthenticated().await;
    }

    /// One explicit refresh cycle. Returns whether a new access token was
    /// obtained; a 429 sets the rate-limit error text.
    pub async fn refresh(&self) -> bool {
        match self.client.refresh_session().await {
            Ok(pair) => {
                self.inner.set_access_token(Some(pair.access_token));
                true
            }
            Err(e) => {
                warn!(status = ?e.status(), "session refresh failed");
                if e.status() == Some(429) {
                    self.inner.set_error(MSG_RATE_LIMITED);
                }
                false
            }
        }
    }

    /// Load the user profile into the session. Failures only set the error
    /// text; an unauthorized cause additionally resets the session through
    /// the hooks.
    pub async fn load_me(&self) {
        match self.client.me().await {
            Ok(user) => {
                let mut state = self.inner.state.write().unwrap();
                state.role = Some(user.role);
                state.user = Some(user);
            }
            Err(e) => {
                warn!(error = %e, "could not load profile");
                self.inner.set_error(e.to_string());
            }
        }
    }

    /// Authenticate with email and password.
    ///
    /// On success the profile is loaded before the status flips, so
    /// observers see consistent user/role values the moment the session
    /// reports `Authenticated`. On failure the error text is set per status
    /// and the error is returned so form code can react; status is
    /// unchanged.
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        self.clear_error();
        match self.client.login(email, password).await {
            Ok(pair) => {
                self.inner.set_access_token(Some(pair.access_token));
                self.load_me().await;
                self.inner.set_status(SessionStatus::Authenticated);
                Ok(())
            }
            Err(e) => {
                self.inner.set_error(match e.status() {
                    Some(401) => "Email or password is incorrect.",
                    Some(400) | Some(422) => "Input is incomplete or invalid.",
                    _ => "Login failed.",
                });
                Err(e)
            }
        }
    }

    /// Create an account. Never changes session state; error text is
    /// differentiated for duplicate email and validation failures.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserRead> {
        self.clear_error();
        match self.client.register(email, password).await {
            Ok(user) => Ok(user),
            Err(e) => {
                self.inner.set_error(match e.status() {
                    Some(409) => "Email is already registered.".to_string(),
                    Some(400) | Some(422) => validation_message(&e),
                    _ => "Registration failed.".to_string(),
                });
                Err(e)
            }
        }
    }

    /// End the session. The server call is best-effort; local cleanup is
    /// unconditional, so calling this repeatedly is safe and always leaves
    /// the session `Unauthenticated` with no stored refresh token.
    pub async fn logout(&self) {
        if let Err(e) = self.client.logout().await {
            warn!(error = %e, "logout request failed; clearing session anyway");
        }
        self.inner.reset_unauthenticated().await;
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch channel carrying the session status; drives routing.
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// One-shot UI notices (session expired, rate limited, forbidden).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notice_tx.subscribe()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.state.read().unwrap().access_token.clone()
    }

    pub fn user(&self) -> Option<UserRead> {
        self.inner.state.read().unwrap().user.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.inner.state.read().unwrap().role
    }

    pub fn error(&self) -> Option<String> {
        self.inner.state.read().unwrap().error.clone()
    }

    pub fn is_demo(&self) -> bool {
        self.role() == Some(Role::Demo)
    }

    pub fn is_common(&self) -> bool {
        self.role() == Some(Role::Common)
    }

    pub fn is_premium(&self) -> bool {
        self.role() == Some(Role::Premium)
    }

    fn clear_error(&self) {
        self.inner.state.write().unwrap().error = None;
    }
}

/// Best-effort validation message from a 400/422 body (`detail` string),
/// falling back to a generic text when the body carries no usable message.
fn validation_message(e: &ClientError) -> String {
    match e {
        ClientError::Api { message, .. } if !message.starts_with("HTTP ") => message.clone(),
        _ => "Invalid input.".to_string(),
    }
}
