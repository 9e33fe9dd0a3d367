// Authenticated request coordinator with single-flight token refresh

use crate::error::{ApiBody, ClientError, Result};
use crate::token_store::TokenStore;
use crate::types::{TokenPair, UnauthorizedReason, UserRead};
use async_singleflight::Group;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Backend base URL, without a trailing slash
    pub base_url: String,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Read the base URL from `HOMEWIDGET_API_BASE_URL`, defaulting to the
    /// local development backend.
    pub fn from_env() -> Self {
        let base_url = std::env::var("HOMEWIDGET_API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        Self::new(base_url)
    }
}

/// Observer interface through which the session layer owns the in-memory
/// access token and reacts to authorization outcomes.
///
/// The client only ever *reads* the access token via [`access_token`] and
/// learns of replacements through [`on_token_refreshed`]; it never stores
/// one itself.
///
/// [`access_token`]: SessionHooks::access_token
/// [`on_token_refreshed`]: SessionHooks::on_token_refreshed
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Current in-memory access token, if any.
    fn access_token(&self) -> Option<String> {
        None
    }

    /// A refresh succeeded; `access` replaces the previous in-memory token.
    async fn on_token_refreshed(&self, _access: &str, _refresh: &str) {}

    /// An authorization cycle failed; see [`UnauthorizedReason`] for the
    /// per-reason session consequences.
    async fn on_unauthorized(&self, _reason: UnauthorizedReason) {}
}

/// Reconfiguration options for [`ApiClient::configure`]. Unset fields leave
/// the current value untouched.
#[derive(Default)]
pub struct ConfigureOptions {
    pub base_url: Option<String>,
    pub hooks: Option<Arc<dyn SessionHooks>>,
}

/// Per-request headers and body.
///
/// The body is held as raw bytes so a request can be re-sent once after a
/// token refresh.
#[derive(Default)]
pub struct RequestOptions {
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Replaces any previous value for the same name,
    /// including defaults set by [`RequestOptions::json`].
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attach a JSON body, setting `Content-Type: application/json` unless
    /// the caller already provided a content type.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_vec(body)?);
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        Ok(self)
    }
}

struct Shared {
    base_url: String,
    hooks: Option<Arc<dyn SessionHooks>>,
}

/// Authenticated API client with single-flight token refresh
///
/// One instance per application session; reconfigurable via
/// [`configure`](ApiClient::configure). On a 401 the client coordinates
/// exactly one refresh cycle across all concurrent callers, retries the
/// failed request once, and reports terminal failures through
/// [`SessionHooks::on_unauthorized`].
pub struct ApiClient {
    http: Client,
    store: Arc<dyn TokenStore>,
    shared: RwLock<Shared>,
    /// Singleflight group so N concurrent 401s trigger a single refresh call.
    /// Error type is String because singleflight requires a shared error type.
    refresh_singleflight: Group<String, String>,
}

impl ApiClient {
    /// Create a new client against `config.base_url`, persisting refresh
    /// tokens through `store`.
    pub fn new(config: ApiClientConfig, store: Arc<dyn TokenStore>) -> Arc<Self> {
        Arc::new(Self {
            http: Client::new(),
            store,
            shared: RwLock::new(Shared {
                base_url: config.base_url,
                hooks: None,
            }),
            refresh_singleflight: Group::new(),
        })
    }

    /// Override base URL and/or session hooks. Idempotent; never resets
    /// in-flight refresh state.
    pub fn configure(&self, options: ConfigureOptions) {
        let mut shared = self.shared.write().unwrap();
        if let Some(base_url) = options.base_url {
            shared.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(hooks) = options.hooks {
            shared.hooks = Some(hooks);
        }
    }

    /// The token store backing this client (for advanced usage).
    pub fn token_store(&self) -> Arc<dyn TokenStore> {
        Arc::clone(&self.store)
    }

    fn base_url(&self) -> String {
        self.shared.read().unwrap().base_url.clone()
    }

    fn hooks(&self) -> Option<Arc<dyn SessionHooks>> {
        self.shared.read().unwrap().hooks.clone()
    }

    fn current_access_token(&self) -> Option<String> {
        self.hooks().and_then(|h| h.access_token())
    }

    async fn notify_unauthorized(&self, reason: UnauthorizedReason) {
        warn!(reason = %reason, "unauthorized");
        if let Some(hooks) = self.hooks() {
            hooks.on_unauthorized(reason).await;
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        opts: &RequestOptions,
        access: Option<&str>,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        let mut headers = opts.headers.clone();
        // Authorization goes on last, via insert so it replaces any
        // caller-supplied value instead of being appended next to it
        if let Some(token) = access {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ClientError::Configuration(format!("invalid access token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let mut req = self.http.request(method, &url).headers(headers);
        if let Some(body) = &opts.body {
            req = req.body(body.clone());
        }
        Ok(req.send().await?)
    }

    /// Perform one logical request attempt.
    ///
    /// A 401 triggers the refresh protocol and at most one retry; the final
    /// response is returned in all cases so the caller can inspect status
    /// and body. Never returns `Err` for 401/403 handling itself, only for
    /// transport failures.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<Response> {
        debug!(method = %method, path = %path, "dispatching request");
        let access = self.current_access_token();
        let res = self.send(method.clone(), path, &opts, access.as_deref()).await?;

        if res.status() == StatusCode::UNAUTHORIZED {
            if !self.ensure_refreshed().await {
                // Failure reason already reported during the refresh flight;
                // the caller gets the original 401 back unmodified.
                return Ok(res);
            }

            let access = self.current_access_token();
            let retry = self.send(method, path, &opts, access.as_deref()).await?;
            if retry.status() == StatusCode::UNAUTHORIZED
                || retry.status() == StatusCode::FORBIDDEN
            {
                // Fresh token was rejected: the session is not usable.
                warn!(status = %retry.status(), path = %path, "request rejected after refresh");
                self.store.clear().await;
                self.notify_unauthorized(UnauthorizedReason::Unauthorized).await;
            }
            return Ok(retry);
        }

        if res.status() == StatusCode::FORBIDDEN {
            // Authorization (not authentication) failure: session stays valid
            self.notify_unauthorized(UnauthorizedReason::Forbidden).await;
        }

        Ok(res)
    }

    /// Perform a request and decode the response body as JSON.
    ///
    /// Non-2xx final responses and unparseable 2xx bodies become
    /// [`ClientError::Api`]; an empty 2xx body decodes as JSON `null` so
    /// `()` and `Option<T>` targets work for 204-style endpoints.
    pub async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> Result<T> {
        let res = self.request(method, path, opts).await?;
        decode_json(res).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(Method::GET, path, RequestOptions::new()).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.json(Method::POST, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.json(Method::PUT, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(Method::DELETE, path, RequestOptions::new()).await
    }

    /// Coordinate a token refresh across concurrent callers.
    ///
    /// Whichever caller arrives first performs the refresh; everyone who
    /// observes a 401 while it is in flight awaits the same outcome. The
    /// flight slot clears once the attempt settles, so a later 401 episode
    /// can start a new cycle.
    async fn ensure_refreshed(&self) -> bool {
        let key = self.base_url();
        let (access, _err, _shared) = self
            .refresh_singleflight
            .work(&key, async {
                self.refresh_flight().await.map_err(|reason| {
                    warn!(reason = %reason, "token refresh failed");
                    reason.to_string()
                })
            })
            .await;
        access.is_some()
    }

    /// The actual refresh attempt; runs at most once per flight.
    ///
    /// Reports the failure reason through the hooks before returning, so
    /// joined callers never need to re-report it.
    async fn refresh_flight(&self) -> std::result::Result<String, UnauthorizedReason> {
        let Some(refresh) = self.store.get().await else {
            self.notify_unauthorized(UnauthorizedReason::NoToken).await;
            return Err(UnauthorizedReason::NoToken);
        };

        let url = format!("{}/api/auth/refresh", self.base_url());
        let res = match self
            .http
            .post(&url)
            .json(&json!({ "refresh_token": refresh }))
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                // The stored token may still be valid; keep it so a later
                // attempt can succeed once the network recovers.
                warn!(error = %e, "refresh transport failure");
                self.notify_unauthorized(UnauthorizedReason::RefreshFailed).await;
                return Err(UnauthorizedReason::RefreshFailed);
            }
        };

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.notify_unauthorized(UnauthorizedReason::RefreshRateLimited).await;
            return Err(UnauthorizedReason::RefreshRateLimited);
        }
        if !status.is_success() {
            warn!(status = %status, "refresh rejected");
            self.store.clear().await;
            self.notify_unauthorized(UnauthorizedReason::RefreshFailed).await;
            return Err(UnauthorizedReason::RefreshFailed);
        }

        let pair: TokenPair = match res.json().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "refresh response was not a token pair");
                self.notify_unauthorized(UnauthorizedReason::RefreshFailed).await;
                return Err(UnauthorizedReason::RefreshFailed);
            }
        };

        // Rotation: the old refresh token is superseded and never reused
        self.store.set(pair.refresh_token.clone()).await;
        if let Some(hooks) = self.hooks() {
            hooks.on_token_refreshed(&pair.access_token, &pair.refresh_token).await;
        }
        info!("access token refreshed");
        Ok(pair.access_token)
    }
}

/// Auth endpoint wrappers.
///
/// `login`, `register` and `refresh_session` talk to the backend directly:
/// they are unauthenticated calls whose 401s mean "bad input", not "stale
/// access token", so they must never enter the refresh protocol.
impl ApiClient {
    /// `POST /api/auth/login` (form-encoded). Persists the returned refresh
    /// token on success; the access token is the caller's to hold.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let url = format!("{}/api/auth/login", self.base_url());
        let res = self
            .http
            .post(&url)
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;
        let pair: TokenPair = decode_json(res).await?;
        self.store.set(pair.refresh_token.clone()).await;
        info!("login succeeded");
        Ok(pair)
    }

    /// `POST /api/auth/register`. No session or store side effects.
    pub async fn register(&self, email: &str, password: &str) -> Result<UserRead> {
        let url = format!("{}/api/auth/register", self.base_url());
        let res = self
            .http
            .post(&url)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        decode_json(res).await
    }

    /// Explicit refresh cycle for session bootstrap, distinct from the
    /// internal 401-triggered refresh: failures surface as `Err` instead of
    /// hook callbacks. Persists the rotated refresh token on success.
    pub async fn refresh_session(&self) -> Result<TokenPair> {
        let Some(refresh) = self.store.get().await else {
            return Err(ClientError::Authentication(
                "no refresh token available".to_string(),
            ));
        };
        let url = format!("{}/api/auth/refresh", self.base_url());
        let res = self
            .http
            .post(&url)
            .json(&json!({ "refresh_token": refresh }))
            .send()
            .await?;
        let pair: TokenPair = decode_json(res).await?;
        self.store.set(pair.refresh_token.clone()).await;
        info!("session refresh succeeded");
        Ok(pair)
    }

    /// `GET /api/auth/me` — authenticated, full request protocol.
    pub async fn me(&self) -> Result<UserRead> {
        self.get("/api/auth/me").await
    }

    /// `POST /api/auth/logout` — authenticated, best-effort, 204 expected.
    pub async fn logout(&self) -> Result<()> {
        self.json(Method::POST, "/api/auth/logout", RequestOptions::new())
            .await
    }
}

async fn decode_json<T: DeserializeOwned>(res: Response) -> Result<T> {
    let status = res.status().as_u16();
    let text = res.text().await?;
    if !(200..300).contains(&status) {
        return Err(ClientError::from_response(status, text));
    }
    if text.is_empty() {
        return serde_json::from_slice(b"null").map_err(|e| ClientError::Api {
            status,
            body: ApiBody::Empty,
            message: format!("empty response body: {e}"),
        });
    }
    serde_json::from_str(&text).map_err(|e| ClientError::Api {
        status,
        body: ApiBody::Text(text),
        message: format!("invalid response body: {e}"),
    })
}
