use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::credentials::{CredentialStorage, CredentialStore};
use super::refresh::{self, await_outcome, Joined, RefreshQueue};
use super::scheduler::RefreshScheduler;
use super::token;
use super::types::{
    AuthSession, LoginRequest, LogoutRequest, RegisterForm, SessionState, TokenPair, UserProfile,
};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::http_client::AuthorizedClient;

const LOGIN_FAILED: &str = "Login failed. Please check your credentials and try again.";
const REGISTER_FAILED: &str = "Registration failed. Please try again.";

/// Session manager
/// Owns the credential store, the refresh timer and the single-flight refresh.
/// Clone is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,

    /// HTTP client for auth endpoints (no interceptors)
    client: Client,

    store: CredentialStore,
    scheduler: RefreshScheduler,
    refresh_queue: RefreshQueue,

    /// Reactive state for UI collaborators
    state: watch::Sender<SessionState>,

    /// Set while a login/register call is running
    authenticating: AtomicBool,
}

/// Clears the login/register flag when the call finishes
struct AuthenticatingGuard<'a>(&'a AtomicBool);

impl Drop for AuthenticatingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SessionManager {
    /// Create a session manager with injected storage and HTTP client
    pub fn new(config: SessionConfig, storage: Arc<dyn CredentialStorage>, client: Client) -> Self {
        let store = CredentialStore::new(storage, config.storage_max_age);
        let scheduler = RefreshScheduler::new(config.refresh_safety_margin);
        let (state, _) = watch::channel(SessionState::loading());

        Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                store,
                scheduler,
                refresh_queue: RefreshQueue::new(),
                state,
                authenticating: AtomicBool::new(false),
            }),
        }
    }

    /// Create a session manager with an HTTP client built from the config
    pub fn from_config(config: SessionConfig, storage: Arc<dyn CredentialStorage>) -> anyhow::Result<Self> {
        let client = config.build_http_client()?;
        Ok(Self::new(config, storage, client))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.inner.client
    }

    /// Persisted credentials; UI code should go through the session API instead
    pub fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    /// HTTP client that authorizes requests with this session
    pub fn client(&self) -> AuthorizedClient {
        AuthorizedClient::new(self.clone())
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.store.get_access_token()
    }

    /// Cached profile; `None` without a stored access token
    pub fn cached_user(&self) -> Option<UserProfile> {
        self.inner.store.get_user()
    }

    /// Token present and its `exp` claim still in the future
    pub fn is_authenticated(&self) -> bool {
        match self.inner.store.get_access_token() {
            Some(token) => !token::is_expired_at(&token, Utc::now()),
            None => false,
        }
    }

    /// Current session state snapshot
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every session state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    fn publish(&self, state: SessionState) {
        self.inner.state.send_replace(state);
    }

    /// Restore a persisted session at startup
    pub async fn initialize(&self) -> Result<SessionState> {
        if self.is_authenticated() {
            if let (Some(user), Some(token)) = (self.cached_user(), self.access_token()) {
                tracing::info!(user_id = %user.id, "Restored persisted session");
                self.start_timer(&token).await;
                let state = SessionState::signed_in(user);
                self.publish(state.clone());
                return Ok(state);
            }
        }

        tracing::debug!("No valid persisted session, clearing local state");
        self.logout().await?;
        Ok(self.state())
    }

    /// Sign in with email and password
    pub async fn login(&self, credentials: LoginRequest) -> Result<AuthSession> {
        let _guard = self.begin_authentication()?;
        tracing::info!(email = %credentials.email, "Logging in...");

        let url = self.inner.config.url(&self.inner.config.endpoints.login);
        let request = self.inner.client.post(&url).json(&credentials);
        let result = self.authenticate(request, LOGIN_FAILED).await;
        self.finish_authentication(result).await
    }

    /// Create an account from the multi-step form and sign in
    pub async fn register(&self, form: RegisterForm) -> Result<AuthSession> {
        let (body, referral_code) = form.into_request()?;
        let _guard = self.begin_authentication()?;
        tracing::info!(email = %body.email, role = ?body.role, "Registering account...");

        let url = self.inner.config.url(&self.inner.config.endpoints.register);
        let mut request = self.inner.client.post(&url).json(&body);
        if let Some(ref code) = referral_code {
            request = request.query(&[("referralCode", code)]);
        }

        let result = self.authenticate(request, REGISTER_FAILED).await;
        self.finish_authentication(result).await
    }

    /// Notify the server (best effort) and always clear the local session
    pub async fn logout(&self) -> Result<()> {
        if let Some(access_token) = self.inner.store.get_access_token() {
            let url = self.inner.config.url(&self.inner.config.endpoints.logout);
            let body = LogoutRequest {
                refresh_token: self.inner.store.get_refresh_token(),
                access_token: access_token.clone(),
            };

            match self
                .inner
                .client
                .post(&url)
                .bearer_auth(&access_token)
                .json(&body)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!("Server acknowledged logout");
                }
                Ok(response) => {
                    tracing::warn!(status = %response.status(), "Server logout failed, clearing local session anyway");
                }
                Err(e) => {
                    tracing::warn!("Logout request failed, clearing local session anyway: {}", e);
                }
            }
        }

        self.clear_local(SessionState::signed_out()).await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Terminate the session after a refresh or retry failure
    pub(crate) async fn expire_session(&self, reason: &str) {
        tracing::warn!("Session terminated: {}", reason);
        if let Err(e) = self.clear_local(SessionState::expired()).await {
            tracing::error!("Failed to clear expired session: {}", e);
        }
    }

    async fn clear_local(&self, state: SessionState) -> Result<()> {
        let cleared = self.inner.store.clear();
        self.inner.scheduler.stop().await;
        self.publish(state);
        cleared.map_err(SessionError::from)
    }

    /// Refresh the access token, sharing one exchange among concurrent callers.
    ///
    /// The exchange runs in its own task so it completes even if every caller
    /// gives up waiting.
    pub fn refresh(&self) -> BoxFuture<'static, Result<String>> {
        self.refresh_replacing(None)
    }

    /// Refresh on behalf of a request rejected with `stale`.
    /// A token stored since then is handed back without another exchange.
    pub(crate) fn refresh_replacing(&self, stale: Option<String>) -> BoxFuture<'static, Result<String>> {
        let manager = self.clone();
        Box::pin(async move {
            match manager.inner.refresh_queue.join().await {
                Joined::Leader(rx) => {
                    let leader = manager.clone();
                    tokio::spawn(async move { leader.run_refresh(stale).await });
                    await_outcome(rx).await
                }
                Joined::Waiter(rx) => await_outcome(rx).await,
            }
        })
    }

    async fn run_refresh(&self, stale: Option<String>) {
        if let (Some(stale), Some(current)) = (stale, self.access_token()) {
            if stale != current {
                tracing::debug!("Access token already replaced, skipping exchange");
                self.inner.refresh_queue.settle(Ok(current)).await;
                return;
            }
        }

        let outcome = match self.exchange_and_store().await {
            Ok(tokens) => {
                self.start_timer(&tokens.access_token).await;
                Ok(tokens.access_token)
            }
            Err(e) => {
                let err = match e {
                    SessionError::SessionExpired(_) => e,
                    other => SessionError::SessionExpired(other.to_string()),
                };
                tracing::error!("Token refresh failed: {}", err);
                self.expire_session(&err.to_string()).await;
                Err(err)
            }
        };

        let waiters = self.inner.refresh_queue.settle(outcome).await;
        tracing::debug!(waiters, "Token refresh settled");
    }

    async fn exchange_and_store(&self) -> Result<TokenPair> {
        let refresh_token = self
            .inner
            .store
            .get_refresh_token()
            .ok_or_else(|| SessionError::SessionExpired("no refresh token stored".to_string()))?;

        let url = self.inner.config.url(&self.inner.config.endpoints.refresh);
        let tokens = refresh::exchange_refresh_token(&self.inner.client, &url, &refresh_token).await?;
        self.inner.store.set_tokens(&tokens)?;
        Ok(tokens)
    }

    /// Schedule the silent refresh for `access_token`, replacing any pending one
    pub async fn start_timer(&self, access_token: &str) {
        let expires_at = match token::expires_at(access_token) {
            Ok(exp) => exp,
            Err(e) => {
                tracing::warn!("Not scheduling token refresh: {}", e);
                self.inner.scheduler.stop().await;
                return;
            }
        };

        let delay = self.inner.scheduler.delay_until(expires_at);
        tracing::debug!(
            token = token::preview(access_token),
            expires_at = %expires_at.to_rfc3339(),
            "Starting refresh timer"
        );

        let session = Arc::downgrade(&self.inner);
        self.inner
            .scheduler
            .schedule(delay, async move {
                let Some(inner) = session.upgrade() else {
                    return;
                };
                let manager = SessionManager { inner };
                if let Err(e) = manager.refresh().await {
                    tracing::warn!("Scheduled token refresh failed: {}", e);
                }
            })
            .await;
    }

    pub async fn stop_timer(&self) {
        self.inner.scheduler.stop().await;
    }

    /// Whether a silent refresh is scheduled
    pub async fn has_pending_refresh(&self) -> bool {
        self.inner.scheduler.is_pending().await
    }

    /// Fetch the profile from the backend and refresh the cached copy
    pub async fn current_user(&self) -> Option<UserProfile> {
        let path = self.inner.config.endpoints.me.clone();
        match self.client().get_json::<UserProfile>(&path).await {
            Ok(user) => {
                if let Err(e) = self.update_user(user.clone()) {
                    tracing::warn!("Failed to cache fetched profile: {}", e);
                }
                Some(user)
            }
            Err(e) => {
                tracing::debug!("Could not fetch current user: {}", e);
                None
            }
        }
    }

    /// Replace the cached profile and republish the session state
    pub fn update_user(&self, user: UserProfile) -> Result<()> {
        if self.inner.store.get_access_token().is_none() {
            return Ok(());
        }
        self.inner.store.set_user(&user)?;
        self.publish(SessionState::signed_in(user));
        Ok(())
    }

    fn begin_authentication(&self) -> Result<AuthenticatingGuard<'_>> {
        if self.inner.authenticating.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AuthenticationInProgress);
        }
        Ok(AuthenticatingGuard(&self.inner.authenticating))
    }

    /// Send a login/register request and split the response
    async fn authenticate(&self, request: RequestBuilder, fallback: &str) -> Result<AuthSession> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Authentication rejected");
            return Err(SessionError::InvalidCredentials(
                server_message(&body).unwrap_or_else(|| fallback.to_string()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SessionError::InvalidResponse(format!("Failed to parse auth response: {}", e)))?;
        AuthSession::from_response(body)
    }

    async fn finish_authentication(&self, result: Result<AuthSession>) -> Result<AuthSession> {
        let session = match result {
            Ok(session) => session,
            Err(e) => {
                // Leave no partial credentials behind
                if let Err(clear_err) = self.clear_local(SessionState::signed_out()).await {
                    tracing::error!("Failed to clear credentials: {}", clear_err);
                }
                return Err(e);
            }
        };

        if let Err(e) = self
            .inner
            .store
            .set_credentials(&session.tokens, &session.user)
        {
            if let Err(clear_err) = self.clear_local(SessionState::signed_out()).await {
                tracing::error!("Failed to clear credentials: {}", clear_err);
            }
            return Err(e.into());
        }

        self.start_timer(&session.tokens.access_token).await;
        self.publish(SessionState::signed_in(session.user.clone()));
        tracing::info!(user_id = %session.user.id, "✅ Authentication successful");
        Ok(session)
    }
}

/// Extract a user-facing message from an error body
fn server_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}
