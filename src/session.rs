//! Session manager: startup hydration, login, logout and silent refresh

use crate::api::{self, ApiClient};
use crate::config::SessionConfig;
use crate::error::{ClientError, Result, DEFAULT_LOGIN_ERROR};
use crate::inactivity::{ActivityEvent, ExpiryHook, InactivityMonitor, MonitorPhase};
use crate::refresh::RefreshCoordinator;
use crate::token_store::TokenStore;
use crate::types::{AuthTokens, DataResponse, LoginRequest, LoginResponse, RoleFlags, User};
use crate::validator;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const CURRENT_USER_PATH: &str = "/api/v1/users";

/// Why the last session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    Requested,
    Inactivity,
    RefreshFailed,
    UserFetchFailed,
    /// An authenticated request was answered with 401
    Unauthorized,
    /// Startup hydration failed for another reason
    InitFailed,
}

impl LogoutReason {
    fn from_error(err: &ClientError) -> Self {
        match err {
            ClientError::RefreshFailed(_) | ClientError::NoRefreshToken => {
                LogoutReason::RefreshFailed
            }
            ClientError::UserFetchFailed(_) => LogoutReason::UserFetchFailed,
            ClientError::Unauthorized => LogoutReason::Unauthorized,
            _ => LogoutReason::InitFailed,
        }
    }
}

/// Snapshot of the session published to observers
#[derive(Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub authenticated: bool,
    pub roles: RoleFlags,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub logout_reason: Option<LogoutReason>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("user", &self.user)
            .field("authenticated", &self.authenticated)
            .field("roles", &self.roles)
            .field("last_activity_at", &self.last_activity_at)
            .field("logout_reason", &self.logout_reason)
            .finish()
    }
}

/// Owns the session of one console backend
///
/// Built behind an `Arc` so timer and 401 callbacks can reach it weakly; a
/// dropped manager makes them no-ops.
pub struct SessionManager {
    config: SessionConfig,
    /// Token store scope, the backend origin
    scope: String,
    token_store: TokenStore,
    api: ApiClient,
    refresher: RefreshCoordinator,
    monitor: InactivityMonitor,
    state: watch::Sender<Session>,
    ready: watch::Sender<bool>,
    init_once: OnceCell<()>,
    weak_self: Weak<SessionManager>,
}

impl SessionManager {
    /// Create a session manager, opening the persisted token store if the
    /// configuration names one.
    pub fn new(config: SessionConfig) -> Result<Arc<Self>> {
        let token_store = match config.storage_path() {
            Some(path) => TokenStore::open(path.clone())?,
            None => TokenStore::new(),
        };
        Self::with_token_store(config, token_store)
    }

    pub fn with_token_store(config: SessionConfig, token_store: TokenStore) -> Result<Arc<Self>> {
        config.validate()?;
        let http_client = Client::builder().timeout(config.request_timeout()).build()?;
        let scope = config.base_url().to_string();

        Ok(Arc::new_cyclic(|weak_self: &Weak<Self>| {
            let hook_ref = weak_self.clone();
            let api = ApiClient::new(config.base_url(), http_client).with_unauthorized_hook(
                Arc::new(move || {
                    if let Some(session) = hook_ref.upgrade() {
                        session.end_session(LogoutReason::Unauthorized);
                    }
                }),
            );
            let refresher =
                RefreshCoordinator::new(scope.clone(), token_store.clone(), api.clone());
            let monitor = InactivityMonitor::new(config.inactivity_time(), config.warning_time());
            let (state, _) = watch::channel(Session::default());
            let (ready, _) = watch::channel(false);

            Self {
                config,
                scope,
                token_store,
                api,
                refresher,
                monitor,
                state,
                ready,
                init_once: OnceCell::new(),
                weak_self: weak_self.clone(),
            }
        }))
    }

    /// Restore the session from persisted tokens.
    ///
    /// Runs once; later and concurrent calls wait for that run. Never fails:
    /// any problem leaves the session logged out. Returns whether the session
    /// is authenticated afterwards.
    pub async fn init(&self) -> bool {
        self.init_once
            .get_or_init(|| async {
                let epoch = self.refresher.epoch();
                match self.hydrate(epoch).await {
                    Ok(true) => info!(scope = %self.scope, "Session restored"),
                    Ok(false) => debug!(scope = %self.scope, "No stored session"),
                    Err(e) if self.refresher.epoch() != epoch => {
                        debug!(scope = %self.scope, error = %e, "Session ended during startup");
                    }
                    Err(e) => {
                        warn!(
                            scope = %self.scope,
                            error = %e,
                            "Session initialization failed, continuing logged out"
                        );
                        self.end_session(LogoutReason::from_error(&e));
                    }
                }
                self.ready.send_replace(true);
            })
            .await;

        self.is_authenticated()
    }

    async fn hydrate(&self, epoch: u64) -> Result<bool> {
        let Some(tokens) = self.token_store.load(&self.scope) else {
            return Ok(false);
        };

        let access_token = match validator::check_at(&tokens.access_token, Utc::now()) {
            Ok(()) => tokens.access_token,
            Err(e) if e.is_token_error() => {
                debug!(
                    scope = %self.scope,
                    reason = %e,
                    "Stored access token unusable, refreshing"
                );
                self.refresher.refresh().await?
            }
            Err(e) => return Err(e),
        };
        self.api.set_bearer(&access_token);

        let user = match self.token_store.load_user(&self.scope).filter(User::is_complete) {
            Some(user) => user,
            None => {
                let user = self.fetch_current_user(&access_token).await?;
                if self.refresher.epoch() != epoch {
                    return Ok(false);
                }
                self.token_store.save_user(&self.scope, &user)?;
                user
            }
        };

        let refresh_token = self.token_store.refresh_token(&self.scope);
        self.establish(access_token, refresh_token, user);
        Ok(true)
    }

    async fn fetch_current_user(&self, access_token: &str) -> Result<User> {
        self.api
            .get_with_token::<User>(CURRENT_USER_PATH, access_token)
            .await
            .map_err(|e| ClientError::UserFetchFailed(e.to_string()))
    }

    /// Log in with email and password.
    ///
    /// Errors are returned untouched and leave the current state as it was;
    /// use [`ClientError::display_message`] for the text to show.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let response = self
            .api
            .post_unauthenticated(LOGIN_PATH, &LoginRequest { email, password })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = api::error_message(response).await;
            warn!(scope = %self.scope, status = %status, "Login rejected");
            return Err(if status.is_client_error() {
                ClientError::InvalidCredentials(
                    message.unwrap_or_else(|| DEFAULT_LOGIN_ERROR.to_string()),
                )
            } else {
                ClientError::Api {
                    status: status.as_u16(),
                    message: message.unwrap_or_else(|| status.to_string()),
                }
            });
        }

        let envelope: DataResponse<LoginResponse> = response.json().await?;
        let login = envelope.data;
        let access_expires_at = validator::expires_at(&login.access_token)?;
        let refresh_expires_at = match login.refresh_token {
            Some(_) => Some(Utc::now() + self.refresh_token_lifetime()?),
            None => None,
        };

        let tokens = AuthTokens {
            access_token: login.access_token,
            access_expires_at,
            refresh_token: login.refresh_token,
            refresh_expires_at,
        };
        let user = User {
            name: login.name,
            email: email.to_string(),
            role: login.role,
            ..User::default()
        };

        self.refresher.invalidate();
        self.persist_login(&tokens, &user)?;
        self.api.set_bearer(&tokens.access_token);
        self.establish(tokens.access_token, tokens.refresh_token, user.clone());

        info!(scope = %self.scope, role = ?user.role, "Logged in");
        Ok(user)
    }

    fn persist_login(&self, tokens: &AuthTokens, user: &User) -> Result<()> {
        self.token_store.save(&self.scope, tokens)?;
        if let Err(e) = self.token_store.save_user(&self.scope, user) {
            if let Err(clear_err) = self.token_store.clear(&self.scope) {
                warn!(scope = %self.scope, error = %clear_err, "Failed to roll back stored tokens");
            }
            return Err(e);
        }
        Ok(())
    }

    fn refresh_token_lifetime(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.config.refresh_token_lifetime())
            .map_err(|e| ClientError::Configuration(format!("refresh token lifetime: {e}")))
    }

    /// End the session. Safe to call when already logged out.
    pub fn logout(&self) {
        self.end_session(LogoutReason::Requested);
    }

    /// Exchange the refresh token for a new access token, logging out on failure
    ///
    /// A refresh that outlives its session (logout or a new login while the
    /// request was out) fails without touching the current session.
    pub async fn refresh(&self) -> Result<String> {
        let epoch = self.refresher.epoch();
        match self.refresher.refresh().await {
            Ok(token) => {
                self.state.send_if_modified(|session| {
                    if !session.authenticated || self.refresher.epoch() != epoch {
                        return false;
                    }
                    session.access_token = Some(token.clone());
                    true
                });
                Ok(token)
            }
            Err(e) if self.refresher.epoch() != epoch => {
                debug!(scope = %self.scope, error = %e, "Refresh outlived its session");
                Err(e)
            }
            Err(e) => {
                warn!(scope = %self.scope, error = %e, "Silent refresh failed, logging out");
                self.end_session(LogoutReason::RefreshFailed);
                Err(e)
            }
        }
    }

    /// A usable access token, refreshed silently when the current one has expired
    pub async fn access_token(&self) -> Result<String> {
        let current = {
            let session = self.state.borrow();
            session
                .access_token
                .clone()
                .filter(|_| session.authenticated)
        };
        let Some(token) = current else {
            return Err(ClientError::Unauthorized);
        };

        if validator::is_valid(&token) {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Report a qualifying user interaction. Ignored while logged out.
    pub fn record_activity(&self, event: ActivityEvent) -> bool {
        if !self.is_authenticated() {
            return false;
        }
        let reset = self.monitor.record_activity(event);
        if reset {
            // Activity is too frequent to wake every observer
            self.state.send_if_modified(|session| {
                session.last_activity_at = Some(Utc::now());
                false
            });
        }
        reset
    }

    fn establish(&self, access_token: String, refresh_token: Option<String>, user: User) {
        let roles = user.role_flags();
        if roles.active().is_none() {
            warn!(role = ?user.role, "Unrecognized role, no role flag set");
        }

        self.state.send_replace(Session {
            access_token: Some(access_token),
            refresh_token,
            user: Some(user),
            authenticated: true,
            roles,
            last_activity_at: Some(Utc::now()),
            logout_reason: None,
        });
        self.monitor.arm(self.expiry_hook());
    }

    fn expiry_hook(&self) -> ExpiryHook {
        let session_ref = self.weak_self.clone();
        Arc::new(move || {
            if let Some(session) = session_ref.upgrade() {
                session.expire_for_inactivity();
            }
        })
    }

    fn expire_for_inactivity(&self) {
        if !self.is_authenticated() {
            debug!(scope = %self.scope, "Ignoring inactivity timeout without a session");
            return;
        }
        info!(scope = %self.scope, "Logging out after inactivity");
        self.end_session(LogoutReason::Inactivity);
    }

    fn end_session(&self, reason: LogoutReason) {
        self.refresher.invalidate();
        self.monitor.disarm();
        if let Err(e) = self.token_store.clear(&self.scope) {
            warn!(scope = %self.scope, error = %e, "Failed to clear stored tokens");
        }
        if let Err(e) = self.token_store.clear_user(&self.scope) {
            warn!(scope = %self.scope, error = %e, "Failed to clear cached user");
        }
        self.api.clear_bearer();

        let was_authenticated = self.state.borrow().authenticated;
        self.state.send_replace(Session {
            logout_reason: Some(reason),
            ..Session::default()
        });

        if was_authenticated {
            info!(scope = %self.scope, reason = ?reason, "Session ended");
        } else {
            debug!(scope = %self.scope, reason = ?reason, "Session already ended");
        }
    }

    /// Current session snapshot
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Watch the session for changes
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().authenticated
    }

    pub fn user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn roles(&self) -> RoleFlags {
        self.state.borrow().roles
    }

    /// Id to record as declarer of new incidents, taken from the logged-in user
    pub fn declarer_id(&self) -> Option<i64> {
        let session = self.state.borrow();
        session
            .user
            .as_ref()
            .filter(|_| session.authenticated)
            .and_then(User::declarer_id)
    }

    /// Whether `init` has completed
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until `init` has completed
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        ready.wait_for(|ready| *ready).await.ok();
    }

    pub fn monitor_phase(&self) -> MonitorPhase {
        self.monitor.phase()
    }

    /// Whether the inactivity warning should be on screen
    pub fn is_warning(&self) -> bool {
        self.is_authenticated() && self.monitor.is_warning()
    }

    pub fn time_until_logout(&self) -> Option<Duration> {
        self.monitor.time_until_logout()
    }

    /// Client for the rest of the console's backend calls
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Get the token store (for advanced usage)
    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
