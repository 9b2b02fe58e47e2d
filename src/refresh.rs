//! Exchange of a stored refresh token for a new access token

use crate::api::{self, ApiClient};
use crate::error::{ClientError, Result};
use crate::token_store::TokenStore;
use crate::types::{AuthTokens, RefreshRequest, RefreshResponse};
use crate::validator;
use async_singleflight::Group;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub const REFRESH_PATH: &str = "/api/v1/auth/refresh-token";

/// Refreshes the access token of one scope
///
/// A failed exchange is never retried: without a working refresh token the
/// session cannot be recovered client-side, so the caller logs out.
pub struct RefreshCoordinator {
    scope: String,
    token_store: TokenStore,
    api: ApiClient,
    /// Concurrent callers share one exchange; errors are carried as strings
    singleflight: Group<String, String>,
    /// Bumped whenever the session owning the tokens ends or is replaced.
    /// Held while a refreshed token is written so the two cannot interleave.
    epoch: Mutex<u64>,
}

impl RefreshCoordinator {
    pub fn new(scope: impl Into<String>, token_store: TokenStore, api: ApiClient) -> Self {
        Self {
            scope: scope.into(),
            token_store,
            api,
            singleflight: Group::new(),
            epoch: Mutex::new(0),
        }
    }

    /// Current epoch; compare after a refresh to tell whether it outlived
    /// its session
    pub fn epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    /// Discard the result of any exchange in flight
    ///
    /// Called when the session ends or a new one is established, so a late
    /// response cannot write the old session's token back.
    pub fn invalidate(&self) {
        *self.lock_epoch() += 1;
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Obtain a new access token.
    ///
    /// On success the token is persisted first, then installed as the API
    /// client's default header, then returned. If [`invalidate`] runs while
    /// the exchange is in flight, nothing is written and the refresh fails.
    ///
    /// [`invalidate`]: RefreshCoordinator::invalidate
    pub async fn refresh(&self) -> Result<String> {
        let epoch = self.epoch();
        let Some(refresh_token) = self.token_store.refresh_token(&self.scope) else {
            return Err(ClientError::NoRefreshToken);
        };

        let (success_opt, error_opt, _shared) = self
            .singleflight
            .work(&self.scope, async {
                match self.do_refresh(&refresh_token, epoch).await {
                    Ok(access_token) => Ok(access_token),
                    Err(e) => {
                        let err_msg = e.to_string();
                        warn!(scope = %self.scope, error = %err_msg, "Token refresh failed");
                        Err(err_msg)
                    }
                }
            })
            .await;

        match (success_opt, error_opt) {
            (Some(token), None) => Ok(token),
            (None, Some(err_str)) => Err(ClientError::RefreshFailed(err_str)),
            _ => Err(ClientError::RefreshFailed(
                "Unknown error during token refresh".to_string(),
            )),
        }
    }

    async fn do_refresh(&self, refresh_token: &str, epoch: u64) -> Result<String> {
        let response = self
            .api
            .post_unauthenticated(REFRESH_PATH, &RefreshRequest { refresh_token })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = api::error_message(response)
                .await
                .unwrap_or_else(|| status.to_string());
            return Err(ClientError::RefreshFailed(format!(
                "status {status}: {message}"
            )));
        }

        let body: RefreshResponse = response.json().await?;
        let access_expires_at = validator::expires_at(&body.access_token)?;

        let current = self.lock_epoch();
        if *current != epoch {
            return Err(ClientError::RefreshFailed(
                "session ended before the refresh completed".to_string(),
            ));
        }
        self.token_store.save(
            &self.scope,
            &AuthTokens {
                access_token: body.access_token.clone(),
                access_expires_at,
                refresh_token: None,
                refresh_expires_at: None,
            },
        )?;
        self.api.set_bearer(&body.access_token);
        drop(current);

        info!(scope = %self.scope, expires_at = %access_expires_at, "Access token refreshed");
        Ok(body.access_token)
    }
}
