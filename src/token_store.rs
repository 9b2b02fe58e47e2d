//! Thread-safe token storage using Papaya HashMap, optionally persisted to disk
//!
//! Each scope (backend origin) owns one record holding the access token, the
//! refresh token and the cached user. Every write replaces the whole record, so
//! readers never observe one token without the other.

use crate::error::Result;
use crate::types::{AuthTokens, User};
use chrono::{DateTime, Utc};
use papaya::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A stored credential with its own expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access: Option<StoredEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh: Option<StoredEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<User>,
}

impl StoredSession {
    fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none() && self.user.is_none()
    }
}

/// Thread-safe token store
///
/// Cloning is cheap; clones share the same map and backing file.
#[derive(Clone)]
pub struct TokenStore {
    sessions: Arc<HashMap<String, StoredSession>>,
    path: Option<Arc<PathBuf>>,
}

impl TokenStore {
    /// Create an in-memory token store
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(HashMap::new()),
            path: None,
        }
    }

    /// Open a token store persisted at `path`, loading whatever it already holds.
    ///
    /// A missing file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = Self {
            sessions: Arc::new(HashMap::new()),
            path: Some(Arc::new(path.clone())),
        };

        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let saved: BTreeMap<String, StoredSession> = serde_json::from_str(&contents)?;
            let sessions = store.sessions.pin();
            for (scope, session) in saved {
                sessions.insert(scope, session);
            }
            debug!(path = %path.display(), scopes = sessions.len(), "Loaded token store");
        }

        Ok(store)
    }

    /// Path of the backing file, if persisted
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Store tokens for a scope.
    ///
    /// When `tokens.refresh_token` is `None` the previously stored refresh
    /// token is kept.
    pub fn save(&self, scope: &str, tokens: &AuthTokens) -> Result<()> {
        let mut session = self.record(scope);
        session.access = Some(StoredEntry {
            value: tokens.access_token.clone(),
            expires_at: tokens.access_expires_at,
        });
        if let (Some(value), Some(expires_at)) =
            (&tokens.refresh_token, tokens.refresh_expires_at)
        {
            session.refresh = Some(StoredEntry {
                value: value.clone(),
                expires_at,
            });
        }
        self.put(scope, session)
    }

    /// Get tokens for a scope
    ///
    /// Returns `None` when no access token is stored. The access token is
    /// returned even if its expiry has passed, so the caller can try a
    /// refresh; a refresh token past its own expiry is dropped.
    pub fn load(&self, scope: &str) -> Option<AuthTokens> {
        self.load_at(scope, Utc::now())
    }

    pub(crate) fn load_at(&self, scope: &str, now: DateTime<Utc>) -> Option<AuthTokens> {
        let session = self.sessions.pin().get(scope).cloned()?;
        let access = session.access?;
        let refresh = session.refresh.filter(|entry| entry.expires_at > now);

        Some(AuthTokens {
            access_token: access.value,
            access_expires_at: access.expires_at,
            refresh_token: refresh.as_ref().map(|entry| entry.value.clone()),
            refresh_expires_at: refresh.map(|entry| entry.expires_at),
        })
    }

    /// Current, unexpired refresh token for a scope
    pub fn refresh_token(&self, scope: &str) -> Option<String> {
        self.load(scope).and_then(|tokens| tokens.refresh_token)
    }

    /// Remove both tokens for a scope in one update
    pub fn clear(&self, scope: &str) -> Result<()> {
        let mut session = self.record(scope);
        session.access = None;
        session.refresh = None;
        self.put(scope, session)
    }

    /// Cache the user identity for a scope
    pub fn save_user(&self, scope: &str, user: &User) -> Result<()> {
        let mut session = self.record(scope);
        session.user = Some(user.clone());
        self.put(scope, session)
    }

    pub fn load_user(&self, scope: &str) -> Option<User> {
        self.sessions.pin().get(scope).and_then(|s| s.user.clone())
    }

    pub fn clear_user(&self, scope: &str) -> Result<()> {
        let mut session = self.record(scope);
        session.user = None;
        self.put(scope, session)
    }

    /// Check if tokens exist for a scope
    pub fn contains(&self, scope: &str) -> bool {
        self.sessions
            .pin()
            .get(scope)
            .is_some_and(|s| s.access.is_some())
    }

    /// Get all scopes with stored state
    pub fn scopes(&self) -> Vec<String> {
        self.sessions.pin().iter().map(|(k, _)| k.clone()).collect()
    }

    fn record(&self, scope: &str) -> StoredSession {
        self.sessions.pin().get(scope).cloned().unwrap_or_default()
    }

    fn put(&self, scope: &str, session: StoredSession) -> Result<()> {
        let sessions = self.sessions.pin();
        if session.is_empty() {
            sessions.remove(scope);
        } else {
            sessions.insert(scope.to_string(), session);
        }
        drop(sessions);
        self.flush()
    }

    /// Write the whole store to disk with owner-only permissions.
    ///
    /// The file is written next to its target and renamed into place so a
    /// crash never leaves a half-written store behind.
    fn flush(&self) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let snapshot: BTreeMap<String, StoredSession> = self
            .sessions
            .pin()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let contents = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;

        Ok(())
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}
