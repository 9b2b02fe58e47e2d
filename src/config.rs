//! Session configuration

use crate::error::{ClientError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Idle time after which the session is closed. Default: 30 minutes
pub const DEFAULT_INACTIVITY_TIME: Duration = Duration::from_secs(30 * 60);

/// How long before the idle logout the warning is raised. Default: 1 minute
pub const DEFAULT_WARNING_TIME: Duration = Duration::from_secs(60);

/// Lifetime given to a stored refresh token. Default: 30 days
pub const DEFAULT_REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Timeout applied to every backend request. Default: 30 seconds
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backend used when `CONSOLE_API_URL` is not set
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Backend origin, without trailing slash. Also the token store scope.
    pub(crate) base_url: String,
    pub(crate) inactivity_time: Duration,
    pub(crate) warning_time: Duration,
    pub(crate) refresh_token_lifetime: Duration,
    pub(crate) request_timeout: Duration,
    /// Where tokens are persisted; `None` keeps them in memory only
    pub(crate) storage_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Creates a configuration for the given backend with default timings.
    ///
    /// # Errors
    /// Returns `ClientError::Configuration` if the URL is empty.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration(
                "backend URL must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            inactivity_time: DEFAULT_INACTIVITY_TIME,
            warning_time: DEFAULT_WARNING_TIME,
            refresh_token_lifetime: DEFAULT_REFRESH_TOKEN_LIFETIME,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            storage_path: None,
        })
    }

    /// Builds a configuration from `CONSOLE_*` environment variables.
    ///
    /// * `CONSOLE_API_URL` - backend origin (default `http://localhost:8080`)
    /// * `CONSOLE_INACTIVITY_SECS` - idle logout delay in seconds
    /// * `CONSOLE_WARNING_SECS` - warning lead time in seconds
    /// * `CONSOLE_TOKEN_STORE` - path of the persisted token file
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("CONSOLE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::new(base_url)?;

        if let Some(secs) = env_secs("CONSOLE_INACTIVITY_SECS")? {
            config.inactivity_time = secs;
        }
        if let Some(secs) = env_secs("CONSOLE_WARNING_SECS")? {
            config.warning_time = secs;
        }
        if let Ok(path) = std::env::var("CONSOLE_TOKEN_STORE") {
            config.storage_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the idle time after which the session is logged out.
    #[must_use]
    pub fn with_inactivity_time(mut self, inactivity_time: Duration) -> Self {
        self.inactivity_time = inactivity_time;
        self
    }

    /// Sets how long before the logout the warning is shown.
    #[must_use]
    pub fn with_warning_time(mut self, warning_time: Duration) -> Self {
        self.warning_time = warning_time;
        self
    }

    #[must_use]
    pub fn with_refresh_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh_token_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Persists tokens to the given file instead of keeping them in memory.
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Checks that the timers can be armed.
    ///
    /// # Errors
    /// Returns `ClientError::Configuration` if the warning time is zero or not
    /// strictly shorter than the inactivity time.
    pub fn validate(&self) -> Result<()> {
        if self.warning_time.is_zero() {
            return Err(ClientError::Configuration(
                "warning time must be greater than zero".to_string(),
            ));
        }
        if self.warning_time >= self.inactivity_time {
            return Err(ClientError::Configuration(format!(
                "warning time ({:?}) must be shorter than inactivity time ({:?})",
                self.warning_time, self.inactivity_time
            )));
        }
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn inactivity_time(&self) -> Duration {
        self.inactivity_time
    }

    pub fn warning_time(&self) -> Duration {
        self.warning_time
    }

    pub fn refresh_token_lifetime(&self) -> Duration {
        self.refresh_token_lifetime
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn storage_path(&self) -> Option<&PathBuf> {
        self.storage_path.as_ref()
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| ClientError::Configuration(format!("{name}: {e}"))),
        Err(_) => Ok(None),
    }
}
