//! Type definitions for authentication and the session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication tokens (access + optional refresh) with their expiry metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    /// Mirrors the `exp` claim embedded in the access token
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl AuthTokens {
    /// Check if the access token is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at
    }

    /// Check if access token is expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Console roles, matched against the backend's `role` string by exact equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    System,
    Dev,
    Network,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::System, Role::Dev, Role::Network];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::System => "SYSTEM",
            Role::Dev => "DEV",
            Role::Network => "NETWORK",
        }
    }

    /// Parse a backend role name. Unknown names (including different casing) yield `None`.
    pub fn from_name(name: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|role| role.as_str() == name)
    }
}

/// One boolean per console role; at most one is set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleFlags {
    pub is_admin: bool,
    pub is_system: bool,
    pub is_dev: bool,
    pub is_network: bool,
}

impl RoleFlags {
    pub fn from_role(role: Option<Role>) -> Self {
        Self {
            is_admin: role == Some(Role::Admin),
            is_system: role == Some(Role::System),
            is_dev: role == Some(Role::Dev),
            is_network: role == Some(Role::Network),
        }
    }

    pub fn from_role_name(name: Option<&str>) -> Self {
        Self::from_role(name.and_then(Role::from_name))
    }

    /// The role whose flag is set, if any
    pub fn active(&self) -> Option<Role> {
        Role::ALL.into_iter().find(|role| match role {
            Role::Admin => self.is_admin,
            Role::System => self.is_system,
            Role::Dev => self.is_dev,
            Role::Network => self.is_network,
        })
    }
}

/// Cached user identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

impl User {
    /// A cached user without a role cannot drive the role flags and must be re-fetched
    pub fn is_complete(&self) -> bool {
        self.role.as_deref().is_some_and(|role| !role.is_empty())
    }

    pub fn role(&self) -> Option<Role> {
        self.role.as_deref().and_then(Role::from_name)
    }

    pub fn role_flags(&self) -> RoleFlags {
        RoleFlags::from_role_name(self.role.as_deref())
    }

    /// Identifier to record as the author of anything this user declares.
    ///
    /// The backend reports it as either `id` or `userId` depending on the endpoint.
    pub fn declarer_id(&self) -> Option<i64> {
        self.id.or(self.user_id)
    }
}

/// Login request body
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Login payload, delivered inside a [`DataResponse`] envelope
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Envelope the backend wraps some payloads in
#[derive(Debug, Clone, Deserialize)]
pub struct DataResponse<T> {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: T,
    #[serde(default)]
    pub error: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_role_parsing_is_exact() {
        assert_eq!(Role::from_name("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::from_name("NETWORK"), Some(Role::Network));
        assert_eq!(Role::from_name("admin"), None);
        assert_eq!(Role::from_name(" DEV"), None);
        assert_eq!(Role::from_name(""), None);
    }

    #[test]
    fn test_exactly_one_flag_for_known_roles() {
        for role in Role::ALL {
            let flags = RoleFlags::from_role_name(Some(role.as_str()));
            let set = [flags.is_admin, flags.is_system, flags.is_dev, flags.is_network]
                .iter()
                .filter(|f| **f)
                .count();
            assert_eq!(set, 1);
            assert_eq!(flags.active(), Some(role));
        }

        assert_eq!(RoleFlags::from_role_name(Some("SUPERVISOR")), RoleFlags::default());
        assert_eq!(RoleFlags::from_role_name(None), RoleFlags::default());
    }

    #[test]
    fn test_user_completeness_and_declarer() {
        let user: User = serde_json::from_str(
            r#"{"userId": 42, "name": "Awa", "email": "awa@example.com", "role": "DEV"}"#,
        )
        .unwrap();
        assert!(user.is_complete());
        assert_eq!(user.declarer_id(), Some(42));
        assert_eq!(user.role(), Some(Role::Dev));

        let partial: User = serde_json::from_str(r#"{"name": "Awa", "email": "a@b.c"}"#).unwrap();
        assert!(!partial.is_complete());
        assert_eq!(partial.declarer_id(), None);
    }

    #[test]
    fn test_tokens_expiry() {
        let now = Utc::now();
        let tokens = AuthTokens {
            access_token: "a".to_string(),
            access_expires_at: now + Duration::seconds(30),
            refresh_token: None,
            refresh_expires_at: None,
        };
        assert!(!tokens.is_expired_at(now));
        assert!(tokens.is_expired_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_login_envelope_without_refresh_token() {
        let body = r#"{
            "timestamp": "2025-01-01T00:00:00",
            "message": "ok",
            "data": {"access_token": "t", "refresh_token": null, "name": "Awa", "role": "ADMIN"},
            "error": false
        }"#;
        let envelope: DataResponse<LoginResponse> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.access_token, "t");
        assert!(envelope.data.refresh_token.is_none());
        assert_eq!(envelope.data.role.as_deref(), Some("ADMIN"));
    }
}
