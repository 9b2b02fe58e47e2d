//! Authenticated REST client shared by the session and the rest of the console

use crate::error::{ClientError, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Callback run whenever an authenticated request is answered with 401
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client carrying the console's default authorization header
///
/// Clones share the header, so a token installed by the session is seen by
/// every holder.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http_client: Client,
    authorization: Arc<RwLock<Option<String>>>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authorization", &self.bearer().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, http_client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            authorization: Arc::new(RwLock::new(None)),
            on_unauthorized: None,
        }
    }

    /// Install the hook that runs the logout path on 401.
    #[must_use]
    pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
        self.on_unauthorized = Some(hook);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Use `token` as the default bearer credential
    pub fn set_bearer(&self, token: &str) {
        let mut header = self
            .authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *header = Some(format!("Bearer {token}"));
    }

    pub fn clear_bearer(&self) {
        let mut header = self
            .authorization
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *header = None;
    }

    /// Current `Authorization` header value
    pub fn bearer(&self) -> Option<String> {
        self.authorization
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        Ok(response.json().await?)
    }

    /// GET a payload that may or may not be wrapped in the data envelope
    pub async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let value: Value = self.get(path).await?;
        extract_data(value)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.request(Method::POST, path).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send(self.request(Method::PUT, path).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, path)).await?;
        Ok(())
    }

    /// GET with an explicit token instead of the default header.
    ///
    /// A 401 here is reported as `Unauthorized` without running the hook;
    /// the caller owns the consequences.
    pub(crate) async fn get_with_token<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T> {
        let response = self
            .http_client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        let response = check_status(response).await?;
        let value: Value = response.json().await?;
        extract_data(value)
    }

    /// POST without credentials (login, token refresh). The raw response is
    /// returned so the caller can interpret failures itself.
    pub(crate) async fn post_unauthenticated<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        Ok(self.http_client.post(self.url(path)).json(body).send().await?)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, self.url(path));
        match self.bearer() {
            Some(header) => builder.header(AUTHORIZATION, header),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "Request rejected with 401, ending session");
            if let Some(hook) = &self.on_unauthorized {
                hook();
            }
            return Err(ClientError::Unauthorized);
        }

        check_status(response).await
    }
}

/// Turn a non-success response into `ClientError::Api`
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = error_message(response)
        .await
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Request failed").to_string());
    debug!(status = %status, message = %message, "Request failed");

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Backend-provided `message` field of an error body, if any
pub(crate) async fn error_message(response: Response) -> Option<String> {
    let text = response.text().await.ok()?;
    serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.message)
        .filter(|message| !message.is_empty())
}

/// Unwrap the `{timestamp, message, data, error}` envelope when present.
///
/// Some endpoints answer with the bare payload, others wrap it; both decode
/// to the same `T`.
pub fn extract_data<T: DeserializeOwned>(value: Value) -> Result<T> {
    let payload = match value {
        Value::Object(mut map) if map.contains_key("data") && map.contains_key("timestamp") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::User;
    use serde_json::json;

    #[test]
    fn test_extract_enveloped_data() {
        let value = json!({
            "timestamp": "2025-03-01T10:00:00",
            "message": "ok",
            "data": {"name": "Awa", "email": "awa@example.com", "role": "SYSTEM"},
            "error": false
        });
        let user: User = extract_data(value).unwrap();
        assert_eq!(user.role.as_deref(), Some("SYSTEM"));
    }

    #[test]
    fn test_extract_bare_data() {
        let value = json!({"name": "Awa", "email": "awa@example.com", "role": "DEV"});
        let user: User = extract_data(value).unwrap();
        assert_eq!(user.name, "Awa");

        // A payload that merely has a `data` field is not an envelope
        let value = json!({"data": [1, 2, 3], "total": 3});
        let raw: Value = extract_data(value.clone()).unwrap();
        assert_eq!(raw, value);
    }

    #[test]
    fn test_bearer_is_shared_between_clones() {
        let client = ApiClient::new("http://localhost:8080/", Client::new());
        let clone = client.clone();
        assert_eq!(client.url("/api/v1/users"), "http://localhost:8080/api/v1/users");

        client.set_bearer("abc");
        assert_eq!(clone.bearer().as_deref(), Some("Bearer abc"));
        assert!(!format!("{clone:?}").contains("abc"));

        clone.clear_bearer();
        assert!(client.bearer().is_none());
    }
}
