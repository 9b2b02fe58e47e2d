//! Integration tests for silent token refresh.


use console_session::{
    ApiClient, ClientError, LogoutReason, RefreshCoordinator, SessionManager, TokenStore,
};
use fixtures::{config, login_response, seed_tokens, token_expiring_in};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinator(mock_server: &MockServer, store: &TokenStore) -> (RefreshCoordinator, ApiClient) {
    let api = ApiClient::new(mock_server.uri(), reqwest::Client::new());
    let coordinator = RefreshCoordinator::new(mock_server.uri(), store.clone(), api.clone());
    (coordinator, api)
}

fn delayed_refresh(fresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({"access_token": fresh}))
        .set_delay(Duration::from_millis(300))
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();
    seed_tokens(&store, &mock_server.uri(), &token_expiring_in(-5), None);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let (coordinator, _api) = coordinator(&mock_server, &store);
    assert!(matches!(
        coordinator.refresh().await,
        Err(ClientError::NoRefreshToken)
    ));
}

#[tokio::test]
async fn test_refresh_persists_token_before_installing_header() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();
    let scope = mock_server.uri();
    let old = token_expiring_in(-1);
    let fresh = token_expiring_in(900);
    seed_tokens(&store, &scope, &old, Some("refresh-1"));

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": fresh})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (coordinator, api) = coordinator(&mock_server, &store);
    let token = coordinator.refresh().await.unwrap();

    assert_eq!(token, fresh);
    let stored = store.load(&scope).unwrap();
    assert_eq!(stored.access_token, fresh);
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(
        stored.access_expires_at,
        console_session::validator::expires_at(&fresh).unwrap()
    );
    assert_eq!(api.bearer(), Some(format!("Bearer {fresh}")));
}

#[tokio::test]
async fn test_failed_refresh_is_not_retried() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();
    let scope = mock_server.uri();
    seed_tokens(&store, &scope, &token_expiring_in(-1), Some("revoked"));

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (coordinator, api) = coordinator(&mock_server, &store);
    let err = coordinator.refresh().await.unwrap_err();

    assert!(matches!(err, ClientError::RefreshFailed(ref m) if m.contains("boom")));
    assert!(api.bearer().is_none());
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_exchange() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();
    seed_tokens(&store, &mock_server.uri(), &token_expiring_in(-1), Some("refresh-1"));
    let fresh = token_expiring_in(900);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": fresh}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let (coordinator, _api) = coordinator(&mock_server, &store);
    let (first, second) = tokio::join!(coordinator.refresh(), coordinator.refresh());

    assert_eq!(first.unwrap(), fresh);
    assert_eq!(second.unwrap(), fresh);
}

#[tokio::test]
async fn test_invalidated_refresh_writes_nothing() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();
    let scope = mock_server.uri();
    let old = token_expiring_in(-1);
    seed_tokens(&store, &scope, &old, Some("refresh-1"));

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(delayed_refresh(&token_expiring_in(900)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (coordinator, api) = coordinator(&mock_server, &store);
    let (result, ()) = tokio::join!(coordinator.refresh(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.invalidate();
    });

    assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
    assert_eq!(store.load(&scope).unwrap().access_token, old);
    assert!(api.bearer().is_none());
}

#[tokio::test]
async fn test_logout_during_refresh_keeps_tokens_cleared() {
    let mock_server = MockServer::start().await;
    let store = TokenStore::new();

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(login_response(&token_expiring_in(900), Some("refresh-1"), "ADMIN"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(delayed_refresh(&token_expiring_in(900)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::with_token_store(config(&mock_server), store.clone()).unwrap();
    session.login("awa@example.com", "pw").await.unwrap();

    let (result, ()) = tokio::join!(session.refresh(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.logout();
    });

    assert!(result.is_err());
    assert!(!session.is_authenticated());
    assert_eq!(session.session().logout_reason, Some(LogoutReason::Requested));
    assert!(store.load(session.scope()).is_none());
    assert!(store.refresh_token(session.scope()).is_none());
    assert!(session.api().bearer().is_none());

    let restarted = SessionManager::with_token_store(config(&mock_server), store).unwrap();
    assert!(!restarted.init().await);
}

#[tokio::test]
async fn test_late_refresh_does_not_overwrite_new_login() {
    let mock_server = MockServer::start().await;
    let access = token_expiring_in(900);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(login_response(&access, Some("refresh-1"), "ADMIN"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(delayed_refresh(&token_expiring_in(900)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(config(&mock_server)).unwrap();
    session.login("awa@example.com", "pw").await.unwrap();

    let (result, ()) = tokio::join!(session.refresh(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.logout();
        session.login("awa@example.com", "pw").await.unwrap();
    });

    assert!(result.is_err());
    assert!(session.is_authenticated());
    assert_eq!(session.session().logout_reason, None);
    assert_eq!(session.session().access_token.as_deref(), Some(access.as_str()));
    let stored = session.token_store().load(session.scope()).unwrap();
    assert_eq!(stored.access_token, access);
    assert_eq!(session.api().bearer(), Some(format!("Bearer {access}")));
}

#[tokio::test]
async fn test_access_token_refreshes_silently() {
    let mock_server = MockServer::start().await;
    let short_lived = token_expiring_in(2);
    let fresh = token_expiring_in(900);

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(login_response(&short_lived, Some("refresh-1"), "ADMIN"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": fresh})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(config(&mock_server)).unwrap();
    session.login("awa@example.com", "pw").await.unwrap();
    assert_eq!(session.access_token().await.unwrap(), short_lived);

    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(session.access_token().await.unwrap(), fresh);
    assert_eq!(session.session().access_token.as_deref(), Some(fresh.as_str()));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_failed_silent_refresh_logs_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(login_response(&token_expiring_in(900), Some("refresh-1"), "ADMIN"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/refresh-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = SessionManager::new(config(&mock_server)).unwrap();
    session.login("awa@example.com", "pw").await.unwrap();

    assert!(session.refresh().await.is_err());
    assert!(!session.is_authenticated());
    assert_eq!(session.session().logout_reason, Some(LogoutReason::RefreshFailed));
    assert!(session.token_store().load(session.scope()).is_none());
    assert!(matches!(
        session.access_token().await,
        Err(ClientError::Unauthorized)
    ));
}
