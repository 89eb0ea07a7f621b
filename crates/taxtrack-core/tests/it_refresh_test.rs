//! Integration tests for bearer token handling and the 401 refresh flow

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use taxtrack_core::api::{api_error_message, ApiClient, ApiError, ClientConfig, ErrorKind};
use taxtrack_core::auth::{
    FileTokenStore, MemoryTokenStore, Session, SessionEvent, TerminationReason, TokenKey,
    TokenStore,
};

const SUMMARY_BODY: &str = r#"{"data":{"ytdIncome":1000,"ytdDeductions":200,"ytdProfit":800,"currentQuarter":2,"quarterlyEstimates":[],"itemsNeedingReview":0,"connectedAccounts":1}}"#;

fn client_for(server: &ServerGuard, store: Arc<dyn TokenStore>) -> ApiClient {
    let mut config = ClientConfig::new(server.url());
    config.initial_backoff = Duration::from_millis(5);
    let session = Arc::new(Session::new(store));
    ApiClient::new(config, session).expect("Failed to build client")
}

fn store_with(access: Option<&str>, refresh: Option<&str>) -> MemoryTokenStore {
    let store = MemoryTokenStore::new();
    if let Some(access) = access {
        store.set(TokenKey::Access, access).unwrap();
    }
    if let Some(refresh) = refresh {
        store.set(TokenKey::Refresh, refresh).unwrap();
    }
    store
}

fn refreshed_body(access: &str, refresh: &str) -> String {
    json!({ "data": { "accessToken": access, "refreshToken": refresh } }).to_string()
}

#[tokio::test]
async fn attaches_bearer_token_and_json_content_type() {
    let mut server = Server::new_async().await;
    let summary_mock = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-1")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(SUMMARY_BODY)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, Arc::new(store_with(Some("access-1"), None)));
    let summary = client.fetch_tax_summary().await.expect("Failed to fetch summary");

    summary_mock.assert_async().await;
    assert_eq!(summary.ytd_income, 1000.0);
    assert_eq!(summary.current_quarter, 2);
}

#[tokio::test]
async fn omits_authorization_without_token() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/public/rates")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(r#"{"rate":0.153}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let body: serde_json::Value = client.get_json("/public/rates").await.unwrap();

    mock.assert_async().await;
    assert_eq!(body["rate"], 0.153);
}

#[tokio::test]
async fn refreshes_once_and_retries_on_401() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .with_body(r#"{"message":"Token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({ "refreshToken": "refresh-1" })))
        .with_status(200)
        .with_body(refreshed_body("access-2", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(SUMMARY_BODY)
        .expect(1)
        .create_async()
        .await;

    let store = store_with(Some("access-1"), Some("refresh-1"));
    let client = client_for(&server, Arc::new(store.clone()));
    let mut events = client.session().subscribe();

    let summary = client.fetch_tax_summary().await.expect("Retry should succeed");

    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(summary.ytd_profit, 800.0);

    // Both credentials were replaced in cache and store
    assert_eq!(client.session().access_token().unwrap().as_deref(), Some("access-2"));
    assert_eq!(store.get(TokenKey::Access).unwrap().as_deref(), Some("access-2"));
    assert_eq!(store.get(TokenKey::Refresh).unwrap().as_deref(), Some("refresh-2"));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Refreshed);
}

#[tokio::test]
async fn missing_refresh_token_terminates_session_with_original_401() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("GET", "/tax/summary")
        .with_status(401)
        .with_body(r#"{"message":"Token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let store = store_with(Some("access-1"), None);
    let client = client_for(&server, Arc::new(store.clone()));
    let mut events = client.session().subscribe();

    let err = client.fetch_tax_summary().await.unwrap_err();

    rejected.assert_async().await;
    refresh.assert_async().await;
    assert!(matches!(
        err,
        ApiError::Unauthorized {
            session_terminated: true,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::AuthTerminal);
    assert_eq!(api_error_message(&err), "Token expired");
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Terminated(TerminationReason::MissingRefreshToken)
    );
    // Nothing is cleared in this case
    assert_eq!(store.get(TokenKey::Access).unwrap().as_deref(), Some("access-1"));
}

#[tokio::test]
async fn second_401_after_refresh_is_not_retried() {
    let mut server = Server::new_async().await;
    let first = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refreshed_body("access-2", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-2")
        .with_status(401)
        .with_body(r#"{"error":"Account suspended"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server, Arc::new(store_with(Some("access-1"), Some("refresh-1"))));
    let mut events = client.session().subscribe();

    let err = client.fetch_tax_summary().await.unwrap_err();

    first.assert_async().await;
    refresh.assert_async().await;
    second.assert_async().await;
    assert!(matches!(
        err,
        ApiError::Unauthorized {
            session_terminated: false,
            ..
        }
    ));
    assert_eq!(api_error_message(&err), "Account suspended");

    // Only the refresh was announced; the session was not ended
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Refreshed);
    assert!(events.try_recv().is_err());
    assert!(client.session().is_authenticated());
}

#[tokio::test]
async fn failed_refresh_clears_session_and_surfaces_refresh_error() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("GET", "/tax/summary")
        .with_status(401)
        .with_body(r#"{"message":"Token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(401)
        .with_body(r#"{"message":"Refresh token revoked"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = store_with(Some("access-1"), Some("refresh-1"));
    let client = client_for(&server, Arc::new(store.clone()));
    let mut events = client.session().subscribe();

    let err = client.fetch_tax_summary().await.unwrap_err();

    rejected.assert_async().await;
    refresh.assert_async().await;
    assert!(matches!(err, ApiError::SessionTerminated(_)));
    assert!(err.is_auth_terminal());
    assert_eq!(api_error_message(&err), "Refresh token revoked");

    assert_eq!(client.session().access_token().unwrap(), None);
    assert_eq!(store.get(TokenKey::Access).unwrap(), None);
    assert_eq!(store.get(TokenKey::Refresh).unwrap(), None);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Terminated(TerminationReason::RefreshRejected)
    );
}

#[tokio::test]
async fn non_401_errors_pass_through() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("GET", "/tax/summary")
        .with_status(500)
        .with_body(r#"{"error":"boom"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let client = client_for(&server, Arc::new(store_with(Some("access-1"), Some("refresh-1"))));
    let err = client.fetch_tax_summary().await.unwrap_err();

    failing.assert_async().await;
    refresh.assert_async().await;
    assert!(matches!(err, ApiError::ServerError { .. }));
    assert_eq!(err.kind(), ErrorKind::Http);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert_eq!(api_error_message(&err), "boom");
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let mut server = Server::new_async().await;
    // Every request reads the token before any response arrives
    let rejected = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .expect(3)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refreshed_body("access-2", "refresh-2"))
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(SUMMARY_BODY)
        .expect(3)
        .create_async()
        .await;

    let client = client_for(&server, Arc::new(store_with(Some("access-1"), Some("refresh-1"))));

    let (a, b, c) = tokio::join!(
        client.fetch_tax_summary(),
        client.fetch_tax_summary(),
        client.get_json::<serde_json::Value>("/tax/summary"),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert!(c.is_ok());
    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn rate_limited_requests_back_off_then_give_up() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/tax/summary")
        .with_status(429)
        .expect(3)
        .create_async()
        .await;

    let mut config = ClientConfig::new(server.url());
    config.initial_backoff = Duration::from_millis(1);
    config.max_rate_limit_retries = 2;
    let session = Arc::new(Session::new(Arc::new(MemoryTokenStore::new())));
    let client = ApiClient::new(config, session).unwrap();

    let err = client.fetch_tax_summary().await.unwrap_err();

    limited.assert_async().await;
    assert!(matches!(err, ApiError::RateLimited));
}

#[tokio::test]
async fn refreshed_tokens_survive_restart() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-1")
        .with_status(401)
        .create_async()
        .await;
    server
        .mock("POST", "/auth/refresh")
        .with_status(200)
        .with_body(refreshed_body("access-2", "refresh-2"))
        .create_async()
        .await;
    server
        .mock("GET", "/tax/summary")
        .match_header("authorization", "Bearer access-2")
        .with_status(200)
        .with_body(SUMMARY_BODY)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FileTokenStore::new(dir.path());
    store.set(TokenKey::Access, "access-1").unwrap();
    store.set(TokenKey::Refresh, "refresh-1").unwrap();

    let client = client_for(&server, Arc::new(store));
    client.fetch_tax_summary().await.expect("Retry should succeed");
    drop(client);

    // A new process reads the refreshed pair back from disk
    let restarted = Session::new(Arc::new(FileTokenStore::new(dir.path())));
    assert_eq!(restarted.access_token().unwrap().as_deref(), Some("access-2"));
    assert_eq!(restarted.refresh_token().unwrap().as_deref(), Some("refresh-2"));
}
