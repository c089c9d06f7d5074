mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use namesearch_session::client::ApiRequest;
use namesearch_session::config::SessionConfig;
use namesearch_session::models::{PersistedRecord, PersistedSession, SessionPhase, User};
use namesearch_session::store::{MemoryStorage, StorageBackend};
use serde_json::{json, Value};
use uuid::Uuid;

use common::{
    build_manager, build_manager_with, build_offline_manager, count_unauthenticated, login_body,
    mint_token, refresh_body, SlowRefreshApi,
};

#[tokio::test]
async fn test_login_refresh_retry_logout() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    let t2 = mint_token("7", 7200);

    let login = server
        .mock("POST", "/auth/login")
        .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "x"})))
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .expect(1)
        .create_async()
        .await;
    let rejected = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", t1).as_str())
        .with_status(401)
        .with_body(r#"{"detail": "Could not validate credentials"}"#)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .match_body(Matcher::Json(json!({"refreshToken": "r1"})))
        .with_status(200)
        .with_body(refresh_body(&t2, "r2"))
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", t2).as_str())
        .with_status(200)
        .with_body(r#"{"items": ["acme.com"]}"#)
        .expect(1)
        .create_async()
        .await;
    let logout = server
        .mock("POST", "/auth/logout")
        .match_header("authorization", format!("Bearer {}", t2).as_str())
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let manager = build_manager(&server.url(), storage.clone());
    let lost = count_unauthenticated(&manager);

    manager.login("a@b.com", "x").await.unwrap();
    assert!(manager.is_authenticated());
    assert_eq!(manager.current_user().unwrap().display_name.as_deref(), Some("Ada"));
    assert_eq!(manager.get_access_token().as_deref(), Some(t1.as_str()));

    let body: Value = manager
        .client()
        .send_json(ApiRequest::get("/domains"))
        .await
        .unwrap();
    assert_eq!(body["items"][0], "acme.com");
    assert_eq!(manager.get_access_token().as_deref(), Some(t2.as_str()));
    assert_eq!(manager.store.refresh_token().as_deref(), Some("r2"));

    let notification = manager.logout().expect("logout should notify the server");
    assert_eq!(manager.get_access_token(), None);
    assert!(!manager.is_authenticated());
    notification.await.unwrap();

    assert_eq!(lost.load(Ordering::SeqCst), 1);
    let raw = storage.get_item("auth-storage").unwrap().unwrap();
    let record = PersistedRecord::parse(&raw).unwrap();
    assert_eq!(record.state.refresh_token, None);
    assert_eq!(record.state.access_token, None);
    assert!(!record.state.is_authenticated);

    login.assert_async().await;
    rejected.assert_async().await;
    refresh.assert_async().await;
    accepted.assert_async().await;
    logout.assert_async().await;
}

#[tokio::test]
async fn test_retry_happens_once() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    let t2 = mint_token("7", 7200);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .with_status(200)
        .with_body(refresh_body(&t2, "r2"))
        .expect(1)
        .create_async()
        .await;
    let always_rejected = server
        .mock("GET", "/domains")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();

    let err = manager
        .client()
        .send(ApiRequest::get("/domains"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    refresh.assert_async().await;
    always_rejected.assert_async().await;
    // The refresh itself succeeded; the session stays.
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_parallel_unauthorized_calls_share_one_refresh() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    let t2 = mint_token("7", 7200);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", t1).as_str())
        .with_status(401)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .with_status(200)
        .with_body(refresh_body(&t2, "r2"))
        .expect(1)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", t2).as_str())
        .with_status(200)
        .with_body("{}")
        .expect(5)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();

    let results = futures::future::join_all((0..5).map(|_| {
        let client = manager.client().clone();
        async move { client.send(ApiRequest::get("/domains")).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    refresh.assert_async().await;
    accepted.assert_async().await;
}

#[tokio::test]
async fn test_refresh_failure_logs_out() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    server
        .mock("GET", "/domains")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .with_status(401)
        .with_body(r#"{"detail": "Invalid refresh token"}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    let lost = count_unauthenticated(&manager);
    manager.login("a@b.com", "x").await.unwrap();

    let response = manager
        .client()
        .execute(ApiRequest::get("/domains"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    refresh.assert_async().await;
    assert!(!manager.is_authenticated());
    assert_eq!(manager.get_access_token(), None);
    assert_eq!(manager.store.refresh_token(), None);
    assert!(manager.snapshot().error.is_some());
    assert_eq!(lost.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_skip_auth_refresh_passes_failure_through() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    server
        .mock("GET", "/domains")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();

    let response = manager
        .client()
        .execute(ApiRequest::get("/domains").skip_auth_refresh())
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    refresh.assert_async().await;
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_failed_login_leaves_session_unauthenticated() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    server
        .mock("POST", "/auth/login")
        .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "x"})))
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    server
        .mock("POST", "/auth/login")
        .match_body(Matcher::Json(json!({"email": "a@b.com", "password": "bad"})))
        .with_status(401)
        .with_body(r#"{"detail": "Incorrect email or password"}"#)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let manager = build_manager(&server.url(), storage.clone());
    let lost = count_unauthenticated(&manager);
    manager.login("a@b.com", "x").await.unwrap();
    assert!(manager.is_authenticated());

    let err = manager.login("a@b.com", "bad").await.unwrap_err();
    assert!(err.to_string().contains("Incorrect email or password"));

    let session = manager.snapshot();
    assert!(!session.is_authenticated);
    assert!(!session.is_loading);
    assert_eq!(session.access_token, None);
    assert_eq!(session.refresh_token, None);
    assert!(session.error.unwrap().contains("Incorrect email or password"));
    assert_eq!(lost.load(Ordering::SeqCst), 1);

    let record = PersistedRecord::parse(&storage.get_item("auth-storage").unwrap().unwrap()).unwrap();
    assert_eq!(record.state.access_token, None);
}

#[tokio::test]
async fn test_anonymous_call_never_carries_the_session_token() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&t1, "r1"))
        .create_async()
        .await;
    let without_token = server
        .mock("GET", "/public")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let with_token = server
        .mock("GET", "/public")
        .match_header("authorization", format!("Bearer {}", t1).as_str())
        .with_status(200)
        .expect(0)
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();

    let response = manager
        .client()
        .execute(ApiRequest::get("/public").anonymous())
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    without_token.assert_async().await;
    with_token.assert_async().await;
    refresh.assert_async().await;
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_expiring_token_is_refreshed_before_the_call() {
    let mut server = Server::new_async().await;
    // Inside the expiring-soon window but outside the grace period.
    let expiring = mint_token("7", 120);
    let fresh = mint_token("7", 3600);
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&expiring, "r1"))
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .match_body(Matcher::Json(json!({"refreshToken": "r1"})))
        .with_status(200)
        .with_body(refresh_body(&fresh, "r2"))
        .expect(1)
        .create_async()
        .await;
    let stale = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", expiring).as_str())
        .with_status(401)
        .expect(0)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", fresh).as_str())
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();
    assert!(manager.is_authenticated());

    manager.client().send(ApiRequest::get("/domains")).await.unwrap();

    refresh.assert_async().await;
    stale.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(manager.get_access_token().as_deref(), Some(fresh.as_str()));
}

#[tokio::test]
async fn test_proactive_refresh_can_be_disabled() {
    let mut server = Server::new_async().await;
    let expiring = mint_token("7", 120);
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body(&expiring, "r1"))
        .create_async()
        .await;
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .expect(0)
        .create_async()
        .await;
    let accepted = server
        .mock("GET", "/domains")
        .match_header("authorization", format!("Bearer {}", expiring).as_str())
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let session = SessionConfig {
        proactive_refresh: false,
        ..SessionConfig::default()
    };
    let manager = build_manager_with(&server.url(), Arc::new(MemoryStorage::new()), session);
    manager.login("a@b.com", "x").await.unwrap();

    manager.client().send(ApiRequest::get("/domains")).await.unwrap();

    refresh.assert_async().await;
    accepted.assert_async().await;
    assert_eq!(manager.get_access_token().as_deref(), Some(expiring.as_str()));
}

#[tokio::test]
async fn test_logout_during_refresh_stays_logged_out() {
    let api = Arc::new(SlowRefreshApi::new(Duration::from_millis(100)));
    let storage = Arc::new(MemoryStorage::new());
    let manager = build_offline_manager(api.clone(), storage.clone());
    let lost = count_unauthenticated(&manager);
    manager.login("a@b.com", "x").await.unwrap();

    let refreshing = tokio::spawn({
        let manager = manager.clone();
        async move { manager.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    if let Some(notification) = manager.logout() {
        notification.await.unwrap();
    }

    assert_eq!(refreshing.await.unwrap(), None);
    assert_eq!(api.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(manager.get_access_token(), None);
    assert!(!manager.is_authenticated());
    assert_eq!(lost.load(Ordering::SeqCst), 1);

    let record = PersistedRecord::parse(&storage.get_item("auth-storage").unwrap().unwrap()).unwrap();
    assert_eq!(record.state.refresh_token, None);
    assert!(!record.state.is_authenticated);
}

#[tokio::test]
async fn test_login_without_user_fetches_profile() {
    let mut server = Server::new_async().await;
    let t1 = mint_token("7", 3600);
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(json!({"access_token": t1, "refresh_token": "r1"}).to_string())
        .create_async()
        .await;
    let me = server
        .mock("GET", "/users/me")
        .match_header("authorization", format!("Bearer {}", t1).as_str())
        .with_status(200)
        .with_body(r#"{"id": 7, "email": "a@b.com", "role": "admin"}"#)
        .expect(1)
        .create_async()
        .await;

    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    manager.login("a@b.com", "x").await.unwrap();
    me.assert_async().await;
    assert_eq!(manager.current_user().unwrap().role, "admin");
}

fn seed(storage: &MemoryStorage, access_token: &str, refresh_token: &str) {
    let record = PersistedRecord::new(
        PersistedSession {
            user: Some(User::new(7, "a@b.com")),
            access_token: Some(access_token.to_string()),
            refresh_token: Some(refresh_token.to_string()),
            is_authenticated: true,
        },
        0,
    );
    storage
        .set_item("auth-storage", &record.to_json().unwrap(), Uuid::new_v4())
        .unwrap();
}

#[tokio::test]
async fn test_initialize_refreshes_expired_token() {
    let mut server = Server::new_async().await;
    let expired = mint_token("7", -3600);
    let fresh = mint_token("7", 3600);
    let refresh = server
        .mock("POST", "/auth/refresh-token")
        .match_body(Matcher::Json(json!({"refreshToken": "r0"})))
        .with_status(200)
        .with_body(refresh_body(&fresh, "r1"))
        .expect(1)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStorage::new());
    seed(&storage, &expired, "r0");
    let manager = build_manager(&server.url(), storage);

    assert_eq!(manager.phase(), SessionPhase::Uninitialized);
    let (first, second) = tokio::join!(manager.initialize(), manager.initialize());
    assert_eq!(first, SessionPhase::Authenticated);
    assert_eq!(second, SessionPhase::Authenticated);
    assert_eq!(manager.initialize().await, SessionPhase::Authenticated);

    refresh.assert_async().await;
    assert_eq!(manager.get_access_token().as_deref(), Some(fresh.as_str()));
    assert_eq!(manager.current_user().unwrap().email, "a@b.com");
    assert!(manager.snapshot().is_initialized);
}

#[tokio::test]
async fn test_initialize_with_valid_token_makes_no_calls() {
    let mut server = Server::new_async().await;
    let valid = mint_token("7", 3600);
    let refresh = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let me = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStorage::new());
    seed(&storage, &valid, "r0");
    let manager = build_manager(&server.url(), storage);

    assert_eq!(manager.initialize().await, SessionPhase::Authenticated);
    refresh.assert_async().await;
    me.assert_async().await;
    assert_eq!(manager.get_access_token().as_deref(), Some(valid.as_str()));
}

#[tokio::test]
async fn test_initialize_with_failed_refresh_is_unauthenticated() {
    let mut server = Server::new_async().await;
    let expired = mint_token("7", -3600);
    server
        .mock("POST", "/auth/refresh-token")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let storage = Arc::new(MemoryStorage::new());
    seed(&storage, &expired, "r0");
    let manager = build_manager(&server.url(), storage.clone());

    assert_eq!(manager.initialize().await, SessionPhase::Unauthenticated);
    let session = manager.snapshot();
    assert!(session.is_initialized);
    assert!(!session.is_loading);
    assert_eq!(session.access_token, None);

    let record = PersistedRecord::parse(&storage.get_item("auth-storage").unwrap().unwrap()).unwrap();
    assert_eq!(record.state.refresh_token, None);
}

#[tokio::test]
async fn test_initialize_with_empty_storage() {
    let server = Server::new_async().await;
    let manager = build_manager(&server.url(), Arc::new(MemoryStorage::new()));
    assert_eq!(manager.initialize().await, SessionPhase::Unauthenticated);
    assert!(manager.snapshot().is_initialized);
}
