mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::Value;

use tenant_console::auth::{AuthApi, Credentials};
use tenant_console::{EventKind, RequestOptions, TokenPair, TokenStore};

use common::Backend;

fn credentials(password: &str) -> Credentials {
    Credentials {
        username: "admin".to_string(),
        password: password.to_string(),
        tenant: Some("acme".to_string()),
    }
}

#[tokio::test]
async fn login_persists_session_to_disk() -> Result<()> {
    let server = common::spawn_server().await?;
    let dir = tempfile::tempdir()?;
    let (client, store, _events) = common::connect(&server, dir.path())?;

    let tokens = AuthApi::new(client).login(&credentials(common::PASSWORD)).await?;
    assert_eq!(tokens.access_token, "access-login-1");
    assert!(!tokens.expires_within(Duration::minutes(30)));

    let raw: Value = serde_json::from_str(&std::fs::read_to_string(store.path())?)?;
    assert_eq!(raw["access_token"], "access-login-1");
    assert_eq!(raw["refresh_token"], "refresh-login-1");
    assert_eq!(raw["tenant_id"], "acme");

    // A second store over the same file sees the session
    let (_client, reopened, _events) = common::connect(&server, dir.path())?;
    assert_eq!(reopened.tokens()?, Some(tokens));
    Ok(())
}

#[tokio::test]
async fn wrong_password_raises_unauthorized() -> Result<()> {
    let server = common::spawn_server().await?;
    let dir = tempfile::tempdir()?;
    let (client, store, events) = common::connect(&server, dir.path())?;

    let unauthorized = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&unauthorized);
    let _sub = events.on(EventKind::Unauthorized, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let err = AuthApi::new(client)
        .login(&credentials("wrong"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    assert_eq!(err.to_string(), "Unauthorized: Invalid username or password");
    assert_eq!(unauthorized.load(Ordering::SeqCst), 1);
    assert_eq!(store.tokens()?, None);
    Ok(())
}

#[tokio::test]
async fn expiring_session_is_refreshed_once_for_concurrent_calls() -> Result<()> {
    let server = common::spawn_server().await?;
    let dir = tempfile::tempdir()?;
    let (client, store, _events) = common::connect(&server, dir.path())?;
    store.save_tokens(&TokenPair::new(
        "access-old",
        "refresh-old",
        Utc::now() + Duration::seconds(10),
    ))?;

    let (a, b, c) = tokio::join!(
        client.get("/v1/echo", RequestOptions::default()),
        client.get("/v1/echo?page=2", RequestOptions::default()),
        client.get("/v1/slow", RequestOptions::default()),
    );
    let (a, b) = (a?, b?);
    c?;

    assert_eq!(Backend::count(&server.backend.refreshes), 1);
    assert_eq!(a.data()["authorization"], "Bearer access-refreshed-1");
    assert_eq!(b.data()["authorization"], "Bearer access-refreshed-1");

    // The grant carried no refresh token, so the previous one is kept
    let tokens = store.tokens()?.unwrap();
    assert_eq!(tokens.access_token, "access-refreshed-1");
    assert_eq!(tokens.refresh_token, "refresh-old");
    Ok(())
}

#[tokio::test]
async fn logout_clears_session_file() -> Result<()> {
    let server = common::spawn_server().await?;
    let dir = tempfile::tempdir()?;
    let (client, store, _events) = common::connect(&server, dir.path())?;
    let auth = AuthApi::new(client);

    auth.login(&credentials(common::PASSWORD)).await?;
    auth.logout().await?;

    assert_eq!(Backend::count(&server.backend.logouts), 1);
    assert_eq!(store.tokens()?, None);
    assert_eq!(store.tenant()?, None);
    assert!(!auth.status()?.authenticated);
    Ok(())
}
