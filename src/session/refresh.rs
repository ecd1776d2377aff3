//! Single-flight access token refresh.
//!
//! Every request that needs a valid token awaits [`RefreshCoordinator::check_and_refresh_token`].
//! While a refresh is running, later callers attach to it instead of starting
//! their own, so overlapping requests cause at most one refresh call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::request::{unwrap_envelope, JSON_CONTENT_TYPE};
use crate::client::transport::{HttpRequest, Method, Transport};
use crate::error::ApiError;
use crate::events::EventBus;
use crate::session::{jwt, TokenPair, TokenStore};

type PendingRefresh = Shared<BoxFuture<'static, Result<(), ApiError>>>;

// Floor for the auto-refresh sleep so a clock skew can't spin the loop
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Token payload of a login or refresh response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Parse a grant out of a (possibly enveloped) response body
    pub fn from_body(body: &serde_json::Value) -> Result<Self, ApiError> {
        serde_json::from_value(unwrap_envelope(body).clone())
            .map_err(|e| ApiError::Decode(format!("token grant: {}", e)))
    }

    /// Turn the grant into a storable pair. Expiry comes from `expires_in`,
    /// else from the JWT `exp` claim; a grant without a refresh token keeps
    /// the previous one.
    pub fn into_token_pair(self, previous_refresh: Option<&str>) -> Result<TokenPair, ApiError> {
        let expires_at = match self.expires_in {
            Some(seconds) => Utc::now() + chrono::Duration::seconds(seconds),
            None => jwt::access_token_expiry(&self.access_token)
                .ok_or_else(|| ApiError::Decode("token grant carries no expiry".to_string()))?,
        };

        let refresh_token = self
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string))
            .ok_or_else(|| ApiError::Decode("token grant carries no refresh token".to_string()))?;

        Ok(TokenPair {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        })
    }
}

/// Empties the pending-refresh slot when the refresh task ends, panics included
struct ClearSlot(Arc<RefreshCoordinator>);

impl Drop for ClearSlot {
    fn drop(&mut self) {
        *self.0.slot() = None;
    }
}

pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    refresh_url: Url,
    skew: chrono::Duration,
    idle_poll: Duration,
    pending: Mutex<Option<PendingRefresh>>,
    refresh_count: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        transport: Arc<dyn Transport>,
        events: EventBus,
        refresh_url: Url,
        skew: chrono::Duration,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            refresh_url,
            skew,
            idle_poll: Duration::from_secs(30),
            pending: Mutex::new(None),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// How long the auto-refresh task waits when there is nothing to watch
    /// or the last attempt failed
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure the stored access token is not about to expire. Resolves
    /// immediately when there is no session or the token is still fresh;
    /// otherwise joins (or starts) the single pending refresh.
    pub async fn check_and_refresh_token(self: &Arc<Self>) -> Result<(), ApiError> {
        self.run(false).await
    }

    /// Refresh regardless of expiry, still sharing any refresh in progress
    pub async fn refresh_now(self: &Arc<Self>) -> Result<(), ApiError> {
        self.run(true).await
    }

    async fn run(self: &Arc<Self>, force: bool) -> Result<(), ApiError> {
        let pending = {
            let mut slot = self.slot();
            match slot.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let tokens = self.store.tokens()?;
                    let needed = match &tokens {
                        Some(tokens) => force || tokens.expires_within(self.skew),
                        None => false,
                    };
                    if !needed {
                        return Ok(());
                    }

                    // Spawned so the refresh finishes, and frees the slot,
                    // even if every waiter is dropped
                    let this = Arc::clone(self);
                    let task = tokio::spawn(async move {
                        let _clear = ClearSlot(Arc::clone(&this));
                        this.refresh().await
                    });
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ApiError::Network(format!("token refresh task failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    pub fn is_refreshing(&self) -> bool {
        self.slot().is_some()
    }

    /// Number of refresh calls actually sent
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    async fn refresh(&self) -> Result<(), ApiError> {
        let Some(current) = self.store.tokens()? else {
            return Err(ApiError::Unauthorized {
                message: "No session to refresh".to_string(),
            });
        };

        let request = HttpRequest {
            method: Method::Post,
            url: self.refresh_url.clone(),
            headers: vec![
                ("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()),
                ("Accept".to_string(), JSON_CONTENT_TYPE.to_string()),
            ],
            body: Some(json!({ "refresh_token": current.refresh_token })),
        };

        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        debug!(url = %self.refresh_url, "refreshing access token");

        let result = match self.transport.send(request).await {
            Ok(response) if response.is_success() => TokenGrant::from_body(&response.body)
                .and_then(|grant| grant.into_token_pair(Some(&current.refresh_token))),
            Ok(response) => Err(ApiError::from_response(response.status, &response.body)),
            Err(e) => Err(ApiError::from(e)),
        };

        match result {
            Ok(tokens) => {
                self.store.save_tokens(&tokens)?;
                info!(expires_at = %tokens.expires_at, "access token refreshed");
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "token refresh failed");
                self.events
                    .emit_failure(Method::Post, self.refresh_url.as_str(), &error);
                Err(error)
            }
        }
    }

    /// Background task that refreshes shortly before each expiry. Failures
    /// are logged (and emitted by the refresh itself); the loop keeps going.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let delay = match this.store.tokens() {
                    Ok(Some(tokens)) => (tokens.expires_at - this.skew - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .max(MIN_REFRESH_DELAY),
                    Ok(None) => this.idle_poll,
                    Err(e) => {
                        warn!(error = %e, "cannot read session for auto refresh");
                        this.idle_poll
                    }
                };
                tokio::time::sleep(delay).await;

                if let Err(e) = this.check_and_refresh_token().await {
                    warn!(error = %e, "scheduled token refresh failed");
                    tokio::time::sleep(this.idle_poll).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::HttpResponse;
    use crate::events::EventKind;
    use crate::session::MemoryTokenStore;
    use crate::testing::MockTransport;
    use std::sync::atomic::AtomicUsize;

    fn coordinator(
        store: Arc<MemoryTokenStore>,
        transport: Arc<MockTransport>,
        events: EventBus,
    ) -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(
            store,
            transport,
            events,
            Url::parse("http://console.test/api/auth/refresh").unwrap(),
            chrono::Duration::seconds(30),
        ))
    }

    fn expiring_store() -> Arc<MemoryTokenStore> {
        Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            "old-access",
            "old-refresh",
            Utc::now() + chrono::Duration::seconds(5),
        )))
    }

    fn grant_transport() -> Arc<MockTransport> {
        Arc::new(
            MockTransport::new(|_| {
                Ok(HttpResponse::new(
                    200,
                    json!({"success": true, "data": {"access_token": "new-access", "expires_in": 3600}}),
                ))
            })
            .with_delay(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_fresh_token_skips_network() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            "access",
            "refresh",
            Utc::now() + chrono::Duration::hours(1),
        )));
        let transport = grant_transport();
        let refresher = coordinator(store, Arc::clone(&transport), EventBus::new());

        refresher.check_and_refresh_token().await.unwrap();
        assert_eq!(transport.calls(), 0);
        assert_eq!(refresher.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_no_session_skips_network() {
        let transport = grant_transport();
        let refresher = coordinator(Arc::new(MemoryTokenStore::new()), Arc::clone(&transport), EventBus::new());

        refresher.check_and_refresh_token().await.unwrap();
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let store = expiring_store();
        let transport = grant_transport();
        let refresher = coordinator(Arc::clone(&store), Arc::clone(&transport), EventBus::new());

        let (a, b, c) = tokio::join!(
            refresher.check_and_refresh_token(),
            refresher.check_and_refresh_token(),
            refresher.check_and_refresh_token(),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(transport.calls(), 1);
        assert!(!refresher.is_refreshing());

        let tokens = store.tokens().unwrap().unwrap();
        assert_eq!(tokens.access_token, "new-access");
        // Grant had no refresh token, the old one is kept
        assert_eq!(tokens.refresh_token, "old-refresh");
        assert!(!tokens.expires_within(chrono::Duration::seconds(30)));

        let request = &transport.requests()[0];
        assert_eq!(request.body, Some(json!({"refresh_token": "old-refresh"})));

        // Token is fresh now, nothing more to do
        refresher.check_and_refresh_token().await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reaches_every_waiter_and_emits_once() {
        let store = expiring_store();
        let transport = Arc::new(
            MockTransport::new(|_| Ok(HttpResponse::new(401, json!({"message": "refresh token revoked"}))))
                .with_delay(Duration::from_millis(50)),
        );
        let events = EventBus::new();
        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&emitted);
        let _sub = events.on(EventKind::Unauthorized, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let refresher = coordinator(Arc::clone(&store), Arc::clone(&transport), events);

        let (a, b) = tokio::join!(refresher.check_and_refresh_token(), refresher.check_and_refresh_token());
        assert!(a.unwrap_err().is_unauthorized());
        assert!(b.unwrap_err().is_unauthorized());
        assert_eq!(transport.calls(), 1);
        assert_eq!(emitted.load(Ordering::SeqCst), 1);

        // Stored tokens untouched; logout is the caller's decision
        assert_eq!(store.tokens().unwrap().unwrap().access_token, "old-access");
    }

    #[tokio::test]
    async fn test_refresh_now_ignores_expiry() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            "access",
            "refresh",
            Utc::now() + chrono::Duration::hours(1),
        )));
        let transport = grant_transport();
        let refresher = coordinator(Arc::clone(&store), Arc::clone(&transport), EventBus::new());

        refresher.refresh_now().await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert_eq!(refresher.refresh_count(), 1);
        assert_eq!(store.tokens().unwrap().unwrap().access_token, "new-access");
    }

    #[test]
    fn test_grant_aliases() {
        let grant = TokenGrant::from_body(&json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expiresIn": 60
        }))
        .unwrap();
        let pair = grant.into_token_pair(None).unwrap();
        assert_eq!(pair.refresh_token, "r");

        let grant = TokenGrant::from_body(&json!({"token": "opaque"})).unwrap();
        assert!(matches!(grant.into_token_pair(Some("r")), Err(ApiError::Decode(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_completes_when_waiter_is_dropped() {
        let store = expiring_store();
        let transport = grant_transport();
        let refresher = coordinator(Arc::clone(&store), Arc::clone(&transport), EventBus::new());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), refresher.check_and_refresh_token()).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(!refresher.is_refreshing());
        assert_eq!(transport.calls(), 1);
        assert_eq!(store.tokens().unwrap().unwrap().access_token, "new-access");

        // Fresh now, so no second call
        refresher.check_and_refresh_token().await.unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_fires_before_expiry() {
        let store = Arc::new(MemoryTokenStore::with_tokens(TokenPair::new(
            "access",
            "refresh",
            Utc::now() + chrono::Duration::seconds(20),
        )));
        let transport = grant_transport();
        let refresher = coordinator(Arc::clone(&store), Arc::clone(&transport), EventBus::new());

        // Already inside the skew, so the first wake-up after the minimum
        // delay refreshes; the next one is an hour out
        let handle = refresher.spawn_auto_refresh();
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();

        assert_eq!(transport.calls(), 1);
        assert_eq!(store.tokens().unwrap().unwrap().access_token, "new-access");
    }
}
