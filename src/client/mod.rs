//! The request client: every call the console makes to its backend goes
//! through [`ApiClient`], which attaches session headers, waits on token
//! refresh, refuses endpoints that keep failing, and shares one network
//! call between identical concurrent requests.

pub mod registry;
pub mod request;
pub mod transport;

use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::events::EventBus;
use crate::session::{MemoryTokenStore, RefreshCoordinator, TokenStore};

use registry::{FailureRegistry, InFlightGuard, InFlightRegistry};
pub use request::{ApiResponse, RequestOptions};
use transport::{HttpRequest, ReqwestTransport, Transport};
pub use transport::Method;

struct ClientInner {
    config: ClientConfig,
    base_url: Url,
    transport: Arc<dyn Transport>,
    store: Arc<dyn TokenStore>,
    events: EventBus,
    refresher: Arc<RefreshCoordinator>,
    failures: FailureRegistry,
    in_flight: Arc<InFlightRegistry>,
    csrf_token: RwLock<Option<String>>,
}

/// Cheap to clone; clones share registries, store and bus.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn TokenStore>>,
    events: Option<EventBus>,
}

impl ApiClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a private bus instead of the process-wide one
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<ApiClient, ApiError> {
        let base_url = self
            .config
            .api_base_url()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.timeout())?),
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()) as Arc<dyn TokenStore>);
        let events = self.events.unwrap_or_else(|| EventBus::global().clone());

        let refresh_url = request::resolve_url(&base_url, &self.config.api.refresh_path, &[])?;
        let refresher = Arc::new(
            RefreshCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&transport),
                events.clone(),
                refresh_url,
                self.config.refresh_skew(),
            )
            .with_idle_poll(std::time::Duration::from_secs(self.config.session.idle_poll_secs)),
        );

        let failures = FailureRegistry::new(self.config.failure_policy());

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                base_url,
                transport,
                store,
                events,
                refresher,
                failures,
                in_flight: Arc::new(InFlightRegistry::new()),
                csrf_token: RwLock::new(None),
            }),
        })
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: None,
            store: None,
            events: None,
        }
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<ApiResponse, ApiError> {
        self.request(Method::Get, url, None, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::Post, url, body, options).await
    }

    pub async fn put(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::Put, url, body, options).await
    }

    pub async fn patch(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::Patch, url, body, options).await
    }

    pub async fn delete(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.request(Method::Delete, url, body, options).await
    }

    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let target = request::resolve_url(&self.inner.base_url, url, &options.query)?;
        let endpoint = request::endpoint_key(&target);

        if let Some(blocked) = self.inner.failures.check(&endpoint) {
            warn!(
                method = method.as_str(),
                endpoint = %endpoint,
                failures = blocked.failures,
                retry_after_secs = blocked.retry_after.as_secs(),
                "request blocked after repeated failures"
            );
            let error = ApiError::Blocked {
                endpoint,
                failures: blocked.failures,
                retry_after: blocked.retry_after,
            };
            self.inner.events.emit_failure(method, target.as_str(), &error);
            return Err(error);
        }

        if !options.dedupe {
            return Arc::clone(&self.inner).execute(method, target, body, options, None).await;
        }

        let fingerprint = request::fingerprint(method, &target, body.as_ref());
        let inner = Arc::clone(&self.inner);
        let (pending, started) = self.inner.in_flight.join_or_start(&fingerprint, move |guard| {
            // Runs to completion on its own task, so the entry is cleared even
            // when every caller has stopped waiting
            let task = tokio::spawn(inner.execute(method, target, body, options, Some(guard)));
            async move {
                task.await
                    .unwrap_or_else(|e| Err(ApiError::Network(format!("request task failed: {}", e))))
            }
            .boxed()
            .shared()
        });
        if !started {
            debug!(method = method.as_str(), url, "joined in-flight request");
        }

        pending.await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    pub fn refresher(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.refresher
    }

    /// Token sent as `X-CSRF-Token`; `None` stops sending it
    pub fn set_csrf_token(&self, token: Option<String>) {
        *self
            .inner
            .csrf_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Consecutive 500/503 failures recorded for the endpoint of `url`
    pub fn failure_count(&self, url: &str) -> Result<u32, ApiError> {
        let target = request::resolve_url(&self.inner.base_url, url, &[])?;
        Ok(self.inner.failures.failures(&request::endpoint_key(&target)))
    }
}

impl ClientInner {
    /// Login, refresh and token-status, matched on the full path below the
    /// API base
    fn is_auth_endpoint(&self, url: &Url) -> bool {
        if url.origin() != self.base_url.origin() {
            return false;
        }
        let Some(path) = url.path().strip_prefix(self.base_url.path().trim_end_matches('/')) else {
            return false;
        };
        let path = path.trim_end_matches('/');
        self.config.auth_paths().iter().any(|auth_path| {
            let auth_path = auth_path.trim_end_matches('/');
            !auth_path.is_empty() && path == format!("/{}", auth_path.trim_start_matches('/'))
        })
    }

    fn csrf_token(&self) -> Option<String> {
        self.csrf_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn execute(
        self: Arc<Self>,
        method: Method,
        mut url: Url,
        body: Option<Value>,
        options: RequestOptions,
        guard: Option<InFlightGuard>,
    ) -> Result<ApiResponse, ApiError> {
        // Dropped when this future finishes, clearing the in-flight entry
        let _guard = guard;

        if !self.is_auth_endpoint(&url) {
            self.refresher.check_and_refresh_token().await?;
        }

        let tokens = self.store.tokens()?;
        let tenant = self.store.tenant()?;
        let csrf = self.csrf_token();
        let mut headers = request::build_headers(
            tokens.as_ref(),
            tenant.as_deref(),
            csrf.as_deref(),
            &self.config.api.tenant_header,
        );
        request::merge_headers(&mut headers, &options.headers);

        let endpoint = request::endpoint_key(&url);
        if options.cache_bust {
            request::append_cache_buster(&mut url, chrono::Utc::now().timestamp_millis());
        }

        debug!(method = method.as_str(), url = %url, "sending request");
        let outgoing = HttpRequest {
            method,
            url: url.clone(),
            headers,
            body,
        };

        let response = match self.transport.send(outgoing).await {
            Ok(response) => response,
            Err(e) => {
                let error = ApiError::from(e);
                warn!(method = method.as_str(), url = %url, error = %error, "request failed before a response");
                self.events.emit_failure(method, url.as_str(), &error);
                return Err(error);
            }
        };

        if response.is_success() {
            self.failures.record_success(&endpoint);
            return Ok(ApiResponse::new(response.status, response.body));
        }

        let error = ApiError::from_response(response.status, &response.body);
        if matches!(response.status, 500 | 503) {
            let failures = self.failures.record_failure(&endpoint);
            warn!(
                method = method.as_str(),
                endpoint = %endpoint,
                status = response.status,
                failures,
                "server failure recorded"
            );
        } else {
            debug!(method = method.as_str(), url = %url, status = response.status, "request rejected");
        }

        self.events.emit_failure(method, url.as_str(), &error);
        Err(error)
    }
}
