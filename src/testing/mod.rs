use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::events::EventBus;
use crate::session::TokenStore;

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// Scripted transport that records every request it is handed
pub struct MockTransport {
    responder: Responder,
    delay: Duration,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer 200 with `body`
    pub fn ok(body: serde_json::Value) -> Self {
        Self::new(move |_| Ok(HttpResponse::new(200, body.clone())))
    }

    /// Hold each response for `delay` so concurrent callers overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose URL path ends with `suffix`
    pub fn calls_to(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.path().ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(&request)
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::development();
    config.api.base_url = "http://console.test/api".to_string();
    config
}

/// Client wired to a mock transport and its own event bus
pub fn test_client(transport: Arc<MockTransport>, store: Arc<dyn TokenStore>) -> (ApiClient, EventBus) {
    let events = EventBus::new();
    let client = ApiClient::builder(test_config())
        .transport(transport)
        .store(store)
        .events(events.clone())
        .build()
        .unwrap();
    (client, events)
}
