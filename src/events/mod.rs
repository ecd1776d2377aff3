//! Process-wide publish/subscribe channel between the request client and
//! whatever reacts to failures (toasts, forced logout, redirects).
//!
//! Events are a closed enum so subscribers match exhaustively instead of
//! comparing event-name strings. Handlers run synchronously, in registration
//! order, on the thread that emitted the event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use once_cell::sync::Lazy;

use crate::client::transport::Method;
use crate::error::ApiError;

/// Event names as the UI shell knows them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    ServerError,
    RequestError,
    NetworkError,
    RequestBlocked,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::Unauthorized,
        EventKind::Forbidden,
        EventKind::NotFound,
        EventKind::ValidationError,
        EventKind::ServerError,
        EventKind::RequestError,
        EventKind::NetworkError,
        EventKind::RequestBlocked,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Unauthorized => "unauthorized",
            EventKind::Forbidden => "forbidden",
            EventKind::NotFound => "not-found",
            EventKind::ValidationError => "validation-error",
            EventKind::ServerError => "server-error",
            EventKind::RequestError => "request-error",
            EventKind::NetworkError => "network-error",
            EventKind::RequestBlocked => "request-blocked",
        }
    }
}

/// The request that failed and how
#[derive(Debug, Clone)]
pub struct RequestFailure {
    pub method: Method,
    pub url: String,
    pub error: ApiError,
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Unauthorized(RequestFailure),
    Forbidden(RequestFailure),
    NotFound(RequestFailure),
    ValidationError(RequestFailure),
    ServerError(RequestFailure),
    RequestError(RequestFailure),
    NetworkError(RequestFailure),
    RequestBlocked(RequestFailure),
}

impl ClientEvent {
    /// Map a failed request to the event it should raise. Errors that never
    /// reached classification (bad URL, undecodable body, store I/O) raise
    /// nothing and are only returned to the caller.
    pub fn from_failure(failure: RequestFailure) -> Option<Self> {
        let event = match &failure.error {
            ApiError::Unauthorized { .. } => ClientEvent::Unauthorized(failure),
            ApiError::Forbidden { .. } => ClientEvent::Forbidden(failure),
            ApiError::NotFound { .. } => ClientEvent::NotFound(failure),
            ApiError::Validation { .. } => ClientEvent::ValidationError(failure),
            ApiError::Server { .. } => ClientEvent::ServerError(failure),
            ApiError::Request { .. } => ClientEvent::RequestError(failure),
            ApiError::Network(_) => ClientEvent::NetworkError(failure),
            ApiError::Blocked { .. } => ClientEvent::RequestBlocked(failure),
            ApiError::InvalidRequest(_) | ApiError::Decode(_) | ApiError::Storage(_) => return None,
        };
        Some(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Unauthorized(_) => EventKind::Unauthorized,
            ClientEvent::Forbidden(_) => EventKind::Forbidden,
            ClientEvent::NotFound(_) => EventKind::NotFound,
            ClientEvent::ValidationError(_) => EventKind::ValidationError,
            ClientEvent::ServerError(_) => EventKind::ServerError,
            ClientEvent::RequestError(_) => EventKind::RequestError,
            ClientEvent::NetworkError(_) => EventKind::NetworkError,
            ClientEvent::RequestBlocked(_) => EventKind::RequestBlocked,
        }
    }

    pub fn failure(&self) -> &RequestFailure {
        match self {
            ClientEvent::Unauthorized(f)
            | ClientEvent::Forbidden(f)
            | ClientEvent::NotFound(f)
            | ClientEvent::ValidationError(f)
            | ClientEvent::ServerError(f)
            | ClientEvent::RequestError(f)
            | ClientEvent::NetworkError(f)
            | ClientEvent::RequestBlocked(f) => f,
        }
    }
}

type Handler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

struct Listener {
    id: u64,
    // None listens to every kind
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<Listener>>,
    next_id: AtomicU64,
}

/// Cheap to clone; clones share the same listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

static GLOBAL_BUS: Lazy<EventBus> = Lazy::new(EventBus::new);

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bus shared by the whole process. Created on first use, never torn down.
    pub fn global() -> &'static EventBus {
        &GLOBAL_BUS
    }

    /// Subscribe to one kind of event
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    fn subscribe(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Listener { id, kind, handler });

        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every matching handler. The listener list is
    /// snapshotted first so handlers may subscribe or unsubscribe freely.
    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|listener| listener.kind.map_or(true, |k| k == kind))
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        tracing::debug!(
            event = kind.name(),
            url = %event.failure().url,
            handlers = handlers.len(),
            "emitting client event"
        );

        for handler in handlers {
            handler(&event);
        }
    }

    /// Classify and emit a request failure, if it maps to an event
    pub fn emit_failure(&self, method: Method, url: &str, error: &ApiError) {
        let failure = RequestFailure {
            method,
            url: url.to_string(),
            error: error.clone(),
        };
        if let Some(event) = ClientEvent::from_failure(failure) {
            self.emit(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Handle returned by [`EventBus::on`]. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut listeners = bus.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|listener| listener.id != self.id);
        listeners.len() != before
    }
}
