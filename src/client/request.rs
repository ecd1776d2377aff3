use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::client::transport::Method;
use crate::error::ApiError;
use crate::session::TokenPair;

pub const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";
pub const CSRF_HEADER: &str = "X-CSRF-Token";
pub const CACHE_BUST_PARAM: &str = "_t";

/// Per-call knobs
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Extra query parameters, appended after any already in the URL
    pub query: Vec<(String, String)>,
    /// Extra headers, sent after the standard ones
    pub headers: Vec<(String, String)>,
    /// Share the result with identical concurrent calls
    pub dedupe: bool,
    /// Append the `_t` timestamp parameter
    pub cache_bust: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            headers: Vec::new(),
            dedupe: true,
            cache_bust: true,
        }
    }
}

impl RequestOptions {
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn no_dedupe(mut self) -> Self {
        self.dedupe = false;
        self
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// The payload, with the `{ "success": true, "data": ... }` envelope
    /// removed when the backend used one
    pub fn data(&self) -> &Value {
        unwrap_envelope(&self.body)
    }

    pub fn into_data(self) -> Value {
        match self.body {
            Value::Object(mut map) if is_envelope(&map) => map.remove("data").unwrap_or(Value::Null),
            body => body,
        }
    }

    /// Deserialize the payload
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_value(self.data().clone()).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

fn is_envelope(map: &serde_json::Map<String, Value>) -> bool {
    map.contains_key("data") && map.get("success").map_or(false, Value::is_boolean)
}

pub fn unwrap_envelope(body: &Value) -> &Value {
    match body {
        Value::Object(map) if is_envelope(map) => map.get("data").unwrap_or(body),
        _ => body,
    }
}

/// Join a request path onto the API base. Absolute http(s) URLs are used as is.
pub fn resolve_url(base: &Url, target: &str, query: &[(String, String)]) -> Result<Url, ApiError> {
    let mut url = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target)?
    } else {
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            target.trim_start_matches('/')
        );
        Url::parse(&joined)?
    };

    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// URL with query string and fragment stripped; failures are tracked per key
pub fn endpoint_key(url: &Url) -> String {
    let mut key = url.clone();
    key.set_query(None);
    key.set_fragment(None);
    key.to_string()
}

/// Identity of a request for coalescing: method, full URL, serialized body
pub fn fingerprint(method: Method, url: &Url, body: Option<&Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_str().as_bytes());
    hasher.update(b"\n");
    if let Some(body) = body {
        hasher.update(body.to_string().as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Standard outgoing headers. The tenant header needs both a token and a
/// non-empty tenant; anonymous requests never carry one.
pub fn build_headers(
    tokens: Option<&TokenPair>,
    tenant: Option<&str>,
    csrf_token: Option<&str>,
    tenant_header: &str,
) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), JSON_CONTENT_TYPE.to_string()),
        ("Accept".to_string(), JSON_CONTENT_TYPE.to_string()),
    ];

    if let Some(tokens) = tokens.filter(|t| !t.access_token.is_empty()) {
        headers.push(("Authorization".to_string(), format!("Bearer {}", tokens.access_token)));

        if let Some(tenant) = tenant.filter(|t| !t.is_empty()) {
            headers.push((tenant_header.to_string(), tenant.to_string()));
        }
    }

    if let Some(csrf) = csrf_token.filter(|t| !t.is_empty()) {
        headers.push((CSRF_HEADER.to_string(), csrf.to_string()));
    }

    headers
}

/// Layer caller headers over the standard set. A caller header replaces any
/// header of the same name, compared case-insensitively.
pub fn merge_headers(headers: &mut Vec<(String, String)>, extra: &[(String, String)]) {
    for (name, value) in extra {
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
}

pub fn append_cache_buster(url: &mut Url, millis: i64) {
    url.query_pairs_mut()
        .append_pair(CACHE_BUST_PARAM, &millis.to_string());
}
