pub mod file_store;
pub mod jwt;
pub mod refresh;

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use file_store::FileTokenStore;
pub use refresh::{RefreshCoordinator, TokenGrant};

// Fixed keys of the persisted session state
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const TOKEN_EXPIRES_KEY: &str = "token_expires_at";
pub const TENANT_KEY: &str = "tenant_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid stored value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("No configuration directory: {0}")]
    NoConfigDir(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// True when the access token expires within `skew` from now
    pub fn expires_within(&self, skew: Duration) -> bool {
        Utc::now() + skew >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }
}

/// Persisted session state: the token pair and the active tenant.
/// Only the login flow and the refresh coordinator write tokens.
pub trait TokenStore: Send + Sync {
    fn tokens(&self) -> Result<Option<TokenPair>, StoreError>;

    fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError>;

    fn clear_tokens(&self) -> Result<(), StoreError>;

    fn tenant(&self) -> Result<Option<String>, StoreError>;

    fn set_tenant(&self, tenant: Option<&str>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct SessionState {
    tokens: Option<TokenPair>,
    tenant: Option<String>,
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<SessionState>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            state: Mutex::new(SessionState {
                tokens: Some(tokens),
                tenant: None,
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn tokens(&self) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).tokens.clone())
    }

    fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).tokens = Some(tokens.clone());
        Ok(())
    }

    fn clear_tokens(&self) -> Result<(), StoreError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).tokens = None;
        Ok(())
    }

    fn tenant(&self) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).tenant.clone())
    }

    fn set_tenant(&self, tenant: Option<&str>) -> Result<(), StoreError> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).tenant = tenant.map(str::to_string);
        Ok(())
    }
}
