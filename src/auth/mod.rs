use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::{ApiClient, RequestOptions};
use crate::error::ApiError;
use crate::session::{jwt, TokenGrant, TokenPair};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

/// Local view of the stored session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub tenant: Option<String>,
    pub user: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

/// Login, logout and tenant switching on top of [`ApiClient`]. This and the
/// refresh coordinator are the only writers of the token store.
#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<TokenPair, ApiError> {
        let body = serde_json::to_value(credentials).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
        let path = self.client.config().api.login_path.clone();

        let response = self
            .client
            .post(&path, Some(body), RequestOptions::default().no_dedupe())
            .await?;

        let tokens = TokenGrant::from_body(&response.body)?.into_token_pair(None)?;
        let store = self.client.store();
        store.save_tokens(&tokens)?;
        if let Some(tenant) = credentials.tenant.as_deref() {
            store.set_tenant(Some(tenant))?;
        }

        info!(user = %credentials.username, tenant = ?credentials.tenant, "logged in");
        Ok(tokens)
    }

    /// Tell the backend, then drop the local session whatever it answered
    pub async fn logout(&self) -> Result<(), ApiError> {
        if self.client.store().tokens()?.is_some() {
            let path = self.client.config().api.logout_path.clone();
            if let Err(e) = self.client.post(&path, None, RequestOptions::default()).await {
                warn!(error = %e, "logout request failed, clearing local session anyway");
            }
        }

        let store = self.client.store();
        store.clear_tokens()?;
        store.set_tenant(None)?;
        info!("logged out");
        Ok(())
    }

    /// Ask the backend whether the current token is still accepted
    pub async fn token_status(&self) -> Result<Value, ApiError> {
        let path = self.client.config().api.token_status_path.clone();
        let response = self.client.get(&path, RequestOptions::default()).await?;
        Ok(response.into_data())
    }

    pub async fn refresh(&self) -> Result<TokenPair, ApiError> {
        self.client.refresher().refresh_now().await?;
        self.client.store().tokens()?.ok_or_else(|| ApiError::Unauthorized {
            message: "No session to refresh".to_string(),
        })
    }

    pub fn status(&self) -> Result<SessionStatus, ApiError> {
        let store = self.client.store();
        let tokens = store.tokens()?;
        let tenant = store.tenant()?;
        let user = tokens
            .as_ref()
            .and_then(|t| jwt::read_claims(&t.access_token))
            .and_then(|claims| claims.user.or(claims.sub));

        Ok(SessionStatus {
            authenticated: tokens.is_some(),
            tenant,
            user,
            expires_at: tokens.as_ref().map(|t| t.expires_at),
            expired: tokens.as_ref().map_or(false, TokenPair::is_expired),
        })
    }

    pub fn switch_tenant(&self, tenant: Option<&str>) -> Result<(), ApiError> {
        self.client.store().set_tenant(tenant.filter(|t| !t.is_empty()))?;
        Ok(())
    }
}
