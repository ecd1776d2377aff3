use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::session::{
    jwt, StoreError, TokenPair, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, TENANT_KEY,
    TOKEN_EXPIRES_KEY,
};

pub const SESSION_FILE: &str = "session.json";

/// Directory holding CLI state. `CONSOLE_CLI_CONFIG_DIR` wins, otherwise
/// `$HOME/.config/tenant-console`. Created if missing.
pub fn get_config_dir() -> Result<PathBuf, StoreError> {
    let config_dir = if let Ok(custom_dir) = std::env::var("CONSOLE_CLI_CONFIG_DIR") {
        PathBuf::from(custom_dir)
    } else {
        let home = std::env::var("HOME")
            .map_err(|_| StoreError::NoConfigDir("HOME environment variable not set".to_string()))?;
        PathBuf::from(home).join(".config").join("tenant-console")
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Session state persisted as one flat JSON object of string keys, the
/// same shape the browser keeps in local storage.
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `session.json` in the CLI config directory
    pub fn open_default() -> Result<Self, StoreError> {
        Ok(Self::new(get_config_dir()?.join(SESSION_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        apply(&mut entries);
        self.save(&entries)
    }
}

impl TokenStore for FileTokenStore {
    fn tokens(&self) -> Result<Option<TokenPair>, StoreError> {
        let entries = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.load()?
        };

        let (Some(access_token), Some(refresh_token)) =
            (entries.get(ACCESS_TOKEN_KEY), entries.get(REFRESH_TOKEN_KEY))
        else {
            return Ok(None);
        };

        let expires_at = match entries.get(TOKEN_EXPIRES_KEY) {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| StoreError::InvalidValue {
                    key: TOKEN_EXPIRES_KEY,
                    reason: e.to_string(),
                })?,
            // Older sessions only kept the tokens; read expiry from the JWT
            None => jwt::access_token_expiry(access_token).ok_or_else(|| StoreError::InvalidValue {
                key: TOKEN_EXPIRES_KEY,
                reason: "missing and not derivable from the access token".to_string(),
            })?,
        };

        Ok(Some(TokenPair {
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            expires_at,
        }))
    }

    fn save_tokens(&self, tokens: &TokenPair) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(ACCESS_TOKEN_KEY.to_string(), tokens.access_token.clone());
            entries.insert(REFRESH_TOKEN_KEY.to_string(), tokens.refresh_token.clone());
            entries.insert(TOKEN_EXPIRES_KEY.to_string(), tokens.expires_at.to_rfc3339());
        })?;
        tracing::debug!(path = %self.path.display(), "stored session tokens");
        Ok(())
    }

    fn clear_tokens(&self) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(ACCESS_TOKEN_KEY);
            entries.remove(REFRESH_TOKEN_KEY);
            entries.remove(TOKEN_EXPIRES_KEY);
        })
    }

    fn tenant(&self) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(TENANT_KEY).filter(|t| !t.is_empty()))
    }

    fn set_tenant(&self, tenant: Option<&str>) -> Result<(), StoreError> {
        self.update(|entries| match tenant {
            Some(tenant) => {
                entries.insert(TENANT_KEY.to_string(), tenant.to_string());
            }
            None => {
                entries.remove(TENANT_KEY);
            }
        })
    }
}
