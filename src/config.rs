use anyhow::{Context, Result};
use keyring::Entry;
use std::path::PathBuf;
use std::time::Duration;

use crate::api::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::error::ProviderError;
use crate::history::MAX_SAVED_CONVERSATIONS;

const KEYRING_SERVICE: &str = "riskchat_api_key";
const DEFAULT_API_KEY_REF: &str = "env:GEMINI_API_KEY";
const DEFAULT_USER: &str = "testuser";

// Values deployments ship when the real key was never injected
const KNOWN_INVALID_PLACEHOLDERS: [&str; 4] = [
    "RUNTIME_API_KEY_NOT_SET",
    "MISSING_API_KEY_PLACEHOLDER",
    "FALLBACK_INVALID_KEY_RUNTIME",
    "",
];

/// Application settings. Every field can be overridden from `RISKCHAT_*` environment variables.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatConfig {
    pub model: String,
    pub api_url: String,
    // 'env:NAME' or 'keyring'
    pub api_key_ref: String,
    pub db_path: Option<PathBuf>,
    pub max_saved_conversations: usize,
    pub request_timeout_secs: Option<u64>,
    pub locale: String,
    pub locale_dir: Option<PathBuf>,
    pub user_id: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            api_key_ref: DEFAULT_API_KEY_REF.to_string(),
            db_path: None,
            max_saved_conversations: MAX_SAVED_CONVERSATIONS,
            request_timeout_secs: None,
            locale: crate::i18n::DEFAULT_LOCALE.to_string(),
            locale_dir: None,
            user_id: DEFAULT_USER.to_string(),
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source (the process environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(model) = var("RISKCHAT_MODEL") {
            config.model = model;
        }
        if let Some(url) = var("RISKCHAT_API_URL") {
            config.api_url = url;
        }
        if let Some(key_ref) = var("RISKCHAT_API_KEY_REF") {
            config.api_key_ref = key_ref;
        }
        if let Some(path) = var("RISKCHAT_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(max) = var("RISKCHAT_MAX_CONVERSATIONS") {
            config.max_saved_conversations = max
                .parse()
                .with_context(|| format!("RISKCHAT_MAX_CONVERSATIONS must be a number, got '{}'", max))?;
            if config.max_saved_conversations == 0 {
                anyhow::bail!("RISKCHAT_MAX_CONVERSATIONS must be at least 1");
            }
        }
        if let Some(secs) = var("RISKCHAT_TIMEOUT_SECS") {
            config.request_timeout_secs = Some(
                secs.parse()
                    .with_context(|| format!("RISKCHAT_TIMEOUT_SECS must be a number, got '{}'", secs))?,
            );
        }
        if let Some(locale) = var("RISKCHAT_LOCALE") {
            config.locale = locale;
        }
        if let Some(dir) = var("RISKCHAT_LOCALE_DIR") {
            config.locale_dir = Some(PathBuf::from(dir));
        }
        if let Some(user) = var("RISKCHAT_USER") {
            config.user_id = user;
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Explicit path, or `<data dir>/riskchat/riskchat.sqlite`.
    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.db_path {
            return Ok(path.clone());
        }
        let base = dirs::data_local_dir().context("Failed to resolve local data directory")?;
        Ok(base.join("riskchat").join("riskchat.sqlite"))
    }
}

/// Retrieves the provider API key. `api_key_ref` selects environment variable
/// (`env:NAME`) or OS keyring (`keyring`). Placeholder values count as missing.
pub fn get_api_key(config: &ChatConfig) -> Result<String, ProviderError> {
    let key = match config.api_key_ref.as_str() {
        ref_str if ref_str.starts_with("env:") => {
            let env_var_name = ref_str.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", env_var_name);
            std::env::var(env_var_name).ok()
        }
        "keyring" => {
            log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
            Entry::new(KEYRING_SERVICE, &config.model)
                .and_then(|entry| entry.get_password())
                .map_err(|e| log::error!("Failed to read API key from keyring: {}", e))
                .ok()
        }
        other => {
            log::error!("Unsupported api_key_ref format: {}", other);
            None
        }
    };

    match key {
        Some(key) if !is_placeholder(&key) => Ok(key),
        Some(key) => {
            log::warn!("API key is a placeholder ('{}'); set a real key", key);
            Err(ProviderError::AuthMissing)
        }
        None => Err(ProviderError::AuthMissing),
    }
}

fn is_placeholder(key: &str) -> bool {
    KNOWN_INVALID_PLACEHOLDERS.contains(&key.trim())
}
