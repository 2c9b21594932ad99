//! Credential provider injected into both gateways
//!
//! Gateways ask the provider for a credential at the start of every call and
//! never keep a copy. The provider is created once at startup and reloaded
//! whenever settings change.

use crate::keyring::{CredentialStore, GITHUB_TOKEN_KEY, MODEL_API_KEY};
use std::sync::Arc;

/// Environment variable that overrides the stored GitHub token
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";
/// Environment variable holding the system default model key
pub const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

pub trait CredentialProvider: Send + Sync {
    /// Bearer token for the repository host.
    fn repository_token(&self) -> Option<String>;
    /// User-configured model API key, if any.
    fn model_api_key(&self) -> Option<String>;
    /// System default model API key used when no user key is set or the user
    /// key is rejected.
    fn default_model_api_key(&self) -> Option<String>;
}

/// Provider reading from a [`CredentialStore`]
pub struct StoredCredentials {
    store: Arc<dyn CredentialStore>,
    token_override: Option<String>,
    default_model_key: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl StoredCredentials {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        token_override: Option<String>,
        default_model_key: Option<String>,
    ) -> Self {
        Self {
            store,
            token_override: non_empty(token_override),
            default_model_key: non_empty(default_model_key),
        }
    }

    /// Load the provider with the environment overrides applied.
    pub fn from_env(store: Arc<dyn CredentialStore>) -> Self {
        Self::new(
            store,
            std::env::var(GITHUB_TOKEN_ENV).ok(),
            std::env::var(DEFAULT_API_KEY_ENV).ok(),
        )
    }

    pub fn store_label(&self) -> &'static str {
        self.store.label()
    }

    /// Re-read the backing store after a settings change.
    pub fn reload(&self) {
        self.store.reload();
    }

    pub fn set_repository_token(&self, token: &str) -> Result<(), String> {
        self.store.set(GITHUB_TOKEN_KEY, token.trim())
    }

    pub fn set_model_api_key(&self, key: &str) -> Result<(), String> {
        self.store.set(MODEL_API_KEY, key.trim())
    }

    pub fn clear_model_api_key(&self) -> Result<(), String> {
        self.store.remove(MODEL_API_KEY)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => non_empty(value),
            Err(err) => {
                tracing::warn!("couldn't read {} from {}: {}", key, self.store.label(), err);
                None
            }
        }
    }
}

impl CredentialProvider for StoredCredentials {
    fn repository_token(&self) -> Option<String> {
        self.token_override
            .clone()
            .or_else(|| self.read(GITHUB_TOKEN_KEY))
    }

    fn model_api_key(&self) -> Option<String> {
        self.read(MODEL_API_KEY)
    }

    fn default_model_api_key(&self) -> Option<String> {
        self.default_model_key.clone()
    }
}

/// Validate model API key format.
pub fn looks_like_model_key(key: &str) -> bool {
    key.trim().starts_with("sk-")
}

/// Validate GitHub token format.
pub fn looks_like_github_token(token: &str) -> bool {
    let token = token.trim();
    ["ghp_", "gho_", "ghu_", "ghs_", "github_pat_"]
        .iter()
        .any(|prefix| token.starts_with(prefix))
}
