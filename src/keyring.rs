//! Credential storage
//!
//! All forge credentials live in a single keychain entry (one macOS prompt
//! instead of several), stored as a JSON map. When the keychain is disabled
//! or unavailable, a `0600` JSON file under the config directory is used.

use keyring::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Store key for the GitHub token
pub const GITHUB_TOKEN_KEY: &str = "github_token";
/// Store key for the user's OpenRouter API key
pub const MODEL_API_KEY: &str = "openrouter_api_key";

const KEYRING_SERVICE: &str = "forge-credentials";
const KEYRING_USERNAME: &str = "default";

pub type KeyringResult<T> = Result<T, String>;

type StoredCredentials = BTreeMap<String, String>;

/// Key-value credential storage
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> KeyringResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> KeyringResult<()>;
    fn remove(&self, key: &str) -> KeyringResult<()>;
    /// Drop any cached values so the next read hits the backing storage.
    fn reload(&self) {}
    /// Human-friendly backend label used in CLI messages.
    fn label(&self) -> &'static str;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ============================================================================
// System keychain with file fallback
// ============================================================================

/// Credential store backed by the system keychain (or the fallback file).
#[derive(Debug)]
pub struct SystemStore {
    file_path: Option<PathBuf>,
    use_keychain: bool,
    cached: Mutex<Option<StoredCredentials>>,
    error_warned: AtomicBool,
}

impl SystemStore {
    /// Pick the backend from the environment.
    ///
    /// `FORGE_DISABLE_KEYRING=1` forces the file backend, as does an existing
    /// credentials file that already holds values.
    pub fn from_env() -> Self {
        let file_path = fallback_credentials_path();
        let disabled_by_env = matches!(
            std::env::var("FORGE_DISABLE_KEYRING")
                .unwrap_or_default()
                .to_lowercase()
                .as_str(),
            "1" | "true" | "yes"
        );
        let file_has_values = file_path
            .as_ref()
            .and_then(|path| read_credentials_file(path).ok())
            .map(|creds| !creds.is_empty())
            .unwrap_or(false);

        Self {
            file_path,
            use_keychain: !(cfg!(test) || disabled_by_env || file_has_values),
            cached: Mutex::new(None),
            error_warned: AtomicBool::new(false),
        }
    }

    /// File-only store at an explicit path.
    pub fn with_file(path: PathBuf) -> Self {
        Self {
            file_path: Some(path),
            use_keychain: false,
            cached: Mutex::new(None),
            error_warned: AtomicBool::new(false),
        }
    }

    fn file_path(&self) -> KeyringResult<&PathBuf> {
        self.file_path
            .as_ref()
            .ok_or_else(|| "Could not determine credentials file path".to_string())
    }

    fn keyring_entry() -> Result<Entry, keyring::Error> {
        Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
    }

    fn read_uncached(&self) -> KeyringResult<StoredCredentials> {
        if !self.use_keychain {
            return read_credentials_file(self.file_path()?);
        }
        let entry = Self::keyring_entry().map_err(|e| e.to_string())?;
        match entry.get_password() {
            Ok(json) => {
                serde_json::from_str(&json).map_err(|e| format!("Failed to parse credentials: {}", e))
            }
            Err(keyring::Error::NoEntry) => Ok(StoredCredentials::default()),
            Err(err) => Err(err.to_string()),
        }
    }

    fn write(&self, creds: &StoredCredentials) -> KeyringResult<()> {
        if !self.use_keychain {
            return write_credentials_file(self.file_path()?, creds);
        }
        let entry = Self::keyring_entry().map_err(|e| e.to_string())?;
        let json = serde_json::to_string(creds)
            .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
        entry.set_password(&json).map_err(|e| e.to_string())
    }

    fn read_cached(&self) -> KeyringResult<StoredCredentials> {
        let mut guard = lock(&self.cached);
        if let Some(creds) = guard.as_ref() {
            return Ok(creds.clone());
        }
        let creds = self.read_uncached().inspect_err(|err| self.warn_once(err))?;
        *guard = Some(creds.clone());
        Ok(creds)
    }

    /// Read-modify-write of the whole bundle. An unreadable bundle is never
    /// overwritten, so one failed read cannot drop the other keys.
    fn update(&self, apply: impl FnOnce(&mut StoredCredentials)) -> KeyringResult<()> {
        let mut creds = self
            .read_cached()
            .map_err(|err| format!("Not saving credentials: {}", err))?;
        apply(&mut creds);
        self.write(&creds)?;
        *lock(&self.cached) = Some(creds);
        Ok(())
    }

    /// Warn about keychain errors only once per session
    fn warn_once(&self, err: &str) {
        if self.error_warned.swap(true, Ordering::Relaxed) {
            return;
        }
        tracing::warn!(
            "couldn't access {} ({}); set FORGE_DISABLE_KEYRING=1 to use the credentials file",
            self.label(),
            err
        );
    }
}

impl CredentialStore for SystemStore {
    fn get(&self, key: &str) -> KeyringResult<Option<String>> {
        Ok(self.read_cached()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> KeyringResult<()> {
        self.update(|creds| {
            creds.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> KeyringResult<()> {
        self.update(|creds| {
            creds.remove(key);
        })
    }

    fn reload(&self) {
        *lock(&self.cached) = None;
    }

    fn label(&self) -> &'static str {
        if self.use_keychain {
            "system keychain"
        } else {
            "local credentials file"
        }
    }
}

fn fallback_credentials_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FORGE_CREDENTIALS_FILE") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    dirs::config_dir().map(|p| p.join("forge").join("credentials.json"))
}

fn read_credentials_file(path: &PathBuf) -> KeyringResult<StoredCredentials> {
    if !path.exists() {
        return Ok(StoredCredentials::default());
    }
    let json = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read credentials file '{}': {}",
            path.display(),
            e
        )
    })?;
    serde_json::from_str(&json).map_err(|e| {
        format!(
            "Failed to parse credentials file '{}': {} (fix or delete it, then run 'forge --setup')",
            path.display(),
            e
        )
    })
}

fn write_credentials_file(path: &PathBuf, creds: &StoredCredentials) -> KeyringResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            format!(
                "Failed to create credentials directory '{}': {}",
                parent.display(),
                e
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
        }
    }

    let content = serde_json::to_string(creds)
        .map_err(|e| format!("Failed to serialize credentials: {}", e))?;
    let tmp_path = path.with_extension("json.tmp");
    let mut tmp_file = fs::File::create(&tmp_path).map_err(|e| {
        format!(
            "Failed to create temp credentials file '{}': {}",
            tmp_path.display(),
            e
        )
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = tmp_file.set_permissions(fs::Permissions::from_mode(0o600));
    }
    tmp_file.write_all(content.as_bytes()).map_err(|e| {
        format!(
            "Failed to write credentials file '{}': {}",
            tmp_path.display(),
            e
        )
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "Failed to finalize credentials file '{}': {}",
            path.display(),
            e
        )
    })
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> KeyringResult<Option<String>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> KeyringResult<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> KeyringResult<()> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn label(&self) -> &'static str {
        "in-memory store"
    }
}

// ============================================================================
// Tests
// ============================================================================
