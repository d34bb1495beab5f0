//! Bearer-token session guard.
//!
//! The token lives in a persistent key-value store under a fixed key. Pages
//! (or host programs) call [`SessionGuard::check_auth`] before doing anything
//! protected; a missing token sends the user to the login page.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;

/// Persistent string key-value storage.
#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync {
    /// Read a value. Unreadable storage counts as absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Moves the user to another page.
#[cfg_attr(test, mockall::automock)]
pub trait Navigator: Send + Sync {
    /// Navigate to `path`.
    fn redirect(&self, path: &str);
}

impl<F> Navigator for F
where
    F: Fn(&str) + Send + Sync,
{
    fn redirect(&self, path: &str) {
        self(path)
    }
}

/// Navigator for hosts without pages; records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn redirect(&self, path: &str) {
        warn!("Authentication required, redirecting to {}", path);
    }
}

/// In-memory store, mainly for tests and short-lived hosts.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object file.
///
/// Every write rewrites the whole file; the store holds a handful of keys.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    /// Use the file at `path`. It is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(values)?)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock();
        match self.read_all() {
            Ok(values) => values.get(key).cloned(),
            Err(e) => {
                warn!("Failed to read storage {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Gatekeeper for the stored bearer token.
pub struct SessionGuard {
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    token_key: String,
    login_path: String,
}

impl SessionGuard {
    /// Create a guard with the default key (`token`) and login page (`login.html`).
    pub fn new(store: Arc<dyn TokenStore>, navigator: Arc<dyn Navigator>) -> Self {
        Self::with_config(store, navigator, &Config::default())
    }

    /// Create a guard using the key and login page from `config`.
    pub fn with_config(
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            navigator,
            token_key: config.token_key.clone(),
            login_path: config.login_path.clone(),
        }
    }

    /// Return the stored token, or redirect to the login page and return `None`.
    ///
    /// An empty token is treated as missing.
    pub fn check_auth(&self) -> Option<String> {
        match self.store.get(&self.token_key) {
            Some(token) if !token.is_empty() => {
                debug!("Authentication token found");
                Some(token)
            }
            _ => {
                debug!("No authentication token found");
                self.navigator.redirect(&self.login_path);
                None
            }
        }
    }

    /// Remove the token and redirect to the login page.
    ///
    /// The redirect happens even when the store fails to delete the token;
    /// that failure is returned afterwards.
    pub fn logout(&self) -> Result<()> {
        info!("Logging out user");
        let removed = self.store.remove(&self.token_key);
        self.navigator.redirect(&self.login_path);
        removed
    }

    /// Persist a token issued by the login flow.
    pub fn store_token(&self, token: &str) -> Result<()> {
        self.store.set(&self.token_key, token)?;
        info!("Stored authentication token");
        Ok(())
    }

    /// The login page path.
    pub fn login_path(&self) -> &str {
        &self.login_path
    }
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("token_key", &self.token_key)
            .field("login_path", &self.login_path)
            .finish_non_exhaustive()
    }
}
