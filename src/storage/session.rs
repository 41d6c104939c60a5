// `window.sessionStorage` backed store
use web_sys::Storage;

use super::SessionStore;
use crate::error::{describe_js, InterceptError, Result};

/// Session store over the page's `sessionStorage`
///
/// Entries survive reloads and same-tab navigations but not the tab itself.
#[derive(Clone)]
pub struct BrowserSessionStore {
    storage: Storage,
}

impl BrowserSessionStore {
    /// Open the page's session storage
    pub fn open() -> Result<Self> {
        let window = web_sys::window()
            .ok_or_else(|| InterceptError::ApiUnavailable("No window".into()))?;
        let storage = window
            .session_storage()
            .map_err(|_| InterceptError::ApiUnavailable("sessionStorage not available".into()))?
            .ok_or_else(|| InterceptError::ApiUnavailable("sessionStorage is null".into()))?;

        Ok(Self { storage })
    }
}

impl SessionStore for BrowserSessionStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.storage
            .get_item(key)
            .map_err(|e| InterceptError::Storage(format!("get {}: {}", key, describe_js(&e))))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.storage
            .set_item(key, value)
            .map_err(|e| InterceptError::Storage(format!("set {}: {}", key, describe_js(&e))))
    }
}
