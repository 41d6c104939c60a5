// Session storage for interception state
//
// Persists, per tab session:
// - the `patched` flag ("true"/"false")
// - the active rule list (JSON array of rules)
// - the extension settings object
//
// so a reload restores interception before the page's own scripts run.

mod memory;
mod session;

pub use memory::MemorySessionStore;
pub use session::BrowserSessionStore;

use crate::error::Result;
use crate::rule::Rule;
use crate::state::ExtensionSettings;

pub const PATCHED_KEY: &str = "patched";
pub const RULESET_KEY: &str = "ruleset";
pub const SETTINGS_KEY: &str = "settings";

/// String key/value store scoped to the tab session
pub trait SessionStore {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
}

/// What a previous page load left behind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub patched: bool,
    pub ruleset: Vec<Rule>,
}

impl SessionSnapshot {
    /// Read the last-known state. Missing or corrupt entries read as
    /// "not patched" and an empty rule list.
    pub fn load(store: &dyn SessionStore) -> Self {
        let patched = match store.get_item(PATCHED_KEY) {
            Ok(value) => value.as_deref() == Some("true"),
            Err(e) => {
                log::warn!("Failed to read patched flag: {}", e);
                false
            }
        };

        let ruleset = match store.get_item(RULESET_KEY) {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                log::warn!("Discarding stored rule list: {}", e);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::warn!("Failed to read rule list: {}", e);
                Vec::new()
            }
        };

        Self { patched, ruleset }
    }
}

pub fn store_patched(store: &dyn SessionStore, patched: bool) -> Result<()> {
    store.set_item(PATCHED_KEY, if patched { "true" } else { "false" })
}

pub fn store_ruleset(store: &dyn SessionStore, ruleset: &[Rule]) -> Result<()> {
    let json = serde_json::to_string(ruleset)?;
    store.set_item(RULESET_KEY, &json)
}

pub fn store_settings(store: &dyn SessionStore, settings: &ExtensionSettings) -> Result<()> {
    let json = serde_json::to_string(settings)?;
    store.set_item(SETTINGS_KEY, &json)
}
