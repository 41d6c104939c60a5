//! Options accepted by `setupInterception`

use serde::{Deserialize, Serialize};

use crate::rule::MAX_DELAY_MS;

/// Interception options. Every field has a default, so `{}` or no options
/// at all behaves like the extension's stock setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterceptConfig {
    /// Upper bound for rule response delays
    pub max_delay_ms: u64,
    /// Re-apply the rule list and patched flag left in session storage
    pub restore_session: bool,
    /// `error`, `warn`, `info`, `debug` or `trace`
    pub log_level: String,
    /// Post `RECEIVER_READY` once set up
    pub announce_ready: bool,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: MAX_DELAY_MS,
            restore_session: true,
            log_level: "info".to_string(),
            announce_ready: true,
        }
    }
}

impl InterceptConfig {
    /// Parsed log level; unknown names fall back to `Info`
    pub fn level(&self) -> log::Level {
        self.log_level.parse().unwrap_or(log::Level::Info)
    }

    /// Read options handed over from JS; `undefined`, `null` and malformed
    /// objects all give the defaults.
    pub fn from_js(options: wasm_bindgen::JsValue) -> Self {
        if options.is_undefined() || options.is_null() {
            return Self::default();
        }
        serde_wasm_bindgen::from_value(options).unwrap_or_else(|e| {
            log::warn!("Ignoring malformed interception options: {}", e);
            Self::default()
        })
    }
}
