//! # Intercept WASM
//!
//! The in-page half of a request-mocking browser extension, compiled to
//! WebAssembly.
//!
//! The devtools panel edits a list of mock rules and pushes it into the page.
//! While interception is enabled, `window.fetch` and `window.XMLHttpRequest`
//! are replaced by wrappers that look each request up in that list and, on a
//! match, rewrite the outgoing body, override the response the page sees,
//! delay it, and report the match back to the panel.
//!
//! ## Architecture
//!
//! ```text
//! devtools panel ──postMessage──▶ StateBridge ──▶ ReceivedState ──▶ PatchController
//!                                                     │                  │
//!                                                     ▼                  ▼
//!                                            FetchInterceptor / PatchedXhr
//!                                                     │
//!                                   RULE_MATCHED ◀────┘
//! ```
//!
//! Everything except [`browser`] is host-agnostic: page globals, timers,
//! storage and the message channel sit behind traits so the core runs in
//! native unit tests.

use wasm_bindgen::prelude::*;

// Modules
pub mod bridge;
pub mod browser;
pub mod config;
pub mod controller;
mod error;
pub mod interceptor;
pub mod receiver;
pub mod registry;
pub mod rule;
pub mod runtime;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testing;

pub use bridge::{InboundMessage, MessageAction, MessageOrigin, MessagePort, OutboundMessage, StateBridge};
pub use browser::{setup_interception, BrowserPage, InterceptHandle};
pub use config::InterceptConfig;
pub use controller::{Interceptable, PatchController};
pub use error::{ErrorCode, ErrorInfo, InterceptError, Result};
pub use interceptor::{
    FetchInterceptor, FetchTransport, InterceptContext, MatchSink, PatchedXhr, ResponseOverride,
    RuleMatched, XhrHost,
};
pub use receiver::Receiver;
pub use registry::{OriginalApis, PageGlobals};
pub use rule::{find_matching_rule, method_supports_request_body, parse_rules, RequestDescriptor, Rule, RuleInput};
pub use runtime::{BrowserScheduler, Scheduler};
pub use state::{ExtensionSettings, ExtensionState, ReceivedState, StateUpdate};
pub use storage::{BrowserSessionStore, MemorySessionStore, SessionSnapshot, SessionStore};

/// Initialize the module
///
/// Sets up console logging; `setupInterception` may lower or raise the
/// level afterwards.
#[wasm_bindgen(start)]
pub fn init() {
    // A second instance on the same page finds the logger already set
    let _ = console_log::init_with_level(log::Level::Info);
    browser::capture_native_globals();

    log::info!("Intercept WASM initialized");
}

/// Normalize rules exported by the devtools panel (missing ids and dates
/// are filled in, blank request bodies dropped).
#[wasm_bindgen(js_name = normalizeRules)]
pub fn normalize_rules(rules: JsValue) -> std::result::Result<JsValue, JsValue> {
    let inputs: Vec<RuleInput> = serde_wasm_bindgen::from_value(rules).map_err(InterceptError::from)?;
    let rules = inputs
        .into_iter()
        .map(RuleInput::into_rule)
        .collect::<Result<Vec<Rule>>>()?;

    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    serde::Serialize::serialize(&rules, &serializer).map_err(|e| InterceptError::from(e).into())
}

