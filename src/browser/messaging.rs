//! `window.postMessage` channel to the content script

use js_sys::Reflect;
use serde::Serialize;
use wasm_bindgen::prelude::*;
use web_sys::{MessageEvent, Window};

use crate::bridge::{InboundMessage, MessagePort, OutboundMessage};
use crate::error::{describe_js, InterceptError, Result};

pub struct WindowMessagePort {
    window: Window,
}

impl WindowMessagePort {
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

impl MessagePort for WindowMessagePort {
    fn post(&self, message: &OutboundMessage) -> Result<()> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        let value = message.serialize(&serializer)?;
        self.window
            .post_message(&value, "*")
            .map_err(|e| InterceptError::Internal(format!("postMessage: {}", describe_js(&e))))
    }
}

/// Decode a `message` event posted by this window itself.
///
/// Events from other windows or frames, empty payloads and payloads that do
/// not look like extension messages give `None`.
pub fn read_message(window: &Window, event: &MessageEvent) -> Option<InboundMessage> {
    let from_self = event
        .source()
        .map(|source| JsValue::from(source) == JsValue::from(window))
        .unwrap_or(false);
    if !from_self {
        return None;
    }

    let data = event.data();
    if data.is_undefined() || data.is_null() || !data.is_object() {
        return None;
    }
    let from_devtools = Reflect::get(&data, &JsValue::from_str("from"))
        .ok()
        .and_then(|from| from.as_string())
        .is_some_and(|from| from == "devtools");
    match serde_wasm_bindgen::from_value(data) {
        Ok(message) => Some(message),
        Err(e) if from_devtools => {
            log::warn!("⚠️ Dropping malformed devtools message: {}", e);
            None
        }
        Err(e) => {
            log::trace!("Ignoring window message: {}", e);
            None
        }
    }
}
