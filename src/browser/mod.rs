//! Browser bindings
//!
//! Binds the host-agnostic core to the real page: `window.fetch`,
//! `window.XMLHttpRequest`, `sessionStorage`, `setTimeout` and
//! `window.postMessage`.
//!
//! ## Usage
//!
//! ```javascript
//! import init, { setupInterception } from './pkg/intercept_wasm.js';
//! await init();
//! const interception = setupInterception({ logLevel: 'debug' });
//! interception.isPatched();
//! ```

use std::cell::OnceCell;
use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Window};

pub mod fetch;
pub mod messaging;
pub mod proxy_helpers;
pub mod xhr;

use crate::config::InterceptConfig;
use crate::controller::Interceptable;
use crate::error::{InterceptError, Result};
use crate::interceptor::InterceptContext;
use crate::receiver::Receiver;
use crate::registry::PageGlobals;
use crate::runtime::BrowserScheduler;
use crate::state::StateUpdate;
use crate::storage::{BrowserSessionStore, MemorySessionStore, SessionStore};
use messaging::WindowMessagePort;

const FETCH: &str = "fetch";
const XML_HTTP_REQUEST: &str = "XMLHttpRequest";

/// `fetch` and `XMLHttpRequest` as this module first saw them
#[derive(Clone)]
struct NativeGlobals {
    fetch: JsValue,
    xml_http_request: JsValue,
}

thread_local! {
    static NATIVE_GLOBALS: OnceCell<NativeGlobals> = const { OnceCell::new() };
}

/// Read the page's `fetch`/`XMLHttpRequest` the first time this is called
/// and return that same pair afterwards.
fn native_globals() -> NativeGlobals {
    NATIVE_GLOBALS.with(|cell| {
        cell.get_or_init(|| {
            let read = |name: &str| proxy_helpers::get_global(name).unwrap_or(JsValue::UNDEFINED);
            NativeGlobals {
                fetch: read(FETCH),
                xml_http_request: read(XML_HTTP_REQUEST),
            }
        })
        .clone()
    })
}

/// Pin the page's native globals before anything can patch them
pub(crate) fn capture_native_globals() {
    let _ = native_globals();
}

/// The page's global scope
#[derive(Clone)]
pub struct BrowserPage {
    window: Window,
}

impl BrowserPage {
    pub fn new() -> Result<Self> {
        let window = proxy_helpers::window()
            .map_err(|_| InterceptError::ApiUnavailable("No window".into()))?;
        Ok(Self { window })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    fn global(&self, name: &str) -> JsValue {
        proxy_helpers::get_global(name).unwrap_or(JsValue::UNDEFINED)
    }

    fn set(&self, name: &str, value: &JsValue) -> Result<()> {
        proxy_helpers::set_global(name, value)
            .map_err(|e| InterceptError::ApiUnavailable(format!("window.{}: {:?}", name, e)))
    }
}

impl PageGlobals for BrowserPage {
    type Fetch = JsValue;
    type XhrConstructor = JsValue;

    fn fetch(&self) -> JsValue {
        self.global(FETCH)
    }

    fn set_fetch(&self, fetch: &JsValue) -> Result<()> {
        self.set(FETCH, fetch)
    }

    fn xml_http_request(&self) -> JsValue {
        self.global(XML_HTTP_REQUEST)
    }

    fn set_xml_http_request(&self, ctor: &JsValue) -> Result<()> {
        self.set(XML_HTTP_REQUEST, ctor)
    }

    fn native_fetch(&self) -> JsValue {
        native_globals().fetch
    }

    fn native_xml_http_request(&self) -> JsValue {
        native_globals().xml_http_request
    }
}

impl Interceptable for BrowserPage {
    fn patched_fetch(&self, original: &JsValue, ctx: &InterceptContext) -> Result<JsValue> {
        fetch::patched_fetch(original, ctx)
    }

    fn patched_xml_http_request(&self, original: &JsValue, ctx: &InterceptContext) -> Result<JsValue> {
        xhr::patched_constructor(original, ctx)
    }
}

/// `sessionStorage`, or an in-memory store where the page denies it
fn session_store() -> Rc<dyn SessionStore> {
    match BrowserSessionStore::open() {
        Ok(store) => Rc::new(store),
        Err(e) => {
            log::warn!("⚠️ {}; interception state will not survive reloads", e);
            Rc::new(MemorySessionStore::new())
        }
    }
}

/// Handle returned to JS by [`setup_interception`]
#[wasm_bindgen]
pub struct InterceptHandle {
    receiver: Rc<Receiver<BrowserPage>>,
    window: Window,
    listener: js_sys::Function,
}

#[wasm_bindgen]
impl InterceptHandle {
    #[wasm_bindgen(js_name = isPatched)]
    pub fn is_patched(&self) -> bool {
        self.receiver.is_patched()
    }

    pub fn patch(&self) -> std::result::Result<(), JsValue> {
        self.receiver.patch().map_err(JsValue::from)
    }

    pub fn unpatch(&self) -> std::result::Result<(), JsValue> {
        self.receiver.unpatch().map_err(JsValue::from)
    }

    /// Merge `{ settings?, ruleset? }` into the current state
    #[wasm_bindgen(js_name = updateState)]
    pub fn update_state(&self, update: JsValue) -> std::result::Result<(), JsValue> {
        let update: StateUpdate =
            serde_wasm_bindgen::from_value(update).map_err(InterceptError::from)?;
        self.receiver.update_state(update);
        Ok(())
    }

    /// Current `{ settings, ruleset }`
    pub fn state(&self) -> std::result::Result<JsValue, JsValue> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        self.receiver
            .state()
            .snapshot()
            .serialize(&serializer)
            .map_err(|e| JsValue::from(InterceptError::from(e)))
    }

    #[wasm_bindgen(js_name = matchCount)]
    pub fn match_count(&self, rule_id: &str) -> u32 {
        u32::try_from(self.receiver.match_count(rule_id)).unwrap_or(u32::MAX)
    }
}

impl Drop for InterceptHandle {
    fn drop(&mut self) {
        let _ = self
            .window
            .remove_event_listener_with_callback("message", &self.listener);
    }
}

/// Restore the previous session, start listening for state pushed from the
/// devtools panel and announce readiness.
///
/// `options` is an optional `{ maxDelayMs, restoreSession, logLevel,
/// announceReady }` object.
#[wasm_bindgen(js_name = setupInterception)]
pub fn setup_interception(options: JsValue) -> std::result::Result<InterceptHandle, JsValue> {
    let config = InterceptConfig::from_js(options);
    log::set_max_level(config.level().to_level_filter());

    let page = BrowserPage::new()?;
    let window = page.window().clone();
    let port = Rc::new(WindowMessagePort::new(window.clone()));

    let receiver = Rc::new(Receiver::setup(
        page,
        session_store(),
        Rc::new(BrowserScheduler::new()),
        port,
        &config,
    ));

    let weak = Rc::downgrade(&receiver);
    let source = window.clone();
    let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
        let Some(receiver) = weak.upgrade() else {
            return;
        };
        if let Some(message) = messaging::read_message(&source, &event) {
            receiver.handle_message(message);
        }
    }) as Box<dyn FnMut(MessageEvent)>);
    let listener: js_sys::Function = on_message.into_js_value().unchecked_into();
    window.add_event_listener_with_callback("message", &listener)?;

    Ok(InterceptHandle {
        receiver,
        window,
        listener,
    })
}

/// Whether this page exposes everything interception needs
#[wasm_bindgen(js_name = interceptionSupported)]
pub fn interception_supported() -> bool {
    let has = |name: &str| {
        proxy_helpers::get_global(name)
            .map(|value| value.is_function())
            .unwrap_or(false)
    };
    has(FETCH) && has(XML_HTTP_REQUEST) && has("Proxy")
}
