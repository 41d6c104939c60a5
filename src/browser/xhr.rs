//! `window.XMLHttpRequest` bound to the XHR interceptor
//!
//! The patched constructor is a Proxy over the original whose `construct`
//! trap builds a native instance and gives it own `open`/`send` methods and
//! own `responseText`/`response` getters backed by a [`PatchedXhr`].
//! Prototype methods and accessors captured at patch time reach the native
//! behavior underneath those overrides.
//!
//! The instance owns its wrapper through those members, so the wrapper only
//! keeps a `WeakRef` back to it. Delivered handlers wait in a `WeakMap`
//! keyed by the instance until the next `open`.

use std::cell::RefCell;

use js_sys::{Array, Function, Object, Reflect, WeakMap, WeakRef};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, XmlHttpRequest};

use super::proxy_helpers::{
    call_function, define_getter, define_method, find_getter, get_function,
    proxy_constructor_with_construct, stringify_arg,
};
use crate::error::{describe_js, InterceptError, Result};
use crate::interceptor::{BufferedHandlers, InterceptContext, PatchedXhr, XhrEvent, XhrHost};

/// Native `XMLHttpRequest.prototype` members
#[derive(Clone)]
struct NativeXhr {
    open: Function,
    send: Function,
    response_text: Function,
    response: Function,
    /// instance -> `[onreadystatechange, onload]` delivered last time
    stashed: WeakMap,
}

impl NativeXhr {
    fn capture(ctor: &JsValue) -> std::result::Result<Self, JsValue> {
        let proto = Reflect::get(ctor, &JsValue::from_str("prototype"))?;
        Ok(Self {
            open: get_function(&proto, "open")?,
            send: get_function(&proto, "send")?,
            response_text: find_getter(&proto, "responseText")?,
            response: find_getter(&proto, "response")?,
            stashed: WeakMap::new(),
        })
    }
}

/// One native request object
pub struct BrowserXhr {
    xhr: WeakRef,
    native: NativeXhr,
    listener: RefCell<Option<Function>>,
}

impl BrowserXhr {
    fn new(instance: &JsValue, native: NativeXhr) -> std::result::Result<Self, JsValue> {
        let instance: &Object = instance.dyn_ref().ok_or_else(|| JsValue::from_str("not an object"))?;
        Ok(Self {
            xhr: WeakRef::new(instance),
            native,
            listener: RefCell::new(None),
        })
    }

    /// The instance, unless it has been collected
    fn instance(&self) -> Option<XmlHttpRequest> {
        WeakRef::deref(&self.xhr).map(|instance: Object| instance.unchecked_into())
    }

    fn live(&self) -> std::result::Result<XmlHttpRequest, JsValue> {
        self.instance()
            .ok_or_else(|| JsValue::from_str("XMLHttpRequest instance was released"))
    }

    fn call(&self, function: &Function, args: &Array) -> std::result::Result<JsValue, JsValue> {
        call_function(function, self.live()?.as_ref(), args)
    }

    fn raw_response(&self) -> std::result::Result<JsValue, JsValue> {
        self.call(&self.native.response, &Array::new())
    }
}

impl XhrHost for BrowserXhr {
    type Body = JsValue;
    type Handler = Function;
    type Error = JsValue;

    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> std::result::Result<(), JsValue> {
        let optional = |value: Option<&str>| value.map(JsValue::from_str).unwrap_or(JsValue::NULL);
        let args = Array::of5(
            &JsValue::from_str(method),
            &JsValue::from_str(url),
            &JsValue::from_bool(is_async),
            &optional(user),
            &optional(password),
        );
        self.call(&self.native.open, &args).map(|_| ())
    }

    fn send(&self, body: Option<JsValue>) -> std::result::Result<(), JsValue> {
        let args = match body {
            Some(body) => Array::of1(&body),
            None => Array::new(),
        };
        self.call(&self.native.send, &args).map(|_| ())
    }

    fn text_body(&self, text: &str) -> JsValue {
        JsValue::from_str(text)
    }

    fn ready_state(&self) -> u16 {
        self.instance().map(|xhr| xhr.ready_state()).unwrap_or_default()
    }

    fn response_type(&self) -> String {
        self.instance()
            .and_then(|xhr| Reflect::get(&xhr, &JsValue::from_str("responseType")).ok())
            .and_then(|t| t.as_string())
            .unwrap_or_default()
    }

    fn response_text(&self) -> std::result::Result<String, JsValue> {
        let text = self.call(&self.native.response_text, &Array::new())?;
        Ok(text.as_string().unwrap_or_default())
    }

    fn stringify_response(&self) -> std::result::Result<String, JsValue> {
        let json = js_sys::JSON::stringify(&self.raw_response()?)?;
        Ok(json.as_string().unwrap_or_default())
    }

    fn take_handlers(&self) -> BufferedHandlers<Function> {
        let Some(xhr) = self.instance() else {
            return BufferedHandlers::default();
        };
        let handlers = BufferedHandlers {
            ready_state_change: xhr.onreadystatechange(),
            load: xhr.onload(),
        };
        xhr.set_onreadystatechange(None);
        xhr.set_onload(None);
        handlers
    }

    fn stash_handlers(&self, handlers: BufferedHandlers<Function>) {
        let Some(xhr) = self.instance() else {
            return;
        };
        let slot = |handler: Option<Function>| handler.map(JsValue::from).unwrap_or(JsValue::NULL);
        let pair = Array::of2(&slot(handlers.ready_state_change), &slot(handlers.load));
        self.native.stashed.set(xhr.unchecked_ref(), &JsValue::from(pair));
    }

    fn restore_handlers(&self) {
        let Some(xhr) = self.instance() else {
            return;
        };
        let key: &Object = xhr.unchecked_ref();
        let pair = self.native.stashed.get(key);
        if pair.is_undefined() {
            return;
        }
        self.native.stashed.delete(key);

        let pair: Array = pair.unchecked_into();
        let handler = |index: u32| pair.get(index).dyn_into::<Function>().ok();
        if xhr.onreadystatechange().is_none() {
            xhr.set_onreadystatechange(handler(0).as_ref());
        }
        if xhr.onload().is_none() {
            xhr.set_onload(handler(1).as_ref());
        }
    }

    fn invoke(&self, handler: &Function, event: XhrEvent) -> std::result::Result<(), JsValue> {
        let event = Event::new(event.name())?;
        handler.call1(self.live()?.as_ref(), &event).map(|_| ())
    }

    fn watch_ready_state(&self, listener: Box<dyn FnMut()>) {
        self.unwatch_ready_state();
        let Some(xhr) = self.instance() else {
            return;
        };
        // Owned by JS: the listener may be detached while it runs
        let listener: Function = Closure::wrap(listener).into_js_value().unchecked_into();
        if let Err(e) = xhr.add_event_listener_with_callback("readystatechange", &listener) {
            log::warn!("Failed to watch XHR readyState: {}", describe_js(&e));
            return;
        }
        *self.listener.borrow_mut() = Some(listener);
    }

    fn unwatch_ready_state(&self) {
        let listener = self.listener.borrow_mut().take();
        if let (Some(listener), Some(xhr)) = (listener, self.instance()) {
            let _ = xhr.remove_event_listener_with_callback("readystatechange", &listener);
        }
    }
}

/// Give a freshly constructed native instance its intercepting members
fn install(instance: &JsValue, native: NativeXhr, ctx: InterceptContext) -> std::result::Result<(), JsValue> {
    let patched = PatchedXhr::new(BrowserXhr::new(instance, native)?, ctx);

    let xhr = patched.clone();
    let open = Closure::wrap(Box::new(
        move |method: JsValue, url: JsValue, is_async: JsValue, user: JsValue, password: JsValue| {
            xhr.open(
                &stringify_arg(&method),
                &stringify_arg(&url),
                is_async.as_bool(),
                user.as_string().as_deref(),
                password.as_string().as_deref(),
            )
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue, JsValue, JsValue) -> std::result::Result<(), JsValue>>);
    define_method(instance, "open", &open.into_js_value())?;

    let xhr = patched.clone();
    let send = Closure::wrap(Box::new(move |body: JsValue| {
        let body = if body.is_undefined() || body.is_null() {
            None
        } else {
            Some(body)
        };
        xhr.send(body)
    }) as Box<dyn FnMut(JsValue) -> std::result::Result<(), JsValue>>);
    define_method(instance, "send", &send.into_js_value())?;

    let xhr = patched.clone();
    let response_text = Closure::wrap(Box::new(move || {
        xhr.response_text().map(JsValue::from)
    }) as Box<dyn FnMut() -> std::result::Result<JsValue, JsValue>>);
    define_getter(instance, "responseText", &response_text.into_js_value())?;

    let xhr = patched;
    let response = Closure::wrap(Box::new(move || match xhr.response_override() {
        Some(text) => Ok(JsValue::from(text)),
        None => xhr.host().raw_response(),
    }) as Box<dyn FnMut() -> std::result::Result<JsValue, JsValue>>);
    define_getter(instance, "response", &response.into_js_value())?;

    Ok(())
}

/// Build the constructor installed as `window.XMLHttpRequest`
pub fn patched_constructor(original: &JsValue, ctx: &InterceptContext) -> Result<JsValue> {
    let target: Function = original
        .clone()
        .dyn_into()
        .map_err(|_| InterceptError::ApiUnavailable("XMLHttpRequest is not a constructor".into()))?;
    let native = NativeXhr::capture(original)
        .map_err(|e| InterceptError::ApiUnavailable(format!("XMLHttpRequest.prototype: {}", describe_js(&e))))?;

    let ctx = ctx.clone();
    let construct = Closure::wrap(Box::new(
        move |_target: JsValue, args: JsValue, new_target: JsValue| -> std::result::Result<JsValue, JsValue> {
            let new_target: Function = new_target.dyn_into()?;
            let instance = Reflect::construct_with_new_target(&target, args.unchecked_ref(), &new_target)?;
            install(&instance, native.clone(), ctx.clone())?;
            Ok(instance)
        },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> std::result::Result<JsValue, JsValue>>);

    proxy_constructor_with_construct(original, construct)
        .map_err(|e| InterceptError::ApiUnavailable(format!("Proxy: {}", describe_js(&e))))
}

