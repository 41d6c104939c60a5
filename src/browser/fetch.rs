//! `window.fetch` bound to the fetch interceptor

use std::collections::BTreeMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::{Headers, Request, RequestInit, Response, ResponseInit};

use super::proxy_helpers::{call_function, stringify_arg};
use crate::error::{InterceptError, Result};
use crate::interceptor::{FetchInterceptor, FetchTransport, InterceptContext, ResponseOverride};
use crate::rule::RequestDescriptor;

/// Arguments of one `fetch(input, init)` call
pub struct FetchCall {
    pub input: JsValue,
    pub init: JsValue,
}

/// The page's original fetch
pub struct BrowserFetch {
    original: Function,
}

impl BrowserFetch {
    pub fn new(original: Function) -> Self {
        Self { original }
    }
}

/// Flatten `Headers`, `[[name, value]]` pairs or a plain record
fn headers_to_map(headers: &JsValue) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if headers.is_undefined() || headers.is_null() {
        return map;
    }

    let entries: Vec<JsValue> = if headers.is_instance_of::<Headers>() || Array::is_array(headers) {
        match js_sys::try_iter(headers) {
            Ok(Some(iter)) => iter.filter_map(|entry| entry.ok()).collect(),
            _ => Vec::new(),
        }
    } else if headers.is_object() {
        Object::entries(headers.unchecked_ref()).iter().collect()
    } else {
        Vec::new()
    };

    for entry in entries {
        let pair: Array = entry.unchecked_into();
        if let (Some(name), Some(value)) = (pair.get(0).as_string(), pair.get(1).as_string()) {
            map.insert(name, value);
        }
    }
    map
}

impl FetchTransport for BrowserFetch {
    type Input = FetchCall;
    type Response = Response;
    type Error = JsValue;

    fn describe(&self, call: &FetchCall) -> RequestDescriptor {
        if let Some(request) = call.input.dyn_ref::<Request>() {
            return RequestDescriptor::new(request.url(), request.method())
                .with_headers(headers_to_map(&request.headers()));
        }

        let (method, headers) = if call.init.is_object() {
            let method = Reflect::get(&call.init, &JsValue::from_str("method"))
                .ok()
                .and_then(|m| m.as_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "GET".to_string());
            let headers = Reflect::get(&call.init, &JsValue::from_str("headers"))
                .unwrap_or(JsValue::UNDEFINED);
            (method, headers_to_map(&headers))
        } else {
            ("GET".to_string(), BTreeMap::new())
        };

        RequestDescriptor::new(stringify_arg(&call.input), method).with_headers(headers)
    }

    fn replace_body(&self, call: &FetchCall, body: &str) -> Result<FetchCall> {
        if let Some(request) = call.input.dyn_ref::<Request>() {
            let init = RequestInit::new();
            init.set_body(&JsValue::from_str(body));
            let rebuilt = Request::new_with_request_and_init(request, &init)
                .map_err(|e| InterceptError::request_rewrite(&e))?;
            return Ok(FetchCall {
                input: rebuilt.into(),
                init: call.init.clone(),
            });
        }

        let init = Object::new();
        if call.init.is_object() {
            Object::assign(&init, call.init.unchecked_ref());
        }
        Reflect::set(&init, &JsValue::from_str("body"), &JsValue::from_str(body))
            .map_err(|e| InterceptError::request_rewrite(&e))?;
        Ok(FetchCall {
            input: call.input.clone(),
            init: init.into(),
        })
    }

    fn send(&self, call: FetchCall) -> LocalBoxFuture<'static, std::result::Result<Response, JsValue>> {
        let promise = call_function(
            &self.original,
            &js_sys::global(),
            &Array::of2(&call.input, &call.init),
        );
        Box::pin(async move {
            let promise: js_sys::Promise = promise?.dyn_into()?;
            let response = JsFuture::from(promise).await?;
            response.dyn_into::<Response>()
        })
    }

    fn override_response(&self, original: &Response, plan: &ResponseOverride) -> Result<Response> {
        // The caller may still read `original`, so take the body from a copy
        let copy = original
            .clone()
            .map_err(|e| InterceptError::response_override(&e))?;

        let init = ResponseInit::new();
        init.set_status(plan.status.unwrap_or_else(|| original.status()));
        init.set_status_text(&original.status_text());
        init.set_headers(&original.headers());

        let response = match &plan.body {
            Some(body) => Response::new_with_opt_str_and_init(Some(body), &init),
            None => Response::new_with_opt_readable_stream_and_init(copy.body().as_ref(), &init),
        };
        response.map_err(|e| InterceptError::response_override(&e))
    }
}

/// Build the function installed as `window.fetch`
pub fn patched_fetch(original: &JsValue, ctx: &InterceptContext) -> Result<JsValue> {
    let original: Function = original
        .clone()
        .dyn_into()
        .map_err(|_| InterceptError::ApiUnavailable("fetch is not a function".into()))?;
    let interceptor = Rc::new(FetchInterceptor::new(BrowserFetch::new(original), ctx.clone()));

    let fetch = Closure::wrap(Box::new(move |input: JsValue, init: JsValue| -> js_sys::Promise {
        let interceptor = interceptor.clone();
        future_to_promise(async move {
            interceptor
                .fetch(FetchCall { input, init })
                .await
                .map(JsValue::from)
        })
    }) as Box<dyn FnMut(JsValue, JsValue) -> js_sys::Promise>);

    Ok(fetch.into_js_value())
}
