//! Reflect and Proxy wrappers for replacing page APIs.
//!
//! Replacements installed through these helpers are WASM closures handed to
//! the JS garbage collector with `into_js_value`, so a wrapper lives exactly
//! as long as the page keeps a reference to it.

use js_sys::{Array, Function, Object, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Get the global window object.
pub fn window() -> Result<web_sys::Window, JsValue> {
    js_sys::global()
        .dyn_into::<web_sys::Window>()
        .map_err(|_| JsValue::from_str("no window"))
}

/// Get a property from the global scope.
pub fn get_global(prop: &str) -> Result<JsValue, JsValue> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(prop))
}

/// Assign a property on the global scope.
pub fn set_global(prop: &str, value: &JsValue) -> Result<(), JsValue> {
    Reflect::set(&js_sys::global(), &JsValue::from_str(prop), value)?;
    Ok(())
}

/// Look a method up and check that it is callable.
pub fn get_function(obj: &JsValue, name: &str) -> Result<Function, JsValue> {
    Reflect::get(obj, &JsValue::from_str(name))?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str(&format!("{} is not a function", name)))
}

/// The getter of an accessor property on `obj` or the nearest prototype
/// declaring it (e.g. `XMLHttpRequest.prototype.responseText` seen from a
/// subclass prototype).
pub fn find_getter(obj: &JsValue, prop_name: &str) -> Result<Function, JsValue> {
    let key = JsValue::from_str(prop_name);
    let mut current: Object = obj.clone().dyn_into()?;
    loop {
        let descriptor = Object::get_own_property_descriptor(&current, &key);
        if !descriptor.is_undefined() {
            return get_function(&descriptor, "get");
        }
        let next = Object::get_prototype_of(&current);
        if next.is_null() || next.is_undefined() {
            return Err(JsValue::from_str(&format!("no accessor for {}", prop_name)));
        }
        current = next;
    }
}

/// Define a configurable getter on an object using Object.defineProperty.
pub fn define_getter(obj: &JsValue, prop_name: &str, getter: &JsValue) -> Result<(), JsValue> {
    let descriptor = Object::new();
    Reflect::set(&descriptor, &JsValue::from_str("get"), getter)?;
    Reflect::set(&descriptor, &JsValue::from_str("configurable"), &JsValue::TRUE)?;
    Reflect::set(&descriptor, &JsValue::from_str("enumerable"), &JsValue::TRUE)?;

    // Object.defineProperty throws where Reflect.defineProperty returns false
    let define_prop = get_function(&get_global("Object")?, "defineProperty")?;
    let args = Array::of3(obj, &JsValue::from_str(prop_name), &descriptor);
    Reflect::apply(&define_prop, &JsValue::UNDEFINED, &args)?;
    Ok(())
}

/// Set an own method on an object, shadowing the prototype's.
pub fn define_method(obj: &JsValue, method_name: &str, method: &JsValue) -> Result<(), JsValue> {
    Reflect::set(obj, &JsValue::from_str(method_name), method)?;
    Ok(())
}

/// Create a Proxy around a constructor with a `construct` trap.
/// The trap receives (target, argumentsList, newTarget).
/// Static members and plain calls fall through to the target.
pub fn proxy_constructor_with_construct(
    target: &JsValue,
    construct_trap: Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>,
) -> Result<JsValue, JsValue> {
    let handler = Object::new();
    Reflect::set(
        &handler,
        &JsValue::from_str("construct"),
        &construct_trap.into_js_value(),
    )?;

    let proxy_ctor = get_global("Proxy")?
        .dyn_into::<Function>()
        .map_err(|_| JsValue::from_str("Proxy not found"))?;
    let args = Array::of2(target, &handler);
    Reflect::construct(&proxy_ctor, &args)
}

/// Call a JS function with `this` bound via Reflect.apply.
pub fn call_function(func: &Function, this_arg: &JsValue, args: &Array) -> Result<JsValue, JsValue> {
    Reflect::apply(func, this_arg, args)
}

/// `String(value)` for URL-like arguments (strings, `URL` objects).
pub fn stringify_arg(value: &JsValue) -> String {
    if let Some(s) = value.as_string() {
        return s;
    }
    if value.is_undefined() {
        return "undefined".into();
    }
    if value.is_null() {
        return "null".into();
    }
    if let Some(n) = value.as_f64() {
        return n.to_string();
    }
    value.unchecked_ref::<Object>().to_string().into()
}
