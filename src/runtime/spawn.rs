//! Task spawning implementation for WASM

use futures::future::LocalBoxFuture;
use wasm_bindgen_futures::spawn_local;

/// WASM spawner that uses wasm-bindgen-futures
#[derive(Debug, Clone, Copy)]
pub struct WasmSpawner;

impl WasmSpawner {
    pub fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        // spawn_local runs the future to completion in the browser's event loop
        spawn_local(task);
    }
}
