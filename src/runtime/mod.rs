//! Cooperative scheduling for the interceptors
//!
//! Response delays and deferred XHR callback delivery are the only places
//! the core waits. Both go through [`Scheduler`] so the browser build uses
//! real timers while tests drive a virtual clock.

use std::time::Duration;

use futures::future::LocalBoxFuture;

mod sleep;
mod spawn;

#[cfg(test)]
pub(crate) mod manual;

pub use sleep::WasmSleep;
pub use spawn::WasmSpawner;

/// Timers and task spawning on the page's event loop
pub trait Scheduler {
    /// Resolve after `duration` without blocking the thread
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    /// Run `task` to completion on the event loop
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Scheduler backed by `setTimeout` and the microtask queue
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserScheduler;

impl BrowserScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for BrowserScheduler {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(WasmSleep::new(duration))
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        WasmSpawner.spawn(task);
    }
}
