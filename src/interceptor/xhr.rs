//! XMLHttpRequest interception
//!
//! [`PatchedXhr`] decorates one native request object. The caller's
//! `onreadystatechange`/`onload` handlers are detached at `send` and
//! re-delivered once the request is `DONE`, after the override slot has been
//! filled and any rule delay has elapsed. Reads of `responseText`/`response`
//! go through the slot first. Delivered handlers go back on the object at
//! the next `open`, so a reused instance keeps its callbacks.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::InterceptContext;
use crate::rule::{RequestDescriptor, Rule};

/// `XMLHttpRequest.DONE`
pub const DONE: u16 = 4;

/// Where a patched request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XhrPhase {
    Unsent,
    Opened,
    Sent,
    Done,
}

/// Events re-delivered to the caller's handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XhrEvent {
    ReadyStateChange,
    Load,
}

impl XhrEvent {
    pub fn name(self) -> &'static str {
        match self {
            XhrEvent::ReadyStateChange => "readystatechange",
            XhrEvent::Load => "load",
        }
    }
}

/// Handlers taken off the native object at `send`
#[derive(Debug)]
pub struct BufferedHandlers<H> {
    pub ready_state_change: Option<H>,
    pub load: Option<H>,
}

impl<H> Default for BufferedHandlers<H> {
    fn default() -> Self {
        Self {
            ready_state_change: None,
            load: None,
        }
    }
}

/// The native request object behind a [`PatchedXhr`]
pub trait XhrHost {
    type Body;
    type Handler;
    type Error: std::fmt::Debug;

    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), Self::Error>;

    fn send(&self, body: Option<Self::Body>) -> Result<(), Self::Error>;

    /// Turn a rule's request body into something `send` accepts
    fn text_body(&self, text: &str) -> Self::Body;

    fn ready_state(&self) -> u16;

    fn response_type(&self) -> String;

    /// The native `responseText`, ignoring any override
    fn response_text(&self) -> Result<String, Self::Error>;

    /// `JSON.stringify` of the native `response`
    fn stringify_response(&self) -> Result<String, Self::Error>;

    /// Detach and return the caller's `onreadystatechange`/`onload`
    fn take_handlers(&self) -> BufferedHandlers<Self::Handler>;

    /// Hold delivered handlers on the native side until the next `open`
    fn stash_handlers(&self, handlers: BufferedHandlers<Self::Handler>);

    /// Reattach stashed handlers to slots the caller has left empty
    fn restore_handlers(&self);

    fn invoke(&self, handler: &Self::Handler, event: XhrEvent) -> Result<(), Self::Error>;

    /// Register the internal `readystatechange` listener, replacing any
    /// previous one
    fn watch_ready_state(&self, listener: Box<dyn FnMut()>);

    fn unwatch_ready_state(&self);
}

struct XhrInner<H: XhrHost> {
    host: H,
    ctx: InterceptContext,
    method: RefCell<String>,
    url: RefCell<String>,
    phase: Cell<XhrPhase>,
    response_override: RefCell<Option<String>>,
}

/// One intercepted `XMLHttpRequest` instance.
///
/// Cloning shares the instance.
pub struct PatchedXhr<H: XhrHost> {
    inner: Rc<XhrInner<H>>,
}

impl<H: XhrHost> Clone for PatchedXhr<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> PatchedXhr<H>
where
    H: XhrHost + 'static,
    H::Handler: 'static,
{
    pub fn new(host: H, ctx: InterceptContext) -> Self {
        Self {
            inner: Rc::new(XhrInner {
                host,
                ctx,
                method: RefCell::new(String::new()),
                url: RefCell::new(String::new()),
                phase: Cell::new(XhrPhase::Unsent),
                response_override: RefCell::new(None),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    pub fn phase(&self) -> XhrPhase {
        self.inner.phase.get()
    }

    pub fn method(&self) -> String {
        self.inner.method.borrow().clone()
    }

    pub fn url(&self) -> String {
        self.inner.url.borrow().clone()
    }

    /// Record the target and forward; a missing `is_async` means async.
    pub fn open(
        &self,
        method: &str,
        url: &str,
        is_async: Option<bool>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), H::Error> {
        *self.inner.method.borrow_mut() = method.to_string();
        *self.inner.url.borrow_mut() = url.to_string();
        self.inner.response_override.borrow_mut().take();
        self.inner.phase.set(XhrPhase::Opened);
        self.inner.host.restore_handlers();

        self.inner
            .host
            .open(method, url, is_async.unwrap_or(true), user, password)
    }

    pub fn send(&self, body: Option<H::Body>) -> Result<(), H::Error> {
        let handlers = self.inner.host.take_handlers();

        let request = RequestDescriptor::new(self.url(), self.method());
        let matched = self.inner.ctx.find_rule(&request);

        let body = match matched
            .as_ref()
            .and_then(|rule| rule.request_body_for(&request.method))
        {
            Some(text) => Some(self.inner.host.text_body(text)),
            None => body,
        };

        let weak: Weak<XhrInner<H>> = Rc::downgrade(&self.inner);
        let mut pending = Some((matched, handlers));
        self.inner.host.watch_ready_state(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.host.ready_state() != DONE {
                return;
            }
            if let Some((rule, handlers)) = pending.take() {
                XhrInner::complete(&inner, rule, handlers);
            }
        }));

        self.inner.phase.set(XhrPhase::Sent);
        // Synchronous requests complete inside this call
        let sent = self.inner.host.send(body);
        if sent.is_err() {
            self.inner.host.unwatch_ready_state();
        }
        sent
    }

    /// Value the page sees for `responseText`/`response`, if overridden
    pub fn response_override(&self) -> Option<String> {
        self.inner.response_override.borrow().clone()
    }

    /// `responseText` as seen by the page
    pub fn response_text(&self) -> Result<String, H::Error> {
        match self.response_override() {
            Some(text) => Ok(text),
            None => self.inner.host.response_text(),
        }
    }
}

impl<H> XhrInner<H>
where
    H: XhrHost + 'static,
    H::Handler: 'static,
{
    fn complete(this: &Rc<Self>, rule: Option<Rule>, handlers: BufferedHandlers<H::Handler>) {
        this.host.unwatch_ready_state();
        this.phase.set(XhrPhase::Done);

        let Some(rule) = rule else {
            this.deliver(handlers);
            return;
        };

        let text = match &rule.response {
            Some(response) => response.clone(),
            None => this.current_text(),
        };
        *this.response_override.borrow_mut() = Some(text);
        this.ctx.notify(&rule);

        match this.ctx.delay_for(&rule).filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                let scheduler = this.ctx.scheduler().clone();
                let sleep = scheduler.sleep(delay);
                let this = this.clone();
                scheduler.spawn(Box::pin(async move {
                    sleep.await;
                    this.deliver(handlers);
                }));
            }
            None => this.deliver(handlers),
        }
    }

    /// The native response as text; failures read as an empty string
    fn current_text(&self) -> String {
        let text = match self.host.response_type().as_str() {
            "" | "text" => self.host.response_text(),
            _ => self.host.stringify_response(),
        };
        text.unwrap_or_else(|e| {
            log::debug!("Unreadable XHR response for {}: {:?}", self.url.borrow(), e);
            String::new()
        })
    }

    fn deliver(&self, handlers: BufferedHandlers<H::Handler>) {
        let events = [
            (&handlers.ready_state_change, XhrEvent::ReadyStateChange),
            (&handlers.load, XhrEvent::Load),
        ];
        for (handler, event) in events {
            if let Some(handler) = handler {
                if let Err(e) = self.host.invoke(handler, event) {
                    log::debug!("XHR {} handler threw: {:?}", event.name(), e);
                }
            }
        }
        self.host.stash_handlers(handlers);
    }
}
