//! In-crate fakes for native tests

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::future::LocalBoxFuture;

use crate::bridge::{MessagePort, OutboundMessage};
use crate::controller::Interceptable;
use crate::error::{InterceptError, Result};
use crate::interceptor::{
    BufferedHandlers, FetchTransport, InterceptContext, MatchSink, ResponseOverride, RuleMatched,
    XhrEvent, XhrHost,
};
use crate::registry::PageGlobals;
use crate::rule::RequestDescriptor;
use crate::runtime::manual::ManualScheduler;
use crate::runtime::Scheduler;
use crate::state::{ExtensionState, ReceivedState};
use crate::storage::MemorySessionStore;

/// Local executor, virtual clock and shared state for one test
pub(crate) struct Harness {
    pool: LocalPool,
    pub scheduler: ManualScheduler,
    pub sink: Rc<RecordingSink>,
    pub store: Rc<MemorySessionStore>,
    pub state: ReceivedState,
}

impl Harness {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let scheduler = ManualScheduler::new(pool.spawner());
        let store = Rc::new(MemorySessionStore::new());
        let state = ReceivedState::new(ExtensionState::default(), store.clone());
        Self {
            pool,
            scheduler,
            sink: Rc::new(RecordingSink::default()),
            store,
            state,
        }
    }

    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        self.scheduler.spawn(Box::pin(task));
    }

    pub fn run(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn advance(&mut self, ms: u64) {
        self.scheduler.advance(Duration::from_millis(ms));
        self.run();
    }
}

pub(crate) fn context(harness: &Harness) -> InterceptContext {
    InterceptContext::new(
        harness.state.clone(),
        Rc::new(harness.scheduler.clone()),
        harness.sink.clone(),
    )
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: RefCell<Vec<RuleMatched>>,
}

impl RecordingSink {
    pub fn rule_ids(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|event| event.rule_id.clone())
            .collect()
    }
}

impl MatchSink for RecordingSink {
    fn rule_matched(&self, event: RuleMatched) {
        self.events.borrow_mut().push(event);
    }
}

// ===== fetch =====

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FakeRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

impl FakeRequest {
    pub fn new(url: &str, method: &str) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(url, "GET")
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FakeResponse {
    pub body: String,
    pub status: u16,
    pub status_text: String,
}

struct TransportState {
    outcome: std::result::Result<FakeResponse, String>,
    sent: RefCell<Vec<Option<String>>>,
    clones: Cell<usize>,
    reject_overrides: Cell<bool>,
    hold: Cell<bool>,
    gates: RefCell<Vec<oneshot::Sender<()>>>,
}

/// Scripted network; clones share the same script and records
#[derive(Clone)]
pub(crate) struct FakeTransport {
    inner: Rc<TransportState>,
}

impl FakeTransport {
    fn with_outcome(outcome: std::result::Result<FakeResponse, String>) -> Self {
        Self {
            inner: Rc::new(TransportState {
                outcome,
                sent: RefCell::new(Vec::new()),
                clones: Cell::new(0),
                reject_overrides: Cell::new(false),
                hold: Cell::new(false),
                gates: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn returning(body: &str, status: u16) -> Self {
        Self::with_outcome(Ok(FakeResponse {
            body: body.to_string(),
            status,
            status_text: "OK".to_string(),
        }))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(Err(message.to_string()))
    }

    /// Hold every response until [`FakeTransport::release`]
    pub fn pending(self) -> Self {
        self.inner.hold.set(true);
        self
    }

    pub fn rejecting_overrides(self) -> Self {
        self.inner.reject_overrides.set(true);
        self
    }

    pub fn release(&self) {
        for gate in self.inner.gates.borrow_mut().drain(..) {
            let _ = gate.send(());
        }
    }

    pub fn sent_bodies(&self) -> Vec<Option<String>> {
        self.inner.sent.borrow().clone()
    }

    /// How many times an original response was read for an override
    pub fn clones(&self) -> usize {
        self.inner.clones.get()
    }
}

impl FetchTransport for FakeTransport {
    type Input = FakeRequest;
    type Response = FakeResponse;
    type Error = String;

    fn describe(&self, input: &FakeRequest) -> RequestDescriptor {
        RequestDescriptor::new(input.url.clone(), input.method.clone())
            .with_headers(input.headers.clone())
    }

    fn replace_body(&self, input: &FakeRequest, body: &str) -> Result<FakeRequest> {
        Ok(FakeRequest {
            body: Some(body.to_string()),
            ..input.clone()
        })
    }

    fn send(&self, input: FakeRequest) -> LocalBoxFuture<'static, std::result::Result<FakeResponse, String>> {
        self.inner.sent.borrow_mut().push(input.body);
        let outcome = self.inner.outcome.clone();
        let gate = if self.inner.hold.get() {
            let (tx, rx) = oneshot::channel();
            self.inner.gates.borrow_mut().push(tx);
            Some(rx)
        } else {
            None
        };
        Box::pin(async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            outcome
        })
    }

    fn override_response(&self, original: &FakeResponse, plan: &ResponseOverride) -> Result<FakeResponse> {
        self.inner.clones.set(self.inner.clones.get() + 1);
        if self.inner.reject_overrides.get() {
            return Err(InterceptError::ResponseOverride("body already used".into()));
        }
        Ok(FakeResponse {
            body: plan.body.clone().unwrap_or_else(|| original.body.clone()),
            status: plan.status.unwrap_or(original.status),
            status_text: original.status_text.clone(),
        })
    }
}

// ===== XMLHttpRequest =====

pub(crate) type FakeHandler = Rc<dyn Fn(XhrEvent) -> std::result::Result<(), String>>;

pub(crate) type OpenCall = (String, String, bool, Option<String>, Option<String>);

#[derive(Default)]
struct FakeXhrState {
    opened: Option<OpenCall>,
    sent: Vec<Option<String>>,
    ready_state: u16,
    response_type: String,
    response_text: String,
    response_json: Option<String>,
    on_ready_state_change: Option<FakeHandler>,
    on_load: Option<FakeHandler>,
    stashed: Option<BufferedHandlers<FakeHandler>>,
    listener: Option<Box<dyn FnMut()>>,
    watching: bool,
    complete_on_send: bool,
}

/// Scripted native request object
#[derive(Clone, Default)]
pub(crate) struct FakeXhr {
    state: Rc<RefCell<FakeXhrState>>,
}

impl FakeXhr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reach `DONE` from inside `send`, like a synchronous request
    pub fn completing_on_send(self) -> Self {
        self.state.borrow_mut().complete_on_send = true;
        self
    }

    pub fn respond(&self, response_type: &str, text: &str) {
        let mut state = self.state.borrow_mut();
        state.response_type = response_type.to_string();
        state.response_text = text.to_string();
        state.response_json = Some(text.to_string());
    }

    pub fn respond_unserializable(&self, response_type: &str) {
        let mut state = self.state.borrow_mut();
        state.response_type = response_type.to_string();
        state.response_json = None;
    }

    pub fn set_ready_state(&self, ready_state: u16) {
        self.state.borrow_mut().ready_state = ready_state;
        self.fire();
    }

    pub fn finish(&self, response_type: &str, text: &str) {
        self.respond(response_type, text);
        self.set_ready_state(crate::interceptor::xhr::DONE);
    }

    /// Install caller handlers that record the events they receive
    pub fn set_handlers(&self) -> Rc<RefCell<Vec<XhrEvent>>> {
        self.install_handlers(false)
    }

    /// Like [`FakeXhr::set_handlers`], but every handler throws
    pub fn set_failing_handlers(&self) -> Rc<RefCell<Vec<XhrEvent>>> {
        self.install_handlers(true)
    }

    fn install_handlers(&self, fail: bool) -> Rc<RefCell<Vec<XhrEvent>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let record = |events: Rc<RefCell<Vec<XhrEvent>>>| -> FakeHandler {
            Rc::new(move |event| {
                events.borrow_mut().push(event);
                if fail {
                    Err("handler threw".to_string())
                } else {
                    Ok(())
                }
            })
        };
        let mut state = self.state.borrow_mut();
        state.on_ready_state_change = Some(record(events.clone()));
        state.on_load = Some(record(events.clone()));
        events
    }

    pub fn opened(&self) -> Option<OpenCall> {
        self.state.borrow().opened.clone()
    }

    pub fn sent(&self) -> Vec<Option<String>> {
        self.state.borrow().sent.clone()
    }

    pub fn watching(&self) -> bool {
        self.state.borrow().watching
    }

    /// Whether caller handlers are attached right now
    pub fn has_handlers(&self) -> bool {
        let state = self.state.borrow();
        state.on_ready_state_change.is_some() || state.on_load.is_some()
    }

    fn fire(&self) {
        let listener = self.state.borrow_mut().listener.take();
        if let Some(mut listener) = listener {
            listener();
            let mut state = self.state.borrow_mut();
            if state.watching && state.listener.is_none() {
                state.listener = Some(listener);
            }
        }
    }
}

impl XhrHost for FakeXhr {
    type Body = String;
    type Handler = FakeHandler;
    type Error = String;

    fn open(
        &self,
        method: &str,
        url: &str,
        is_async: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> std::result::Result<(), String> {
        let mut state = self.state.borrow_mut();
        state.opened = Some((
            method.to_string(),
            url.to_string(),
            is_async,
            user.map(str::to_string),
            password.map(str::to_string),
        ));
        state.ready_state = 1;
        Ok(())
    }

    fn send(&self, body: Option<String>) -> std::result::Result<(), String> {
        let complete = {
            let mut state = self.state.borrow_mut();
            state.sent.push(body);
            state.complete_on_send
        };
        if complete {
            self.set_ready_state(crate::interceptor::xhr::DONE);
        }
        Ok(())
    }

    fn text_body(&self, text: &str) -> String {
        text.to_string()
    }

    fn ready_state(&self) -> u16 {
        self.state.borrow().ready_state
    }

    fn response_type(&self) -> String {
        self.state.borrow().response_type.clone()
    }

    fn response_text(&self) -> std::result::Result<String, String> {
        let state = self.state.borrow();
        match state.response_type.as_str() {
            "" | "text" => Ok(state.response_text.clone()),
            _ => Err("InvalidStateError".to_string()),
        }
    }

    fn stringify_response(&self) -> std::result::Result<String, String> {
        self.state
            .borrow()
            .response_json
            .clone()
            .ok_or_else(|| "cyclic object value".to_string())
    }

    fn take_handlers(&self) -> BufferedHandlers<FakeHandler> {
        let mut state = self.state.borrow_mut();
        BufferedHandlers {
            ready_state_change: state.on_ready_state_change.take(),
            load: state.on_load.take(),
        }
    }

    fn stash_handlers(&self, handlers: BufferedHandlers<FakeHandler>) {
        self.state.borrow_mut().stashed = Some(handlers);
    }

    fn restore_handlers(&self) {
        let mut state = self.state.borrow_mut();
        if let Some(stashed) = state.stashed.take() {
            if state.on_ready_state_change.is_none() {
                state.on_ready_state_change = stashed.ready_state_change;
            }
            if state.on_load.is_none() {
                state.on_load = stashed.load;
            }
        }
    }

    fn invoke(&self, handler: &FakeHandler, event: XhrEvent) -> std::result::Result<(), String> {
        handler(event)
    }

    fn watch_ready_state(&self, listener: Box<dyn FnMut()>) {
        let mut state = self.state.borrow_mut();
        state.listener = Some(listener);
        state.watching = true;
    }

    fn unwatch_ready_state(&self) {
        let mut state = self.state.borrow_mut();
        state.listener = None;
        state.watching = false;
    }
}

// ===== page globals =====

/// Stand-in for a JS function object; identity is the `Rc` pointer
#[derive(Debug)]
pub(crate) struct FakeApi {
    pub label: String,
}

pub(crate) type FakeFn = Rc<FakeApi>;

fn api(label: &str) -> FakeFn {
    Rc::new(FakeApi {
        label: label.to_string(),
    })
}

struct FakePageState {
    fetch: RefCell<FakeFn>,
    xml_http_request: RefCell<FakeFn>,
    native_fetch: FakeFn,
    native_xml_http_request: FakeFn,
    wrap_calls: Cell<usize>,
    fail_xhr_wrap: Cell<bool>,
}

#[derive(Clone)]
pub(crate) struct FakePage {
    inner: Rc<FakePageState>,
}

impl FakePage {
    pub fn new() -> Self {
        let fetch = api("fetch");
        let xml_http_request = api("XMLHttpRequest");
        Self {
            inner: Rc::new(FakePageState {
                fetch: RefCell::new(fetch.clone()),
                xml_http_request: RefCell::new(xml_http_request.clone()),
                native_fetch: fetch,
                native_xml_http_request: xml_http_request,
                wrap_calls: Cell::new(0),
                fail_xhr_wrap: Cell::new(false),
            }),
        }
    }

    pub fn failing_xhr_wrap(self) -> Self {
        self.inner.fail_xhr_wrap.set(true);
        self
    }

    pub fn fetch_label(&self) -> String {
        self.inner.fetch.borrow().label.clone()
    }

    pub fn xhr_label(&self) -> String {
        self.inner.xml_http_request.borrow().label.clone()
    }

    pub fn wrap_calls(&self) -> usize {
        self.inner.wrap_calls.get()
    }
}

impl PageGlobals for FakePage {
    type Fetch = FakeFn;
    type XhrConstructor = FakeFn;

    fn fetch(&self) -> FakeFn {
        self.inner.fetch.borrow().clone()
    }

    fn set_fetch(&self, fetch: &FakeFn) -> Result<()> {
        *self.inner.fetch.borrow_mut() = fetch.clone();
        Ok(())
    }

    fn xml_http_request(&self) -> FakeFn {
        self.inner.xml_http_request.borrow().clone()
    }

    fn set_xml_http_request(&self, ctor: &FakeFn) -> Result<()> {
        *self.inner.xml_http_request.borrow_mut() = ctor.clone();
        Ok(())
    }

    fn native_fetch(&self) -> FakeFn {
        self.inner.native_fetch.clone()
    }

    fn native_xml_http_request(&self) -> FakeFn {
        self.inner.native_xml_http_request.clone()
    }
}

impl Interceptable for FakePage {
    fn patched_fetch(&self, original: &FakeFn, _ctx: &InterceptContext) -> Result<FakeFn> {
        self.inner.wrap_calls.set(self.inner.wrap_calls.get() + 1);
        Ok(api(&format!("patched({})", original.label)))
    }

    fn patched_xml_http_request(&self, original: &FakeFn, _ctx: &InterceptContext) -> Result<FakeFn> {
        self.inner.wrap_calls.set(self.inner.wrap_calls.get() + 1);
        if self.inner.fail_xhr_wrap.get() {
            return Err(InterceptError::ApiUnavailable("Proxy".into()));
        }
        Ok(api(&format!("patched({})", original.label)))
    }
}

// ===== messaging =====

#[derive(Default)]
pub(crate) struct RecordingPort {
    posted: RefCell<Vec<OutboundMessage>>,
}

impl RecordingPort {
    pub fn posted(&self) -> Vec<OutboundMessage> {
        self.posted.borrow().clone()
    }
}

impl MessagePort for RecordingPort {
    fn post(&self, message: &OutboundMessage) -> Result<()> {
        self.posted.borrow_mut().push(message.clone());
        Ok(())
    }
}
