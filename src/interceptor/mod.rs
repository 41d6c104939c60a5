//! Request interceptors
//!
//! Both interceptors follow the same shape: resolve the first matching rule
//! once when the request is dispatched, rewrite the outgoing body if the
//! rule asks for it, let the real call run, then override what the caller
//! observes and announce the match. They are host-agnostic; the browser
//! bindings in [`crate::browser`] plug in the page's real fetch and XHR.

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rule::{RequestDescriptor, Rule, MAX_DELAY_MS};
use crate::runtime::Scheduler;
use crate::state::ReceivedState;

pub mod fetch;
pub mod xhr;

pub use fetch::{FetchInterceptor, FetchTransport, ResponseOverride};
pub use xhr::{BufferedHandlers, PatchedXhr, XhrEvent, XhrHost, XhrPhase};

/// Emitted once per overridden request completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatched {
    pub rule_id: String,
}

/// Receives rule-matched notifications
pub trait MatchSink {
    fn rule_matched(&self, event: RuleMatched);
}

/// Everything an interceptor needs at call time
#[derive(Clone)]
pub struct InterceptContext {
    state: ReceivedState,
    scheduler: Rc<dyn Scheduler>,
    sink: Rc<dyn MatchSink>,
    max_delay_ms: u64,
}

impl InterceptContext {
    pub fn new(state: ReceivedState, scheduler: Rc<dyn Scheduler>, sink: Rc<dyn MatchSink>) -> Self {
        Self {
            state,
            scheduler,
            sink,
            max_delay_ms: MAX_DELAY_MS,
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    pub fn state(&self) -> &ReceivedState {
        &self.state
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    /// Look the request up in the current rule list
    pub fn find_rule(&self, request: &RequestDescriptor) -> Option<Rule> {
        let rule = self.state.find_rule(request);
        if let Some(rule) = &rule {
            log::debug!(
                "{} {} matched rule {}",
                request.method,
                request.url,
                rule.id
            );
        }
        rule
    }

    /// The rule's response delay under this context's cap
    pub fn delay_for(&self, rule: &Rule) -> Option<Duration> {
        rule.delay(self.max_delay_ms)
    }

    pub fn notify(&self, rule: &Rule) {
        self.sink.rule_matched(RuleMatched {
            rule_id: rule.id.clone(),
        });
    }
}
