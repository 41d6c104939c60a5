//! Messages between the page and the extension's content script
//!
//! The devtools panel pushes state through the content script with
//! `window.postMessage`; the receiver answers with `RECEIVER_READY` once it
//! is listening and with `RULE_MATCHED` for every overridden request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::interceptor::{MatchSink, RuleMatched};
use crate::state::{ReceivedState, StateUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageAction {
    StateUpdate,
    ReceiverReady,
    RuleMatched,
    RunScript,
    InjectedScriptError,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageOrigin {
    Devtools,
    Receiver,
    ContentScript,
    Background,
    #[serde(other)]
    Unknown,
}

/// A message read off the window
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub from: MessageOrigin,
    pub action: MessageAction,
    #[serde(default)]
    pub state: Option<StateUpdate>,
}

/// A message posted by the receiver
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub from: MessageOrigin,
    pub action: MessageAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl OutboundMessage {
    pub fn receiver_ready() -> Self {
        Self {
            from: MessageOrigin::Receiver,
            action: MessageAction::ReceiverReady,
            rule_id: None,
        }
    }

    pub fn rule_matched(rule_id: impl Into<String>) -> Self {
        Self {
            from: MessageOrigin::Receiver,
            action: MessageAction::RuleMatched,
            rule_id: Some(rule_id.into()),
        }
    }
}

/// Outgoing side of the page message channel
pub trait MessagePort {
    fn post(&self, message: &OutboundMessage) -> Result<()>;
}

pub struct StateBridge {
    state: ReceivedState,
    port: Rc<dyn MessagePort>,
    counts: RefCell<HashMap<String, u64>>,
}

impl StateBridge {
    pub fn new(state: ReceivedState, port: Rc<dyn MessagePort>) -> Self {
        Self {
            state,
            port,
            counts: RefCell::new(HashMap::new()),
        }
    }

    pub fn announce_ready(&self) {
        self.post(&OutboundMessage::receiver_ready());
    }

    /// Apply a message from the window. Returns whether it was consumed.
    ///
    /// Only `STATE_UPDATE` from the devtools panel is acted on; anything
    /// else, including our own posts echoing back, is ignored.
    pub fn handle_message(&self, message: InboundMessage) -> bool {
        if message.from != MessageOrigin::Devtools {
            return false;
        }
        match message.action {
            MessageAction::StateUpdate => {
                let update = message.state.unwrap_or_default();
                log::debug!(
                    "STATE_UPDATE: patched={:?} rules={:?}",
                    update.settings.as_ref().map(|s| s.patched),
                    update.ruleset.as_ref().map(Vec::len)
                );
                self.state.update(update);
                true
            }
            other => {
                log::debug!("Ignoring devtools message {:?}", other);
                false
            }
        }
    }

    /// How often `rule_id` has matched since setup
    pub fn match_count(&self, rule_id: &str) -> u64 {
        self.counts.borrow().get(rule_id).copied().unwrap_or(0)
    }

    fn post(&self, message: &OutboundMessage) {
        if let Err(e) = self.port.post(message) {
            log::warn!("Failed to post {:?}: {}", message.action, e);
        }
    }
}

impl MatchSink for StateBridge {
    fn rule_matched(&self, event: RuleMatched) {
        *self
            .counts
            .borrow_mut()
            .entry(event.rule_id.clone())
            .or_insert(0) += 1;
        self.post(&OutboundMessage::rule_matched(event.rule_id));
    }
}
