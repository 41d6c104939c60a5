//! Extension state received from the devtools panel
//!
//! The panel owns the canonical rule list; this module keeps the copy the
//! page-side interceptors read on every request. Every update is written
//! through to session storage and announced to listeners (the patch
//! controller subscribes to keep live interception in sync).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::rule::{find_matching_rule, RequestDescriptor, Rule};
use crate::storage::{store_ruleset, store_settings, SessionStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionSettings {
    pub patched: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionState {
    #[serde(default)]
    pub settings: ExtensionSettings,
    #[serde(default)]
    pub ruleset: Vec<Rule>,
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub settings: Option<ExtensionSettings>,
    #[serde(default)]
    pub ruleset: Option<Vec<Rule>>,
}

impl StateUpdate {
    pub fn ruleset(ruleset: Vec<Rule>) -> Self {
        Self {
            settings: None,
            ruleset: Some(ruleset),
        }
    }

    pub fn patched(patched: bool) -> Self {
        Self {
            settings: Some(ExtensionSettings { patched }),
            ruleset: None,
        }
    }
}

/// Handle returned by [`ReceivedState::on_updated`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type StateListener = Rc<dyn Fn(&ExtensionState)>;

/// Shared, single-threaded holder of the extension state.
///
/// Cloning is cheap and every clone sees the same state.
#[derive(Clone)]
pub struct ReceivedState {
    state: Rc<RefCell<ExtensionState>>,
    store: Rc<dyn SessionStore>,
    listeners: Rc<RefCell<Vec<(ListenerId, StateListener)>>>,
    next_listener: Rc<Cell<u64>>,
}

impl ReceivedState {
    pub fn new(initial: ExtensionState, store: Rc<dyn SessionStore>) -> Self {
        Self {
            state: Rc::new(RefCell::new(initial)),
            store,
            listeners: Rc::new(RefCell::new(Vec::new())),
            next_listener: Rc::new(Cell::new(0)),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ExtensionState {
        self.state.borrow().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().settings.patched
    }

    pub fn rule_count(&self) -> usize {
        self.state.borrow().ruleset.len()
    }

    /// First matching rule of the *current* list
    pub fn find_rule(&self, request: &RequestDescriptor) -> Option<Rule> {
        find_matching_rule(&self.state.borrow().ruleset, request).cloned()
    }

    /// Merge `update`, persist settings and rules, then notify listeners.
    pub fn update(&self, update: StateUpdate) {
        let current = {
            let mut state = self.state.borrow_mut();
            if let Some(settings) = update.settings {
                state.settings = settings;
            }
            if let Some(ruleset) = update.ruleset {
                state.ruleset = ruleset;
            }
            state.clone()
        };

        if let Err(e) = store_settings(&*self.store, &current.settings) {
            log::warn!("Failed to persist settings: {}", e);
        }
        if let Err(e) = store_ruleset(&*self.store, &current.ruleset) {
            log::warn!("Failed to persist rule list: {}", e);
        }

        log::debug!(
            "State updated: patched={} rules={}",
            current.settings.patched,
            current.ruleset.len()
        );

        // Listeners may read or update the state again
        let listeners: Vec<StateListener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&current);
        }
    }

    pub fn on_updated(&self, listener: impl Fn(&ExtensionState) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(listener)));
        id
    }

    pub fn off(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }
}
