//! Page-side receiver
//!
//! Wires session storage, the received state, the message bridge and the
//! patch controller together the way the extension's main-world script
//! expects: restore the session, subscribe the controller to state updates,
//! announce readiness, then re-apply the previous patched flag.

use std::rc::Rc;

use crate::bridge::{InboundMessage, MessagePort, StateBridge};
use crate::config::InterceptConfig;
use crate::controller::{Interceptable, PatchController};
use crate::error::Result;
use crate::interceptor::InterceptContext;
use crate::runtime::Scheduler;
use crate::state::{ExtensionSettings, ExtensionState, ListenerId, ReceivedState, StateUpdate};
use crate::storage::{SessionSnapshot, SessionStore};

pub struct Receiver<P: Interceptable> {
    state: ReceivedState,
    bridge: Rc<StateBridge>,
    controller: Rc<PatchController<P>>,
    listener: ListenerId,
}

impl<P: Interceptable + 'static> Receiver<P> {
    pub fn setup(
        page: P,
        store: Rc<dyn SessionStore>,
        scheduler: Rc<dyn Scheduler>,
        port: Rc<dyn MessagePort>,
        config: &InterceptConfig,
    ) -> Self {
        let session = if config.restore_session {
            SessionSnapshot::load(&*store)
        } else {
            SessionSnapshot::default()
        };
        let state = ReceivedState::new(
            ExtensionState {
                settings: ExtensionSettings {
                    patched: session.patched,
                },
                ruleset: session.ruleset,
            },
            store.clone(),
        );

        let bridge = Rc::new(StateBridge::new(state.clone(), port));
        let ctx = InterceptContext::new(state.clone(), scheduler, bridge.clone())
            .with_max_delay_ms(config.max_delay_ms);
        let controller = Rc::new(PatchController::new(page, ctx, store));

        let weak = Rc::downgrade(&controller);
        let listener = state.on_updated(move |_| {
            let Some(controller) = weak.upgrade() else {
                return;
            };
            if let Err(e) = controller.update() {
                log::warn!("Failed to apply state update: {}", e);
            }
        });

        if config.announce_ready {
            bridge.announce_ready();
        }
        if config.restore_session {
            match controller.initialize() {
                Ok(()) => {}
                Err(e) if e.disables_interception() => {
                    log::warn!("⚠️ Interception unavailable on this page: {}", e);
                }
                Err(e) => log::warn!("Failed to restore interception: {}", e),
            }
        }

        log::info!("✅ Request mock receiver ready");

        Self {
            state,
            bridge,
            controller,
            listener,
        }
    }

    pub fn handle_message(&self, message: InboundMessage) -> bool {
        self.bridge.handle_message(message)
    }

    pub fn is_patched(&self) -> bool {
        self.controller.is_patched()
    }

    pub fn patch(&self) -> Result<()> {
        self.controller.patch()
    }

    pub fn unpatch(&self) -> Result<()> {
        self.controller.unpatch()
    }

    pub fn update_state(&self, update: StateUpdate) {
        self.state.update(update);
    }

    pub fn state(&self) -> &ReceivedState {
        &self.state
    }

    pub fn match_count(&self, rule_id: &str) -> u64 {
        self.bridge.match_count(rule_id)
    }

    pub fn controller(&self) -> &PatchController<P> {
        &self.controller
    }
}

impl<P: Interceptable> Drop for Receiver<P> {
    fn drop(&mut self) {
        self.state.off(self.listener);
    }
}
