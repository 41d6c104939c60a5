//! Patch controller
//!
//! Owns the patched flag and swaps the page globals between the originals
//! and the intercepting replacements. The flag is per instance and starts
//! out false; the session store remembers it across reloads.

use std::cell::Cell;
use std::rc::Rc;

use crate::error::Result;
use crate::interceptor::InterceptContext;
use crate::registry::{OriginalApis, PageGlobals};
use crate::state::{ReceivedState, StateUpdate};
use crate::storage::{store_patched, store_ruleset, SessionSnapshot, SessionStore};

/// Page globals that can be replaced with intercepting versions
pub trait Interceptable: PageGlobals {
    fn patched_fetch(&self, original: &Self::Fetch, ctx: &InterceptContext) -> Result<Self::Fetch>;

    fn patched_xml_http_request(
        &self,
        original: &Self::XhrConstructor,
        ctx: &InterceptContext,
    ) -> Result<Self::XhrConstructor>;
}

pub struct PatchController<P: Interceptable> {
    apis: OriginalApis<P>,
    ctx: InterceptContext,
    store: Rc<dyn SessionStore>,
    patched: Cell<bool>,
}

impl<P: Interceptable> PatchController<P> {
    /// Capture the page's originals; nothing is patched yet
    pub fn new(page: P, ctx: InterceptContext, store: Rc<dyn SessionStore>) -> Self {
        Self {
            apis: OriginalApis::capture(page),
            ctx,
            store,
            patched: Cell::new(false),
        }
    }

    pub fn is_patched(&self) -> bool {
        self.patched.get()
    }

    pub fn state(&self) -> &ReceivedState {
        self.ctx.state()
    }

    pub fn originals(&self) -> &OriginalApis<P> {
        &self.apis
    }

    /// Install both interceptors. A second call is a no-op.
    ///
    /// Either both globals are replaced or neither is.
    pub fn patch(&self) -> Result<()> {
        if self.patched.get() {
            return Ok(());
        }

        let page = self.apis.globals();
        let fetch = page.patched_fetch(self.apis.original_fetch(), &self.ctx)?;
        let xhr = page.patched_xml_http_request(self.apis.original_xml_http_request(), &self.ctx)?;

        let installed = self
            .apis
            .set_global_fetch(&fetch)
            .and_then(|_| self.apis.set_global_xml_http_request(&xhr));
        if let Err(e) = installed {
            if let Err(restore) = self.apis.restore() {
                log::warn!("Failed to restore page globals: {}", restore);
            }
            return Err(e);
        }

        self.patched.set(true);
        self.remember(true);
        log::info!("🛡️ Request interception enabled");
        Ok(())
    }

    /// Restore the captured originals. A no-op when not patched.
    pub fn unpatch(&self) -> Result<()> {
        if !self.patched.get() {
            return Ok(());
        }

        self.apis.restore()?;
        self.patched.set(false);
        self.remember(false);
        log::info!("Request interception disabled");
        Ok(())
    }

    /// Persist the rule list and follow `settings.patched`
    pub fn update(&self) -> Result<()> {
        let state = self.ctx.state().snapshot();
        if let Err(e) = store_ruleset(&*self.store, &state.ruleset) {
            log::warn!("Failed to persist rule list: {}", e);
        }

        if state.settings.patched {
            self.patch()
        } else {
            self.unpatch()
        }
    }

    pub fn load_session(&self) -> SessionSnapshot {
        SessionSnapshot::load(&*self.store)
    }

    /// Restore what the previous page load left in the session
    pub fn initialize(&self) -> Result<()> {
        let session = self.load_session();
        log::info!(
            "Restoring session: patched={} rules={}",
            session.patched,
            session.ruleset.len()
        );

        if !session.ruleset.is_empty() {
            self.ctx.state().update(StateUpdate::ruleset(session.ruleset));
        }
        if session.patched {
            self.patch()?;
        }
        Ok(())
    }

    fn remember(&self, patched: bool) {
        if let Err(e) = store_patched(&*self.store, patched) {
            log::warn!("Failed to persist patched flag: {}", e);
        }
    }
}
