//! Page globals and the originals captured before patching
//!
//! The originals come from [`PageGlobals::native_fetch`] and
//! [`PageGlobals::native_xml_http_request`], the values the page started
//! with. Unpatching restores those even when a second controller is built
//! after the first one patched, or when the page reassigns the globals.

use crate::error::Result;

/// Read and replace the page's `fetch` and `XMLHttpRequest`
pub trait PageGlobals {
    type Fetch: Clone;
    type XhrConstructor: Clone;

    fn fetch(&self) -> Self::Fetch;
    fn set_fetch(&self, fetch: &Self::Fetch) -> Result<()>;

    fn xml_http_request(&self) -> Self::XhrConstructor;
    fn set_xml_http_request(&self, ctor: &Self::XhrConstructor) -> Result<()>;

    /// `fetch` as it was before anything was patched
    fn native_fetch(&self) -> Self::Fetch {
        self.fetch()
    }

    /// `XMLHttpRequest` as it was before anything was patched
    fn native_xml_http_request(&self) -> Self::XhrConstructor {
        self.xml_http_request()
    }
}

pub struct OriginalApis<G: PageGlobals> {
    globals: G,
    fetch: G::Fetch,
    xml_http_request: G::XhrConstructor,
}

impl<G: PageGlobals> OriginalApis<G> {
    /// Capture the page's native globals as the originals
    pub fn capture(globals: G) -> Self {
        let fetch = globals.native_fetch();
        let xml_http_request = globals.native_xml_http_request();
        Self {
            globals,
            fetch,
            xml_http_request,
        }
    }

    pub fn globals(&self) -> &G {
        &self.globals
    }

    pub fn original_fetch(&self) -> &G::Fetch {
        &self.fetch
    }

    pub fn original_xml_http_request(&self) -> &G::XhrConstructor {
        &self.xml_http_request
    }

    pub fn global_fetch(&self) -> G::Fetch {
        self.globals.fetch()
    }

    pub fn set_global_fetch(&self, fetch: &G::Fetch) -> Result<()> {
        self.globals.set_fetch(fetch)
    }

    pub fn global_xml_http_request(&self) -> G::XhrConstructor {
        self.globals.xml_http_request()
    }

    pub fn set_global_xml_http_request(&self, ctor: &G::XhrConstructor) -> Result<()> {
        self.globals.set_xml_http_request(ctor)
    }

    /// Put both originals back
    pub fn restore(&self) -> Result<()> {
        self.globals.set_fetch(&self.fetch)?;
        self.globals.set_xml_http_request(&self.xml_http_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, FakePage};
    use std::rc::Rc;

    #[test]
    fn test_originals_survive_reassignment() {
        let page = FakePage::new();
        let apis = OriginalApis::capture(page.clone());
        let original = apis.original_fetch().clone();

        let replacement = Rc::new(FakeApi {
            label: "page polyfill".into(),
        });
        apis.set_global_fetch(&replacement).unwrap();
        assert!(Rc::ptr_eq(&apis.global_fetch(), &replacement));
        assert!(Rc::ptr_eq(apis.original_fetch(), &original));

        apis.restore().unwrap();
        assert!(Rc::ptr_eq(&page.fetch(), &original));
        assert_eq!(page.xhr_label(), "XMLHttpRequest");
    }

    #[test]
    fn test_capture_after_reassignment_keeps_native() {
        let page = FakePage::new();
        let native = page.fetch();
        page.set_fetch(&Rc::new(FakeApi {
            label: "patched(fetch)".into(),
        }))
        .unwrap();

        let apis = OriginalApis::capture(page.clone());
        assert!(Rc::ptr_eq(apis.original_fetch(), &native));
        assert_eq!(apis.global_fetch().label, "patched(fetch)");
    }
}
