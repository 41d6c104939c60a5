//! Fetch interception
//!
//! [`FetchInterceptor`] keeps the signature of the wrapped fetch: it takes
//! the caller's arguments and resolves with a response or the real call's
//! error. Only the rule lookup, the optional body rewrite and the optional
//! response override are added around the original call.

use futures::future::LocalBoxFuture;

use super::InterceptContext;
use crate::error::Result;
use crate::rule::{RequestDescriptor, Rule};

/// The page's fetch primitive as seen by the interceptor
pub trait FetchTransport {
    /// The caller's arguments, e.g. `(input, init)`
    type Input;
    type Response;
    /// Errors of the real call; passed to the caller unchanged
    type Error;

    /// Normalize URL, method (default `GET`) and headers of a call
    fn describe(&self, input: &Self::Input) -> RequestDescriptor;

    /// Build a copy of the call that sends `body` instead
    fn replace_body(&self, input: &Self::Input, body: &str) -> Result<Self::Input>;

    /// Perform the real, unpatched fetch
    fn send(&self, input: Self::Input) -> LocalBoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    /// Build the response the caller sees instead of `original`.
    ///
    /// `original` must stay readable by the caller, so implementations read
    /// from a clone of it.
    fn override_response(&self, original: &Self::Response, plan: &ResponseOverride) -> Result<Self::Response>;
}

/// How a matched rule changes the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOverride {
    /// `None` keeps the original status
    pub status: Option<u16>,
    /// `None` keeps the original body
    pub body: Option<String>,
}

impl ResponseOverride {
    pub fn from_rule(rule: &Rule) -> Self {
        Self {
            status: rule.status_code,
            body: rule.response.clone(),
        }
    }
}

pub struct FetchInterceptor<T> {
    transport: T,
    ctx: InterceptContext,
}

impl<T: FetchTransport> FetchInterceptor<T> {
    pub fn new(transport: T, ctx: InterceptContext) -> Self {
        Self { transport, ctx }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run one intercepted fetch call
    pub async fn fetch(&self, input: T::Input) -> std::result::Result<T::Response, T::Error> {
        let request = self.transport.describe(&input);
        let matched = self.ctx.find_rule(&request);

        let input = match matched
            .as_ref()
            .and_then(|rule| rule.request_body_for(&request.method))
        {
            Some(body) => match self.transport.replace_body(&input, body) {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    log::warn!("{} {}: {}", request.method, request.url, e);
                    input
                }
            },
            None => input,
        };

        let response = self.transport.send(input).await?;

        let Some(rule) = matched else {
            return Ok(response);
        };

        let overridden = match self
            .transport
            .override_response(&response, &ResponseOverride::from_rule(&rule))
        {
            Ok(overridden) => overridden,
            Err(e) => {
                log::warn!("rule {}: {}", rule.id, e);
                return Ok(response);
            }
        };

        if let Some(delay) = self.ctx.delay_for(&rule) {
            self.ctx.scheduler().sleep(delay).await;
        }
        self.ctx.notify(&rule);

        Ok(overridden)
    }
}
