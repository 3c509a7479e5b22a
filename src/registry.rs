//! Handler registry: configuration-declared string keys resolved to
//! statically compiled entry points.
//!
//! The router produces a handler *key*; this table turns it into code.
//! Entries are plain function pointers returning boxed futures, populated
//! once at startup; there is no runtime code loading.

use crate::http::channel::Channel;
use crate::http::request::Request;
use crate::router::Router;
use crate::server::server_impl::BoxError;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

pub type HandlerResult = Result<(), BoxError>;
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'a>>;

/// One registered entry point.
///
/// ```
/// use strand_web::{Channel, Request, RouteFuture};
///
/// fn hello<'a>(_req: &'a mut Request, chan: &'a mut Channel) -> RouteFuture<'a> {
///     Box::pin(async move {
///         chan.send_response_and_close("200 OK", &[], Some(b"hi")).await?;
///         Ok(())
///     })
/// }
/// ```
pub type RouteFn = for<'a> fn(&'a mut Request, &'a mut Channel) -> RouteFuture<'a>;

#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, RouteFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `key`, returning the displaced entry if
    /// the key was already taken.
    pub fn insert(&mut self, key: impl Into<String>, handler: RouteFn) -> Option<RouteFn> {
        self.entries.insert(key.into(), handler)
    }

    pub fn get(&self, key: &str) -> Option<RouteFn> {
        self.entries.get(key).copied()
    }

    /// Routes one request end to end: resolves `(Host, path)`, injects
    /// the match into the request's locals, and invokes the registered
    /// entry point. A routing miss or an unregistered handler key answers
    /// with a 404; "no route" is not an error.
    pub async fn dispatch(
        &self,
        router: &Router,
        request: &mut Request,
        channel: &mut Channel,
    ) -> HandlerResult {
        let host = request.header("host").unwrap_or("").to_string();
        let path = request.path().to_string();

        let Some(found) = router.resolve(&host, &path) else {
            channel.not_found(request.uri()).await?;
            return Ok(());
        };

        let handler_key = found.handler.to_string();
        let path_info = found.path_info.to_string();
        let args = found.args.clone();

        let locals = request.locals_mut();
        locals.handler = Some(handler_key.clone());
        locals.path_info = Some(path_info);
        locals.args = args;

        match self.get(&handler_key) {
            Some(entry) => entry(request, channel).await,
            None => {
                channel.not_found(request.uri()).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop<'a>(_request: &'a mut Request, _channel: &'a mut Channel) -> RouteFuture<'a> {
        Box::pin(async { Ok(()) })
    }

    #[test]
    fn insert_replaces_and_returns_previous() {
        let mut registry = Registry::new();

        assert!(registry.insert("cgi", nop).is_none());
        assert!(registry.insert("cgi", nop).is_some());
        assert!(registry.get("cgi").is_some());
        assert!(registry.get("missing").is_none());
    }
}
