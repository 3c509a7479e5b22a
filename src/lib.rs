//! strand_web - Cooperative HTTP/1.1 server core
//!
//! A single-process server core built from three pieces: a connection
//! state machine that parses requests off raw byte streams and drives a
//! keep-alive request/response loop, a two-level regular-expression
//! [`Router`] that maps `(Host, Path)` pairs to handler identities, and a
//! generic [`Cache`] with combined capacity- and TTL-based eviction.
//!
//! # Architecture
//!
//! - **Connection engine** - one logical flow per accepted socket, many
//!   connections multiplexed over a pre-spawned worker pool. Parses one
//!   request at a time, invokes the pluggable [`Handler`] callback, then
//!   decides from headers and leftover body bytes whether to loop for
//!   another request on the same socket.
//! - **[`Router`]** - compiled once at configuration time from ordered,
//!   named host and path pattern alternations; read-only and freely
//!   shared afterwards. First-resolvable-alternative-wins keeps
//!   precedence in the configuration author's hands.
//! - **[`Cache`]** - an arena-backed LRU list plus handle map with O(1)
//!   amortized operations and sliding TTL expiry, reclaimed in batches
//!   piggybacked on mutating calls. Backs handler registries, static-file
//!   metadata, token verification - anything keyed and expirable.
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! use strand_web::{BoxError, Channel, Handler, Request, Server};
//! use tokio::net::TcpListener;
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, _: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
//!         chan.send_response_and_close("200 OK", &[], Some(b"It works!")).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(Hello)
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```
//!
//! Routed dispatch with a handler registry:
//! ```no_run
//! use std::collections::HashMap;
//! use strand_web::{
//!     BoxError, Channel, Handler, HostConfig, PathConfig, Registry, Request, RouteFuture,
//!     Router, RouterConfig, Server,
//! };
//! use tokio::net::TcpListener;
//!
//! fn hello<'a>(req: &'a mut Request, chan: &'a mut Channel) -> RouteFuture<'a> {
//!     Box::pin(async move {
//!         let info = req.locals().path_info.clone().unwrap_or_default();
//!         chan.send_response_and_close("200 OK", &[], Some(info.as_bytes())).await?;
//!         Ok(())
//!     })
//! }
//!
//! struct App {
//!     router: Router,
//!     registry: Registry,
//! }
//!
//! impl Handler for App {
//!     async fn handle(&self, req: &mut Request, chan: &mut Channel) -> Result<(), BoxError> {
//!         self.registry.dispatch(&self.router, req, chan).await
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::new(&RouterConfig {
//!         patterns: vec![r"(?P<default>.*)".to_string()],
//!         hosts: vec![HostConfig {
//!             names: "default".to_string(),
//!             patterns: vec![r"(?P<hello>/.*)".to_string()],
//!             paths: vec![PathConfig {
//!                 names: "hello".to_string(),
//!                 handler: "hello".to_string(),
//!                 args: HashMap::new(),
//!             }],
//!         }],
//!     })
//!     .unwrap();
//!
//!     let mut registry = Registry::new();
//!     registry.insert("hello", hello);
//!
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(App { router, registry })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod channel;
    pub(crate) mod request;
    pub mod urlencode;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod server_impl;
}
pub mod cache;
pub(crate) mod errors;
pub mod limits;
pub mod registry;
pub mod report;
pub mod router;

pub use crate::{
    cache::{Cache, SweepError},
    errors::ChannelError,
    http::{
        channel::Channel,
        request::{Locals, Request},
        urlencode,
    },
    registry::{HandlerResult, Registry, RouteFn, RouteFuture},
    report::{ErrorContext, ErrorSink, LogSink},
    router::{HostConfig, PathConfig, RouteMatch, Router, RouterConfig, RouterError},
    server::server_impl::{BoxError, Handler, Server, ServerBuilder},
};
