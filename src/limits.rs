//! Server configuration limits and timeouts.
//!
//! Defaults are conservative and mirror what the wire protocol can absorb
//! without letting a single client hold resources hostage: an 8 KiB header
//! section, a bounded keep-alive window, and a capped body declaration.
//!
//! # Examples
//!
//! ```no_run
//! # use strand_web::{BoxError, Channel, Handler, Request, Server};
//! # struct MyHandler;
//! # impl Handler for MyHandler {
//! #     async fn handle(&self, _: &mut Request, c: &mut Channel) -> Result<(), BoxError> {
//! #         c.send_response_and_close("200 OK", &[], None).await?;
//! #         Ok(())
//! #     }
//! # }
//! use strand_web::limits::{ConnLimits, ServerLimits};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000,
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             max_keep_alive: Duration::from_secs(60),
//!             ..ConnLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use std::time::Duration;

/// Controls server-level concurrency and queueing behavior.
///
/// Accepted connections first land in a queue bounded by
/// `max_pending_connections`; `max_connections` pre-spawned workers pop
/// from it and run connections to completion. When the queue is full,
/// dedicated responders answer with an immediate `503`.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Number of worker tasks processing connections (default: `100`).
    pub max_connections: usize,

    /// Maximum number of accepted connections waiting for a worker
    /// (default: `250`). Overflow is handed to the `503` responders.
    pub max_pending_connections: usize,

    /// How idle workers wait for the queue to fill (default: `Sleep(50µs)`).
    pub wait_strategy: WaitStrategy,

    /// Dedicated responders for queue overflow (default: `1`).
    /// Set to 0 to silently drop overflow connections instead.
    pub count_503_handlers: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`]. Keeps latency at
    /// its floor at the price of a busy scheduler.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`] with the given period.
    Sleep(Duration),
}

/// Connection-level timeouts and the keep-alive policy knobs.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Maximum time to read one full header section (default: `60 seconds`).
    ///
    /// On expiry the connection is abandoned without a response.
    pub header_timeout: Duration,

    /// Upper bound on the keep-alive idle window (default: `300 seconds`).
    ///
    /// The effective window is the minimum of this and what the client
    /// requested through its `Keep-Alive` header.
    pub max_keep_alive: Duration,

    /// Maximum duration of a single socket write (default: `3 seconds`).
    pub socket_write_timeout: Duration,

    /// Largest unread body remainder the engine drains synchronously
    /// before reusing the connection (default: `8192`). A larger
    /// remainder closes the connection instead of draining it.
    pub drain_limit: u64,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            header_timeout: Duration::from_secs(60),
            max_keep_alive: Duration::from_secs(300),
            socket_write_timeout: Duration::from_secs(3),
            drain_limit: 8192,

            _priv: (),
        }
    }
}

/// Request parsing limits.
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Total size budget for the request line plus all header lines
    /// (default: `8192`).
    pub header_section_size: usize,

    /// Maximum length of the request line (default: `4096`).
    pub request_line_size: usize,

    /// Maximum length of a single header line (default: `2048`).
    pub header_line_size: usize,

    /// Largest accepted `Content-Length` value (default: `0x2386f26fc0ffff`,
    /// the largest 16-digit decimal number).
    pub max_content_length: u64,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            header_section_size: 8192,
            request_line_size: 4096,
            header_line_size: 2048,
            max_content_length: 0x2386f26fc0ffff,

            _priv: (),
        }
    }
}

/// Eviction knobs for one [`Cache`](crate::Cache) instance.
///
/// Capacity and TTL are independent: `capacity = usize::MAX` degrades the
/// store to a pure TTL cache, a very large `ttl` degrades it to a pure
/// LRU cache.
#[derive(Debug, Clone)]
pub struct CacheLimits {
    /// Maximum number of live entries (default: `20_000`).
    pub capacity: usize,

    /// Sliding expiration time of each entry (default: `600 seconds`).
    /// Refreshed by every `get` hit and every `set`.
    pub ttl: Duration,

    /// Minimum interval between batch reclamation passes triggered by
    /// mutating calls (default: `60 seconds`).
    pub sweep_interval: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            capacity: 20_000,
            ttl: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),

            _priv: (),
        }
    }
}
