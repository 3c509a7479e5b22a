//! The per-connection request/response loop.
//!
//! One engine instance lives in each worker task. `run` drives an
//! accepted socket through `parse -> dispatch -> keep-alive decision`
//! until the connection expires, errors out, or the client goes away.

use crate::{
    errors::ProtoError,
    http::{channel::Channel, request},
    limits::{ConnLimits, ReqLimits},
    report::{ErrorContext, ErrorSink},
    server::server_impl::Handler,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

pub(crate) struct Engine<H: Handler> {
    pub(crate) handler: Arc<H>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
}

impl<H: Handler> Engine<H> {
    pub(crate) async fn run(&self, stream: TcpStream, addr: SocketAddr) {
        let mut channel = Channel::new(stream, &self.conn_limits);

        loop {
            let mut request = match timeout(
                self.conn_limits.header_timeout,
                request::read_request(channel.reader(), &self.req_limits),
            )
            .await
            {
                Ok(Ok(request)) => request,
                Ok(Err(err)) => {
                    self.reject(&mut channel, err).await;
                    return;
                }
                Err(_) => {
                    debug!(remote = %addr, "header parsing timed out");
                    return;
                }
            };
            request.set_client_addr(addr);
            channel.begin(request.protocol(), request.content_length());

            if let Err(error) = self.handler.handle(&mut request, &mut channel).await {
                self.sink.dispatch_error(&ErrorContext {
                    status: channel.status_sent(),
                    method: request.method(),
                    path: request.path(),
                    remote_addr: addr,
                    user_agent: request.header("user-agent"),
                    error: error.as_ref(),
                });

                // A response cannot be un-sent; only a clean channel may
                // still answer with a generic 500.
                if channel.status_sent().is_none() && !channel.disconnected() {
                    let _ = channel.internal_server_error().await;
                }
                let _ = channel.close(true).await;
                return;
            }

            if !channel.closed() || channel.disconnected() {
                return;
            }

            let Some(grant) = keep_alive_grant(&request, self.conn_limits.max_keep_alive) else {
                return;
            };

            // Reuse only when the unread remainder is small enough to
            // drain synchronously; a larger one costs more than a new
            // connection.
            let left = channel.left();
            if left > 0 {
                if left >= self.conn_limits.drain_limit {
                    return;
                }
                if channel.drain().await.is_err() || channel.left() != 0 {
                    return;
                }
            }

            match timeout(grant, channel.wait_readable()).await {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return,
                Ok(Err(err)) => {
                    debug!(remote = %addr, error = %err, "keep-alive wait failed");
                    return;
                }
                Err(_) => {
                    debug!(remote = %addr, "keep-alive window expired");
                    return;
                }
            }
        }
    }

    /// Protocol errors answer with a canned 400-class page when the
    /// request was framed enough to answer at all; the rest drop the
    /// connection silently.
    async fn reject(&self, channel: &mut Channel, err: ProtoError) {
        match err.response() {
            Some(canned) => {
                debug!(error = %err, "protocol error");
                let _ = channel.send_raw(canned).await;
            }
            None => debug!(error = %err, "connection dropped during parse"),
        }
    }
}

/// The keep-alive window granted to this client, or `None` to close.
///
/// `Connection: keep-alive` authorizes reuse with a default window; an
/// explicit `Keep-Alive: <seconds>` header is required otherwise and is
/// honored up to the server maximum.
fn keep_alive_grant(request: &request::Request, server_max: Duration) -> Option<Duration> {
    let connection = request.header("connection").map(str::trim);
    let requested = match connection {
        Some(value) if value.eq_ignore_ascii_case("keep-alive") => {
            request.header("keep-alive").unwrap_or("300")
        }
        _ => request.header("keep-alive")?,
    };

    let seconds = parse_keep_alive(requested)?;
    Some(Duration::from_secs(seconds).min(server_max))
}

/// 1 to 7 digits, no leading zero.
fn parse_keep_alive(value: &str) -> Option<u64> {
    let digits = value.trim();
    let bytes = digits.as_bytes();
    if bytes.is_empty() || bytes.len() > 7 {
        return None;
    }
    if bytes[0] == b'0' || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn request_from(raw: &str) -> request::Request {
        let limits = ReqLimits::default();
        let mut reader = BufReader::new(raw.as_bytes());
        request::read_request(&mut reader, &limits).await.unwrap()
    }

    const MAX: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn connection_keep_alive_grants_default_window() {
        let request = request_from(
            "GET / HTTP/1.1\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n",
        )
        .await;

        assert_eq!(keep_alive_grant(&request, MAX), Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn requested_window_is_capped_by_the_server_maximum() {
        let request = request_from(
            "GET / HTTP/1.1\r\nConnection: keep-alive\r\nKeep-Alive: 9999\r\n\r\n",
        )
        .await;

        assert_eq!(keep_alive_grant(&request, MAX), Some(MAX));

        let request =
            request_from("GET / HTTP/1.1\r\nConnection: keep-alive\r\nKeep-Alive: 5\r\n\r\n")
                .await;
        assert_eq!(keep_alive_grant(&request, MAX), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn explicit_keep_alive_header_works_without_connection_header() {
        let request = request_from("GET / HTTP/1.1\r\nKeep-Alive: 30\r\n\r\n").await;
        assert_eq!(keep_alive_grant(&request, MAX), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn close_and_absent_headers_deny_reuse() {
        let cases = [
            "GET / HTTP/1.1\r\n\r\n",
            "GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
            "GET / HTTP/1.1\r\nConnection: keep-alive\r\nKeep-Alive: 0\r\n\r\n",
            "GET / HTTP/1.1\r\nConnection: keep-alive\r\nKeep-Alive: soon\r\n\r\n",
            "GET / HTTP/1.1\r\nConnection: keep-alive\r\nKeep-Alive: 12345678\r\n\r\n",
        ];

        for raw in cases {
            let request = request_from(raw).await;
            assert_eq!(keep_alive_grant(&request, MAX), None, "raw {:?}", raw);
        }
    }
}
