//! Per-connection state and the response write path.
//!
//! A [`Channel`] owns one accepted socket for its whole life and is handed
//! to the request handler once per request. Two flags split its lifecycle:
//! `closed` means the logical response is finished (no further header or
//! body writes for this request), `disconnected` means the socket itself
//! is gone. The engine resets the per-request state between keep-alive
//! iterations; the socket and read buffer persist.

use crate::{errors::ChannelError, http::urlencode, limits::ConnLimits};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct Channel {
    stream: BufReader<TcpStream>,
    protocol: String,
    left: u64,
    chunked: bool,
    closed: bool,
    disconnected: bool,
    status_sent: Option<String>,
    write_timeout: Duration,
}

impl Channel {
    pub(crate) fn new(stream: TcpStream, limits: &ConnLimits) -> Self {
        Self {
            stream: BufReader::new(stream),
            protocol: String::from("HTTP/1.1"),
            left: 0,
            chunked: false,
            closed: false,
            disconnected: false,
            status_sent: None,
            write_timeout: limits.socket_write_timeout,
        }
    }

    /// Resets the per-request state for the next loop iteration.
    pub(crate) fn begin(&mut self, protocol: &str, content_length: u64) {
        self.protocol.clear();
        self.protocol.push_str(protocol);
        self.left = content_length;
        self.chunked = false;
        self.closed = false;
        self.status_sent = None;
    }

    #[inline(always)]
    pub(crate) fn reader(&mut self) -> &mut BufReader<TcpStream> {
        &mut self.stream
    }

    /// True once the logical response is finished.
    #[inline(always)]
    pub const fn closed(&self) -> bool {
        self.closed
    }

    /// True once the socket has been torn down.
    #[inline(always)]
    pub const fn disconnected(&self) -> bool {
        self.disconnected
    }

    /// The status line sent for the current request, if any.
    #[inline(always)]
    pub fn status_sent(&self) -> Option<&str> {
        self.status_sent.as_deref()
    }

    /// Unread request-body bytes remaining on the wire.
    #[inline(always)]
    pub const fn left(&self) -> u64 {
        self.left
    }
}

// Response write path.
impl Channel {
    /// Sends the status line and headers of a fixed-framing response.
    ///
    /// The caller is responsible for `Content-Length` (or for closing
    /// with `disconnect` once the body is written).
    pub async fn start_response(
        &mut self,
        status: &str,
        headers: &[(&str, &str)],
    ) -> Result<(), ChannelError> {
        self.check_fresh()?;
        let head = self.render_head(status, headers, false);
        self.send(&head).await?;
        self.status_sent = Some(status.to_string());
        Ok(())
    }

    /// Sends the status line with `Transfer-Encoding: chunked`; every
    /// following [`write`](Channel::write) is framed as one chunk.
    pub async fn start_chunked(
        &mut self,
        status: &str,
        headers: &[(&str, &str)],
    ) -> Result<(), ChannelError> {
        self.check_fresh()?;
        let head = self.render_head(status, headers, true);
        self.send(&head).await?;
        self.status_sent = Some(status.to_string());
        self.chunked = true;
        Ok(())
    }

    /// Sends a complete fixed-length response and finalizes it.
    /// `Content-Length` is computed from `content`.
    pub async fn send_response_and_close(
        &mut self,
        status: &str,
        headers: &[(&str, &str)],
        content: Option<&[u8]>,
    ) -> Result<(), ChannelError> {
        self.check_fresh()?;

        let mut buf = self.render_partial_head(status, headers);
        match content {
            Some(content) => {
                buf.extend_from_slice(
                    format!("Content-Length: {}\r\n\r\n", content.len()).as_bytes(),
                );
                buf.extend_from_slice(content);
            }
            None => buf.extend_from_slice(b"\r\n"),
        }

        self.send(&buf).await?;
        self.status_sent = Some(status.to_string());
        self.closed = true;
        Ok(())
    }

    /// [`send_response_and_close`](Channel::send_response_and_close) with
    /// an HTML content type.
    pub async fn send_html_and_close(
        &mut self,
        status: &str,
        headers: &[(&str, &str)],
        content: &str,
    ) -> Result<(), ChannelError> {
        self.check_fresh()?;

        let mut buf = self.render_partial_head(status, headers);
        buf.extend_from_slice(
            format!(
                "Content-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                content.len()
            )
            .as_bytes(),
        );
        buf.extend_from_slice(content.as_bytes());

        self.send(&buf).await?;
        self.status_sent = Some(status.to_string());
        self.closed = true;
        Ok(())
    }

    /// Sends body bytes: verbatim for fixed framing, as one
    /// `<hex-length>\r\n<data>\r\n` frame when chunked. A zero-length
    /// chunked write is a no-op, never an (stream-terminating) empty
    /// chunk frame.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !self.chunked {
            return self.send(data).await;
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut frame = Vec::with_capacity(data.len() + 16);
        frame.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
        frame.extend_from_slice(data);
        frame.extend_from_slice(b"\r\n");
        self.send(&frame).await
    }

    /// Finalizes the logical response. A chunked stream gets its
    /// terminating frame; `disconnect` additionally tears the socket
    /// down, making the channel unusable.
    pub async fn close(&mut self, disconnect: bool) -> Result<(), ChannelError> {
        if self.chunked && !self.closed {
            self.send(b"0\r\n\r\n").await?;
        }
        if disconnect {
            let _ = self.stream.get_mut().shutdown().await;
            self.disconnected = true;
        }
        self.closed = true;
        Ok(())
    }

    pub(crate) async fn send_raw(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        self.send(data).await
    }

    fn check_fresh(&self) -> Result<(), ChannelError> {
        if self.closed || self.disconnected {
            return Err(ChannelError::Closed);
        }
        if self.status_sent.is_some() {
            return Err(ChannelError::HeaderSent);
        }
        Ok(())
    }

    /// Status line plus header lines, without the terminating blank line.
    /// Header names are percent-quoted on the wire.
    fn render_partial_head(&self, status: &str, headers: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(self.protocol.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(status.as_bytes());
        buf.extend_from_slice(b"\r\n");
        for (name, value) in headers {
            buf.extend_from_slice(&urlencode::quote(name.as_bytes()));
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf
    }

    fn render_head(&self, status: &str, headers: &[(&str, &str)], chunked: bool) -> Vec<u8> {
        let mut buf = self.render_partial_head(status, headers);
        if chunked {
            buf.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let writer = self.stream.get_mut();
        match timeout(self.write_timeout, writer.write_all(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.disconnected = true;
                Err(ChannelError::Io(err))
            }
            Err(_) => {
                self.disconnected = true;
                Err(ChannelError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "socket write timed out",
                )))
            }
        }
    }
}

// Body read path.
impl Channel {
    /// Reads at most `size` bytes of the request body. Returns fewer
    /// bytes only at the end of the declared body (or after `close`,
    /// when it always returns empty).
    pub async fn read(&mut self, size: usize) -> Result<Vec<u8>, ChannelError> {
        if self.closed {
            return Ok(Vec::new());
        }

        let want = (size as u64).min(self.left) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        self.left -= filled as u64;
        Ok(buf)
    }

    /// Reads the whole remaining request body.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, ChannelError> {
        let left = self.left.min(usize::MAX as u64) as usize;
        self.read(left).await
    }

    /// Discards the unread body remainder. Used before connection reuse;
    /// the caller has already bounded `left`.
    pub(crate) async fn drain(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 4096];
        while self.left > 0 {
            let want = self.left.min(scratch.len() as u64) as usize;
            let n = self.stream.read(&mut scratch[..want]).await?;
            if n == 0 {
                break;
            }
            self.left -= n as u64;
        }
        Ok(())
    }

    /// Waits until at least one byte of the next request is readable.
    /// `false` means the peer closed the connection.
    pub(crate) async fn wait_readable(&mut self) -> io::Result<bool> {
        Ok(!self.stream.fill_buf().await?.is_empty())
    }
}

// Fast responses for the common failure pages, HTML-bodied like the rest
// of the response surface.
impl Channel {
    pub async fn not_modified(&mut self) -> Result<(), ChannelError> {
        self.send_response_and_close("304 Not Modified", &[], None).await
    }

    pub async fn bad_request(&mut self) -> Result<(), ChannelError> {
        self.send_html_and_close(
            "400 Bad Request",
            &[],
            "<html><head><title>400 Bad Request</title></head><body><h1>Bad Request</h1>\
             <p>Your browser sent a request that this server could not understand.</p>\
             </body></html>",
        )
        .await
    }

    pub async fn forbidden(&mut self, uri: &str) -> Result<(), ChannelError> {
        let content = format!(
            "<html><head><title>403 Forbidden</title></head><body><h1>Forbidden</h1>\
             <p>You don't have permission to access {} on this server.</p></body></html>",
            escape_uri(uri)
        );
        self.send_html_and_close("403 Forbidden", &[], &content).await
    }

    pub async fn not_found(&mut self, uri: &str) -> Result<(), ChannelError> {
        let content = format!(
            "<html><head><title>404 Not Found</title></head><body><h1>Not Found</h1>\
             <p>The requested URL {} was not found on this server.</p></body></html>",
            escape_uri(uri)
        );
        self.send_html_and_close("404 Not Found", &[], &content).await
    }

    pub async fn method_not_allowed(&mut self, method: &str) -> Result<(), ChannelError> {
        let content = format!(
            "<html><head><title>405 Method Not Allowed</title></head>\
             <body><h1>Method Not Allowed</h1>\
             <p>The method {} is not allowed for the requested URL.</p></body></html>",
            escape(method)
        );
        self.send_html_and_close("405 Method Not Allowed", &[], &content).await
    }

    pub async fn request_entity_too_large(&mut self) -> Result<(), ChannelError> {
        self.send_html_and_close(
            "413 Request Entity Too Large",
            &[],
            "<html><head><title>413 Request Entity Too Large</title></head>\
             <body><h1>Request Entity Too Large</h1></body></html>",
        )
        .await
    }

    pub async fn request_uri_too_large(&mut self) -> Result<(), ChannelError> {
        self.send_html_and_close(
            "414 Request-URI Too Large",
            &[],
            "<html><head><title>414 Request-URI Too Large</title></head>\
             <body><h1>Request-URI Too Large</h1></body></html>",
        )
        .await
    }

    pub async fn internal_server_error(&mut self) -> Result<(), ChannelError> {
        self.send_html_and_close(
            "500 Internal Server Error",
            &[],
            "<html><head><title>500 Internal Server Error</title></head>\
             <body><h1>Internal Server Error</h1><p>The server encountered an internal \
             error and was unable to complete your request.</p></body></html>",
        )
        .await
    }

    pub async fn moved_permanently(&mut self, location: &str) -> Result<(), ChannelError> {
        self.redirect("301 Moved Permanently", location).await
    }

    pub async fn found(&mut self, location: &str) -> Result<(), ChannelError> {
        self.redirect("302 Found", location).await
    }

    async fn redirect(&mut self, status: &str, location: &str) -> Result<(), ChannelError> {
        let href = escape(location);
        let content = format!(
            "<html><head><title>{}</title></head><body>\
             <p>This resource resides at <a href=\"{}\">{}</a></p></body></html>",
            status, href, href
        );
        self.send_html_and_close(status, &[("Location", location)], &content).await
    }
}

fn escape_uri(uri: &str) -> String {
    let decoded = urlencode::unquote(uri.as_bytes());
    escape(&String::from_utf8_lossy(&decoded))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
