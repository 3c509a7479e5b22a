//! Request context and the HTTP/1.1 header parser.
//!
//! One [`Request`] is built per request, not per connection, and owned by
//! the loop iteration that created it. Header names are normalized the
//! same way for every lookup: upper-cased, `-` replaced by `_`, prefixed
//! with `HEADER_`. Duplicate headers are last-write-wins.

use crate::{errors::ProtoError, http::urlencode, limits::ReqLimits};
use memchr::{memchr, memchr_iter};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A parsed HTTP request.
///
/// The header map is immutable after parsing; the [`Locals`] sub-map is
/// the one mutable part, reserved for router-injected values.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    environ: HashMap<String, String>,
    method: String,
    uri: String,
    path: String,
    query: String,
    protocol: String,
    content_length: u64,
    client_addr: SocketAddr,
    locals: Locals,
}

/// Values injected between routing and dispatch: the matched sub-path,
/// the matched configuration arguments, and the selected handler key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Locals {
    pub handler: Option<String>,
    pub path_info: Option<String>,
    pub args: HashMap<String, String>,
}

impl Request {
    const UNKNOWN_CLIENT: SocketAddr =
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    #[inline(always)]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request URI exactly as it appeared on the request line.
    #[inline(always)]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The percent-decoded path. Encoded separators (`%2F`) survive as
    /// literal `%2F` markers so they are never confused with real path
    /// boundaries.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, empty when the URI carried none.
    #[inline(always)]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The protocol from the request line, echoed back on status lines.
    #[inline(always)]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Declared body length; zero when no `Content-Length` was sent.
    #[inline(always)]
    pub const fn content_length(&self) -> u64 {
        self.content_length
    }

    #[inline(always)]
    pub const fn client_addr(&self) -> &SocketAddr {
        &self.client_addr
    }

    /// Looks a header up by its on-the-wire name, e.g. `"user-agent"`.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.environ.get(&normalize(name)).map(String::as_str)
    }

    /// The full normalized header map (`HEADER_*` keys).
    #[inline(always)]
    pub const fn environ(&self) -> &HashMap<String, String> {
        &self.environ
    }

    #[inline(always)]
    pub const fn locals(&self) -> &Locals {
        &self.locals
    }

    #[inline(always)]
    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    #[inline(always)]
    pub(crate) fn set_client_addr(&mut self, addr: SocketAddr) {
        self.client_addr = addr;
    }
}

/// Normalizes a wire header name into its environ key.
pub(crate) fn normalize(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 7);
    key.push_str("HEADER_");
    for c in name.chars() {
        match c {
            '-' => key.push('_'),
            _ => key.extend(c.to_uppercase()),
        }
    }
    key
}

/// Reads one request head off the stream: request line, headers, blank
/// line. Body bytes stay in the reader for the channel to consume.
///
/// The whole section is bounded by `limits.header_section_size`; blank
/// lines before the request line are tolerated within that budget.
pub(crate) async fn read_request<R>(
    reader: &mut R,
    limits: &ReqLimits,
) -> Result<Request, ProtoError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(256);
    let mut size = 0usize;

    let (method, uri, protocol) = loop {
        if size >= limits.header_section_size {
            return Err(ProtoError::InvalidRequestLine);
        }
        line.clear();
        read_line(reader, &mut line, limits.request_line_size).await?;
        size += line.len();

        let trimmed = trim_crlf(&line);
        if trimmed.is_empty() {
            continue;
        }
        break parse_request_line(trimmed)?;
    };

    let mut environ = HashMap::new();
    loop {
        line.clear();
        read_line(reader, &mut line, limits.header_line_size).await?;
        size += line.len();
        if size > limits.header_section_size {
            return Err(ProtoError::HeaderSectionTooLarge);
        }

        let trimmed = trim_crlf(&line);
        if trimmed.is_empty() {
            break;
        }
        let (key, value) = parse_header_line(trimmed)?;
        environ.insert(key, value);
    }

    let content_length = parse_content_length(&environ, limits)?;
    let (path, query) = split_target(&uri);

    Ok(Request {
        environ,
        method,
        uri,
        path,
        query,
        protocol,
        content_length,
        client_addr: Request::UNKNOWN_CLIENT,
        locals: Locals::default(),
    })
}

/// Appends one `\n`-terminated line to `line`, never buffering more than
/// `cap` bytes for it.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, cap: usize) -> Result<(), ProtoError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Err(ProtoError::Disconnected);
        }

        match memchr(b'\n', chunk) {
            Some(pos) => {
                if line.len() + pos + 1 > cap {
                    return Err(ProtoError::HeaderSectionTooLarge);
                }
                line.extend_from_slice(&chunk[..=pos]);
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let taken = chunk.len();
                if line.len() + taken > cap {
                    return Err(ProtoError::HeaderSectionTooLarge);
                }
                line.extend_from_slice(chunk);
                reader.consume(taken);
            }
        }
    }
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_request_line(line: &[u8]) -> Result<(String, String, String), ProtoError> {
    let line = simdutf8::basic::from_utf8(line).map_err(|_| ProtoError::InvalidEncoding)?;
    let line = line.trim_matches(|c| c == ' ' || c == '\t');

    let (method, rest) = line
        .split_once(|c| c == ' ' || c == '\t')
        .ok_or(ProtoError::InvalidRequestLine)?;
    if method.is_empty()
        || !method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(ProtoError::InvalidRequestLine);
    }

    let rest = rest.trim_start_matches(|c| c == ' ' || c == '\t');
    let split = rest
        .rfind(|c| c == ' ' || c == '\t')
        .ok_or(ProtoError::InvalidRequestLine)?;
    let uri = rest[..split].trim_end_matches(|c| c == ' ' || c == '\t');
    let protocol = &rest[split + 1..];

    if uri.is_empty() || !is_protocol(protocol) {
        return Err(ProtoError::InvalidRequestLine);
    }

    Ok((method.to_string(), uri.to_string(), protocol.to_string()))
}

fn is_protocol(token: &str) -> bool {
    let bytes = token.as_bytes();
    bytes.len() == 8
        && bytes[..5].eq_ignore_ascii_case(b"HTTP/")
        && matches!(bytes[5], b'0'..=b'2')
        && bytes[6] == b'.'
        && bytes[7].is_ascii_digit()
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), ProtoError> {
    let line = simdutf8::basic::from_utf8(line).map_err(|_| ProtoError::InvalidEncoding)?;
    let colon = line.find(':').ok_or(ProtoError::InvalidHeader)?;

    let key = line[..colon].trim();
    if key.is_empty() {
        return Err(ProtoError::InvalidHeader);
    }
    let value = line[colon + 1..].trim();

    Ok((normalize(key), value.to_string()))
}

fn parse_content_length(
    environ: &HashMap<String, String>,
    limits: &ReqLimits,
) -> Result<u64, ProtoError> {
    let Some(raw) = environ.get("HEADER_CONTENT_LENGTH") else {
        return Ok(0);
    };

    let digits = raw.trim();
    // At most 16 decimal digits, so the value can never overflow u64.
    if digits.is_empty()
        || digits.len() > 16
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ProtoError::InvalidContentLength);
    }

    let value: u64 = digits.parse().map_err(|_| ProtoError::InvalidContentLength)?;
    if value > limits.max_content_length {
        return Err(ProtoError::InvalidContentLength);
    }
    Ok(value)
}

fn split_target(uri: &str) -> (String, String) {
    match uri.split_once('?') {
        Some((raw_path, query)) => (decode_path(raw_path), query.to_string()),
        None => (decode_path(uri), String::new()),
    }
}

/// Percent-decodes a raw path while keeping encoded slashes intact: the
/// path is split on the raw `%2F`/`%2f` form first, each piece decoded,
/// then rejoined with the literal `%2F` marker.
fn decode_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;

    for pos in memchr_iter(b'%', bytes) {
        if pos >= start
            && bytes.len() >= pos + 3
            && bytes[pos + 1] == b'2'
            && matches!(bytes[pos + 2], b'F' | b'f')
        {
            pieces.push(&bytes[start..pos]);
            start = pos + 3;
        }
    }
    pieces.push(&bytes[start..]);

    let decoded: Vec<String> = pieces
        .iter()
        .map(|piece| String::from_utf8_lossy(&urlencode::unquote(piece)).into_owned())
        .collect();
    decoded.join("%2F")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &str) -> Result<Request, ProtoError> {
        let limits = ReqLimits::default();
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader, &limits).await
    }

    #[tokio::test]
    async fn round_trip() {
        let request = parse("GET /foo?x=1 HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();

        assert_eq!(request.method(), "GET");
        assert_eq!(request.path(), "/foo");
        assert_eq!(request.query(), "x=1");
        assert_eq!(request.header("host"), Some("h"));
        assert_eq!(request.content_length(), 0);
        assert_eq!(request.protocol(), "HTTP/1.1");
    }

    #[tokio::test]
    async fn header_keys_are_normalized_last_write_wins() {
        let request = parse(
            "GET / HTTP/1.1\r\n\
             User-Agent: first\r\n\
             USER-agent: second\r\n\
             X-Thing:   padded value  \r\n\
             \r\n",
        )
        .await
        .unwrap();

        assert_eq!(request.header("user-agent"), Some("second"));
        assert_eq!(request.environ().get("HEADER_USER_AGENT").unwrap(), "second");
        assert_eq!(request.header("x-thing"), Some("padded value"));
    }

    #[tokio::test]
    async fn encoded_slashes_survive_decoding() {
        let cases = [
            ("/a%20b", "/a b"),
            ("/docs%2Fall", "/docs%2Fall"),
            ("/docs%2fall", "/docs%2Fall"),
            ("/p%41th%2Fx%20y", "/pAth%2Fx y"),
        ];

        for (raw, expected) in cases {
            let request = parse(&format!("GET {} HTTP/1.1\r\n\r\n", raw)).await.unwrap();
            assert_eq!(request.path(), expected, "uri {}", raw);
            assert_eq!(request.uri(), raw);
        }
    }

    #[tokio::test]
    async fn blank_lines_before_the_request_line_are_skipped() {
        let request = parse("\r\n\r\nGET / HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();
        assert_eq!(request.method(), "GET");
    }

    #[tokio::test]
    async fn content_length_policy() {
        let cases = [
            ("0", Ok(0)),
            ("123", Ok(123)),
            (" 42 ", Ok(42)),
            ("9999999999999999", Ok(9999999999999999)),
            ("99999999999999999", Err(())),
            ("-1", Err(())),
            ("12a", Err(())),
            ("", Err(())),
        ];

        for (value, expected) in cases {
            let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", value);
            let result = parse(&raw).await;
            match expected {
                Ok(length) => assert_eq!(result.unwrap().content_length(), length),
                Err(()) => assert!(
                    matches!(result, Err(ProtoError::InvalidContentLength)),
                    "value {:?}",
                    value
                ),
            }
        }
    }

    #[tokio::test]
    async fn malformed_request_lines_are_rejected() {
        let cases = [
            "garbage\r\n\r\n",
            "GET /\r\n\r\n",
            "GET / SPDY/1.1\r\n\r\n",
            "G@T / HTTP/1.1\r\n\r\n",
        ];

        for raw in cases {
            assert!(
                matches!(parse(raw).await, Err(ProtoError::InvalidRequestLine)),
                "raw {:?}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn header_without_colon_is_rejected() {
        let result = parse("GET / HTTP/1.1\r\nno colon here\r\n\r\n").await;
        assert!(matches!(result, Err(ProtoError::InvalidHeader)));
    }

    #[tokio::test]
    async fn oversized_header_section_is_rejected() {
        let filler = "X-Pad: ".to_string() + &"y".repeat(1024) + "\r\n";
        let raw = format!("GET / HTTP/1.1\r\n{}\r\n", filler.repeat(9));

        let result = parse(&raw).await;
        assert!(matches!(result, Err(ProtoError::HeaderSectionTooLarge)));
    }

    #[tokio::test]
    async fn truncated_request_reports_disconnect() {
        let result = parse("GET / HTTP/1.1\r\nHost: h\r\n").await;
        assert!(matches!(result, Err(ProtoError::Disconnected)));
    }
}
