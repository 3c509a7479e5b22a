use std::{error, fmt, io};

/// Protocol-level failures raised while reading a request off the wire.
///
/// Variants that describe a request the server managed to frame carry a
/// canned 400-class response; the rest tear the connection down silently.
#[derive(Debug)]
pub(crate) enum ProtoError {
    /// Peer went away before a full request arrived.
    Disconnected,

    InvalidRequestLine,
    InvalidHeader,
    HeaderSectionTooLarge,
    InvalidContentLength,
    InvalidEncoding,

    Io(io::Error),
}

macro_rules! canned_responses {
    ($($name:ident: $status:literal, $len:literal => $body:literal; )*) => {
        pub(crate) const fn response(&self) -> Option<&'static [u8]> {
            match self { $(
                Self::$name => Some(concat!(
                    "HTTP/1.1 ", $status, "\r\n",
                    "Connection: close\r\n",
                    "Content-Type: text/plain\r\n",
                    "Content-Length: ", $len, "\r\n",
                    "\r\n",
                    $body
                ).as_bytes()),
            )*
                _ => None,
            }
        }
    };
}

impl ProtoError {
    canned_responses! {
        InvalidRequestLine: "400 Bad Request", "20"
            => "Invalid request line";
        InvalidHeader: "400 Bad Request", "14"
            => "Invalid header";
        HeaderSectionTooLarge: "431 Request Header Fields Too Large", "24"
            => "Header section too large";
        InvalidContentLength: "400 Bad Request", "22"
            => "Invalid Content-Length";
        InvalidEncoding: "400 Bad Request", "16"
            => "Invalid encoding";
    }
}

/// Sent by the dedicated overflow responders when the pending-connection
/// queue is full.
pub(crate) const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
    Connection: close\r\n\
    Content-Type: text/plain\r\n\
    Content-Length: 19\r\n\
    \r\n\
    Service unavailable";

impl error::Error for ProtoError {}
impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ProtoError {
    fn from(err: io::Error) -> Self {
        ProtoError::Io(err)
    }
}

/// Misuse or transport failure of the response write path.
///
/// [`Closed`](ChannelError::Closed) and [`HeaderSent`](ChannelError::HeaderSent)
/// are programming errors in the handler; they are reported through the
/// error sink, never retried.
#[derive(Debug)]
pub enum ChannelError {
    /// The logical response was already finalized.
    Closed,
    /// A status line has already been sent for this request.
    HeaderSent,
    Io(io::Error),
}

impl error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            ChannelError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "response already closed"),
            ChannelError::HeaderSent => write!(f, "status line already sent"),
            ChannelError::Io(err) => write!(f, "socket error: {}", err),
        }
    }
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        ChannelError::Io(err)
    }
}
