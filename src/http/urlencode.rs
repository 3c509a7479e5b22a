//! Percent-encoding helpers for URL paths and header names.

use memchr::memchr;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Decodes `%XX` escapes in `input`. Malformed escapes are kept literally.
///
/// `+` is not treated specially; this is the path flavor of decoding, not
/// the form flavor.
///
/// # Examples
/// ```
/// use strand_web::urlencode::unquote;
///
/// assert_eq!(unquote(b"a%20b"), b"a b");
/// assert_eq!(unquote(b"100%"), b"100%");
/// ```
pub fn unquote(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = memchr(b'%', rest) {
        out.extend_from_slice(&rest[..pos]);
        if let (Some(hi), Some(lo)) = (
            rest.get(pos + 1).copied().and_then(hex_val),
            rest.get(pos + 2).copied().and_then(hex_val),
        ) {
            out.push(hi << 4 | lo);
            rest = &rest[pos + 3..];
        } else {
            out.push(b'%');
            rest = &rest[pos + 1..];
        }
    }
    out.extend_from_slice(rest);
    out
}

/// Percent-encodes everything outside the unreserved set. `/` is left
/// as-is, matching the header-name quoting the response writer performs.
pub fn quote(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &byte in input {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'.' | b'-' | b'~' | b'/' => {
                out.push(byte)
            }
            _ => {
                out.push(b'%');
                out.push(HEX[(byte >> 4) as usize]);
                out.push(HEX[(byte & 0x0f) as usize]);
            }
        }
    }
    out
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquote_basic() {
        let cases: [(&[u8], &[u8]); 6] = [
            (b"plain", b"plain"),
            (b"a%20b", b"a b"),
            (b"%2Fetc%2Fpasswd", b"/etc/passwd"),
            (b"%e4%b8%ad", "\u{4e2d}".as_bytes()),
            (b"trailing%2", b"trailing%2"),
            (b"%zz", b"%zz"),
        ];

        for (input, expected) in cases {
            assert_eq!(unquote(input), expected);
        }
    }

    #[test]
    fn quote_basic() {
        let cases: [(&[u8], &[u8]); 3] = [
            (b"Content-Type", b"Content-Type"),
            (b"a b", b"a%20b"),
            (b"key\r\nInjected", b"key%0D%0AInjected"),
        ];

        for (input, expected) in cases {
            assert_eq!(quote(input), expected);
        }
    }

    #[test]
    fn quote_unquote_agree() {
        let original = b"weird key: \x00\xff/ok";
        assert_eq!(unquote(&quote(original)), original);
    }
}
