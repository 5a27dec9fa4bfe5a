//! `weft` is a socket-level HTTP engine: a buffered byte pipe, an
//! HTTP/1.1 parser and serializer, an HPACK-based HTTP/2 framer, and a
//! WebSocket codec, threaded together by a small middleware pipeline.
//!
//! The crate does not provide a dependency-injection container, a
//! configuration loader, TLS certificate management, or a static-file
//! embedding story: those are external collaborators. What it does
//! provide is bit-exact wire handling and a concurrency model that
//! scales to many connections with bounded, pooled buffers.
#![recursion_limit = "256"]

#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate matches;
#[macro_use]
extern crate log;

pub mod chunked;
pub mod enums;
pub mod error;
pub mod headers;
pub mod http1;
pub mod http2;
pub mod pipe;
pub mod pipeline;
pub mod pool;
pub mod request;
pub mod response;
pub mod router;
pub mod serializer;
pub mod server;
pub mod websocket;

mod date;

pub use enums::{Method, Status, Version};
pub use error::Error;
pub use request::Request;
pub use response::Response;

/// Case-insensitive comparison of a single comma-separated token against
/// `close`, ignoring surrounding ASCII whitespace.
pub fn is_close(val: &[u8]) -> bool {
    token_matches(val, b"close")
}

/// Same as [`is_close`] but for the `chunked` transfer-coding token.
pub fn is_chunked(val: &[u8]) -> bool {
    token_matches(val, b"chunked")
}

/// Same as [`is_close`] but for the `100-continue` expectation token.
pub fn is_continue(val: &[u8]) -> bool {
    token_matches(val, b"100-continue")
}

/// Case-insensitive, whitespace-tolerant match of a single header value
/// against an expected lowercase ASCII token.
///
/// The value may be padded with `\r`, `\n`, ` `, `\t` on either side but
/// must not contain anything else besides `expected`.
fn token_matches(val: &[u8], expected: &[u8]) -> bool {
    fn is_pad(b: u8) -> bool {
        matches!(b, b'\r' | b'\n' | b' ' | b'\t')
    }
    let trimmed = {
        let mut start = 0;
        let mut end = val.len();
        while start < end && is_pad(val[start]) {
            start += 1;
        }
        while end > start && is_pad(val[end - 1]) {
            end -= 1;
        }
        &val[start..end]
    };
    trimmed.len() == expected.len()
        && trimmed
            .iter()
            .zip(expected.iter())
            .all(|(&a, &b)| a.to_ascii_lowercase() == b)
}

#[cfg(test)]
mod test {
    use super::{is_chunked, is_close, is_continue};

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"chuNKED"));
        assert!(is_chunked(b"CHUNKED"));
        assert!(is_chunked(b"   CHUNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(is_chunked(b"chunked  "));
        assert!(!is_chunked(b"   CHUNKED 1 "));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b"Close"));
        assert!(is_close(b"clOSE"));
        assert!(is_close(b"CLOSE"));
        assert!(is_close(b" CLOSE"));
        assert!(is_close(b"   close   "));
        assert!(!is_close(b"Close  1 "));
        assert!(!is_close(b" xclose   "));
    }

    #[test]
    fn test_continue() {
        assert!(is_continue(b"100-continue"));
        assert!(is_continue(b"100-Continue"));
        assert!(is_continue(b"100-conTINUE"));
        assert!(is_continue(b"100-CONTINUE"));
        assert!(is_continue(b"  100-CONTINUE"));
        assert!(is_continue(b"   100-continue   "));
        assert!(!is_continue(b"100-continue y  "));
        assert!(!is_continue(b"100-coztinue   "));
    }
}
