//! Crate-wide error type.
//!
//! Every component keeps its own `quick_error!`-built enum (see
//! `http1::Error`, `http2::Error`, `websocket::Error`) so that a module
//! can be used in isolation. This module ties them together into one
//! type that tags the originating layer, which is what connection-level
//! code actually wants to log and act on.

use std::io;

use crate::http1;
use crate::http2;
use crate::websocket;

quick_error! {
    /// Top-level error, tagged by the layer that produced it.
    #[derive(Debug)]
    pub enum Error {
        /// Socket-level I/O failure.
        Io(err: io::Error) {
            description("I/O error")
            display("I/O error: {}", err)
            from()
        }
        /// HTTP/1.1 parser or serializer failure.
        Http1(err: http1::Error) {
            description("HTTP/1.1 error")
            display("HTTP/1.1 error: {}", err)
            from()
        }
        /// HTTP/2 framer or HPACK failure.
        Http2(err: http2::Error) {
            description("HTTP/2 error")
            display("HTTP/2 error: {}", err)
            from()
        }
        /// WebSocket handshake or frame failure.
        WebSocket(err: websocket::Error) {
            description("WebSocket error")
            display("WebSocket error: {}", err)
            from()
        }
        /// No registered route matched the request.
        NotFound {
            description("no route matched the request")
        }
        /// The request was syntactically valid but semantically bad
        /// (e.g. an unparsable `Content-Length`).
        BadRequest(reason: &'static str) {
            description("bad request")
            display("bad request: {}", reason)
        }
        /// Headers exceeded the configured size budget.
        HeadersTooLarge {
            description("request headers too large")
        }
        /// A declared or observed body exceeded the configured limit.
        PayloadTooLarge {
            description("request payload too large")
        }
        /// The peer closed the connection in the middle of a message.
        UnexpectedEnd {
            description("peer closed connection mid-message")
        }
        /// TLS handshake failed.
        TlsFailure(reason: String) {
            description("TLS handshake failed")
            display("TLS handshake failed: {}", reason)
        }
        /// Middleware or endpoint code panicked or returned an
        /// application-level failure after the response was already
        /// committed to the wire.
        EndpointFailedAfterCommit {
            description("endpoint failed after response was committed")
        }
        /// A header value contained `\r`, `\n`, or NUL.
        HeaderInjection(name: String) {
            description("header value contains a forbidden control byte")
            display("header value for {:?} contains a forbidden control byte", name)
        }
    }
}

/// Internal invariants that indicate a bug in this crate, not a runtime
/// condition an endpoint can recover from. Call sites that detect these
/// should abort rather than attempt to continue: the buffer pool and
/// the pooled header map have no well-defined behavior once violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalBug {
    /// A pooled small-map operation was attempted after `dispose()`.
    UseAfterDispose,
    /// A pooled buffer was returned to the pool more than once.
    PoolDoubleFree,
}

impl FatalBug {
    /// Log and abort the process. This never returns.
    pub fn abort(self) -> ! {
        error!("fatal internal invariant violated: {:?}", self);
        std::process::abort()
    }
}
