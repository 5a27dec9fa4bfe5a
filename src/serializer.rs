//! Response serializer: an explicit state machine that builds a
//! status line, header block, and body into a caller-supplied buffer.
//!
//! Server-only (no `RequestStart`/`FinalResponseStart` states, since
//! this crate has no client half). Calling a method out of sequence is
//! a caller bug, not a runtime condition, and panics accordingly.

use std::fmt::Display;
use std::io::Write;

use crate::enums::{precomputed_status_line, HttpStatus, Status, Version};

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("transfer encoding added when Content-Length is already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        CantDetermineBodySize {
            description("neither Content-Length nor Transfer-Encoding is present")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set via add_length/add_chunked")
        }
        RequireBodyless {
            description("this response must not carry a body length header")
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Body {
    Normal,
    Head,
    Denied,
}

/// The response serializer's state machine. Every transition method
/// writes directly into `buf` as it's called; nothing is buffered
/// separately for later flushing.
#[derive(Debug)]
pub enum Serializer {
    ResponseStart { version: Version, close: bool },
    Headers { body: Body, close: bool },
    FixedHeaders { is_head: bool, close: bool, content_length: u64 },
    ChunkedHeaders { is_head: bool, close: bool },
    Bodyless,
    FixedBody { is_head: bool, content_length: u64 },
    ChunkedBody { is_head: bool },
    Done,
}

fn invalid_header(bytes: &[u8]) -> bool {
    bytes.iter().any(|&b| b == b'\r' || b == b'\n')
}

impl Serializer {
    /// Start a new response. `is_head` marks a response to a HEAD
    /// request (body is computed but never written to the wire).
    pub fn new(version: Version, close: bool) -> Serializer {
        Serializer::ResponseStart { version, close }
    }

    /// Write the status line. Panics if called twice; calling it out
    /// of sequence is a caller bug, not a runtime condition.
    ///
    /// # Panics
    /// 100 (Continue) is not a legal final status; also panics if the
    /// serializer isn't in `ResponseStart`.
    pub fn write_status(&mut self, buf: &mut Vec<u8>, status: &Status, is_head: bool) {
        match *self {
            Serializer::ResponseStart { version, close } => {
                assert!(status.code() != 100, "100 Continue is not a legal final status");
                if let Some(line) = precomputed_status_line(status) {
                    write!(buf, "{} ", version).unwrap();
                    buf.extend_from_slice(line.as_bytes());
                } else {
                    write!(buf, "{} {} {}\r\n", version, status.code(), status.reason()).unwrap();
                }
                let body = if status.forbids_body() {
                    Body::Denied
                } else if is_head {
                    Body::Head
                } else {
                    Body::Normal
                };
                *self = Serializer::Headers { body, close };
            }
            ref state => panic!("write_status() called on response in state {:?}", state),
        }
    }

    fn write_header_line(&mut self, buf: &mut Vec<u8>, name: &str, value: &[u8]) -> Result<(), HeaderError> {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        let value_start = buf.len();
        buf.extend_from_slice(value);
        if invalid_header(&buf[value_start..]) {
            buf.truncate(start);
            return Err(HeaderError::InvalidHeaderValue);
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    fn write_header_formatted<D: Display>(&mut self, buf: &mut Vec<u8>, name: &str, value: D) -> Result<(), HeaderError> {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        let value_start = buf.len();
        write!(buf, "{}", value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.truncate(start);
            return Err(HeaderError::InvalidHeaderValue);
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Add a regular header. `Content-Length`/`Transfer-Encoding` must
    /// go through [`Serializer::add_length`]/[`Serializer::add_chunked`].
    ///
    /// # Panics
    /// If called outside the `Headers`/`FixedHeaders`/`ChunkedHeaders`
    /// states.
    pub fn add_header(&mut self, buf: &mut Vec<u8>, name: &str, value: &str) -> Result<(), HeaderError> {
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            Serializer::Headers { .. } | Serializer::FixedHeaders { .. } | Serializer::ChunkedHeaders { .. } => {
                self.write_header_line(buf, name, value.as_bytes())
            }
            ref state => panic!("add_header() called on response in state {:?}", state),
        }
    }

    /// Same as `add_header` but formats the value directly into the
    /// buffer, useful for the cached `Date` header and numeric headers.
    pub fn format_header<D: Display>(&mut self, buf: &mut Vec<u8>, name: &str, value: D) -> Result<(), HeaderError> {
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(HeaderError::BodyLengthHeader);
        }
        match *self {
            Serializer::Headers { .. } | Serializer::FixedHeaders { .. } | Serializer::ChunkedHeaders { .. } => {
                self.write_header_formatted(buf, name, value)
            }
            ref state => panic!("format_header() called on response in state {:?}", state),
        }
    }

    /// Declare a fixed-length body and write `Content-Length: n`.
    pub fn add_length(&mut self, buf: &mut Vec<u8>, n: u64) -> Result<(), HeaderError> {
        match *self {
            Serializer::FixedHeaders { .. } => Err(HeaderError::DuplicateContentLength),
            Serializer::ChunkedHeaders { .. } => Err(HeaderError::ContentLengthAfterTransferEncoding),
            Serializer::Headers { body: Body::Denied, .. } => Err(HeaderError::RequireBodyless),
            Serializer::Headers { body, close } => {
                self.write_header_formatted(buf, "Content-Length", n)?;
                *self = Serializer::FixedHeaders { is_head: body == Body::Head, close, content_length: n };
                Ok(())
            }
            ref state => panic!("add_length() called on response in state {:?}", state),
        }
    }

    /// Declare a chunked body and write `Transfer-Encoding: chunked`.
    pub fn add_chunked(&mut self, buf: &mut Vec<u8>) -> Result<(), HeaderError> {
        match *self {
            Serializer::FixedHeaders { .. } => Err(HeaderError::TransferEncodingAfterContentLength),
            Serializer::ChunkedHeaders { .. } => Err(HeaderError::DuplicateTransferEncoding),
            Serializer::Headers { body: Body::Denied, .. } => Err(HeaderError::RequireBodyless),
            Serializer::Headers { body, close } => {
                self.write_header_line(buf, "Transfer-Encoding", b"chunked")?;
                *self = Serializer::ChunkedHeaders { is_head: body == Body::Head, close };
                Ok(())
            }
            ref state => panic!("add_chunked() called on response in state {:?}", state),
        }
    }

    /// Close the header block. Returns whether a body is expected to
    /// follow (false for 1xx/204/304 and HEAD responses).
    pub fn done_headers(&mut self, buf: &mut Vec<u8>) -> Result<bool, HeaderError> {
        if matches!(
            *self,
            Serializer::Headers { close: true, .. }
                | Serializer::FixedHeaders { close: true, .. }
                | Serializer::ChunkedHeaders { close: true, .. }
        ) {
            self.write_header_line(buf, "Connection", b"close").unwrap();
        }
        let expect_body = match *self {
            Serializer::Headers { body: Body::Denied, .. } => {
                *self = Serializer::Bodyless;
                false
            }
            Serializer::Headers { body: Body::Normal, .. } | Serializer::Headers { body: Body::Head, .. } => {
                return Err(HeaderError::CantDetermineBodySize);
            }
            Serializer::FixedHeaders { is_head, content_length, .. } => {
                *self = Serializer::FixedBody { is_head, content_length };
                !is_head
            }
            Serializer::ChunkedHeaders { is_head, .. } => {
                *self = Serializer::ChunkedBody { is_head };
                !is_head
            }
            ref state => panic!("done_headers() called on response in state {:?}", state),
        };
        buf.extend_from_slice(b"\r\n");
        Ok(expect_body)
    }

    /// Write a chunk of the body. A no-op for the chunked encoding
    /// when `data` is empty (never emits an empty chunk outside the
    /// terminator).
    pub fn write_body(&mut self, buf: &mut Vec<u8>, data: &[u8]) {
        match *self {
            Serializer::Bodyless => panic!("response must not contain a body"),
            Serializer::FixedBody { is_head, ref mut content_length } => {
                assert!(
                    data.len() as u64 <= *content_length,
                    "fixed-length body overflow: {} bytes left, got {} more",
                    content_length,
                    data.len()
                );
                if !is_head {
                    buf.extend_from_slice(data);
                }
                *content_length -= data.len() as u64;
            }
            Serializer::ChunkedBody { is_head } => {
                if !is_head && !data.is_empty() {
                    write!(buf, "{:x}\r\n", data.len()).unwrap();
                    buf.extend_from_slice(data);
                    buf.extend_from_slice(b"\r\n");
                }
            }
            ref state => panic!("write_body() called on response in state {:?}", state),
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Serializer::Done)
    }

    /// Finalize the message: writes the chunked terminator if needed.
    /// Safe to call more than once.
    ///
    /// # Panics
    /// If a fixed-length body still has bytes outstanding.
    pub fn done(&mut self, buf: &mut Vec<u8>) {
        match *self {
            Serializer::Bodyless => *self = Serializer::Done,
            Serializer::FixedBody { is_head: true, .. } | Serializer::ChunkedBody { is_head: true } => {
                *self = Serializer::Done
            }
            Serializer::FixedBody { is_head: false, content_length: 0 } => *self = Serializer::Done,
            Serializer::FixedBody { is_head: false, content_length } => {
                panic!("tried to close message with {} bytes remaining", content_length)
            }
            Serializer::ChunkedBody { is_head: false } => {
                buf.extend_from_slice(crate::chunked::ChunkedWriter::finish());
                *self = Serializer::Done;
            }
            Serializer::Done => {}
            ref state => panic!("done() called on response in state {:?}", state),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn minimal_response_http10() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http10, false);
        s.write_status(&mut buf, &Status::Ok, false);
        s.add_length(&mut buf, 0).unwrap();
        s.done_headers(&mut buf).unwrap();
        assert_eq!(&buf[..], b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    }

    #[test]
    fn close_response_adds_connection_close() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, true);
        s.write_status(&mut buf, &Status::Ok, false);
        s.add_length(&mut buf, 0).unwrap();
        s.done_headers(&mut buf).unwrap();
        assert_eq!(&buf[..], b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    }

    #[test]
    fn informational_response_rejects_length() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, false);
        s.write_status(&mut buf, &Status::from_code(142, "Foo"), false);
        assert!(s.add_length(&mut buf, 500).is_err());
        s.done_headers(&mut buf).unwrap();
        assert_eq!(&buf[..], b"HTTP/1.1 142 Foo\r\n\r\n");
    }

    #[test]
    fn head_response_computes_length_but_skips_body() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, false);
        s.write_status(&mut buf, &Status::Ok, true);
        s.add_length(&mut buf, 5).unwrap();
        let expect_body = s.done_headers(&mut buf).unwrap();
        assert!(!expect_body);
        s.write_body(&mut buf, b"Hello");
        s.done(&mut buf);
        assert_eq!(&buf[..], b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n");
    }

    #[test]
    fn chunked_body_round_trip() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, false);
        s.write_status(&mut buf, &Status::Ok, false);
        s.add_chunked(&mut buf).unwrap();
        s.done_headers(&mut buf).unwrap();
        s.write_body(&mut buf, b"Wiki");
        s.write_body(&mut buf, b"");
        s.done(&mut buf);
        assert_eq!(
            &buf[..],
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n"
        );
    }

    #[test]
    #[should_panic]
    fn double_status_panics() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, false);
        s.write_status(&mut buf, &Status::Ok, false);
        s.write_status(&mut buf, &Status::Ok, false);
    }

    #[test]
    #[should_panic]
    fn continue_is_not_a_legal_final_status() {
        let mut buf = Vec::new();
        let mut s = Serializer::new(Version::Http11, false);
        s.write_status(&mut buf, &Status::Continue, false);
    }
}
