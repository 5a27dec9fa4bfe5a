//! HTTP/1.1 parser: turns a connection's byte pipe into a
//! [`crate::request::Request`], honoring the HTTP/1.0 default-to-close
//! rule and the `Expect: 100-continue` handshake.
//!
//! The request-line and header-block grammar is read directly off
//! [`crate::pipe::ReadPipe`] line-at-a-time rather than handed to
//! `httparse::parse_headers` against a pre-filled buffer; `httparse`
//! stays in the dependency tree purely for
//! [`crate::chunked::Decoder`]'s chunk-size line.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::chunked::Decoder as ChunkedDecoder;
use crate::enums::{Method, Version};
use crate::error::Error as CrateError;
use crate::headers::{HeaderArrayPool, HeaderMap};
use crate::pipe::{ReadPipe, WritePipe};
use crate::request::Request;
use crate::{is_chunked, is_continue};

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        BadRequestLine {
            description("malformed HTTP request line")
        }
        BadHeaderLine {
            description("malformed header line")
        }
        InvalidContentLength {
            description("Content-Length is not a valid non-negative integer")
        }
        ConflictingBodyLength {
            description("both Content-Length and Transfer-Encoding present")
        }
        UnsupportedVersion {
            description("unsupported HTTP version")
        }
    }
}

/// Per-connection HTTP/1.1 limits.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub max_headers: usize,
    pub max_body_bytes: u64,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn max_headers(mut self, n: usize) -> Config {
        self.max_headers = n;
        self
    }

    pub fn max_body_bytes(mut self, n: u64) -> Config {
        self.max_body_bytes = n;
        self
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_headers: 128,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// The outcome of parsing one request off the wire: the request itself
/// plus the connection-disposition facts only the parser is positioned
/// to know (the caller still decides what to do with them).
pub struct ParsedRequest {
    pub request: Request,
    pub keep_alive: bool,
    pub upgrade: Option<String>,
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, String, Version), Error> {
    let line = std::str::from_utf8(line).map_err(|_| Error::BadRequestLine)?;
    let mut parts = line.splitn(3, ' ');
    let method = parts.next().filter(|s| !s.is_empty()).ok_or(Error::BadRequestLine)?;
    let target = parts.next().filter(|s| !s.is_empty()).ok_or(Error::BadRequestLine)?;
    let version = parts.next().ok_or(Error::BadRequestLine)?;
    if parts.next().is_some() || !target.starts_with('/') {
        return Err(Error::BadRequestLine);
    }
    let version = match version.trim_end() {
        "HTTP/1.0" => Version::Http10,
        "HTTP/1.1" => Version::Http11,
        _ => return Err(Error::UnsupportedVersion),
    };
    if !Method::HTTP1_VERBS.contains(&method) {
        return Err(Error::BadRequestLine);
    }
    let (route, query) = match target.find('?') {
        Some(idx) => (&target[..idx], &target[idx + 1..]),
        None => (target, ""),
    };
    Ok((Method::from_wire(method), route.to_string(), query.to_string(), version))
}

fn connection_tokens(val: &str) -> impl Iterator<Item = &str> {
    val.split(',').map(|s| s.trim())
}

fn has_close_token(val: &str) -> bool {
    connection_tokens(val).any(|t| t.eq_ignore_ascii_case("close"))
}

fn has_keep_alive_token(val: &str) -> bool {
    connection_tokens(val).any(|t| t.eq_ignore_ascii_case("keep-alive"))
}

async fn read_header_block<S>(
    pipe: &mut ReadPipe<S>,
    pool: &HeaderArrayPool,
    max_headers: usize,
) -> Result<HeaderMap, CrateError>
where
    S: AsyncRead + Unpin,
{
    let mut headers = HeaderMap::new(pool);
    loop {
        let line = pipe.read_until(b"\r\n").await?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= max_headers {
            return Err(CrateError::HeadersTooLarge);
        }
        let line = std::str::from_utf8(&line).map_err(|_| Error::BadHeaderLine)?;
        let colon = line.find(':').ok_or(Error::BadHeaderLine)?;
        let name = line[..colon].trim();
        let value = line[colon + 1..].trim();
        if name.is_empty() {
            return Err(Error::BadHeaderLine.into());
        }
        // A field repeated across several lines folds into the first
        // one, comma-joined, the way single-valued HTTP/1.1 fields are
        // combined in practice (RFC 7230 §3.2.2).
        if let Some(existing) = headers.get(name).map(str::to_string) {
            let joined = format!("{}, {}", existing, value);
            headers.set(name, &joined).map_err(|()| CrateError::HeadersTooLarge)?;
        } else {
            headers.set(name, value).map_err(|()| CrateError::HeadersTooLarge)?;
        }
    }
    Ok(headers)
}

async fn read_body<S>(
    pipe: &mut ReadPipe<S>,
    headers: &HeaderMap,
    max_body: u64,
) -> Result<Vec<u8>, CrateError>
where
    S: AsyncRead + Unpin,
{
    let transfer_encoding = headers.get("transfer-encoding");
    let content_length = headers.get("content-length");

    if transfer_encoding.is_some() && content_length.is_some() {
        return Err(Error::ConflictingBodyLength.into());
    }

    if let Some(te) = transfer_encoding {
        if !is_chunked(te.as_bytes()) {
            return Err(Error::BadHeaderLine.into());
        }
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        while let Some(chunk) = decoder.next_chunk(pipe).await? {
            if body.len() as u64 + chunk.len() as u64 > max_body {
                return Err(CrateError::PayloadTooLarge);
            }
            body.extend_from_slice(&chunk);
        }
        return Ok(body);
    }

    if let Some(len) = content_length {
        let len: u64 = len.trim().parse().map_err(|_| Error::InvalidContentLength)?;
        if len > max_body {
            return Err(CrateError::PayloadTooLarge);
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        return Ok(pipe.read_exact(len as usize).await?);
    }

    Ok(Vec::new())
}

/// Read one complete request off `read`, answering an `Expect:
/// 100-continue` on `write` before the body is pulled if the client
/// asked for one.
pub async fn read_request<R, W>(
    read: &mut ReadPipe<R>,
    write: &mut WritePipe<W>,
    header_pool: HeaderArrayPool,
    config: &Config,
) -> Result<ParsedRequest, CrateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = read.read_until(b"\r\n").await?;
    let (method, route, query_string, version) = parse_request_line(&line)?;

    let headers = read_header_block(read, &header_pool, config.max_headers).await?;

    if headers.get("expect").map(|v| is_continue(v.as_bytes())).unwrap_or(false) {
        write.write_buffered(b"HTTP/1.1 100 Continue\r\n\r\n");
        write.flush().await?;
    }

    let body = read_body(read, &headers, config.max_body_bytes).await?;

    let keep_alive = match headers.get("connection") {
        Some(val) if has_close_token(val) => false,
        Some(val) if has_keep_alive_token(val) => true,
        _ => !version.defaults_to_close(),
    };

    let upgrade = headers.get("upgrade").map(str::to_string);

    let request = Request::new(method, route, query_string, headers, body, 0, version);

    Ok(ParsedRequest { request, keep_alive, upgrade })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn pool() -> HeaderArrayPool {
        HeaderArrayPool::new()
    }

    #[test]
    fn parses_simple_get() {
        let (method, route, query, version) = parse_request_line(b"GET /foo?a=1 HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(route, "/foo");
        assert_eq!(query, "a=1");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn rejects_missing_slash() {
        assert!(parse_request_line(b"GET foo HTTP/1.1").is_err());
    }

    #[test]
    fn rejects_method_outside_the_literal_grammar() {
        let err = parse_request_line(b"CONNECT / HTTP/1.1").unwrap_err();
        assert!(matches!(err, Error::BadRequestLine));
    }

    #[test]
    fn rejects_garbage_version() {
        let err = parse_request_line(b"GET / TTMP/2.0").unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion));
    }

    #[tokio::test]
    async fn reads_http10_request_defaulting_to_close() {
        let wire = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert!(!parsed.keep_alive);
        assert_eq!(parsed.request.version(), Version::Http10);
    }

    #[tokio::test]
    async fn http10_explicit_keep_alive_is_honored() {
        let wire = b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert!(parsed.keep_alive);
    }

    #[tokio::test]
    async fn http11_close_header_overrides_default() {
        let wire = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert!(!parsed.keep_alive);
    }

    #[tokio::test]
    async fn reads_fixed_length_body() {
        let wire = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert_eq!(parsed.request.body(), b"hello");
    }

    #[tokio::test]
    async fn reads_chunked_body() {
        let wire = b"POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert_eq!(parsed.request.body(), b"Wiki");
    }

    #[tokio::test]
    async fn conflicting_length_and_encoding_is_rejected() {
        let wire =
            b"POST /x HTTP/1.1\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n0\r\n\r\n"
                .to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let err = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap_err();
        assert!(matches!(err, CrateError::Http1(Error::ConflictingBodyLength)));
    }

    #[tokio::test]
    async fn sends_100_continue_before_body() {
        let wire = b"POST /x HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert_eq!(parsed.request.body(), b"hi");
        write.flush().await.unwrap();
        assert_eq!(write.into_inner(), b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn upgrade_header_is_surfaced() {
        let wire = b"GET /ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n".to_vec();
        let mut read = ReadPipe::new(Cursor::new(wire));
        let mut write = WritePipe::new(Vec::new(), crate::pool::BufPool::new(), 1024);
        let parsed = read_request(&mut read, &mut write, pool(), &Config::default()).await.unwrap();
        assert_eq!(parsed.upgrade.as_deref(), Some("websocket"));
    }
}
