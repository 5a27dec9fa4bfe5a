//! Connection driver: binds a listener, accepts connections under a
//! backpressure guard, mediates TLS, and dispatches each connection to
//! the HTTP/1.1 loop, the HTTP/2 framer, or a WebSocket upgrade.
//!
//! The accept loop uses a `socket2`-built listener and a
//! `tokio::sync::watch::channel(false)` broadcast for shutdown; the
//! plaintext/TLS stream split follows the common `Plain`/`Tls` enum
//! pattern for wrapping either stream behind one `AsyncRead +
//! AsyncWrite` type.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskCx, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::date::DateCache;
use crate::enums::{HttpStatus, Status, Version};
use crate::error::Error as CrateError;
use crate::headers::HeaderArrayPool;
use crate::http1;
use crate::http2;
use crate::pipe::{ReadPipe, WritePipe};
use crate::pipeline::{Context, Pipeline};
use crate::pool::BufPool;
use crate::request::Request;
use crate::response::{Content, Response};
use crate::serializer::{HeaderError, Serializer};
use crate::websocket;

#[cfg(feature = "tls")]
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// Buffer sizing knobs for every connection this driver accepts.
#[derive(Debug, Clone, Copy)]
pub struct BufferSizes {
    pub pipe_read: usize,
    pub header_batch: usize,
}

impl Default for BufferSizes {
    fn default() -> BufferSizes {
        BufferSizes {
            pipe_read: 64 * 1024,
            header_batch: 4 * 1024,
        }
    }
}

/// Which client certificates, if any, a TLS listener demands.
/// `Optional` (accept but don't require a client cert) is left out:
/// nothing downstream of the handshake consumes the peer identity, so
/// the crate only needs the two policies that change whether the
/// handshake can succeed at all.
#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub enum ClientCertPolicy {
    None,
    Required(std::path::PathBuf),
}

/// A loaded TLS server identity plus ALPN protocol list, wrapped in a
/// `tokio_rustls::TlsAcceptor` ready to mediate accepted sockets.
#[cfg(feature = "tls")]
pub struct TlsConfig {
    acceptor: tokio_rustls::TlsAcceptor,
}

#[cfg(feature = "tls")]
impl TlsConfig {
    /// Build a TLS server identity from a PEM certificate chain and
    /// private key, negotiating `alpn` (in preference order) during
    /// the handshake.
    pub fn new(
        cert_path: &std::path::Path,
        key_path: &std::path::Path,
        client_cert_policy: ClientCertPolicy,
        alpn: &[&str],
    ) -> io::Result<TlsConfig> {
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        let builder = rustls::ServerConfig::builder();
        let mut server_config = match client_cert_policy {
            ClientCertPolicy::None => builder
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(tls_err)?,
            ClientCertPolicy::Required(trust_store) => {
                let roots = load_root_store(&trust_store)?;
                let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                builder
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)
                    .map_err(tls_err)?
            }
        };
        server_config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
        Ok(TlsConfig {
            acceptor: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }
}

#[cfg(feature = "tls")]
fn tls_err(e: rustls::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(feature = "tls")]
fn load_certs(path: &std::path::Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()
}

#[cfg(feature = "tls")]
fn load_key(path: &std::path::Path) -> io::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no private key found in file"))
}

#[cfg(feature = "tls")]
fn load_root_store(path: &std::path::Path) -> io::Result<rustls::RootCertStore> {
    let mut store = rustls::RootCertStore::empty();
    for cert in load_certs(path)? {
        store
            .add(cert)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    }
    Ok(store)
}

/// Server-level configuration, built the same `new()...done()` way as
/// [`http1::Config`] and [`http2::Config`].
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backlog: u32,
    pub max_connections: Option<usize>,
    pub grace_period: Option<Duration>,
    pub buffer_sizes: BufferSizes,
    #[cfg(feature = "tls")]
    pub tls: Option<Arc<TlsConfig>>,
    pub http1: http1::Config,
}

impl Config {
    pub fn new() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().expect("valid default socket address"),
            backlog: 1024,
            max_connections: None,
            grace_period: None,
            buffer_sizes: BufferSizes::default(),
            #[cfg(feature = "tls")]
            tls: None,
            http1: http1::Config::new(),
        }
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Config {
        self.bind_address = addr;
        self
    }

    pub fn backlog(mut self, n: u32) -> Config {
        self.backlog = n;
        self
    }

    /// Cap the number of simultaneously open connections. The accept
    /// loop stops pulling new connections off the listener's backlog
    /// once this many are live.
    pub fn max_connections(mut self, n: usize) -> Config {
        self.max_connections = Some(n);
        self
    }

    /// How long to let in-flight connections finish after a shutdown
    /// signal before aborting them outright. `None` aborts immediately.
    pub fn grace_period(mut self, dur: Duration) -> Config {
        self.grace_period = Some(dur);
        self
    }

    pub fn buffer_sizes(mut self, sizes: BufferSizes) -> Config {
        self.buffer_sizes = sizes;
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls(mut self, tls: TlsConfig) -> Config {
        self.tls = Some(Arc::new(tls));
        self
    }

    pub fn http1_config(mut self, cfg: http1::Config) -> Config {
        self.http1 = cfg;
        self
    }

    pub fn done(self) -> Arc<Config> {
        Arc::new(self)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// Accepts a WebSocket upgrade for a given request, or declines it so
/// the request falls through to the ordinary pipeline dispatch. A
/// distinct trait from [`crate::pipeline::Endpoint`] because the
/// upgrade decision happens before route resolution and hands back a
/// stream-writing dispatcher rather than a one-shot response.
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    async fn accept(&self, request: &Request) -> Option<Box<dyn websocket::Dispatcher>>;
}

struct Shared {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    http2_config: Arc<http2::Config>,
    websocket_config: Arc<websocket::Config>,
    websocket_handler: Option<Arc<dyn WebSocketHandler>>,
    scope: Arc<dyn std::any::Any + Send + Sync>,
    header_pool: HeaderArrayPool,
    buf_pool: BufPool,
    date_cache: DateCache,
    server_header: String,
}

/// A single accepted socket, plaintext or TLS-mediated, presented to
/// the rest of the crate as one `AsyncRead + AsyncWrite` type.
enum Conn {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl Conn {
    fn negotiated_protocol(&self) -> Option<String> {
        match self {
            Conn::Plain(_) => None,
            #[cfg(feature = "tls")]
            Conn::Tls(stream) => stream
                .get_ref()
                .1
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
        }
    }
}

impl AsyncRead for Conn {
    fn poll_read(self: Pin<&mut Self>, cx: &mut TaskCx<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(self: Pin<&mut Self>, cx: &mut TaskCx<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskCx<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> io::Result<tokio::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    tokio::net::TcpListener::from_std(socket.into())
}

fn configure_keepalive(stream: &TcpStream) -> io::Result<()> {
    socket2::SockRef::from(stream).set_keepalive(true)
}

/// Run the accept loop until `shutdown` carries `true`. Each accepted
/// socket is mediated, protocol-dispatched, and driven to completion on
/// its own task; the loop itself only ever touches the listener, the
/// connection-count semaphore, and the shutdown signal.
pub async fn serve(
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    http2_config: Arc<http2::Config>,
    websocket_config: Arc<websocket::Config>,
    websocket_handler: Option<Arc<dyn WebSocketHandler>>,
    scope: Arc<dyn std::any::Any + Send + Sync>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let listener = bind_listener(config.bind_address, config.backlog)?;
    info!("weft listening on {}", config.bind_address);

    let shared = Arc::new(Shared {
        config: config.clone(),
        pipeline,
        http2_config,
        websocket_config,
        websocket_handler,
        scope,
        header_pool: HeaderArrayPool::new(),
        buf_pool: BufPool::new(),
        date_cache: DateCache::new(),
        server_header: format!("weft/{}", env!("CARGO_PKG_VERSION")),
    });

    let active = Arc::new(Semaphore::new(
        config.max_connections.unwrap_or(Semaphore::MAX_PERMITS),
    ));
    let mut tasks = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = tokio::select! {
            _ = shutdown.changed() => continue,
            permit = active.clone().acquire_owned() => permit.expect("connection semaphore is never closed"),
        };
        if *shutdown.borrow() {
            drop(permit);
            break;
        }

        let accepted = tokio::select! {
            _ = shutdown.changed() => { drop(permit); continue; }
            accepted = listener.accept() => accepted,
        };
        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept() failed: {}", e);
                continue;
            }
        };
        stream.set_nodelay(true).ok();
        if let Err(e) = configure_keepalive(&stream) {
            trace!("failed to enable SO_KEEPALIVE for {}: {}", peer_addr, e);
        }

        let shared = shared.clone();
        let conn_shutdown = shutdown.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match handle_connection(stream, peer_addr, shared, conn_shutdown).await {
                Ok(()) => debug!("connection {} closed", peer_addr),
                Err(e) => debug!("connection {} closed with error: {}", peer_addr, e),
            }
        });
    }

    info!("shutdown signal received, draining in-flight connections");
    match config.grace_period {
        Some(grace) => {
            let drain = async { while tasks.join_next().await.is_some() {} };
            if tokio::time::timeout(grace, drain).await.is_err() {
                warn!("grace period elapsed with {} connection(s) still active; aborting", tasks.len());
                tasks.abort_all();
            }
        }
        None => tasks.abort_all(),
    }
    while tasks.join_next().await.is_some() {}
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), CrateError> {
    #[cfg(feature = "tls")]
    let conn = match &shared.config.tls {
        Some(tls) => match tls.acceptor.accept(stream).into_fallible().await {
            Ok(tls_stream) => Conn::Tls(Box::new(tls_stream)),
            Err((e, mut raw_stream)) => {
                // into_fallible() hands the raw socket back on handshake
                // failure, so a plaintext diagnostic is still possible
                // even though nothing past this point understands TLS.
                use tokio::io::AsyncWriteExt;
                let _ = raw_stream.write_all(b"TLS Handshake failed. Closing connection.").await;
                warn!("TLS handshake failed for {}: {}", peer_addr, e);
                return Err(CrateError::TlsFailure(e.to_string()));
            }
        },
        None => Conn::Plain(stream),
    };
    #[cfg(not(feature = "tls"))]
    let conn = Conn::Plain(stream);

    let protocol = conn.negotiated_protocol();
    debug!("connection from {} negotiated protocol {:?}", peer_addr, protocol);

    let (read_half, write_half) = tokio::io::split(conn);
    let read = ReadPipe::with_capacity(read_half, shared.config.buffer_sizes.pipe_read);
    let write = WritePipe::new(write_half, shared.buf_pool.clone(), shared.config.buffer_sizes.header_batch);

    match protocol.as_deref() {
        Some("h2") => {
            http2::serve(
                read,
                write,
                shared.http2_config.clone(),
                shared.pipeline.clone(),
                shared.header_pool.clone(),
                shutdown,
            )
            .await
        }
        _ => run_http1(read, write, shared).await,
    }
}

fn header_err(name: &str, _err: HeaderError) -> CrateError {
    CrateError::HeaderInjection(name.to_string())
}

fn error_response(status: Status, header_pool: &HeaderArrayPool, body: &str) -> Response {
    let mut resp = Response::new(status, header_pool);
    if !body.is_empty() {
        resp.set_content_type("text/plain; charset=utf-8");
        resp.set_content(Content::Fixed(body.as_bytes().to_vec()));
    }
    resp
}

/// Commit a response and write it to the wire: populates the `Server`
/// and `Date` headers, batches the header block through a pooled
/// scratch buffer when it's small, and falls back to an unbuffered
/// write for anything larger.
async fn write_response<W>(
    write: &mut WritePipe<W>,
    shared: &Shared,
    version: Version,
    close: bool,
    is_head: bool,
    mut response: Response,
) -> Result<(), CrateError>
where
    W: AsyncWrite + Unpin,
{
    let (status, headers, content, content_type, content_encoding) = response.commit();
    let mut serializer = Serializer::new(version, close);

    let mut scratch = shared.buf_pool.lease(shared.config.buffer_sizes.header_batch);
    let expect_body = {
        let head = scratch.as_mut_vec();
        serializer.write_status(head, &status, is_head);
        serializer
            .format_header(head, "Server", &shared.server_header)
            .map_err(|e| header_err("Server", e))?;
        serializer
            .format_header(head, "Date", shared.date_cache.get())
            .map_err(|e| header_err("Date", e))?;
        if let Some(ct) = &content_type {
            serializer
                .add_header(head, "Content-Type", ct)
                .map_err(|e| header_err("Content-Type", e))?;
        }
        if let Some(ce) = &content_encoding {
            serializer
                .add_header(head, "Content-Encoding", ce)
                .map_err(|e| header_err("Content-Encoding", e))?;
        }
        for (name, value) in headers.iter() {
            serializer.add_header(head, name, value).map_err(|e| header_err(name, e))?;
        }
        match content.known_length() {
            Some(n) => serializer
                .add_length(head, n as u64)
                .map_err(|e| header_err("Content-Length", e))?,
            None => serializer
                .add_chunked(head)
                .map_err(|e| header_err("Transfer-Encoding", e))?,
        }
        let expect_body = serializer
            .done_headers(head)
            .map_err(|e| header_err("<headers>", e))?;

        if head.len() <= shared.config.buffer_sizes.header_batch {
            write.write_buffered(head);
        } else {
            write.write_all_direct(head).await.map_err(CrateError::Io)?;
        }
        expect_body
    };
    drop(scratch);

    if expect_body {
        match content {
            Content::Fixed(bytes) => {
                let mut body_buf = Vec::with_capacity(bytes.len() + 16);
                serializer.write_body(&mut body_buf, &bytes);
                if !body_buf.is_empty() {
                    write.write_all_direct(&body_buf).await.map_err(CrateError::Io)?;
                }
            }
            Content::Streamed(mut producer) => {
                while let Some(chunk) = producer() {
                    let mut body_buf = Vec::with_capacity(chunk.len() + 16);
                    serializer.write_body(&mut body_buf, &chunk);
                    if !body_buf.is_empty() {
                        write.write_all_direct(&body_buf).await.map_err(CrateError::Io)?;
                    }
                }
            }
            Content::Empty => {}
        }
    }

    let mut tail = Vec::new();
    serializer.done(&mut tail);
    if !tail.is_empty() {
        write.write_all_direct(&tail).await.map_err(CrateError::Io)?;
    }
    write.flush().await?;
    Ok(())
}

async fn send_error_and_close<W>(
    write: &mut WritePipe<W>,
    shared: &Shared,
    version: Version,
    status: Status,
) -> Result<(), CrateError>
where
    W: AsyncWrite + Unpin,
{
    let body = status.reason().to_string();
    let response = error_response(status, &shared.header_pool, &body);
    write_response(write, shared, version, true, false, response).await
}

async fn upgrade_to_websocket<R, W>(
    read: ReadPipe<R>,
    mut write: WritePipe<W>,
    shared: Arc<Shared>,
    request: &Request,
    dispatcher: Box<dyn websocket::Dispatcher>,
) -> Result<(), CrateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let handshake = websocket::negotiate(request.headers(), &[])?;
    write.write_buffered(b"HTTP/1.1 101 Switching Protocols\r\n");
    write.write_buffered(b"Upgrade: websocket\r\n");
    write.write_buffered(b"Connection: Upgrade\r\n");
    write.write_buffered(format!("Sec-WebSocket-Accept: {}\r\n", handshake.accept).as_bytes());
    if let Some(protocol) = &handshake.protocol {
        write.write_buffered(format!("Sec-WebSocket-Protocol: {}\r\n", protocol).as_bytes());
    }
    write.write_buffered(b"\r\n");
    write.flush().await?;
    websocket::serve(read, write, shared.websocket_config.clone(), dispatcher).await
}

/// Drive one HTTP/1.1 connection: read a request, resolve either a
/// WebSocket upgrade or a pipeline dispatch, write the response, and
/// loop while the connection is meant to stay open.
async fn run_http1<R, W>(mut read: ReadPipe<R>, mut write: WritePipe<W>, shared: Arc<Shared>) -> Result<(), CrateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        let header_pool = shared.header_pool.clone();
        let parsed = match http1::read_request(&mut read, &mut write, header_pool, &shared.config.http1).await {
            Ok(parsed) => parsed,
            Err(CrateError::UnexpectedEnd) => {
                trace!("peer closed connection between requests");
                return Ok(());
            }
            Err(e @ CrateError::Http1(http1::Error::BadRequestLine))
            | Err(e @ CrateError::Http1(http1::Error::UnsupportedVersion)) => {
                debug!("fatal HTTP/1.1 framing error: {}", e);
                return Err(e);
            }
            Err(CrateError::HeadersTooLarge) => {
                send_error_and_close(&mut write, &shared, Version::Http11, Status::HeadersTooLarge).await?;
                return Ok(());
            }
            Err(CrateError::PayloadTooLarge) => {
                send_error_and_close(&mut write, &shared, Version::Http11, Status::PayloadTooLarge).await?;
                return Ok(());
            }
            Err(e) => {
                debug!("bad request: {}", e);
                send_error_and_close(&mut write, &shared, Version::Http11, Status::BadRequest).await?;
                return Ok(());
            }
        };

        if parsed
            .upgrade
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false)
        {
            if let Some(handler) = shared.websocket_handler.clone() {
                if let Some(dispatcher) = handler.accept(&parsed.request).await {
                    return upgrade_to_websocket(read, write, shared, &parsed.request, dispatcher).await;
                }
            }
        }

        let version = parsed.request.version();
        let is_head = parsed.request.method().is_head();
        let keep_alive = parsed.keep_alive;

        let ctx = Context::new(parsed.request, Vec::new(), shared.header_pool.clone(), shared.scope.clone());
        let pipeline = shared.pipeline.clone();
        let dispatched = tokio::spawn(async move { pipeline.dispatch(ctx).await }).await;

        let response = match dispatched {
            Ok(Ok(response)) => response,
            Ok(Err(CrateError::NotFound)) => error_response(Status::NotFound, &shared.header_pool, "Not Found"),
            Ok(Err(CrateError::BadRequest(reason))) => {
                debug!("endpoint reported a bad request: {}", reason);
                error_response(Status::BadRequest, &shared.header_pool, "Bad Request")
            }
            Ok(Err(CrateError::HeadersTooLarge)) => {
                error_response(Status::HeadersTooLarge, &shared.header_pool, "Request Header Fields Too Large")
            }
            Ok(Err(CrateError::PayloadTooLarge)) => {
                error_response(Status::PayloadTooLarge, &shared.header_pool, "Payload Too Large")
            }
            Ok(Err(e)) => {
                warn!("endpoint failed: {}", e);
                error_response(Status::InternalServerError, &shared.header_pool, "Internal Server Error")
            }
            Err(join_err) => {
                error!("endpoint panicked: {}", join_err);
                error_response(Status::InternalServerError, &shared.header_pool, "Internal Server Error")
            }
        };

        let close = !keep_alive;
        write_response(&mut write, &shared, version, close, is_head, response).await?;
        if close {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_binds_ephemeral_loopback_port() {
        let config = Config::new();
        assert_eq!(config.bind_address.ip().to_string(), "127.0.0.1");
        assert_eq!(config.bind_address.port(), 0);
        assert!(config.max_connections.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let config = Config::new()
            .backlog(16)
            .max_connections(100)
            .grace_period(Duration::from_secs(5));
        assert_eq!(config.backlog, 16);
        assert_eq!(config.max_connections, Some(100));
        assert_eq!(config.grace_period, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn write_response_emits_server_and_date_headers() {
        let pipeline = Pipeline::new(crate::router::RouteTable::new(), crate::pipeline::EndpointRegistry::new());
        let shared = Shared {
            config: Config::new().done(),
            pipeline: Arc::new(pipeline),
            http2_config: http2::Config::new().done(),
            websocket_config: websocket::Config::new().done(),
            websocket_handler: None,
            scope: Arc::new(()),
            header_pool: HeaderArrayPool::new(),
            buf_pool: BufPool::new(),
            date_cache: DateCache::new(),
            server_header: "weft/test".to_string(),
        };
        let response = error_response(Status::Ok, &shared.header_pool, "");
        let mut write = WritePipe::new(Vec::new(), shared.buf_pool.clone(), 4096);
        write_response(&mut write, &shared, Version::Http11, true, false, response)
            .await
            .unwrap();
        let out = write.into_inner();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Server: weft/test\r\n"));
        assert!(text.contains("Date: "));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn full_connection_round_trip_over_a_duplex_stream() {
        let mut routes = crate::router::RouteTable::new();
        let key = routes.register("GET", "/hello");

        struct Hello;
        #[async_trait]
        impl crate::pipeline::Endpoint for Hello {
            async fn call(&self, ctx: &mut Context) -> Result<Response, CrateError> {
                let mut resp = Response::new(Status::Ok, &ctx.header_pool);
                resp.set_content_type("text/plain");
                resp.set_content(Content::Fixed(b"hi".to_vec()));
                Ok(resp)
            }
        }

        let mut endpoints = crate::pipeline::EndpointRegistry::new();
        endpoints.insert(key, Arc::new(Hello));
        let pipeline = Arc::new(Pipeline::new(routes, endpoints));

        let shared = Arc::new(Shared {
            config: Config::new().done(),
            pipeline,
            http2_config: http2::Config::new().done(),
            websocket_config: websocket::Config::new().done(),
            websocket_handler: None,
            scope: Arc::new(()),
            header_pool: HeaderArrayPool::new(),
            buf_pool: BufPool::new(),
            date_cache: DateCache::new(),
            server_header: "weft/test".to_string(),
        });

        let (client, server) = tokio::io::duplex(8192);
        let (server_read, server_write) = tokio::io::split(server);
        let read = ReadPipe::new(server_read);
        let write = WritePipe::new(server_write, shared.buf_pool.clone(), 4096);

        let server_task = tokio::spawn(run_http1(read, write, shared));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(
            &mut client_write,
            b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client_read, &mut out).await.unwrap();
        server_task.await.unwrap().unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }
}
