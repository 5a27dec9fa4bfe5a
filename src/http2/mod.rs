//! HTTP/2 framer: connection preface validation, frame framing,
//! HPACK header compression and the stream multiplexer that turns
//! HEADERS/DATA exchanges into [`crate::pipeline::Pipeline`] dispatches.
//!
//! Grounded structurally in the frame-type/flag/settings/error-code
//! constants and HEADERS/CONTINUATION accumulation logic common to
//! sans-I/O HTTP/2 parsers, rewired onto this crate's own
//! [`crate::pipe::ReadPipe`]/[`crate::pipe::WritePipe`] byte pipes and
//! [`crate::pipeline::Pipeline`] dispatch instead of a buffer-accumulating
//! `process(&[u8]) -> Vec<Event>` API. HPACK (RFC 7541) static table and
//! Huffman code table contents are standard data, reproduced verbatim;
//! the dynamic table, codec and connection driver are original to this
//! crate (see [`hpack`], [`huffman`]).

pub mod frame;
pub mod hpack;
mod huffman;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::error::Error as CrateError;
use crate::headers::HeaderArrayPool;
use crate::pipe::{ReadPipe, WritePipe};
use crate::pipeline::{Context, Pipeline};
use crate::request::Request;
use crate::response::Content;

use self::frame::{error_code, flag, frame_type, settings_id};

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        /// The connection did not open with the literal 24-byte preface.
        BadPreface {
            description("missing or malformed HTTP/2 connection preface")
        }
        /// A frame declared a length over the negotiated maximum.
        FrameTooLarge(len: u32) {
            description("frame exceeds the negotiated maximum frame size")
            display("frame of {} bytes exceeds the negotiated maximum", len)
        }
        /// A structural rule (RFC 7540 §4-§6) was violated.
        ProtocolError(reason: &'static str) {
            description("HTTP/2 protocol error")
            display("HTTP/2 protocol error: {}", reason)
        }
        /// A CONTINUATION frame arrived that didn't match the stream
        /// with an open header block, or arrived with none open.
        UnexpectedContinuation {
            description("CONTINUATION frame without a matching open header block")
        }
        /// A frame referenced a stream that is not open, or is already
        /// half-closed in the direction the frame would affect.
        StreamClosed(id: u32) {
            description("frame for a closed or unknown stream")
            display("frame for closed stream {}", id)
        }
        /// A WINDOW_UPDATE increment would overflow a flow-control window.
        FlowControlViolation {
            description("flow-control window overflow")
        }
        /// An HPACK integer's prefix ran past its continuation-byte budget.
        HpackIntegerTooLarge {
            description("HPACK integer exceeded the continuation-byte budget")
        }
        /// An HPACK representation referenced an out-of-range table index.
        HpackBadIndex(index: u64) {
            description("HPACK header field index out of range")
            display("HPACK index {} out of range", index)
        }
        /// An HPACK-encoded octet string ran past the end of the block.
        HpackTruncated {
            description("HPACK header block ended mid-representation")
        }
        /// A decoded header value was not valid UTF-8.
        HpackInvalidUtf8 {
            description("HPACK string literal was not valid UTF-8")
        }
        /// A Huffman-coded string was malformed or encoded the EOS symbol.
        HuffmanDecode {
            description("invalid Huffman-coded string literal")
        }
    }
}

/// Connection-level tuning, mirroring the SETTINGS parameters RFC 7540
/// §6.5.2 defines and the defaults it assigns them.
#[derive(Debug, Clone)]
pub struct Config {
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
    pub header_table_size: u32,
    pub max_concurrent_streams: u32,
    pub max_request_body_bytes: u64,
}

impl Config {
    pub fn new() -> Config {
        Config {
            initial_window_size: 65_535,
            max_frame_size: 16_384,
            max_header_list_size: None,
            header_table_size: 4_096,
            max_concurrent_streams: 100,
            max_request_body_bytes: 64 * 1024 * 1024,
        }
    }

    pub fn initial_window_size(mut self, n: u32) -> Config {
        self.initial_window_size = n;
        self
    }

    pub fn max_frame_size(mut self, n: u32) -> Config {
        self.max_frame_size = n;
        self
    }

    pub fn max_header_list_size(mut self, n: u32) -> Config {
        self.max_header_list_size = Some(n);
        self
    }

    pub fn header_table_size(mut self, n: u32) -> Config {
        self.header_table_size = n;
        self
    }

    pub fn max_concurrent_streams(mut self, n: u32) -> Config {
        self.max_concurrent_streams = n;
        self
    }

    pub fn max_request_body_bytes(mut self, n: u64) -> Config {
        self.max_request_body_bytes = n;
        self
    }

    pub fn done(self) -> Arc<Config> {
        Arc::new(self)
    }

    fn initial_settings(&self) -> Vec<(u16, u32)> {
        let mut settings = vec![
            (settings_id::HEADER_TABLE_SIZE, self.header_table_size),
            (settings_id::INITIAL_WINDOW_SIZE, self.initial_window_size),
            (settings_id::MAX_FRAME_SIZE, self.max_frame_size),
            (settings_id::MAX_CONCURRENT_STREAMS, self.max_concurrent_streams),
        ];
        if let Some(max) = self.max_header_list_size {
            settings.push((settings_id::MAX_HEADER_LIST_SIZE, max));
        }
        settings
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

/// Per-stream accumulation state while a request is still being read.
struct StreamState {
    pseudo_method: Option<String>,
    pseudo_path: Option<String>,
    headers: crate::headers::HeaderMap,
    body: Vec<u8>,
}

impl StreamState {
    fn new(pool: &HeaderArrayPool) -> StreamState {
        StreamState {
            pseudo_method: None,
            pseudo_path: None,
            headers: crate::headers::HeaderMap::new(pool),
            body: Vec::new(),
        }
    }
}

/// A completed response still waiting on flow-control window to
/// finish sending its body as DATA frames.
struct PendingBody {
    stream_id: u32,
    body: Vec<u8>,
    sent: usize,
}

type DispatchResult = (u32, Result<crate::response::Response, CrateError>);

/// Drives one HTTP/2 connection to completion: preface, SETTINGS
/// exchange, then frame-by-frame multiplexing until either side sends
/// GOAWAY (the connection then drains in-flight streams before the
/// socket closes) or the socket closes outright.
///
/// HPACK keeps two independent dynamic tables, one per direction
/// (RFC 7541 §2.2): `decoder` compresses headers the peer sends us,
/// `encoder` compresses headers we send the peer. Both, like the
/// stream table and flow-control windows, are owned solely by this
/// loop; per-stream dispatch tasks (spawned in [`dispatch_stream`])
/// never touch them directly, only exchange a [`Request`]/[`Response`]
/// pair with it over `results_tx`/`results_rx`.
pub async fn serve<R, W>(
    mut read: ReadPipe<R>,
    mut write: WritePipe<W>,
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    header_pool: HeaderArrayPool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), CrateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let preface = read.read_exact(frame::CONNECTION_PREFACE.len()).await?;
    if preface != frame::CONNECTION_PREFACE {
        return Err(Error::BadPreface.into());
    }

    write.write_buffered(&frame::encode_settings(&config.initial_settings()));
    write.flush().await?;

    let mut decoder = hpack::Context::new(config.header_table_size as usize);
    let mut encoder = hpack::Context::new(config.header_table_size as usize);

    let mut streams: HashMap<u32, StreamState> = HashMap::new();
    let mut stream_send_windows: HashMap<u32, i64> = HashMap::new();
    let mut pending_header_block: Option<(u32, Vec<u8>, bool)> = None;
    let mut connection_send_window: i64 = config.initial_window_size as i64;
    let mut peer_max_frame_size: u32 = 16_384;
    let mut pending_bodies: Vec<PendingBody> = Vec::new();
    // Highest client-initiated stream id seen so far (RFC 7540 §5.1.1):
    // a HEADERS frame opening a new stream must carry an odd id strictly
    // greater than this, or the connection is torn down.
    let mut last_client_stream_id: u32 = 0;
    // Set once either side has sent GOAWAY: new HEADERS are refused but
    // streams already dispatched (tracked in `in_flight`) are allowed to
    // finish before the loop returns.
    let mut going_away = false;
    let mut in_flight: std::collections::HashSet<u32> = std::collections::HashSet::new();

    let (results_tx, mut results_rx) = mpsc::unbounded_channel::<DispatchResult>();

    if *shutdown.borrow() {
        going_away = true;
        write.write_buffered(&frame::encode_goaway(last_client_stream_id, error_code::NO_ERROR));
        write.flush().await?;
    }

    'conn: loop {
        tokio::select! {
            changed = shutdown.changed(), if !going_away => {
                if changed.is_ok() && *shutdown.borrow() {
                    going_away = true;
                    write.write_buffered(&frame::encode_goaway(last_client_stream_id, error_code::NO_ERROR));
                    write.flush().await?;
                }
            }
            frame = frame::read_frame(&mut read, config.max_frame_size) => {
                let raw = frame?;
                match raw.header.frame_type {
                    frame_type::SETTINGS => {
                        if raw.header.has_flag(flag::ACK) {
                            continue;
                        }
                        if raw.payload.len() % 6 != 0 {
                            return Err(Error::ProtocolError("SETTINGS payload not a multiple of 6").into());
                        }
                        for chunk in raw.payload.chunks(6) {
                            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                            if id == settings_id::MAX_FRAME_SIZE {
                                peer_max_frame_size = value.clamp(16_384, 16_777_215);
                            }
                            if id == settings_id::INITIAL_WINDOW_SIZE {
                                let delta = value as i64 - config.initial_window_size as i64;
                                for window in stream_send_windows.values_mut() {
                                    *window += delta;
                                }
                            }
                        }
                        write.write_buffered(&frame::encode_settings_ack());
                        write.flush().await?;
                    }
                    frame_type::WINDOW_UPDATE => {
                        if raw.payload.len() != 4 {
                            return Err(Error::ProtocolError("WINDOW_UPDATE payload must be 4 bytes").into());
                        }
                        let increment = u32::from_be_bytes([raw.payload[0], raw.payload[1], raw.payload[2], raw.payload[3]]) & 0x7fff_ffff;
                        if raw.header.stream_id == 0 {
                            connection_send_window = connection_send_window
                                .checked_add(increment as i64)
                                .ok_or(Error::FlowControlViolation)?;
                        } else if let Some(window) = stream_send_windows.get_mut(&raw.header.stream_id) {
                            *window = window.checked_add(increment as i64).ok_or(Error::FlowControlViolation)?;
                        }
                    }
                    frame_type::PING => {
                        if raw.payload.len() != 8 {
                            return Err(Error::ProtocolError("PING payload must be 8 bytes").into());
                        }
                        if !raw.header.has_flag(flag::ACK) {
                            let mut data = [0u8; 8];
                            data.copy_from_slice(&raw.payload);
                            write.write_buffered(&frame::encode_ping(data, true));
                            write.flush().await?;
                        }
                    }
                    frame_type::GOAWAY => {
                        // The peer is going away: stop accepting new streams but
                        // let anything already dispatched finish (checked below,
                        // after the `select!`), instead of tearing the connection
                        // down mid-flight.
                        going_away = true;
                    }
                    frame_type::RST_STREAM => {
                        streams.remove(&raw.header.stream_id);
                        stream_send_windows.remove(&raw.header.stream_id);
                        pending_bodies.retain(|p| p.stream_id != raw.header.stream_id);
                        in_flight.remove(&raw.header.stream_id);
                    }
                    frame_type::PRIORITY => {}
                    frame_type::PUSH_PROMISE => {
                        return Err(Error::ProtocolError("server does not accept PUSH_PROMISE").into());
                    }
                    frame_type::HEADERS => {
                        let block = frame::split_headers_payload(&raw.header, raw.payload)?;
                        let end_stream = raw.header.has_flag(flag::END_STREAM);
                        let stream_id = raw.header.stream_id;
                        if !streams.contains_key(&stream_id) {
                            if going_away {
                                // Past the GOAWAY point: refuse the new stream
                                // rather than processing it, but stay in the loop
                                // for whatever is still in flight.
                                write.write_buffered(&frame::encode_rst_stream(stream_id, error_code::REFUSED_STREAM));
                                write.flush().await?;
                                continue 'conn;
                            }
                            if stream_id % 2 == 0 || stream_id <= last_client_stream_id {
                                return Err(Error::ProtocolError(
                                    "client-initiated stream id must be odd and strictly increasing",
                                )
                                .into());
                            }
                            last_client_stream_id = stream_id;
                        }
                        stream_send_windows.entry(stream_id).or_insert(config.initial_window_size as i64);
                        if raw.header.has_flag(flag::END_HEADERS) {
                            finish_header_block(
                                &mut decoder, &mut streams, &header_pool,
                                stream_id, block, end_stream,
                                pipeline.clone(), results_tx.clone(), &mut in_flight,
                            )?;
                        } else {
                            pending_header_block = Some((stream_id, block, end_stream));
                        }
                    }
                    frame_type::CONTINUATION => {
                        let (stream_id, mut block, end_stream) = pending_header_block
                            .take()
                            .ok_or(Error::UnexpectedContinuation)?;
                        if stream_id != raw.header.stream_id {
                            return Err(Error::UnexpectedContinuation.into());
                        }
                        block.extend_from_slice(&raw.payload);
                        if raw.header.has_flag(flag::END_HEADERS) {
                            finish_header_block(
                                &mut decoder, &mut streams, &header_pool,
                                stream_id, block, end_stream,
                                pipeline.clone(), results_tx.clone(), &mut in_flight,
                            )?;
                        } else {
                            pending_header_block = Some((stream_id, block, end_stream));
                        }
                    }
                    frame_type::DATA => {
                        let stream_id = raw.header.stream_id;
                        let end_stream = raw.header.has_flag(flag::END_STREAM);
                        let payload = frame::strip_padding(&raw.header, raw.payload)?;
                        if !payload.is_empty() {
                            write.write_buffered(&frame::encode_window_update(0, payload.len() as u32));
                            write.write_buffered(&frame::encode_window_update(stream_id, payload.len() as u32));
                            write.flush().await?;
                        }
                        let stream = streams.get_mut(&stream_id).ok_or(Error::StreamClosed(stream_id))?;
                        stream.body.extend_from_slice(&payload);
                        if stream.body.len() as u64 > config.max_request_body_bytes {
                            return Err(CrateError::PayloadTooLarge);
                        }
                        if end_stream {
                            dispatch_stream(stream_id, &mut streams, pipeline.clone(), results_tx.clone(), &mut in_flight)?;
                        }
                    }
                    _ => {
                        // Unknown frame type: ignore per RFC 7540 §4.1.
                    }
                }
            }
            Some((stream_id, result)) = results_rx.recv() => {
                in_flight.remove(&stream_id);
                match result {
                    Ok(mut response) => {
                        let (status, headers, content, content_type, content_encoding) = response.commit();
                        let mut fields = vec![hpack::Field::new(":status", status.code().to_string())];
                        for (name, value) in headers.iter() {
                            fields.push(hpack::Field::new(name, value));
                        }
                        if let Some(ct) = content_type {
                            fields.push(hpack::Field::new("content-type", ct));
                        }
                        if let Some(ce) = content_encoding {
                            fields.push(hpack::Field::new("content-encoding", ce));
                        }
                        let body = match content {
                            Content::Fixed(bytes) => bytes,
                            Content::Empty => Vec::new(),
                            Content::Streamed(mut producer) => {
                                let mut collected = Vec::new();
                                while let Some(chunk) = producer() {
                                    collected.extend(chunk);
                                }
                                collected
                            }
                        };
                        if !body.is_empty() {
                            fields.push(hpack::Field::new("content-length", body.len().to_string()));
                        }
                        let block = encoder.encode(&fields);
                        let end_stream = body.is_empty();
                        write.write_buffered(&frame::encode_header_block(stream_id, &block, end_stream, peer_max_frame_size));
                        write.flush().await?;
                        if body.is_empty() {
                            stream_send_windows.remove(&stream_id);
                        } else {
                            pending_bodies.push(PendingBody { stream_id, body, sent: 0 });
                        }
                    }
                    Err(_) => {
                        write.write_buffered(&frame::encode_rst_stream(stream_id, error_code::INTERNAL_ERROR));
                        write.flush().await?;
                        stream_send_windows.remove(&stream_id);
                    }
                }
            }
        }

        if !pending_bodies.is_empty() {
            flush_pending_bodies(&mut write, &mut pending_bodies, &mut connection_send_window, &mut stream_send_windows, peer_max_frame_size).await?;
        }

        // Either side's GOAWAY has already stopped new streams from being
        // accepted above; once every dispatched stream has produced a
        // result and had its body fully flushed, the connection can close.
        if going_away && streams.is_empty() && in_flight.is_empty() && pending_bodies.is_empty() {
            write.flush().await?;
            return Ok(());
        }
    }
}

/// Send as many DATA frames as current flow-control windows allow.
/// A body that doesn't fully fit resumes on the next loop iteration,
/// once a WINDOW_UPDATE (handled above) has replenished its window.
async fn flush_pending_bodies<W: AsyncWrite + Unpin>(
    write: &mut WritePipe<W>,
    pending_bodies: &mut Vec<PendingBody>,
    connection_send_window: &mut i64,
    stream_send_windows: &mut HashMap<u32, i64>,
    peer_max_frame_size: u32,
) -> Result<(), CrateError> {
    let mut finished = Vec::new();
    let mut wrote_anything = false;
    for (idx, pending) in pending_bodies.iter_mut().enumerate() {
        let remaining = pending.body.len() - pending.sent;
        if remaining == 0 {
            finished.push(idx);
            continue;
        }
        let stream_window = stream_send_windows.get(&pending.stream_id).copied().unwrap_or(0);
        let allowed = (*connection_send_window).max(0).min(stream_window.max(0)) as usize;
        let allowed = allowed.min(peer_max_frame_size as usize).min(remaining);
        if allowed == 0 {
            continue;
        }
        let chunk = &pending.body[pending.sent..pending.sent + allowed];
        let is_last = pending.sent + allowed == pending.body.len();
        write.write_buffered(&crate::http2::frame::encode_data(pending.stream_id, chunk, is_last, peer_max_frame_size));
        wrote_anything = true;
        *connection_send_window -= allowed as i64;
        if let Some(window) = stream_send_windows.get_mut(&pending.stream_id) {
            *window -= allowed as i64;
        }
        pending.sent += allowed;
        if is_last {
            finished.push(idx);
            stream_send_windows.remove(&pending.stream_id);
        }
    }
    if wrote_anything {
        write.flush().await?;
    }
    for idx in finished.into_iter().rev() {
        pending_bodies.remove(idx);
    }
    Ok(())
}

fn finish_header_block(
    decoder: &mut hpack::Context,
    streams: &mut HashMap<u32, StreamState>,
    header_pool: &HeaderArrayPool,
    stream_id: u32,
    block: Vec<u8>,
    end_stream: bool,
    pipeline: Arc<Pipeline>,
    results_tx: mpsc::UnboundedSender<DispatchResult>,
    in_flight: &mut std::collections::HashSet<u32>,
) -> Result<(), CrateError> {
    let fields = decoder.decode(&block)?;
    let stream = streams.entry(stream_id).or_insert_with(|| StreamState::new(header_pool));
    for field in fields {
        match field.name.as_str() {
            ":method" => stream.pseudo_method = Some(field.value),
            ":path" => stream.pseudo_path = Some(field.value),
            ":scheme" | ":authority" => {} // not needed for routing here
            _ => {
                let _ = stream.headers.set(&field.name, &field.value);
            }
        }
    }
    if end_stream {
        dispatch_stream(stream_id, streams, pipeline, results_tx, in_flight)?;
    }
    Ok(())
}

fn dispatch_stream(
    stream_id: u32,
    streams: &mut HashMap<u32, StreamState>,
    pipeline: Arc<Pipeline>,
    results_tx: mpsc::UnboundedSender<DispatchResult>,
    in_flight: &mut std::collections::HashSet<u32>,
) -> Result<(), CrateError> {
    let stream = streams.remove(&stream_id).ok_or(Error::StreamClosed(stream_id))?;
    let method = stream
        .pseudo_method
        .as_deref()
        .ok_or(Error::ProtocolError(":method pseudo-header missing"))?;
    let path = stream
        .pseudo_path
        .as_deref()
        .ok_or(Error::ProtocolError(":path pseudo-header missing"))?;
    let (route, query_string) = match path.split_once('?') {
        Some((route, query)) => (route.to_string(), query.to_string()),
        None => (path.to_string(), String::new()),
    };
    let method = crate::enums::Method::from_wire(method);
    let pool = stream.headers.pool_handle();
    let request = Request::new(
        method,
        route,
        query_string,
        stream.headers,
        stream.body,
        stream_id,
        crate::enums::Version::Http2,
    );
    let scope: Arc<dyn std::any::Any + Send + Sync> = Arc::new(());
    let ctx = Context::new(request, Vec::new(), pool, scope);
    in_flight.insert(stream_id);
    tokio::spawn(async move {
        let result = pipeline.dispatch(ctx).await;
        let _ = results_tx.send((stream_id, result));
    });
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::enums::Status;
    use crate::pipeline::{Endpoint, EndpointRegistry};
    use crate::response::Response;
    use crate::router::RouteTable;
    use async_trait::async_trait;
    use std::io::Cursor;
    use tokio::io::duplex;

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, ctx: &mut Context) -> Result<crate::response::Response, CrateError> {
            let mut resp = Response::new(Status::Ok, &ctx.header_pool);
            resp.set_content(Content::Fixed(b"pong".to_vec()));
            Ok(resp)
        }
    }

    fn echo_pipeline() -> Arc<Pipeline> {
        let mut routes = RouteTable::new();
        let key = routes.register("GET", "/ping");
        let mut endpoints = EndpointRegistry::new();
        endpoints.insert(key, Arc::new(Echo));
        Arc::new(Pipeline::new(routes, endpoints))
    }

    /// A shutdown receiver that never fires, for tests that don't exercise
    /// the graceful-GOAWAY shutdown path.
    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn rejects_missing_preface() {
        let pool = crate::pool::BufPool::new();
        let read = ReadPipe::new(Cursor::new(b"not a preface".to_vec()));
        let write = WritePipe::new(Vec::new(), pool, 4096);
        let err = serve(read, write, Config::new().done(), echo_pipeline(), HeaderArrayPool::new(), no_shutdown())
            .await
            .unwrap_err();
        assert!(matches!(err, CrateError::Http2(Error::BadPreface)));
    }

    #[tokio::test]
    async fn rejects_non_increasing_client_stream_id() {
        let (client, server) = duplex(8192);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let buf_pool = crate::pool::BufPool::new();
        let header_pool = HeaderArrayPool::new();
        let read = ReadPipe::new(server_read);
        let write = WritePipe::new(server_write, buf_pool, 4096);

        let server_task = tokio::spawn(serve(read, write, Config::new().done(), echo_pipeline(), header_pool, no_shutdown()));

        use tokio::io::AsyncWriteExt;
        client_write.write_all(frame::CONNECTION_PREFACE).await.unwrap();

        let mut encoder = hpack::Context::new(4096);
        let fields = [hpack::Field::new(":method", "GET"), hpack::Field::new(":path", "/ping")];
        let block = encoder.encode(&fields);
        // Open stream 3 first, then try stream 1: not strictly increasing.
        client_write
            .write_all(&frame::encode_header_block(3, &block, true, 16384))
            .await
            .unwrap();
        client_write
            .write_all(&frame::encode_header_block(1, &block, true, 16384))
            .await
            .unwrap();
        client_write.flush().await.unwrap();

        let err = server_task.await.unwrap().unwrap_err();
        assert!(matches!(err, CrateError::Http2(Error::ProtocolError(_))));
    }

    #[tokio::test]
    async fn full_request_response_round_trip() {
        let (client, server) = duplex(8192);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let buf_pool = crate::pool::BufPool::new();
        let header_pool = HeaderArrayPool::new();
        let read = ReadPipe::new(server_read);
        let write = WritePipe::new(server_write, buf_pool, 4096);

        let server_task = tokio::spawn(serve(read, write, Config::new().done(), echo_pipeline(), header_pool, no_shutdown()));

        use tokio::io::AsyncWriteExt;
        client_write.write_all(frame::CONNECTION_PREFACE).await.unwrap();

        let mut encoder = hpack::Context::new(4096);
        let block = encoder.encode(&[
            hpack::Field::new(":method", "GET"),
            hpack::Field::new(":path", "/ping"),
        ]);
        client_write
            .write_all(&frame::encode_header_block(1, &block, true, 16384))
            .await
            .unwrap();
        client_write.flush().await.unwrap();

        let mut client_read = ReadPipe::new(client_read);
        // First frame off the wire is the server's own SETTINGS.
        let settings = frame::read_frame(&mut client_read, 16384).await.unwrap();
        assert_eq!(settings.header.frame_type, frame_type::SETTINGS);

        let response_headers = frame::read_frame(&mut client_read, 16384).await.unwrap();
        assert_eq!(response_headers.header.frame_type, frame_type::HEADERS);
        assert_eq!(response_headers.header.stream_id, 1);

        let mut decoder = hpack::Context::new(4096);
        let fields = decoder.decode(&response_headers.payload).unwrap();
        assert!(fields.iter().any(|f| f.name == ":status" && f.value == "200"));

        let data = frame::read_frame(&mut client_read, 16384).await.unwrap();
        assert_eq!(data.header.frame_type, frame_type::DATA);
        assert_eq!(data.payload, b"pong");

        server_task.abort();
    }

    #[tokio::test]
    async fn inbound_goaway_drains_in_flight_stream_before_closing() {
        let (client, server) = duplex(8192);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let buf_pool = crate::pool::BufPool::new();
        let header_pool = HeaderArrayPool::new();
        let read = ReadPipe::new(server_read);
        let write = WritePipe::new(server_write, buf_pool, 4096);

        let server_task = tokio::spawn(serve(read, write, Config::new().done(), echo_pipeline(), header_pool, no_shutdown()));

        use tokio::io::AsyncWriteExt;
        client_write.write_all(frame::CONNECTION_PREFACE).await.unwrap();

        let mut encoder = hpack::Context::new(4096);
        let fields = [hpack::Field::new(":method", "GET"), hpack::Field::new(":path", "/ping")];
        // Stream 1 is dispatched before the peer announces it's going away,
        // so it must still be allowed to finish.
        client_write
            .write_all(&frame::encode_header_block(1, &encoder.encode(&fields), true, 16384))
            .await
            .unwrap();
        client_write.write_all(&frame::encode_goaway(0, error_code::NO_ERROR)).await.unwrap();
        // Stream 3 arrives after GOAWAY: it must be refused, not dispatched.
        client_write
            .write_all(&frame::encode_header_block(3, &encoder.encode(&fields), true, 16384))
            .await
            .unwrap();
        client_write.flush().await.unwrap();

        let mut client_read = ReadPipe::new(client_read);
        let mut seen = Vec::new();
        while let Ok(f) = frame::read_frame(&mut client_read, 16384).await {
            seen.push((f.header.frame_type, f.header.stream_id));
        }

        assert!(seen.contains(&(frame_type::HEADERS, 1)), "stream 1 response missing: {seen:?}");
        assert!(seen.contains(&(frame_type::DATA, 1)), "stream 1 body missing: {seen:?}");
        assert!(seen.contains(&(frame_type::RST_STREAM, 3)), "stream 3 should have been refused: {seen:?}");

        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_initiated_shutdown_sends_goaway_and_closes() {
        let (client, server) = duplex(8192);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let buf_pool = crate::pool::BufPool::new();
        let header_pool = HeaderArrayPool::new();
        let read = ReadPipe::new(server_read);
        let write = WritePipe::new(server_write, buf_pool, 4096);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(serve(read, write, Config::new().done(), echo_pipeline(), header_pool, shutdown_rx));

        use tokio::io::AsyncWriteExt;
        client_write.write_all(frame::CONNECTION_PREFACE).await.unwrap();
        client_write.flush().await.unwrap();

        let mut client_read = ReadPipe::new(client_read);
        let settings = frame::read_frame(&mut client_read, 16384).await.unwrap();
        assert_eq!(settings.header.frame_type, frame_type::SETTINGS);

        shutdown_tx.send(true).unwrap();

        let goaway = frame::read_frame(&mut client_read, 16384).await.unwrap();
        assert_eq!(goaway.header.frame_type, frame_type::GOAWAY);

        server_task.await.unwrap().unwrap();
    }
}
