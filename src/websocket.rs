//! WebSocket codec: RFC 6455 handshake, frame encode/decode, and a
//! cooperative ping/pong/inactivity loop.
//!
//! [`Accept`]'s hand-rolled base64 `Display` impl avoids pulling in a
//! whole base64 crate for one 28-byte digest. The ping/inactivity loop
//! tracks three deadlines (last message, last ping, last byte),
//! expressed as a single `tokio::time::timeout` around the next frame
//! read instead of a hand-rolled timer recomputed every poll.
//!
//! Fragmented frames are rejected outright rather than reassembled.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error as CrateError;
use crate::headers::HeaderMap;
use crate::pipe::{ReadPipe, WritePipe};

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Timeout {
            description("timed out waiting for a frame")
        }
        InvalidUtf8 {
            description("text frame is not valid UTF-8")
        }
        InvalidOpcode(code: u8) {
            description("frame opcode is invalid")
            display("frame opcode is invalid: {:#x}", code)
        }
        Unmasked {
            description("received an unmasked frame from a client")
        }
        Fragmented {
            description("received a fragmented frame, which is not supported")
        }
        TooLong {
            description("frame exceeds the configured maximum packet size")
        }
        MissingKey {
            description("Sec-WebSocket-Key is missing")
        }
        MissingVersion {
            description("Sec-WebSocket-Version is missing")
        }
        UnsupportedVersion {
            description("Sec-WebSocket-Version is not 13")
        }
    }
}

/// WebSocket GUID constant, RFC 6455 §1.3.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The computed `Sec-WebSocket-Accept` header value.
pub struct Accept([u8; 20]);

impl Accept {
    /// Build the accept token from the raw (still base64-encoded, as it
    /// appears on the wire) `Sec-WebSocket-Key` value. No validation of
    /// the key is performed, matching RFC 6455's own "the server
    /// doesn't need to base64-decode the key" allowance.
    pub fn from_key(key: &str) -> Accept {
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        hasher.update(GUID.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest);
        Accept(out)
    }
}

impl fmt::Display for Accept {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                                abcdefghijklmnopqrstuvwxyz\
                                0123456789+/";
        let mut buf = [0u8; 28];
        for i in 0..6 {
            let n = ((self.0[i * 3] as usize) << 16)
                | ((self.0[i * 3 + 1] as usize) << 8)
                | (self.0[i * 3 + 2] as usize);
            buf[i * 4] = CHARS[(n >> 18) & 63];
            buf[i * 4 + 1] = CHARS[(n >> 12) & 63];
            buf[i * 4 + 2] = CHARS[(n >> 6) & 63];
            buf[i * 4 + 3] = CHARS[n & 63];
        }
        let n = ((self.0[18] as usize) << 16) | ((self.0[19] as usize) << 8);
        buf[24] = CHARS[(n >> 18) & 63];
        buf[25] = CHARS[(n >> 12) & 63];
        buf[26] = CHARS[(n >> 6) & 63];
        buf[27] = b'=';
        f.write_str(std::str::from_utf8(&buf).expect("base64 alphabet is ASCII"))
    }
}

/// The outcome of validating a client's upgrade request: protocol
/// negotiation and extension reflection.
pub struct Handshake {
    pub accept: String,
    pub protocol: Option<String>,
    pub extensions: Vec<String>,
}

/// Validate the upgrade request's websocket headers and compute the
/// handshake response. `supported_protocols` is the server's ordered
/// preference list; the first one the client also offered wins.
pub fn negotiate(headers: &HeaderMap, supported_protocols: &[&str]) -> Result<Handshake, Error> {
    let version = headers.get("sec-websocket-version").ok_or(Error::MissingVersion)?;
    if version.trim() != "13" {
        return Err(Error::UnsupportedVersion);
    }
    let key = headers.get("sec-websocket-key").ok_or(Error::MissingKey)?;
    let accept = Accept::from_key(key).to_string();

    let protocol = headers.get("sec-websocket-protocol").and_then(|offered| {
        offered
            .split(',')
            .map(|s| s.trim())
            .find(|p| supported_protocols.iter().any(|sp| sp.eq_ignore_ascii_case(p)))
            .map(|s| s.to_string())
    });

    let extensions = headers
        .get("sec-websocket-extensions")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    Ok(Handshake { accept, protocol, extensions })
}

/// A decoded websocket message. Control frames (ping/pong/close) and
/// data frames (text/binary) share one type since both travel the same
/// wire framing.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16, String),
}

fn is_control_opcode(opcode: u8) -> bool {
    opcode & 0x08 != 0
}

/// Read and unmask the next complete frame off `pipe`. Server-side
/// only: every client frame is expected to be masked, per RFC 6455
/// §5.1 ("a server MUST close the connection upon receiving a frame
/// that is not masked").
pub async fn read_message<S>(pipe: &mut ReadPipe<S>, max_packet_size: usize) -> Result<Message, CrateError>
where
    S: AsyncRead + Unpin,
{
    let head = pipe.read_exact(2).await?;
    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    if !masked {
        return Err(Error::Unmasked.into());
    }
    if !fin {
        return Err(Error::Fragmented.into());
    }

    let len: u64 = match head[1] & 0x7F {
        126 => {
            let ext = pipe.read_exact(2).await?;
            u16::from_be_bytes([ext[0], ext[1]]) as u64
        }
        127 => {
            let ext = pipe.read_exact(8).await?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&ext);
            u64::from_be_bytes(bytes)
        }
        n => n as u64,
    };
    if is_control_opcode(opcode) && len > 125 {
        return Err(Error::TooLong.into());
    }
    if len > max_packet_size as u64 {
        return Err(Error::TooLong.into());
    }

    let mask = pipe.read_exact(4).await?;
    let mut data = pipe.read_exact(len as usize).await?;
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    match opcode {
        0x1 => String::from_utf8(data).map(Message::Text).map_err(|_| Error::InvalidUtf8.into()),
        0x2 => Ok(Message::Binary(data)),
        0x9 => Ok(Message::Ping(data)),
        0xA => Ok(Message::Pong(data)),
        0x8 if data.len() < 2 => Ok(Message::Close(1005, String::new())),
        0x8 => {
            let code = u16::from_be_bytes([data[0], data[1]]);
            let reason = String::from_utf8(data[2..].to_vec()).map_err(|_| Error::InvalidUtf8)?;
            Ok(Message::Close(code, reason))
        }
        other => Err(Error::InvalidOpcode(other).into()),
    }
}

/// Encode one unmasked server-to-client frame. Server frames must not
/// be masked.
pub fn encode_frame(opcode: u8, data: &[u8]) -> Vec<u8> {
    debug_assert!(opcode & 0xF0 == 0);
    let mut out = Vec::with_capacity(data.len() + 10);
    out.push(0x80 | opcode);
    match data.len() {
        len @ 0..=125 => out.push(len as u8),
        len @ 126..=65535 => {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    out.extend_from_slice(data);
    out
}

pub fn encode_text(text: &str) -> Vec<u8> {
    encode_frame(0x1, text.as_bytes())
}

pub fn encode_binary(data: &[u8]) -> Vec<u8> {
    encode_frame(0x2, data)
}

pub fn encode_ping(data: &[u8]) -> Vec<u8> {
    encode_frame(0x9, data)
}

pub fn encode_pong(data: &[u8]) -> Vec<u8> {
    encode_frame(0xA, data)
}

pub fn encode_close(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    encode_frame(0x8, &payload)
}

/// Tuning knobs for the cooperative ping/pong/inactivity loop.
#[derive(Debug, Clone)]
pub struct Config {
    pub ping_interval: Duration,
    pub inactivity_timeout: Duration,
    pub max_packet_size: usize,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn ping_interval(mut self, dur: Duration) -> Config {
        self.ping_interval = dur;
        self
    }

    pub fn inactivity_timeout(mut self, dur: Duration) -> Config {
        self.inactivity_timeout = dur;
        self
    }

    pub fn max_packet_size(mut self, size: usize) -> Config {
        self.max_packet_size = size;
        self
    }

    pub fn done(self) -> Arc<Config> {
        Arc::new(self)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            ping_interval: Duration::from_secs(10),
            inactivity_timeout: Duration::from_secs(30),
            max_packet_size: 10 << 20,
        }
    }
}

/// Receives data frames dispatched off an active websocket loop. Pings,
/// pongs, and the close handshake are handled by [`serve`] itself and
/// never reach this trait.
#[async_trait]
pub trait Dispatcher: Send {
    async fn on_message(&mut self, message: Message) -> Result<(), CrateError>;
}

#[async_trait]
impl Dispatcher for Box<dyn Dispatcher> {
    async fn on_message(&mut self, message: Message) -> Result<(), CrateError> {
        (**self).on_message(message).await
    }
}

/// Drive one established websocket connection until the peer closes it,
/// the inactivity timeout fires, or a frame fails to parse.
///
/// Ping cadence and the inactivity deadline are both measured from the
/// last frame actually received: a `tokio::time::timeout` bounds each
/// read by whichever is sooner, and a bare timeout (no frame arrived)
/// sends a ping and loops again rather than failing outright.
pub async fn serve<R, W, D>(
    mut read: ReadPipe<R>,
    mut write: WritePipe<W>,
    config: Arc<Config>,
    mut dispatcher: D,
) -> Result<(), CrateError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    D: Dispatcher,
{
    let mut last_received = tokio::time::Instant::now();
    loop {
        let elapsed = last_received.elapsed();
        if elapsed >= config.inactivity_timeout {
            write.write_buffered(&encode_close(1000, ""));
            write.flush().await?;
            return Ok(());
        }
        let wait = config.ping_interval.min(config.inactivity_timeout - elapsed);
        match tokio::time::timeout(wait, read_message(&mut read, config.max_packet_size)).await {
            Ok(Ok(Message::Ping(data))) => {
                last_received = tokio::time::Instant::now();
                write.write_buffered(&encode_pong(&data));
                write.flush().await?;
            }
            Ok(Ok(Message::Pong(_))) => {
                last_received = tokio::time::Instant::now();
            }
            Ok(Ok(Message::Close(code, reason))) => {
                write.write_buffered(&encode_close(code, &reason));
                write.flush().await?;
                return Ok(());
            }
            Ok(Ok(message)) => {
                last_received = tokio::time::Instant::now();
                dispatcher.on_message(message).await?;
            }
            Ok(Err(err)) => return Err(err),
            Err(_timed_out) => {
                write.write_buffered(&encode_ping(b"weft-ping"));
                write.flush().await?;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::headers::HeaderArrayPool;
    use std::io::Cursor;

    #[test]
    fn accept_matches_rfc6455_example() {
        let accept = Accept::from_key("dGhlIHNhbXBsZSBub25jZQ==").to_string();
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn negotiate_rejects_wrong_version() {
        let pool = HeaderArrayPool::new();
        let mut headers = HeaderMap::new(&pool);
        headers.insert("sec-websocket-version", "8").unwrap();
        headers.insert("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        let err = negotiate(&headers, &[]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion));
    }

    #[test]
    fn negotiate_picks_first_supported_protocol() {
        let pool = HeaderArrayPool::new();
        let mut headers = HeaderMap::new(&pool);
        headers.insert("sec-websocket-version", "13").unwrap();
        headers.insert("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        headers.insert("sec-websocket-protocol", "soap, chat").unwrap();
        headers.insert("sec-websocket-extensions", "permessage-deflate").unwrap();
        let handshake = negotiate(&headers, &["chat"]).unwrap();
        assert_eq!(handshake.accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(handshake.protocol.as_deref(), Some("chat"));
        assert_eq!(handshake.extensions, vec!["permessage-deflate".to_string()]);
    }

    #[tokio::test]
    async fn decodes_masked_text_frame() {
        let wire: &[u8] = &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let mut pipe = ReadPipe::new(Cursor::new(wire.to_vec()));
        let message = read_message(&mut pipe, 1 << 20).await.unwrap();
        assert_eq!(message, Message::Text("Hello".to_string()));
    }

    #[tokio::test]
    async fn unmasked_frame_is_rejected() {
        let wire: &[u8] = &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        let mut pipe = ReadPipe::new(Cursor::new(wire.to_vec()));
        let err = read_message(&mut pipe, 1 << 20).await.unwrap_err();
        assert!(matches!(err, CrateError::WebSocket(Error::Unmasked)));
    }

    #[tokio::test]
    async fn fragmented_frame_is_rejected() {
        let wire: &[u8] = &[0x01, 0x85, 0, 0, 0, 0, b'H', b'e', b'l', b'l', b'o'];
        let mut pipe = ReadPipe::new(Cursor::new(wire.to_vec()));
        let err = read_message(&mut pipe, 1 << 20).await.unwrap_err();
        assert!(matches!(err, CrateError::WebSocket(Error::Fragmented)));
    }

    #[test]
    fn encode_round_trips_small_text_frame() {
        let frame = encode_text("Hi");
        assert_eq!(frame, vec![0x81, 0x02, b'H', b'i']);
    }

    #[test]
    fn encode_close_carries_code_and_reason() {
        let frame = encode_close(1000, "bye");
        assert_eq!(frame, vec![0x88, 0x05, 0x03, 0xe8, b'b', b'y', b'e']);
    }
}
