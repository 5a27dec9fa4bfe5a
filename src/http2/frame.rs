//! HTTP/2 frame header and wire format (RFC 7540 §4, §6).
//!
//! Frame type, flag, SETTINGS identifier and error code constants are
//! mandated by the RFC; parsing sits directly on [`crate::pipe::ReadPipe`]
//! the same way [`crate::http1`] parses a request line, rather than the
//! buffer-accumulating sans-I/O style some standalone HTTP/2 parsers use.

use tokio::io::AsyncRead;

use super::Error;
use crate::pipe::ReadPipe;

pub const FRAME_HEADER_LEN: usize = 9;
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flag {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

pub mod settings_id {
    pub const HEADER_TABLE_SIZE: u16 = 0x1;
    pub const ENABLE_PUSH: u16 = 0x2;
    pub const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub const INITIAL_WINDOW_SIZE: u16 = 0x4;
    pub const MAX_FRAME_SIZE: u16 = 0x5;
    pub const MAX_HEADER_LIST_SIZE: u16 = 0x6;
}

pub mod error_code {
    pub const NO_ERROR: u32 = 0x0;
    pub const PROTOCOL_ERROR: u32 = 0x1;
    pub const INTERNAL_ERROR: u32 = 0x2;
    pub const FLOW_CONTROL_ERROR: u32 = 0x3;
    pub const SETTINGS_TIMEOUT: u32 = 0x4;
    pub const STREAM_CLOSED: u32 = 0x5;
    pub const FRAME_SIZE_ERROR: u32 = 0x6;
    pub const REFUSED_STREAM: u32 = 0x7;
    pub const CANCEL: u32 = 0x8;
    pub const COMPRESSION_ERROR: u32 = 0x9;
    pub const CONNECT_ERROR: u32 = 0xa;
    pub const ENHANCE_YOUR_CALM: u32 = 0xb;
    pub const INADEQUATE_SECURITY: u32 = 0xc;
    pub const HTTP_1_1_REQUIRED: u32 = 0xd;
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> FrameHeader {
        debug_assert_eq!(bytes.len(), FRAME_HEADER_LEN);
        let length = (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32;
        let stream_id = (bytes[5] as u32) << 24
            | (bytes[6] as u32) << 16
            | (bytes[7] as u32) << 8
            | bytes[8] as u32;
        FrameHeader {
            length,
            frame_type: bytes[3],
            flags: bytes[4],
            stream_id: stream_id & 0x7fff_ffff,
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.push((self.length >> 16) as u8);
        out.push((self.length >> 8) as u8);
        out.push(self.length as u8);
        out.push(self.frame_type);
        out.push(self.flags);
        out.extend_from_slice(&(self.stream_id & 0x7fff_ffff).to_be_bytes());
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A frame header plus its raw payload, before any per-type
/// interpretation (padding stripped, HPACK decoded, etc).
pub struct RawFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

pub async fn read_frame<S: AsyncRead + Unpin>(
    pipe: &mut ReadPipe<S>,
    max_frame_size: u32,
) -> Result<RawFrame, Error> {
    let raw_header = pipe.read_exact(FRAME_HEADER_LEN).await?;
    let header = FrameHeader::parse(&raw_header);
    if header.length > max_frame_size {
        return Err(Error::FrameTooLarge(header.length));
    }
    let payload = pipe.read_exact(header.length as usize).await?;
    Ok(RawFrame { header, payload })
}

/// Strip the PADDED flag's leading pad-length byte and trailing
/// padding from a DATA or HEADERS payload, per RFC 7540 §6.1/§6.2.
pub fn strip_padding(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Vec<u8>, Error> {
    if !header.has_flag(flag::PADDED) {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(Error::ProtocolError("PADDED frame with empty payload"));
    }
    let pad_len = payload[0] as usize;
    if pad_len >= payload.len() {
        return Err(Error::ProtocolError("padding length exceeds frame payload"));
    }
    payload.remove(0);
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}

/// A HEADERS frame's payload after padding and priority fields (if
/// present) have been stripped, leaving only the HPACK block.
pub fn split_headers_payload(header: &FrameHeader, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
    let mut payload = strip_padding(header, payload)?;
    if header.has_flag(flag::PRIORITY) {
        if payload.len() < 5 {
            return Err(Error::ProtocolError("HEADERS PRIORITY fields truncated"));
        }
        payload.drain(..5);
    }
    Ok(payload)
}

pub fn encode_settings(settings: &[(u16, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: (settings.len() * 6) as u32,
        frame_type: frame_type::SETTINGS,
        flags: 0,
        stream_id: 0,
    }
    .write(&mut out);
    for &(id, value) in settings {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&value.to_be_bytes());
    }
    out
}

pub fn encode_settings_ack() -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: 0,
        frame_type: frame_type::SETTINGS,
        flags: flag::ACK,
        stream_id: 0,
    }
    .write(&mut out);
    out
}

pub fn encode_ping(data: [u8; 8], ack: bool) -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: 8,
        frame_type: frame_type::PING,
        flags: if ack { flag::ACK } else { 0 },
        stream_id: 0,
    }
    .write(&mut out);
    out.extend_from_slice(&data);
    out
}

pub fn encode_window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: 4,
        frame_type: frame_type::WINDOW_UPDATE,
        flags: 0,
        stream_id,
    }
    .write(&mut out);
    out.extend_from_slice(&(increment & 0x7fff_ffff).to_be_bytes());
    out
}

pub fn encode_rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: 4,
        frame_type: frame_type::RST_STREAM,
        flags: 0,
        stream_id,
    }
    .write(&mut out);
    out.extend_from_slice(&error_code.to_be_bytes());
    out
}

pub fn encode_goaway(last_stream_id: u32, error_code: u32) -> Vec<u8> {
    let mut out = Vec::new();
    FrameHeader {
        length: 8,
        frame_type: frame_type::GOAWAY,
        flags: 0,
        stream_id: 0,
    }
    .write(&mut out);
    out.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
    out.extend_from_slice(&error_code.to_be_bytes());
    out
}

/// Split an HPACK-encoded header block into a HEADERS frame followed
/// by as many CONTINUATION frames as needed to stay under
/// `max_frame_size`, per RFC 7540 §6.2/§6.10.
pub fn encode_header_block(stream_id: u32, block: &[u8], end_stream: bool, max_frame_size: u32) -> Vec<u8> {
    let max = max_frame_size as usize;
    let mut out = Vec::new();
    let mut chunks = block.chunks(max.max(1));
    let first = chunks.next().unwrap_or(&[]);
    let only_frame = block.len() <= max;
    let mut flags = 0;
    if end_stream {
        flags |= flag::END_STREAM;
    }
    if only_frame {
        flags |= flag::END_HEADERS;
    }
    FrameHeader {
        length: first.len() as u32,
        frame_type: frame_type::HEADERS,
        flags,
        stream_id,
    }
    .write(&mut out);
    out.extend_from_slice(first);
    let remaining: Vec<&[u8]> = chunks.collect();
    for (i, chunk) in remaining.iter().enumerate() {
        let is_last = i + 1 == remaining.len();
        FrameHeader {
            length: chunk.len() as u32,
            frame_type: frame_type::CONTINUATION,
            flags: if is_last { flag::END_HEADERS } else { 0 },
            stream_id,
        }
        .write(&mut out);
        out.extend_from_slice(chunk);
    }
    out
}

/// Split a body into one or more `max_frame_size`-bounded DATA
/// frames, the last one carrying END_STREAM if `end_stream` is set.
pub fn encode_data(stream_id: u32, body: &[u8], end_stream: bool, max_frame_size: u32) -> Vec<u8> {
    let max = (max_frame_size as usize).max(1);
    let mut out = Vec::new();
    if body.is_empty() {
        FrameHeader {
            length: 0,
            frame_type: frame_type::DATA,
            flags: if end_stream { flag::END_STREAM } else { 0 },
            stream_id,
        }
        .write(&mut out);
        return out;
    }
    let chunks: Vec<&[u8]> = body.chunks(max).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let is_last = i + 1 == chunks.len();
        FrameHeader {
            length: chunk.len() as u32,
            frame_type: frame_type::DATA,
            flags: if is_last && end_stream { flag::END_STREAM } else { 0 },
            stream_id,
        }
        .write(&mut out);
        out.extend_from_slice(chunk);
    }
    out
}
