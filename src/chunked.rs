//! Chunked transfer-coding: a decode state machine for inbound bodies
//! and a thin writer for outbound ones.
//!
//! The decode half tracks `buffered`/`pending`/`done` against a
//! growing buffer, using `httparse::parse_chunk_size` for the
//! per-chunk size line, scanning against [`crate::pipe::ReadPipe`]
//! instead of mutating a buffer in place.

use httparse::Status as ChunkStatus;

use crate::error::Error;
use crate::pipe::ReadPipe;

/// Decoder state for an inbound chunked body. Tracks how many bytes of
/// the current chunk are still pending and whether the terminating
/// zero-length chunk has been seen.
#[derive(Debug, Clone)]
pub struct Decoder {
    pending: usize,
    done: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            pending: 0,
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Read and return the next slice of decoded chunk body bytes, or
    /// `None` once the terminating chunk has been consumed. Reads the
    /// chunk-size line and any trailing `\r\n` directly off `pipe`.
    pub async fn next_chunk<S>(&mut self, pipe: &mut ReadPipe<S>) -> Result<Option<Vec<u8>>, Error>
    where
        S: tokio::io::AsyncRead + Unpin,
    {
        if self.done {
            return Ok(None);
        }
        if self.pending == 0 {
            let size = self.read_chunk_size(pipe).await?;
            if size == 0 {
                // Trailer section: zero or more header lines, then the
                // empty line. This crate doesn't expose trailers, so
                // discard them.
                loop {
                    let line = pipe.read_until(b"\r\n").await?;
                    if line.is_empty() {
                        break;
                    }
                }
                self.done = true;
                return Ok(None);
            }
            self.pending = size;
        }
        let data = pipe.read_exact(self.pending).await?;
        pipe.read_exact(2).await?; // trailing CRLF after chunk data
        self.pending = 0;
        Ok(Some(data))
    }

    async fn read_chunk_size<S>(&self, pipe: &mut ReadPipe<S>) -> Result<usize, Error>
    where
        S: tokio::io::AsyncRead + Unpin,
    {
        let line = pipe.read_until(b"\r\n").await?;
        // Strip chunk extensions (";name=value") the way httparse's
        // parse_chunk_size does internally; feed it the raw line with
        // a synthetic trailing CRLF so its partial/complete framing
        // matches what it expects from a live buffer.
        let mut probe = line.clone();
        probe.extend_from_slice(b"\r\n");
        match httparse::parse_chunk_size(&probe) {
            Ok(ChunkStatus::Complete((_, size))) => Ok(size as usize),
            Ok(ChunkStatus::Partial) => Err(Error::BadRequest("truncated chunk size")),
            Err(_) => Err(Error::BadRequest("invalid chunk size")),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

/// Encodes outbound bytes as HTTP/1.1 chunked transfer-coding.
/// `write` emits `<hex-len>\r\n<bytes>\r\n` (a no-op for empty input);
/// `finish` emits the terminating `0\r\n\r\n`.
pub struct ChunkedWriter;

impl ChunkedWriter {
    /// Encode one chunk. Returns `None` for a zero-length write, since
    /// an empty chunk outside the terminator would be misread as end
    /// of body.
    pub fn encode(bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.is_empty() {
            return None;
        }
        let mut out = Vec::with_capacity(bytes.len() + 16);
        out.extend_from_slice(format!("{:x}\r\n", bytes.len()).as_bytes());
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
        Some(out)
    }

    pub fn finish() -> &'static [u8] {
        b"0\r\n\r\n"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn decodes_two_chunks_and_terminator() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n".to_vec();
        let mut pipe = ReadPipe::new(Cursor::new(wire));
        let mut dec = Decoder::new();
        let first = dec.next_chunk(&mut pipe).await.unwrap();
        assert_eq!(first, Some(b"Wiki".to_vec()));
        let second = dec.next_chunk(&mut pipe).await.unwrap();
        assert_eq!(second, Some(b"pedia".to_vec()));
        let third = dec.next_chunk(&mut pipe).await.unwrap();
        assert_eq!(third, None);
        assert!(dec.is_done());
    }

    #[tokio::test]
    async fn rejects_invalid_chunk_size() {
        let wire = b"zz\r\nbad\r\n".to_vec();
        let mut pipe = ReadPipe::new(Cursor::new(wire));
        let mut dec = Decoder::new();
        let err = dec.next_chunk(&mut pipe).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn encode_round_trip() {
        let chunk = ChunkedWriter::encode(b"hello").unwrap();
        assert_eq!(chunk, b"5\r\nhello\r\n");
        assert!(ChunkedWriter::encode(b"").is_none());
        assert_eq!(ChunkedWriter::finish(), b"0\r\n\r\n");
    }
}
