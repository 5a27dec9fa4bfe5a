//! Byte pipe: a buffered duplex reader/writer over an arbitrary
//! `AsyncRead + AsyncWrite` stream, split into a read half and a
//! write half: one accumulates incoming bytes and exposes
//! delimiter/length scanning, the other batches outgoing writes and
//! only touches the underlying socket on flush. Both halves draw
//! their buffers from [`crate::pool::BufPool`].

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;
use crate::pool::BufPool;

const DEFAULT_BUF_SIZE: usize = 64 * 1024;

/// Buffered reader half of a connection's byte pipe.
pub struct ReadPipe<S> {
    io: S,
    buf: Vec<u8>,
    /// Index of the first byte not yet consumed by the caller.
    pos: usize,
}

impl<S: AsyncRead + Unpin> ReadPipe<S> {
    pub fn new(io: S) -> ReadPipe<S> {
        ReadPipe::with_capacity(io, DEFAULT_BUF_SIZE)
    }

    pub fn with_capacity(io: S, capacity: usize) -> ReadPipe<S> {
        ReadPipe {
            io,
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.buf.drain(..self.pos);
        self.pos = 0;
    }

    async fn fill(&mut self) -> Result<usize, Error> {
        self.compact();
        let mut chunk = [0u8; 16 * 1024];
        let n = self.io.read(&mut chunk).await?;
        if n > 0 {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    /// Bytes currently buffered and not yet consumed, without
    /// advancing the read cursor.
    pub fn peek_available(&self) -> &[u8] {
        self.available()
    }

    /// Read until `delimiter` is found, spanning as many refills as
    /// needed. Returns the bytes before the delimiter; the delimiter
    /// itself is consumed but not returned. Fails with
    /// `Error::UnexpectedEnd` if the stream ends first.
    pub async fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, Error> {
        assert!(!delimiter.is_empty(), "delimiter must be non-empty");
        loop {
            if let Some(idx) = find_subslice(self.available(), delimiter) {
                let out = self.available()[..idx].to_vec();
                self.pos += idx + delimiter.len();
                return Ok(out);
            }
            if self.fill().await? == 0 {
                return Err(Error::UnexpectedEnd);
            }
        }
    }

    /// Read exactly `n` bytes, refilling as needed.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        while self.available().len() < n {
            if self.fill().await? == 0 {
                return Err(Error::UnexpectedEnd);
            }
        }
        let out = self.available()[..n].to_vec();
        self.pos += n;
        Ok(out)
    }

    /// Ensure at least `n` bytes are buffered, returning `false` at
    /// clean EOF before that many bytes ever arrive.
    pub async fn ensure_filled(&mut self, n: usize) -> Result<bool, Error> {
        while self.available().len() < n {
            if self.fill().await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Consume `n` already-buffered bytes (caller must have checked
    /// via `peek_available`/`ensure_filled` that they exist).
    pub fn consume(&mut self, n: usize) {
        assert!(self.pos + n <= self.buf.len(), "consume past buffered data");
        self.pos += n;
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Buffered, batching writer half of a connection's byte pipe.
///
/// Small writes accumulate in a pooled buffer and only reach the
/// socket on `flush` or once the batch exceeds `flush_threshold`.
pub struct WritePipe<S> {
    io: S,
    pool: BufPool,
    batch: crate::pool::PooledBuf,
    flush_threshold: usize,
}

impl<S: AsyncWrite + Unpin> WritePipe<S> {
    pub fn new(io: S, pool: BufPool, flush_threshold: usize) -> WritePipe<S> {
        let batch = pool.lease(flush_threshold);
        WritePipe {
            io,
            pool,
            batch,
            flush_threshold,
        }
    }

    pub fn write_buffered(&mut self, data: &[u8]) {
        self.batch.as_mut_vec().extend_from_slice(data);
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        if !self.batch.is_empty() {
            self.io.write_all(&self.batch).await?;
            self.batch.as_mut_vec().clear();
        }
        self.io.flush().await?;
        Ok(())
    }

    /// Flush only if the batched segment has grown past the
    /// configured threshold; otherwise a no-op.
    pub async fn flush_if_full(&mut self) -> Result<(), Error> {
        if self.batch.len() >= self.flush_threshold {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn write_all_direct(&mut self, data: &[u8]) -> io::Result<()> {
        self.flush_if_full().await.map_err(|e| match e {
            Error::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        })?;
        self.io.write_all(data).await
    }

    pub fn rent_scratch(&self, requested: usize) -> crate::pool::PooledBuf {
        self.pool.lease(requested)
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}
