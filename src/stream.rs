//! Virtual byte streams: the frame-to-byte adapters the RPC codecs read
//! from and write to.
//!
//! Each of the two streams splits into an owned read half and a write
//! half. The read half drains frame bodies delivered by the session's
//! read loop; the write half accumulates one outgoing frame behind a
//! reserved header slot and submits it whole on `flush`. Ownership of an
//! inbound body buffer moves read loop → reader → pool; the reader
//! releases a buffer only after the codec has consumed its last byte.

use crate::codec::CodecError;
use crate::error::Error;
use crate::frame::{self, HEADER_SIZE, MAX_BODY_LEN, StreamId};
use crate::pool::BufferPool;
use crate::session::Shared;
use crate::shutdown::Shutdown;
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) fn stream_pair(
    id: StreamId,
    shared: Arc<Shared>,
    inbound: mpsc::Receiver<BytesMut>,
    pool: Arc<BufferPool>,
    shutdown: Shutdown,
) -> (StreamReader, StreamWriter) {
    let reader = StreamReader {
        inbound,
        current: None,
        pool,
        shutdown,
    };
    let writer = StreamWriter {
        id,
        shared,
        outbound: BytesMut::new(),
    };
    (reader, writer)
}

/// Inbound half: turns queued frame bodies into a byte stream.
pub(crate) struct StreamReader {
    inbound: mpsc::Receiver<BytesMut>,
    current: Option<BytesMut>,
    pool: Arc<BufferPool>,
    shutdown: Shutdown,
}

impl StreamReader {
    /// Copy bytes out of the current frame body.
    ///
    /// Blocks for the next frame only once the current body is exhausted
    /// (releasing it to the pool first); a single call never spans two
    /// frames. Fails with [`Error::Closed`] when the session closes while
    /// waiting.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.current.take() {
                Some(mut current) if current.has_remaining() => {
                    let n = usize::min(buf.len(), current.remaining());
                    current.copy_to_slice(&mut buf[..n]);
                    self.current = Some(current);
                    return Ok(n);
                }
                Some(drained) => self.pool.release(drained),
                None => {}
            }

            let next = tokio::select! {
                _ = self.shutdown.closed() => return Err(Error::Closed),
                next = self.inbound.recv() => next,
            };
            match next {
                Some(body) => self.current = Some(body),
                // The read loop is gone; the session is tearing down.
                None => return Err(Error::Closed),
            }
        }
    }

    /// Fill `buf` completely, reading across frame boundaries as needed.
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..]).await?;
        }
        Ok(())
    }
}

/// Outbound half: accumulates exactly one frame between flushes.
pub(crate) struct StreamWriter {
    id: StreamId,
    shared: Arc<Shared>,
    outbound: BytesMut,
}

impl StreamWriter {
    /// Append codec bytes to the frame under construction.
    ///
    /// The first write of each frame reserves the four header bytes at
    /// offset zero; the header is backfilled at flush time, once the body
    /// length is known. Never performs I/O.
    pub(crate) fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.outbound.is_empty() {
            self.outbound.resize(HEADER_SIZE, 0);
        }
        self.outbound.extend_from_slice(bytes);
    }

    /// Finalise the pending frame and hand it to the session's serialised
    /// writer. A flush with no written bytes is a no-op.
    ///
    /// On failure the outbound buffer is left untouched; on success it is
    /// reset for the next frame. Exactly one frame is produced per
    /// non-empty flush.
    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        let body_len = self.outbound.len() - HEADER_SIZE;
        if body_len > MAX_BODY_LEN {
            return Err(Error::Codec(CodecError::Oversized { len: body_len }));
        }
        frame::encode_header(&mut self.outbound, self.id, body_len);
        self.shared.write_frame(&self.outbound).await?;
        self.outbound.clear();
        Ok(())
    }
}
