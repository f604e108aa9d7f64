//! Chunked reads from the transport, with pushback.
//!
//! [`ChunkSource`] pulls fixed-size chunks from an [`io::Read`] up to a
//! declared total length. [`LookaheadStream`] layers an unread buffer on
//! top so the boundary scanner can peek past a physical chunk edge and put
//! unconsumed bytes back. The blocking `read` call here is the only
//! suspension point in the whole subsystem.

use std::collections::VecDeque;
use std::io::Read;

use crate::error::MultipartError;

/// Reads fixed-size chunks from a transport, bounded by a declared length.
#[derive(Debug)]
pub struct ChunkSource<R> {
    inner: R,
    remaining: u64,
    chunk_size: usize,
}

impl<R: Read> ChunkSource<R> {
    /// Create a source that will read at most `length` bytes from `inner`
    /// in chunks of up to `chunk_size` bytes.
    #[must_use]
    pub fn new(inner: R, length: u64, chunk_size: usize) -> Self {
        Self {
            inner,
            remaining: length,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns the number of declared bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the next chunk. Returns `None` once the declared length has
    /// been consumed or the transport reports end-of-stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(self.chunk_size);
        let mut buf = vec![0u8; want];
        let n = self.inner.read(&mut buf)?;
        if n == 0 {
            // Transport ended before the declared length was delivered.
            self.remaining = 0;
            return Ok(None);
        }
        buf.truncate(n);
        self.remaining -= n as u64;
        Ok(Some(buf))
    }

    /// Read and discard everything up to the declared length.
    pub fn exhaust(&mut self) -> Result<(), MultipartError> {
        while self.next_chunk()?.is_some() {}
        Ok(())
    }
}

/// A [`ChunkSource`] with pushback: bytes can be unread and are replayed,
/// in order, before any new physical chunk is requested.
#[derive(Debug)]
pub struct LookaheadStream<R> {
    source: ChunkSource<R>,
    pending: VecDeque<Vec<u8>>,
}

impl<R: Read> LookaheadStream<R> {
    /// Wrap a chunk source.
    #[must_use]
    pub fn new(source: ChunkSource<R>) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
        }
    }

    /// Return the next chunk: unread data first, then the source.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, MultipartError> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Some(chunk));
        }
        self.source.next_chunk()
    }

    /// Push bytes back to be replayed before the next physical chunk.
    pub fn unread(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.pending.push_front(bytes);
        }
    }

    /// Read up to `max` bytes, fewer only at end-of-stream. Bytes pulled
    /// beyond `max` are unread, preserving order.
    pub fn read_exact_or_fewer(&mut self, max: usize) -> Result<Vec<u8>, MultipartError> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.next_chunk()? {
                None => break,
                Some(mut chunk) => {
                    if out.len() + chunk.len() > max {
                        let rest = chunk.split_off(max - out.len());
                        out.append(&mut chunk);
                        self.unread(rest);
                    } else {
                        out.append(&mut chunk);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Discard all remaining data, pending and physical.
    pub fn exhaust(&mut self) -> Result<(), MultipartError> {
        self.pending.clear();
        self.source.exhaust()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(data: &[u8], chunk_size: usize) -> LookaheadStream<&[u8]> {
        LookaheadStream::new(ChunkSource::new(data, data.len() as u64, chunk_size))
    }

    #[test]
    fn chunk_source_respects_chunk_size_and_length() {
        let data = b"abcdefghij";
        let mut source = ChunkSource::new(&data[..], 7, 3);

        assert_eq!(source.next_chunk().unwrap().unwrap(), b"abc");
        assert_eq!(source.next_chunk().unwrap().unwrap(), b"def");
        assert_eq!(source.next_chunk().unwrap().unwrap(), b"g");
        assert!(source.next_chunk().unwrap().is_none());
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn chunk_source_handles_early_eof() {
        let data = b"ab";
        let mut source = ChunkSource::new(&data[..], 100, 8);
        assert_eq!(source.next_chunk().unwrap().unwrap(), b"ab");
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn unread_is_replayed_before_new_chunks() {
        let mut s = stream(b"world", 5);
        assert_eq!(s.next_chunk().unwrap().unwrap(), b"world");
        s.unread(b"hello ".to_vec());
        assert_eq!(s.next_chunk().unwrap().unwrap(), b"hello ");
        assert!(s.next_chunk().unwrap().is_none());
    }

    #[test]
    fn unread_preserves_order_across_multiple_pushbacks() {
        let mut s = stream(b"tail", 4);
        s.unread(b"b".to_vec());
        s.unread(b"a".to_vec());
        assert_eq!(s.next_chunk().unwrap().unwrap(), b"a");
        assert_eq!(s.next_chunk().unwrap().unwrap(), b"b");
        assert_eq!(s.next_chunk().unwrap().unwrap(), b"tail");
    }

    #[test]
    fn read_exact_or_fewer_splits_and_unreads() {
        let mut s = stream(b"abcdefgh", 8);
        let head = s.read_exact_or_fewer(3).unwrap();
        assert_eq!(head, b"abc");
        let rest = s.read_exact_or_fewer(100).unwrap();
        assert_eq!(rest, b"defgh");
        assert!(s.read_exact_or_fewer(1).unwrap().is_empty());
    }

    #[test]
    fn exhaust_discards_pending_and_source() {
        let mut s = stream(b"abcdef", 2);
        s.unread(b"xyz".to_vec());
        s.exhaust().unwrap();
        assert!(s.next_chunk().unwrap().is_none());
    }
}
