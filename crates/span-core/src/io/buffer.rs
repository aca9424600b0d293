//! Chunked byte FIFO used on both sides of non-blocking stream I/O.

use std::collections::VecDeque;

/// A growable FIFO of bytes stored as a deque of chunks.
///
/// Producers append whatever a socket read returned; consumers peek at a
/// prefix (the protocol layer typically peeks a header before committing to
/// consume a whole frame) and pop what they have processed.  Appends and pops
/// are O(chunk); `peek` coalesces only as many chunks as needed to make the
/// requested prefix contiguous.
pub struct StreamBuffer {
    chunks: VecDeque<Vec<u8>>,
    /// Read offset into the front chunk.
    head: usize,
    len: usize,
}

impl StreamBuffer {
    pub fn new() -> StreamBuffer {
        StreamBuffer {
            chunks: VecDeque::new(),
            head: 0,
            len: 0,
        }
    }

    /// Total bytes available.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends a copy of `data`.
    pub fn write(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.chunks.push_back(data.to_vec());
        self.len += data.len();
    }

    /// Returns the first `min(n, len)` bytes as one contiguous slice without
    /// consuming them, coalescing chunks if the prefix spans several.
    pub fn peek(&mut self, n: usize) -> &[u8] {
        let want = n.min(self.len);
        if want == 0 {
            return &[];
        }
        loop {
            let available = self.chunks[0].len() - self.head;
            if available >= want {
                break;
            }
            // Trim the consumed prefix before growing the front chunk so
            // repeated peeks do not accumulate dead bytes.
            if self.head > 0 {
                self.chunks[0].drain(..self.head);
                self.head = 0;
            }
            let Some(next) = self.chunks.remove(1) else {
                break;
            };
            self.chunks[0].extend_from_slice(&next);
        }
        &self.chunks[0][self.head..self.head + want]
    }

    /// Discards up to `n` bytes from the front.
    pub fn pop(&mut self, n: usize) {
        let mut remaining = n.min(self.len);
        self.len -= remaining;
        while remaining > 0 {
            let available = self.chunks[0].len() - self.head;
            if available <= remaining {
                remaining -= available;
                self.chunks.pop_front();
                self.head = 0;
            } else {
                self.head += remaining;
                remaining = 0;
            }
        }
    }

    /// Moves up to `out.len()` bytes into `out`, returning how many.
    pub fn read_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.len);
        if n == 0 {
            return 0;
        }
        out[..n].copy_from_slice(self.peek(n));
        self.pop(n);
        n
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        StreamBuffer::new()
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("len", &self.len)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
