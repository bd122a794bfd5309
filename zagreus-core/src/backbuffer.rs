//! Bounded tail of recent device output.
//!
//! The server replays this buffer to every newly-accepted client so a
//! late joiner sees the same screen as everyone else. Truncation is
//! byte-level from the head; no attempt is made to align to lines.

use bytes::{Bytes, BytesMut};

/// A bounded FIFO of the most recent device output bytes.
#[derive(Debug)]
pub struct Backbuffer {
    buf: BytesMut,
    max: usize,
}

impl Backbuffer {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max.min(4096)),
            max,
        }
    }

    /// Append device output, trimming the oldest bytes past capacity.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.max {
            // The chunk alone fills the buffer; keep only its tail.
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.max..]);
            return;
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.max {
            let excess = self.buf.len() - self.max;
            let _ = self.buf.split_to(excess);
        }
    }

    /// Snapshot of the current tail, oldest byte first.
    #[must_use]
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_everything_under_capacity() {
        let mut bb = Backbuffer::new(8);
        bb.push(b"abc");
        bb.push(b"de");
        assert_eq!(&bb.snapshot()[..], b"abcde");
    }

    #[test]
    fn trims_from_the_head() {
        let mut bb = Backbuffer::new(4);
        bb.push(b"abc");
        bb.push(b"de");
        assert_eq!(&bb.snapshot()[..], b"bcde");
    }

    #[test]
    fn oversized_chunk_keeps_tail() {
        let mut bb = Backbuffer::new(4);
        bb.push(b"0123456789");
        assert_eq!(&bb.snapshot()[..], b"6789");
    }

    #[test]
    fn last_n_of_m_produced() {
        let mut bb = Backbuffer::new(16);
        for i in 0..10u8 {
            bb.push(&[b'a' + i; 3]);
        }
        // 30 bytes produced, capacity 16: exactly the last 16 remain
        assert_eq!(bb.len(), 16);
        let snap = bb.snapshot();
        assert_eq!(&snap[snap.len() - 3..], b"jjj");
        assert_eq!(snap[0], b'e');
    }
}
