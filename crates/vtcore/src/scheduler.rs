//! Write queue: chunked, time-sliced feeding of the parser.
//!
//! Writes are queued FIFO and drained in bounded time slices (soft
//! deadline) so one huge write cannot block the host; between slices the
//! terminal invokes the host's continuation hook and yields. A discard
//! watermark fails `write` fast instead of growing without bound — that is
//! backpressure, not recoverable buffering.
//!
//! UTF-8 decoding to code points happens here, stream-safe across chunk
//! boundaries; malformed input becomes U+FFFD.

use std::collections::VecDeque;
use std::time::Duration;

use crate::Error;

/// Soft deadline for one processing slice.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(12);

/// Pending-byte cap; writes beyond it fail fast.
pub const DISCARD_WATERMARK: usize = 50_000_000;

/// Default recursion cap for `write_sync`.
pub const SYNC_CALL_LIMIT: usize = 5000;

/// One queued write.
pub struct WriteChunk {
    /// Raw bytes as submitted.
    pub bytes: Vec<u8>,
    /// Completion callback, run after the chunk is fully parsed.
    pub callback: Option<Box<dyn FnOnce() + Send>>,
}

/// FIFO write queue with watermark backpressure.
#[derive(Default)]
pub struct WriteBuffer {
    queue: VecDeque<WriteChunk>,
    pending_bytes: usize,
}

impl WriteBuffer {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a write; fails once the watermark is exceeded.
    pub fn enqueue(
        &mut self,
        bytes: Vec<u8>,
        callback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), Error> {
        let pending = self.pending_bytes + bytes.len();
        if pending > DISCARD_WATERMARK {
            return Err(Error::WriteOverflow { pending });
        }
        self.pending_bytes = pending;
        self.queue.push_back(WriteChunk { bytes, callback });
        Ok(())
    }

    /// Take the next chunk, in submission order.
    pub fn pop(&mut self) -> Option<WriteChunk> {
        let chunk = self.queue.pop_front()?;
        self.pending_bytes -= chunk.bytes.len();
        Some(chunk)
    }

    /// Whether writes are waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Bytes currently queued.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Drop everything queued (dispose). Callbacks are not invoked.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending_bytes = 0;
    }
}

impl std::fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("chunks", &self.queue.len())
            .field("pending_bytes", &self.pending_bytes)
            .finish()
    }
}

/// Streaming UTF-8 to code-point decoder.
///
/// A multi-byte sequence split across chunks is carried over; invalid
/// bytes decode to U+FFFD without desynchronizing the stream.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: [u8; 4],
    pending_len: u8,
}

impl Utf8Decoder {
    /// Create a decoder with no carried state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any carried partial sequence.
    pub fn clear(&mut self) {
        self.pending_len = 0;
    }

    /// Decode `input`, appending code points to `out`.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u32>) {
        const REPLACEMENT: u32 = 0xFFFD;
        let mut i = 0;

        // Finish a sequence carried over from the previous chunk.
        while self.pending_len > 0 && i < input.len() {
            let b = input[i];
            if b & 0xC0 == 0x80 {
                self.pending[usize::from(self.pending_len)] = b;
                self.pending_len += 1;
                i += 1;
                let expected = sequence_len(self.pending[0]);
                if self.pending_len == expected {
                    match std::str::from_utf8(&self.pending[..usize::from(expected)]) {
                        Ok(s) => out.extend(s.chars().map(u32::from)),
                        Err(_) => out.push(REPLACEMENT),
                    }
                    self.pending_len = 0;
                }
            } else {
                // The carried lead byte never completed.
                out.push(REPLACEMENT);
                self.pending_len = 0;
            }
        }

        while i < input.len() {
            let b = input[i];
            if b < 0x80 {
                let start = i;
                while i < input.len() && input[i] < 0x80 {
                    i += 1;
                }
                out.extend(input[start..i].iter().map(|&b| u32::from(b)));
                continue;
            }
            let len = usize::from(sequence_len(b));
            if len == 0 {
                out.push(REPLACEMENT);
                i += 1;
                continue;
            }
            if i + len <= input.len() {
                match std::str::from_utf8(&input[i..i + len]) {
                    Ok(s) => {
                        out.extend(s.chars().map(u32::from));
                        i += len;
                    }
                    Err(_) => {
                        out.push(REPLACEMENT);
                        i += 1;
                    }
                }
            } else {
                // Partial tail; carry into the next chunk.
                let n = input.len() - i;
                self.pending[..n].copy_from_slice(&input[i..]);
                self.pending_len = n as u8;
                i = input.len();
            }
        }
    }
}

/// Expected byte length of a UTF-8 sequence from its lead byte (0 = invalid
/// lead).
fn sequence_len(lead: u8) -> u8 {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Vec<u32> {
        let mut decoder = Utf8Decoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.decode(chunk, &mut out);
        }
        out
    }

    #[test]
    fn ascii_passthrough() {
        assert_eq!(decode_all(&[b"abc"]), vec![97, 98, 99]);
    }

    #[test]
    fn multibyte_in_one_chunk() {
        assert_eq!(decode_all(&["é中".as_bytes()]), vec![0xE9, 0x4E2D]);
    }

    #[test]
    fn multibyte_split_across_chunks() {
        let bytes = "中".as_bytes();
        for split in 1..bytes.len() {
            let out = decode_all(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(out, vec![0x4E2D], "split at {split}");
        }
    }

    #[test]
    fn invalid_bytes_become_replacement() {
        assert_eq!(decode_all(&[&[0xFF, b'a']]), vec![0xFFFD, 97]);
        assert_eq!(decode_all(&[&[0xC3]]), Vec::<u32>::new());
        // An abandoned lead byte surfaces once the next chunk arrives.
        assert_eq!(decode_all(&[&[0xC3], b"a"]), vec![0xFFFD, 97]);
    }

    #[test]
    fn four_byte_emoji() {
        assert_eq!(decode_all(&["🎉".as_bytes()]), vec![0x1F389]);
    }

    #[test]
    fn queue_is_fifo_and_tracks_bytes() {
        let mut queue = WriteBuffer::new();
        queue.enqueue(b"one".to_vec(), None).unwrap();
        queue.enqueue(b"two".to_vec(), None).unwrap();
        assert_eq!(queue.pending_bytes(), 6);
        assert_eq!(queue.pop().unwrap().bytes, b"one");
        assert_eq!(queue.pending_bytes(), 3);
        assert_eq!(queue.pop().unwrap().bytes, b"two");
        assert!(!queue.has_pending());
    }

    #[test]
    fn watermark_rejects_oversized_backlog() {
        let mut queue = WriteBuffer::new();
        queue
            .enqueue(vec![0u8; DISCARD_WATERMARK - 10], None)
            .unwrap();
        let err = queue.enqueue(vec![0u8; 20], None).unwrap_err();
        assert!(matches!(err, Error::WriteOverflow { .. }));
        // The queue itself is intact.
        assert!(queue.has_pending());
    }
}
