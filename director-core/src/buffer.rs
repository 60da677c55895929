//! Fixed-capacity ring buffer of raw agent output bytes (C1).
//!
//! The buffer is byte-transparent: it never interprets ANSI escapes and
//! never collapses runs. Rendering is entirely the UI's concern.

use std::collections::VecDeque;
use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 1024 * 1024; // 1 MiB, matches the teacher's default output buffer size.

/// Lock-protected ring buffer of bytes emitted by the agent.
///
/// `write` is callable from any producer thread (the drain loop);
/// `snapshot` from any consumer (a UI render tick). Both are serialized by
/// a single mutex so no write is ever observed partially.
pub struct CircularTerminalBuffer {
    capacity: usize,
    inner: Mutex<VecDeque<u8>>,
}

impl CircularTerminalBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 20))),
        }
    }

    /// Append bytes, overwriting the oldest bytes first once the buffer is full.
    pub fn write(&self, bytes: &[u8]) {
        let mut buf = self.inner.lock().expect("buffer mutex poisoned");

        // A single chunk larger than capacity only needs its tail retained.
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };

        let overflow = (buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            buf.drain(0..overflow.min(buf.len()));
        }
        buf.extend(bytes.iter().copied());
    }

    /// Copy of the logically ordered valid window, oldest byte first.
    pub fn snapshot(&self) -> Vec<u8> {
        let buf = self.inner.lock().expect("buffer mutex poisoned");
        buf.iter().copied().collect()
    }

    /// Snapshot decoded as lossy UTF-8, convenient for terminal-verification matching.
    pub fn snapshot_text(&self) -> String {
        String::from_utf8_lossy(&self.snapshot()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("buffer mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the buffer's memory. Subsequent writes/snapshots still work
    /// against an empty buffer; this only exists so callers can reclaim
    /// memory deterministically rather than waiting on `Drop`.
    pub fn dispose(&self) {
        self.inner.lock().expect("buffer mutex poisoned").clear();
    }
}

impl Default for CircularTerminalBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn write_then_snapshot_concatenates_in_order() {
        let buffer = CircularTerminalBuffer::new(1024);
        buffer.write(b"hello ");
        buffer.write(b"world");
        assert_eq!(buffer.snapshot_text(), "hello world");
    }

    #[test]
    fn overflow_drops_oldest_bytes_first() {
        let buffer = CircularTerminalBuffer::new(5);
        buffer.write(b"abc");
        buffer.write(b"defg");
        // capacity 5, total written "abcdefg" (7 bytes) -> last 5 bytes "cdefg"
        assert_eq!(buffer.snapshot_text(), "cdefg");
    }

    #[test]
    fn single_chunk_larger_than_capacity_keeps_tail() {
        let buffer = CircularTerminalBuffer::new(3);
        buffer.write(b"abcdef");
        assert_eq!(buffer.snapshot_text(), "def");
    }

    #[test]
    fn concurrent_writers_never_interleave_partially() {
        let buffer = Arc::new(CircularTerminalBuffer::new(1 << 16));
        let mut handles = Vec::new();
        for i in 0..8u8 {
            let buffer = buffer.clone();
            handles.push(thread::spawn(move || {
                let chunk = vec![i; 64];
                buffer.write(&chunk);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(buffer.len(), 8 * 64);
    }

    #[test]
    fn dispose_clears_contents() {
        let buffer = CircularTerminalBuffer::new(16);
        buffer.write(b"data");
        buffer.dispose();
        assert!(buffer.is_empty());
    }
}
