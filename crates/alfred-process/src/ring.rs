use std::collections::VecDeque;

/// Fixed-capacity byte ring for captured process output.
///
/// Writes never block and never fail: when full, the oldest bytes are
/// evicted. `total_written` keeps counting across evictions so pollers can
/// track their position with absolute offsets.
#[derive(Debug)]
pub struct RingBuffer {
    buf: VecDeque<u8>,
    capacity: usize,
    total_written: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total_written: 0,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.total_written += bytes.len() as u64;

        if bytes.len() >= self.capacity {
            // The write alone fills the ring — keep only its tail.
            self.buf.clear();
            self.buf.extend(&bytes[bytes.len() - self.capacity..]);
            return;
        }

        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.buf.drain(..overflow);
        }
        self.buf.extend(bytes);
    }

    /// Bytes ever written, including evicted ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Absolute offset of the oldest byte still retained.
    pub fn oldest_retained(&self) -> u64 {
        self.total_written - self.buf.len() as u64
    }

    /// Return the suffix starting at `offset` plus the new absolute offset.
    ///
    /// An offset pointing into evicted territory is clamped up to the oldest
    /// retained byte; an offset past the end returns nothing. Callers never
    /// see a panic.
    pub fn read_from(&self, offset: u64) -> (Vec<u8>, u64) {
        let start = offset.clamp(self.oldest_retained(), self.total_written);
        let skip = (start - self.oldest_retained()) as usize;
        let out: Vec<u8> = self.buf.iter().skip(skip).copied().collect();
        (out, self.total_written)
    }

    /// Everything still retained.
    pub fn snapshot(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }
}
