//! Scratch buffers for staging audio bytes
//!
//! [`ScratchBuffer`] is a fixed-capacity byte queue used to accumulate
//! partial writes until a full processing block is available. Ends are
//! addressable: data can be appended or removed at either side, and a
//! cursor supports non-destructive sequential reads of the filled region.
//!
//! [`AudioBuffer`] is a reusable growable buffer for intermediate sample
//! storage; growing zero-fills so stale data never leaks into the mix.

/// Fixed-capacity byte staging buffer.
///
/// The filled region always starts at offset zero. `used() + free()`
/// equals the capacity at all times.
#[derive(Debug)]
pub struct ScratchBuffer {
    data: Vec<u8>,
    used: usize,
    cursor: usize,
}

impl ScratchBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            used: 0,
            cursor: 0,
        }
    }

    /// Resize the buffer, discarding contents.
    pub fn reset(&mut self, capacity: usize) {
        self.data.resize(capacity, 0);
        self.data.shrink_to_fit();
        self.used = 0;
        self.cursor = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn free(&self) -> usize {
        self.data.len() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn is_full(&self) -> bool {
        self.used == self.data.len()
    }

    /// Contents of the filled region.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Discard all contents.
    pub fn clear(&mut self) {
        self.used = 0;
        self.cursor = 0;
    }

    /// Append bytes at the tail. All-or-nothing: returns false without
    /// copying anything when `src` does not fit.
    pub fn push(&mut self, src: &[u8]) -> bool {
        if src.len() > self.free() {
            return false;
        }
        self.data[self.used..self.used + src.len()].copy_from_slice(src);
        self.used += src.len();
        true
    }

    /// Remove bytes from the tail. All-or-nothing: returns false when
    /// fewer than `dst.len()` bytes are buffered.
    pub fn pop(&mut self, dst: &mut [u8]) -> bool {
        if dst.len() > self.used {
            return false;
        }
        let start = self.used - dst.len();
        dst.copy_from_slice(&self.data[start..self.used]);
        self.used = start;
        self.cursor = self.cursor.min(self.used);
        true
    }

    /// Remove bytes from the head. All-or-nothing.
    pub fn shift(&mut self, dst: &mut [u8]) -> bool {
        if dst.len() > self.used {
            return false;
        }
        dst.copy_from_slice(&self.data[..dst.len()]);
        self.data.copy_within(dst.len()..self.used, 0);
        self.used -= dst.len();
        self.cursor = self.cursor.saturating_sub(dst.len());
        true
    }

    /// Insert bytes at the head, shifting existing contents back.
    /// All-or-nothing.
    pub fn unshift(&mut self, src: &[u8]) -> bool {
        if src.len() > self.free() {
            return false;
        }
        self.data.copy_within(0..self.used, src.len());
        self.data[..src.len()].copy_from_slice(src);
        self.used += src.len();
        self.cursor = 0;
        true
    }

    /// Append as many bytes as fit, returning the number taken.
    pub fn fill(&mut self, src: &[u8]) -> usize {
        let take = src.len().min(self.free());
        if take > 0 {
            self.data[self.used..self.used + take].copy_from_slice(&src[..take]);
            self.used += take;
        }
        take
    }

    /// Rewind the read cursor to the head.
    pub fn cursor_reset(&mut self) {
        self.cursor = 0;
    }

    /// Read the next `len` bytes at the cursor without consuming them.
    /// Returns `None` when fewer than `len` bytes remain.
    pub fn cursor_read(&mut self, len: usize) -> Option<&[u8]> {
        if self.cursor + len > self.used {
            return None;
        }
        let start = self.cursor;
        self.cursor += len;
        Some(&self.data[start..start + len])
    }

    /// True once the cursor has walked the entire filled region.
    pub fn cursor_end(&self) -> bool {
        self.cursor >= self.used
    }
}

/// Reusable growable sample buffer.
///
/// Growing zero-fills the new region; shrinking never happens implicitly,
/// so repeated cycles reuse the same allocation.
#[derive(Debug, Default)]
pub struct AudioBuffer<T: Copy + Default = f32> {
    data: Vec<T>,
}

impl<T: Copy + Default> AudioBuffer<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Grow to hold at least `len` elements, zero-filling any new region.
    pub fn ensure_len(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, T::default());
        }
    }

    /// Zero the entire buffer.
    pub fn fill_default(&mut self) {
        self.data.fill(T::default());
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
