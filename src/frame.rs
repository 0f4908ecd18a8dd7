//! Frame values and the per-source hand-off buffer.
//!
//! - `Frame`: Decoded RGB24 image. Dimensions plus pixels, nothing else.
//! - `HandoffBuffer`: Bounded relay from one capture loop to any number of readers.
//!
//! Frames move from the capture loop into the buffer and out to consumers by value.
//! Nothing hands out a mutable reference to a frame that another thread can see.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Number of frames the hand-off queue holds before it starts evicting.
pub const HANDOFF_CAPACITY: usize = 2;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// A decoded image in packed RGB24.
///
/// No timestamp and no source-format metadata survives decode; consumers get
/// dimensions and pixels only.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Pixel bytes, row-major, 3 bytes per pixel.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// Pixel data is never written to logs.
impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// HandoffBuffer
// ----------------------------------------------------------------------------

/// Bounded relay of the freshest frame from a capture loop to its readers.
///
/// Holds at most `HANDOFF_CAPACITY` queued frames plus one "latest" slot:
/// - `push` never waits on a reader; a full queue drops its oldest entry
/// - `pop_latest` never waits on the producer beyond a short critical section
/// - the latest slot is always overwritten by the newest push
pub struct HandoffBuffer {
    inner: Mutex<HandoffInner>,
    capacity: usize,
}

#[derive(Default)]
struct HandoffInner {
    queue: VecDeque<Frame>,
    latest: Option<Frame>,
    pushed: u64,
    evicted: u64,
}

impl HandoffBuffer {
    pub fn new() -> Self {
        Self::with_capacity(HANDOFF_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(HandoffInner {
                queue: VecDeque::with_capacity(capacity),
                ..HandoffInner::default()
            }),
            capacity,
        }
    }

    /// Publish a frame. Evicts the oldest queued frame when the queue is full.
    pub fn push(&self, frame: Frame) {
        let mut inner = self.lock();
        while inner.queue.len() >= self.capacity {
            inner.queue.pop_front();
            inner.evicted += 1;
        }
        inner.queue.push_back(frame.clone());
        inner.latest = Some(frame);
        inner.pushed += 1;
    }

    /// Take the newest queued frame, falling back to a copy of the latest slot.
    ///
    /// Older queued frames are discarded: a reader only ever wants the most
    /// recent image. Returns `None` until the first push.
    pub fn pop_latest(&self) -> Option<Frame> {
        let mut inner = self.lock();
        match inner.queue.pop_back() {
            Some(frame) => {
                inner.queue.clear();
                Some(frame)
            }
            None => inner.latest.clone(),
        }
    }

    /// Copy of the latest slot without draining the queue.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().latest.clone()
    }

    /// Current number of queued frames (never above capacity).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total pushes and evictions since creation.
    pub fn counters(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.pushed, inner.evicted)
    }

    /// Bytes held by queued frames and the latest slot.
    pub fn memory_bytes(&self) -> usize {
        let inner = self.lock();
        inner.queue.iter().map(Frame::byte_len).sum::<usize>()
            + inner.latest.as_ref().map_or(0, Frame::byte_len)
    }

    fn lock(&self) -> MutexGuard<'_, HandoffInner> {
        // A panicking producer must not take readers down with it.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HandoffBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
