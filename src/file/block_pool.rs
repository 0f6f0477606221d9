//! Fixed-capacity buffer arena with LRU-ish reuse (SPEC_FULL.md §4.G),
//! ported from `CFCore/include/CF/FileSource.h`'s `FileBlockBuffer` /
//! `FileBlockPool`. The original's intrusive `Queue fQueue` (oldest
//! element at the front, `MarkUsed` moving an accessed element to the
//! back) becomes a plain `VecDeque<BufferHandle>`; `fArrayIndex == -1`
//! survives unchanged as the free/unassigned sentinel on each buffer.

use std::collections::VecDeque;

/// Stable index into a [`FileBlockPool`]'s arena. Never recycled to a
/// different arena slot's identity — only the *buffer's* owning block
/// index changes on reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(usize);

struct Buffer {
    /// Which file block currently owns this buffer's bytes, or `-1` if it
    /// has never been assigned — `FileBlockBuffer::fArrayIndex` verbatim.
    block_index: i64,
    capacity: u32,
    fill_count: u32,
    bytes: Box<[u8]>,
}

/// Arena of reusable fixed-size buffers plus a recency queue used for
/// reclaiming one once `max_buffers` is reached — one object pool shared
/// by every block any [`super::file_map::FileMap`] on top of it maps in.
pub struct FileBlockPool {
    buffers: Vec<Buffer>,
    /// Front = least recently used, back = most recently used.
    recency: VecDeque<BufferHandle>,
    max_buffers: u32,
    buffer_inc: u32,
    unit_size_bytes: u32,
}

impl FileBlockPool {
    pub fn new(unit_size_bytes: u32, max_buffers: u32, buffer_inc: u32) -> Self {
        FileBlockPool {
            buffers: Vec::new(),
            recency: VecDeque::new(),
            max_buffers: max_buffers.max(1),
            buffer_inc,
            unit_size_bytes,
        }
    }

    pub fn set_max_buffers(&mut self, max_buffers: u32) {
        if max_buffers > 0 {
            self.max_buffers = max_buffers;
        }
    }

    pub fn set_buffer_inc(&mut self, buffer_inc: u32) {
        if buffer_inc > 0 {
            self.buffer_inc = buffer_inc;
        }
    }

    pub fn inc_max_buffers(&mut self) {
        self.max_buffers += self.buffer_inc;
    }

    /// Shrinking never reclaims below the increment step
    /// (`DecMaxBuffers`'s `if (fMaxBuffers > fBufferInc)` guard).
    pub fn dec_max_buffers(&mut self) {
        if self.max_buffers > self.buffer_inc {
            self.max_buffers -= self.buffer_inc;
        }
    }

    pub fn max_buffers(&self) -> u32 {
        self.max_buffers
    }

    pub fn inc_buffers(&self) -> u32 {
        self.buffer_inc
    }

    pub fn num_current_buffers(&self) -> u32 {
        self.buffers.len() as u32
    }

    pub fn buffer_unit_size_bytes(&self) -> u32 {
        self.unit_size_bytes
    }

    /// Returns a handle to a buffer with at least `size_bytes` capacity:
    /// a fresh arena slot while under `max_buffers`, otherwise the
    /// least-recently-used buffer, reclaimed (and grown if it was smaller
    /// than requested). Newly returned handles are always most-recently-used.
    pub fn get_buffer_element(&mut self, size_bytes: u32) -> BufferHandle {
        if (self.buffers.len() as u32) < self.max_buffers {
            let handle = BufferHandle(self.buffers.len());
            self.buffers.push(Buffer {
                block_index: -1,
                capacity: size_bytes,
                fill_count: 0,
                bytes: vec![0u8; size_bytes as usize].into_boxed_slice(),
            });
            self.recency.push_back(handle);
            return handle;
        }

        let handle = self
            .recency
            .pop_front()
            .expect("max_buffers > 0 implies at least one buffer exists once allocated");
        let buf = &mut self.buffers[handle.0];
        buf.fill_count = 0;
        if buf.capacity < size_bytes {
            buf.bytes = vec![0u8; size_bytes as usize].into_boxed_slice();
            buf.capacity = size_bytes;
        }
        self.recency.push_back(handle);
        handle
    }

    /// Moves `handle` to the back of the recency queue
    /// (`FileBlockPool::MarkUsed`).
    pub fn mark_used(&mut self, handle: BufferHandle) {
        if let Some(pos) = self.recency.iter().position(|h| *h == handle) {
            self.recency.remove(pos);
            self.recency.push_back(handle);
        }
    }

    pub fn block_index(&self, handle: BufferHandle) -> i64 {
        self.buffers[handle.0].block_index
    }

    pub fn set_block_index(&mut self, handle: BufferHandle, block_index: i64) {
        self.buffers[handle.0].block_index = block_index;
    }

    pub fn fill_size(&self, handle: BufferHandle) -> u32 {
        self.buffers[handle.0].fill_count
    }

    pub fn set_fill_size(&mut self, handle: BufferHandle, fill_size: u32) {
        self.buffers[handle.0].fill_count = fill_size;
    }

    pub fn capacity(&self, handle: BufferHandle) -> u32 {
        self.buffers[handle.0].capacity
    }

    /// The filled portion of the buffer's bytes.
    pub fn filled_bytes(&self, handle: BufferHandle) -> &[u8] {
        let buf = &self.buffers[handle.0];
        &buf.bytes[..buf.fill_count as usize]
    }

    /// The buffer's full capacity, writable (e.g. for a disk read to fill).
    pub fn bytes_mut(&mut self, handle: BufferHandle) -> &mut [u8] {
        &mut self.buffers[handle.0].bytes
    }
}
