//! Per-call scratch arena.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use binding::align_up;
use log::trace;

use crate::memory::{NativeBuffer, Segment};

const MIN_CHUNK_SIZE: usize = 256;
const CHUNK_ALIGNMENT: usize = 16;

struct Chunk {
    buffer: NativeBuffer,
    used: usize,
}

impl Chunk {
    fn new(size: usize) -> Self {
        Self {
            buffer: NativeBuffer::zeroed(size, CHUNK_ALIGNMENT),
            used: 0,
        }
    }

    /// Bump-allocate, or `None` if the chunk is full.
    fn bump(&mut self, size: usize, alignment: usize) -> Option<usize> {
        let base = self.buffer.address().bits() as usize;
        let start = align_up(base + self.used, alignment) - base;
        let end = start.checked_add(size)?;
        if end > self.buffer.capacity() {
            return None;
        }
        self.used = end;
        Some(start)
    }
}

/// Bump allocator for the scratch buffers of one call.
///
/// Segments handed out share a liveness flag that is cleared when the context
/// closes, so any later access through them panics. Dropping the context
/// closes it.
pub struct BindingContext {
    chunks: Vec<Chunk>,
    alive: Arc<AtomicBool>,
    first_chunk_size: usize,
    allocated: usize,
}

impl BindingContext {
    /// A context whose first chunk holds `capacity` bytes. No memory is
    /// reserved until the first allocation.
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: Vec::new(),
            alive: Arc::new(AtomicBool::new(true)),
            first_chunk_size: capacity,
            allocated: 0,
        }
    }

    /// Zeroed scratch memory valid until the context closes.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Segment {
        assert!(self.is_open(), "allocation from a closed binding context");
        let alignment = alignment.max(1);
        let offset = match self.chunks.last_mut().and_then(|c| c.bump(size, alignment)) {
            Some(offset) => offset,
            None => {
                let wanted = size + alignment;
                let chunk_size = match self.chunks.last() {
                    None => self.first_chunk_size.max(wanted),
                    Some(last) => (last.buffer.capacity() * 2).max(wanted),
                }
                .max(MIN_CHUNK_SIZE);
                trace!("binding context: new chunk of {chunk_size} bytes");
                let mut chunk = Chunk::new(chunk_size);
                let offset = chunk
                    .bump(size, alignment)
                    .unwrap_or_else(|| unreachable!("fresh chunk too small"));
                self.chunks.push(chunk);
                offset
            }
        };
        self.allocated += size;
        let base = self.chunks[self.chunks.len() - 1].buffer.address();
        trace!("binding context: allocate {size}/{alignment}");
        Segment::in_context(base.add(offset), size, self.alive.clone())
    }

    pub fn is_open(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Bytes handed out so far, excluding alignment padding.
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Kill every segment from this context and free its memory.
    pub fn close(&mut self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            trace!(
                "binding context: release {} bytes in {} chunk(s)",
                self.allocated,
                self.chunks.len()
            );
            self.chunks.clear();
        }
    }
}

impl Drop for BindingContext {
    fn drop(&mut self) {
        self.close();
    }
}
