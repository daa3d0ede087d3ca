//! Linear (bump) allocator over a CPU-writable upload buffer.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::error::RenderError;
use crate::types::{align_up, BufferDescriptor, BufferUsage};

/// A transient sub-allocation from a [`LinearAllocator`].
///
/// Non-owning: the range is valid only until the owning allocator's next
/// [`reset`](LinearAllocator::reset). Consumers must not retain it across
/// frame boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientAllocation {
    /// Byte offset into the backing buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
    /// GPU virtual address of the start of the allocation.
    pub gpu_address: u64,
}

impl TransientAllocation {
    /// End offset (`offset + size`).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Bump-pointer allocator over one contiguous CPU-writable, GPU-readable
/// buffer.
///
/// `allocate` only moves the cursor forward; `reset` reclaims the entire
/// block in O(1). There is no per-allocation bookkeeping and no way to free
/// a single allocation early. This is correct because each allocator is
/// paired 1:1 with a frame-ring slot and is never touched again by the CPU
/// until that slot's fence target is confirmed reached, which is exactly
/// when `reset` is called.
///
/// Exhaustion is a fatal sizing error: size the block for worst-case
/// per-frame usage at startup.
pub struct LinearAllocator {
    buffer: Arc<GpuBuffer>,
    capacity: u64,
    cursor: u64,
    gpu_base: u64,
}

impl LinearAllocator {
    /// Create an allocator backed by a fresh upload buffer of `capacity` bytes.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        capacity: u64,
        label: &str,
    ) -> Result<Self, RenderError> {
        let descriptor = BufferDescriptor::new(
            capacity,
            BufferUsage::UPLOAD
                | BufferUsage::SHADER_RESOURCE
                | BufferUsage::CONSTANT
                | BufferUsage::COPY_SRC,
        )
        .with_label(label);

        let buffer = backend.create_buffer(&descriptor)?;
        let gpu_base = buffer.gpu_address();

        Ok(Self {
            buffer,
            capacity,
            cursor: 0,
            gpu_base,
        })
    }

    /// The backing upload buffer.
    pub fn buffer(&self) -> &Arc<GpuBuffer> {
        &self.buffer
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes allocated since the last reset (including alignment padding).
    pub fn used(&self) -> u64 {
        self.cursor
    }

    /// Bytes remaining before exhaustion, ignoring future alignment padding.
    pub fn remaining(&self) -> u64 {
        self.capacity - self.cursor
    }

    /// Allocate `size` bytes aligned to `align` (a power of two).
    ///
    /// Returns the byte range `[aligned, aligned + size)` of the backing
    /// buffer and advances the cursor past it. Fails with
    /// [`RenderError::ArenaExhausted`] when the aligned range would exceed
    /// capacity; the failure is fatal by policy and never retried.
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<TransientAllocation, RenderError> {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of 2");

        let aligned = align_up(self.cursor, align);
        if aligned + size > self.capacity {
            return Err(RenderError::ArenaExhausted {
                requested: size,
                offset: aligned,
                capacity: self.capacity,
            });
        }

        self.cursor = aligned + size;

        Ok(TransientAllocation {
            offset: aligned,
            size,
            gpu_address: self.gpu_base + aligned,
        })
    }

    /// Reset the cursor to zero, reclaiming the whole block in O(1).
    ///
    /// Only call after the owning frame's fence target is confirmed
    /// reached; the GPU must no longer be reading the block.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl std::fmt::Debug for LinearAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .field("gpu_base", &format_args!("{:#x}", self.gpu_base))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn test_allocator(capacity: u64) -> LinearAllocator {
        let backend: Arc<dyn GpuBackend> = Arc::new(SoftwareBackend::new());
        LinearAllocator::new(&backend, capacity, "test_arena").unwrap()
    }

    #[test]
    fn test_alignment_scenario() {
        // Capacity 256: 10 bytes at align 4, then 6 bytes at align 16.
        let mut arena = test_allocator(256);

        let a = arena.allocate(10, 4).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(a.end(), 10);
        assert_eq!(arena.used(), 10);

        let b = arena.allocate(6, 16).unwrap();
        assert_eq!(b.offset, 16);
        assert_eq!(b.end(), 22);
        assert_eq!(arena.used(), 22);
    }

    #[test]
    fn test_ranges_never_overlap_and_respect_alignment() {
        let mut arena = test_allocator(4096);
        let requests = [
            (10u64, 4u64),
            (1, 1),
            (100, 256),
            (32, 32),
            (7, 2),
            (256, 256),
            (3, 64),
        ];

        let mut previous_end = 0u64;
        for &(size, align) in &requests {
            let alloc = arena.allocate(size, align).unwrap();
            assert_eq!(alloc.offset % align, 0, "start must satisfy alignment");
            assert!(alloc.offset >= previous_end, "ranges must not overlap");
            assert!(alloc.end() <= arena.capacity(), "range must stay in bounds");
            previous_end = alloc.end();
        }
    }

    #[test]
    fn test_exhaustion_fails() {
        let mut arena = test_allocator(128);
        arena.allocate(100, 1).unwrap();

        let err = arena.allocate(64, 1).unwrap_err();
        assert!(matches!(err, RenderError::ArenaExhausted { .. }));

        // The failed allocation does not advance the cursor.
        assert_eq!(arena.used(), 100);
        let c = arena.allocate(28, 1).unwrap();
        assert_eq!(c.offset, 100);
    }

    #[test]
    fn test_alignment_padding_can_exhaust() {
        let mut arena = test_allocator(256);
        arena.allocate(250, 1).unwrap();
        // 6 bytes remain, but aligning to 256 pushes past capacity.
        assert!(arena.allocate(1, 256).is_err());
        // An unaligned byte still fits.
        assert!(arena.allocate(1, 1).is_ok());
    }

    #[test]
    fn test_reset_reclaims_everything() {
        let mut arena = test_allocator(64);
        arena.allocate(40, 1).unwrap();
        arena.reset();

        let alloc = arena.allocate(0, 1).unwrap();
        assert_eq!(alloc.offset, 0);
        assert_eq!(arena.used(), 0);

        let alloc = arena.allocate(64, 1).unwrap();
        assert_eq!(alloc.offset, 0);
    }

    #[test]
    fn test_gpu_addresses_track_offsets() {
        let mut arena = test_allocator(512);
        let base = arena.buffer().gpu_address();

        let a = arena.allocate(16, 16).unwrap();
        let b = arena.allocate(16, 16).unwrap();
        assert_eq!(a.gpu_address, base);
        assert_eq!(b.gpu_address, base + 16);
    }

    #[test]
    fn test_full_capacity_allocation() {
        let mut arena = test_allocator(64);
        let alloc = arena.allocate(64, 1).unwrap();
        assert_eq!(alloc.end(), 64);
        assert!(arena.allocate(1, 1).is_err());
    }
}
