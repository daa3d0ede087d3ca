//! Bump allocator over a fixed-capacity binding table.

use std::sync::Arc;

use crate::backend::{GpuBackend, GpuDescriptorTable};
use crate::error::RenderError;
use crate::types::DescriptorTableDescriptor;

/// One issued slot of a binding table.
///
/// Carries the opaque index shaders use for bindless access plus the CPU-
/// and GPU-side handles needed to write a descriptor into the slot or
/// reference it from command recording. Handles are computed as
/// `base + index * stride`, which is what makes index-based access
/// possible: any code holding the integer index can reconstruct the
/// binding location without a name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSlot {
    /// Slot index within the table.
    pub index: u32,
    /// CPU-side handle for descriptor writes.
    pub cpu_handle: u64,
    /// GPU-side handle; zero for tables that are not shader visible.
    pub gpu_handle: u64,
}

/// Bump allocator over a fixed-capacity table of binding descriptors of
/// one kind.
///
/// The table is append-only for the process lifetime: slots are issued
/// once and never freed individually. Exhaustion is a fatal sizing error,
/// not a runtime condition; there is no eviction because this is not a
/// cache. `reset` exists only for ephemeral per-frame table instances.
pub struct SlotAllocator {
    table: GpuDescriptorTable,
    cursor: u32,
    capacity: u32,
}

impl SlotAllocator {
    /// Create a slot allocator over a freshly created table.
    pub fn new(
        backend: &Arc<dyn GpuBackend>,
        desc: &DescriptorTableDescriptor,
    ) -> Result<Self, RenderError> {
        let table = backend.create_descriptor_table(desc)?;
        let capacity = table.capacity();
        Ok(Self {
            table,
            cursor: 0,
            capacity,
        })
    }

    /// The underlying binding table.
    pub fn table(&self) -> &GpuDescriptorTable {
        &self.table
    }

    /// Fixed slot capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots issued since creation (or the last reset).
    pub fn allocated(&self) -> u32 {
        self.cursor
    }

    /// Allocate the next free slot.
    ///
    /// Indices are issued in increasing order starting at zero. Fails with
    /// [`RenderError::TableExhausted`] when the table is full.
    pub fn allocate(&mut self) -> Result<DescriptorSlot, RenderError> {
        if self.cursor == self.capacity {
            return Err(RenderError::TableExhausted {
                capacity: self.capacity,
            });
        }

        let index = self.cursor;
        self.cursor += 1;

        let stride = self.table.element_stride();
        let cpu_handle = self.table.base_handle() + u64::from(index) * stride;
        let gpu_handle = if self.table.shader_visible() {
            self.table.base_handle() + u64::from(index) * stride
        } else {
            0
        };

        Ok(DescriptorSlot {
            index,
            cpu_handle,
            gpu_handle,
        })
    }

    /// Reset the cursor to zero.
    ///
    /// Only meaningful for ephemeral per-frame tables; the process-lifetime
    /// tables never call this.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl std::fmt::Debug for SlotAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotAllocator")
            .field("cursor", &self.cursor)
            .field("capacity", &self.capacity)
            .field("table", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::types::DescriptorTableKind;

    fn test_allocator(capacity: u32, shader_visible: bool) -> SlotAllocator {
        let backend: Arc<dyn GpuBackend> = Arc::new(SoftwareBackend::new());
        let kind = if shader_visible {
            DescriptorTableKind::Resource
        } else {
            DescriptorTableKind::RenderTarget
        };
        SlotAllocator::new(
            &backend,
            &DescriptorTableDescriptor::new(kind, capacity, shader_visible).with_label("test"),
        )
        .unwrap()
    }

    #[test]
    fn test_indices_increase_from_zero() {
        let mut slots = test_allocator(8, true);
        for expected in 0..8 {
            let slot = slots.allocate().unwrap();
            assert_eq!(slot.index, expected);
        }
    }

    #[test]
    fn test_capacity_four_scenario() {
        // Four allocations yield 0,1,2,3; a fifth fails.
        let mut slots = test_allocator(4, true);

        let indices: Vec<u32> = (0..4).map(|_| slots.allocate().unwrap().index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let err = slots.allocate().unwrap_err();
        assert!(matches!(err, RenderError::TableExhausted { capacity: 4 }));
        assert_eq!(slots.allocated(), 4);
    }

    #[test]
    fn test_handle_arithmetic() {
        let mut slots = test_allocator(16, true);
        let base = slots.table().base_handle();
        let stride = slots.table().element_stride();

        let s0 = slots.allocate().unwrap();
        let s1 = slots.allocate().unwrap();
        let s5 = {
            for _ in 0..3 {
                slots.allocate().unwrap();
            }
            slots.allocate().unwrap()
        };

        assert_eq!(s0.cpu_handle, base);
        assert_eq!(s1.cpu_handle, base + stride);
        assert_eq!(s5.cpu_handle, base + 5 * stride);
        assert_eq!(s1.gpu_handle, s1.cpu_handle);
    }

    #[test]
    fn test_cpu_only_table_has_no_gpu_handle() {
        let mut slots = test_allocator(4, false);
        let slot = slots.allocate().unwrap();
        assert_eq!(slot.gpu_handle, 0);
        assert_ne!(slot.cpu_handle, 0);
    }

    #[test]
    fn test_reset_for_ephemeral_tables() {
        let mut slots = test_allocator(2, true);
        slots.allocate().unwrap();
        slots.allocate().unwrap();
        assert!(slots.allocate().is_err());

        slots.reset();
        assert_eq!(slots.allocate().unwrap().index, 0);
    }
}
