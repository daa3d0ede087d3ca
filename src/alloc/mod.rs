//! Allocators for per-frame transient memory and binding-table slots.
//!
//! Both allocators are bump pointers: they only ever move a cursor forward
//! and reclaim wholesale (the linear allocator every frame, the slot
//! allocator never during normal operation).

pub mod linear;
pub mod slots;

pub use linear::{LinearAllocator, TransientAllocation};
pub use slots::{DescriptorSlot, SlotAllocator};
