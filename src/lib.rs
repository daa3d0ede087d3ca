//! # render-core
//!
//! Per-frame resource and synchronization core for a real-time GPU
//! renderer: lifetime of CPU-writable GPU memory, allocation of
//! shader-visible binding-table slots, and pacing between CPU frame
//! production and GPU frame consumption.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`LinearAllocator`] - bump allocator over per-frame upload memory
//! - [`SlotAllocator`] - bump allocator over fixed-capacity binding tables
//! - [`transition`] - resource state tracking with minimal barriers
//! - [`FrameRing`] - N frame contexts paced by a monotonic fence
//! - [`RenderDevice`] - the orchestrating context object
//! - [`GpuBackend`] - the graphics-API seam, with a software backend for
//!   tests and headless use and a native Vulkan backend behind the
//!   `vulkan-backend` feature
//!
//! ## Example
//!
//! ```
//! use render_core::{RenderConfig, RenderDevice};
//!
//! let mut device = RenderDevice::create(RenderConfig::default()).unwrap();
//! device.begin_frame().unwrap();
//! // Allocate transient memory, record draws...
//! device.end_frame().unwrap();
//! ```

pub mod alloc;
pub mod backend;
pub mod bounded;
pub mod compiler;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod state;
pub mod types;

// Re-export main types for convenience
pub use alloc::{DescriptorSlot, LinearAllocator, SlotAllocator, TransientAllocation};
pub use backend::{
    create_backend, GpuBackend, GpuBuffer, GpuCommandList, GpuDescriptorTable, GpuFence,
    GpuPipeline, GpuTexture,
};
pub use bounded::BoundedList;
pub use compiler::{ShaderCompiler, ShaderStage};
pub use config::RenderConfig;
pub use device::RenderDevice;
pub use error::RenderError;
pub use frame::{FrameContext, FrameRing};
pub use state::{transition, ResourceState, TextureBarrier};
pub use types::{
    BufferDescriptor, BufferUsage, BufferViewDescriptor, DescriptorTableDescriptor,
    DescriptorTableKind, Extent3d, IndexFormat, PipelineDescriptor, TextureDescriptor,
    TextureFormat, TextureUsage,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_create_default_device() {
        let device = RenderDevice::create(RenderConfig::default()).unwrap();
        assert_eq!(device.frame_counter(), 0);
    }
}
