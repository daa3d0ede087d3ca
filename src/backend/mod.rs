//! GPU backend abstraction layer.
//!
//! The rendering core consumes the graphics-device API as an opaque
//! capability: create resources, record commands, submit them, and observe
//! completion through a monotonically increasing fence. This module defines
//! that capability as the [`GpuBackend`] trait together with the handle
//! types it hands out.
//!
//! # Available Backends
//!
//! - [`software`]: executes command streams on the CPU. The default; used
//!   by tests and headless demos, and the reference for the synchronization
//!   contract (its fence completion can be held to simulate a slow GPU).
//! - `vulkan-backend` feature: native Vulkan backend using ash, with
//!   timeline-semaphore fences and a descriptor-indexing binding table.

pub mod software;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "vulkan-backend")]
use ash::vk;
#[cfg(feature = "vulkan-backend")]
use gpu_allocator::vulkan::Allocation;

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::state::TextureBarrier;
use crate::types::{
    BufferDescriptor, BufferViewDescriptor, DescriptorTableDescriptor, DescriptorTableKind,
    Extent3d, IndexFormat, PipelineDescriptor, TextureDescriptor, TextureFormat,
};

use self::software::{SoftwareCommand, SoftwareDescriptor, SoftwareFenceState, SoftwareListState};

/// Handle to a GPU buffer.
///
/// All buffers in this core live in CPU-writable, GPU-readable upload
/// memory; writes go through [`GpuBackend::write_buffer`].
pub enum GpuBuffer {
    /// Software backend buffer (plain host memory).
    Software {
        /// Backing storage.
        data: Mutex<Vec<u8>>,
        /// Synthetic GPU virtual address assigned by the backend.
        gpu_address: u64,
        /// Size in bytes.
        size: u64,
        /// Debug label.
        label: Option<String>,
    },
    /// Vulkan backend buffer with its mapped allocation.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        buffer: vk::Buffer,
        allocation: Mutex<Option<Allocation>>,
        gpu_address: u64,
        size: u64,
    },
}

impl GpuBuffer {
    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Software { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { size, .. } => *size,
        }
    }

    /// GPU virtual address of the start of the buffer.
    pub fn gpu_address(&self) -> u64 {
        match self {
            Self::Software { gpu_address, .. } => *gpu_address,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { gpu_address, .. } => *gpu_address,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software { size, label, .. } => f
                .debug_struct("GpuBuffer::Software")
                .field("size", size)
                .field("label", label)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, size, .. } => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", buffer)
                .field("size", size)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if let GpuBuffer::Vulkan {
            device,
            buffer,
            allocation,
            ..
        } = self
        {
            // The allocation is returned to the allocator when the backend drops.
            let _ = allocation.lock().take();
            unsafe {
                device.destroy_buffer(*buffer, None);
            }
        }
    }
}

/// Handle to a GPU texture.
pub enum GpuTexture {
    /// Software backend texture (row-major host storage, no row padding).
    Software {
        /// Backing texel storage, `width * height * bytes_per_pixel` bytes.
        data: Mutex<Vec<u8>>,
        /// Extent in texels.
        size: Extent3d,
        /// Texel format.
        format: TextureFormat,
        /// Debug label.
        label: Option<String>,
    },
    /// Vulkan backend texture.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        image: vk::Image,
        view: vk::ImageView,
        allocation: Mutex<Option<Allocation>>,
        format: vk::Format,
        extent: vk::Extent3D,
        /// Swapchain-owned images are destroyed by the swapchain, not here.
        owned: bool,
    },
}

impl GpuTexture {
    /// Extent of the texture in texels.
    pub fn size(&self) -> Extent3d {
        match self {
            Self::Software { size, .. } => *size,
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { extent, .. } => Extent3d {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            },
        }
    }
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software {
                size,
                format,
                label,
                ..
            } => f
                .debug_struct("GpuTexture::Software")
                .field("size", size)
                .field("format", format)
                .field("label", label)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan {
                image,
                format,
                extent,
                ..
            } => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", image)
                .field("format", format)
                .field("extent", extent)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let GpuTexture::Vulkan {
            device,
            image,
            view,
            allocation,
            owned,
            ..
        } = self
        {
            let _ = allocation.lock().take();
            unsafe {
                device.destroy_image_view(*view, None);
                if *owned {
                    device.destroy_image(*image, None);
                }
            }
        }
    }
}

/// Handle to a fence: a monotonically increasing GPU-to-CPU completion
/// counter. The CPU can query the highest value the GPU has reached and
/// block until a target value is reached.
pub enum GpuFence {
    /// Software backend fence.
    Software {
        /// Shared completion state (condvar-backed).
        state: Arc<SoftwareFenceState>,
    },
    /// Vulkan timeline semaphore.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        semaphore: vk::Semaphore,
    },
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software { state } => f
                .debug_struct("GpuFence::Software")
                .field("completed", &state.completed_value())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { semaphore, .. } => f
                .debug_struct("GpuFence::Vulkan")
                .field("semaphore", semaphore)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuFence {
    fn drop(&mut self) {
        if let GpuFence::Vulkan { device, semaphore } = self {
            unsafe {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

/// Handle to a binding table: a fixed-capacity array of resource
/// descriptors that shaders (or the CPU, for render targets) address by
/// integer index.
pub enum GpuDescriptorTable {
    /// Software backend table.
    Software {
        /// Kind of descriptors held.
        kind: DescriptorTableKind,
        /// Fixed slot capacity.
        capacity: u32,
        /// Whether slots are indexable from shaders.
        shader_visible: bool,
        /// Synthetic base handle.
        base_handle: u64,
        /// Synthetic handle stride.
        stride: u64,
        /// Written descriptors, indexed by slot.
        entries: Mutex<Vec<Option<SoftwareDescriptor>>>,
    },
    /// Vulkan descriptor-indexing table (resource views). The set layout
    /// is owned by the backend, shared with every pipeline layout.
    #[cfg(feature = "vulkan-backend")]
    VulkanResource {
        device: ash::Device,
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
        capacity: u32,
    },
    /// Vulkan render-target-view table (CPU-side bookkeeping only).
    #[cfg(feature = "vulkan-backend")]
    VulkanRenderTarget {
        capacity: u32,
        targets: Mutex<Vec<Option<vulkan::RenderTargetEntry>>>,
    },
}

impl GpuDescriptorTable {
    /// Fixed slot capacity of the table.
    pub fn capacity(&self) -> u32 {
        match self {
            Self::Software { capacity, .. } => *capacity,
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanResource { capacity, .. } => *capacity,
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanRenderTarget { capacity, .. } => *capacity,
        }
    }

    /// Base handle for slot 0. The handle of slot `i` is
    /// `base_handle() + i * element_stride()`.
    pub fn base_handle(&self) -> u64 {
        match self {
            Self::Software { base_handle, .. } => *base_handle,
            #[cfg(feature = "vulkan-backend")]
            _ => 0,
        }
    }

    /// Handle stride between adjacent slots, queried from the underlying
    /// API at table creation.
    pub fn element_stride(&self) -> u64 {
        match self {
            Self::Software { stride, .. } => *stride,
            // Vulkan addresses slots by bare index.
            #[cfg(feature = "vulkan-backend")]
            _ => 1,
        }
    }

    /// Whether slots are directly indexable from GPU-executed code.
    pub fn shader_visible(&self) -> bool {
        match self {
            Self::Software { shader_visible, .. } => *shader_visible,
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanResource { .. } => true,
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanRenderTarget { .. } => false,
        }
    }
}

impl std::fmt::Debug for GpuDescriptorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software {
                kind,
                capacity,
                shader_visible,
                ..
            } => f
                .debug_struct("GpuDescriptorTable::Software")
                .field("kind", kind)
                .field("capacity", capacity)
                .field("shader_visible", shader_visible)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanResource { capacity, set, .. } => f
                .debug_struct("GpuDescriptorTable::VulkanResource")
                .field("capacity", capacity)
                .field("set", set)
                .finish_non_exhaustive(),
            #[cfg(feature = "vulkan-backend")]
            Self::VulkanRenderTarget { capacity, .. } => f
                .debug_struct("GpuDescriptorTable::VulkanRenderTarget")
                .field("capacity", capacity)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuDescriptorTable {
    fn drop(&mut self) {
        if let GpuDescriptorTable::VulkanResource { device, pool, .. } = self {
            unsafe {
                device.destroy_descriptor_pool(*pool, None);
            }
        }
    }
}

/// Handle to a graphics pipeline.
pub enum GpuPipeline {
    /// Software backend pipeline (bytecode is validated, then discarded).
    Software {
        /// Debug label.
        label: Option<String>,
    },
    /// Vulkan graphics pipeline.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
}

impl std::fmt::Debug for GpuPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software { label } => f
                .debug_struct("GpuPipeline::Software")
                .field("label", label)
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { pipeline, .. } => f
                .debug_struct("GpuPipeline::Vulkan")
                .field("pipeline", pipeline)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuPipeline {
    fn drop(&mut self) {
        if let GpuPipeline::Vulkan {
            device,
            pipeline,
            layout,
        } = self
        {
            unsafe {
                device.destroy_pipeline(*pipeline, None);
                device.destroy_pipeline_layout(*layout, None);
            }
        }
    }
}

/// Handle to a command-recording context.
///
/// One list is owned by each frame slot; it is reopened by `begin_frame`
/// and closed and submitted by `end_frame`.
pub enum GpuCommandList {
    /// Software backend command stream.
    Software {
        /// Recorded commands, drained on submit.
        commands: Mutex<Vec<SoftwareCommand>>,
        /// Open/closed recording state.
        state: Mutex<SoftwareListState>,
    },
    /// Vulkan command buffer.
    #[cfg(feature = "vulkan-backend")]
    Vulkan {
        device: ash::Device,
        pool: vk::CommandPool,
        buffer: vk::CommandBuffer,
        /// Layout of the currently bound pipeline, needed for push constants.
        bound_layout: Mutex<Option<vk::PipelineLayout>>,
    },
}

impl std::fmt::Debug for GpuCommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software { commands, .. } => f
                .debug_struct("GpuCommandList::Software")
                .field("recorded", &commands.lock().len())
                .finish(),
            #[cfg(feature = "vulkan-backend")]
            Self::Vulkan { buffer, .. } => f
                .debug_struct("GpuCommandList::Vulkan")
                .field("buffer", buffer)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(feature = "vulkan-backend")]
impl Drop for GpuCommandList {
    fn drop(&mut self) {
        if let GpuCommandList::Vulkan {
            device,
            pool,
            buffer,
            ..
        } = self
        {
            unsafe {
                device.free_command_buffers(*pool, &[*buffer]);
            }
        }
    }
}

/// GPU capability provider consumed by the rendering core.
///
/// Implementations expose resource creation, command recording, a single
/// serializing submission queue, and a monotonically increasing completion
/// fence. Submissions complete in program order, so `completed >= v` proves
/// every submission up to and including the one that signaled `v` has
/// finished.
pub trait GpuBackend: Send + Sync + 'static {
    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Create a CPU-writable, GPU-readable buffer.
    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Arc<GpuBuffer>, RenderError>;

    /// Create a texture.
    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, RenderError>;

    /// Write bytes into a buffer at the given offset.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
        -> Result<(), RenderError>;

    /// Read bytes back from a buffer.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8>;

    /// Create a binding table.
    fn create_descriptor_table(
        &self,
        desc: &DescriptorTableDescriptor,
    ) -> Result<GpuDescriptorTable, RenderError>;

    /// Write a structured-buffer view into a resource-table slot.
    fn write_buffer_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        buffer: &Arc<GpuBuffer>,
        view: &BufferViewDescriptor,
    ) -> Result<(), RenderError>;

    /// Write a sampled-texture view into a resource-table slot.
    fn write_texture_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError>;

    /// Write a render-target view into a render-target-table slot.
    fn write_render_target_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError>;

    /// Create a graphics pipeline.
    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<Arc<GpuPipeline>, RenderError>;

    /// Create a command-recording context. Lists start closed.
    fn create_command_list(&self) -> Result<GpuCommandList, RenderError>;

    /// Reopen a command list for recording, discarding prior contents.
    fn begin_commands(&self, list: &GpuCommandList) -> Result<(), RenderError>;

    /// Close a command list; it must be open.
    fn end_commands(&self, list: &GpuCommandList) -> Result<(), RenderError>;

    /// Record a resource state transition.
    fn record_barrier(&self, list: &GpuCommandList, barrier: &TextureBarrier);

    /// Record the start of a render pass targeting the render-target view
    /// in `table` at `slot`, clearing it to `clear_color`. The viewport and
    /// scissor are set to the full target extent.
    fn record_begin_render_pass(
        &self,
        list: &GpuCommandList,
        table: &GpuDescriptorTable,
        slot: u32,
        clear_color: [f32; 4],
    );

    /// Record the end of the current render pass.
    fn record_end_render_pass(&self, list: &GpuCommandList);

    /// Record a pipeline bind.
    fn record_set_pipeline(&self, list: &GpuCommandList, pipeline: &Arc<GpuPipeline>);

    /// Record a push-constant update at a byte offset into the push range.
    fn record_push_constants(&self, list: &GpuCommandList, offset: u32, data: &[u8]);

    /// Record an index buffer bind.
    fn record_set_index_buffer(
        &self,
        list: &GpuCommandList,
        buffer: &Arc<GpuBuffer>,
        offset: u64,
        format: IndexFormat,
    );

    /// Record an indexed draw.
    fn record_draw_indexed(
        &self,
        list: &GpuCommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    );

    /// Record a buffer-to-texture copy. `src_offset` must honor
    /// [`TEXTURE_PLACEMENT_ALIGNMENT`](crate::types::TEXTURE_PLACEMENT_ALIGNMENT)
    /// and `bytes_per_row` must honor
    /// [`ROW_PITCH_ALIGNMENT`](crate::types::ROW_PITCH_ALIGNMENT).
    fn record_copy_buffer_to_texture(
        &self,
        list: &GpuCommandList,
        src: &Arc<GpuBuffer>,
        src_offset: u64,
        bytes_per_row: u64,
        dst: &Arc<GpuTexture>,
    );

    /// Submit a closed command list to the queue.
    fn submit(&self, list: &GpuCommandList) -> Result<(), RenderError>;

    /// Present the given texture to the surface, if one exists.
    fn present(&self, texture: &Arc<GpuTexture>) -> Result<(), RenderError>;

    /// Create a fence initialized to the given value.
    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, RenderError>;

    /// Query the highest value the fence has reached.
    fn fence_completed_value(&self, fence: &GpuFence) -> u64;

    /// Block until the fence reaches `value`. No timeout; a wait error
    /// maps to [`RenderError::DeviceLost`].
    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError>;

    /// Signal the fence to `value` from the queue. The signal completes
    /// when previously submitted work finishes, not immediately.
    fn signal_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError>;
}

/// Select and create a backend for the given configuration.
///
/// Tries the native Vulkan backend when the feature is enabled, falling
/// back to the software backend.
pub fn create_backend(config: &RenderConfig) -> Result<Arc<dyn GpuBackend>, RenderError> {
    #[cfg(feature = "vulkan-backend")]
    {
        match vulkan::VulkanBackend::new(config) {
            Ok(backend) => {
                log::info!("Using Vulkan backend (ash)");
                return Ok(Arc::new(backend));
            }
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
            }
        }
    }

    let _ = config;
    log::info!("Using software backend");
    Ok(Arc::new(software::SoftwareBackend::new()))
}
