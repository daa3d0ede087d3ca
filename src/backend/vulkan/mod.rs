//! Native Vulkan backend using ash.
//!
//! Maps the core's capability contract onto Vulkan 1.3: the fence is a
//! timeline semaphore, the shader-visible binding table is one
//! descriptor-indexing set (storage buffers at binding 0, sampled images
//! at binding 1) with update-after-bind, upload buffers are persistently
//! mapped CpuToGpu allocations with buffer device addresses, and render
//! passes use dynamic rendering. Presentation blits the core's finished
//! target onto a swapchain image, so the frame ring keeps exclusive
//! ownership of its presentable textures.

mod device;
mod instance;
mod surface;

use std::ffi::CString;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::state::{ResourceState, TextureBarrier};
use crate::types::{
    BufferDescriptor, BufferUsage, BufferViewDescriptor, DescriptorTableDescriptor,
    DescriptorTableKind, IndexFormat, PipelineDescriptor, TextureDescriptor, TextureFormat,
    TextureUsage,
};

use super::{
    GpuBackend, GpuBuffer, GpuCommandList, GpuDescriptorTable, GpuFence, GpuPipeline, GpuTexture,
};

/// Resource-table binding index for storage-buffer views.
const BINDING_BUFFERS: u32 = 0;
/// Resource-table binding index for sampled-image views.
const BINDING_TEXTURES: u32 = 1;
/// Size of the push-constant range shared by all pipelines, in bytes.
const PUSH_CONSTANT_SIZE: u32 = 128;

/// A render-target view registered in a render-target table.
#[derive(Debug, Clone, Copy)]
pub struct RenderTargetEntry {
    /// Color attachment view.
    pub view: vk::ImageView,
    /// Target extent for viewport and scissor.
    pub extent: vk::Extent2D,
}

/// Vulkan-based GPU backend.
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    queue_family: u32,
    /// Vulkan queues require external synchronization.
    queue_lock: Mutex<()>,
    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    command_pool: vk::CommandPool,
    dynamic_rendering: ash::khr::dynamic_rendering::Device,
    /// Layout of the single shader-visible binding table.
    bindless_layout: vk::DescriptorSetLayout,
    /// The table's descriptor set, registered when the table is created.
    bindless_set: Mutex<Option<vk::DescriptorSet>>,
    /// Slot capacity the bindless layout was built for.
    resource_capacity: u32,
    surface: Mutex<Option<surface::SurfaceState>>,
    validation: bool,
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("validation", &self.validation)
            .field("resource_capacity", &self.resource_capacity)
            .finish_non_exhaustive()
    }
}

impl VulkanBackend {
    /// Create a headless Vulkan backend.
    pub fn new(config: &RenderConfig) -> Result<Self, RenderError> {
        Self::create(config, None)
    }

    /// Create a Vulkan backend that presents to the given window.
    pub fn new_windowed(
        config: &RenderConfig,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self, RenderError> {
        Self::create(config, Some((display, window)))
    }

    fn create(
        config: &RenderConfig,
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
    ) -> Result<Self, RenderError> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let (instance, debug) =
            instance::create_instance(&entry, config.validation, window.map(|(d, _)| d))?;

        let physical_device = device::select_physical_device(&instance)?;
        let queue_family = device::find_graphics_queue_family(&instance, physical_device)?;
        let device = device::create_logical_device(&instance, physical_device, queue_family)?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
                RenderError::InitializationFailed(format!(
                    "Failed to create command pool: {:?}",
                    e
                ))
            })?;

        let dynamic_rendering = ash::khr::dynamic_rendering::Device::new(&instance, &device);

        let bindless_layout =
            create_bindless_layout(&device, config.resource_table_capacity)?;

        let surface_state = match window {
            Some((display, window)) => {
                let surface = unsafe {
                    ash_window::create_surface(&entry, &instance, display, window, None)
                }
                .map_err(|e| {
                    RenderError::InitializationFailed(format!(
                        "Failed to create surface: {:?}",
                        e
                    ))
                })?;
                Some(surface::SurfaceState::new(
                    &entry,
                    &instance,
                    physical_device,
                    &device,
                    queue_family,
                    command_pool,
                    surface,
                    config.width,
                    config.height,
                )?)
            }
            None => None,
        };

        log::info!(
            "Vulkan backend initialized (validation: {}, windowed: {})",
            config.validation,
            surface_state.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug,
            physical_device,
            device,
            queue,
            queue_family,
            queue_lock: Mutex::new(()),
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
            command_pool,
            dynamic_rendering,
            bindless_layout,
            bindless_set: Mutex::new(None),
            resource_capacity: config.resource_table_capacity,
            surface: Mutex::new(surface_state),
            validation: config.validation,
        })
    }

    /// The Vulkan logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The Vulkan entry points.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The graphics queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    fn pipeline_layout_for(&self, list: &GpuCommandList) -> Option<vk::PipelineLayout> {
        match list {
            GpuCommandList::Vulkan { bound_layout, .. } => *bound_layout.lock(),
            _ => None,
        }
    }
}

fn create_bindless_layout(
    device: &ash::Device,
    capacity: u32,
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_BUFFERS)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
        vk::DescriptorSetLayoutBinding::default()
            .binding(BINDING_TEXTURES)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .descriptor_count(capacity)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT),
    ];

    let flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 2];
    let mut binding_flags =
        vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);

    let create_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(&bindings)
        .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
        .push_next(&mut binding_flags);

    unsafe { device.create_descriptor_set_layout(&create_info, None) }.map_err(|e| {
        RenderError::InitializationFailed(format!(
            "Failed to create bindless set layout: {:?}",
            e
        ))
    })
}

/// Convert a texture format to its Vulkan equivalent.
fn convert_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
    }
}

/// Convert buffer usage flags to Vulkan usage flags.
///
/// Device addresses are always enabled; transient allocations hand their
/// addresses to shaders through push constants.
fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    if usage.contains(BufferUsage::SHADER_RESOURCE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    result
}

/// Convert texture usage flags to Vulkan usage flags.
fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::PRESENT) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    result
}

/// Image layout a resource state maps to.
///
/// `Present` maps to the transfer-source layout because presentation blits
/// the finished target onto the swapchain image.
fn convert_layout(state: ResourceState) -> vk::ImageLayout {
    match state {
        ResourceState::Common => vk::ImageLayout::UNDEFINED,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::CopySrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::ShaderResource => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::Present => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    }
}

fn convert_access(state: ResourceState) -> vk::AccessFlags {
    match state {
        ResourceState::Common => vk::AccessFlags::empty(),
        ResourceState::RenderTarget => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ResourceState::CopySrc => vk::AccessFlags::TRANSFER_READ,
        ResourceState::CopyDst => vk::AccessFlags::TRANSFER_WRITE,
        ResourceState::ShaderResource => vk::AccessFlags::SHADER_READ,
        ResourceState::Present => vk::AccessFlags::TRANSFER_READ,
    }
}

fn convert_stage(state: ResourceState) -> vk::PipelineStageFlags {
    match state {
        ResourceState::Common => vk::PipelineStageFlags::TOP_OF_PIPE,
        ResourceState::RenderTarget => vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ResourceState::CopySrc | ResourceState::CopyDst | ResourceState::Present => {
            vk::PipelineStageFlags::TRANSFER
        }
        ResourceState::ShaderResource => vk::PipelineStageFlags::FRAGMENT_SHADER,
    }
}

fn create_shader_module(
    device: &ash::Device,
    words: &[u32],
    what: &str,
) -> Result<vk::ShaderModule, RenderError> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(words);
    unsafe { device.create_shader_module(&create_info, None) }.map_err(|e| {
        RenderError::ResourceCreationFailed(format!(
            "Failed to create {} shader module: {:?}",
            what, e
        ))
    })
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Arc<GpuBuffer>, RenderError> {
        if desc.size == 0 {
            return Err(RenderError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(convert_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&create_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("buffer"),
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_buffer(buffer, None) };
                RenderError::ResourceCreationFailed(format!("Buffer allocation failed: {}", e))
            })?;

        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to bind buffer memory: {:?}", e))
        })?;

        let address_info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        let gpu_address = unsafe { self.device.get_buffer_device_address(&address_info) };

        log::trace!(
            "VulkanBackend: created buffer {:?} (size: {})",
            desc.label,
            desc.size
        );

        Ok(Arc::new(GpuBuffer::Vulkan {
            device: self.device.clone(),
            buffer,
            allocation: Mutex::new(Some(allocation)),
            gpu_address,
            size: desc.size,
        }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, RenderError> {
        if desc.size.width == 0 || desc.size.height == 0 {
            return Err(RenderError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }

        let format = convert_format(desc.format);
        let extent = vk::Extent3D {
            width: desc.size.width,
            height: desc.size.height,
            depth: desc.size.depth,
        };

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("texture"),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                unsafe { self.device.destroy_image(image, None) };
                RenderError::ResourceCreationFailed(format!("Image allocation failed: {}", e))
            })?;

        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to bind image memory: {:?}", e))
        })?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        log::trace!(
            "VulkanBackend: created texture {:?} ({}x{})",
            desc.label,
            desc.size.width,
            desc.size.height
        );

        Ok(Arc::new(GpuTexture::Vulkan {
            device: self.device.clone(),
            image,
            view,
            allocation: Mutex::new(Some(allocation)),
            format,
            extent,
            owned: true,
        }))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let GpuBuffer::Vulkan {
            allocation, size, ..
        } = buffer
        else {
            return Err(RenderError::InvalidParameter(
                "buffer does not belong to the Vulkan backend".to_string(),
            ));
        };

        if offset + data.len() as u64 > *size {
            return Err(RenderError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                size
            )));
        }

        let guard = allocation.lock();
        let mapped_ptr = guard
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .ok_or_else(|| {
                RenderError::Internal("upload buffer is not CPU-mapped".to_string())
            })?;

        // SAFETY: the range was bounds-checked against the buffer size and
        // the allocation stays mapped for its whole lifetime.
        unsafe {
            let dst = mapped_ptr.as_ptr().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        let GpuBuffer::Vulkan {
            allocation,
            size: buffer_size,
            ..
        } = buffer
        else {
            return Vec::new();
        };

        if offset + size > *buffer_size {
            return Vec::new();
        }

        let guard = allocation.lock();
        if let Some(mapped_ptr) = guard.as_ref().and_then(|a| a.mapped_ptr()) {
            let mut result = vec![0u8; size as usize];
            // SAFETY: the range was bounds-checked against the buffer size.
            unsafe {
                let src = mapped_ptr.as_ptr().add(offset as usize);
                std::ptr::copy_nonoverlapping(src as *const u8, result.as_mut_ptr(), size as usize);
            }
            return result;
        }
        Vec::new()
    }

    fn create_descriptor_table(
        &self,
        desc: &DescriptorTableDescriptor,
    ) -> Result<GpuDescriptorTable, RenderError> {
        match desc.kind {
            DescriptorTableKind::RenderTarget => Ok(GpuDescriptorTable::VulkanRenderTarget {
                capacity: desc.capacity,
                targets: Mutex::new(vec![None; desc.capacity as usize]),
            }),
            DescriptorTableKind::Resource => {
                if desc.capacity != self.resource_capacity {
                    return Err(RenderError::InvalidParameter(format!(
                        "resource table capacity {} does not match the configured {}",
                        desc.capacity, self.resource_capacity
                    )));
                }

                let pool_sizes = [
                    vk::DescriptorPoolSize {
                        ty: vk::DescriptorType::STORAGE_BUFFER,
                        descriptor_count: desc.capacity,
                    },
                    vk::DescriptorPoolSize {
                        ty: vk::DescriptorType::SAMPLED_IMAGE,
                        descriptor_count: desc.capacity,
                    },
                ];
                let pool_info = vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                    .max_sets(1)
                    .pool_sizes(&pool_sizes);
                let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }
                    .map_err(|e| {
                        RenderError::ResourceCreationFailed(format!(
                            "Failed to create descriptor pool: {:?}",
                            e
                        ))
                    })?;

                let layouts = [self.bindless_layout];
                let alloc_info = vk::DescriptorSetAllocateInfo::default()
                    .descriptor_pool(pool)
                    .set_layouts(&layouts);
                let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
                    .map_err(|e| {
                        unsafe { self.device.destroy_descriptor_pool(pool, None) };
                        RenderError::ResourceCreationFailed(format!(
                            "Failed to allocate bindless set: {:?}",
                            e
                        ))
                    })?[0];

                *self.bindless_set.lock() = Some(set);

                log::trace!(
                    "VulkanBackend: created bindless table {:?} ({} slots)",
                    desc.label,
                    desc.capacity
                );

                Ok(GpuDescriptorTable::VulkanResource {
                    device: self.device.clone(),
                    pool,
                    set,
                    capacity: desc.capacity,
                })
            }
        }
    }

    fn write_buffer_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        buffer: &Arc<GpuBuffer>,
        view: &BufferViewDescriptor,
    ) -> Result<(), RenderError> {
        let GpuDescriptorTable::VulkanResource { set, capacity, .. } = table else {
            return Err(RenderError::InvalidParameter(
                "buffer views require a resource table".to_string(),
            ));
        };
        if index >= *capacity {
            return Err(RenderError::InvalidParameter(format!(
                "descriptor index {} out of range (capacity {})",
                index, capacity
            )));
        }
        let GpuBuffer::Vulkan { buffer: raw, .. } = buffer.as_ref() else {
            return Err(RenderError::InvalidParameter(
                "buffer does not belong to the Vulkan backend".to_string(),
            ));
        };

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: *raw,
            offset: view.first_element * view.element_stride,
            range: view.element_count * view.element_stride,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(*set)
            .dst_binding(BINDING_BUFFERS)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);

        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn write_texture_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError> {
        let GpuDescriptorTable::VulkanResource { set, capacity, .. } = table else {
            return Err(RenderError::InvalidParameter(
                "texture views require a resource table".to_string(),
            ));
        };
        if index >= *capacity {
            return Err(RenderError::InvalidParameter(format!(
                "descriptor index {} out of range (capacity {})",
                index, capacity
            )));
        }
        let GpuTexture::Vulkan { view, .. } = texture.as_ref() else {
            return Err(RenderError::InvalidParameter(
                "texture does not belong to the Vulkan backend".to_string(),
            ));
        };

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: *view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(*set)
            .dst_binding(BINDING_TEXTURES)
            .dst_array_element(index)
            .descriptor_type(vk::DescriptorType::SAMPLED_IMAGE)
            .image_info(&image_info);

        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    fn write_render_target_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError> {
        let GpuDescriptorTable::VulkanRenderTarget { capacity, targets } = table else {
            return Err(RenderError::InvalidParameter(
                "render-target views require a render-target table".to_string(),
            ));
        };
        if index >= *capacity {
            return Err(RenderError::InvalidParameter(format!(
                "descriptor index {} out of range (capacity {})",
                index, capacity
            )));
        }
        let GpuTexture::Vulkan { view, extent, .. } = texture.as_ref() else {
            return Err(RenderError::InvalidParameter(
                "texture does not belong to the Vulkan backend".to_string(),
            ));
        };

        targets.lock()[index as usize] = Some(RenderTargetEntry {
            view: *view,
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        });
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<Arc<GpuPipeline>, RenderError> {
        let vs_module = create_shader_module(&self.device, &desc.vertex_shader, "vertex")?;
        let fs_module = create_shader_module(&self.device, &desc.fragment_shader, "fragment")?;

        let vs_entry = CString::new(desc.vertex_entry.as_str())
            .map_err(|_| RenderError::InvalidParameter("bad vertex entry name".to_string()))?;
        let fs_entry = CString::new(desc.fragment_entry.as_str())
            .map_err(|_| RenderError::InvalidParameter("bad fragment entry name".to_string()))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vs_module)
                .name(&vs_entry),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fs_module)
                .name(&fs_entry),
        ];

        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];
        let set_layouts = [self.bindless_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create pipeline layout: {:?}",
                    e
                ))
            })?;

        // Vertex pulling through the bindless table; no vertex input state.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachment = if desc.alpha_blend {
            vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::ONE)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_DST_ALPHA)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD)
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        } else {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
        };
        let blend_attachments = [blend_attachment];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [convert_format(desc.color_format)];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };

        unsafe {
            self.device.destroy_shader_module(vs_module, None);
            self.device.destroy_shader_module(fs_module, None);
        }

        let pipeline = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(RenderError::ResourceCreationFailed(format!(
                    "Failed to create graphics pipeline: {:?}",
                    e
                )));
            }
        };

        log::trace!("VulkanBackend: created pipeline {:?}", desc.label);

        Ok(Arc::new(GpuPipeline::Vulkan {
            device: self.device.clone(),
            pipeline,
            layout,
        }))
    }

    fn create_command_list(&self) -> Result<GpuCommandList, RenderError> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to allocate command buffer: {:?}",
                    e
                ))
            })?[0];

        Ok(GpuCommandList::Vulkan {
            device: self.device.clone(),
            pool: self.command_pool,
            buffer,
            bound_layout: Mutex::new(None),
        })
    }

    fn begin_commands(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let GpuCommandList::Vulkan {
            buffer,
            bound_layout,
            ..
        } = list
        else {
            return Err(RenderError::InvalidParameter(
                "command list does not belong to the Vulkan backend".to_string(),
            ));
        };

        *bound_layout.lock() = None;
        unsafe {
            self.device
                .reset_command_buffer(*buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    RenderError::Internal(format!("Failed to reset command buffer: {:?}", e))
                })?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(*buffer, &begin_info)
                .map_err(|e| {
                    RenderError::Internal(format!("Failed to begin command buffer: {:?}", e))
                })
        }
    }

    fn end_commands(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return Err(RenderError::InvalidParameter(
                "command list does not belong to the Vulkan backend".to_string(),
            ));
        };

        unsafe { self.device.end_command_buffer(*buffer) }.map_err(|e| {
            RenderError::Internal(format!("Failed to end command buffer: {:?}", e))
        })
    }

    fn record_barrier(&self, list: &GpuCommandList, barrier: &TextureBarrier) {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return;
        };
        let GpuTexture::Vulkan { image, .. } = barrier.texture.as_ref() else {
            return;
        };

        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(convert_layout(barrier.before))
            .new_layout(convert_layout(barrier.after))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(*image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(convert_access(barrier.before))
            .dst_access_mask(convert_access(barrier.after));

        unsafe {
            self.device.cmd_pipeline_barrier(
                *buffer,
                convert_stage(barrier.before),
                convert_stage(barrier.after),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn record_begin_render_pass(
        &self,
        list: &GpuCommandList,
        table: &GpuDescriptorTable,
        slot: u32,
        clear_color: [f32; 4],
    ) {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return;
        };
        let GpuDescriptorTable::VulkanRenderTarget { targets, .. } = table else {
            return;
        };
        let Some(Some(entry)) = targets.lock().get(slot as usize).copied() else {
            log::error!(
                "VulkanBackend: render pass opened on empty render-target slot {}",
                slot
            );
            return;
        };

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(entry.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            })];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: entry.extent,
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: entry.extent.width as f32,
            height: entry.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.dynamic_rendering
                .cmd_begin_rendering(*buffer, &rendering_info);
            self.device.cmd_set_viewport(*buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(*buffer, 0, &[render_area]);
        }
    }

    fn record_end_render_pass(&self, list: &GpuCommandList) {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return;
        };
        unsafe {
            self.dynamic_rendering.cmd_end_rendering(*buffer);
        }
    }

    fn record_set_pipeline(&self, list: &GpuCommandList, pipeline: &Arc<GpuPipeline>) {
        let GpuCommandList::Vulkan {
            buffer,
            bound_layout,
            ..
        } = list
        else {
            return;
        };
        let GpuPipeline::Vulkan {
            pipeline: raw,
            layout,
            ..
        } = pipeline.as_ref()
        else {
            return;
        };

        unsafe {
            self.device
                .cmd_bind_pipeline(*buffer, vk::PipelineBindPoint::GRAPHICS, *raw);
            if let Some(set) = *self.bindless_set.lock() {
                self.device.cmd_bind_descriptor_sets(
                    *buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    *layout,
                    0,
                    &[set],
                    &[],
                );
            }
        }
        *bound_layout.lock() = Some(*layout);
    }

    fn record_push_constants(&self, list: &GpuCommandList, offset: u32, data: &[u8]) {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return;
        };
        let Some(layout) = self.pipeline_layout_for(list) else {
            log::error!("VulkanBackend: push constants recorded before a pipeline bind");
            return;
        };

        unsafe {
            self.device.cmd_push_constants(
                *buffer,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                offset,
                data,
            );
        }
    }

    fn record_set_index_buffer(
        &self,
        list: &GpuCommandList,
        buffer: &Arc<GpuBuffer>,
        offset: u64,
        format: IndexFormat,
    ) {
        let GpuCommandList::Vulkan { buffer: cmd, .. } = list else {
            return;
        };
        let GpuBuffer::Vulkan { buffer: raw, .. } = buffer.as_ref() else {
            return;
        };

        let index_type = match format {
            IndexFormat::Uint16 => vk::IndexType::UINT16,
            IndexFormat::Uint32 => vk::IndexType::UINT32,
        };
        unsafe {
            self.device
                .cmd_bind_index_buffer(*cmd, *raw, offset, index_type);
        }
    }

    fn record_draw_indexed(
        &self,
        list: &GpuCommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    ) {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return;
        };
        unsafe {
            self.device
                .cmd_draw_indexed(*buffer, index_count, instance_count, first_index, 0, 0);
        }
    }

    fn record_copy_buffer_to_texture(
        &self,
        list: &GpuCommandList,
        src: &Arc<GpuBuffer>,
        src_offset: u64,
        bytes_per_row: u64,
        dst: &Arc<GpuTexture>,
    ) {
        let GpuCommandList::Vulkan { buffer: cmd, .. } = list else {
            return;
        };
        let GpuBuffer::Vulkan { buffer: raw, .. } = src.as_ref() else {
            return;
        };
        let GpuTexture::Vulkan { image, extent, .. } = dst.as_ref() else {
            return;
        };

        // All supported color formats are 4 bytes per texel.
        let row_length_texels = (bytes_per_row / 4) as u32;

        let region = vk::BufferImageCopy {
            buffer_offset: src_offset,
            buffer_row_length: row_length_texels,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: *extent,
        };

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                *cmd,
                *raw,
                *image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn submit(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let GpuCommandList::Vulkan { buffer, .. } = list else {
            return Err(RenderError::InvalidParameter(
                "command list does not belong to the Vulkan backend".to_string(),
            ));
        };

        let command_buffers = [*buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let _guard = self.queue_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| RenderError::Internal(format!("Queue submit failed: {:?}", e)))
    }

    fn present(&self, texture: &Arc<GpuTexture>) -> Result<(), RenderError> {
        let mut surface = self.surface.lock();
        let Some(surface) = surface.as_mut() else {
            // Headless: nothing to present to.
            return Ok(());
        };
        let GpuTexture::Vulkan { image, extent, .. } = texture.as_ref() else {
            return Err(RenderError::InvalidParameter(
                "texture does not belong to the Vulkan backend".to_string(),
            ));
        };

        let _guard = self.queue_lock.lock();
        surface.present(self.queue, *image, *extent)
    }

    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, RenderError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { self.device.create_semaphore(&create_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to create timeline semaphore: {:?}",
                    e
                ))
            })?;

        Ok(GpuFence::Vulkan {
            device: self.device.clone(),
            semaphore,
        })
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        let GpuFence::Vulkan { semaphore, .. } = fence else {
            return 0;
        };
        match unsafe { self.device.get_semaphore_counter_value(*semaphore) } {
            Ok(value) => value,
            Err(e) => {
                log::error!("VulkanBackend: fence query failed: {:?}", e);
                0
            }
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError> {
        let GpuFence::Vulkan { semaphore, .. } = fence else {
            return Err(RenderError::InvalidParameter(
                "fence does not belong to the Vulkan backend".to_string(),
            ));
        };

        let semaphores = [*semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe { self.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| RenderError::DeviceLost(format!("fence wait failed: {:?}", e)))
    }

    fn signal_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError> {
        let GpuFence::Vulkan { semaphore, .. } = fence else {
            return Err(RenderError::InvalidParameter(
                "fence does not belong to the Vulkan backend".to_string(),
            ));
        };

        let semaphores = [*semaphore];
        let values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        let _guard = self.queue_lock.lock();
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], vk::Fence::null())
        }
        .map_err(|e| RenderError::Internal(format!("Fence signal submit failed: {:?}", e)))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(mut surface) = self.surface.lock().take() {
                surface.destroy();
            }

            self.device
                .destroy_descriptor_set_layout(self.bindless_layout, None);
            self.device.destroy_command_pool(self.command_pool, None);

            // The allocator must release its device memory before the
            // device itself goes away.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
