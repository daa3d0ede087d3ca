//! Swapchain presentation for the Vulkan backend.
//!
//! The core renders into its own presentable targets and tags them
//! `Present` (transfer-source layout) at the end of each frame; this
//! module blits the finished target onto an acquired swapchain image and
//! queues the present. Each present slot has its own binary semaphores,
//! fence, and command buffer so slots can overlap.

use ash::vk;

use crate::error::RenderError;

/// Number of presentation sync slots cycled round-robin.
const PRESENT_SLOTS: usize = 2;

/// Per-slot presentation synchronization objects.
struct PresentSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    command_buffer: vk::CommandBuffer,
}

/// Swapchain state for a windowed Vulkan backend.
pub struct SurfaceState {
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    sync: Vec<PresentSync>,
    current_slot: usize,
    device: ash::Device,
    command_pool: vk::CommandPool,
}

impl SurfaceState {
    /// Create the swapchain and presentation sync slots for a surface.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        queue_family: u32,
        command_pool: vk::CommandPool,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> Result<Self, RenderError> {
        let surface_loader = ash::khr::surface::Instance::new(entry, instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device);

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, queue_family, surface)
        }
        .unwrap_or(false);
        if !supported {
            return Err(RenderError::InitializationFailed(
                "graphics queue cannot present to this surface".to_string(),
            ));
        }

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(|e| {
            RenderError::InitializationFailed(format!(
                "Failed to get surface capabilities: {:?}",
                e
            ))
        })?;

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(|e| {
            RenderError::InitializationFailed(format!("Failed to get surface formats: {:?}", e))
        })?;
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
            .copied()
            .unwrap_or(formats[0]);

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let image_count =
            (capabilities.min_image_count + 1).min(if capabilities.max_image_count > 0 {
                capabilities.max_image_count
            } else {
                u32::MAX
            });

        let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { swapchain_loader.create_swapchain(&swapchain_create_info, None) }
            .map_err(|e| {
                RenderError::ResourceCreationFailed(format!("Failed to create swapchain: {:?}", e))
            })?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }.map_err(|e| {
            RenderError::ResourceCreationFailed(format!("Failed to get swapchain images: {:?}", e))
        })?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(PRESENT_SLOTS as u32);
        let command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }.map_err(
            |e| {
                RenderError::ResourceCreationFailed(format!(
                    "Failed to allocate present command buffers: {:?}",
                    e
                ))
            },
        )?;

        let mut sync = Vec::with_capacity(PRESENT_SLOTS);
        for &command_buffer in &command_buffers {
            let make_semaphore = || {
                unsafe { device.create_semaphore(&semaphore_info, None) }.map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create present semaphore: {:?}",
                        e
                    ))
                })
            };
            let image_available = make_semaphore()?;
            let render_finished = make_semaphore()?;
            let in_flight =
                unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
                    RenderError::ResourceCreationFailed(format!(
                        "Failed to create present fence: {:?}",
                        e
                    ))
                })?;

            sync.push(PresentSync {
                image_available,
                render_finished,
                in_flight,
                command_buffer,
            });
        }

        log::info!(
            "Created Vulkan swapchain: {}x{} with {} images",
            extent.width,
            extent.height,
            images.len()
        );

        Ok(Self {
            surface_loader,
            swapchain_loader,
            surface,
            swapchain,
            images,
            extent,
            sync,
            current_slot: 0,
            device: device.clone(),
            command_pool,
        })
    }

    /// Blit `source` (in transfer-source layout) onto the next swapchain
    /// image and queue the present.
    pub fn present(
        &mut self,
        queue: vk::Queue,
        source_image: vk::Image,
        source_extent: vk::Extent3D,
    ) -> Result<(), RenderError> {
        let slot = &self.sync[self.current_slot];
        self.current_slot = (self.current_slot + 1) % PRESENT_SLOTS;

        unsafe {
            self.device
                .wait_for_fences(&[slot.in_flight], true, u64::MAX)
                .map_err(|e| RenderError::DeviceLost(format!("present fence wait: {:?}", e)))?;
            self.device
                .reset_fences(&[slot.in_flight])
                .map_err(|e| RenderError::Internal(format!("present fence reset: {:?}", e)))?;
        }

        let (image_index, _suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                slot.image_available,
                vk::Fence::null(),
            )
        }
        .map_err(|e| {
            RenderError::Internal(format!("Failed to acquire swapchain image: {:?}", e))
        })?;
        let swap_image = self.images[image_index as usize];

        let cmd = slot.command_buffer;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| RenderError::Internal(format!("present cmd reset: {:?}", e)))?;
            self.device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(|e| RenderError::Internal(format!("present cmd begin: {:?}", e)))?;
        }

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        // Swapchain image: undefined -> transfer destination.
        let to_transfer = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swap_image)
            .subresource_range(subresource_range)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);

        let subresource_layers = vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };

        let blit = vk::ImageBlit::default()
            .src_subresource(subresource_layers)
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: source_extent.width as i32,
                    y: source_extent.height as i32,
                    z: 1,
                },
            ])
            .dst_subresource(subresource_layers)
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: self.extent.width as i32,
                    y: self.extent.height as i32,
                    z: 1,
                },
            ]);

        // Swapchain image: transfer destination -> presentable.
        let to_present = vk::ImageMemoryBarrier::default()
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swap_image)
            .subresource_range(subresource_range)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::empty());

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            self.device.cmd_blit_image(
                cmd,
                source_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );
            self.device
                .end_command_buffer(cmd)
                .map_err(|e| RenderError::Internal(format!("present cmd end: {:?}", e)))?;
        }

        let wait_semaphores = [slot.image_available];
        let signal_semaphores = [slot.render_finished];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(queue, &[submit_info], slot.in_flight)
                .map_err(|e| RenderError::Internal(format!("present submit: {:?}", e)))?;
        }

        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };
        match result {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::SUBOPTIMAL_KHR) => {
                log::warn!("Swapchain out of date; resize handling is out of scope");
                Ok(())
            }
            Err(e) => Err(RenderError::Internal(format!(
                "Failed to present swapchain image: {:?}",
                e
            ))),
        }
    }

    /// Destroy all surface resources. The device must be idle.
    pub fn destroy(&mut self) {
        if self.swapchain == vk::SwapchainKHR::null() {
            return;
        }

        unsafe {
            let _ = self.device.device_wait_idle();

            let command_buffers: Vec<vk::CommandBuffer> =
                self.sync.iter().map(|s| s.command_buffer).collect();
            if !command_buffers.is_empty() {
                self.device
                    .free_command_buffers(self.command_pool, &command_buffers);
            }

            for slot in self.sync.drain(..) {
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_fence(slot.in_flight, None);
            }

            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

impl Drop for SurfaceState {
    fn drop(&mut self) {
        self.destroy();
    }
}
