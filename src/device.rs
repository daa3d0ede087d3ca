//! Device core: startup, frame pacing, and creation helpers.
//!
//! [`RenderDevice`] is an explicitly constructed context object (never a
//! global): it owns the backend handle, the completion fence, the frame
//! counter, the two slot allocators, and the frame ring, and exposes
//! `begin_frame`/`end_frame` as the synchronization boundary between CPU
//! frame production and GPU frame consumption.

use std::sync::Arc;

use crate::alloc::{DescriptorSlot, LinearAllocator, SlotAllocator};
use crate::backend::{self, GpuBackend, GpuBuffer, GpuFence, GpuTexture};
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::frame::{FrameContext, FrameRing};
use crate::state::{transition, ResourceState};
use crate::types::{
    BufferDescriptor, BufferUsage, BufferViewDescriptor, DescriptorTableDescriptor,
    DescriptorTableKind, TextureDescriptor, TextureFormat, TextureUsage,
    TEXTURE_PLACEMENT_ALIGNMENT,
};

/// The per-frame resource and synchronization core.
///
/// Single-threaded by design: one CPU thread records, the GPU executes
/// asynchronously, and the fence wait in [`begin_frame`](Self::begin_frame)
/// is the only blocking point. Each frame slot is used by exactly one party
/// at a time: the CPU from `begin_frame` until `end_frame`'s submit, the
/// GPU afterwards until the slot's fence target is reached.
pub struct RenderDevice {
    backend: Arc<dyn GpuBackend>,
    config: RenderConfig,
    fence: GpuFence,
    /// Monotonically increasing; also the last queue-signaled fence value.
    frame_counter: u64,
    /// Shader-visible resource-view table (buffers and textures).
    resource_slots: SlotAllocator,
    /// CPU-only render-target-view table.
    render_target_slots: SlotAllocator,
    ring: FrameRing,
    recording: bool,
}

impl RenderDevice {
    /// Create a device core on an automatically selected backend.
    pub fn create(config: RenderConfig) -> Result<Self, RenderError> {
        let backend = backend::create_backend(&config)?;
        Self::new(backend, config)
    }

    /// Create a device core on the given backend.
    ///
    /// Startup runs in strict dependency order: fence, then binding
    /// tables, then per-slot command lists and linear allocators, then
    /// presentable targets with their render-target views and initial
    /// `Present` state tags.
    pub fn new(backend: Arc<dyn GpuBackend>, config: RenderConfig) -> Result<Self, RenderError> {
        if config.frame_latency == 0 {
            return Err(RenderError::InvalidParameter(
                "frame latency must be at least 1".to_string(),
            ));
        }
        if config.frame_latency == 1 {
            log::warn!("frame latency 1 serializes the CPU on the GPU every frame");
        }

        let fence = backend.create_fence(0)?;

        let resource_slots = SlotAllocator::new(
            &backend,
            &DescriptorTableDescriptor::new(
                DescriptorTableKind::Resource,
                config.resource_table_capacity,
                true,
            )
            .with_label("resource_views"),
        )?;

        let mut render_target_slots = SlotAllocator::new(
            &backend,
            &DescriptorTableDescriptor::new(
                DescriptorTableKind::RenderTarget,
                config.render_target_table_capacity,
                false,
            )
            .with_label("render_target_views"),
        )?;

        let mut frames = Vec::with_capacity(config.frame_latency);
        for i in 0..config.frame_latency {
            let arena = LinearAllocator::new(
                &backend,
                config.upload_arena_size,
                &format!("frame_{i}_upload"),
            )?;
            let commands = backend.create_command_list()?;

            let backbuffer = backend.create_texture(
                &TextureDescriptor::new_2d(
                    config.width,
                    config.height,
                    TextureFormat::Rgba8UnormSrgb,
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::PRESENT,
                )
                .with_label(format!("backbuffer_{i}")),
            )?;

            let rtv = render_target_slots.allocate()?;
            backend.write_render_target_view(render_target_slots.table(), rtv.index, &backbuffer)?;

            frames.push(FrameContext::new(
                Arc::clone(&backend),
                arena,
                commands,
                backbuffer,
                rtv,
            ));
        }

        log::info!(
            "RenderDevice: {} backend, {} frame slots, {} KiB arena each",
            backend.name(),
            config.frame_latency,
            config.upload_arena_size / 1024
        );

        Ok(Self {
            backend,
            config,
            fence,
            frame_counter: 0,
            resource_slots,
            render_target_slots,
            ring: FrameRing::new(frames),
            recording: false,
        })
    }

    /// The backend this device runs on.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The configuration the device was created with.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// The global frame counter (number of completed `end_frame` calls).
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Highest fence value the GPU has reached.
    pub fn fence_completed(&self) -> u64 {
        self.backend.fence_completed_value(&self.fence)
    }

    /// The frame context selected by the current frame counter.
    pub fn current_frame(&self) -> &FrameContext {
        self.ring.frame(self.frame_counter)
    }

    /// Mutable access to the current frame context.
    pub fn current_frame_mut(&mut self) -> &mut FrameContext {
        self.ring.frame_mut(self.frame_counter)
    }

    /// The frame ring.
    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    /// Open the next frame.
    ///
    /// Selects ring slot `frame_counter % N`, blocks until the fence
    /// reaches the slot's stored target (proving the GPU finished all work
    /// previously recorded into this slot and no longer reads its upload
    /// arena), then resets the slot's allocator and reopens its command
    /// list.
    pub fn begin_frame(&mut self) -> Result<(), RenderError> {
        if self.recording {
            return Err(RenderError::Internal(
                "begin_frame called while a frame is already open".to_string(),
            ));
        }

        let target = self.current_frame().fence_target();
        let completed = self.backend.fence_completed_value(&self.fence);
        if completed < target {
            log::trace!(
                "begin_frame: waiting for fence {} (completed {})",
                target,
                completed
            );
            self.backend.wait_fence(&self.fence, target)?;
        }

        self.ring
            .frame_mut(self.frame_counter)
            .reset_for_recording()?;
        self.recording = true;
        Ok(())
    }

    /// Close and submit the current frame.
    ///
    /// Transitions the presentable target back to `Present` (when needed),
    /// closes and submits the command list, presents, increments the frame
    /// counter, stores it as this slot's fence target, and signals the
    /// fence to it from the queue. The signal completes when the GPU
    /// finishes the submitted work, not immediately.
    pub fn end_frame(&mut self) -> Result<(), RenderError> {
        if !self.recording {
            return Err(RenderError::Internal(
                "end_frame called with no open frame".to_string(),
            ));
        }

        let counter = self.frame_counter;
        self.ring
            .frame_mut(counter)
            .transition_backbuffer(ResourceState::Present);

        let frame = self.ring.frame(counter);
        self.backend.end_commands(frame.commands())?;
        self.backend.submit(frame.commands())?;
        self.backend.present(frame.backbuffer())?;

        self.frame_counter += 1;
        let signal_value = self.frame_counter;
        self.ring.frame_mut(counter).set_fence_target(signal_value);
        self.backend.signal_fence(&self.fence, signal_value)?;
        self.recording = false;

        log::trace!("end_frame: signaled fence value {}", signal_value);
        Ok(())
    }

    /// Record the start of a render pass targeting the current frame's
    /// backbuffer, transitioning it to `RenderTarget` first when needed.
    pub fn begin_backbuffer_pass(&mut self, clear_color: [f32; 4]) -> Result<(), RenderError> {
        if !self.recording {
            return Err(RenderError::Internal(
                "begin_backbuffer_pass requires an open frame".to_string(),
            ));
        }

        let frame = self.ring.frame_mut(self.frame_counter);
        frame.transition_backbuffer(ResourceState::RenderTarget);
        let rtv_index = frame.render_target_slot().index;
        self.backend.record_begin_render_pass(
            frame.commands(),
            self.render_target_slots.table(),
            rtv_index,
            clear_color,
        );
        Ok(())
    }

    /// Record the end of the current backbuffer render pass.
    pub fn end_backbuffer_pass(&mut self) {
        let frame = self.ring.frame(self.frame_counter);
        self.backend.record_end_render_pass(frame.commands());
    }

    /// Create a CPU-writable, GPU-readable buffer, optionally writing
    /// initial contents.
    pub fn create_upload_buffer(
        &self,
        size: u64,
        label: &str,
        initial_data: Option<&[u8]>,
    ) -> Result<Arc<GpuBuffer>, RenderError> {
        if let Some(data) = initial_data {
            if data.len() as u64 > size {
                return Err(RenderError::InvalidParameter(format!(
                    "initial data ({} bytes) exceeds buffer size ({} bytes)",
                    data.len(),
                    size
                )));
            }
        }

        let buffer = self.backend.create_buffer(
            &BufferDescriptor::new(
                size,
                BufferUsage::UPLOAD
                    | BufferUsage::SHADER_RESOURCE
                    | BufferUsage::INDEX
                    | BufferUsage::CONSTANT,
            )
            .with_label(label),
        )?;

        if let Some(data) = initial_data {
            self.backend.write_buffer(&buffer, 0, data)?;
        }

        Ok(buffer)
    }

    /// Create a sampled texture and upload `data` through the current
    /// frame's linear allocator.
    ///
    /// `data` must be tightly packed rows (`width * bytes_per_pixel` per
    /// row). The texel data is staged at the required placement alignment,
    /// copied row by row into the 256-byte-aligned destination pitch, and
    /// a copy plus a transition to `ShaderResource` are recorded into the
    /// current frame's command list. Must be called between `begin_frame`
    /// and `end_frame`; do resource initialization as an explicit step
    /// right after the first `begin_frame`.
    pub fn create_texture_with_data(
        &mut self,
        desc: &TextureDescriptor,
        data: &[u8],
    ) -> Result<Arc<GpuTexture>, RenderError> {
        if !self.recording {
            return Err(RenderError::InvalidParameter(
                "create_texture_with_data must be called between begin_frame and end_frame"
                    .to_string(),
            ));
        }

        let unpadded = desc.unpadded_row_pitch();
        let height = u64::from(desc.size.height);
        if data.len() as u64 != unpadded * height {
            return Err(RenderError::InvalidParameter(format!(
                "texel data is {} bytes, expected {} ({} rows of {})",
                data.len(),
                unpadded * height,
                height,
                unpadded
            )));
        }

        let texture = self.backend.create_texture(desc)?;

        let padded = desc.padded_row_pitch();
        let frame = self.ring.frame_mut(self.frame_counter);
        let staging = frame
            .allocator_mut()
            .allocate(padded * height, TEXTURE_PLACEMENT_ALIGNMENT)?;

        // Source rows are tight; destination rows are pitch-padded.
        for row in 0..height {
            let src = &data[(row * unpadded) as usize..((row + 1) * unpadded) as usize];
            self.backend.write_buffer(
                frame.allocator().buffer(),
                staging.offset + row * padded,
                src,
            )?;
        }

        let mut texture_state = ResourceState::Common;
        if let Some(barrier) = transition(&texture, &mut texture_state, ResourceState::CopyDst) {
            self.backend.record_barrier(frame.commands(), &barrier);
        }
        self.backend.record_copy_buffer_to_texture(
            frame.commands(),
            frame.allocator().buffer(),
            staging.offset,
            padded,
            &texture,
        );
        if let Some(barrier) =
            transition(&texture, &mut texture_state, ResourceState::ShaderResource)
        {
            self.backend.record_barrier(frame.commands(), &barrier);
        }

        log::trace!(
            "RenderDevice: staged {}x{} texture upload ({} bytes padded)",
            desc.size.width,
            desc.size.height,
            padded * height
        );

        Ok(texture)
    }

    /// Allocate a resource-table slot and write a structured-buffer view
    /// into it. The returned slot's index is what shaders use for access.
    pub fn create_buffer_view(
        &mut self,
        buffer: &Arc<GpuBuffer>,
        view: &BufferViewDescriptor,
    ) -> Result<DescriptorSlot, RenderError> {
        let slot = self.resource_slots.allocate()?;
        self.backend
            .write_buffer_view(self.resource_slots.table(), slot.index, buffer, view)?;
        Ok(slot)
    }

    /// Allocate a resource-table slot and write a sampled-texture view
    /// into it.
    pub fn create_texture_view(
        &mut self,
        texture: &Arc<GpuTexture>,
    ) -> Result<DescriptorSlot, RenderError> {
        let slot = self.resource_slots.allocate()?;
        self.backend
            .write_texture_view(self.resource_slots.table(), slot.index, texture)?;
        Ok(slot)
    }

    /// The shader-visible resource-view slot allocator.
    pub fn resource_slots(&self) -> &SlotAllocator {
        &self.resource_slots
    }

    /// Block until the GPU has finished every submitted frame.
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        let last_signaled = self
            .ring
            .iter()
            .map(|frame| frame.fence_target())
            .max()
            .unwrap_or(0);
        if last_signaled > 0 {
            self.backend.wait_fence(&self.fence, last_signaled)?;
        }
        Ok(())
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        // GPU-owned resources must not be released while in flight.
        if let Err(e) = self.wait_idle() {
            log::error!("RenderDevice: wait_idle failed during teardown: {}", e);
        }
    }
}

impl std::fmt::Debug for RenderDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderDevice")
            .field("backend", &self.backend.name())
            .field("frame_counter", &self.frame_counter)
            .field("frame_latency", &self.ring.latency())
            .field("recording", &self.recording)
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderDevice: Send);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn test_device(config: RenderConfig) -> (Arc<SoftwareBackend>, RenderDevice) {
        let software = Arc::new(SoftwareBackend::new());
        let backend: Arc<dyn GpuBackend> = software.clone();
        let device = RenderDevice::new(backend, config).unwrap();
        (software, device)
    }

    #[test]
    fn test_startup_state() {
        let (_, device) = test_device(RenderConfig::default().with_size(64, 64));
        assert_eq!(device.frame_counter(), 0);
        assert_eq!(device.fence_completed(), 0);
        assert_eq!(device.ring().latency(), 3);
        assert_eq!(device.current_frame().fence_target(), 0);
        // One render-target view was allocated per frame slot.
        assert_eq!(device.current_frame().render_target_slot().index, 0);
    }

    #[test]
    fn test_zero_latency_rejected() {
        let software = Arc::new(SoftwareBackend::new());
        let backend: Arc<dyn GpuBackend> = software;
        let result = RenderDevice::new(backend, RenderConfig::default().with_frame_latency(0));
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_cycle_advances_counter_and_fence() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(32, 32));

        let mut last_completed = 0;
        for expected in 1..=5u64 {
            device.begin_frame().unwrap();
            device.end_frame().unwrap();
            assert_eq!(device.frame_counter(), expected);

            let completed = device.fence_completed();
            assert!(completed >= last_completed, "fence must be monotonic");
            last_completed = completed;
        }
        assert_eq!(last_completed, 5);
    }

    #[test]
    fn test_begin_twice_is_an_error() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(32, 32));
        device.begin_frame().unwrap();
        assert!(device.begin_frame().is_err());
        device.end_frame().unwrap();
        assert!(device.end_frame().is_err());
    }

    #[test]
    fn test_arena_resets_each_slot_reuse() {
        let (_, mut device) = test_device(
            RenderConfig::default()
                .with_size(32, 32)
                .with_frame_latency(2),
        );

        for _ in 0..4 {
            device.begin_frame().unwrap();
            let alloc = device
                .current_frame_mut()
                .allocator_mut()
                .allocate(100, 4)
                .unwrap();
            // Every reuse of a slot starts from offset zero again.
            assert_eq!(alloc.offset, 0);
            device.end_frame().unwrap();
        }
    }

    #[test]
    fn test_upload_buffer_round_trip() {
        let (software, device) = test_device(RenderConfig::default().with_size(32, 32));
        let buffer = device
            .create_upload_buffer(16, "test", Some(&[7u8; 12]))
            .unwrap();
        assert_eq!(software.read_buffer(&buffer, 0, 12), vec![7u8; 12]);
    }

    #[test]
    fn test_upload_buffer_oversized_data_rejected() {
        let (_, device) = test_device(RenderConfig::default().with_size(32, 32));
        assert!(device
            .create_upload_buffer(8, "test", Some(&[0u8; 16]))
            .is_err());
    }

    #[test]
    fn test_texture_upload_requires_open_frame() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(32, 32));
        let desc = TextureDescriptor::new_2d(
            2,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        );
        assert!(device.create_texture_with_data(&desc, &[0u8; 16]).is_err());
    }

    #[test]
    fn test_texture_upload_repacks_row_pitch() {
        let (software, mut device) = test_device(RenderConfig::default().with_size(32, 32));

        // 3 texels per row: 12-byte tight rows, padded to 256 in staging.
        let desc = TextureDescriptor::new_2d(
            3,
            2,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        );
        let data: Vec<u8> = (0u8..24).collect();

        device.begin_frame().unwrap();
        let texture = device.create_texture_with_data(&desc, &data).unwrap();
        device.end_frame().unwrap();

        // The copy executed on submit; readback is tightly packed again.
        assert_eq!(software.read_texture(&texture), data);
    }

    #[test]
    fn test_texture_upload_wrong_size_rejected() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(32, 32));
        let desc = TextureDescriptor::new_2d(
            4,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        );
        device.begin_frame().unwrap();
        assert!(device.create_texture_with_data(&desc, &[0u8; 10]).is_err());
        device.end_frame().unwrap();
    }

    #[test]
    fn test_buffer_view_slots_increase() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(32, 32));
        let buffer = device.create_upload_buffer(64, "viewed", None).unwrap();
        let view = BufferViewDescriptor {
            first_element: 0,
            element_count: 4,
            element_stride: 16,
        };

        let a = device.create_buffer_view(&buffer, &view).unwrap();
        let b = device.create_buffer_view(&buffer, &view).unwrap();
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
    }

    #[test]
    fn test_backbuffer_pass_clears_target() {
        let (software, mut device) = test_device(RenderConfig::default().with_size(4, 4));

        device.begin_frame().unwrap();
        device.begin_backbuffer_pass([0.0, 1.0, 0.0, 1.0]).unwrap();
        device.end_backbuffer_pass();
        device.end_frame().unwrap();

        let data = software.read_texture(device.ring().frame(0).backbuffer());
        assert_eq!(&data[0..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_wait_idle_after_frames() {
        let (_, mut device) = test_device(RenderConfig::default().with_size(16, 16));
        for _ in 0..3 {
            device.begin_frame().unwrap();
            device.end_frame().unwrap();
        }
        device.wait_idle().unwrap();
        assert_eq!(device.fence_completed(), 3);
    }
}
