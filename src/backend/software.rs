//! Software GPU backend.
//!
//! This backend executes command streams on the CPU so the core can be
//! exercised without GPU hardware: clears and copies are applied to real
//! host memory, and the fence is a condvar-backed counter whose completion
//! can be *held* to simulate a GPU that never finishes. Tests use the hold
//! controls to drive the synchronization protocol into its blocking paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::RenderError;
use crate::state::TextureBarrier;
use crate::types::{
    BufferDescriptor, BufferViewDescriptor, DescriptorTableDescriptor, IndexFormat,
    PipelineDescriptor, TextureDescriptor, TextureFormat,
};

use super::{
    GpuBackend, GpuBuffer, GpuCommandList, GpuDescriptorTable, GpuFence, GpuPipeline, GpuTexture,
};

/// Handle stride reported for software descriptor tables.
const DESCRIPTOR_STRIDE: u64 = 32;

/// Completion state of a software fence.
///
/// A monotonically increasing counter plus a condvar so waiters sleep
/// instead of spinning.
pub struct SoftwareFenceState {
    completed: Mutex<u64>,
    signaled: Condvar,
}

impl SoftwareFenceState {
    fn new(initial: u64) -> Self {
        Self {
            completed: Mutex::new(initial),
            signaled: Condvar::new(),
        }
    }

    /// Highest value the fence has reached.
    pub fn completed_value(&self) -> u64 {
        *self.completed.lock()
    }

    /// Advance the fence to `value` (never backwards) and wake waiters.
    fn complete(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
            self.signaled.notify_all();
        }
    }

    /// Block until the fence reaches `value`.
    fn wait(&self, value: u64) {
        let mut completed = self.completed.lock();
        while *completed < value {
            self.signaled.wait(&mut completed);
        }
    }
}

/// Recording state of a software command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoftwareListState {
    /// Not recording; may be submitted.
    #[default]
    Closed,
    /// Recording.
    Open,
}

/// A descriptor written into a software binding table.
#[derive(Debug, Clone)]
pub enum SoftwareDescriptor {
    /// Structured-buffer view.
    BufferView {
        /// Viewed buffer.
        buffer: Arc<GpuBuffer>,
        /// View parameters.
        view: BufferViewDescriptor,
    },
    /// Sampled-texture view.
    TextureView {
        /// Viewed texture.
        texture: Arc<GpuTexture>,
    },
    /// Render-target view.
    RenderTarget {
        /// Target texture.
        texture: Arc<GpuTexture>,
    },
}

/// One recorded command in a software command stream.
#[derive(Debug, Clone)]
pub enum SoftwareCommand {
    /// State transition (bookkeeping only; the CPU needs no barriers).
    Barrier {
        before: crate::state::ResourceState,
        after: crate::state::ResourceState,
    },
    /// Open a render pass and clear the target.
    BeginPass {
        target: Arc<GpuTexture>,
        clear_color: [f32; 4],
    },
    /// Close the current render pass.
    EndPass,
    /// Bind a pipeline.
    SetPipeline { label: Option<String> },
    /// Update push constants.
    PushConstants { offset: u32, data: Vec<u8> },
    /// Bind an index buffer.
    SetIndexBuffer {
        buffer: Arc<GpuBuffer>,
        offset: u64,
        format: IndexFormat,
    },
    /// Indexed draw.
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    },
    /// Buffer-to-texture copy with an explicit source row pitch.
    CopyBufferToTexture {
        src: Arc<GpuBuffer>,
        src_offset: u64,
        bytes_per_row: u64,
        dst: Arc<GpuTexture>,
    },
}

/// Pending queue-side fence signals while completion is held.
#[derive(Default)]
struct CompletionQueue {
    held: bool,
    pending: VecDeque<(Arc<SoftwareFenceState>, u64)>,
}

/// Software GPU backend.
pub struct SoftwareBackend {
    /// Next synthetic GPU virtual address to hand out.
    next_address: AtomicU64,
    /// Next synthetic descriptor-table base handle.
    next_table_base: AtomicU64,
    /// Deferred fence signals (simulated in-flight GPU work).
    completion: Mutex<CompletionQueue>,
    /// Number of draw calls executed across all submits.
    draws_executed: AtomicU64,
    /// Number of submitted command lists.
    submits: AtomicU64,
    /// Number of presents.
    presents: AtomicU64,
}

impl SoftwareBackend {
    /// Create a new software backend.
    pub fn new() -> Self {
        Self {
            next_address: AtomicU64::new(0x1_0000_0000),
            next_table_base: AtomicU64::new(0x10_0000),
            completion: Mutex::new(CompletionQueue::default()),
            draws_executed: AtomicU64::new(0),
            submits: AtomicU64::new(0),
            presents: AtomicU64::new(0),
        }
    }

    /// Hold fence completion: queue-side signals are deferred until
    /// [`release_completion`](Self::release_completion) or
    /// [`complete_one`](Self::complete_one). This simulates a GPU that has
    /// accepted work but not finished it.
    pub fn hold_completion(&self) {
        self.completion.lock().held = true;
    }

    /// Stop holding and apply all deferred signals in submission order.
    pub fn release_completion(&self) {
        let mut queue = self.completion.lock();
        queue.held = false;
        while let Some((fence, value)) = queue.pending.pop_front() {
            fence.complete(value);
        }
    }

    /// Apply the oldest deferred signal, if any. Completion stays held.
    pub fn complete_one(&self) -> bool {
        let mut queue = self.completion.lock();
        match queue.pending.pop_front() {
            Some((fence, value)) => {
                fence.complete(value);
                true
            }
            None => false,
        }
    }

    /// Number of deferred signals currently queued.
    pub fn pending_signals(&self) -> usize {
        self.completion.lock().pending.len()
    }

    /// Total draw calls executed across all submits.
    pub fn draws_executed(&self) -> u64 {
        self.draws_executed.load(Ordering::Relaxed)
    }

    /// Total submitted command lists.
    pub fn submits(&self) -> u64 {
        self.submits.load(Ordering::Relaxed)
    }

    /// Total presents.
    pub fn presents(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }

    /// Describe the descriptor written at a table slot, if any.
    pub fn describe_descriptor(&self, table: &GpuDescriptorTable, index: u32) -> Option<String> {
        let entries = match table {
            GpuDescriptorTable::Software { entries, .. } => entries,
            #[cfg(feature = "vulkan-backend")]
            _ => return None,
        };
        let entries = entries.lock();
        entries.get(index as usize)?.as_ref().map(|d| match d {
            SoftwareDescriptor::BufferView { buffer, view } => format!(
                "buffer view: {} elements of {} bytes over a {} byte buffer",
                view.element_count,
                view.element_stride,
                buffer.size()
            ),
            SoftwareDescriptor::TextureView { texture } => {
                let size = texture.size();
                format!("texture view: {}x{}", size.width, size.height)
            }
            SoftwareDescriptor::RenderTarget { texture } => {
                let size = texture.size();
                format!("render target: {}x{}", size.width, size.height)
            }
        })
    }

    /// Read back a software texture's full contents (tightly packed rows).
    pub fn read_texture(&self, texture: &GpuTexture) -> Vec<u8> {
        match texture {
            GpuTexture::Software { data, .. } => data.lock().clone(),
            #[cfg(feature = "vulkan-backend")]
            _ => Vec::new(),
        }
    }

    fn execute(&self, commands: Vec<SoftwareCommand>) {
        for command in commands {
            match command {
                SoftwareCommand::Barrier { before, after } => {
                    log::trace!("SoftwareBackend: barrier {:?} -> {:?}", before, after);
                }
                SoftwareCommand::BeginPass {
                    target,
                    clear_color,
                } => {
                    clear_texture(&target, clear_color);
                }
                SoftwareCommand::EndPass => {}
                SoftwareCommand::SetPipeline { label } => {
                    log::trace!("SoftwareBackend: bind pipeline {:?}", label);
                }
                SoftwareCommand::PushConstants { offset, data } => {
                    log::trace!(
                        "SoftwareBackend: push constants {} bytes at {}",
                        data.len(),
                        offset
                    );
                }
                SoftwareCommand::SetIndexBuffer {
                    buffer,
                    offset,
                    format,
                } => {
                    log::trace!(
                        "SoftwareBackend: bind {} byte index buffer at {} ({:?})",
                        buffer.size(),
                        offset,
                        format
                    );
                }
                SoftwareCommand::DrawIndexed {
                    index_count,
                    instance_count,
                    first_index,
                } => {
                    log::trace!(
                        "SoftwareBackend: draw {} indices x{} instances from {}",
                        index_count,
                        instance_count,
                        first_index
                    );
                    self.draws_executed.fetch_add(1, Ordering::Relaxed);
                }
                SoftwareCommand::CopyBufferToTexture {
                    src,
                    src_offset,
                    bytes_per_row,
                    dst,
                } => {
                    copy_buffer_to_texture(&src, src_offset, bytes_per_row, &dst);
                }
            }
        }
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Fill a software texture with a clear color.
fn clear_texture(texture: &GpuTexture, color: [f32; 4]) {
    let (data, format) = match texture {
        GpuTexture::Software { data, format, .. } => (data, format),
        #[cfg(feature = "vulkan-backend")]
        _ => return,
    };

    let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let texel = match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => [
            to_byte(color[0]),
            to_byte(color[1]),
            to_byte(color[2]),
            to_byte(color[3]),
        ],
        TextureFormat::Bgra8UnormSrgb => [
            to_byte(color[2]),
            to_byte(color[1]),
            to_byte(color[0]),
            to_byte(color[3]),
        ],
    };

    let mut data = data.lock();
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&texel);
    }
}

/// Apply a row-pitched buffer-to-texture copy to host storage.
fn copy_buffer_to_texture(src: &GpuBuffer, src_offset: u64, bytes_per_row: u64, dst: &GpuTexture) {
    let src_data = match src {
        GpuBuffer::Software { data, .. } => data,
        #[cfg(feature = "vulkan-backend")]
        _ => return,
    };
    let (dst_data, size, format) = match dst {
        GpuTexture::Software {
            data, size, format, ..
        } => (data, size, format),
        #[cfg(feature = "vulkan-backend")]
        _ => return,
    };

    let row_bytes = u64::from(size.width) * format.bytes_per_pixel();
    let src_data = src_data.lock();
    let mut dst_data = dst_data.lock();

    for row in 0..u64::from(size.height) {
        let src_start = (src_offset + row * bytes_per_row) as usize;
        let dst_start = (row * row_bytes) as usize;
        let len = row_bytes as usize;
        if src_start + len > src_data.len() || dst_start + len > dst_data.len() {
            log::error!("SoftwareBackend: copy out of bounds, row {} skipped", row);
            continue;
        }
        dst_data[dst_start..dst_start + len].copy_from_slice(&src_data[src_start..src_start + len]);
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> Result<Arc<GpuBuffer>, RenderError> {
        if desc.size == 0 {
            return Err(RenderError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        // Space addresses out so distinct buffers never alias.
        let gpu_address = self
            .next_address
            .fetch_add(desc.size.next_multiple_of(4096), Ordering::Relaxed);

        log::trace!(
            "SoftwareBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );

        Ok(Arc::new(GpuBuffer::Software {
            data: Mutex::new(vec![0u8; desc.size as usize]),
            gpu_address,
            size: desc.size,
            label: desc.label.clone(),
        }))
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> Result<Arc<GpuTexture>, RenderError> {
        if desc.size.width == 0 || desc.size.height == 0 {
            return Err(RenderError::InvalidParameter(
                "texture dimensions cannot be zero".to_string(),
            ));
        }

        let bytes = u64::from(desc.size.width)
            * u64::from(desc.size.height)
            * u64::from(desc.size.depth)
            * desc.format.bytes_per_pixel();

        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.size.width,
            desc.size.height
        );

        Ok(Arc::new(GpuTexture::Software {
            data: Mutex::new(vec![0u8; bytes as usize]),
            size: desc.size,
            format: desc.format,
            label: desc.label.clone(),
        }))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), RenderError> {
        let (storage, size) = match buffer {
            GpuBuffer::Software { data, size, .. } => (data, size),
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(RenderError::InvalidParameter(
                    "buffer does not belong to the software backend".to_string(),
                ))
            }
        };

        if offset + data.len() as u64 > *size {
            return Err(RenderError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                size
            )));
        }

        let mut storage = storage.lock();
        storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        match buffer {
            GpuBuffer::Software { data, .. } => {
                let data = data.lock();
                let start = (offset as usize).min(data.len());
                let end = ((offset + size) as usize).min(data.len());
                data[start..end].to_vec()
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Vec::new(),
        }
    }

    fn create_descriptor_table(
        &self,
        desc: &DescriptorTableDescriptor,
    ) -> Result<GpuDescriptorTable, RenderError> {
        if desc.capacity == 0 {
            return Err(RenderError::InvalidParameter(
                "descriptor table capacity cannot be zero".to_string(),
            ));
        }

        let base_handle = self
            .next_table_base
            .fetch_add(u64::from(desc.capacity) * DESCRIPTOR_STRIDE, Ordering::Relaxed);

        log::trace!(
            "SoftwareBackend: creating {:?} table {:?} ({} slots, shader_visible: {})",
            desc.kind,
            desc.label,
            desc.capacity,
            desc.shader_visible
        );

        Ok(GpuDescriptorTable::Software {
            kind: desc.kind,
            capacity: desc.capacity,
            shader_visible: desc.shader_visible,
            base_handle,
            stride: DESCRIPTOR_STRIDE,
            entries: Mutex::new(vec![None; desc.capacity as usize]),
        })
    }

    fn write_buffer_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        buffer: &Arc<GpuBuffer>,
        view: &BufferViewDescriptor,
    ) -> Result<(), RenderError> {
        write_software_descriptor(
            table,
            index,
            SoftwareDescriptor::BufferView {
                buffer: Arc::clone(buffer),
                view: *view,
            },
        )
    }

    fn write_texture_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError> {
        write_software_descriptor(
            table,
            index,
            SoftwareDescriptor::TextureView {
                texture: Arc::clone(texture),
            },
        )
    }

    fn write_render_target_view(
        &self,
        table: &GpuDescriptorTable,
        index: u32,
        texture: &Arc<GpuTexture>,
    ) -> Result<(), RenderError> {
        write_software_descriptor(
            table,
            index,
            SoftwareDescriptor::RenderTarget {
                texture: Arc::clone(texture),
            },
        )
    }

    fn create_pipeline(&self, desc: &PipelineDescriptor) -> Result<Arc<GpuPipeline>, RenderError> {
        if desc.vertex_shader.is_empty() || desc.fragment_shader.is_empty() {
            return Err(RenderError::ResourceCreationFailed(
                "pipeline requires vertex and fragment bytecode".to_string(),
            ));
        }

        log::trace!("SoftwareBackend: creating pipeline {:?}", desc.label);

        Ok(Arc::new(GpuPipeline::Software {
            label: desc.label.clone(),
        }))
    }

    fn create_command_list(&self) -> Result<GpuCommandList, RenderError> {
        Ok(GpuCommandList::Software {
            commands: Mutex::new(Vec::new()),
            state: Mutex::new(SoftwareListState::Closed),
        })
    }

    fn begin_commands(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let (commands, state) = match list {
            GpuCommandList::Software { commands, state } => (commands, state),
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(RenderError::InvalidParameter(
                    "command list does not belong to the software backend".to_string(),
                ))
            }
        };

        let mut state = state.lock();
        if *state == SoftwareListState::Open {
            return Err(RenderError::Internal(
                "command list is already open".to_string(),
            ));
        }
        commands.lock().clear();
        *state = SoftwareListState::Open;
        Ok(())
    }

    fn end_commands(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let state = match list {
            GpuCommandList::Software { state, .. } => state,
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(RenderError::InvalidParameter(
                    "command list does not belong to the software backend".to_string(),
                ))
            }
        };

        let mut state = state.lock();
        if *state != SoftwareListState::Open {
            return Err(RenderError::Internal(
                "command list is not open".to_string(),
            ));
        }
        *state = SoftwareListState::Closed;
        Ok(())
    }

    fn record_barrier(&self, list: &GpuCommandList, barrier: &TextureBarrier) {
        push_command(
            list,
            SoftwareCommand::Barrier {
                before: barrier.before,
                after: barrier.after,
            },
        );
    }

    fn record_begin_render_pass(
        &self,
        list: &GpuCommandList,
        table: &GpuDescriptorTable,
        slot: u32,
        clear_color: [f32; 4],
    ) {
        let entries = match table {
            GpuDescriptorTable::Software { entries, .. } => entries,
            #[cfg(feature = "vulkan-backend")]
            _ => return,
        };
        let entries = entries.lock();
        let Some(Some(SoftwareDescriptor::RenderTarget { texture })) =
            entries.get(slot as usize)
        else {
            log::error!(
                "SoftwareBackend: render pass opened on empty render-target slot {}",
                slot
            );
            return;
        };
        let target = Arc::clone(texture);
        drop(entries);

        push_command(
            list,
            SoftwareCommand::BeginPass {
                target,
                clear_color,
            },
        );
    }

    fn record_end_render_pass(&self, list: &GpuCommandList) {
        push_command(list, SoftwareCommand::EndPass);
    }

    fn record_set_pipeline(&self, list: &GpuCommandList, pipeline: &Arc<GpuPipeline>) {
        let label = match pipeline.as_ref() {
            GpuPipeline::Software { label } => label.clone(),
            #[cfg(feature = "vulkan-backend")]
            _ => None,
        };
        push_command(list, SoftwareCommand::SetPipeline { label });
    }

    fn record_push_constants(&self, list: &GpuCommandList, offset: u32, data: &[u8]) {
        push_command(
            list,
            SoftwareCommand::PushConstants {
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn record_set_index_buffer(
        &self,
        list: &GpuCommandList,
        buffer: &Arc<GpuBuffer>,
        offset: u64,
        format: IndexFormat,
    ) {
        push_command(
            list,
            SoftwareCommand::SetIndexBuffer {
                buffer: Arc::clone(buffer),
                offset,
                format,
            },
        );
    }

    fn record_draw_indexed(
        &self,
        list: &GpuCommandList,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
    ) {
        push_command(
            list,
            SoftwareCommand::DrawIndexed {
                index_count,
                instance_count,
                first_index,
            },
        );
    }

    fn record_copy_buffer_to_texture(
        &self,
        list: &GpuCommandList,
        src: &Arc<GpuBuffer>,
        src_offset: u64,
        bytes_per_row: u64,
        dst: &Arc<GpuTexture>,
    ) {
        push_command(
            list,
            SoftwareCommand::CopyBufferToTexture {
                src: Arc::clone(src),
                src_offset,
                bytes_per_row,
                dst: Arc::clone(dst),
            },
        );
    }

    fn submit(&self, list: &GpuCommandList) -> Result<(), RenderError> {
        let (commands, state) = match list {
            GpuCommandList::Software { commands, state } => (commands, state),
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(RenderError::InvalidParameter(
                    "command list does not belong to the software backend".to_string(),
                ))
            }
        };

        if *state.lock() != SoftwareListState::Closed {
            return Err(RenderError::Internal(
                "command list must be closed before submit".to_string(),
            ));
        }

        let drained: Vec<SoftwareCommand> = commands.lock().drain(..).collect();
        log::trace!("SoftwareBackend: executing {} commands", drained.len());
        self.execute(drained);
        self.submits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn present(&self, _texture: &Arc<GpuTexture>) -> Result<(), RenderError> {
        self.presents.fetch_add(1, Ordering::Relaxed);
        log::trace!("SoftwareBackend: present");
        Ok(())
    }

    fn create_fence(&self, initial_value: u64) -> Result<GpuFence, RenderError> {
        Ok(GpuFence::Software {
            state: Arc::new(SoftwareFenceState::new(initial_value)),
        })
    }

    fn fence_completed_value(&self, fence: &GpuFence) -> u64 {
        match fence {
            GpuFence::Software { state } => state.completed_value(),
            #[cfg(feature = "vulkan-backend")]
            _ => 0,
        }
    }

    fn wait_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError> {
        match fence {
            GpuFence::Software { state } => {
                state.wait(value);
                Ok(())
            }
            #[cfg(feature = "vulkan-backend")]
            _ => Err(RenderError::InvalidParameter(
                "fence does not belong to the software backend".to_string(),
            )),
        }
    }

    fn signal_fence(&self, fence: &GpuFence, value: u64) -> Result<(), RenderError> {
        let state = match fence {
            GpuFence::Software { state } => state,
            #[cfg(feature = "vulkan-backend")]
            _ => {
                return Err(RenderError::InvalidParameter(
                    "fence does not belong to the software backend".to_string(),
                ))
            }
        };

        let mut queue = self.completion.lock();
        if queue.held {
            queue.pending.push_back((Arc::clone(state), value));
        } else {
            state.complete(value);
        }
        Ok(())
    }
}

fn write_software_descriptor(
    table: &GpuDescriptorTable,
    index: u32,
    descriptor: SoftwareDescriptor,
) -> Result<(), RenderError> {
    let (capacity, entries) = match table {
        GpuDescriptorTable::Software {
            capacity, entries, ..
        } => (capacity, entries),
        #[cfg(feature = "vulkan-backend")]
        _ => {
            return Err(RenderError::InvalidParameter(
                "table does not belong to the software backend".to_string(),
            ))
        }
    };

    if index >= *capacity {
        return Err(RenderError::InvalidParameter(format!(
            "descriptor index {} out of range (capacity {})",
            index, capacity
        )));
    }

    entries.lock()[index as usize] = Some(descriptor);
    Ok(())
}

fn push_command(list: &GpuCommandList, command: SoftwareCommand) {
    let (commands, state) = match list {
        GpuCommandList::Software { commands, state } => (commands, state),
        #[cfg(feature = "vulkan-backend")]
        _ => return,
    };
    debug_assert_eq!(*state.lock(), SoftwareListState::Open);
    commands.lock().push(command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, DescriptorTableKind, TextureUsage};

    #[test]
    fn test_buffer_round_trip() {
        let backend = SoftwareBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::UPLOAD).with_label("rt"))
            .unwrap();

        backend.write_buffer(&buffer, 8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.read_buffer(&buffer, 8, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_buffer_write_out_of_bounds() {
        let backend = SoftwareBackend::new();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(16, BufferUsage::UPLOAD))
            .unwrap();
        assert!(backend.write_buffer(&buffer, 14, &[0; 4]).is_err());
    }

    #[test]
    fn test_distinct_gpu_addresses() {
        let backend = SoftwareBackend::new();
        let a = backend
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::UPLOAD))
            .unwrap();
        let b = backend
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::UPLOAD))
            .unwrap();
        assert_ne!(a.gpu_address(), b.gpu_address());
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let backend = SoftwareBackend::new();
        let fence = backend.create_fence(0).unwrap();
        assert_eq!(backend.fence_completed_value(&fence), 0);

        backend.signal_fence(&fence, 3).unwrap();
        assert_eq!(backend.fence_completed_value(&fence), 3);

        // Waiting on an already reached value returns immediately.
        backend.wait_fence(&fence, 2).unwrap();
    }

    #[test]
    fn test_held_completion_defers_signals() {
        let backend = SoftwareBackend::new();
        let fence = backend.create_fence(0).unwrap();

        backend.hold_completion();
        backend.signal_fence(&fence, 1).unwrap();
        backend.signal_fence(&fence, 2).unwrap();
        assert_eq!(backend.fence_completed_value(&fence), 0);
        assert_eq!(backend.pending_signals(), 2);

        assert!(backend.complete_one());
        assert_eq!(backend.fence_completed_value(&fence), 1);

        backend.release_completion();
        assert_eq!(backend.fence_completed_value(&fence), 2);
        assert_eq!(backend.pending_signals(), 0);
    }

    #[test]
    fn test_command_list_state_machine() {
        let backend = SoftwareBackend::new();
        let list = backend.create_command_list().unwrap();

        // Submitting a never-opened list is fine (it is closed and empty).
        backend.submit(&list).unwrap();

        backend.begin_commands(&list).unwrap();
        assert!(backend.begin_commands(&list).is_err());
        assert!(backend.submit(&list).is_err());
        backend.end_commands(&list).unwrap();
        assert!(backend.end_commands(&list).is_err());
        backend.submit(&list).unwrap();
    }

    #[test]
    fn test_describe_descriptor() {
        let backend = SoftwareBackend::new();
        let table = backend
            .create_descriptor_table(&DescriptorTableDescriptor::new(
                DescriptorTableKind::Resource,
                8,
                true,
            ))
            .unwrap();
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(96, BufferUsage::SHADER_RESOURCE))
            .unwrap();

        backend
            .write_buffer_view(
                &table,
                0,
                &buffer,
                &BufferViewDescriptor {
                    first_element: 0,
                    element_count: 3,
                    element_stride: 32,
                },
            )
            .unwrap();

        let description = backend.describe_descriptor(&table, 0).unwrap();
        assert!(description.contains("3 elements of 32 bytes"));
        assert!(backend.describe_descriptor(&table, 1).is_none());
    }

    #[test]
    fn test_clear_applies_on_submit() {
        let backend = SoftwareBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(
                2,
                2,
                TextureFormat::Rgba8Unorm,
                TextureUsage::RENDER_ATTACHMENT,
            ))
            .unwrap();

        let table = backend
            .create_descriptor_table(&DescriptorTableDescriptor::new(
                DescriptorTableKind::RenderTarget,
                4,
                false,
            ))
            .unwrap();
        backend.write_render_target_view(&table, 0, &texture).unwrap();

        let list = backend.create_command_list().unwrap();
        backend.begin_commands(&list).unwrap();
        backend.record_begin_render_pass(&list, &table, 0, [1.0, 0.0, 0.0, 1.0]);
        backend.record_end_render_pass(&list);
        backend.end_commands(&list).unwrap();

        // Not applied until submit.
        assert_eq!(backend.read_texture(&texture)[0], 0);

        backend.submit(&list).unwrap();
        let data = backend.read_texture(&texture);
        assert_eq!(&data[0..4], &[255, 0, 0, 255]);
    }
}
