//! Frame contexts and the frame ring.
//!
//! The ring holds N frame contexts (N = frame latency). Each context owns
//! everything the CPU mutates while building one frame: a linear upload
//! allocator, a command-recording context, the presentable target for its
//! slot, and the fence value that proves the GPU finished the slot's
//! previous use. Contexts are reused round-robin for the process lifetime.

use std::sync::Arc;

use crate::alloc::{DescriptorSlot, LinearAllocator, TransientAllocation};
use crate::backend::{GpuBackend, GpuCommandList, GpuTexture};
use crate::error::RenderError;
use crate::state::{transition, ResourceState};

/// One element of the frame ring.
pub struct FrameContext {
    backend: Arc<dyn GpuBackend>,
    /// Fence value that, once reached, proves this slot's prior GPU work
    /// is done and its resources may be reused. Zero until first submission.
    fence_target: u64,
    arena: LinearAllocator,
    commands: GpuCommandList,
    backbuffer: Arc<GpuTexture>,
    backbuffer_state: ResourceState,
    render_target: DescriptorSlot,
}

impl FrameContext {
    /// Assemble a frame context from its startup-created parts.
    ///
    /// The backbuffer starts tagged [`ResourceState::Present`], matching
    /// the state presentable targets are created in.
    pub(crate) fn new(
        backend: Arc<dyn GpuBackend>,
        arena: LinearAllocator,
        commands: GpuCommandList,
        backbuffer: Arc<GpuTexture>,
        render_target: DescriptorSlot,
    ) -> Self {
        Self {
            backend,
            fence_target: 0,
            arena,
            commands,
            backbuffer,
            backbuffer_state: ResourceState::Present,
            render_target,
        }
    }

    /// Fence value this slot waits on before reuse.
    pub fn fence_target(&self) -> u64 {
        self.fence_target
    }

    pub(crate) fn set_fence_target(&mut self, value: u64) {
        self.fence_target = value;
    }

    /// This frame's linear upload allocator.
    pub fn allocator(&self) -> &LinearAllocator {
        &self.arena
    }

    /// Mutable access to this frame's linear upload allocator.
    pub fn allocator_mut(&mut self) -> &mut LinearAllocator {
        &mut self.arena
    }

    /// This frame's command-recording context.
    pub fn commands(&self) -> &GpuCommandList {
        &self.commands
    }

    /// The presentable target owned by this slot.
    pub fn backbuffer(&self) -> &Arc<GpuTexture> {
        &self.backbuffer
    }

    /// The render-target-view slot for this slot's backbuffer.
    pub fn render_target_slot(&self) -> DescriptorSlot {
        self.render_target
    }

    /// Allocate transient memory and immediately write `data` into it.
    ///
    /// The allocation is valid only until this frame's next reset; do not
    /// retain it across frame boundaries.
    pub fn alloc_and_write(
        &mut self,
        data: &[u8],
        align: u64,
    ) -> Result<TransientAllocation, RenderError> {
        let alloc = self.arena.allocate(data.len() as u64, align)?;
        self.backend
            .write_buffer(self.arena.buffer(), alloc.offset, data)?;
        Ok(alloc)
    }

    /// Transition the backbuffer to `desired`, recording a barrier into
    /// this frame's command list when one is needed.
    pub fn transition_backbuffer(&mut self, desired: ResourceState) {
        if let Some(barrier) = transition(&self.backbuffer, &mut self.backbuffer_state, desired) {
            self.backend.record_barrier(&self.commands, &barrier);
        }
    }

    /// Current tracked state of the backbuffer.
    pub fn backbuffer_state(&self) -> ResourceState {
        self.backbuffer_state
    }

    /// Reclaim the slot for a new frame: reset the allocator and reopen
    /// the command list.
    ///
    /// Only called after the slot's fence target is confirmed reached.
    pub(crate) fn reset_for_recording(&mut self) -> Result<(), RenderError> {
        self.arena.reset();
        self.backend.begin_commands(&self.commands)
    }
}

impl std::fmt::Debug for FrameContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("fence_target", &self.fence_target)
            .field("arena", &self.arena)
            .field("backbuffer_state", &self.backbuffer_state)
            .finish_non_exhaustive()
    }
}

/// Fixed-size ring of frame contexts selected round-robin by frame counter.
pub struct FrameRing {
    frames: Vec<FrameContext>,
}

impl FrameRing {
    /// Build a ring from startup-created contexts. Latency must be at
    /// least 1; with 1 the CPU serializes on the GPU every frame, so 2 or
    /// more is the useful range.
    pub(crate) fn new(frames: Vec<FrameContext>) -> Self {
        assert!(!frames.is_empty(), "frame ring requires at least one slot");
        Self { frames }
    }

    /// Number of slots (the frame latency N).
    pub fn latency(&self) -> usize {
        self.frames.len()
    }

    /// Ring slot used by the given frame counter value.
    pub fn slot_for(&self, frame_counter: u64) -> usize {
        (frame_counter % self.frames.len() as u64) as usize
    }

    /// The context for the given frame counter value.
    pub fn frame(&self, frame_counter: u64) -> &FrameContext {
        &self.frames[self.slot_for(frame_counter)]
    }

    /// Mutable context for the given frame counter value.
    pub fn frame_mut(&mut self, frame_counter: u64) -> &mut FrameContext {
        let slot = self.slot_for(frame_counter);
        &mut self.frames[slot]
    }

    /// Iterate over all slots (shutdown walks these to find the highest
    /// fence target).
    pub fn iter(&self) -> std::slice::Iter<'_, FrameContext> {
        self.frames.iter()
    }
}

impl std::fmt::Debug for FrameRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRing")
            .field("latency", &self.latency())
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_selection_wraps() {
        // Ring arithmetic alone; contexts are exercised in the device tests.
        let counters = [0u64, 1, 2, 3, 4, 5, 6];
        let latency = 3u64;
        let slots: Vec<u64> = counters.iter().map(|c| c % latency).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }
}
