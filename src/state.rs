//! Resource state tracking and barrier generation.
//!
//! Each GPU resource carries a [`ResourceState`] tag recording its
//! last-known usage. The tag is advanced synchronously with command
//! recording, not with execution: it must always reflect the state the
//! resource will be in once all previously recorded commands execute.
//! [`transition`] computes the minimal barrier needed before a new usage
//! and skips redundant transitions entirely.

use std::sync::Arc;

use crate::backend::GpuTexture;

/// Usage state of a GPU resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// No specific usage; initial state for freshly created resources.
    #[default]
    Common,
    /// Written as a color render target.
    RenderTarget,
    /// Source of a copy command.
    CopySrc,
    /// Destination of a copy command.
    CopyDst,
    /// Readable by shaders.
    ShaderResource,
    /// Ready for presentation.
    Present,
}

/// A single state-transition barrier for one texture.
///
/// State is tracked per whole resource, not per sub-region; this is valid
/// only for single-subresource objects, which is all this core creates.
#[derive(Debug, Clone)]
pub struct TextureBarrier {
    /// The texture being transitioned.
    pub texture: Arc<GpuTexture>,
    /// State the texture is in when the barrier executes.
    pub before: ResourceState,
    /// State the texture will be in after the barrier.
    pub after: ResourceState,
}

/// Compute the barrier needed to move `texture` from `*current` to
/// `desired`, updating `*current` as a side effect.
///
/// Returns `None` when the texture is already in the desired state; no
/// redundant barrier is ever produced. Must be called before recording any
/// command that assumes the resource is in `desired`. The state variable
/// is owned by whichever entity tracks the resource's lifetime (the frame
/// context for its presentable target, the creator for anything else).
pub fn transition(
    texture: &Arc<GpuTexture>,
    current: &mut ResourceState,
    desired: ResourceState,
) -> Option<TextureBarrier> {
    if *current == desired {
        return None;
    }

    let barrier = TextureBarrier {
        texture: Arc::clone(texture),
        before: *current,
        after: desired,
    };
    *current = desired;

    Some(barrier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Extent3d, TextureFormat};
    use parking_lot::Mutex;

    fn test_texture() -> Arc<GpuTexture> {
        Arc::new(GpuTexture::Software {
            data: Mutex::new(vec![0; 16]),
            size: Extent3d::new_2d(2, 2),
            format: TextureFormat::Rgba8Unorm,
            label: None,
        })
    }

    #[test]
    fn test_noop_transition_produces_no_barrier() {
        let texture = test_texture();
        let mut state = ResourceState::RenderTarget;

        let barrier = transition(&texture, &mut state, ResourceState::RenderTarget);
        assert!(barrier.is_none());
        assert_eq!(state, ResourceState::RenderTarget);
    }

    #[test]
    fn test_transition_produces_one_barrier_and_updates_state() {
        let texture = test_texture();
        let mut state = ResourceState::Present;

        let barrier = transition(&texture, &mut state, ResourceState::RenderTarget)
            .expect("state change must produce a barrier");
        assert_eq!(barrier.before, ResourceState::Present);
        assert_eq!(barrier.after, ResourceState::RenderTarget);
        assert_eq!(state, ResourceState::RenderTarget);

        // A second call for the same target state is now a no-op.
        assert!(transition(&texture, &mut state, ResourceState::RenderTarget).is_none());
    }

    #[test]
    fn test_transition_chain() {
        let texture = test_texture();
        let mut state = ResourceState::Common;

        let b1 = transition(&texture, &mut state, ResourceState::CopyDst).unwrap();
        assert_eq!(b1.before, ResourceState::Common);

        let b2 = transition(&texture, &mut state, ResourceState::ShaderResource).unwrap();
        assert_eq!(b2.before, ResourceState::CopyDst);
        assert_eq!(b2.after, ResourceState::ShaderResource);
        assert_eq!(state, ResourceState::ShaderResource);
    }
}
