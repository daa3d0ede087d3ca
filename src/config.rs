//! Core configuration.
//!
//! Every fixed capacity in the core is surfaced here. The capacities are
//! deliberate policy, not limits to be grown at runtime: exhausting any of
//! them is treated as a sizing bug at the call site.

/// Configuration for a [`RenderDevice`](crate::device::RenderDevice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    /// Number of frames the CPU may prepare ahead of the GPU. Must be >= 2
    /// for CPU/GPU overlap; with 1 every frame serializes on the previous
    /// frame's completion.
    pub frame_latency: usize,
    /// Capacity of each frame's linear upload allocator, in bytes.
    pub upload_arena_size: u64,
    /// Slot capacity of the shader-visible resource-view table.
    pub resource_table_capacity: u32,
    /// Slot capacity of the CPU-only render-target-view table.
    pub render_target_table_capacity: u32,
    /// Capacity for bounded per-scene draw lists handed out by the demos.
    pub draw_list_capacity: usize,
    /// Width of the presentable targets, in pixels.
    pub width: u32,
    /// Height of the presentable targets, in pixels.
    pub height: u32,
    /// Enable API-level and GPU-assisted validation where the backend
    /// supports it.
    pub validation: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_latency: 3,
            upload_arena_size: 64 * 1024,
            resource_table_capacity: 4096,
            render_target_table_capacity: 64,
            draw_list_capacity: 16,
            width: 1280,
            height: 720,
            validation: cfg!(debug_assertions),
        }
    }
}

impl RenderConfig {
    /// Set the frame latency.
    pub fn with_frame_latency(mut self, frames: usize) -> Self {
        self.frame_latency = frames;
        self
    }

    /// Set the per-frame upload arena size in bytes.
    pub fn with_upload_arena_size(mut self, bytes: u64) -> Self {
        self.upload_arena_size = bytes;
        self
    }

    /// Set the resource-view table capacity.
    pub fn with_resource_table_capacity(mut self, slots: u32) -> Self {
        self.resource_table_capacity = slots;
        self
    }

    /// Set the render-target-view table capacity.
    pub fn with_render_target_table_capacity(mut self, slots: u32) -> Self {
        self.render_target_table_capacity = slots;
        self
    }

    /// Set the presentable target size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RenderConfig::default();
        assert_eq!(config.frame_latency, 3);
        assert_eq!(config.upload_arena_size, 64 * 1024);
        assert_eq!(config.resource_table_capacity, 4096);
        assert_eq!(config.render_target_table_capacity, 64);
    }

    #[test]
    fn test_builder() {
        let config = RenderConfig::default()
            .with_frame_latency(2)
            .with_size(640, 480)
            .with_validation(false);
        assert_eq!(config.frame_latency, 2);
        assert_eq!(config.width, 640);
        assert!(!config.validation);
    }
}
