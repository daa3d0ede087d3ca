//! Descriptor types and shared constants.
//!
//! These are the declarative inputs handed to the GPU backend when creating
//! resources. They carry no backend state themselves.

use bitflags::bitflags;

/// Required row pitch alignment for buffer-to-texture copies, in bytes.
///
/// Texel rows staged in an upload arena must start at multiples of this.
pub const ROW_PITCH_ALIGNMENT: u64 = 256;

/// Required placement alignment for staged texture data, in bytes.
pub const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

/// Required alignment for constant-buffer allocations, in bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Align a value up to the given power-of-two alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// CPU-writable, GPU-readable (upload heap). All buffers in this
        /// core live in upload memory; the flag exists so backends can
        /// place future device-local buffers differently.
        const UPLOAD = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be read by shaders through a resource-table view.
        const SHADER_RESOURCE = 1 << 2;
        /// Buffer can be the source of a copy command.
        const COPY_SRC = 1 << 3;
        /// Buffer can be read as a constant buffer.
        const CONSTANT = 1 << 4;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Usage flags for textures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Texture can be rendered to.
        const RENDER_ATTACHMENT = 1 << 0;
        /// Texture can be sampled by shaders through a resource-table view.
        const TEXTURE_BINDING = 1 << 1;
        /// Texture can be the destination of a copy command.
        const COPY_DST = 1 << 2;
        /// Texture can be presented (or blitted) to a surface.
        const PRESENT = 1 << 3;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Texture formats supported by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    #[default]
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA, sRGB (common surface format).
    Bgra8UnormSrgb,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb => 4,
        }
    }
}

/// Texture extent in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth or array layer count.
    pub depth: u32,
}

impl Extent3d {
    /// Create a 2D extent (depth 1).
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Descriptor for creating a texture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    /// Debug label for the texture.
    pub label: Option<String>,
    /// Extent in texels.
    pub size: Extent3d,
    /// Texel format.
    pub format: TextureFormat,
    /// Usage flags.
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            label: None,
            size: Extent3d::new_2d(width, height),
            format,
            usage,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tightly packed size of one row of texels, in bytes.
    pub fn unpadded_row_pitch(&self) -> u64 {
        u64::from(self.size.width) * self.format.bytes_per_pixel()
    }

    /// Row pitch padded to [`ROW_PITCH_ALIGNMENT`], as required for staged copies.
    pub fn padded_row_pitch(&self) -> u64 {
        align_up(self.unpadded_row_pitch(), ROW_PITCH_ALIGNMENT)
    }
}

/// The kind of descriptors a binding table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorTableKind {
    /// Shader-readable buffer and texture views, indexable from shaders.
    Resource,
    /// Render-target views, bound by the CPU when opening a render pass.
    RenderTarget,
}

/// Descriptor for creating a binding table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DescriptorTableDescriptor {
    /// Debug label for the table.
    pub label: Option<String>,
    /// Kind of descriptors held.
    pub kind: DescriptorTableKind,
    /// Fixed slot capacity. The table never grows.
    pub capacity: u32,
    /// Whether slots are directly indexable from GPU-executed code.
    pub shader_visible: bool,
}

impl DescriptorTableDescriptor {
    /// Create a new table descriptor.
    pub fn new(kind: DescriptorTableKind, capacity: u32, shader_visible: bool) -> Self {
        Self {
            label: None,
            kind,
            capacity,
            shader_visible,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Descriptor for a structured-buffer view written into a resource table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferViewDescriptor {
    /// First element visible through the view.
    pub first_element: u64,
    /// Number of elements visible through the view.
    pub element_count: u64,
    /// Stride of one element in bytes.
    pub element_stride: u64,
}

/// Index buffer element format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

/// Descriptor for creating a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineDescriptor {
    /// Debug label for the pipeline.
    pub label: Option<String>,
    /// Vertex shader bytecode (SPIR-V words).
    pub vertex_shader: Vec<u32>,
    /// Vertex shader entry point name.
    pub vertex_entry: String,
    /// Fragment shader bytecode (SPIR-V words).
    pub fragment_shader: Vec<u32>,
    /// Fragment shader entry point name.
    pub fragment_entry: String,
    /// Format of the single color target.
    pub color_format: TextureFormat,
    /// Enable straight-alpha "over" blending on the color target.
    pub alpha_blend: bool,
}

impl PipelineDescriptor {
    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(100, 64), 128);
    }

    #[test]
    fn test_row_pitches() {
        let desc = TextureDescriptor::new_2d(
            30,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        assert_eq!(desc.unpadded_row_pitch(), 120);
        assert_eq!(desc.padded_row_pitch(), 256);

        let desc = TextureDescriptor::new_2d(
            64,
            4,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        );
        assert_eq!(desc.unpadded_row_pitch(), 256);
        assert_eq!(desc.padded_row_pitch(), 256);
    }

    #[test]
    fn test_descriptor_builders() {
        let desc = BufferDescriptor::new(1024, BufferUsage::UPLOAD).with_label("scratch");
        assert_eq!(desc.label.as_deref(), Some("scratch"));
        assert_eq!(desc.size, 1024);
    }
}
