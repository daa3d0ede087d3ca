//! Windowed bindless triangle demo on the native Vulkan backend.
//!
//! Build with `--features vulkan-backend`. Requires a Vulkan 1.3 driver
//! with descriptor indexing and timeline semaphores.

use std::sync::Arc;
use std::time::Instant;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use render_core::backend::vulkan::VulkanBackend;
use render_core::{
    BoundedList, BufferViewDescriptor, DescriptorSlot, GpuBackend, GpuBuffer, GpuPipeline,
    IndexFormat, PipelineDescriptor, RenderConfig, RenderDevice, RenderError, ShaderCompiler,
    ShaderStage, TextureFormat,
};

const SHADER_SOURCE: &str = r#"
struct Vertex {
    position: vec2<f32>,
    uv: vec2<f32>,
    color: vec4<f32>,
}

struct PushData {
    offset: vec2<f32>,
    alpha: f32,
    vertex_buffer_index: u32,
}

@group(0) @binding(0) var<storage, read> vertices: array<Vertex>;

var<push_constant> push_data: PushData;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let vertex = vertices[index];
    var out: VertexOutput;
    out.position = vec4<f32>(vertex.position + push_data.offset, 0.0, 1.0);
    out.color = vertex.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.color.rgb, in.color.a * push_data.alpha);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 2],
    uv: [f32; 2],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PushData {
    offset: [f32; 2],
    alpha: f32,
    vertex_buffer_index: u32,
}

struct TriangleGuy {
    position: [f32; 2],
    alpha: f32,
}

struct Renderer {
    device: RenderDevice,
    pipeline: Arc<GpuPipeline>,
    index_buffer: Arc<GpuBuffer>,
    vertex_view: DescriptorSlot,
    guys: BoundedList<TriangleGuy>,
    start: Instant,
    // The vertex buffer must stay alive while the view references it.
    _vertex_buffer: Arc<GpuBuffer>,
}

impl Renderer {
    fn new(window: &Window) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let config = RenderConfig::default().with_size(size.width.max(1), size.height.max(1));

        let display = window
            .display_handle()
            .map_err(|e| RenderError::InitializationFailed(format!("display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RenderError::InitializationFailed(format!("window handle: {e}")))?
            .as_raw();

        let backend: Arc<dyn GpuBackend> =
            Arc::new(VulkanBackend::new_windowed(&config, display, window_handle)?);
        let mut device = RenderDevice::new(backend, config)?;

        let compiler = ShaderCompiler::new();
        let vs = compiler.compile(SHADER_SOURCE, "vs_main", ShaderStage::Vertex)?;
        let fs = compiler.compile(SHADER_SOURCE, "fs_main", ShaderStage::Fragment)?;

        let pipeline = device.backend().create_pipeline(
            &PipelineDescriptor {
                label: None,
                vertex_shader: vs,
                vertex_entry: "vs_main".to_string(),
                fragment_shader: fs,
                fragment_entry: "fs_main".to_string(),
                color_format: TextureFormat::Rgba8UnormSrgb,
                alpha_blend: true,
            }
            .with_label("triangle_pso"),
        )?;

        let vertices = [
            Vertex {
                position: [0.0, -0.5],
                uv: [0.5, 1.0],
                color: [1.0, 0.0, 0.0, 1.0],
            },
            Vertex {
                position: [0.5, 0.5],
                uv: [1.0, 0.0],
                color: [0.0, 1.0, 0.0, 1.0],
            },
            Vertex {
                position: [-0.5, 0.5],
                uv: [0.0, 0.0],
                color: [0.0, 0.0, 1.0, 1.0],
            },
        ];
        let indices: [u16; 3] = [0, 1, 2];

        let vertex_buffer = device.create_upload_buffer(
            std::mem::size_of_val(&vertices) as u64,
            "triangle_vertices",
            Some(bytemuck::cast_slice(&vertices)),
        )?;
        let index_buffer = device.create_upload_buffer(
            std::mem::size_of_val(&indices) as u64,
            "triangle_indices",
            Some(bytemuck::cast_slice(&indices)),
        )?;

        let vertex_view = device.create_buffer_view(
            &vertex_buffer,
            &BufferViewDescriptor {
                first_element: 0,
                element_count: vertices.len() as u64,
                element_stride: std::mem::size_of::<Vertex>() as u64,
            },
        )?;

        let mut guys = BoundedList::new(device.config().draw_list_capacity);
        for _ in 0..8 {
            guys.push(TriangleGuy {
                position: [0.0, 0.0],
                alpha: 1.0,
            })?;
        }

        Ok(Self {
            device,
            pipeline,
            index_buffer,
            vertex_view,
            guys,
            start: Instant::now(),
            _vertex_buffer: vertex_buffer,
        })
    }

    fn render(&mut self) -> Result<(), RenderError> {
        let time = self.start.elapsed().as_secs_f64();
        for (i, guy) in self.guys.iter_mut().enumerate() {
            let i = i as f64;
            guy.position[0] = (0.5 * (0.6 * i + 1.25 * time).sin()) as f32;
            guy.position[1] = (0.3 * (0.4 * i + 0.65 * time).sin()) as f32;
            guy.alpha = 0.75 + 0.25 * (0.6 * (0.8 * i + 0.75 * time).sin()) as f32;
        }

        self.device.begin_frame()?;
        self.device.begin_backbuffer_pass([0.2, 0.3, 0.2, 1.0])?;

        let backend = self.device.backend().clone();
        let commands = self.device.current_frame().commands();
        backend.record_set_pipeline(commands, &self.pipeline);
        backend.record_set_index_buffer(commands, &self.index_buffer, 0, IndexFormat::Uint16);

        for guy in &self.guys {
            let push = PushData {
                offset: guy.position,
                alpha: guy.alpha,
                vertex_buffer_index: self.vertex_view.index,
            };
            backend.record_push_constants(commands, 0, bytemuck::bytes_of(&push));
            backend.record_draw_indexed(commands, 3, 1, 0);
        }

        self.device.end_backbuffer_pass();
        self.device.end_frame()
    }
}

#[derive(Default)]
struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = Window::default_attributes()
            .with_title("render-core - bindless triangles")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));

        match event_loop.create_window(attributes) {
            Ok(window) => {
                match Renderer::new(&window) {
                    Ok(renderer) => self.renderer = Some(renderer),
                    Err(e) => {
                        log::error!("fatal: {e}");
                        event_loop.exit();
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                // Drop the renderer first; its teardown waits for the GPU.
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(renderer) = self.renderer.as_mut() {
                    if let Err(e) = renderer.render() {
                        log::error!("fatal: {e}");
                        event_loop.exit();
                    }
                }
                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let event_loop = EventLoop::new().expect("failed to create event loop");
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::default();
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {e}");
    }
}
