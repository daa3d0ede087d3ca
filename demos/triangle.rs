//! Headless bindless triangle demo.
//!
//! Drives the frame core the way the windowed renderer does (vertex
//! pulling through the shared resource table, per-draw push constants,
//! per-pass constants from the frame allocator) but on the software
//! backend, so it runs anywhere. Run with `RUST_LOG=trace` for the frame
//! pacing trace.

use std::sync::Arc;
use std::time::Instant;

use render_core::backend::software::SoftwareBackend;
use render_core::{
    BoundedList, BufferViewDescriptor, GpuBackend, IndexFormat, PipelineDescriptor, RenderConfig,
    RenderDevice, RenderError, ShaderCompiler, ShaderStage, TextureDescriptor, TextureFormat,
    TextureUsage,
};

const FRAME_COUNT: u64 = 120;

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

@group(0) @binding(0) var<storage, read> vertex_buffers: array<Vertex>;

var<push_constant> push_data: PushData;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    let vertex = vertex_buffers[index];
    var out: VertexOutput;
    out.position = vec4<f32>(vertex.position + push_data.offset, 0.0, 1.0);
    out.uv = vertex.uv;
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
struct PassConstants {
    vertex_buffer_index: u32,
    padding: [u32; 3],
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

struct Scene {
    pipeline: Arc<render_core::backend::GpuPipeline>,
    index_buffer: Arc<render_core::GpuBuffer>,
    vertex_view: render_core::DescriptorSlot,
    guys: BoundedList<TriangleGuy>,
}

fn init_scene(device: &mut RenderDevice) -> Result<Scene, RenderError> {
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
            position: [0.0, 0.5],
            uv: [0.5, 1.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        Vertex {
            position: [0.5, -0.5],
            uv: [1.0, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        Vertex {
            position: [-0.5, -0.5],
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

    // The resource table keeps the vertex buffer alive through its view.
    Ok(Scene {
        pipeline,
        index_buffer,
        vertex_view,
        guys,
    })
}

fn update_scene(scene: &mut Scene, time: f64) {
    for (i, guy) in scene.guys.iter_mut().enumerate() {
        let i = i as f64;
        guy.position[0] = (0.5 * (0.6 * i + 1.25 * time).sin()) as f32;
        guy.position[1] = (0.3 * (0.4 * i + 0.65 * time).sin()) as f32;
        guy.alpha = 0.75 + 0.25 * (0.6 * (0.8 * i + 0.75 * time).sin()) as f32;
    }
}

fn render_scene(device: &mut RenderDevice, scene: &Scene) -> Result<(), RenderError> {
    let pass_constants = PassConstants {
        vertex_buffer_index: scene.vertex_view.index,
        padding: [0; 3],
    };
    let _pass_alloc = device
        .current_frame_mut()
        .alloc_and_write(bytemuck::bytes_of(&pass_constants), 256)?;

    device.begin_backbuffer_pass([0.2, 0.3, 0.2, 1.0])?;

    let backend = device.backend().clone();
    let commands = device.current_frame().commands();
    backend.record_set_pipeline(commands, &scene.pipeline);
    backend.record_set_index_buffer(commands, &scene.index_buffer, 0, IndexFormat::Uint16);

    for guy in &scene.guys {
        let push = PushData {
            offset: guy.position,
            alpha: guy.alpha,
            vertex_buffer_index: scene.vertex_view.index,
        };
        backend.record_push_constants(commands, 0, bytemuck::bytes_of(&push));
        backend.record_draw_indexed(commands, 3, 1, 0);
    }

    device.end_backbuffer_pass();
    Ok(())
}

fn run() -> Result<(), RenderError> {
    let software = Arc::new(SoftwareBackend::new());
    let backend: Arc<dyn GpuBackend> = software.clone();
    let mut device = RenderDevice::new(backend, RenderConfig::default().with_size(640, 480))?;

    let mut scene = init_scene(&mut device)?;

    let start = Instant::now();
    for frame in 0..FRAME_COUNT {
        let time = start.elapsed().as_secs_f64();
        update_scene(&mut scene, time);

        device.begin_frame()?;

        // Queued uploads go through the first frame's allocator, once a
        // frame context is guaranteed to exist.
        if frame == 0 {
            let checker: Vec<u8> = (0..16)
                .flat_map(|i| {
                    if (i % 4 + i / 4) % 2 == 0 {
                        [255, 255, 255, 255]
                    } else {
                        [32, 32, 32, 255]
                    }
                })
                .collect();
            let texture = device.create_texture_with_data(
                &TextureDescriptor::new_2d(
                    4,
                    4,
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
                )
                .with_label("checker"),
                &checker,
            )?;
            let slot = device.create_texture_view(&texture)?;
            log::info!("uploaded checker texture into resource slot {}", slot.index);
        }

        render_scene(&mut device, &scene)?;
        device.end_frame()?;

        if (frame + 1) % 30 == 0 {
            log::info!(
                "frame {}: fence completed {}, {} draws executed",
                frame + 1,
                device.fence_completed(),
                software.draws_executed()
            );
        }
    }

    device.wait_idle()?;
    log::info!(
        "done: {} frames, {} draws, {} presents",
        FRAME_COUNT,
        software.draws_executed(),
        software.presents()
    );

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("fatal: {e}");
        std::process::exit(1);
    }
}
