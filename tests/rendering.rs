//! End-to-end recording test: the original bindless draw loop shape,
//! executed headlessly on the software backend.

use std::sync::Arc;

use render_core::backend::software::SoftwareBackend;
use render_core::{
    BoundedList, BufferViewDescriptor, GpuBackend, IndexFormat, PipelineDescriptor, RenderConfig,
    RenderDevice, ShaderCompiler, ShaderStage, TextureFormat,
};

const SHADER_SOURCE: &str = r#"
struct PassConstants {
    vertex_buffer_index: u32,
}

struct PushData {
    offset: vec2<f32>,
    alpha: f32,
    pass_constants_index: u32,
}

var<push_constant> push_data: PushData;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(push_data.offset, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 1.0, 1.0, push_data.alpha);
}
"#;

#[derive(Clone, Copy)]
struct DrawItem {
    offset: [f32; 2],
    alpha: f32,
}

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

#[test]
fn bindless_draw_loop_records_and_executes() {
    let software = Arc::new(SoftwareBackend::new());
    let backend: Arc<dyn GpuBackend> = software.clone();
    let config = RenderConfig::default().with_size(8, 8);
    let draw_capacity = config.draw_list_capacity;
    let mut device = RenderDevice::new(backend, config).unwrap();

    // Startup: shaders, pipeline, static geometry.
    let compiler = ShaderCompiler::new();
    let vs = compiler
        .compile(SHADER_SOURCE, "vs_main", ShaderStage::Vertex)
        .unwrap();
    let fs = compiler
        .compile(SHADER_SOURCE, "fs_main", ShaderStage::Fragment)
        .unwrap();

    let pipeline = device
        .backend()
        .create_pipeline(
            &PipelineDescriptor {
                label: None,
                vertex_shader: vs,
                vertex_entry: "vs_main".to_string(),
                fragment_shader: fs,
                fragment_entry: "fs_main".to_string(),
                color_format: TextureFormat::Rgba8UnormSrgb,
                alpha_blend: true,
            }
            .with_label("triangle"),
        )
        .unwrap();

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

    let vertex_buffer = device
        .create_upload_buffer(
            std::mem::size_of_val(&vertices) as u64,
            "vertices",
            Some(bytemuck::cast_slice(&vertices)),
        )
        .unwrap();
    let index_buffer = device
        .create_upload_buffer(
            std::mem::size_of_val(&indices) as u64,
            "indices",
            Some(bytemuck::cast_slice(&indices)),
        )
        .unwrap();

    let vertex_view = device
        .create_buffer_view(
            &vertex_buffer,
            &BufferViewDescriptor {
                first_element: 0,
                element_count: vertices.len() as u64,
                element_stride: std::mem::size_of::<Vertex>() as u64,
            },
        )
        .unwrap();

    let mut draw_items: BoundedList<DrawItem> = BoundedList::new(draw_capacity);
    for i in 0..4 {
        draw_items
            .push(DrawItem {
                offset: [0.1 * i as f32, 0.0],
                alpha: 1.0,
            })
            .unwrap();
    }

    // Two frames of the original's render loop.
    for _ in 0..2 {
        device.begin_frame().unwrap();

        let pass_constants = PassConstants {
            vertex_buffer_index: vertex_view.index,
            padding: [0; 3],
        };
        let pass_alloc = device
            .current_frame_mut()
            .alloc_and_write(bytemuck::bytes_of(&pass_constants), 256)
            .unwrap();
        assert_eq!(pass_alloc.offset % 256, 0);

        device.begin_backbuffer_pass([0.2, 0.3, 0.2, 1.0]).unwrap();

        let backend = device.backend().clone();
        let commands = device.current_frame().commands();
        backend.record_set_pipeline(commands, &pipeline);
        backend.record_set_index_buffer(commands, &index_buffer, 0, IndexFormat::Uint16);

        for item in &draw_items {
            let push: [f32; 4] = [
                item.offset[0],
                item.offset[1],
                item.alpha,
                f32::from_bits(vertex_view.index),
            ];
            backend.record_push_constants(commands, 0, bytemuck::bytes_of(&push));
            backend.record_draw_indexed(commands, indices.len() as u32, 1, 0);
        }

        device.end_backbuffer_pass();
        device.end_frame().unwrap();
    }

    // Both frames submitted, presented, and fully executed.
    assert_eq!(software.submits(), 2);
    assert_eq!(software.presents(), 2);
    assert_eq!(software.draws_executed(), 8);
    assert_eq!(device.fence_completed(), 2);

    // The second frame's clear landed in slot 1's backbuffer.
    let backbuffer = device.ring().frame(1).backbuffer().clone();
    let pixels = software.read_texture(&backbuffer);
    assert_eq!(&pixels[0..4], &[51, 77, 51, 255]);
}

#[test]
fn draw_list_capacity_is_enforced() {
    let mut draw_items: BoundedList<DrawItem> = BoundedList::new(2);
    draw_items
        .push(DrawItem {
            offset: [0.0, 0.0],
            alpha: 1.0,
        })
        .unwrap();
    draw_items
        .push(DrawItem {
            offset: [0.0, 0.0],
            alpha: 1.0,
        })
        .unwrap();
    assert!(draw_items
        .push(DrawItem {
            offset: [0.0, 0.0],
            alpha: 1.0,
        })
        .is_err());
}
