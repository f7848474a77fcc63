//! GPU integration tests. Each test requests a headless device and returns
//! early (with a note on stderr) when the machine has no usable adapter.

use kroma_engine::coords::{ColorRgba, Vec2};
use kroma_engine::device::{request_headless, GpuInit, HeadlessGpu};
use kroma_engine::gpu::{transfer, BufferKind, GpuBuffer, TransferError};
use kroma_engine::particles::{EmitterConfig, Particle, ParticleEmitter, MAX_PARTICLES};
use kroma_engine::render::pipeline::create_batch_pipeline;
use kroma_engine::render::{BatchConfig, BatchRenderer, QuadBatch, QuadSink, RenderCtx};

fn gpu() -> Option<HeadlessGpu> {
    match pollster::block_on(request_headless(&GpuInit::default())) {
        Ok(g) => Some(g),
        Err(e) => {
            eprintln!("skipping GPU test: {e:#}");
            None
        }
    }
}

fn ctx(g: &HeadlessGpu) -> RenderCtx<'_> {
    RenderCtx::new(&g.device, &g.queue, wgpu::TextureFormat::Rgba8Unorm)
}

fn storage(g: &HeadlessGpu, size: u64) -> GpuBuffer {
    GpuBuffer::create(&g.device, &g.queue, BufferKind::Storage, "test storage", None, size, 0)
        .unwrap()
}

/// Side of the square offscreen target used by the draw tests.
const TARGET: u32 = 64;
const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const OPAQUE_RED: [u8; 4] = [255, 0, 0, 255];
const CLEAR_BLUE: [u8; 4] = [0, 0, 255, 255];

/// Clears a `TARGET`-sized texture to blue, records `renderer.draw` with the
/// batch pipeline, and reads the pixels back as tightly packed RGBA rows.
fn draw_offscreen(g: &HeadlessGpu, renderer: &BatchRenderer) -> Vec<u8> {
    let extent = wgpu::Extent3d {
        width: TARGET,
        height: TARGET,
        depth_or_array_layers: 1,
    };
    let texture = g.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("test target"),
        size: extent,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let pipeline = create_batch_pipeline(&g.device, TARGET_FORMAT).unwrap();

    // 64 px * 4 B = 256 B rows, already COPY_BYTES_PER_ROW_ALIGNMENT aligned.
    let row_bytes = TARGET * 4;
    let size = (row_bytes * TARGET) as u64;
    let readback = g.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("test readback"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });

    let mut encoder = g
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("test pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLUE),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline.raw());
        renderer.draw(&mut pass);
    }
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &readback,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(TARGET),
            },
        },
        extent,
    );
    g.queue.submit(std::iter::once(encoder.finish()));

    transfer::download(&g.device, &g.queue, &readback, size).unwrap()
}

fn pixel(rgba: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * TARGET + x) * 4) as usize;
    [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
}

fn moving(i: usize, lifetime: f32) -> Particle {
    Particle {
        velocity: Vec2::new(0.25 * i as f32, 1.0 - 0.125 * i as f32),
        color: ColorRgba::new(0.5, 0.25, 1.0, 1.0),
        lifetime,
        ..Particle::at_rest(Vec2::new(0.1 * i as f32, -0.2), 0.05)
    }
}

#[test]
fn upload_then_download_is_byte_identical() {
    let Some(g) = gpu() else { return };
    let buf = storage(&g, 256);
    let data: Vec<u8> = (0..=255u8).collect();

    transfer::upload(&g.device, &g.queue, buf.buffer().unwrap(), &data, 0).unwrap();
    let back = transfer::download(&g.device, &g.queue, buf.buffer().unwrap(), 256).unwrap();

    assert_eq!(back, data);
}

#[test]
fn upload_at_offset_leaves_prefix_untouched() {
    let Some(g) = gpu() else { return };
    let initial = [7u32; 16];
    let buf = GpuBuffer::create(
        &g.device,
        &g.queue,
        BufferKind::Storage,
        "offset test",
        Some(bytemuck::cast_slice(&initial)),
        64,
        16,
    )
    .unwrap();

    transfer::upload_pod(&g.device, &g.queue, buf.buffer().unwrap(), &[1u32, 2, 3, 4], 32).unwrap();
    let back: Vec<u32> =
        transfer::download_pod(&g.device, &g.queue, buf.buffer().unwrap(), 16).unwrap();

    assert_eq!(&back[..8], &[7; 8]);
    assert_eq!(&back[8..12], &[1, 2, 3, 4]);
    assert_eq!(&back[12..], &[7; 4]);
}

#[test]
fn invalid_transfers_are_rejected() {
    let Some(g) = gpu() else { return };
    let buf = storage(&g, 64);
    let raw = buf.buffer().unwrap();

    assert!(matches!(
        transfer::upload(&g.device, &g.queue, raw, &[], 0),
        Err(TransferError::Empty)
    ));
    assert!(matches!(
        transfer::upload(&g.device, &g.queue, raw, &[1, 2, 3], 0),
        Err(TransferError::Misaligned { .. })
    ));
    assert!(matches!(
        transfer::upload(&g.device, &g.queue, raw, &[0; 8], 60),
        Err(TransferError::OutOfBounds { .. })
    ));
    assert!(matches!(
        transfer::download(&g.device, &g.queue, raw, 128),
        Err(TransferError::OutOfBounds { .. })
    ));
}

#[test]
fn download_requires_copy_src() {
    let Some(g) = gpu() else { return };
    let vertices =
        GpuBuffer::create(&g.device, &g.queue, BufferKind::Vertex, "vbo", None, 64, 0).unwrap();

    assert!(matches!(
        transfer::download(&g.device, &g.queue, vertices.buffer().unwrap(), 64),
        Err(TransferError::MissingUsage(_))
    ));
}

#[test]
fn buffer_destroy_is_idempotent() {
    let Some(g) = gpu() else { return };
    let mut buf = storage(&g, 64);
    assert!(buf.is_alive());

    buf.destroy();
    buf.destroy();

    assert!(!buf.is_alive());
    assert_eq!(buf.size(), 0);
    assert_eq!(buf.count(), 0);
}

#[test]
fn emitter_rejects_bad_counts_before_allocating() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);

    for max_particles in [0, MAX_PARTICLES + 1] {
        let cfg = EmitterConfig {
            max_particles,
            ..Default::default()
        };
        assert!(ParticleEmitter::create(&c, cfg).is_err());
    }
}

#[test]
fn emitter_starts_with_nothing_to_draw() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut emitter = ParticleEmitter::create(&c, EmitterConfig::default()).unwrap();
    assert_eq!(emitter.workgroup_count(), 157);

    emitter.update(&c, 1.0 / 60.0).unwrap();

    let mut batch = QuadBatch::new(BatchConfig { max_quads: 16 }).unwrap();
    batch.begin();
    assert_eq!(emitter.render(&c, &mut batch).unwrap(), 0);
    assert_eq!(batch.quad_count(), 0);
}

#[test]
fn zero_step_update_keeps_state() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let cfg = EmitterConfig {
        max_particles: 100,
        ..Default::default()
    };
    let mut emitter = ParticleEmitter::create(&c, cfg).unwrap();

    let seeded: Vec<Particle> = (0..100).map(|i| moving(i, 2.0)).collect();
    emitter.upload_particles(&c, &seeded).unwrap();
    emitter.update(&c, 0.0).unwrap();

    let mut batch = QuadBatch::new(BatchConfig { max_quads: 128 }).unwrap();
    batch.begin();
    assert_eq!(emitter.render(&c, &mut batch).unwrap(), 100);

    for (after, before) in emitter.particles().iter().zip(&seeded) {
        assert_eq!(after.position, before.position);
        assert_eq!(after.velocity, before.velocity);
        assert_eq!(after.lifetime, before.lifetime);
    }
}

#[test]
fn update_applies_gravity_and_ages_particles() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let cfg = EmitterConfig {
        max_particles: 4,
        damping: 0.0,
        ..Default::default()
    };
    let mut emitter = ParticleEmitter::create(&c, cfg).unwrap();

    let seeded = vec![moving(0, 1.0), moving(1, 0.05), moving(2, 0.0), moving(3, 1.0)];
    emitter.upload_particles(&c, &seeded).unwrap();
    emitter.update(&c, 0.1).unwrap();

    let mut batch = QuadBatch::new(BatchConfig { max_quads: 8 }).unwrap();
    batch.begin();
    assert_eq!(emitter.render(&c, &mut batch).unwrap(), 2);

    let ps = emitter.particles();
    assert!((ps[0].velocity.y - (1.0 - 0.98)).abs() < 1e-5);
    assert!((ps[0].lifetime - 0.9).abs() < 1e-5);
    assert!(!ps[1].is_alive());
    // Dead slots are not simulated.
    assert_eq!(ps[2], seeded[2]);
}

#[test]
fn upload_particles_requires_matching_length() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let cfg = EmitterConfig {
        max_particles: 8,
        ..Default::default()
    };
    let mut emitter = ParticleEmitter::create(&c, cfg).unwrap();

    assert!(emitter.upload_particles(&c, &[moving(0, 1.0); 4]).is_err());
}

#[test]
fn emitter_destroy_is_idempotent() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut emitter = ParticleEmitter::create(&c, EmitterConfig::default()).unwrap();

    emitter.destroy();
    emitter.destroy();

    assert!(!emitter.is_active());
    assert_eq!(emitter.particle_count(), 0);
    assert!(!emitter.particle_buffer().is_alive());

    // Inactive emitters ignore updates and draw nothing.
    emitter.update(&c, 0.016).unwrap();
    let mut batch = QuadBatch::new(BatchConfig { max_quads: 4 }).unwrap();
    batch.begin();
    assert_eq!(emitter.render(&c, &mut batch).unwrap(), 0);
}

#[test]
fn batch_renderer_uploads_accumulated_quads() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut renderer = BatchRenderer::new(&c, BatchConfig { max_quads: 3 }).unwrap();

    renderer.begin();
    for i in 0..5 {
        renderer.add_quad(Vec2::splat(i as f32 * 0.1), Vec2::splat(0.1), ColorRgba::white());
    }
    renderer.end(&c).unwrap();

    assert_eq!(renderer.batch().quad_count(), 3);
    assert_eq!(renderer.batch().vertex_count(), 12);
    assert_eq!(renderer.batch().index_count(), 18);
    assert_eq!(renderer.batch().dropped(), 2);

    renderer.destroy();
    renderer.destroy();
    assert!(!renderer.vertex_buffer().is_alive());
}

#[test]
fn batch_draw_covers_the_quad_and_nothing_else() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut renderer = BatchRenderer::new(&c, BatchConfig { max_quads: 4 }).unwrap();

    // Spans clip space [-0.5, 0.5], i.e. pixels 16..48 of the 64 px target.
    renderer.begin();
    renderer.add_quad(Vec2::zero(), Vec2::splat(1.0), ColorRgba::new(1.0, 0.0, 0.0, 1.0));
    renderer.end(&c).unwrap();
    assert_eq!(renderer.uploaded_quads(), 1);

    let rgba = draw_offscreen(&g, &renderer);
    assert_eq!(pixel(&rgba, 32, 32), OPAQUE_RED);
    assert_eq!(pixel(&rgba, 20, 44), OPAQUE_RED);
    assert_eq!(pixel(&rgba, 4, 4), CLEAR_BLUE);
    assert_eq!(pixel(&rgba, 60, 32), CLEAR_BLUE);
}

#[test]
fn empty_batch_leaves_the_clear_color() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut renderer = BatchRenderer::new(&c, BatchConfig { max_quads: 4 }).unwrap();

    renderer.begin();
    renderer.end(&c).unwrap();
    assert_eq!(renderer.uploaded_quads(), 0);

    let rgba = draw_offscreen(&g, &renderer);
    assert_eq!(pixel(&rgba, 32, 32), CLEAR_BLUE);
}

#[test]
fn open_batch_is_not_drawn() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let mut renderer = BatchRenderer::new(&c, BatchConfig { max_quads: 4 }).unwrap();
    let red = ColorRgba::new(1.0, 0.0, 0.0, 1.0);

    renderer.begin();
    renderer.add_quad(Vec2::zero(), Vec2::splat(1.0), red);
    renderer.end(&c).unwrap();

    // A new batch is open; the previous upload must not be drawn with its count.
    renderer.begin();
    renderer.add_quad(Vec2::zero(), Vec2::splat(1.0), red);
    assert_eq!(renderer.uploaded_quads(), 0);

    let rgba = draw_offscreen(&g, &renderer);
    assert_eq!(pixel(&rgba, 32, 32), CLEAR_BLUE);
}

#[test]
fn oversized_batch_is_rejected_before_allocating() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);

    let err = BatchRenderer::new(&c, BatchConfig { max_quads: 700_000_000 })
        .err()
        .expect("capacity beyond the device buffer limit must fail");
    assert!(format!("{err:#}").contains("device limit"));
}

#[test]
fn emitter_with_missing_shader_fails_cleanly() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let cfg = EmitterConfig {
        max_particles: 64,
        shader_path: std::env::temp_dir().join("kroma-missing/particles.comp.wgsl"),
        ..Default::default()
    };

    // Buffers are allocated before the shader load fails.
    assert!(ParticleEmitter::create(&c, cfg).is_err());
}

#[test]
fn emitter_with_swapped_bindings_fails_cleanly() {
    let Some(g) = gpu() else { return };
    let c = ctx(&g);
    let cfg = EmitterConfig {
        max_particles: 64,
        shader_path: std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures/particles_swapped.comp.wgsl"),
        ..Default::default()
    };

    let err = ParticleEmitter::create(&c, cfg)
        .err()
        .expect("swapped storage bindings must be rejected");
    assert!(format!("{err:#}").contains("@binding(0)"));

    // The device is still usable afterwards.
    let emitter = ParticleEmitter::create(
        &c,
        EmitterConfig {
            max_particles: 64,
            ..Default::default()
        },
    );
    assert!(emitter.is_ok());
}
