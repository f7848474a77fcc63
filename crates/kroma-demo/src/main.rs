//! KROMA demo: an animated quad grid plus a GPU particle fountain, drawn
//! through one batch into an offscreen scene and composited to the window.

mod scene;

use anyhow::{Context, Result};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use kroma_engine::coords::{ColorRgba, Vec2};
use kroma_engine::core::{App, AppControl, FrameCtx};
use kroma_engine::device::GpuInit;
use kroma_engine::logging::{init_logging, LoggingConfig};
use kroma_engine::particles::{EmitterConfig, Particle, ParticleEmitter};
use kroma_engine::render::pipeline::create_batch_pipeline;
use kroma_engine::render::{
    BatchConfig, BatchRenderer, GraphicsPipeline, QuadSink, RenderCtx, RenderTarget,
};
use kroma_engine::window::{Runtime, RuntimeConfig};

use scene::{Composite, SceneTarget, SCENE_FORMAT};

const GRID_COLS: u32 = 24;
const GRID_ROWS: u32 = 18;

const EMITTER_ORIGIN: Vec2 = Vec2::new(0.0, -0.6);
const PARTICLE_COUNT: u32 = 4_096;
/// Gravity in clip-space units per second squared.
const PARTICLE_GRAVITY: f32 = -1.6;

const SCENE_CLEAR: ColorRgba = ColorRgba::new(0.1, 0.1, 0.1, 1.0);

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    Runtime::run(RuntimeConfig::default(), GpuInit::default(), Demo::default())
        .context("KROMA demo failed")
}

#[derive(Default)]
struct Demo {
    renderer: Option<Renderer>,
    /// Seeded bursts so far; varies the burst pattern.
    bursts: u32,
    reseed: bool,
}

struct Renderer {
    batch_pipeline: GraphicsPipeline,
    batch: BatchRenderer,
    emitter: ParticleEmitter,
    scene: SceneTarget,
    composite: Composite,
}

impl Renderer {
    fn new(rctx: &RenderCtx<'_>, width: u32, height: u32) -> Result<Self> {
        let batch_pipeline = create_batch_pipeline(rctx.device, SCENE_FORMAT)?;

        let quads = GRID_COLS * GRID_ROWS + PARTICLE_COUNT;
        let batch = BatchRenderer::new(rctx, BatchConfig { max_quads: quads })?;

        let mut emitter = ParticleEmitter::create(
            rctx,
            EmitterConfig {
                position: EMITTER_ORIGIN,
                max_particles: PARTICLE_COUNT,
                particle_size: 0.015,
                ..Default::default()
            },
        )?;
        emitter.set_gravity(PARTICLE_GRAVITY);

        let scene = SceneTarget::new(rctx.device, width, height);
        let composite = Composite::new(rctx.device, rctx.target_format, &scene)?;

        Ok(Self {
            batch_pipeline,
            batch,
            emitter,
            scene,
            composite,
        })
    }

    fn resize_scene(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if self.scene.size() == (width.max(1), height.max(1)) {
            return;
        }
        log::debug!("scene target resized to {width}x{height}");
        self.scene = SceneTarget::new(device, width, height);
        self.composite.rebind(device, &self.scene);
    }

    fn frame(
        &mut self,
        rctx: &RenderCtx<'_>,
        target: &mut RenderTarget<'_>,
        dt: f32,
        elapsed: f32,
    ) -> Result<()> {
        self.emitter.update(rctx, dt)?;

        self.batch.begin();
        add_grid(&mut self.batch, elapsed);
        self.emitter.render(rctx, &mut self.batch)?;
        self.batch.end(rctx)?;

        {
            let mut pass = target.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("kroma scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: self.scene.view(),
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(SCENE_CLEAR.to_wgpu()),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_pipeline(self.batch_pipeline.raw());
            self.batch.draw(&mut pass);
        }

        {
            let mut pass = target.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("kroma composite pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            self.composite.draw(&mut pass);
        }

        Ok(())
    }
}

impl App for Demo {
    fn on_window_event(&mut self, _window_id: WindowId, event: &WindowEvent) -> AppControl {
        if let WindowEvent::KeyboardInput {
            event:
                KeyEvent {
                    physical_key: PhysicalKey::Code(code),
                    state: ElementState::Pressed,
                    repeat: false,
                    ..
                },
            ..
        } = event
        {
            match code {
                KeyCode::Escape => return AppControl::Exit,
                KeyCode::Space => self.reseed = true,
                _ => {}
            }
        }
        AppControl::Continue
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_, '_>) -> AppControl {
        let size = ctx.gpu.size();

        if self.renderer.is_none() {
            match Renderer::new(&ctx.render_ctx(), size.width, size.height) {
                Ok(r) => {
                    self.renderer = Some(r);
                    self.reseed = true;
                }
                Err(e) => {
                    log::error!("failed to create renderer: {e:#}");
                    return AppControl::Exit;
                }
            }
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return AppControl::Exit;
        };

        renderer.resize_scene(ctx.gpu.device(), size.width, size.height);

        if std::mem::take(&mut self.reseed) {
            let particles = burst(PARTICLE_COUNT, EMITTER_ORIGIN, self.bursts);
            self.bursts = self.bursts.wrapping_add(1);
            if let Err(e) = renderer.emitter.upload_particles(&ctx.render_ctx(), &particles) {
                log::error!("failed to seed particles: {e:#}");
                return AppControl::Exit;
            }
        }

        let (dt, elapsed) = (ctx.time.dt, ctx.time.elapsed);
        ctx.render(ColorRgba::black(), |rctx, target| {
            renderer.frame(rctx, target, dt, elapsed)
        })
    }

    fn on_exit(&mut self) {
        if let Some(mut r) = self.renderer.take() {
            r.emitter.destroy();
            r.batch.destroy();
        }
    }
}

/// Pulsing grid of quads covering clip space.
fn add_grid(sink: &mut impl QuadSink, t: f32) {
    let cell = Vec2::new(2.0 / GRID_COLS as f32, 2.0 / GRID_ROWS as f32);

    for row in 0..GRID_ROWS {
        for col in 0..GRID_COLS {
            let (fx, fy) = (col as f32, row as f32);
            let center = Vec2::new(-1.0 + (fx + 0.5) * cell.x, -1.0 + (fy + 0.5) * cell.y);
            let phase = fx * 0.35 + fy * 0.5;
            let scale = 0.55 + 0.25 * (t * 1.7 + phase).sin();
            let color = ColorRgba::new(
                0.5 + 0.5 * (t + fx * 0.2).sin(),
                0.5 + 0.5 * (t * 0.8 + fy * 0.3).sin(),
                0.6 + 0.4 * (t * 0.5 + phase).cos(),
                0.35,
            );
            sink.add_quad(center, cell * scale, color);
        }
    }
}

/// Deterministic fountain burst: golden-angle spread, upward velocities and
/// staggered lifetimes so the fountain thins out instead of vanishing at once.
fn burst(count: u32, origin: Vec2, seed: u32) -> Vec<Particle> {
    const GOLDEN_ANGLE: f32 = 2.399_963;

    (0..count)
        .map(|i| {
            let k = (i + (seed % 64) * 977) as f32;
            let angle = k * GOLDEN_ANGLE;
            let spread = (k * 0.618_034).fract();
            let speed = 0.6 + 1.2 * spread;

            Particle {
                position: origin,
                velocity: Vec2::new(angle.cos() * 0.45 * speed, 1.2 + angle.sin().abs() * speed),
                color: ColorRgba::new(1.0, 0.45 + 0.5 * spread, 0.15 + 0.3 * (1.0 - spread), 0.9),
                lifetime: 0.8 + 2.2 * (k * 0.754_877).fract(),
                ..Particle::at_rest(origin, 0.015)
            }
        })
        .collect()
}
