use std::num::NonZeroU64;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{EmitterData, Particle};
use crate::coords::Vec2;
use crate::gpu::{transfer, validated, BufferKind, GpuBuffer};
use crate::render::shader::{shader_path, Shader, ShaderReflection, Stage, StorageBinding};
use crate::render::{QuadSink, RenderCtx};

/// Upper bound on particles per emitter.
pub const MAX_PARTICLES: u32 = 10_000;

/// Invocations per compute workgroup; must equal the shader's `@workgroup_size`.
pub const WORKGROUP_SIZE: u32 = 64;

/// Workgroups needed to cover `particle_count` invocations.
pub fn workgroup_count(particle_count: u32) -> u32 {
    particle_count.div_ceil(WORKGROUP_SIZE)
}

/// Emitter creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterConfig {
    /// Origin every particle starts at.
    pub position: Vec2,
    pub max_particles: u32,
    pub gravity: f32,
    pub damping: f32,
    /// Initial render size of every particle.
    pub particle_size: f32,
    /// WGSL compute shader implementing the update.
    pub shader_path: PathBuf,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            position: Vec2::zero(),
            max_particles: MAX_PARTICLES,
            gravity: -9.8,
            damping: 0.1,
            particle_size: 0.05,
            shader_path: shader_path("particles.comp.wgsl"),
        }
    }
}

impl EmitterConfig {
    /// Checks the parameters without touching the GPU.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            (1..=MAX_PARTICLES).contains(&self.max_particles),
            "invalid particle emitter parameters: max_particles must be in 1..={MAX_PARTICLES}, got {}",
            self.max_particles
        );
        anyhow::ensure!(
            self.position.is_finite()
                && self.gravity.is_finite()
                && self.damping.is_finite()
                && self.particle_size.is_finite(),
            "invalid particle emitter parameters: non-finite value in {self:?}"
        );
        Ok(())
    }

    /// Host particle array every new emitter starts from.
    pub fn initial_particles(&self) -> Vec<Particle> {
        vec![Particle::at_rest(self.position, self.particle_size); self.max_particles as usize]
    }
}

/// Compute pipeline plus the bind group tying it to the emitter's buffers.
struct ComputeStage {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
}

/// GPU-resident particle emitter.
///
/// Particle state lives in a storage buffer advanced by a compute dispatch on
/// every [`update`](Self::update). [`render`](Self::render) reads the whole
/// buffer back (a blocking stage), overwrites the host mirror and submits
/// every live particle as a quad.
pub struct ParticleEmitter {
    particles: Vec<Particle>,
    data: EmitterData,

    particle_buffer: GpuBuffer,
    emitter_buffer: GpuBuffer,
    compute: Option<ComputeStage>,

    active: bool,
}

impl ParticleEmitter {
    /// Creates an active emitter.
    ///
    /// Either every resource is created or none survives: anything acquired
    /// before a failing step is released when the error propagates.
    pub fn create(ctx: &RenderCtx<'_>, config: EmitterConfig) -> Result<Self> {
        config.validate()?;

        let count = config.max_particles;
        let particles = config.initial_particles();
        let data = EmitterData {
            position: config.position,
            delta_time: 0.0,
            particle_count: count,
            gravity: config.gravity,
            damping: config.damping,
            _pad: [0.0; 2],
        };

        let particle_bytes: &[u8] = bytemuck::cast_slice(&particles);
        let max_binding = ctx.device.limits().max_storage_buffer_binding_size as u64;
        anyhow::ensure!(
            particle_bytes.len() as u64 <= max_binding,
            "particle buffer ({} bytes) exceeds the storage binding limit ({max_binding})",
            particle_bytes.len()
        );

        let particle_buffer = GpuBuffer::create(
            ctx.device,
            ctx.queue,
            BufferKind::Storage,
            "kroma particles",
            Some(particle_bytes),
            particle_bytes.len() as u64,
            count,
        )
        .context("failed to create particle buffer")?;

        let emitter_buffer = GpuBuffer::create(
            ctx.device,
            ctx.queue,
            BufferKind::Storage,
            "kroma emitter data",
            None,
            std::mem::size_of::<EmitterData>() as u64,
            1,
        )
        .context("failed to create emitter buffer")?;

        let shader = Shader::from_file(ctx.device, Stage::Compute, &config.shader_path, "main")
            .context("failed to load particle compute shader")?;
        check_compute_contract(shader.reflection())?;

        let compute = create_compute_stage(ctx.device, &shader, &particle_buffer, &emitter_buffer)?;

        log::info!("particle emitter created with {count} particles");

        Ok(Self {
            particles,
            data,
            particle_buffer,
            emitter_buffer,
            compute: Some(compute),
            active: true,
        })
    }

    /// Advances the simulation by `delta_time` seconds on the GPU.
    ///
    /// Uploads the emitter parameters, then dispatches one invocation per
    /// particle. No-op when inactive.
    pub fn update(&mut self, ctx: &RenderCtx<'_>, delta_time: f32) -> Result<()> {
        if !self.active {
            return Ok(());
        }

        self.data.delta_time = delta_time;

        let (Some(emitter_buffer), Some(compute)) =
            (self.emitter_buffer.buffer(), self.compute.as_ref())
        else {
            anyhow::bail!("active emitter is missing GPU resources");
        };

        transfer::upload_pod(
            ctx.device,
            ctx.queue,
            emitter_buffer,
            std::slice::from_ref(&self.data),
            0,
        )
        .context("failed to upload emitter data")?;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kroma particle update encoder"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kroma particle update"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&compute.pipeline);
            pass.set_bind_group(0, &compute.bind_group, &[]);
            pass.dispatch_workgroups(self.workgroup_count(), 1, 1);
        }

        ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Reads particle state back and submits every live particle to `sink`.
    ///
    /// Blocks until the device is idle. On failure the host mirror keeps its
    /// previous contents and nothing is submitted. Returns the number of quads
    /// `sink` accepted.
    pub fn render(&mut self, ctx: &RenderCtx<'_>, sink: &mut impl QuadSink) -> Result<usize> {
        if !self.active {
            return Ok(0);
        }

        let buffer = self
            .particle_buffer
            .buffer()
            .context("active emitter is missing its particle buffer")?;

        let state: Vec<Particle> =
            transfer::download_pod(ctx.device, ctx.queue, buffer, self.particles.len())
                .context("failed to download particle state")?;
        self.particles.copy_from_slice(&state);

        Ok(submit_alive(&self.particles, sink))
    }

    /// Replaces the whole GPU particle state (and the host mirror) with `particles`.
    ///
    /// The length must equal [`particle_count`](Self::particle_count); the
    /// buffer is never resized.
    pub fn upload_particles(&mut self, ctx: &RenderCtx<'_>, particles: &[Particle]) -> Result<()> {
        anyhow::ensure!(self.active, "emitter is not active");
        anyhow::ensure!(
            particles.len() == self.particles.len(),
            "expected {} particles, got {}",
            self.particles.len(),
            particles.len()
        );

        let buffer = self
            .particle_buffer
            .buffer()
            .context("active emitter is missing its particle buffer")?;
        transfer::upload_pod(ctx.device, ctx.queue, buffer, particles, 0)
            .context("failed to upload particle state")?;

        self.particles.copy_from_slice(particles);
        Ok(())
    }

    /// Moves the emitter origin; takes effect on the next update.
    pub fn set_position(&mut self, position: Vec2) {
        self.data.position = position;
    }

    pub fn set_gravity(&mut self, gravity: f32) {
        self.data.gravity = gravity;
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.data.damping = damping;
    }

    /// Releases every GPU resource and the host mirror. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if self.active {
            log::debug!("destroying particle emitter ({} particles)", self.particles.len());
        }
        self.compute = None;
        self.emitter_buffer.destroy();
        self.particle_buffer.destroy();
        self.particles = Vec::new();
        self.data.particle_count = 0;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Host mirror as of the last read-back or upload.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle_count(&self) -> u32 {
        self.particles.len() as u32
    }

    /// Parameters that will be uploaded on the next update.
    pub fn emitter_data(&self) -> &EmitterData {
        &self.data
    }

    pub fn workgroup_count(&self) -> u32 {
        workgroup_count(self.particle_count())
    }

    pub fn particle_buffer(&self) -> &GpuBuffer {
        &self.particle_buffer
    }
}

/// Submits one quad per live particle; dead slots are skipped, not removed.
pub fn submit_alive(particles: &[Particle], sink: &mut impl QuadSink) -> usize {
    particles
        .iter()
        .filter(|p| p.is_alive())
        .filter(|p| sink.add_quad(p.position, Vec2::splat(p.size), p.color))
        .count()
}

/// Storage bindings the update shader must declare, in `(group, binding)` order.
const PARTICLE_BINDINGS: [StorageBinding; 2] = [
    StorageBinding {
        group: 0,
        binding: 0,
        read_only: true,
    },
    StorageBinding {
        group: 0,
        binding: 1,
        read_only: false,
    },
];

fn check_compute_contract(r: &ShaderReflection) -> Result<()> {
    anyhow::ensure!(
        r.workgroup_size == Some([WORKGROUP_SIZE, 1, 1]),
        "particle shader workgroup size {:?} does not match {WORKGROUP_SIZE}x1x1",
        r.workgroup_size
    );
    anyhow::ensure!(
        r.num_readonly_storage_buffers == 1 && r.num_readwrite_storage_buffers == 1,
        "particle shader must declare one read-only and one read/write storage buffer \
         (found {} and {})",
        r.num_readonly_storage_buffers,
        r.num_readwrite_storage_buffers
    );
    anyhow::ensure!(
        r.storage_buffers == PARTICLE_BINDINGS,
        "particle shader must bind emitter data read-only at @group(0) @binding(0) and \
         particles read/write at @group(0) @binding(1) (found {:?})",
        r.storage_buffers
    );
    Ok(())
}

fn storage_entry(binding: u32, read_only: bool, min_size: usize) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(min_size as u64),
        },
        count: None,
    }
}

fn create_compute_stage(
    device: &wgpu::Device,
    shader: &Shader,
    particle_buffer: &GpuBuffer,
    emitter_buffer: &GpuBuffer,
) -> Result<ComputeStage> {
    let particles = particle_buffer.buffer().context("particle buffer missing")?;
    let emitter = emitter_buffer.buffer().context("emitter buffer missing")?;

    validated(device, "particle compute pipeline", || {
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kroma particle bgl"),
            entries: &[
                storage_entry(0, true, std::mem::size_of::<EmitterData>()),
                storage_entry(1, false, std::mem::size_of::<Particle>()),
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kroma particle pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("kroma particle pipeline"),
            layout: Some(&layout),
            module: shader.module(),
            entry_point: Some(shader.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kroma particle bind group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: emitter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: particles.as_entire_binding(),
                },
            ],
        });

        ComputeStage {
            pipeline,
            bind_group,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::ColorRgba;
    use crate::render::{BatchConfig, QuadBatch};

    /// Records every submitted quad.
    #[derive(Default)]
    struct Recorder(Vec<(Vec2, Vec2, ColorRgba)>);

    impl QuadSink for Recorder {
        fn add_quad(&mut self, center: Vec2, size: Vec2, color: ColorRgba) -> bool {
            self.0.push((center, size, color));
            true
        }
    }

    fn live(x: f32, lifetime: f32) -> Particle {
        Particle {
            lifetime,
            ..Particle::at_rest(Vec2::new(x, 0.0), 0.1)
        }
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(64), 1);
        assert_eq!(workgroup_count(65), 2);
        assert_eq!(workgroup_count(MAX_PARTICLES), 157);
    }

    #[test]
    fn config_rejects_out_of_range_counts() {
        let zero = EmitterConfig {
            max_particles: 0,
            ..Default::default()
        };
        let over = EmitterConfig {
            max_particles: MAX_PARTICLES + 1,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(over.validate().is_err());
        assert!(EmitterConfig::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_non_finite_parameters() {
        let cfg = EmitterConfig {
            gravity: f32::NAN,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn initial_particles_rest_at_origin() {
        let cfg = EmitterConfig {
            position: Vec2::new(0.25, 0.5),
            max_particles: 100,
            ..Default::default()
        };
        let ps = cfg.initial_particles();
        assert_eq!(ps.len(), 100);
        assert!(ps.iter().all(|p| p.position == cfg.position
            && p.velocity == Vec2::zero()
            && p.color == ColorRgba::white()
            && p.lifetime == 0.0
            && p.size == 0.05));
    }

    #[test]
    fn all_dead_submits_nothing() {
        let cfg = EmitterConfig {
            max_particles: 256,
            ..Default::default()
        };
        let mut rec = Recorder::default();
        assert_eq!(submit_alive(&cfg.initial_particles(), &mut rec), 0);
        assert!(rec.0.is_empty());
    }

    #[test]
    fn only_positive_lifetimes_are_submitted() {
        let ps = [live(0.0, 1.0), live(1.0, 0.0), live(2.0, -0.5), live(3.0, 0.01)];
        let mut rec = Recorder::default();
        assert_eq!(submit_alive(&ps, &mut rec), 2);

        let centers: Vec<f32> = rec.0.iter().map(|(c, _, _)| c.x).collect();
        assert_eq!(centers, vec![0.0, 3.0]);
        assert!(rec.0.iter().all(|(_, size, _)| *size == Vec2::splat(0.1)));
    }

    #[test]
    fn submission_respects_batch_capacity() {
        let ps: Vec<Particle> = (0..10).map(|i| live(i as f32, 1.0)).collect();
        let mut batch = QuadBatch::new(BatchConfig { max_quads: 4 }).unwrap();
        batch.begin();
        assert_eq!(submit_alive(&ps, &mut batch), 4);
        assert_eq!(batch.quad_count(), 4);
        assert_eq!(batch.dropped(), 6);
    }

    #[test]
    fn shipped_shader_meets_binding_contract() {
        use crate::render::shader::{load_source, reflect_wgsl};

        let source = load_source(&EmitterConfig::default().shader_path).unwrap();
        let r = reflect_wgsl(&source, Stage::Compute, "main").unwrap();
        assert!(check_compute_contract(&r).is_ok());
    }

    #[test]
    fn swapped_bindings_break_the_contract() {
        use crate::render::shader::reflect_wgsl;

        let source = include_str!("../../tests/fixtures/particles_swapped.comp.wgsl");
        let r = reflect_wgsl(source, Stage::Compute, "main").unwrap();

        // Counts alone still look right; only the binding slots differ.
        assert_eq!(r.num_readonly_storage_buffers, 1);
        assert_eq!(r.num_readwrite_storage_buffers, 1);
        assert!(check_compute_contract(&r).is_err());
    }

    #[test]
    fn wrong_workgroup_size_breaks_the_contract() {
        let r = ShaderReflection {
            workgroup_size: Some([32, 1, 1]),
            num_readonly_storage_buffers: 1,
            num_readwrite_storage_buffers: 1,
            storage_buffers: PARTICLE_BINDINGS.to_vec(),
            ..Default::default()
        };
        assert!(check_compute_contract(&r).is_err());
    }
}
