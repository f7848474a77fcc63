//! Batched quad renderer.
//!
//! One frame of quads is accumulated into a preallocated host array between
//! `begin` and `end`, uploaded once through the staging transfer path, and
//! drawn with a single indexed call. The index buffer is generated once for
//! the full capacity and never touched again.
//!
//! The host half ([`QuadBatch`]) has no GPU dependency; [`BatchRenderer`]
//! pairs it with the device buffers.

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};

use crate::coords::{ColorRgba, Vec2};
use crate::gpu::{transfer, BufferKind, GpuBuffer};
use crate::render::RenderCtx;

pub const VERTICES_PER_QUAD: u32 = 4;
pub const INDICES_PER_QUAD: u32 = 6;

/// Anything quads can be submitted to.
pub trait QuadSink {
    /// Submits one quad centered at `center` with full extent `size`.
    ///
    /// Returns `false` when the quad was not recorded.
    fn add_quad(&mut self, center: Vec2, size: Vec2, color: ColorRgba) -> bool;
}

/// Quad corner vertex.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex2D {
    pub position: Vec2,
    pub color: ColorRgba,
}

impl Vertex2D {
    const ATTRS: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![
        0 => Float32x2, // position
        1 => Float32x4  // color
    ];

    /// Static layout matching the `2d.vert.wgsl` inputs.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex2D>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Batch capacity configuration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BatchConfig {
    /// Hard ceiling on quads per batch.
    pub max_quads: u32,
}

impl BatchConfig {
    pub const DEFAULT_MAX_QUADS: u32 = 1_000_000;

    pub fn max_vertices(&self) -> u32 {
        self.max_quads * VERTICES_PER_QUAD
    }

    pub fn max_indices(&self) -> u32 {
        self.max_quads * INDICES_PER_QUAD
    }

    /// Byte sizes of the vertex and index buffers for this capacity.
    pub fn buffer_sizes(&self) -> (u64, u64) {
        let quads = self.max_quads as u64;
        let vertex = quads * VERTICES_PER_QUAD as u64 * std::mem::size_of::<Vertex2D>() as u64;
        let index = quads * INDICES_PER_QUAD as u64 * std::mem::size_of::<u32>() as u64;
        (vertex, index)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_quads > 0, "batch capacity must be non-zero");
        // Largest vertex index must fit the u32 index format.
        anyhow::ensure!(
            self.max_quads.checked_mul(INDICES_PER_QUAD).is_some(),
            "batch capacity {} overflows the index range",
            self.max_quads
        );
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_quads: Self::DEFAULT_MAX_QUADS,
        }
    }
}

/// Index list for `max_quads` quads: `{4i, 4i+1, 4i+2, 4i+2, 4i+3, 4i}` per quad.
pub fn quad_indices(max_quads: u32) -> Vec<u32> {
    let mut indices = Vec::with_capacity((max_quads * INDICES_PER_QUAD) as usize);
    for i in 0..max_quads {
        let v = i * VERTICES_PER_QUAD;
        indices.extend_from_slice(&[v, v + 1, v + 2, v + 2, v + 3, v]);
    }
    indices
}

/// Four corners of the quad centered at `center` with extent `size`,
/// counter-clockwise from `(min.x, min.y)`.
pub fn quad_corners(center: Vec2, size: Vec2, color: ColorRgba) -> [Vertex2D; 4] {
    let half = size * 0.5;
    let (x0, y0) = (center.x - half.x, center.y - half.y);
    let (x1, y1) = (center.x + half.x, center.y + half.y);
    [
        Vertex2D { position: Vec2::new(x0, y0), color },
        Vertex2D { position: Vec2::new(x1, y0), color },
        Vertex2D { position: Vec2::new(x1, y1), color },
        Vertex2D { position: Vec2::new(x0, y1), color },
    ]
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BatchState {
    Idle,
    Accumulating,
}

/// Host-side quad accumulator with a fixed capacity.
///
/// The vertex array is allocated once at full capacity; `begin` only resets
/// its length, so accumulation never reallocates.
#[derive(Debug)]
pub struct QuadBatch {
    vertices: Vec<Vertex2D>,
    max_quads: u32,
    quad_count: u32,
    dropped: u32,
    state: BatchState,
}

impl QuadBatch {
    pub fn new(config: BatchConfig) -> Result<Self> {
        config.validate()?;

        let mut vertices = Vec::new();
        vertices
            .try_reserve_exact(config.max_vertices() as usize)
            .with_context(|| {
                format!("cannot allocate host vertex storage for {} quads", config.max_quads)
            })?;

        Ok(Self {
            vertices,
            max_quads: config.max_quads,
            quad_count: 0,
            dropped: 0,
            state: BatchState::Idle,
        })
    }

    /// Starts a new batch, discarding whatever the previous one held.
    pub fn begin(&mut self) {
        self.reset();
        self.state = BatchState::Accumulating;
    }

    /// Empties the batch and returns to idle.
    pub fn reset(&mut self) {
        self.vertices.clear();
        self.quad_count = 0;
        self.dropped = 0;
        self.state = BatchState::Idle;
    }

    /// Closes the batch. Returns `true` if a batch was open.
    pub fn finish(&mut self) -> bool {
        if self.state != BatchState::Accumulating {
            return false;
        }
        self.state = BatchState::Idle;
        if self.dropped > 0 {
            log::warn!(
                "batch full: dropped {} quads beyond capacity {}",
                self.dropped,
                self.max_quads
            );
        }
        true
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn vertices(&self) -> &[Vertex2D] {
        &self.vertices
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn quad_count(&self) -> u32 {
        self.quad_count
    }

    pub fn index_count(&self) -> u32 {
        self.quad_count * INDICES_PER_QUAD
    }

    pub fn max_quads(&self) -> u32 {
        self.max_quads
    }

    /// Quads rejected by the capacity ceiling since the last `begin`.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn is_full(&self) -> bool {
        self.quad_count >= self.max_quads
    }
}

impl QuadSink for QuadBatch {
    fn add_quad(&mut self, center: Vec2, size: Vec2, color: ColorRgba) -> bool {
        if self.state != BatchState::Accumulating {
            return false;
        }

        if self.is_full() {
            if self.dropped == 0 {
                log::warn!("batch renderer is full ({} quads), dropping quads", self.max_quads);
            }
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }

        self.vertices
            .extend_from_slice(&quad_corners(center, size, color));
        self.quad_count += 1;
        true
    }
}

/// GPU batch renderer: a [`QuadBatch`] plus fixed-size vertex and index buffers.
///
/// Binds no pipeline; the caller sets one compatible with [`Vertex2D`] before `draw`.
pub struct BatchRenderer {
    batch: QuadBatch,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,

    /// Quads whose vertices reached the GPU in the last successful `end`.
    uploaded_quads: u32,
}

impl BatchRenderer {
    /// Allocates buffers for `config.max_quads` and uploads the static index list.
    ///
    /// Buffer sizes are checked against the device limit before any host or
    /// device allocation.
    pub fn new(ctx: &RenderCtx<'_>, config: BatchConfig) -> Result<Self> {
        config.validate()?;

        let (vertex_size, index_size) = config.buffer_sizes();
        let max = ctx.device.limits().max_buffer_size;
        anyhow::ensure!(
            vertex_size <= max && index_size <= max,
            "batch capacity {} needs {vertex_size} vertex / {index_size} index bytes, device limit is {max}",
            config.max_quads
        );

        let batch = QuadBatch::new(config)?;
        let vertex_buffer = GpuBuffer::create(
            ctx.device,
            ctx.queue,
            BufferKind::Vertex,
            "kroma batch vertices",
            None,
            vertex_size,
            config.max_vertices(),
        )
        .context("failed to create batch vertex buffer")?;

        let indices = quad_indices(config.max_quads);
        let index_buffer = GpuBuffer::create(
            ctx.device,
            ctx.queue,
            BufferKind::Index,
            "kroma batch indices",
            Some(bytemuck::cast_slice(&indices)),
            index_size,
            config.max_indices(),
        )
        .context("failed to create batch index buffer")?;

        log::info!(
            "batch renderer initialized: {} max quads ({} vertices, {} indices)",
            config.max_quads,
            config.max_vertices(),
            config.max_indices()
        );

        Ok(Self {
            batch,
            vertex_buffer,
            index_buffer,
            uploaded_quads: 0,
        })
    }

    pub fn begin(&mut self) {
        self.batch.begin();
        self.uploaded_quads = 0;
    }

    /// Closes the batch and uploads the accumulated vertices.
    ///
    /// The batch is idle afterwards even if the upload fails.
    pub fn end(&mut self, ctx: &RenderCtx<'_>) -> Result<()> {
        if !self.batch.finish() || self.batch.vertex_count() == 0 {
            return Ok(());
        }

        let buffer = self
            .vertex_buffer
            .buffer()
            .context("batch vertex buffer was destroyed")?;

        transfer::upload_pod(ctx.device, ctx.queue, buffer, self.batch.vertices(), 0)
            .context("failed to upload batch vertex data")?;

        self.uploaded_quads = self.batch.quad_count();
        Ok(())
    }

    /// Records one indexed draw covering every quad uploaded by the last `end`.
    ///
    /// Draws nothing while a batch is open or when the last upload failed.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        let quads = self.uploaded_quads;
        if quads == 0 || self.batch.state() != BatchState::Idle {
            return;
        }

        let (Some(vbo), Some(ibo)) = (self.vertex_buffer.buffer(), self.index_buffer.buffer())
        else {
            return;
        };

        pass.set_vertex_buffer(0, vbo.slice(..));
        pass.set_index_buffer(ibo.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..quads * INDICES_PER_QUAD, 0, 0..1);
    }

    /// Releases the device buffers. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
        self.batch.reset();
        self.uploaded_quads = 0;
    }

    /// Quads the next `draw` will cover.
    pub fn uploaded_quads(&self) -> u32 {
        self.uploaded_quads
    }

    pub fn batch(&self) -> &QuadBatch {
        &self.batch
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }
}

impl QuadSink for BatchRenderer {
    fn add_quad(&mut self, center: Vec2, size: Vec2, color: ColorRgba) -> bool {
        self.batch.add_quad(center, size, color)
    }
}
