use bytemuck::{Pod, Zeroable};

use crate::coords::{ColorRgba, Vec2};

/// One particle as stored in the GPU storage buffer.
///
/// Field order and padding match `Particle` in `particles.comp.wgsl`
/// (48 bytes, 16-byte aligned color).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub color: ColorRgba,
    /// Seconds left to live; the particle is drawn only while this is positive.
    pub lifetime: f32,
    pub size: f32,
    pub _pad: [f32; 2],
}

impl Particle {
    /// A resting particle at `position`: no velocity, opaque white, zero lifetime.
    pub fn at_rest(position: Vec2, size: f32) -> Self {
        Self {
            position,
            velocity: Vec2::zero(),
            color: ColorRgba::white(),
            lifetime: 0.0,
            size,
            _pad: [0.0; 2],
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.lifetime > 0.0
    }
}

/// Per-update simulation parameters read by the compute stage.
///
/// Matches `EmitterData` in `particles.comp.wgsl` (32 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct EmitterData {
    pub position: Vec2,
    pub delta_time: f32,
    pub particle_count: u32,
    pub gravity: f32,
    pub damping: f32,
    pub _pad: [f32; 2],
}
