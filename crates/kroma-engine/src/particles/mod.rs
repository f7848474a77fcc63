//! GPU compute particle system.
//!
//! Each emitter owns a fixed-length particle array. Identity is the slot
//! index; slots are never compacted or recycled, a particle simply stops
//! being drawn once its lifetime runs out.

mod emitter;
mod types;

pub use emitter::{
    submit_alive, workgroup_count, EmitterConfig, ParticleEmitter, MAX_PARTICLES, WORKGROUP_SIZE,
};
pub use types::{EmitterData, Particle};
