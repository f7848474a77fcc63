//! KROMA engine crate.
//!
//! Batched 2D quad rendering, a GPU compute particle system and the buffer
//! and transfer plumbing both sit on, plus the winit/wgpu runtime that drives
//! them.

pub mod core;
pub mod device;
pub mod logging;
pub mod time;
pub mod window;

pub mod coords;
pub mod gpu;
pub mod particles;
pub mod render;
