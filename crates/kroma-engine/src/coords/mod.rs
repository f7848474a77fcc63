//! Geometry and color types shared by the renderers and the particle system.
//!
//! Canonical space is clip space:
//! - origin at the center of the target
//! - +X right, +Y up
//! - visible range `[-1, 1]` on both axes
//!
//! Both types are `#[repr(C)]` and `Pod`, so they can be embedded in vertex
//! and storage-buffer structs without conversion.

mod color;
mod vec2;

pub use color::ColorRgba;
pub use vec2::Vec2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_layout_sizes() {
        assert_eq!(std::mem::size_of::<Vec2>(), 8);
        assert_eq!(std::mem::size_of::<ColorRgba>(), 16);
    }

    #[test]
    fn vec2_arithmetic() {
        let a = Vec2::new(1.0, 2.0);
        let b = Vec2::splat(0.5);
        assert_eq!(a + b, Vec2::new(1.5, 2.5));
        assert_eq!(a - b, Vec2::new(0.5, 1.5));
        assert_eq!(a * 2.0, Vec2::new(2.0, 4.0));
        assert_eq!(a / 2.0, Vec2::new(0.5, 1.0));
    }

    #[test]
    fn color_to_wgpu_preserves_channels() {
        let c = ColorRgba::new(0.25, 0.5, 0.75, 1.0).to_wgpu();
        assert_eq!((c.r, c.g, c.b, c.a), (0.25, 0.5, 0.75, 1.0));
    }

    #[test]
    fn non_finite_is_detected() {
        assert!(!Vec2::new(f32::NAN, 0.0).is_finite());
        assert!(!ColorRgba::new(0.0, f32::INFINITY, 0.0, 1.0).is_finite());
        assert!(ColorRgba::white().is_finite());
    }
}
