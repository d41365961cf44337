pub mod aabb;
pub mod frustum;

pub use aabb::Aabb;
pub use frustum::{Frustum, FrustumSide, Plane};

use glam::Vec3;

/// Normalizes `v`, returning `fallback` for zero-length or non-finite input.
pub fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    let length_sq = v.length_squared();
    if length_sq > 1.0e-12 && length_sq.is_finite() {
        v / length_sq.sqrt()
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_normalize_falls_back_on_zero() {
        assert_eq!(safe_normalize(Vec3::ZERO, Vec3::Y), Vec3::Y);
        assert_eq!(safe_normalize(Vec3::new(0.0, 0.0, 3.0), Vec3::Y), Vec3::Z);
    }
}
