use glam::{Mat4, Vec3, Vec4};

use super::aabb::Aabb;

/// Plane normals shorter than this are left unnormalized.
const PLANE_EPSILON: f32 = 1.0e-6;

/// Plane in `n·p + d = 0` form. Points with positive distance lie on the
/// inside of a frustum plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    fn from_row(row: Vec4) -> Self {
        let normal = row.truncate();
        let length = normal.length();
        if length > PLANE_EPSILON {
            Self {
                normal: normal / length,
                d: row.w / length,
            }
        } else {
            Self { normal, d: row.w }
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }
}

/// Index of each plane inside [`Frustum::planes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrustumSide {
    Left = 0,
    Right = 1,
    Bottom = 2,
    Top = 3,
    Near = 4,
    Far = 5,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the six clip planes from a combined view-projection matrix
    /// (Gribb/Hartmann). wgpu clips depth to `[0, 1]`, so the near plane is
    /// row 2 alone rather than `row3 + row2`.
    pub fn from_view_proj(view_proj: &Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_row(r3 + r0),
                Plane::from_row(r3 - r0),
                Plane::from_row(r3 + r1),
                Plane::from_row(r3 - r1),
                Plane::from_row(r2),
                Plane::from_row(r3 - r2),
            ],
        }
    }

    pub fn plane(&self, side: FrustumSide) -> &Plane {
        &self.planes[side as usize]
    }

    /// Conservative box test: a box is rejected only when it lies entirely on
    /// the outside of at least one plane, so nothing visible is ever culled.
    pub fn is_aabb_visible(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let extents = aabb.extents();
        self.planes.iter().all(|plane| {
            let radius = extents.dot(plane.normal.abs());
            plane.signed_distance(center) + radius >= 0.0
        })
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }

    pub fn is_sphere_visible(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(center) >= -radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.5, 0.1, 50.0);
        Frustum::from_view_proj(&(proj * view))
    }

    #[test]
    fn planes_are_normalized() {
        for plane in camera().planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn box_in_front_is_visible() {
        let aabb = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
        assert!(camera().is_aabb_visible(&aabb));
    }

    #[test]
    fn box_behind_camera_is_culled() {
        let aabb = Aabb::new(Vec3::new(-0.5, -0.5, 8.0), Vec3::new(0.5, 0.5, 9.0));
        assert!(!camera().is_aabb_visible(&aabb));
    }

    #[test]
    fn box_beyond_far_plane_is_culled() {
        let aabb = Aabb::new(Vec3::new(-1.0, -1.0, -80.0), Vec3::new(1.0, 1.0, -60.0));
        assert!(!camera().is_aabb_visible(&aabb));
    }

    #[test]
    fn box_straddling_a_plane_is_visible() {
        let frustum = camera();
        // Straddles the near plane (camera sits at z = 5, near = 0.1).
        let aabb = Aabb::new(Vec3::new(-0.1, -0.1, 4.8), Vec3::new(0.1, 0.1, 5.3));
        assert!(frustum.is_aabb_visible(&aabb));
    }

    #[test]
    fn near_plane_sits_at_near_distance() {
        let frustum = camera();
        let near = frustum.plane(FrustumSide::Near);
        let on_near = Vec3::new(0.0, 0.0, 5.0 - 0.1);
        assert!(near.signed_distance(on_near).abs() < 1e-3);
        assert!(near.signed_distance(Vec3::ZERO) > 0.0);
    }

    #[test]
    fn degenerate_matrix_does_not_produce_nan() {
        let frustum = Frustum::from_view_proj(&Mat4::ZERO);
        for plane in frustum.planes {
            assert!(plane.normal.is_finite());
            assert!(plane.d.is_finite());
        }
    }
}
