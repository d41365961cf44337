use glam::{Mat4, Vec3};

/// Smallest half-extent an [`Aabb`] reports, so degenerate (flat or point)
/// boxes still have a usable volume for culling.
pub const MIN_EXTENT: f32 = 1.0e-4;

/// Axis-aligned bounding box. `min <= max` holds component-wise for every
/// box produced by this type's constructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Creates a box from two opposite corners given in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn from_point(point: Vec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        let extents = extents.abs();
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Bounds of a point set; `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Self::from_point(first);
        for point in iter {
            aabb.expand_point(point);
        }
        Some(aabb)
    }

    pub fn expand_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn expand_aabb(&mut self, other: &Aabb) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half-size along each axis, floored at [`MIN_EXTENT`].
    pub fn extents(&self) -> Vec3 {
        ((self.max - self.min) * 0.5).max(Vec3::splat(MIN_EXTENT))
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space bounds of this box under an affine transform.
    ///
    /// Uses the absolute-matrix form: the new center is the transformed
    /// center and the new extents are `|M3x3| * extents`, which encloses all
    /// eight transformed corners.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        let center = matrix.transform_point3(self.center());
        let half = (self.max - self.min) * 0.5;
        let abs_x = matrix.x_axis.truncate().abs();
        let abs_y = matrix.y_axis.truncate().abs();
        let abs_z = matrix.z_axis.truncate().abs();
        let extents = abs_x * half.x + abs_y * half.y + abs_z * half.z;
        Aabb::from_center_extents(center, extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn new_orders_corners() {
        let aabb = Aabb::new(Vec3::new(1.0, -2.0, 3.0), Vec3::new(-1.0, 2.0, 0.0));
        assert_eq!(aabb.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn expand_point_contains_old_box_and_point() {
        let mut aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let before = aabb;
        let point = Vec3::new(4.0, -3.0, 0.5);
        aabb.expand_point(point);
        assert!(aabb.contains_aabb(&before));
        assert!(aabb.contains_point(point));
    }

    #[test]
    fn expand_aabb_contains_both() {
        let mut a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(-5.0), Vec3::splat(-4.0));
        let original = a;
        a.expand_aabb(&b);
        assert!(a.contains_aabb(&original));
        assert!(a.contains_aabb(&b));
    }

    #[test]
    fn extents_are_floored_for_flat_boxes() {
        let flat = Aabb::new(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(flat.extents().y, MIN_EXTENT);
        assert_eq!(flat.extents().x, 1.0);
    }

    #[test]
    fn transformed_encloses_all_corners() {
        let local = Aabb::new(Vec3::new(-1.0, -0.5, -2.0), Vec3::new(2.0, 1.0, 0.5));
        let matrix = Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 0.5, 1.5),
            Quat::from_euler(glam::EulerRot::XYZ, 0.3, -1.1, 0.7),
            Vec3::new(10.0, -4.0, 2.0),
        );
        let world = local.transformed(&matrix);
        let grown = Aabb::from_center_extents(world.center(), world.extents() + 1.0e-4);
        for corner in local.corners() {
            assert!(grown.contains_point(matrix.transform_point3(corner)));
        }
    }

    #[test]
    fn from_points_of_empty_iterator_is_none() {
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }
}
