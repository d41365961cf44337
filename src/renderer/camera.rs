use glam::{Mat4, Vec3};

/// Camera state supplied by the scene layer once per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCamera {
    pub position: Vec3,
    pub view: Mat4,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl FrameCamera {
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        Self {
            position: eye,
            view: Mat4::look_at_rh(eye, target, up),
            fov_y,
            aspect,
            near,
            far,
        }
    }

    /// Recovers camera parameters from a view matrix and a right-handed
    /// `[0, 1]`-depth perspective projection (as built by
    /// `Mat4::perspective_rh`).
    pub fn from_matrices(view: Mat4, proj: Mat4) -> Self {
        let y_scale = proj.y_axis.y;
        let fov_y = 2.0 * (1.0 / y_scale).atan();
        let aspect = y_scale / proj.x_axis.x;
        let r = proj.z_axis.z;
        let near = proj.w_axis.z / r;
        let far = r * near / (1.0 + r);
        Self {
            position: view.inverse().w_axis.truncate(),
            view,
            fov_y,
            aspect,
            near,
            far,
        }
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view
    }

    /// Positive distance along the view direction.
    pub fn view_depth(&self, world: Vec3) -> f32 {
        -self.view.transform_point3(world).z
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_matrices_round_trips_parameters() {
        let original = FrameCamera::look_at(
            Vec3::new(3.0, 2.0, 8.0),
            Vec3::ZERO,
            Vec3::Y,
            55f32.to_radians(),
            16.0 / 9.0,
            0.2,
            300.0,
        );
        let rebuilt = FrameCamera::from_matrices(original.view, original.projection());
        assert!((rebuilt.fov_y - original.fov_y).abs() < 1e-4);
        assert!((rebuilt.aspect - original.aspect).abs() < 1e-4);
        assert!((rebuilt.near - original.near).abs() < 1e-3);
        assert!((rebuilt.far - original.far).abs() / original.far < 1e-2);
        assert!(rebuilt.position.abs_diff_eq(original.position, 1e-3));
    }

    #[test]
    fn view_depth_is_positive_in_front() {
        let camera = FrameCamera::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            1.0,
            0.1,
            100.0,
        );
        assert!((camera.view_depth(Vec3::ZERO) - 5.0).abs() < 1e-5);
    }
}
