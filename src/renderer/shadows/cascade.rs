use glam::{Mat4, Vec3, Vec4};

use crate::error::RendererError;
use crate::math::safe_normalize;
use crate::renderer::camera::FrameCamera;

/// Upper bound on cascade bands (thresholds + 1); sizes the shadow array
/// and the directional light uniform.
pub const MAX_CASCADE_BANDS: usize = 8;

/// Past this `|dot(direction, up)|` the light view switches to the
/// secondary up axis.
const UP_SWITCH_DOT: f32 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeBand {
    pub near: f32,
    pub far: f32,
}

/// Plans the light-space matrices of a cascaded directional shadow map for
/// one frame. Rebuilt every frame from the current camera.
#[derive(Debug, Clone)]
pub struct CascadePlanner {
    view: Mat4,
    fov_y: f32,
    aspect: f32,
    near: f32,
    far: f32,
    light_direction: Vec3,
    thresholds: Vec<f32>,
    z_multipliers: Vec<f32>,
}

impl CascadePlanner {
    /// `splits` are fractions of the camera far plane.
    pub fn new(
        camera: &FrameCamera,
        light_direction: Vec3,
        splits: &[f32],
        z_multipliers: &[f32],
    ) -> Result<Self, RendererError> {
        let thresholds = splits.iter().map(|s| s * camera.far).collect();
        Self::with_thresholds(camera, light_direction, thresholds, z_multipliers)
    }

    /// `thresholds` are absolute view-space distances, strictly increasing
    /// and strictly inside `(near, far)`.
    pub fn with_thresholds(
        camera: &FrameCamera,
        light_direction: Vec3,
        thresholds: Vec<f32>,
        z_multipliers: &[f32],
    ) -> Result<Self, RendererError> {
        if thresholds.len() + 1 > MAX_CASCADE_BANDS {
            return Err(RendererError::InvalidConfig(format!(
                "{} cascade thresholds exceed the {} band limit",
                thresholds.len(),
                MAX_CASCADE_BANDS
            )));
        }
        if thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(RendererError::InvalidConfig(
                "cascade thresholds must be strictly increasing".into(),
            ));
        }
        if let (Some(first), Some(last)) = (thresholds.first(), thresholds.last()) {
            if *first <= camera.near || *last >= camera.far {
                return Err(RendererError::InvalidConfig(format!(
                    "cascade thresholds must lie inside ({}, {})",
                    camera.near, camera.far
                )));
            }
        }
        let z_multipliers = if z_multipliers.is_empty() {
            vec![10.0]
        } else {
            z_multipliers.to_vec()
        };

        Ok(Self {
            view: camera.view,
            fov_y: camera.fov_y,
            aspect: camera.aspect,
            near: camera.near,
            far: camera.far,
            light_direction: safe_normalize(light_direction, Vec3::NEG_Y),
            thresholds,
            z_multipliers,
        })
    }

    pub fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    pub fn band_count(&self) -> usize {
        self.thresholds.len() + 1
    }

    /// `[near, far]` of each band; consecutive bands share their boundary.
    pub fn bands(&self) -> Vec<CascadeBand> {
        let mut bands = Vec::with_capacity(self.band_count());
        let mut start = self.near;
        for &threshold in &self.thresholds {
            bands.push(CascadeBand {
                near: start,
                far: threshold,
            });
            start = threshold;
        }
        bands.push(CascadeBand {
            near: start,
            far: self.far,
        });
        bands
    }

    pub fn cascade_matrices(&self) -> Vec<Mat4> {
        self.bands()
            .iter()
            .enumerate()
            .map(|(index, band)| self.compute_cascade_matrix(band.near, band.far, index))
            .collect()
    }

    /// Light view-projection that tightly encloses the camera sub-frustum
    /// `[near, far]`.
    pub fn compute_cascade_matrix(&self, near: f32, far: f32, cascade_index: usize) -> Mat4 {
        let proj = Mat4::perspective_rh(self.fov_y, self.aspect, near, far);
        let corners = frustum_corners_world(&(proj * self.view));

        let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
        let up = if self.light_direction.dot(Vec3::Y).abs() > UP_SWITCH_DOT {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let light_view = Mat4::look_at_rh(center - self.light_direction, center, up);

        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for corner in corners {
            let p = light_view.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }

        // Pull the Z range out so casters between the light and the slice
        // still land in the map.
        let multiplier = self.z_multiplier(cascade_index);
        let min_z = if min.z < 0.0 {
            min.z * multiplier
        } else {
            min.z / multiplier
        };
        let max_z = if max.z < 0.0 {
            max.z / multiplier
        } else {
            max.z * multiplier
        };

        let light_proj = Mat4::orthographic_rh(min.x, max.x, min.y, max.y, -max_z, -min_z);
        light_proj * light_view
    }

    fn z_multiplier(&self, cascade_index: usize) -> f32 {
        self.z_multipliers
            .get(cascade_index)
            .or(self.z_multipliers.last())
            .copied()
            .unwrap_or(10.0)
    }
}

/// The eight world-space corners of the clip volume of `view_proj`
/// (wgpu depth range `[0, 1]`).
pub fn frustum_corners_world(view_proj: &Mat4) -> [Vec3; 8] {
    let inverse = view_proj.inverse();
    let mut corners = [Vec3::ZERO; 8];
    let mut i = 0;
    for x in [-1.0, 1.0] {
        for y in [-1.0, 1.0] {
            for z in [0.0, 1.0] {
                let p = inverse * Vec4::new(x, y, z, 1.0);
                corners[i] = p.truncate() / p.w;
                i += 1;
            }
        }
    }
    corners
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> FrameCamera {
        FrameCamera::look_at(
            Vec3::new(0.0, 5.0, 10.0),
            Vec3::ZERO,
            Vec3::Y,
            60f32.to_radians(),
            16.0 / 9.0,
            0.1,
            100.0,
        )
    }

    #[test]
    fn light_straight_down_uses_secondary_up() {
        let planner =
            CascadePlanner::with_thresholds(&camera(), Vec3::NEG_Y, vec![10.0], &[10.0]).unwrap();
        for matrix in planner.cascade_matrices() {
            assert!(matrix.is_finite());
        }
    }

    #[test]
    fn out_of_range_thresholds_are_rejected() {
        assert!(CascadePlanner::with_thresholds(&camera(), Vec3::NEG_Y, vec![150.0], &[]).is_err());
        assert!(CascadePlanner::with_thresholds(&camera(), Vec3::NEG_Y, vec![0.05], &[]).is_err());
    }

    #[test]
    fn missing_multiplier_entries_repeat_the_last() {
        let planner = CascadePlanner::with_thresholds(
            &camera(),
            Vec3::new(-0.3, -1.0, -0.2),
            vec![5.0, 20.0],
            &[4.0, 8.0],
        )
        .unwrap();
        assert_eq!(planner.z_multiplier(0), 4.0);
        assert_eq!(planner.z_multiplier(2), 8.0);
    }
}
