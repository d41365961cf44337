// renderer/uniforms.rs
use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::renderer::camera::FrameCamera;
use crate::renderer::material::Material;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct CameraUniform {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub inverse_proj: [[f32; 4]; 4],
    pub inverse_view_proj: [[f32; 4]; 4],
    pub camera_pos: [f32; 4],
    /// x = width, y = height, z = near, w = far.
    pub screen: [f32; 4],
}

impl CameraUniform {
    pub fn new() -> Self {
        Self {
            view: Mat4::IDENTITY.to_cols_array_2d(),
            proj: Mat4::IDENTITY.to_cols_array_2d(),
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            inverse_proj: Mat4::IDENTITY.to_cols_array_2d(),
            inverse_view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            camera_pos: [0.0, 0.0, 0.0, 1.0],
            screen: [1.0, 1.0, 0.1, 100.0],
        }
    }

    pub fn from_camera(camera: &FrameCamera, width: u32, height: u32) -> Self {
        let proj = camera.projection();
        let view_proj = proj * camera.view;
        Self {
            view: camera.view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view_proj: view_proj.to_cols_array_2d(),
            inverse_proj: proj.inverse().to_cols_array_2d(),
            inverse_view_proj: view_proj.inverse().to_cols_array_2d(),
            camera_pos: camera.position.extend(1.0).to_array(),
            screen: [width as f32, height as f32, camera.near, camera.far],
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame-wide shading parameters (group 0, binding 1).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, PartialEq, Debug)]
pub struct ShadingUniform {
    /// rgb = ambient, w = 1 when PBR shading is active.
    pub ambient: [f32; 4],
    /// rgb = fog color, w = density.
    pub fog_color: [f32; 4],
    /// x = fog mode, y = linear start, z = linear end, w = IBL intensity.
    pub fog_params: [f32; 4],
    /// x = tiles across, y = tiles down, z = lights per tile, w = point lights.
    pub tile_params: [u32; 4],
    /// x = min bias, y = max bias, z = VSM variance floor, w = bleed reduction.
    pub shadow_params: [f32; 4],
    /// x = debug overlay on, y = SSAO on.
    pub debug: [u32; 4],
}

impl ShadingUniform {
    pub fn new() -> Self {
        Self {
            ambient: [0.03, 0.03, 0.035, 0.0],
            fog_color: [0.5, 0.6, 0.7, 0.0],
            fog_params: [0.0, 20.0, 200.0, 1.0],
            tile_params: [1, 1, 256, 0],
            shadow_params: [0.0005, 0.005, 0.00002, 0.2],
            debug: [0, 1, 0, 0],
        }
    }
}

impl Default for ShadingUniform {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-draw data stored in the objects storage buffer; indexed by the
/// draw's `first_instance`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ObjectData {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    pub params: [f32; 4],
    /// x = material flags, y = draw kind.
    pub flags: [u32; 4],
}

pub const DRAW_KIND_MESH: u32 = 0;
pub const DRAW_KIND_TERRAIN: u32 = 1;

impl ObjectData {
    pub fn new(model: Mat4, material: &Material, kind: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: normal_matrix(&model).to_cols_array_2d(),
            base_color: material.base_color().to_array(),
            params: material.params(),
            flags: [material.flags().bits(), kind, 0, 0],
        }
    }
}

/// Inverse-transpose of the upper 3x3, padded to a 4x4 for WGSL alignment.
/// Falls back to the model matrix itself when it is singular.
pub fn normal_matrix(model: &Mat4) -> Mat4 {
    let upper = Mat3::from_mat4(*model);
    let det = upper.determinant();
    let n = if det.abs() > f32::EPSILON {
        upper.inverse().transpose()
    } else {
        upper
    };
    Mat4::from_cols(
        n.x_axis.extend(0.0),
        n.y_axis.extend(0.0),
        n.z_axis.extend(0.0),
        Vec4::W,
    )
}

/// Transforms a direction with [`normal_matrix`] and renormalizes.
pub fn transform_normal(model: &Mat4, normal: Vec3) -> Vec3 {
    normal_matrix(model)
        .transform_vector3(normal)
        .normalize_or_zero()
}
