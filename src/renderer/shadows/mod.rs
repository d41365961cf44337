pub mod cascade;
pub mod directional;
pub mod point;
pub mod sampling;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::asset::{Assets, MeshHandle};
use crate::math::{Aabb, Frustum};

pub use cascade::{CascadeBand, CascadePlanner, MAX_CASCADE_BANDS};
pub use directional::{CascadePlan, CascadeShadowPass, DirectionalLightUniform};
pub use point::{PointShadowPass, CUBE_FACES};

/// View uniform shared by both shadow pipelines.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct ShadowViewUniform {
    pub view_proj: [[f32; 4]; 4],
    /// xyz = light position (point lights), w = far distance.
    pub light_position_far: [f32; 4],
}

impl ShadowViewUniform {
    pub fn new(view_proj: Mat4, light_position: Vec3, far: f32) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            light_position_far: light_position.extend(far).to_array(),
        }
    }
}

/// A draw that renders into shadow maps: its shadow mesh (the LOD mesh
/// when one was supplied), its slot in the objects buffer and its bounds.
#[derive(Debug, Clone, Copy)]
pub struct ShadowCaster {
    pub mesh: MeshHandle,
    pub object_index: u32,
    pub world_aabb: Aabb,
}

/// Depth or colour texture array with one render view per layer.
pub(crate) struct LayeredTarget {
    texture: wgpu::Texture,
    array_view: wgpu::TextureView,
    layer_views: Vec<wgpu::TextureView>,
}

impl LayeredTarget {
    pub(crate) fn new(
        device: &wgpu::Device,
        label: &str,
        format: wgpu::TextureFormat,
        layers: u32,
        size: u32,
    ) -> Self {
        let layers = layers.max(1);
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{label}ArrayView")),
            format: Some(format),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_array_layer: 0,
            array_layer_count: Some(layers),
            ..Default::default()
        });

        let layer_views = (0..layers)
            .map(|layer| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some(&format!("{label}Layer{layer}")),
                    format: Some(format),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    base_array_layer: layer,
                    array_layer_count: Some(1),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            texture,
            array_view,
            layer_views,
        }
    }

    pub(crate) fn layer_view(&self, index: usize) -> &wgpu::TextureView {
        let clamped = index.min(self.layer_views.len().saturating_sub(1));
        if clamped != index {
            log::warn!(
                "Shadow layer index {} clamped to {} (max: {})",
                index,
                clamped,
                self.layer_views.len() - 1
            );
        }
        &self.layer_views[clamped]
    }

    pub(crate) fn array_view(&self) -> &wgpu::TextureView {
        &self.array_view
    }

    pub(crate) fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}

/// Records one indexed draw per caster whose bounds intersect `frustum`.
/// Returns how many were drawn.
pub(crate) fn draw_casters(
    pass: &mut wgpu::RenderPass<'_>,
    assets: &Assets,
    casters: &[ShadowCaster],
    frustum: &Frustum,
) -> u32 {
    let mut drawn = 0;
    for caster in casters {
        if !frustum.is_aabb_visible(&caster.world_aabb) {
            continue;
        }
        let Some(mesh) = assets.meshes.get(caster.mesh) else {
            continue;
        };
        pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
        pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
        pass.draw_indexed(
            0..mesh.index_count(),
            0,
            caster.object_index..caster.object_index + 1,
        );
        drawn += 1;
    }
    drawn
}
