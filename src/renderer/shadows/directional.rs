use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::asset::Assets;
use crate::error::RendererError;
use crate::math::Frustum;
use crate::renderer::binding::{FrameResource, ResourceRegistry};
use crate::renderer::camera::FrameCamera;
use crate::renderer::internal::readback;
use crate::renderer::lights::DirectionalLight;
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::shadows::cascade::{CascadePlanner, MAX_CASCADE_BANDS};
use crate::renderer::shadows::{draw_casters, LayeredTarget, ShadowCaster, ShadowViewUniform};
use crate::renderer::vertex::Vertex;
use crate::settings::ShadowSettings;

pub const CASCADE_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Directional light as seen by the lighting shaders (lighting group,
/// binding 1).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct DirectionalLightUniform {
    /// xyz = travel direction, w = 1 when active.
    pub direction: [f32; 4],
    /// rgb = color, w = intensity.
    pub color: [f32; 4],
    /// x = casts shadows, y = band count, z = 1 / shadow map size.
    pub params: [f32; 4],
    /// Cascade thresholds, four per vector; unused entries are zero.
    pub thresholds: [[f32; 4]; MAX_CASCADE_BANDS / 4],
    pub matrices: [[[f32; 4]; 4]; MAX_CASCADE_BANDS],
}

impl DirectionalLightUniform {
    pub fn new(light: &DirectionalLight, plan: Option<&CascadePlan>, map_size: u32) -> Self {
        let mut uniform = Self::zeroed();
        if !light.active {
            return uniform;
        }
        uniform.direction = light.direction.extend(1.0).to_array();
        uniform.color = light.color.extend(light.intensity).to_array();
        uniform.params[2] = 1.0 / map_size.max(1) as f32;

        if let Some(plan) = plan {
            uniform.params[0] = 1.0;
            uniform.params[1] = plan.matrices.len() as f32;
            for (i, threshold) in plan.thresholds.iter().enumerate() {
                uniform.thresholds[i / 4][i % 4] = *threshold;
            }
            for (slot, matrix) in uniform.matrices.iter_mut().zip(&plan.matrices) {
                *slot = matrix.to_cols_array_2d();
            }
        }
        uniform
    }

    pub fn band_count(&self) -> usize {
        self.params[1] as usize
    }
}

/// Matrices and view-space thresholds of this frame's cascades.
#[derive(Debug, Clone)]
pub struct CascadePlan {
    pub matrices: Vec<Mat4>,
    pub thresholds: Vec<f32>,
}

impl CascadePlan {
    /// `None` when the light is inactive, casts no shadows, or the planner
    /// rejects the configuration for this camera (logged).
    pub fn for_frame(
        camera: &FrameCamera,
        light: &DirectionalLight,
        settings: &ShadowSettings,
    ) -> Option<Self> {
        if !light.active || !light.casts_shadows {
            return None;
        }
        match CascadePlanner::new(
            camera,
            light.direction,
            &settings.cascade_splits,
            &settings.cascade_z_multipliers,
        ) {
            Ok(planner) => Some(Self {
                matrices: planner.cascade_matrices(),
                thresholds: planner.thresholds().to_vec(),
            }),
            Err(err) => {
                log::warn!("Skipping directional shadows this frame: {err}");
                None
            }
        }
    }
}

/// Depth array with one layer per cascade band, plus the pipeline that
/// renders casters into it.
pub struct CascadeShadowPass {
    target: LayeredTarget,
    sampler: wgpu::Sampler,
    pipeline: wgpu::RenderPipeline,
    view_buffer: wgpu::Buffer,
    staging_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    size: u32,
}

impl CascadeShadowPass {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        objects_layout: &wgpu::BindGroupLayout,
        size: u32,
    ) -> Result<Self, RendererError> {
        let target = LayeredTarget::new(
            device,
            "CascadeShadowMap",
            CASCADE_DEPTH_FORMAT,
            MAX_CASCADE_BANDS as u32,
            size,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("ShadowComparisonSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });

        let uniform_size = mem::size_of::<ShadowViewUniform>() as u64;
        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CascadeViewBuffer"),
            size: uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("CascadeViewStaging"),
            size: uniform_size * MAX_CASCADE_BANDS as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CascadeViewLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("CascadeViewBindGroup"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: view_buffer.as_entire_binding(),
            }],
        });

        let shader = shaders.module(device, ShaderVariant::ShadowDepth)?;
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("CascadeShadowPipelineLayout"),
            bind_group_layouts: &[&view_layout, objects_layout],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &layout, &shader)
            .with_label("CascadeShadowPipeline")
            .with_vertex_buffer(Vertex::position_layout())
            .depth_only()
            .with_depth_stencil(CASCADE_DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
            .build();

        log::info!(
            "Cascade shadow map: {}x{} with {} layers",
            size,
            size,
            MAX_CASCADE_BANDS
        );

        Ok(Self {
            target,
            sampler,
            pipeline,
            view_buffer,
            staging_buffer,
            bind_group,
            size,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_view(FrameResource::CascadeShadowMap, self.target.array_view());
        registry.insert_sampler(FrameResource::ShadowComparisonSampler, &self.sampler);
    }

    /// Records one depth pass per band and returns how many casters each
    /// band drew.
    pub(crate) fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        assets: &Assets,
        objects: &wgpu::BindGroup,
        casters: &[ShadowCaster],
        plan: &CascadePlan,
    ) -> Vec<u32> {
        let uniform_size = mem::size_of::<ShadowViewUniform>() as u64;
        let uniforms: Vec<ShadowViewUniform> = plan
            .matrices
            .iter()
            .map(|matrix| ShadowViewUniform::new(*matrix, Vec3::ZERO, 1.0))
            .collect();
        queue.write_buffer(&self.staging_buffer, 0, bytemuck::cast_slice(&uniforms));

        let mut drawn = Vec::with_capacity(plan.matrices.len());
        for (band, matrix) in plan.matrices.iter().enumerate() {
            encoder.copy_buffer_to_buffer(
                &self.staging_buffer,
                band as u64 * uniform_size,
                &self.view_buffer,
                0,
                uniform_size,
            );

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("CascadeShadowPass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.target.layer_view(band),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_bind_group(1, objects, &[]);

            let frustum = Frustum::from_view_proj(matrix);
            drawn.push(draw_casters(&mut pass, assets, casters, &frustum));
        }
        drawn
    }

    /// Blocking readback of one band's depth values, row-major.
    pub(crate) fn read_layer(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layer: u32,
    ) -> Result<Vec<f32>, RendererError> {
        if layer as usize >= MAX_CASCADE_BANDS {
            return Err(RendererError::InvalidConfig(format!(
                "cascade layer {layer} out of range"
            )));
        }
        let bytes = readback::read_texture_layer(
            device,
            queue,
            self.target.texture(),
            layer,
            wgpu::TextureAspect::DepthOnly,
            4,
        )?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sun(casts_shadows: bool) -> DirectionalLight {
        DirectionalLight {
            direction: Vec3::new(-0.3, -1.0, -0.2).normalize(),
            color: Vec3::ONE,
            intensity: 2.0,
            active: true,
            casts_shadows,
        }
    }

    fn camera() -> FrameCamera {
        FrameCamera::look_at(
            Vec3::new(0.0, 3.0, 8.0),
            Vec3::ZERO,
            Vec3::Y,
            60f32.to_radians(),
            1.5,
            0.1,
            200.0,
        )
    }

    #[test]
    fn uniform_is_592_bytes() {
        assert_eq!(mem::size_of::<DirectionalLightUniform>(), 592);
    }

    #[test]
    fn inactive_light_uploads_zeroes() {
        let uniform = DirectionalLightUniform::new(&DirectionalLight::default(), None, 2048);
        assert_eq!(uniform.direction[3], 0.0);
        assert_eq!(uniform.band_count(), 0);
    }

    #[test]
    fn plan_is_skipped_without_shadow_casting() {
        let settings = ShadowSettings::default();
        assert!(CascadePlan::for_frame(&camera(), &sun(false), &settings).is_none());
        assert!(CascadePlan::for_frame(&camera(), &DirectionalLight::default(), &settings).is_none());
    }

    #[test]
    fn uniform_packs_thresholds_and_matrices() {
        let settings = ShadowSettings::default();
        let plan = CascadePlan::for_frame(&camera(), &sun(true), &settings).unwrap();
        assert_eq!(plan.matrices.len(), settings.cascade_splits.len() + 1);

        let uniform = DirectionalLightUniform::new(&sun(true), Some(&plan), 1024);
        assert_eq!(uniform.band_count(), plan.matrices.len());
        assert_eq!(uniform.params[0], 1.0);
        assert_eq!(uniform.params[2], 1.0 / 1024.0);
        assert_eq!(uniform.thresholds[0][0], plan.thresholds[0]);
        assert_eq!(uniform.thresholds[0][3], plan.thresholds[3]);
        assert_eq!(uniform.thresholds[1][0], 0.0);
        assert_eq!(
            uniform.matrices[1],
            plan.matrices[1].to_cols_array_2d()
        );
    }
}
