//! Point-light variance shadow maps.
//!
//! Each shadow slot owns six consecutive layers (`slot * 6 + face`) of an
//! `Rg32Float` array holding `(d, d²)` with `d = distance / range`. Faces
//! are defined by the [`CUBE_FACES`] basis; rasterization, the blur and the
//! lighting lookup all derive their face mapping from it, so the three
//! agree by construction. The WGSL copy lives in `shader/cube_faces.wgsl`.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::asset::Assets;
use crate::error::RendererError;
use crate::math::Frustum;
use crate::renderer::binding::{FrameResource, ResourceRegistry};
use crate::renderer::lights::{PointLight, MAX_SHADOW_POINT_LIGHTS};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::shadows::sampling::gaussian_weights;
use crate::renderer::shadows::{draw_casters, LayeredTarget, ShadowCaster, ShadowViewUniform};
use crate::renderer::vertex::Vertex;

pub const MOMENTS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
/// Taps on each side of the center in the separable blur.
pub const BLUR_RADIUS: usize = 4;

/// Forward and up vectors of one cube face; right is `forward × up`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubeFace {
    pub forward: Vec3,
    pub up: Vec3,
}

impl CubeFace {
    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up)
    }
}

/// +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: [CubeFace; 6] = [
    CubeFace {
        forward: Vec3::new(1.0, 0.0, 0.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubeFace {
        forward: Vec3::new(-1.0, 0.0, 0.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubeFace {
        forward: Vec3::new(0.0, 1.0, 0.0),
        up: Vec3::new(0.0, 0.0, 1.0),
    },
    CubeFace {
        forward: Vec3::new(0.0, -1.0, 0.0),
        up: Vec3::new(0.0, 0.0, -1.0),
    },
    CubeFace {
        forward: Vec3::new(0.0, 0.0, 1.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
    CubeFace {
        forward: Vec3::new(0.0, 0.0, -1.0),
        up: Vec3::new(0.0, -1.0, 0.0),
    },
];

/// Face whose forward axis dominates `direction`. Ties go to x, then y.
pub fn select_face(direction: Vec3) -> usize {
    let a = direction.abs();
    if a.x >= a.y && a.x >= a.z {
        if direction.x >= 0.0 {
            0
        } else {
            1
        }
    } else if a.y >= a.z {
        if direction.y >= 0.0 {
            2
        } else {
            3
        }
    } else if direction.z >= 0.0 {
        4
    } else {
        5
    }
}

/// Perspective-projected position of `direction` on `face`, in `[-1, 1]`
/// for directions inside the face's 90° frustum.
pub fn face_ndc(face: usize, direction: Vec3) -> Vec2 {
    let basis = CUBE_FACES[face];
    let depth = direction.dot(basis.forward).max(1.0e-6);
    Vec2::new(
        direction.dot(basis.right()) / depth,
        direction.dot(basis.up) / depth,
    )
}

/// Texture coordinate of `direction` on `face` (y down).
pub fn face_uv(face: usize, direction: Vec3) -> Vec2 {
    let ndc = face_ndc(face, direction);
    Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
}

/// Inverse of [`face_ndc`]; not normalized.
pub fn face_direction(face: usize, ndc: Vec2) -> Vec3 {
    let basis = CUBE_FACES[face];
    basis.forward + basis.right() * ndc.x + basis.up * ndc.y
}

pub fn face_view_proj(position: Vec3, face: usize, near: f32, far: f32) -> Mat4 {
    let basis = CUBE_FACES[face];
    let view = Mat4::look_at_rh(position, position + basis.forward, basis.up);
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far.max(near + 1.0e-3));
    proj * view
}

/// Per-pass parameters of the cube-space blur.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct BlurParams {
    slot: u32,
    face: u32,
    /// 0 = along the face's right axis, 1 = along its up axis.
    axis: u32,
    size: u32,
    weights: [[f32; 4]; 3],
}

impl BlurParams {
    fn new(slot: usize, face: usize, axis: u32, size: u32, weights: &[f32]) -> Self {
        let mut packed = [[0.0; 4]; 3];
        for (i, weight) in weights.iter().take(12).enumerate() {
            packed[i / 4][i % 4] = *weight;
        }
        Self {
            slot: slot as u32,
            face: face as u32,
            axis,
            size,
            weights: packed,
        }
    }
}

pub struct PointShadowPass {
    moments: LayeredTarget,
    scratch: LayeredTarget,
    depth_view: wgpu::TextureView,
    moments_pipeline: wgpu::RenderPipeline,
    view_buffer: wgpu::Buffer,
    view_staging: wgpu::Buffer,
    view_bind_group: wgpu::BindGroup,
    blur_pipeline: wgpu::RenderPipeline,
    blur_buffer: wgpu::Buffer,
    blur_staging: wgpu::Buffer,
    /// Reads the moments array (horizontal pass) / the scratch array
    /// (vertical pass).
    blur_from_moments: wgpu::BindGroup,
    blur_from_scratch: wgpu::BindGroup,
    weights: Vec<f32>,
    size: u32,
    near: f32,
}

impl PointShadowPass {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        objects_layout: &wgpu::BindGroupLayout,
        size: u32,
        near: f32,
        blur_sigma: f32,
    ) -> Result<Self, RendererError> {
        let layers = (MAX_SHADOW_POINT_LIGHTS * 6) as u32;
        let moments = LayeredTarget::new(device, "PointShadowMoments", MOMENTS_FORMAT, layers, size);
        let scratch = LayeredTarget::new(device, "PointShadowScratch", MOMENTS_FORMAT, layers, size);

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("PointShadowDepth"),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let view_size = mem::size_of::<ShadowViewUniform>() as u64;
        let view_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PointShadowViewBuffer"),
            size: view_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let view_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("PointShadowViewStaging"),
            size: view_size * layers as u64,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let view_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("PointShadowViewLayout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let view_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("PointShadowViewBindGroup"),
            layout: &view_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: view_buffer.as_entire_binding(),
            }],
        });

        let moments_shader = shaders.module(device, ShaderVariant::PointShadowMoments)?;
        let moments_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PointShadowPipelineLayout"),
            bind_group_layouts: &[&view_layout, objects_layout],
            push_constant_ranges: &[],
        });
        let moments_pipeline = PipelineBuilder::new(device, &moments_layout, &moments_shader)
            .with_label("PointShadowMomentsPipeline")
            .with_vertex_buffer(Vertex::position_layout())
            .with_color_target(MOMENTS_FORMAT, None)
            .with_depth_stencil(DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
            .build();

        let blur_size = mem::size_of::<BlurParams>() as u64;
        let blur_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VsmBlurParams"),
            size: blur_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let blur_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("VsmBlurStaging"),
            size: blur_size * layers as u64 * 2,
            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let blur_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("VsmBlurLayout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2Array,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });
        let blur_bind_group = |label: &str, source: &wgpu::TextureView| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &blur_bind_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: blur_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                ],
            })
        };
        let blur_from_moments = blur_bind_group("VsmBlurFromMoments", moments.array_view());
        let blur_from_scratch = blur_bind_group("VsmBlurFromScratch", scratch.array_view());

        let blur_shader = shaders.module(device, ShaderVariant::VsmBlur)?;
        let blur_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("VsmBlurPipelineLayout"),
            bind_group_layouts: &[&blur_bind_layout],
            push_constant_ranges: &[],
        });
        let blur_pipeline = PipelineBuilder::new(device, &blur_layout, &blur_shader)
            .with_label("VsmBlurPipeline")
            .with_color_target(MOMENTS_FORMAT, None)
            .with_no_culling()
            .build();

        log::info!(
            "Point shadow atlas: {} slots of {}x{} moments",
            MAX_SHADOW_POINT_LIGHTS,
            size,
            size
        );

        Ok(Self {
            moments,
            scratch,
            depth_view,
            moments_pipeline,
            view_buffer,
            view_staging,
            view_bind_group,
            blur_pipeline,
            blur_buffer,
            blur_staging,
            blur_from_moments,
            blur_from_scratch,
            weights: gaussian_weights(blur_sigma, BLUR_RADIUS),
            size,
            near,
        })
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_view(FrameResource::PointShadowMoments, self.moments.array_view());
    }

    /// Renders and blurs the moments of every `(light, slot)` pair. Returns
    /// the number of caster draws.
    pub(crate) fn render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        assets: &Assets,
        objects: &wgpu::BindGroup,
        casters: &[ShadowCaster],
        lights: &[(PointLight, usize)],
    ) -> u32 {
        if lights.is_empty() {
            return 0;
        }

        let view_size = mem::size_of::<ShadowViewUniform>() as u64;
        let mut views = Vec::with_capacity(lights.len() * 6);
        for (light, _) in lights {
            for face in 0..6 {
                let view_proj = face_view_proj(light.position, face, self.near, light.range);
                views.push(ShadowViewUniform::new(view_proj, light.position, light.range));
            }
        }
        queue.write_buffer(&self.view_staging, 0, bytemuck::cast_slice(&views));

        let mut drawn = 0;
        for (light_number, (_, slot)) in lights.iter().enumerate() {
            for face in 0..6 {
                let staged = light_number * 6 + face;
                encoder.copy_buffer_to_buffer(
                    &self.view_staging,
                    staged as u64 * view_size,
                    &self.view_buffer,
                    0,
                    view_size,
                );

                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("PointShadowMomentsPass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: self.moments.layer_view(slot * 6 + face),
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: 1.0,
                                g: 1.0,
                                b: 0.0,
                                a: 0.0,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &self.depth_view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Discard,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                pass.set_pipeline(&self.moments_pipeline);
                pass.set_bind_group(0, &self.view_bind_group, &[]);
                pass.set_bind_group(1, objects, &[]);

                let frustum = Frustum::from_view_proj(&Mat4::from_cols_array_2d(&views[staged].view_proj));
                drawn += draw_casters(&mut pass, assets, casters, &frustum);
            }
        }

        self.blur(encoder, queue, lights.iter().map(|(_, slot)| *slot));
        drawn
    }

    /// Horizontal pass for all faces into the scratch array, then vertical
    /// back into the moments array. Taps that leave a face are re-projected
    /// onto the neighbouring face.
    fn blur(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        queue: &wgpu::Queue,
        slots: impl Iterator<Item = usize> + Clone,
    ) {
        let mut params = Vec::new();
        for axis in 0..2u32 {
            for slot in slots.clone() {
                for face in 0..6 {
                    params.push(BlurParams::new(slot, face, axis, self.size, &self.weights));
                }
            }
        }
        queue.write_buffer(&self.blur_staging, 0, bytemuck::cast_slice(&params));

        let param_size = mem::size_of::<BlurParams>() as u64;
        for (index, param) in params.iter().enumerate() {
            let layer = param.slot as usize * 6 + param.face as usize;
            let (target, source) = if param.axis == 0 {
                (self.scratch.layer_view(layer), &self.blur_from_moments)
            } else {
                (self.moments.layer_view(layer), &self.blur_from_scratch)
            };

            encoder.copy_buffer_to_buffer(
                &self.blur_staging,
                index as u64 * param_size,
                &self.blur_buffer,
                0,
                param_size,
            );

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("VsmBlurPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.blur_pipeline);
            pass.set_bind_group(0, source, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4Swizzles;

    fn sample_directions() -> Vec<Vec3> {
        let mut directions = Vec::new();
        for i in 0..12 {
            for j in 1..8 {
                let theta = i as f32 / 12.0 * std::f32::consts::TAU;
                let phi = j as f32 / 8.0 * std::f32::consts::PI;
                directions.push(Vec3::new(
                    phi.sin() * theta.cos(),
                    phi.cos(),
                    phi.sin() * theta.sin(),
                ));
            }
        }
        directions.extend([Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z]);
        directions
    }

    #[test]
    fn faces_are_orthonormal() {
        for face in CUBE_FACES {
            assert!(face.forward.dot(face.up).abs() < 1e-6);
            assert!((face.right().length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn selected_face_contains_direction() {
        for direction in sample_directions() {
            let ndc = face_ndc(select_face(direction), direction);
            assert!(ndc.x.abs() <= 1.0 + 1e-5, "{direction:?} -> {ndc:?}");
            assert!(ndc.y.abs() <= 1.0 + 1e-5, "{direction:?} -> {ndc:?}");
        }
    }

    #[test]
    fn lookup_matches_rasterization() {
        let light = Vec3::new(2.0, 1.0, -3.0);
        for direction in sample_directions() {
            let face = select_face(direction);
            let clip = face_view_proj(light, face, 0.05, 20.0) * (light + direction * 5.0).extend(1.0);
            let raster = clip.xy() / clip.w;
            let lookup = face_ndc(face, direction);
            assert!(raster.abs_diff_eq(lookup, 1e-4), "{direction:?}: {raster:?} vs {lookup:?}");
        }
    }

    #[test]
    fn face_direction_inverts_ndc() {
        for face in 0..6 {
            let ndc = Vec2::new(0.3, -0.7);
            let direction = face_direction(face, ndc);
            assert_eq!(select_face(direction), face);
            assert!(face_ndc(face, direction).abs_diff_eq(ndc, 1e-5));
        }
    }

    #[test]
    fn taps_past_an_edge_land_on_the_neighbour() {
        // Just past the right edge of +X continues onto a neighbouring face
        // at the matching edge.
        let direction = face_direction(0, Vec2::new(1.05, 0.2));
        let neighbour = select_face(direction);
        assert_ne!(neighbour, 0);
        let ndc = face_ndc(neighbour, direction);
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0);
        assert!(ndc.x.abs() > 0.9 || ndc.y.abs() > 0.9);
    }

    #[test]
    fn blur_params_pack_weights() {
        let weights = gaussian_weights(1.5, BLUR_RADIUS);
        let params = BlurParams::new(2, 5, 1, 512, &weights);
        assert_eq!(mem::size_of::<BlurParams>(), 64);
        assert_eq!(params.weights[1][0], weights[4]);
        assert_eq!(params.weights[2][0], weights[8]);
        assert_eq!(params.weights[2][1], 0.0);
    }
}
