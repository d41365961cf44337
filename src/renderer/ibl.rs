//! Image-based lighting precompute: environment cube, diffuse irradiance,
//! GGX-prefiltered specular mips and the split-sum BRDF table. Runs once
//! whenever the environment changes.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::error::RendererError;
use crate::renderer::binding::{FrameResource, ResourceRegistry};
use crate::renderer::internal::buffers::uniform_entry;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::texture::Texture;

pub const ENVIRONMENT_SIZE: u32 = 256;
pub const IRRADIANCE_SIZE: u32 = 32;
pub const PREFILTER_SIZE: u32 = 128;
pub const PREFILTER_MIPS: u32 = 5;
pub const BRDF_LUT_SIZE: u32 = 128;
const CUBE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const WORKGROUP_SIZE: u32 = 8;

/// Direction through texel `uv` (in `[0, 1]²`, v down) of cube `face`,
/// following the layer order and orientation wgpu samples cube maps with.
pub fn cube_texel_direction(face: u32, uv: Vec2) -> Vec3 {
    let u = uv.x * 2.0 - 1.0;
    let v = uv.y * 2.0 - 1.0;
    let direction = match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    };
    direction.normalize()
}

/// Roughness each prefiltered mip is convolved for.
pub fn roughness_for_mip(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        return 0.0;
    }
    mip as f32 / (mip_count - 1) as f32
}

/// Low-discrepancy sample `i` of `n`. Mirrors `ibl_common.wgsl`.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n.max(1) as f32, i.reverse_bits() as f32 * 2.328_306_4e-10)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct IblParams {
    face_size: u32,
    sample_count: u32,
    /// 1 when an equirectangular source is bound; otherwise a procedural
    /// sky is generated.
    use_source: u32,
    _pad: u32,
    roughness: f32,
    _pad2: [f32; 3],
}

impl IblParams {
    fn new(face_size: u32, sample_count: u32, use_source: bool, roughness: f32) -> Self {
        Self {
            face_size,
            sample_count,
            use_source: use_source as u32,
            _pad: 0,
            roughness,
            _pad2: [0.0; 3],
        }
    }
}

struct CubeTarget {
    texture: wgpu::Texture,
    cube_view: wgpu::TextureView,
}

impl CubeTarget {
    fn new(device: &wgpu::Device, label: &str, size: u32, mips: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size,
                height: size,
                depth_or_array_layers: 6,
            },
            mip_level_count: mips,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let cube_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Self { texture, cube_view }
    }

    fn storage_view(&self, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("IblStorageView"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(6),
            ..Default::default()
        })
    }
}

fn storage_texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: CUBE_FORMAT,
            view_dimension,
        },
        count: None,
    }
}

fn sampled_texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

/// The four IBL textures, ready to be bound by the PBR and skybox passes.
pub(crate) struct IblMaps {
    environment: CubeTarget,
    irradiance: CubeTarget,
    prefiltered: CubeTarget,
    _brdf_lut: wgpu::Texture,
    brdf_view: wgpu::TextureView,
}

impl IblMaps {
    /// Runs the full precompute chain. `source` is an equirectangular HDR
    /// image; without one a procedural sky gradient is used.
    pub(crate) fn generate(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        shaders: &ShaderLibrary,
        source: Option<&Texture>,
    ) -> Result<Self, RendererError> {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("IblSampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let placeholder;
        let source_view = match source {
            Some(texture) => &texture.view,
            None => {
                placeholder = Texture::from_rgba32f(device, queue, &[0.0; 4], 1, 1, Some("IblNoSource"));
                &placeholder.view
            }
        };

        let environment = CubeTarget::new(device, "EnvironmentCube", ENVIRONMENT_SIZE, 1);
        let irradiance = CubeTarget::new(device, "IrradianceCube", IRRADIANCE_SIZE, 1);
        let prefiltered = CubeTarget::new(device, "PrefilteredCube", PREFILTER_SIZE, PREFILTER_MIPS);
        let brdf_lut = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("BrdfLut"),
            size: wgpu::Extent3d {
                width: BRDF_LUT_SIZE,
                height: BRDF_LUT_SIZE,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CUBE_FORMAT,
            usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let brdf_view = brdf_lut.create_view(&wgpu::TextureViewDescriptor::default());

        let convolve_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("IblConvolveBindLayout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                sampled_texture_entry(1, wgpu::TextureViewDimension::Cube),
                sampler_entry(2),
                storage_texture_entry(3, wgpu::TextureViewDimension::D2Array),
            ],
        });
        let equirect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("IblEquirectBindLayout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                sampled_texture_entry(1, wgpu::TextureViewDimension::D2),
                sampler_entry(2),
                storage_texture_entry(3, wgpu::TextureViewDimension::D2Array),
            ],
        });
        let brdf_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("IblBrdfBindLayout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                storage_texture_entry(1, wgpu::TextureViewDimension::D2),
            ],
        });

        let pipeline = |variant: ShaderVariant, layout: &wgpu::BindGroupLayout| {
            let module = shaders.module(device, variant)?;
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(variant.label()),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            Ok::<_, RendererError>(device.create_compute_pipeline(
                &wgpu::ComputePipelineDescriptor {
                    label: Some(variant.label()),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: Default::default(),
                    cache: None,
                },
            ))
        };
        let equirect_pipeline = pipeline(ShaderVariant::IblEquirectToCube, &equirect_layout)?;
        let irradiance_pipeline = pipeline(ShaderVariant::IblIrradiance, &convolve_layout)?;
        let prefilter_pipeline = pipeline(ShaderVariant::IblPrefilter, &convolve_layout)?;
        let brdf_pipeline = pipeline(ShaderVariant::IblBrdfLut, &brdf_layout)?;

        let params_buffer = |params: IblParams| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("IblParams"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        };
        let cube_group = |layout: &wgpu::BindGroupLayout,
                          params: &wgpu::Buffer,
                          input: &wgpu::TextureView,
                          output: &wgpu::TextureView| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("IblBindGroup"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(input),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: wgpu::BindingResource::TextureView(output),
                    },
                ],
            })
        };
        let groups = |size: u32| size.div_ceil(WORKGROUP_SIZE);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("IblPrecomputeEncoder"),
        });

        let equirect_params = params_buffer(IblParams::new(ENVIRONMENT_SIZE, 0, source.is_some(), 0.0));
        let environment_storage = environment.storage_view(0);
        let equirect_group = cube_group(
            &equirect_layout,
            &equirect_params,
            source_view,
            &environment_storage,
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("IblEquirectPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&equirect_pipeline);
            pass.set_bind_group(0, &equirect_group, &[]);
            pass.dispatch_workgroups(groups(ENVIRONMENT_SIZE), groups(ENVIRONMENT_SIZE), 6);
        }

        let irradiance_params = params_buffer(IblParams::new(IRRADIANCE_SIZE, 0, true, 0.0));
        let irradiance_storage = irradiance.storage_view(0);
        let irradiance_group = cube_group(
            &convolve_layout,
            &irradiance_params,
            &environment.cube_view,
            &irradiance_storage,
        );
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("IblIrradiancePass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&irradiance_pipeline);
            pass.set_bind_group(0, &irradiance_group, &[]);
            pass.dispatch_workgroups(groups(IRRADIANCE_SIZE), groups(IRRADIANCE_SIZE), 6);
        }

        for mip in 0..PREFILTER_MIPS {
            let size = (PREFILTER_SIZE >> mip).max(1);
            let params = params_buffer(IblParams::new(
                size,
                256,
                true,
                roughness_for_mip(mip, PREFILTER_MIPS),
            ));
            let storage = prefiltered.storage_view(mip);
            let group = cube_group(&convolve_layout, &params, &environment.cube_view, &storage);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("IblPrefilterPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&prefilter_pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.dispatch_workgroups(groups(size), groups(size), 6);
        }

        let brdf_params = params_buffer(IblParams::new(BRDF_LUT_SIZE, 512, true, 0.0));
        let brdf_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("IblBrdfBindGroup"),
            layout: &brdf_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: brdf_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&brdf_view),
                },
            ],
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("IblBrdfPass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&brdf_pipeline);
            pass.set_bind_group(0, &brdf_group, &[]);
            pass.dispatch_workgroups(groups(BRDF_LUT_SIZE), groups(BRDF_LUT_SIZE), 1);
        }

        queue.submit(Some(encoder.finish()));
        log::info!(
            "Generated IBL maps ({})",
            if source.is_some() { "environment image" } else { "procedural sky" }
        );

        Ok(Self {
            environment,
            irradiance,
            prefiltered,
            _brdf_lut: brdf_lut,
            brdf_view,
        })
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_view(FrameResource::EnvironmentCube, &self.environment.cube_view);
        registry.insert_view(FrameResource::IrradianceCube, &self.irradiance.cube_view);
        registry.insert_view(FrameResource::PrefilteredCube, &self.prefiltered.cube_view);
        registry.insert_view(FrameResource::BrdfLut, &self.brdf_view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_centers_point_along_axes() {
        let expected = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for (face, axis) in expected.iter().enumerate() {
            let direction = cube_texel_direction(face as u32, Vec2::splat(0.5));
            assert!(direction.abs_diff_eq(*axis, 1e-6), "face {face}: {direction}");
        }
    }

    #[test]
    fn face_texels_stay_on_their_face() {
        for face in 0..6u32 {
            for uv in [Vec2::new(0.1, 0.1), Vec2::new(0.9, 0.2), Vec2::new(0.3, 0.8)] {
                let d = cube_texel_direction(face, uv);
                let major = d.abs().max_element();
                let axis = match face / 2 {
                    0 => d.x,
                    1 => d.y,
                    _ => d.z,
                };
                assert!((axis.abs() - major).abs() < 1e-6);
                assert_eq!(axis > 0.0, face % 2 == 0);
            }
        }
    }

    #[test]
    fn prefilter_roughness_spans_zero_to_one() {
        assert_eq!(roughness_for_mip(0, PREFILTER_MIPS), 0.0);
        assert_eq!(roughness_for_mip(PREFILTER_MIPS - 1, PREFILTER_MIPS), 1.0);
        assert_eq!(roughness_for_mip(0, 1), 0.0);
    }

    #[test]
    fn hammersley_points_lie_in_unit_square() {
        for i in 0..64 {
            let p = hammersley(i, 64);
            assert!((0.0..1.0).contains(&p.x));
            assert!((0.0..1.0).contains(&p.y));
        }
        assert_eq!(hammersley(1, 2).y, 0.5);
    }

    #[test]
    fn params_are_32_bytes() {
        assert_eq!(std::mem::size_of::<IblParams>(), 32);
    }
}
