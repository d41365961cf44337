//! Geometry prepass targets and screen-space ambient occlusion.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::RendererError;
use crate::renderer::binding::{BoundPass, FrameResource, PassBindings, ResourceRegistry};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::targets::{RenderTarget, TargetDesc};
use crate::settings::SsaoSettings;

pub const NOISE_TEXTURE_SIZE: u32 = 4;
pub const MAX_KERNEL_SIZE: usize = SsaoSettings::MAX_KERNEL_SIZE as usize;
pub const GEOMETRY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const GEOMETRY_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const OCCLUSION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R8Unorm;
const KERNEL_SEED: u64 = 0x55a0_2024;
const NOISE_SEED: u64 = 0x4e01_5e00;

/// Hemisphere kernel in tangent space (+Z is the surface normal). Samples
/// cluster towards the origin: sample `i` is scaled by
/// `lerp(0.1, 1.0, (i / count)²)`.
pub fn generate_kernel(count: usize, rng: &mut impl Rng) -> Vec<Vec4> {
    (0..count)
        .map(|i| {
            let direction = Vec3::new(
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>(),
            )
            .normalize_or(Vec3::Z);
            let t = i as f32 / count as f32;
            let scale = 0.1 + (1.0 - 0.1) * t * t;
            (direction * rng.gen::<f32>() * scale).extend(0.0)
        })
        .collect()
}

/// Random rotation vectors around the normal, tiled over the screen.
pub fn generate_noise(rng: &mut impl Rng) -> Vec<[f32; 4]> {
    (0..NOISE_TEXTURE_SIZE * NOISE_TEXTURE_SIZE)
        .map(|_| {
            [
                rng.gen::<f32>() * 2.0 - 1.0,
                rng.gen::<f32>() * 2.0 - 1.0,
                0.0,
                0.0,
            ]
        })
        .collect()
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
pub struct SsaoKernelUniform {
    pub samples: [[f32; 4]; MAX_KERNEL_SIZE],
    /// x = sample count, y = radius, z = bias, w = power.
    pub params: [f32; 4],
    /// xy = screen size / noise size.
    pub noise_scale: [f32; 4],
}

impl SsaoKernelUniform {
    pub fn new(kernel: &[Vec4], settings: &SsaoSettings, width: u32, height: u32) -> Self {
        let mut samples = [[0.0; 4]; MAX_KERNEL_SIZE];
        let count = kernel.len().min(MAX_KERNEL_SIZE);
        for (slot, sample) in samples.iter_mut().zip(&kernel[..count]) {
            *slot = sample.to_array();
        }
        Self {
            samples,
            params: [count as f32, settings.radius, settings.bias, settings.power],
            noise_scale: [
                width as f32 / NOISE_TEXTURE_SIZE as f32,
                height as f32 / NOISE_TEXTURE_SIZE as f32,
                0.0,
                0.0,
            ],
        }
    }
}

fn ssao_bindings() -> PassBindings {
    PassBindings::new("SsaoBindings", wgpu::ShaderStages::FRAGMENT)
        .read(FrameResource::ViewNormals)
        .read(FrameResource::ViewPositions)
        .read(FrameResource::SsaoNoise)
        .read(FrameResource::SsaoKernel)
        .read(FrameResource::LinearClampSampler)
}

fn blur_bindings() -> PassBindings {
    PassBindings::new("SsaoBlurBindings", wgpu::ShaderStages::FRAGMENT)
        .read(FrameResource::SsaoRaw)
        .read(FrameResource::LinearClampSampler)
}

pub(crate) struct SsaoStage {
    geometry: RenderTarget,
    raw: RenderTarget,
    occlusion: RenderTarget,
    kernel: Vec<Vec4>,
    kernel_buffer: wgpu::Buffer,
    _noise_texture: wgpu::Texture,
    noise_view: wgpu::TextureView,
    ssao_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    ssao_pass: BoundPass,
    blur_pass: BoundPass,
    settings: SsaoSettings,
}

impl SsaoStage {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        shaders: &ShaderLibrary,
        frame_layout: &wgpu::BindGroupLayout,
        settings: &SsaoSettings,
        width: u32,
        height: u32,
    ) -> Result<Self, RendererError> {
        let (geometry, raw, occlusion) = Self::create_targets(device, width, height)?;

        let kernel = generate_kernel(
            settings.kernel_size as usize,
            &mut SmallRng::seed_from_u64(KERNEL_SEED),
        );
        let kernel_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SsaoKernelBuffer"),
            size: mem::size_of::<SsaoKernelUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_buffer(
            &kernel_buffer,
            0,
            bytemuck::bytes_of(&SsaoKernelUniform::new(&kernel, settings, width, height)),
        );

        let noise_texture = Self::create_noise_texture(device, queue);
        let noise_view = noise_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let ssao_pass = BoundPass::new(device, ssao_bindings());
        let blur_pass = BoundPass::new(device, blur_bindings());

        let ssao_shader = shaders.module(device, ShaderVariant::Ssao)?;
        let ssao_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SsaoPipelineLayout"),
            bind_group_layouts: &[frame_layout, ssao_pass.layout()],
            push_constant_ranges: &[],
        });
        let ssao_pipeline = PipelineBuilder::new(device, &ssao_layout, &ssao_shader)
            .with_label("SsaoPipeline")
            .with_color_target(OCCLUSION_FORMAT, None)
            .with_no_culling()
            .build();

        let blur_shader = shaders.module(device, ShaderVariant::SsaoBlur)?;
        let blur_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SsaoBlurPipelineLayout"),
            bind_group_layouts: &[blur_pass.layout()],
            push_constant_ranges: &[],
        });
        let blur_pipeline = PipelineBuilder::new(device, &blur_layout, &blur_shader)
            .with_label("SsaoBlurPipeline")
            .with_color_target(OCCLUSION_FORMAT, None)
            .with_no_culling()
            .build();

        Ok(Self {
            geometry,
            raw,
            occlusion,
            kernel,
            kernel_buffer,
            _noise_texture: noise_texture,
            noise_view,
            ssao_pipeline,
            blur_pipeline,
            ssao_pass,
            blur_pass,
            settings: settings.clone(),
        })
    }

    fn create_targets(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<(RenderTarget, RenderTarget, RenderTarget), RendererError> {
        let geometry = RenderTarget::new(
            device,
            TargetDesc::new("GeometryPrepass", width, height)
                .color(GEOMETRY_FORMAT)
                .color(GEOMETRY_FORMAT)
                .depth(GEOMETRY_DEPTH_FORMAT),
        )?;
        let raw = RenderTarget::new(
            device,
            TargetDesc::new("SsaoRaw", width, height).color(OCCLUSION_FORMAT),
        )?;
        let occlusion = RenderTarget::new(
            device,
            TargetDesc::new("SsaoOcclusion", width, height).color(OCCLUSION_FORMAT),
        )?;
        Ok((geometry, raw, occlusion))
    }

    fn create_noise_texture(device: &wgpu::Device, queue: &wgpu::Queue) -> wgpu::Texture {
        let noise = generate_noise(&mut SmallRng::seed_from_u64(NOISE_SEED));
        let size = wgpu::Extent3d {
            width: NOISE_TEXTURE_SIZE,
            height: NOISE_TEXTURE_SIZE,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("SsaoNoiseTexture"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&noise),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(mem::size_of::<[f32; 4]>() as u32 * NOISE_TEXTURE_SIZE),
                rows_per_image: Some(NOISE_TEXTURE_SIZE),
            },
            size,
        );
        texture
    }

    pub(crate) fn geometry(&self) -> &RenderTarget {
        &self.geometry
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_view(FrameResource::ViewNormals, &self.geometry.color(0).view);
        registry.insert_view(FrameResource::ViewPositions, &self.geometry.color(1).view);
        registry.insert_view(FrameResource::SsaoNoise, &self.noise_view);
        registry.insert_buffer(FrameResource::SsaoKernel, &self.kernel_buffer);
        registry.insert_view(FrameResource::SsaoRaw, &self.raw.color(0).view);
        registry.insert_view(FrameResource::SsaoOcclusion, &self.occlusion.color(0).view);
    }

    pub(crate) fn resize(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
    ) -> Result<(), RendererError> {
        let (geometry, raw, occlusion) = Self::create_targets(device, width, height)?;
        self.geometry = geometry;
        self.raw = raw;
        self.occlusion = occlusion;
        self.write_kernel(queue);
        Ok(())
    }

    pub(crate) fn set_settings(&mut self, queue: &wgpu::Queue, settings: &SsaoSettings) {
        if settings.kernel_size as usize != self.kernel.len() {
            self.kernel = generate_kernel(
                settings.kernel_size as usize,
                &mut SmallRng::seed_from_u64(KERNEL_SEED),
            );
        }
        self.settings = settings.clone();
        self.write_kernel(queue);
    }

    fn write_kernel(&self, queue: &wgpu::Queue) {
        let uniform = SsaoKernelUniform::new(
            &self.kernel,
            &self.settings,
            self.geometry.width(),
            self.geometry.height(),
        );
        queue.write_buffer(&self.kernel_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    pub(crate) fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Occlusion estimate plus blur. When disabled the occlusion target is
    /// cleared to fully unoccluded instead.
    pub(crate) fn render(
        &mut self,
        device: &wgpu::Device,
        registry: &ResourceRegistry,
        encoder: &mut wgpu::CommandEncoder,
        frame: &wgpu::BindGroup,
    ) -> Result<(), RendererError> {
        if !self.settings.enabled {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("SsaoDisabledClear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.occlusion.color(0).view,
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
            return Ok(());
        }

        self.ssao_pass.refresh(device, registry)?;
        self.blur_pass.refresh(device, registry)?;
        let (Some(ssao_group), Some(blur_group)) =
            (self.ssao_pass.bind_group(), self.blur_pass.bind_group())
        else {
            return Ok(());
        };

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("SsaoPass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.raw.color(0).view,
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
            pass.set_pipeline(&self.ssao_pipeline);
            pass.set_bind_group(0, frame, &[]);
            pass.set_bind_group(1, ssao_group, &[]);
            pass.draw(0..3, 0..1);
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("SsaoBlurPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.occlusion.color(0).view,
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
        pass.set_bind_group(0, blur_group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_stays_in_unit_hemisphere() {
        let kernel = generate_kernel(32, &mut SmallRng::seed_from_u64(7));
        assert_eq!(kernel.len(), 32);
        for sample in &kernel {
            assert!(sample.z >= 0.0);
            assert!(sample.truncate().length() <= 1.0 + 1e-5);
            assert_eq!(sample.w, 0.0);
        }
    }

    #[test]
    fn early_samples_hug_the_origin() {
        let kernel = generate_kernel(32, &mut SmallRng::seed_from_u64(7));
        // Sample 0 is scaled by 0.1, sample 8 by at most lerp(0.1, 1, 1/16).
        assert!(kernel[0].truncate().length() <= 0.1 + 1e-6);
        assert!(kernel[8].truncate().length() <= 0.1 + 0.9 / 16.0 + 1e-6);
    }

    #[test]
    fn kernel_is_deterministic_per_seed() {
        let a = generate_kernel(16, &mut SmallRng::seed_from_u64(KERNEL_SEED));
        let b = generate_kernel(16, &mut SmallRng::seed_from_u64(KERNEL_SEED));
        assert_eq!(a, b);
    }

    #[test]
    fn noise_rotates_around_z_only() {
        let noise = generate_noise(&mut SmallRng::seed_from_u64(1));
        assert_eq!(noise.len(), 16);
        assert!(noise.iter().all(|n| n[2] == 0.0 && n[0].abs() <= 1.0 && n[1].abs() <= 1.0));
    }

    #[test]
    fn uniform_carries_settings_and_noise_scale() {
        let kernel = generate_kernel(8, &mut SmallRng::seed_from_u64(3));
        let settings = SsaoSettings::default();
        let uniform = SsaoKernelUniform::new(&kernel, &settings, 1280, 720);
        assert_eq!(uniform.params[0], 8.0);
        assert_eq!(uniform.params[1], settings.radius);
        assert_eq!(uniform.noise_scale[0], 320.0);
        assert_eq!(uniform.noise_scale[1], 180.0);
        assert_eq!(uniform.samples[8], [0.0; 4]);
    }
}
