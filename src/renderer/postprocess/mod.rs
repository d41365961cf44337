//! Bloom (bright pass plus separable Gaussian ping-pong) and the final
//! exposure/tonemap composite into the display target.

use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::RendererError;
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::shadows::sampling::gaussian_weights;
use crate::renderer::targets::{RenderTarget, TargetDesc};
use crate::settings::BloomSettings;

const BLOOM_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const BLOOM_SIGMA: f32 = 2.0;
const BLOOM_RADIUS: usize = 4;
const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Portion of `color` above `threshold` luminance. Mirrors `bloom.wgsl`.
pub fn bright_pass(color: Vec3, threshold: f32) -> Vec3 {
    let luminance = color.dot(LUMA);
    if luminance <= threshold {
        return Vec3::ZERO;
    }
    color * ((luminance - threshold) / luminance.max(1e-4))
}

/// Exponential tonemap. Mirrors `composite.wgsl`.
pub fn tonemap(hdr: Vec3, exposure: f32) -> Vec3 {
    Vec3::ONE - (-hdr.max(Vec3::ZERO) * exposure).exp()
}

pub fn gamma_encode(linear: Vec3) -> Vec3 {
    linear.max(Vec3::ZERO).powf(1.0 / 2.2)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug)]
struct BloomParams {
    /// x = threshold.
    params: [f32; 4],
    /// xy = blur direction in texels, zw = texel size.
    direction: [f32; 4],
    /// Center tap first, then one weight per texel of offset.
    weights: [[f32; 4]; 2],
}

impl BloomParams {
    fn new(threshold: f32, direction: [f32; 2], width: u32, height: u32) -> Self {
        let taps = gaussian_weights(BLOOM_SIGMA, BLOOM_RADIUS);
        let mut weights = [[0.0; 4]; 2];
        for (i, w) in taps[BLOOM_RADIUS..].iter().enumerate() {
            weights[i / 4][i % 4] = *w;
        }
        Self {
            params: [threshold, 0.0, 0.0, 0.0],
            direction: [
                direction[0],
                direction[1],
                1.0 / width.max(1) as f32,
                1.0 / height.max(1) as f32,
            ],
            weights,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
struct CompositeParams {
    /// x = exposure, y = bloom intensity, z = 1 when bloom ran, w = 1 to
    /// apply gamma (non-sRGB output).
    params: [f32; 4],
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

struct PostBindGroups {
    bright: wgpu::BindGroup,
    horizontal: wgpu::BindGroup,
    vertical: wgpu::BindGroup,
    composite: wgpu::BindGroup,
}

pub(crate) struct PostProcess {
    bright_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    bloom_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    bright_params: wgpu::Buffer,
    horizontal_params: wgpu::Buffer,
    vertical_params: wgpu::Buffer,
    composite_params: wgpu::Buffer,
    /// Ping-pong pair at half resolution; the result always ends in `bloom_a`.
    bloom_a: RenderTarget,
    bloom_b: RenderTarget,
    bind_groups: PostBindGroups,
    settings: BloomSettings,
    exposure: f32,
    apply_gamma: bool,
}

impl PostProcess {
    pub(crate) fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        shaders: &ShaderLibrary,
        scene_color: &wgpu::TextureView,
        output_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
        settings: &BloomSettings,
        exposure: f32,
    ) -> Result<Self, RendererError> {
        let bloom_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("BloomBindLayout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("CompositeBindLayout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                sampler_entry(2),
                uniform_entry(3),
            ],
        });

        let bloom_shader = shaders.module(device, ShaderVariant::Bloom)?;
        let bloom_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("BloomPipelineLayout"),
            bind_group_layouts: &[&bloom_layout],
            push_constant_ranges: &[],
        });
        let bright_pipeline = PipelineBuilder::new(device, &bloom_pipeline_layout, &bloom_shader)
            .with_label("BloomBrightPipeline")
            .with_fragment_entry("fs_bright")
            .with_color_target(BLOOM_FORMAT, None)
            .with_no_culling()
            .build();
        let blur_pipeline = PipelineBuilder::new(device, &bloom_pipeline_layout, &bloom_shader)
            .with_label("BloomBlurPipeline")
            .with_fragment_entry("fs_blur")
            .with_color_target(BLOOM_FORMAT, None)
            .with_no_culling()
            .build();

        let composite_shader = shaders.module(device, ShaderVariant::Composite)?;
        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("CompositePipelineLayout"),
                bind_group_layouts: &[&composite_layout],
                push_constant_ranges: &[],
            });
        let composite_pipeline =
            PipelineBuilder::new(device, &composite_pipeline_layout, &composite_shader)
                .with_label("CompositePipeline")
                .with_color_target(output_format, None)
                .with_no_culling()
                .build();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("PostProcessSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let uniform = |label: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let bright_params = uniform("BloomBrightParams", mem::size_of::<BloomParams>());
        let horizontal_params = uniform("BloomHorizontalParams", mem::size_of::<BloomParams>());
        let vertical_params = uniform("BloomVerticalParams", mem::size_of::<BloomParams>());
        let composite_params = uniform("CompositeParams", mem::size_of::<CompositeParams>());

        let (bloom_a, bloom_b) = Self::create_bloom_targets(device, width, height)?;
        let bind_groups = Self::create_bind_groups(
            device,
            &bloom_layout,
            &composite_layout,
            &sampler,
            scene_color,
            &bloom_a,
            &bloom_b,
            [&bright_params, &horizontal_params, &vertical_params, &composite_params],
        );

        let post = Self {
            bright_pipeline,
            blur_pipeline,
            composite_pipeline,
            bloom_layout,
            composite_layout,
            sampler,
            bright_params,
            horizontal_params,
            vertical_params,
            composite_params,
            bloom_a,
            bloom_b,
            bind_groups,
            settings: settings.clone(),
            exposure,
            apply_gamma: !output_format.is_srgb(),
        };
        post.write_params(queue);
        Ok(post)
    }

    fn create_bloom_targets(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<(RenderTarget, RenderTarget), RendererError> {
        let (w, h) = ((width / 2).max(1), (height / 2).max(1));
        Ok((
            RenderTarget::new(device, TargetDesc::new("BloomPing", w, h).color(BLOOM_FORMAT))?,
            RenderTarget::new(device, TargetDesc::new("BloomPong", w, h).color(BLOOM_FORMAT))?,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn create_bind_groups(
        device: &wgpu::Device,
        bloom_layout: &wgpu::BindGroupLayout,
        composite_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        scene_color: &wgpu::TextureView,
        bloom_a: &RenderTarget,
        bloom_b: &RenderTarget,
        [bright, horizontal, vertical, composite]: [&wgpu::Buffer; 4],
    ) -> PostBindGroups {
        let bloom_group = |label: &str, source: &wgpu::TextureView, params: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: bloom_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                ],
            })
        };

        PostBindGroups {
            bright: bloom_group("BloomBrightBindGroup", scene_color, bright),
            horizontal: bloom_group("BloomHorizontalBindGroup", &bloom_a.color(0).view, horizontal),
            vertical: bloom_group("BloomVerticalBindGroup", &bloom_b.color(0).view, vertical),
            composite: device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("CompositeBindGroup"),
                layout: composite_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(scene_color),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&bloom_a.color(0).view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: composite.as_entire_binding(),
                    },
                ],
            }),
        }
    }

    fn write_params(&self, queue: &wgpu::Queue) {
        let (w, h) = (self.bloom_a.width(), self.bloom_a.height());
        let threshold = self.settings.threshold;
        queue.write_buffer(
            &self.bright_params,
            0,
            bytemuck::bytes_of(&BloomParams::new(threshold, [0.0, 0.0], w, h)),
        );
        queue.write_buffer(
            &self.horizontal_params,
            0,
            bytemuck::bytes_of(&BloomParams::new(threshold, [1.0, 0.0], w, h)),
        );
        queue.write_buffer(
            &self.vertical_params,
            0,
            bytemuck::bytes_of(&BloomParams::new(threshold, [0.0, 1.0], w, h)),
        );
        let composite = CompositeParams {
            params: [
                self.exposure,
                self.settings.intensity,
                if self.settings.enabled { 1.0 } else { 0.0 },
                if self.apply_gamma { 1.0 } else { 0.0 },
            ],
        };
        queue.write_buffer(&self.composite_params, 0, bytemuck::bytes_of(&composite));
    }

    pub(crate) fn set_exposure(&mut self, queue: &wgpu::Queue, exposure: f32) {
        self.exposure = exposure;
        self.write_params(queue);
    }

    pub(crate) fn set_bloom(&mut self, queue: &wgpu::Queue, settings: &BloomSettings) {
        self.settings = settings.clone();
        self.write_params(queue);
    }

    /// Recreates the bloom chain and rebinds the new scene color target.
    pub(crate) fn resize(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        scene_color: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> Result<(), RendererError> {
        let (bloom_a, bloom_b) = Self::create_bloom_targets(device, width, height)?;
        self.bloom_a = bloom_a;
        self.bloom_b = bloom_b;
        self.bind_groups = Self::create_bind_groups(
            device,
            &self.bloom_layout,
            &self.composite_layout,
            &self.sampler,
            scene_color,
            &self.bloom_a,
            &self.bloom_b,
            [
                &self.bright_params,
                &self.horizontal_params,
                &self.vertical_params,
                &self.composite_params,
            ],
        );
        self.write_params(queue);
        Ok(())
    }

    fn fullscreen(
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        target: &wgpu::TextureView,
        pipeline: &wgpu::RenderPipeline,
        group: &wgpu::BindGroup,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Bright pass followed by `iterations` horizontal/vertical blur pairs.
    /// Returns the number of blur passes recorded.
    pub(crate) fn bloom(&self, encoder: &mut wgpu::CommandEncoder) -> u32 {
        let ping = &self.bloom_a.color(0).view;
        let pong = &self.bloom_b.color(0).view;
        if !self.settings.enabled {
            return 0;
        }
        Self::fullscreen(
            encoder,
            "BloomBrightPass",
            ping,
            &self.bright_pipeline,
            &self.bind_groups.bright,
        );
        let iterations = self.settings.iterations.max(1);
        for _ in 0..iterations {
            Self::fullscreen(
                encoder,
                "BloomBlurHorizontal",
                pong,
                &self.blur_pipeline,
                &self.bind_groups.horizontal,
            );
            Self::fullscreen(
                encoder,
                "BloomBlurVertical",
                ping,
                &self.blur_pipeline,
                &self.bind_groups.vertical,
            );
        }
        iterations * 2
    }

    pub(crate) fn composite(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        Self::fullscreen(
            encoder,
            "CompositePass",
            target,
            &self.composite_pipeline,
            &self.bind_groups.composite,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bright_pass_drops_dim_pixels() {
        assert_eq!(bright_pass(Vec3::splat(0.5), 1.0), Vec3::ZERO);
        let bright = bright_pass(Vec3::splat(4.0), 1.0);
        assert!(bright.x > 0.0 && bright.x < 4.0);
    }

    #[test]
    fn tonemap_is_bounded_and_monotonic() {
        let mut previous = -1.0;
        for step in 0..100 {
            let value = tonemap(Vec3::splat(step as f32 * 0.5), 1.0).x;
            assert!((0.0..=1.0).contains(&value));
            assert!(value >= previous);
            previous = value;
        }
        // Strictly increasing until f32 saturates at 1.0.
        let mut previous = -1.0;
        for step in 0..=32 {
            let value = tonemap(Vec3::splat(step as f32 * 0.25), 1.0).x;
            assert!(value > previous, "hdr {}", step as f32 * 0.25);
            previous = value;
        }
        assert_eq!(tonemap(Vec3::ZERO, 2.0), Vec3::ZERO);
        assert_eq!(tonemap(Vec3::splat(1.0e4), 1.0), Vec3::ONE);
    }

    #[test]
    fn tonemap_clamps_negative_input() {
        assert_eq!(tonemap(Vec3::splat(-3.0), 1.0), Vec3::ZERO);
    }

    #[test]
    fn higher_exposure_brightens() {
        let dim = tonemap(Vec3::splat(0.3), 0.5);
        let bright = tonemap(Vec3::splat(0.3), 2.0);
        assert!(bright.x > dim.x);
    }

    #[test]
    fn blur_weights_fill_five_taps() {
        let params = BloomParams::new(1.0, [1.0, 0.0], 640, 360);
        let taps: Vec<f32> = params.weights.iter().flatten().copied().collect();
        assert!(taps[..5].iter().all(|w| *w > 0.0));
        assert!(taps[5..].iter().all(|w| *w == 0.0));
        assert_eq!(mem::size_of::<BloomParams>(), 64);
    }
}
