// renderer/texture.rs (with mipmaps)

use std::path::Path;

use half::f16;

use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};

struct RgbaTextureSource<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    texture_format: wgpu::TextureFormat,
    view_format: Option<wgpu::TextureFormat>,
    label: Option<&'a str>,
}

#[derive(Debug)]
pub struct Texture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub size: wgpu::Extent3d,
}

impl Texture {
    /// Calculate the number of mip levels for a given texture size
    fn calculate_mip_levels(width: u32, height: u32) -> u32 {
        let max_dimension = width.max(height).max(1);
        u32::BITS - max_dimension.leading_zeros()
    }

    /// Load texture from file path with mipmaps
    pub fn from_path(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
        is_srgb: bool,
    ) -> Result<Self, String> {
        let path = path.as_ref();
        log::info!("Loading texture: {:?}", path);

        let img =
            image::open(path).map_err(|e| format!("Failed to load image {:?}: {}", path, e))?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        let (texture_format, view_format) = Self::formats_for_color_space(is_srgb);

        let source = RgbaTextureSource {
            data: &rgba,
            width,
            height,
            texture_format,
            view_format,
            label: path.to_str(),
        };

        Ok(Self::from_rgba8(device, queue, source))
    }

    /// Load an HDR image (e.g. `.hdr`, `.exr`) as linear `Rgba16Float`
    /// without mipmaps.
    pub fn hdr_from_path(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        path: impl AsRef<Path>,
    ) -> Result<Self, String> {
        let path = path.as_ref();
        log::info!("Loading HDR image: {:?}", path);

        let img =
            image::open(path).map_err(|e| format!("Failed to load image {:?}: {}", path, e))?;
        let rgba = img.to_rgba32f();
        let (width, height) = rgba.dimensions();

        Ok(Self::from_rgba32f(
            device,
            queue,
            rgba.as_raw(),
            width,
            height,
            path.to_str(),
        ))
    }

    /// Create a sampled `Rgba16Float` texture from linear float pixels.
    pub fn from_rgba32f(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        pixels: &[f32],
        width: u32,
        height: u32,
        label: Option<&str>,
    ) -> Self {
        let halves: Vec<f16> = pixels.iter().map(|&v| f16::from_f32(v)).collect();
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba16Float,
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
            bytemuck::cast_slice(&halves),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(8 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            size,
        }
    }

    /// Create texture from rgba8 data with mipmaps
    fn from_rgba8(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: RgbaTextureSource<'_>,
    ) -> Self {
        let mip_level_count = Self::calculate_mip_levels(source.width, source.height);

        let size = wgpu::Extent3d {
            width: source.width,
            height: source.height,
            depth_or_array_layers: 1,
        };

        let mut view_formats = Vec::new();
        if let Some(format) = source.view_format {
            view_formats.push(format);
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: source.label,
            size,
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: source.texture_format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &view_formats,
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            source.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * source.width),
                rows_per_image: Some(source.height),
            },
            size,
        );

        Self::generate_mipmaps(
            device,
            queue,
            &texture,
            mip_level_count,
            source.texture_format,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            format: source.view_format.or(Some(source.texture_format)),
            ..Default::default()
        });

        Self {
            texture,
            view,
            size,
        }
    }

    /// Downsample each mip from the previous one with a fullscreen blit.
    fn generate_mipmaps(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
        mip_level_count: u32,
        format: wgpu::TextureFormat,
    ) {
        if mip_level_count <= 1 {
            return;
        }

        let shader = match ShaderLibrary::new().module(device, ShaderVariant::Mipmap) {
            Ok(shader) => shader,
            Err(err) => {
                log::error!("Skipping mipmap generation: {err}");
                return;
            }
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blit Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Blit Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = crate::renderer::PipelineBuilder::new(device, &pipeline_layout, &shader)
            .with_label("Blit Pipeline")
            .with_color_target(format, None)
            .with_no_culling()
            .build();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Mip Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Mipmap Generator"),
        });

        for target_mip in 1..mip_level_count {
            let mip_view = |mip: u32, usage: wgpu::TextureUsages| {
                texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Mip View"),
                    format: Some(format),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect: wgpu::TextureAspect::All,
                    base_mip_level: mip,
                    mip_level_count: Some(1),
                    base_array_layer: 0,
                    array_layer_count: Some(1),
                    usage: Some(usage),
                })
            };
            let src_view = mip_view(target_mip - 1, wgpu::TextureUsages::TEXTURE_BINDING);
            let dst_view = mip_view(target_mip, wgpu::TextureUsages::RENDER_ATTACHMENT);

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mip Bind Group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            });

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Mipmap Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &dst_view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            rpass.set_pipeline(&pipeline);
            rpass.set_bind_group(0, &bind_group, &[]);
            rpass.draw(0..3, 0..1);
        }

        queue.submit(Some(encoder.finish()));
    }

    /// Create a solid color 1x1 texture (no mipmaps needed)
    pub fn from_color(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color: [u8; 4],
        label: Option<&str>,
    ) -> Self {
        let source = RgbaTextureSource {
            data: &color,
            width: 1,
            height: 1,
            texture_format: wgpu::TextureFormat::Rgba8Unorm,
            view_format: Some(wgpu::TextureFormat::Rgba8UnormSrgb),
            label,
        };

        Self::from_rgba8(device, queue, source)
    }

    /// Create a solid-color texture stored in a linear color space (1x1)
    pub fn from_color_linear(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        color: [u8; 4],
        label: Option<&str>,
    ) -> Self {
        let source = RgbaTextureSource {
            data: &color,
            width: 1,
            height: 1,
            texture_format: wgpu::TextureFormat::Rgba8Unorm,
            view_format: None,
            label,
        };

        Self::from_rgba8(device, queue, source)
    }

    /// Create a procedural checkerboard texture
    pub fn checkerboard(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        size: u32,
        checker_size: u32,
        color1: [u8; 4],
        color2: [u8; 4],
        label: Option<&str>,
    ) -> Self {
        let pixels = checkerboard_pixels(size, checker_size, color1, color2);
        let source = RgbaTextureSource {
            data: &pixels,
            width: size,
            height: size,
            texture_format: wgpu::TextureFormat::Rgba8Unorm,
            view_format: Some(wgpu::TextureFormat::Rgba8UnormSrgb),
            label,
        };

        Self::from_rgba8(device, queue, source)
    }

    /// Loud magenta/black checker used in place of textures that failed to
    /// load.
    pub fn missing(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::checkerboard(
            device,
            queue,
            16,
            4,
            [255, 0, 255, 255],
            [0, 0, 0, 255],
            Some("MissingTexture"),
        )
    }

    /// Create default white texture (1x1)
    pub fn white(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        Self::from_color(device, queue, [255, 255, 255, 255], Some("White"))
    }

    /// Create default normal map (1x1, pointing up)
    pub fn default_normal(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        // Normal pointing straight up: (0, 0, 1) -> (128, 128, 255) in texture space
        Self::from_color_linear(device, queue, [128, 128, 255, 255], Some("DefaultNormal"))
    }

    /// Determine the texture and view formats used for a colour texture.
    fn formats_for_color_space(
        is_srgb: bool,
    ) -> (wgpu::TextureFormat, Option<wgpu::TextureFormat>) {
        if is_srgb {
            (
                wgpu::TextureFormat::Rgba8Unorm,
                Some(wgpu::TextureFormat::Rgba8UnormSrgb),
            )
        } else {
            (wgpu::TextureFormat::Rgba8Unorm, None)
        }
    }
}

fn checkerboard_pixels(size: u32, checker_size: u32, color1: [u8; 4], color2: [u8; 4]) -> Vec<u8> {
    let checker_size = checker_size.max(1);
    let mut pixels = vec![0u8; (size * size * 4) as usize];

    for y in 0..size {
        for x in 0..size {
            let checker_x = (x / checker_size) % 2;
            let checker_y = (y / checker_size) % 2;
            let color = if (checker_x + checker_y) % 2 == 0 {
                color1
            } else {
                color2
            };
            let idx = ((y * size + x) * 4) as usize;
            pixels[idx..idx + 4].copy_from_slice(&color);
        }
    }

    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_level_calculation() {
        assert_eq!(Texture::calculate_mip_levels(1, 1), 1);
        assert_eq!(Texture::calculate_mip_levels(2, 2), 2);
        assert_eq!(Texture::calculate_mip_levels(4, 4), 3);
        assert_eq!(Texture::calculate_mip_levels(256, 256), 9);
    }

    #[test]
    fn test_mip_levels_non_power_of_two() {
        // 300x200 -> 300, 150, 75, 37, 18, 9, 4, 2, 1
        assert_eq!(Texture::calculate_mip_levels(300, 200), 9);
        assert_eq!(Texture::calculate_mip_levels(0, 0), 1);
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let a = [255, 0, 255, 255];
        let b = [0, 0, 0, 255];
        let pixels = checkerboard_pixels(8, 4, a, b);
        assert_eq!(&pixels[0..4], &a);
        // Pixel (4, 0) sits in the next cell.
        assert_eq!(&pixels[16..20], &b);
        // Pixel (4, 4) is back to the first colour.
        let idx = ((4 * 8 + 4) * 4) as usize;
        assert_eq!(&pixels[idx..idx + 4], &a);
    }

    #[test]
    fn srgb_textures_use_linear_storage_with_srgb_view() {
        let (storage, view) = Texture::formats_for_color_space(true);
        assert_eq!(storage, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(view, Some(wgpu::TextureFormat::Rgba8UnormSrgb));
        assert_eq!(Texture::formats_for_color_space(false).1, None);
    }
}
