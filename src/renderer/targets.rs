//! Screen-sized render targets, validated when they are created.
//!
//! An attachment set that cannot be rendered to (wrong aspect, unsupported
//! format, mismatched sizes) is reported as
//! [`RendererError::IncompleteTarget`] at setup instead of failing inside a
//! frame.

use crate::error::RendererError;

/// Attachments of one render target.
#[derive(Debug, Clone)]
pub struct TargetDesc {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub colors: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
}

impl TargetDesc {
    pub fn new(name: &'static str, width: u32, height: u32) -> Self {
        Self {
            name,
            width,
            height,
            colors: Vec::new(),
            depth: None,
        }
    }

    pub fn color(mut self, format: wgpu::TextureFormat) -> Self {
        self.colors.push(format);
        self
    }

    pub fn depth(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth = Some(format);
        self
    }

    /// Checks the attachment set against `limits` and the formats' guaranteed
    /// capabilities.
    pub fn validate(&self, limits: &wgpu::Limits) -> Result<(), RendererError> {
        let incomplete = |reason: String| RendererError::IncompleteTarget {
            target: self.name.to_string(),
            reason,
        };

        if self.colors.is_empty() && self.depth.is_none() {
            return Err(incomplete("no attachments".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(incomplete(format!(
                "zero-sized attachments ({}x{})",
                self.width, self.height
            )));
        }
        let max = limits.max_texture_dimension_2d;
        if self.width > max || self.height > max {
            return Err(incomplete(format!(
                "{}x{} exceeds the device limit of {}",
                self.width, self.height, max
            )));
        }
        if self.colors.len() as u32 > limits.max_color_attachments {
            return Err(incomplete(format!(
                "{} color attachments exceed the device limit of {}",
                self.colors.len(),
                limits.max_color_attachments
            )));
        }

        for (index, format) in self.colors.iter().enumerate() {
            if !format.has_color_aspect() || format.is_depth_stencil_format() {
                return Err(incomplete(format!(
                    "color attachment {index} has non-color format {format:?}"
                )));
            }
            if !is_renderable(*format) {
                return Err(incomplete(format!(
                    "color attachment {index} format {format:?} is not renderable"
                )));
            }
        }
        if let Some(format) = self.depth {
            if !format.has_depth_aspect() {
                return Err(incomplete(format!(
                    "depth attachment has non-depth format {format:?}"
                )));
            }
        }
        Ok(())
    }
}

fn is_renderable(format: wgpu::TextureFormat) -> bool {
    format
        .guaranteed_format_features(wgpu::Features::empty())
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
}

pub struct Attachment {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl Attachment {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
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
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }
}

pub struct RenderTarget {
    desc: TargetDesc,
    colors: Vec<Attachment>,
    depth: Option<Attachment>,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, desc: TargetDesc) -> Result<Self, RendererError> {
        desc.validate(&device.limits())?;

        let colors = desc
            .colors
            .iter()
            .enumerate()
            .map(|(index, format)| {
                Attachment::new(
                    device,
                    &format!("{}Color{}", desc.name, index),
                    desc.width,
                    desc.height,
                    *format,
                )
            })
            .collect();
        let depth = desc.depth.map(|format| {
            Attachment::new(
                device,
                &format!("{}Depth", desc.name),
                desc.width,
                desc.height,
                format,
            )
        });

        log::debug!(
            "Created render target {} ({}x{})",
            desc.name,
            desc.width,
            desc.height
        );
        Ok(Self {
            desc,
            colors,
            depth,
        })
    }

    /// Same attachments at a new size.
    pub fn resized(&self, device: &wgpu::Device, width: u32, height: u32) -> Result<Self, RendererError> {
        Self::new(
            device,
            TargetDesc {
                width,
                height,
                ..self.desc.clone()
            },
        )
    }

    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// Panics on an out-of-range index; indices are fixed per target.
    pub fn color(&self, index: usize) -> &Attachment {
        &self.colors[index]
    }

    pub fn depth(&self) -> Option<&Attachment> {
        self.depth.as_ref()
    }

    pub fn color_formats(&self) -> &[wgpu::TextureFormat] {
        &self.desc.colors
    }

    pub fn depth_format(&self) -> Option<wgpu::TextureFormat> {
        self.desc.depth
    }
}
