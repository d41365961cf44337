use std::sync::Arc;

use winit::window::Window;

use crate::error::RendererError;
use crate::settings::RenderSettings;

/// Format of the offscreen target used when there is no window.
pub(crate) const HEADLESS_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Downlevel features every frame stage relies on: compute for tile culling,
/// particles and IBL, view formats for the cube and layer views, depth
/// copies for cascade readback.
const REQUIRED_DOWNLEVEL: wgpu::DownlevelFlags = wgpu::DownlevelFlags::COMPUTE_SHADERS
    .union(wgpu::DownlevelFlags::VIEW_FORMATS)
    .union(wgpu::DownlevelFlags::DEPTH_TEXTURE_AND_BUFFER_COPIES)
    .union(wgpu::DownlevelFlags::FULL_DRAW_INDEX_UINT32);

/// Formats the renderer draws into: HDR scene color, prepass targets and
/// point-shadow moments.
const ATTACHMENT_FORMATS: [wgpu::TextureFormat; 2] = [
    wgpu::TextureFormat::Rgba16Float,
    wgpu::TextureFormat::Rg32Float,
];

/// Describes what the adapter lacks, or `None` when it can run every stage.
pub(crate) fn missing_capabilities(
    downlevel: wgpu::DownlevelFlags,
    can_render_to: impl Fn(wgpu::TextureFormat) -> bool,
) -> Option<String> {
    let mut missing = Vec::new();
    let flags = REQUIRED_DOWNLEVEL.difference(downlevel);
    if !flags.is_empty() {
        missing.push(format!("downlevel flags {flags:?}"));
    }
    missing.extend(
        ATTACHMENT_FORMATS
            .iter()
            .filter(|&&format| !can_render_to(format))
            .map(|format| format!("{format:?} render attachments")),
    );
    (!missing.is_empty()).then(|| missing.join(", "))
}

/// Device, queue and (when windowed) the configured surface.
pub(crate) struct RenderContext {
    pub(crate) surface: Option<wgpu::Surface<'static>>,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) config: wgpu::SurfaceConfiguration,
    pub(crate) adapter_info: wgpu::AdapterInfo,
}

impl RenderContext {
    pub(crate) async fn new_windowed(
        window: Arc<Window>,
        settings: &RenderSettings,
    ) -> Result<Self, RendererError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window)?;
        log::info!("Surface created successfully!");

        let (adapter, device, queue) = Self::request_device(&instance, Some(&surface)).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // Gamma is applied by the composite shader, so prefer a linear format.
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                RendererError::AdapterUnavailable("surface reports no formats".into())
            })?;

        let present_mode = settings.present_mode(&surface_caps.present_modes);
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        Ok(Self {
            surface: Some(surface),
            device,
            queue,
            config,
            adapter_info: adapter.get_info(),
        })
    }

    /// Context without a surface; frames end in an offscreen
    /// [`HEADLESS_FORMAT`] texture.
    pub(crate) async fn new_headless(
        width: u32,
        height: u32,
        settings: &RenderSettings,
    ) -> Result<Self, RendererError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let (adapter, device, queue) = Self::request_device(&instance, None).await?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: HEADLESS_FORMAT,
            width: width.max(1),
            height: height.max(1),
            present_mode: settings.present_mode(&[wgpu::PresentMode::Fifo]),
            alpha_mode: wgpu::CompositeAlphaMode::Opaque,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        Ok(Self {
            surface: None,
            device,
            queue,
            config,
            adapter_info: adapter.get_info(),
        })
    }

    async fn request_device(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
    ) -> Result<(wgpu::Adapter, wgpu::Device, wgpu::Queue), RendererError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RendererError::AdapterUnavailable(err.to_string()))?;

        let info = adapter.get_info();
        log::info!("Using adapter: {} ({:?})", info.name, info.device_type);
        log::info!("Using backend: {:?}", info.backend);

        let downlevel = adapter.get_downlevel_capabilities();
        if let Some(missing) = missing_capabilities(downlevel.flags, |format| {
            adapter
                .get_texture_format_features(format)
                .allowed_usages
                .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
        }) {
            return Err(RendererError::Unsupported(format!(
                "{} ({:?}) lacks {missing}",
                info.name, info.backend
            )));
        }

        let mut limits = wgpu::Limits::default();
        limits.max_bind_groups = limits.max_bind_groups.max(4);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok((adapter, device, queue))
    }

    pub(crate) fn width(&self) -> u32 {
        self.config.width
    }

    pub(crate) fn height(&self) -> u32 {
        self.config.height
    }

    pub(crate) fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Returns false (and changes nothing) for a zero-sized request.
    pub(crate) fn resize(&mut self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        self.config.width = width;
        self.config.height = height;
        if let Some(surface) = &self.surface {
            surface.configure(&self.device, &self.config);
        }
        true
    }

    /// Next swapchain image, reconfiguring once on `Lost`/`Outdated`.
    pub(crate) fn acquire(&self) -> Result<Option<wgpu::SurfaceTexture>, RendererError> {
        let Some(surface) = &self.surface else {
            return Ok(None);
        };
        match surface.get_current_texture() {
            Ok(frame) => Ok(Some(frame)),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::warn!("Surface lost or outdated; reconfiguring");
                surface.configure(&self.device, &self.config);
                Ok(Some(surface.get_current_texture()?))
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timed out acquiring the next surface texture; skipping frame");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_adapter_has_nothing_missing() {
        assert_eq!(missing_capabilities(wgpu::DownlevelFlags::all(), |_| true), None);
    }

    #[test]
    fn downlevel_adapter_is_rejected_with_a_reason() {
        let flags = wgpu::DownlevelFlags::all() - wgpu::DownlevelFlags::VIEW_FORMATS;
        let reason = missing_capabilities(flags, |format| format != wgpu::TextureFormat::Rg32Float)
            .expect("adapter should be rejected");
        assert!(reason.contains("VIEW_FORMATS"), "{reason}");
        assert!(reason.contains("Rg32Float"), "{reason}");
        assert!(!reason.contains("Rgba16Float"), "{reason}");
    }

    #[test]
    fn compute_is_required() {
        let flags = wgpu::DownlevelFlags::all() - wgpu::DownlevelFlags::COMPUTE_SHADERS;
        assert!(missing_capabilities(flags, |_| true).is_some());
    }
}
