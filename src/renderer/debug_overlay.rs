//! Tile light-count heatmap blended over the lit scene.

use crate::error::RendererError;
use crate::renderer::binding::{BoundPass, FrameResource, PassBindings, ResourceRegistry};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};

fn overlay_bindings() -> PassBindings {
    PassBindings::new("DebugOverlayBindings", wgpu::ShaderStages::FRAGMENT)
        .read(FrameResource::TileLightCounts)
}

/// Heat color for a tile holding `count` of `capacity` lights. Mirrors
/// `debug_overlay.wgsl`: blue when empty through green to red when full.
pub fn heat_color(count: u32, capacity: u32) -> [f32; 4] {
    if count == 0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    let t = (count as f32 / capacity.max(1) as f32).clamp(0.0, 1.0);
    let r = (t * 2.0 - 1.0).clamp(0.0, 1.0);
    let g = 1.0 - (t * 2.0 - 1.0).abs();
    let b = (1.0 - t * 2.0).clamp(0.0, 1.0);
    [r, g, b, 0.35]
}

pub(crate) struct DebugOverlay {
    pipeline: wgpu::RenderPipeline,
    bindings: BoundPass,
}

impl DebugOverlay {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        frame_layout: &wgpu::BindGroupLayout,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self, RendererError> {
        let bindings = BoundPass::new(device, overlay_bindings());
        let shader = shaders.module(device, ShaderVariant::DebugOverlay)?;
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("DebugOverlayPipelineLayout"),
            bind_group_layouts: &[frame_layout, bindings.layout()],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &layout, &shader)
            .with_label("DebugOverlayPipeline")
            .with_color_target(color_format, Some(wgpu::BlendState::ALPHA_BLENDING))
            .with_no_culling()
            .build();
        Ok(Self { pipeline, bindings })
    }

    pub(crate) fn draw(
        &mut self,
        device: &wgpu::Device,
        registry: &ResourceRegistry,
        encoder: &mut wgpu::CommandEncoder,
        frame: &wgpu::BindGroup,
        color: &wgpu::TextureView,
    ) -> Result<(), RendererError> {
        self.bindings.refresh(device, registry)?;
        let Some(group) = self.bindings.bind_group() else {
            return Ok(());
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("DebugOverlayPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, frame, &[]);
        pass.set_bind_group(1, group, &[]);
        pass.draw(0..3, 0..1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tiles_are_transparent() {
        assert_eq!(heat_color(0, 256)[3], 0.0);
    }

    #[test]
    fn heat_runs_from_blue_to_red() {
        let low = heat_color(1, 256);
        let full = heat_color(256, 256);
        assert!(low[2] > low[0]);
        assert_eq!(full, [1.0, 0.0, 0.0, 0.35]);
        assert_eq!(heat_color(1000, 256), full);
    }
}
