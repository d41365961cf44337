use crate::error::RendererError;
use crate::renderer::binding::{BoundPass, FrameResource, PassBindings, ResourceRegistry};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};

fn skybox_bindings() -> PassBindings {
    PassBindings::new("SkyboxBindings", wgpu::ShaderStages::FRAGMENT)
        .read(FrameResource::EnvironmentCube)
        .read(FrameResource::LinearClampSampler)
}

/// Fills the background (depth still at the clear value) with the
/// environment cube. Runs after the main pass inside the scene target.
pub(crate) struct SkyboxPass {
    pipeline: wgpu::RenderPipeline,
    bindings: BoundPass,
}

impl SkyboxPass {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        frame_layout: &wgpu::BindGroupLayout,
        color_format: wgpu::TextureFormat,
        depth_format: wgpu::TextureFormat,
    ) -> Result<Self, RendererError> {
        let bindings = BoundPass::new(device, skybox_bindings());
        let shader = shaders.module(device, ShaderVariant::Skybox)?;
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SkyboxPipelineLayout"),
            bind_group_layouts: &[frame_layout, bindings.layout()],
            push_constant_ranges: &[],
        });
        let pipeline = PipelineBuilder::new(device, &layout, &shader)
            .with_label("SkyboxPipeline")
            .with_color_target(color_format, None)
            .with_depth_stencil(depth_format, false, wgpu::CompareFunction::LessEqual)
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
        depth: &wgpu::TextureView,
    ) -> Result<(), RendererError> {
        self.bindings.refresh(device, registry)?;
        let Some(group) = self.bindings.bind_group() else {
            return Ok(());
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("SkyboxPass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
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
