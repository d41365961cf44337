// renderer/renderer.rs
use std::path::Path;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use winit::window::Window;

use crate::asset::{Assets, MeshHandle, TextureHandle};
use crate::error::RendererError;
use crate::renderer::binding::{FrameResource, ResourceRegistry};
use crate::renderer::camera::FrameCamera;
use crate::renderer::debug_overlay::DebugOverlay;
use crate::renderer::draw::{terrain_local_aabb, DrawCommand, MeshDrawOptions};
use crate::renderer::frame::{FrameContext, FrameGraph, FrameStage, PassNode};
use crate::renderer::ibl::IblMaps;
use crate::renderer::internal::buffers::{FrameBuffer, LightBuffers, MaterialBindings, ObjectsBuffer};
use crate::renderer::internal::context::RenderContext;
use crate::renderer::internal::readback;
use crate::renderer::light_culling::{LightCullingStage, TileGrid, TileLightGrid};
use crate::renderer::lights::{PointLight, PointLightDesc};
use crate::renderer::particles::{EmitterDesc, EmitterId, ParticleSystem};
use crate::renderer::postprocess::PostProcess;
use crate::renderer::scene_pass::{
    lighting_bindings, prepare_scene, SceneGroups, ScenePass, HDR_FORMAT, SCENE_DEPTH_FORMAT,
};
use crate::renderer::shaders::ShaderLibrary;
use crate::renderer::shadows::{CascadePlan, CascadeShadowPass, DirectionalLightUniform, PointShadowPass};
use crate::renderer::skybox::SkyboxPass;
use crate::renderer::ssao::SsaoStage;
use crate::renderer::targets::{RenderTarget, TargetDesc};
use crate::renderer::texture::Texture;
use crate::renderer::uniforms::{CameraUniform, ShadingUniform};
use crate::renderer::vertex::Vertex;
use crate::settings::{BloomSettings, FogSettings, RenderSettings, SsaoSettings};

const INITIAL_OBJECTS_CAPACITY: u32 = 1024;

/// Counters for the last completed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub visible_draws: u32,
    pub culled_draws: u32,
    pub skipped_draws: u32,
    pub main_draw_calls: u32,
    pub cascade_draw_calls: u32,
    pub point_shadow_draw_calls: u32,
    pub terrain_patches: u32,
    pub active_point_lights: u32,
    pub point_shadow_casters: u32,
    pub rejected_point_lights: u32,
    pub rejected_shadow_casters: u32,
    pub bloom_passes: u32,
    pub live_emitters: u32,
    pub pruned_emitters: u32,
}

impl RendererStats {
    pub fn total_draw_calls(&self) -> u32 {
        self.main_draw_calls + self.cascade_draw_calls + self.point_shadow_draw_calls
    }
}

/// The passes of one frame and the resources they exchange, in execution
/// order.
pub fn standard_frame_graph() -> FrameGraph {
    use FrameResource::*;

    let lighting: Vec<FrameResource> = lighting_bindings().resources().collect();
    let mut graph = FrameGraph::new();
    graph
        .add(
            PassNode::new("CascadeShadows", FrameStage::ShadowPasses)
                .reads(&[DirectionalLight])
                .writes(&[CascadeShadowMap]),
        )
        .add(
            PassNode::new("PointShadows", FrameStage::ShadowPasses)
                .reads(&[PointLights])
                .writes(&[PointShadowMoments]),
        )
        .add(
            PassNode::new("TileCulling", FrameStage::LightCulling)
                .reads(&[PointLights, CullingParams])
                .writes(&[TileLightCounts, TileLightIndices, TileOverflow]),
        )
        .add(
            PassNode::new("GeometryPrepass", FrameStage::GeometryPrepass)
                .writes(&[ViewNormals, ViewPositions]),
        )
        .add(
            PassNode::new("Ssao", FrameStage::GeometryPrepass)
                .reads(&[ViewNormals, ViewPositions, SsaoNoise, SsaoKernel, LinearClampSampler])
                .writes(&[SsaoRaw]),
        )
        .add(
            PassNode::new("SsaoBlur", FrameStage::GeometryPrepass)
                .reads(&[SsaoRaw, LinearClampSampler])
                .writes(&[SsaoOcclusion]),
        )
        .add(
            PassNode::new("MainScene", FrameStage::MainScenePass)
                .reads(&lighting)
                .writes(&[SceneColor, SceneDepth]),
        )
        .add(
            PassNode::new("DebugOverlay", FrameStage::DebugOverlay)
                .reads(&[TileLightCounts])
                .writes(&[SceneColor]),
        )
        .add(
            PassNode::new("Skybox", FrameStage::SkyboxComposite)
                .reads(&[EnvironmentCube, LinearClampSampler, SceneDepth])
                .writes(&[SceneColor]),
        )
        .add(PassNode::new("Bloom", FrameStage::Bloom).reads(&[SceneColor]))
        .add(PassNode::new("Composite", FrameStage::FinalComposite).reads(&[SceneColor]));
    graph
}

pub struct Renderer {
    // Passes hold GPU objects of the context's device; the context goes last.
    post: PostProcess,
    particles: ParticleSystem,
    overlay: DebugOverlay,
    skybox: SkyboxPass,
    scene: ScenePass,
    ssao: SsaoStage,
    culling: LightCullingStage,
    point_shadows: PointShadowPass,
    cascades: CascadeShadowPass,
    ibl: IblMaps,
    materials: MaterialBindings,
    lights: LightBuffers,
    objects: ObjectsBuffer,
    frame_buffer: FrameBuffer,
    linear_sampler: wgpu::Sampler,
    offscreen: Option<RenderTarget>,
    registry: ResourceRegistry,
    graph: FrameGraph,
    assets: Assets,
    shaders: ShaderLibrary,
    frame: FrameContext,
    settings: RenderSettings,
    debug_overlay: bool,
    stats: RendererStats,
    context: RenderContext,
}

impl Renderer {
    pub async fn new_windowed(
        window: Arc<Window>,
        settings: RenderSettings,
    ) -> Result<Self, RendererError> {
        let settings = settings.validate();
        let context = RenderContext::new_windowed(window, &settings).await?;
        Self::from_context(context, settings)
    }

    /// Renderer without a window; frames end in an offscreen texture that
    /// [`Renderer::read_frame`] can copy back.
    pub async fn new_headless(
        width: u32,
        height: u32,
        settings: RenderSettings,
    ) -> Result<Self, RendererError> {
        let settings = settings.validate();
        let context = RenderContext::new_headless(width, height, &settings).await?;
        Self::from_context(context, settings)
    }

    fn from_context(context: RenderContext, settings: RenderSettings) -> Result<Self, RendererError> {
        let graph = standard_frame_graph();
        graph.validate()?;

        let device = &context.device;
        let queue = &context.queue;
        let (width, height) = (context.width(), context.height());
        let shaders = ShaderLibrary::new();
        let assets = Assets::new(device, queue);

        let frame_buffer = FrameBuffer::new(device);
        let objects = ObjectsBuffer::new(device, INITIAL_OBJECTS_CAPACITY);
        let lights = LightBuffers::new(device);
        let materials = MaterialBindings::new(device);

        let cascades = CascadeShadowPass::new(
            device,
            &shaders,
            &objects.bind_layout,
            settings.shadow_map_size,
        )?;
        let point_shadows = PointShadowPass::new(
            device,
            &shaders,
            &objects.bind_layout,
            settings.point_shadow_size,
            settings.shadows.point_near,
            settings.shadows.vsm_blur_sigma,
        )?;
        let culling = LightCullingStage::new(
            device,
            &shaders,
            TileGrid::new(width, height),
            settings.max_lights_per_tile,
        )?;
        let ssao = SsaoStage::new(
            device,
            queue,
            &shaders,
            &frame_buffer.bind_layout,
            &settings.ssao,
            width,
            height,
        )?;
        let scene = ScenePass::new(
            device,
            &shaders,
            &frame_buffer.bind_layout,
            &objects.bind_layout,
            &materials.bind_layout,
            width,
            height,
        )?;
        let skybox = SkyboxPass::new(
            device,
            &shaders,
            &frame_buffer.bind_layout,
            HDR_FORMAT,
            SCENE_DEPTH_FORMAT,
        )?;
        let overlay = DebugOverlay::new(device, &shaders, &frame_buffer.bind_layout, HDR_FORMAT)?;
        let particles = ParticleSystem::new(
            device,
            &shaders,
            &frame_buffer.bind_layout,
            HDR_FORMAT,
            SCENE_DEPTH_FORMAT,
        )?;
        let post = PostProcess::new(
            device,
            queue,
            &shaders,
            scene.color_view(),
            context.format(),
            width,
            height,
            &settings.bloom,
            settings.exposure,
        )?;

        let environment = settings
            .environment_map
            .as_deref()
            .and_then(|path| load_environment(device, queue, path));
        let ibl = IblMaps::generate(device, queue, &shaders, environment.as_ref())?;

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("LinearClampSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let offscreen = if context.surface.is_none() {
            Some(Self::create_offscreen(device, context.format(), width, height)?)
        } else {
            None
        };

        let mut registry = ResourceRegistry::new();
        registry.insert_sampler(FrameResource::LinearClampSampler, &linear_sampler);
        lights.register(&mut registry);
        cascades.register(&mut registry);
        point_shadows.register(&mut registry);
        culling.register(&mut registry);
        ssao.register(&mut registry);
        scene.register(&mut registry);
        ibl.register(&mut registry);

        log::info!(
            "Renderer ready: {}x{} {:?} on {}",
            width,
            height,
            context.format(),
            context.adapter_info.name
        );

        Ok(Self {
            post,
            particles,
            overlay,
            skybox,
            scene,
            ssao,
            culling,
            point_shadows,
            cascades,
            ibl,
            materials,
            lights,
            objects,
            frame_buffer,
            linear_sampler,
            offscreen,
            registry,
            graph,
            assets,
            shaders,
            frame: FrameContext::new(),
            debug_overlay: false,
            settings,
            stats: RendererStats::default(),
            context,
        })
    }

    fn create_offscreen(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<RenderTarget, RendererError> {
        RenderTarget::new(
            device,
            TargetDesc::new("HeadlessOutput", width, height).color(format),
        )
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    pub fn frame_graph(&self) -> &FrameGraph {
        &self.graph
    }

    pub fn frame_stage(&self) -> FrameStage {
        self.frame.stage()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.context.width(), self.context.height())
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.context.width() as f32 / self.context.height().max(1) as f32
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn add_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> MeshHandle {
        self.assets.add_mesh(&self.context.device, vertices, indices)
    }

    /// Cached per path; decode failures yield the "missing" placeholder.
    pub fn load_texture(&mut self, path: impl AsRef<Path>, is_srgb: bool) -> TextureHandle {
        self.assets
            .load_texture(&self.context.device, &self.context.queue, path, is_srgb)
    }

    /// Registers a procedurally built texture, e.g. a generated heightmap.
    pub fn add_texture(&mut self, texture: Texture) -> TextureHandle {
        self.assets.textures.insert(texture)
    }

    /// Recreates every screen-sized resource. Zero sizes are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        if !self.context.resize(width, height) {
            return Ok(());
        }
        let device = &self.context.device;
        let queue = &self.context.queue;

        self.culling.resize(device, TileGrid::new(width, height));
        self.ssao.resize(device, queue, width, height)?;
        self.scene.resize(device, width, height)?;
        self.post
            .resize(device, queue, self.scene.color_view(), width, height)?;
        let offscreen = self
            .offscreen
            .as_ref()
            .map(|target| target.resized(device, width, height))
            .transpose()?;
        if offscreen.is_some() {
            self.offscreen = offscreen;
        }

        self.culling.register(&mut self.registry);
        self.ssao.register(&mut self.registry);
        self.scene.register(&mut self.registry);
        log::info!("Resized renderer to {}x{}", width, height);
        Ok(())
    }

    // --- frame recording -------------------------------------------------

    /// Starts recording a frame. Ignored (with a warning) while another
    /// frame is still open.
    pub fn begin_frame(&mut self, camera: FrameCamera, dt: f32) {
        if !self.frame.advance(FrameStage::Recording) {
            return;
        }
        self.frame.camera = Some(camera);
        self.frame.dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
    }

    fn recording(&self, call: &str) -> bool {
        let recording = self.frame.is_recording();
        if !recording {
            log::warn!("{call} outside begin_frame/end_frame is ignored");
        }
        recording
    }

    pub fn draw_mesh(&mut self, mesh: MeshHandle, transform: Mat4) {
        self.draw_mesh_with(mesh, transform, MeshDrawOptions::default());
    }

    /// Queues `mesh` with the current material.
    pub fn draw_mesh_with(&mut self, mesh: MeshHandle, transform: Mat4, options: MeshDrawOptions) {
        if !self.recording("draw_mesh") {
            return;
        }
        let Some(local) = self.assets.meshes.get(mesh).map(|m| m.local_aabb()) else {
            log::warn!("Skipping draw of unknown mesh {:?}", mesh);
            return;
        };
        self.frame.draws.push(DrawCommand::StaticMesh {
            mesh,
            lod_mesh: options.lod_mesh,
            transform,
            material: self.frame.material.snapshot(self.settings.pbr),
            topology: options.topology,
            cull_mode: options.cull_mode,
            world_aabb: local.transformed(&transform),
        });
    }

    /// Queues a heightmap terrain covering the unit square under
    /// `transform`, split into `patches` x `patches` tessellated patches.
    pub fn draw_terrain(
        &mut self,
        heightmap: TextureHandle,
        transform: Mat4,
        patches: u32,
        height_scale: f32,
    ) {
        if !self.recording("draw_terrain") {
            return;
        }
        self.frame.draws.push(DrawCommand::Terrain {
            heightmap,
            transform,
            material: self.frame.material.snapshot(self.settings.pbr),
            patches,
            height_scale,
            world_aabb: terrain_local_aabb(height_scale).transformed(&transform),
        });
    }

    pub fn spawn_emitter(&mut self, desc: EmitterDesc) -> EmitterId {
        self.particles.spawn(&self.context.device, desc)
    }

    pub fn emitter_alive(&self, emitter: EmitterId) -> bool {
        self.particles.contains(emitter)
    }

    pub fn draw_particles(&mut self, emitter: EmitterId) {
        if !self.recording("draw_particles") {
            return;
        }
        self.frame.draws.push(DrawCommand::Particles { emitter });
    }

    /// Returns the light's index, or `None` when it was dropped.
    pub fn add_point_light(&mut self, desc: PointLightDesc) -> Option<usize> {
        if !self.recording("add_point_light") {
            return None;
        }
        self.frame.lights.add_point(desc)
    }

    pub fn add_dir_light(&mut self, direction: Vec3, color: Vec3, intensity: f32, casts_shadows: bool) {
        if !self.recording("add_dir_light") {
            return;
        }
        self.frame
            .lights
            .set_directional(direction, color, intensity, casts_shadows);
    }

    // --- current material ------------------------------------------------

    pub fn set_current_diffuse(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_diffuse(texture);
    }

    pub fn set_current_normal(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_normal(texture);
    }

    pub fn set_current_specular(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_specular(texture);
    }

    pub fn set_current_albedo(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_albedo(texture);
    }

    pub fn set_current_metallic(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_metallic(texture);
    }

    pub fn set_current_roughness(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_roughness(texture);
    }

    pub fn set_current_ao(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_ao(texture);
    }

    pub fn set_current_height(&mut self, texture: Option<TextureHandle>) {
        self.frame.material.set_height(texture);
    }

    pub fn set_current_base_color(&mut self, color: Vec4) {
        self.frame.material.set_base_color(color);
    }

    pub fn set_current_shininess(&mut self, shininess: f32, specular_strength: f32) {
        self.frame.material.set_shininess(shininess, specular_strength);
    }

    pub fn set_current_pbr_factors(&mut self, metallic: f32, roughness: f32) {
        self.frame.material.set_pbr_factors(metallic, roughness);
    }

    pub fn set_current_unlit(&mut self, unlit: bool) {
        self.frame.material.set_unlit(unlit);
    }

    pub fn reset_material(&mut self) {
        self.frame.material.reset();
    }

    // --- global parameters -----------------------------------------------

    pub fn set_exposure(&mut self, exposure: f32) {
        if !(exposure.is_finite() && exposure > 0.0) {
            log::warn!("Ignoring invalid exposure {exposure}");
            return;
        }
        self.settings.exposure = exposure;
        self.post.set_exposure(&self.context.queue, exposure);
    }

    pub fn set_fog(&mut self, fog: FogSettings) {
        self.settings.fog = fog;
    }

    pub fn set_bloom_threshold(&mut self, threshold: f32) {
        self.settings.bloom.threshold = threshold.max(0.0);
        self.post.set_bloom(&self.context.queue, &self.settings.bloom);
    }

    pub fn set_bloom(&mut self, bloom: BloomSettings) {
        self.settings.bloom = bloom;
        self.post.set_bloom(&self.context.queue, &self.settings.bloom);
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.settings.ambient = ambient.max(Vec3::ZERO).to_array();
    }

    pub fn set_ssao(&mut self, ssao: SsaoSettings) {
        self.ssao.set_settings(&self.context.queue, &ssao);
        self.settings.ssao = ssao;
    }

    /// Selects the material model snapshotted by subsequent draws.
    pub fn set_pbr_mode(&mut self, pbr: bool) {
        self.settings.pbr = pbr;
    }

    pub fn set_debug_overlay(&mut self, enabled: bool) {
        self.debug_overlay = enabled;
    }

    /// Regenerates the IBL maps from an equirectangular HDR image. A load
    /// failure is logged and falls back to the procedural sky.
    pub fn set_environment(&mut self, path: Option<&str>) -> Result<(), RendererError> {
        let device = &self.context.device;
        let queue = &self.context.queue;
        let environment = path.and_then(|path| load_environment(device, queue, path));
        self.ibl = IblMaps::generate(device, queue, &self.shaders, environment.as_ref())?;
        self.ibl.register(&mut self.registry);
        self.settings.environment_map = path.map(str::to_string);
        Ok(())
    }

    // --- frame execution -------------------------------------------------

    /// Runs every pass of the recorded frame, presents it and resets the
    /// per-frame state.
    pub fn end_frame(&mut self) -> Result<(), RendererError> {
        if !self.frame.is_recording() {
            log::warn!("end_frame without begin_frame is ignored");
            return Ok(());
        }
        let Some(camera) = self.frame.camera else {
            self.finish_frame(RendererStats::default());
            return Ok(());
        };

        let surface_texture = self.context.acquire()?;
        if self.context.surface.is_some() && surface_texture.is_none() {
            self.finish_frame(RendererStats::default());
            return Ok(());
        }

        let result = self.record_and_submit(&camera, surface_texture);
        let stats = match result {
            Ok(stats) => stats,
            Err(err) => {
                self.frame.reset();
                return Err(err);
            }
        };
        self.finish_frame(stats);
        Ok(())
    }

    fn record_and_submit(
        &mut self,
        camera: &FrameCamera,
        surface_texture: Option<wgpu::SurfaceTexture>,
    ) -> Result<RendererStats, RendererError> {
        let device = &self.context.device;
        let queue = &self.context.queue;
        let mut stats = RendererStats::default();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("FrameEncoder"),
        });

        // Shadow passes.
        self.frame.advance(FrameStage::ShadowPasses);
        let scene = prepare_scene(
            device,
            &self.assets,
            &mut self.materials,
            self.frame.draws.commands(),
            camera,
            &self.settings.tessellation,
        );
        stats.visible_draws = scene.visible;
        stats.culled_draws = scene.culled;
        stats.skipped_draws = scene.skipped;
        stats.terrain_patches = scene.patches.len() as u32;
        self.objects
            .upload(device, queue, &scene.objects, &scene.patches);

        let light_set = &self.frame.lights;
        let points = light_set.gpu_points(self.point_shadows.near());
        let directional = light_set.directional();
        let plan = CascadePlan::for_frame(camera, directional, &self.settings.shadows);
        let directional_uniform =
            DirectionalLightUniform::new(directional, plan.as_ref(), self.cascades.size());
        self.lights.update(queue, &points, &directional_uniform);

        let grid = self.culling.grid();
        self.frame_buffer.update(
            queue,
            &CameraUniform::from_camera(camera, self.context.width(), self.context.height()),
            &self.shading_uniform(grid, points.len() as u32),
        );

        if let Some(plan) = &plan {
            let drawn = self.cascades.render(
                &mut encoder,
                queue,
                &self.assets,
                &self.objects.bind_group,
                &scene.casters,
                plan,
            );
            stats.cascade_draw_calls = drawn.iter().sum();
        }
        let shadow_lights: Vec<(PointLight, usize)> = light_set
            .shadow_casters()
            .map(|(index, slot)| (light_set.point_lights()[index], slot))
            .collect();
        stats.point_shadow_draw_calls = self.point_shadows.render(
            &mut encoder,
            queue,
            &self.assets,
            &self.objects.bind_group,
            &scene.casters,
            &shadow_lights,
        );
        stats.active_point_lights = light_set.active_point_count() as u32;
        stats.point_shadow_casters = shadow_lights.len() as u32;
        stats.rejected_point_lights = light_set.rejected_points();
        stats.rejected_shadow_casters = light_set.rejected_shadows();

        // Light culling.
        self.frame.advance(FrameStage::LightCulling);
        self.culling.prepare(queue, camera, points.len() as u32);
        self.culling.dispatch(device, &self.registry, &mut encoder)?;

        // Geometry prepass and SSAO.
        self.frame.advance(FrameStage::GeometryPrepass);
        let groups = SceneGroups {
            frame: &self.frame_buffer.bind_group,
            objects: &self.objects.bind_group,
            materials: &self.materials,
        };
        if self.ssao.enabled() {
            self.scene.record_prepass(
                &mut encoder,
                self.ssao.geometry(),
                &self.assets,
                &groups,
                &scene,
            )?;
        }
        self.ssao.render(
            device,
            &self.registry,
            &mut encoder,
            &self.frame_buffer.bind_group,
        )?;

        // Main scene.
        self.frame.advance(FrameStage::MainScenePass);
        self.particles.update(&mut encoder, queue, self.frame.dt);
        stats.main_draw_calls = self.scene.record_main(
            device,
            &self.registry,
            &mut encoder,
            &self.assets,
            &groups,
            &scene,
            &self.particles,
        )?;

        if self.debug_overlay {
            self.frame.advance(FrameStage::DebugOverlay);
            self.overlay.draw(
                device,
                &self.registry,
                &mut encoder,
                &self.frame_buffer.bind_group,
                self.scene.color_view(),
            )?;
        }

        self.frame.advance(FrameStage::SkyboxComposite);
        let scene_target = self.scene.target();
        let depth = scene_target
            .depth()
            .ok_or_else(|| RendererError::IncompleteTarget {
                target: scene_target.name().to_string(),
                reason: "skybox needs the scene depth".to_string(),
            })?;
        self.skybox.draw(
            device,
            &self.registry,
            &mut encoder,
            &self.frame_buffer.bind_group,
            &scene_target.color(0).view,
            &depth.view,
        )?;

        self.frame.advance(FrameStage::Bloom);
        stats.bloom_passes = self.post.bloom(&mut encoder);

        self.frame.advance(FrameStage::FinalComposite);
        let surface_view = surface_texture
            .as_ref()
            .map(|frame| frame.texture.create_view(&wgpu::TextureViewDescriptor::default()));
        let output = match (&surface_view, &self.offscreen) {
            (Some(view), _) => view,
            (None, Some(offscreen)) => &offscreen.color(0).view,
            (None, None) => {
                return Err(RendererError::InvalidConfig(
                    "no output target for the final composite".to_string(),
                ))
            }
        };
        self.post.composite(&mut encoder, output);

        queue.submit(Some(encoder.finish()));
        if let Some(frame) = surface_texture {
            frame.present();
        }
        Ok(stats)
    }

    fn shading_uniform(&self, grid: TileGrid, point_count: u32) -> ShadingUniform {
        let settings = &self.settings;
        let [r, g, b] = settings.ambient;
        let [fr, fg, fb] = settings.fog.color;
        ShadingUniform {
            ambient: [r, g, b, if settings.pbr { 1.0 } else { 0.0 }],
            fog_color: [fr, fg, fb, settings.fog.density],
            fog_params: [
                settings.fog.mode.as_u32() as f32,
                settings.fog.start,
                settings.fog.end,
                1.0,
            ],
            tile_params: [grid.tiles_x, grid.tiles_y, self.culling.capacity(), point_count],
            shadow_params: [
                settings.shadows.bias_min,
                settings.shadows.bias_max,
                settings.shadows.vsm_min_variance,
                settings.shadows.vsm_light_bleed_reduction,
            ],
            debug: [self.debug_overlay as u32, self.ssao.enabled() as u32, 0, 0],
        }
    }

    /// Frame reset: lights off, material and draw list cleared, finished
    /// emitters dropped.
    fn finish_frame(&mut self, mut stats: RendererStats) {
        // Stages skipped by an early exit still have to be walked in order.
        for stage in FrameStage::ORDER {
            if stage > self.frame.stage() && !stage.is_optional() && stage != FrameStage::Idle {
                self.frame.advance(stage);
            }
        }
        stats.pruned_emitters = self.particles.prune() as u32;
        stats.live_emitters = self.particles.len() as u32;
        if stats.rejected_point_lights > 0 || stats.rejected_shadow_casters > 0 {
            log::debug!(
                "Frame dropped {} point lights and {} shadow requests",
                stats.rejected_point_lights,
                stats.rejected_shadow_casters
            );
        }
        log::debug!(
            "Frame: {} visible, {} culled, {} draw calls",
            stats.visible_draws,
            stats.culled_draws,
            stats.total_draw_calls()
        );
        self.stats = stats;
        self.frame.reset();
    }

    // --- diagnostics -----------------------------------------------------

    /// Blocking readback of the last light-culling result.
    pub fn read_tile_grid(&self) -> Result<TileLightGrid, RendererError> {
        self.culling
            .read_back(&self.context.device, &self.context.queue)
    }

    /// Blocking readback of one cascade band's depth values.
    pub fn read_cascade_layer(&self, layer: u32) -> Result<Vec<f32>, RendererError> {
        self.cascades
            .read_layer(&self.context.device, &self.context.queue, layer)
    }

    /// Blocking readback of the headless output as tightly packed RGBA8.
    pub fn read_frame(&self) -> Result<Vec<u8>, RendererError> {
        let offscreen = self.offscreen.as_ref().ok_or_else(|| {
            RendererError::Readback("only headless renderers can read their frame".to_string())
        })?;
        readback::read_texture_layer(
            &self.context.device,
            &self.context.queue,
            &offscreen.color(0).texture,
            0,
            wgpu::TextureAspect::All,
            4,
        )
    }

    pub fn linear_sampler(&self) -> &wgpu::Sampler {
        &self.linear_sampler
    }
}

fn load_environment(device: &wgpu::Device, queue: &wgpu::Queue, path: &str) -> Option<Texture> {
    match Texture::hdr_from_path(device, queue, path) {
        Ok(texture) => Some(texture),
        Err(err) => {
            log::error!("{err}; using the procedural sky");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_graph_is_valid() {
        assert!(standard_frame_graph().validate().is_ok());
    }

    #[test]
    fn main_pass_reads_completed_inputs() {
        let graph = standard_frame_graph();
        let main = graph
            .passes()
            .iter()
            .position(|pass| pass.name == "MainScene")
            .unwrap();
        assert_eq!(
            graph.producer_of(FrameResource::SsaoOcclusion, main),
            Some("SsaoBlur")
        );
        assert_eq!(
            graph.producer_of(FrameResource::TileLightIndices, main),
            Some("TileCulling")
        );
        assert_eq!(
            graph.producer_of(FrameResource::CascadeShadowMap, main),
            Some("CascadeShadows")
        );
        assert_eq!(
            graph.producer_of(FrameResource::PointShadowMoments, main),
            Some("PointShadows")
        );
    }

    #[test]
    fn graph_stages_are_ordered() {
        let graph = standard_frame_graph();
        assert!(graph
            .passes()
            .windows(2)
            .all(|pair| pair[0].stage <= pair[1].stage));
    }

    #[test]
    fn total_draw_calls_sums_passes() {
        let stats = RendererStats {
            main_draw_calls: 3,
            cascade_draw_calls: 4,
            point_shadow_draw_calls: 6,
            ..RendererStats::default()
        };
        assert_eq!(stats.total_draw_calls(), 13);
    }
}
