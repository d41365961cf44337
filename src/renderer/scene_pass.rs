//! Draw preparation plus the geometry prepass and the forward+ main pass.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::asset::{Assets, MeshHandle};
use crate::error::RendererError;
use crate::math::Frustum;
use crate::renderer::binding::{BoundPass, FrameResource, PassBindings, ResourceRegistry};
use crate::renderer::camera::FrameCamera;
use crate::renderer::draw::{CullMode, DrawCommand, Topology};
use crate::renderer::internal::buffers::{MaterialBindings, MaterialKey};
use crate::renderer::particles::{EmitterId, ParticleSystem};
use crate::renderer::pipeline_builder::PipelineBuilder;
use crate::renderer::shaders::{ShaderLibrary, ShaderVariant};
use crate::renderer::shadows::ShadowCaster;
use crate::renderer::ssao::{GEOMETRY_DEPTH_FORMAT, GEOMETRY_FORMAT};
use crate::renderer::targets::{RenderTarget, TargetDesc};
use crate::renderer::terrain::{self, PatchData, PatchGroup, TerrainLayout};
use crate::renderer::uniforms::{ObjectData, DRAW_KIND_MESH, DRAW_KIND_TERRAIN};
use crate::renderer::vertex::Vertex;
use crate::settings::TessellationSettings;

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const SCENE_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Group 3 of the forward pipelines.
pub(crate) fn lighting_bindings() -> PassBindings {
    PassBindings::new("LightingBindings", wgpu::ShaderStages::FRAGMENT)
        .read(FrameResource::PointLights)
        .read(FrameResource::DirectionalLight)
        .read(FrameResource::TileLightCounts)
        .read(FrameResource::TileLightIndices)
        .read(FrameResource::CascadeShadowMap)
        .read(FrameResource::ShadowComparisonSampler)
        .read(FrameResource::PointShadowMoments)
        .read(FrameResource::SsaoOcclusion)
        .read(FrameResource::IrradianceCube)
        .read(FrameResource::PrefilteredCube)
        .read(FrameResource::BrdfLut)
        .read(FrameResource::LinearClampSampler)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Shading {
    Classic,
    Pbr,
}

impl Shading {
    fn of(pbr: bool) -> Self {
        if pbr {
            Shading::Pbr
        } else {
            Shading::Classic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ForwardKey {
    shading: Shading,
    topology: Topology,
    cull: CullMode,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MeshDraw {
    pub(crate) mesh: MeshHandle,
    pub(crate) object_index: u32,
    pub(crate) material: MaterialKey,
    pub(crate) shading: Shading,
    pub(crate) topology: Topology,
    pub(crate) cull: CullMode,
}

#[derive(Debug, Clone)]
pub(crate) struct TerrainDraw {
    pub(crate) material: MaterialKey,
    pub(crate) shading: Shading,
    pub(crate) groups: Vec<PatchGroup>,
}

/// Everything the passes of one frame need from the draw list.
#[derive(Debug, Default)]
pub(crate) struct PreparedScene {
    pub(crate) objects: Vec<ObjectData>,
    pub(crate) patches: Vec<PatchData>,
    pub(crate) meshes: Vec<MeshDraw>,
    pub(crate) terrains: Vec<TerrainDraw>,
    pub(crate) emitters: Vec<EmitterId>,
    pub(crate) casters: Vec<ShadowCaster>,
    pub(crate) visible: u32,
    pub(crate) culled: u32,
    pub(crate) skipped: u32,
}

/// Camera-frustum visibility of every command, computed in parallel.
pub fn visibility_mask(commands: &[DrawCommand], frustum: &Frustum) -> Vec<bool> {
    commands
        .par_iter()
        .map(|command| {
            command
                .world_aabb()
                .map_or(true, |aabb| frustum.is_aabb_visible(aabb))
        })
        .collect()
}

/// Resolves the draw list into GPU-ready object data and draw records.
///
/// Every triangle mesh becomes a shadow caster even when the camera does
/// not see it. Draws with unknown meshes or non-finite bounds are skipped.
pub(crate) fn prepare_scene(
    device: &wgpu::Device,
    assets: &Assets,
    materials: &mut MaterialBindings,
    commands: &[DrawCommand],
    camera: &FrameCamera,
    tessellation: &TessellationSettings,
) -> PreparedScene {
    let frustum = Frustum::from_view_proj(&camera.view_proj());
    let visible = visibility_mask(commands, &frustum);
    let mut scene = PreparedScene::default();

    for (command, is_visible) in commands.iter().zip(visible) {
        if command.world_aabb().is_some_and(|aabb| !aabb.is_finite()) {
            log::warn!("Skipping draw with non-finite bounds");
            scene.skipped += 1;
            continue;
        }

        match command {
            DrawCommand::StaticMesh {
                mesh,
                lod_mesh,
                transform,
                material,
                topology,
                cull_mode,
                world_aabb,
            } => {
                if assets.meshes.get(*mesh).is_none() {
                    log::warn!("Skipping draw of unknown mesh {:?}", mesh);
                    scene.skipped += 1;
                    continue;
                }
                let object_index = scene.objects.len() as u32;
                scene
                    .objects
                    .push(ObjectData::new(*transform, material, DRAW_KIND_MESH));

                if command.casts_shadows() {
                    let shadow_mesh = lod_mesh
                        .filter(|lod| assets.meshes.get(*lod).is_some())
                        .unwrap_or(*mesh);
                    scene.casters.push(ShadowCaster {
                        mesh: shadow_mesh,
                        object_index,
                        world_aabb: *world_aabb,
                    });
                }

                if !is_visible {
                    scene.culled += 1;
                    continue;
                }
                let Some(key) = materials.prepare(device, assets, material, None) else {
                    scene.skipped += 1;
                    continue;
                };
                scene.meshes.push(MeshDraw {
                    mesh: *mesh,
                    object_index,
                    material: key,
                    shading: Shading::of(material.is_pbr()),
                    topology: *topology,
                    cull: *cull_mode,
                });
                scene.visible += 1;
            }
            DrawCommand::Terrain {
                heightmap,
                transform,
                material,
                patches,
                height_scale,
                ..
            } => {
                if !is_visible {
                    scene.culled += 1;
                    continue;
                }
                let Some(key) = materials.prepare(device, assets, material, Some(*heightmap))
                else {
                    scene.skipped += 1;
                    continue;
                };
                let object_index = scene.objects.len() as u32;
                scene
                    .objects
                    .push(ObjectData::new(*transform, material, DRAW_KIND_TERRAIN));

                let layout = TerrainLayout {
                    transform: *transform,
                    patches: *patches,
                    height_scale: *height_scale,
                };
                let mut planned = terrain::plan_patches(
                    &layout,
                    camera.position,
                    Some(&frustum),
                    tessellation,
                    object_index,
                );
                let groups = terrain::group_by_level(&mut planned, scene.patches.len() as u32);
                scene.patches.extend(planned);
                scene.terrains.push(TerrainDraw {
                    material: key,
                    shading: Shading::of(material.is_pbr()),
                    groups,
                });
                scene.visible += 1;
            }
            DrawCommand::Particles { emitter } => {
                scene.emitters.push(*emitter);
                scene.visible += 1;
            }
        }
    }
    scene
}

/// Shared groups 0 to 2 of every scene pipeline.
pub(crate) struct SceneGroups<'a> {
    pub(crate) frame: &'a wgpu::BindGroup,
    pub(crate) objects: &'a wgpu::BindGroup,
    pub(crate) materials: &'a MaterialBindings,
}

/// Owns the HDR scene target and every pipeline that draws scene geometry.
pub(crate) struct ScenePass {
    target: RenderTarget,
    lighting: BoundPass,
    forward: HashMap<ForwardKey, wgpu::RenderPipeline>,
    terrain: HashMap<Shading, wgpu::RenderPipeline>,
    prepass: HashMap<CullMode, wgpu::RenderPipeline>,
    terrain_prepass: wgpu::RenderPipeline,
}

impl ScenePass {
    pub(crate) fn new(
        device: &wgpu::Device,
        shaders: &ShaderLibrary,
        frame_layout: &wgpu::BindGroupLayout,
        objects_layout: &wgpu::BindGroupLayout,
        material_layout: &wgpu::BindGroupLayout,
        width: u32,
        height: u32,
    ) -> Result<Self, RendererError> {
        let target = Self::create_target(device, width, height)?;
        let lighting = BoundPass::new(device, lighting_bindings());

        let forward_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ForwardPipelineLayout"),
            bind_group_layouts: &[frame_layout, objects_layout, material_layout, lighting.layout()],
            push_constant_ranges: &[],
        });
        let prepass_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("PrepassPipelineLayout"),
            bind_group_layouts: &[frame_layout, objects_layout, material_layout],
            push_constant_ranges: &[],
        });

        let mut forward = HashMap::new();
        let mut terrain = HashMap::new();
        for shading in [Shading::Classic, Shading::Pbr] {
            let (mesh_variant, terrain_variant) = match shading {
                Shading::Classic => (ShaderVariant::Standard, ShaderVariant::TerrainStandard),
                Shading::Pbr => (ShaderVariant::Pbr, ShaderVariant::TerrainPbr),
            };
            let mesh_shader = shaders.module(device, mesh_variant)?;
            for topology in [Topology::Triangles, Topology::Lines] {
                for cull in [CullMode::Back, CullMode::None] {
                    let pipeline = PipelineBuilder::new(device, &forward_layout, &mesh_shader)
                        .with_label(mesh_variant.label())
                        .with_vertex_buffer(Vertex::layout())
                        .with_color_target(HDR_FORMAT, None)
                        .with_depth_stencil(SCENE_DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
                        .with_cull_mode(cull.to_wgpu())
                        .with_topology(topology.to_wgpu())
                        .build();
                    forward.insert(
                        ForwardKey {
                            shading,
                            topology,
                            cull,
                        },
                        pipeline,
                    );
                }
            }

            let terrain_shader = shaders.module(device, terrain_variant)?;
            let pipeline = PipelineBuilder::new(device, &forward_layout, &terrain_shader)
                .with_label(terrain_variant.label())
                .with_color_target(HDR_FORMAT, None)
                .with_depth_stencil(SCENE_DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
                .build();
            terrain.insert(shading, pipeline);
        }

        let prepass_shader = shaders.module(device, ShaderVariant::GeometryPrepass)?;
        let mut prepass = HashMap::new();
        for cull in [CullMode::Back, CullMode::None] {
            let pipeline = PipelineBuilder::new(device, &prepass_layout, &prepass_shader)
                .with_label("GeometryPrepassPipeline")
                .with_vertex_buffer(Vertex::layout())
                .with_color_target(GEOMETRY_FORMAT, None)
                .with_color_target(GEOMETRY_FORMAT, None)
                .with_depth_stencil(GEOMETRY_DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
                .with_cull_mode(cull.to_wgpu())
                .build();
            prepass.insert(cull, pipeline);
        }
        let terrain_prepass_shader = shaders.module(device, ShaderVariant::TerrainPrepass)?;
        let terrain_prepass = PipelineBuilder::new(device, &prepass_layout, &terrain_prepass_shader)
            .with_label("TerrainPrepassPipeline")
            .with_color_target(GEOMETRY_FORMAT, None)
            .with_color_target(GEOMETRY_FORMAT, None)
            .with_depth_stencil(GEOMETRY_DEPTH_FORMAT, true, wgpu::CompareFunction::Less)
            .build();

        log::info!(
            "Scene pass: {} forward pipelines, {} prepass pipelines",
            forward.len() + terrain.len(),
            prepass.len() + 1
        );

        Ok(Self {
            target,
            lighting,
            forward,
            terrain,
            prepass,
            terrain_prepass,
        })
    }

    fn create_target(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<RenderTarget, RendererError> {
        RenderTarget::new(
            device,
            TargetDesc::new("SceneColor", width, height)
                .color(HDR_FORMAT)
                .depth(SCENE_DEPTH_FORMAT),
        )
    }

    pub(crate) fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub(crate) fn color_view(&self) -> &wgpu::TextureView {
        &self.target.color(0).view
    }

    pub(crate) fn register(&self, registry: &mut ResourceRegistry) {
        registry.insert_view(FrameResource::SceneColor, &self.target.color(0).view);
        if let Some(depth) = self.target.depth() {
            registry.insert_view(FrameResource::SceneDepth, &depth.view);
        }
    }

    pub(crate) fn resize(
        &mut self,
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> Result<(), RendererError> {
        self.target = self.target.resized(device, width, height)?;
        Ok(())
    }

    /// View-space normals and positions for every opaque triangle draw.
    pub(crate) fn record_prepass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        geometry: &RenderTarget,
        assets: &Assets,
        groups: &SceneGroups<'_>,
        scene: &PreparedScene,
    ) -> Result<(), RendererError> {
        let depth = geometry
            .depth()
            .ok_or_else(|| RendererError::IncompleteTarget {
                target: geometry.name().to_string(),
                reason: "geometry prepass needs a depth attachment".to_string(),
            })?;
        let clear = |view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("GeometryPrepass"),
            color_attachments: &[clear(&geometry.color(0).view), clear(&geometry.color(1).view)],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, groups.frame, &[]);
        pass.set_bind_group(1, groups.objects, &[]);

        for draw in scene.meshes.iter().filter(|d| d.topology == Topology::Triangles) {
            let (Some(pipeline), Some(material), Some(mesh)) = (
                self.prepass.get(&draw.cull),
                groups.materials.get(&draw.material),
                assets.meshes.get(draw.mesh),
            ) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(2, material, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
            pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
            pass.draw_indexed(
                0..mesh.index_count(),
                0,
                draw.object_index..draw.object_index + 1,
            );
        }

        if !scene.terrains.is_empty() {
            pass.set_pipeline(&self.terrain_prepass);
            for draw in &scene.terrains {
                let Some(material) = groups.materials.get(&draw.material) else {
                    continue;
                };
                pass.set_bind_group(2, material, &[]);
                draw_patch_groups(&mut pass, &draw.groups);
            }
        }
        Ok(())
    }

    /// Lit scene into the HDR target: meshes, terrain, then particles.
    /// Returns the number of draw calls recorded.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record_main(
        &mut self,
        device: &wgpu::Device,
        registry: &ResourceRegistry,
        encoder: &mut wgpu::CommandEncoder,
        assets: &Assets,
        groups: &SceneGroups<'_>,
        scene: &PreparedScene,
        particles: &ParticleSystem,
    ) -> Result<u32, RendererError> {
        self.lighting.refresh(device, registry)?;
        let lighting = self
            .lighting
            .bind_group()
            .ok_or_else(|| {
                RendererError::InvalidConfig("lighting bind group unavailable".to_string())
            })?;
        let depth = self
            .target
            .depth()
            .ok_or_else(|| RendererError::IncompleteTarget {
                target: self.target.name().to_string(),
                reason: "main pass needs a depth attachment".to_string(),
            })?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("MainScenePass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target.color(0).view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, groups.frame, &[]);
        pass.set_bind_group(1, groups.objects, &[]);
        pass.set_bind_group(3, lighting, &[]);

        let mut draws = 0;
        for draw in &scene.meshes {
            let key = ForwardKey {
                shading: draw.shading,
                topology: draw.topology,
                cull: draw.cull,
            };
            let (Some(pipeline), Some(material), Some(mesh)) = (
                self.forward.get(&key),
                groups.materials.get(&draw.material),
                assets.meshes.get(draw.mesh),
            ) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(2, material, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer().slice(..));
            pass.set_index_buffer(mesh.index_buffer().slice(..), mesh.index_format());
            pass.draw_indexed(
                0..mesh.index_count(),
                0,
                draw.object_index..draw.object_index + 1,
            );
            draws += 1;
        }

        for draw in &scene.terrains {
            let (Some(pipeline), Some(material)) = (
                self.terrain.get(&draw.shading),
                groups.materials.get(&draw.material),
            ) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(2, material, &[]);
            draws += draw_patch_groups(&mut pass, &draw.groups);
        }

        if !scene.emitters.is_empty() {
            draws += particles.render(&mut pass, groups.frame, &scene.emitters);
        }
        Ok(draws)
    }
}

fn draw_patch_groups(pass: &mut wgpu::RenderPass<'_>, groups: &[PatchGroup]) -> u32 {
    for group in groups {
        pass.draw(
            0..terrain::patch_vertex_count(group.level),
            group.instances.clone(),
        );
    }
    groups.len() as u32
}
