use glam::{Mat4, Vec3};

use crate::asset::{MeshHandle, TextureHandle};
use crate::math::Aabb;
use crate::renderer::material::Material;
use crate::renderer::particles::EmitterId;

/// Primitive topologies the scene pipelines are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    #[default]
    Triangles,
    Lines,
}

impl Topology {
    pub fn to_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
            Topology::Lines => wgpu::PrimitiveTopology::LineList,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    Back,
    None,
}

impl CullMode {
    pub fn to_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::None => None,
        }
    }
}

/// Optional per-draw state for [`Renderer::draw_mesh_with`](crate::renderer::Renderer::draw_mesh_with).
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshDrawOptions {
    /// Cheaper mesh used by the shadow passes.
    pub lod_mesh: Option<MeshHandle>,
    pub topology: Topology,
    pub cull_mode: CullMode,
}

/// One frame's worth of rendering work for a single object.
#[derive(Debug, Clone)]
pub enum DrawCommand {
    StaticMesh {
        mesh: MeshHandle,
        lod_mesh: Option<MeshHandle>,
        transform: Mat4,
        material: Material,
        topology: Topology,
        cull_mode: CullMode,
        world_aabb: Aabb,
    },
    Terrain {
        heightmap: TextureHandle,
        transform: Mat4,
        material: Material,
        /// Patches per side of the unit terrain square.
        patches: u32,
        height_scale: f32,
        world_aabb: Aabb,
    },
    Particles {
        emitter: EmitterId,
    },
}

impl DrawCommand {
    /// World bounds for culling; particles are never culled.
    pub fn world_aabb(&self) -> Option<&Aabb> {
        match self {
            DrawCommand::StaticMesh { world_aabb, .. } | DrawCommand::Terrain { world_aabb, .. } => {
                Some(world_aabb)
            }
            DrawCommand::Particles { .. } => None,
        }
    }

    pub fn casts_shadows(&self) -> bool {
        matches!(self, DrawCommand::StaticMesh { topology: Topology::Triangles, .. })
    }
}

/// Terrain occupies the unit square `[-0.5, 0.5]` in XZ with heights in
/// `[0, height_scale]` before its transform is applied.
pub fn terrain_local_aabb(height_scale: f32) -> Aabb {
    Aabb::new(
        Vec3::new(-0.5, 0.0, -0.5),
        Vec3::new(0.5, height_scale.max(0.0), 0.5),
    )
}

/// Commands recorded between `begin_frame` and `end_frame`.
#[derive(Debug, Default)]
pub struct DrawList {
    commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Handle;
    use crate::renderer::material::MaterialState;

    fn mesh_command(topology: Topology) -> DrawCommand {
        DrawCommand::StaticMesh {
            mesh: Handle::new(0),
            lod_mesh: None,
            transform: Mat4::IDENTITY,
            material: MaterialState::default().snapshot(false),
            topology,
            cull_mode: CullMode::Back,
            world_aabb: Aabb::from_point(Vec3::ZERO),
        }
    }

    #[test]
    fn clear_empties_the_list() {
        let mut list = DrawList::new();
        list.push(mesh_command(Topology::Triangles));
        list.push(DrawCommand::Particles {
            emitter: EmitterId(3),
        });
        assert_eq!(list.len(), 2);
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn only_triangle_meshes_cast_shadows() {
        assert!(mesh_command(Topology::Triangles).casts_shadows());
        assert!(!mesh_command(Topology::Lines).casts_shadows());
        assert!(!DrawCommand::Particles {
            emitter: EmitterId(0)
        }
        .casts_shadows());
    }

    #[test]
    fn particles_have_no_bounds() {
        let command = DrawCommand::Particles {
            emitter: EmitterId(1),
        };
        assert!(command.world_aabb().is_none());
    }

    #[test]
    fn terrain_bounds_follow_height_scale() {
        let aabb = terrain_local_aabb(3.0);
        assert_eq!(aabb.max.y, 3.0);
        assert_eq!(aabb.min.x, -0.5);
    }
}
